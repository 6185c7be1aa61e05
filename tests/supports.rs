mod util;
use util::*;

use dpf_client::mesh::TopologyFlags;
use dpf_client::prelude::*;
use dpf_client::support::cyclic::CyclicStage;
use dpf_client::support::result_info::{AnalysisType, AvailableResult, ResultInfoData};
use std::collections::BTreeMap;

/// Quad shell 100 over nodes 10..=40 plus beam 200 on its last edge.
fn plate(srv: &Server) -> MeshedRegion {
    let mesh = MeshedRegion::new(4, 2, Some(srv)).unwrap();
    let mut nodes = mesh.add_nodes(4);
    let corners = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [0.0, 1.0, 0.0]];
    for (i, c) in corners.iter().enumerate() {
        nodes[i] = NodeRecord::new(10 * (i as i32 + 1), *c);
    }
    nodes.commit().unwrap();

    let mut elements = mesh.add_elements(2);
    elements.set(0, 100, ElementShape::Shell, &[0, 1, 2, 3]);
    elements.set(1, 200, ElementShape::Beam, &[2, 3]);
    elements.commit().unwrap();
    mesh
}

#[test]
fn mesh_exposes_derived_properties() {
    let (_engine, srv) = engine_and_server();
    let mesh = plate(&srv);
    mesh.set_unit("mm").unwrap();
    assert_eq!(mesh.num_nodes().unwrap(), 4);
    assert_eq!(mesh.num_elements().unwrap(), 2);
    assert_eq!(mesh.num_faces().unwrap(), 0);
    assert_eq!(mesh.unit().unwrap(), "mm");

    let names = mesh.available_property_names().unwrap();
    for name in ["connectivity", "coordinates", "elshape", "eltype"] {
        assert!(names.iter().any(|n| n == name), "missing {name}");
    }

    let coords = mesh.coordinates().unwrap();
    assert_eq!(coords.n_components().unwrap(), 3);
    assert_eq!(coords.entity_data_by_id(20).unwrap(), vec![1.0, 0.0, 0.0]);
    assert!(coords.support().unwrap().is_some_and(|s| s.as_mesh().is_some()));

    let conn = mesh.connectivity().unwrap();
    assert_eq!(conn.data().unwrap(), vec![0, 1, 2, 3, 2, 3]);
    assert_eq!(conn.data_pointer().unwrap(), Some(vec![0, 4]));
    assert_eq!(conn.entity_data_by_id(200).unwrap(), vec![2, 3]);

    assert_eq!(mesh.element_types().unwrap().data().unwrap(), vec![204, 302]);
    assert_eq!(mesh.element_shapes().unwrap().data().unwrap(), vec![2, 3]);
    assert_eq!(mesh.nodes_scoping().unwrap().ids().unwrap(), vec![10, 20, 30, 40]);
    assert_eq!(mesh.elements_scoping().unwrap().location().unwrap(), Location::Elemental);
    assert!(mesh.property::<Field>("no_such_property").unwrap_err().is_not_found());
}

#[test]
fn mesh_lookups_by_index_and_id() {
    let (_engine, srv) = engine_and_server();
    let mesh = plate(&srv);
    assert_eq!(mesh.node_coordinates(2).unwrap(), [1.0, 1.0, 0.0]);
    assert_eq!(mesh.element_connectivity(1).unwrap(), vec![2, 3]);
    assert_eq!(mesh.element_shape(0).unwrap(), ElementShape::Shell);
    assert_eq!(mesh.node_index_by_id(30).unwrap(), Some(2));
    assert_eq!(mesh.node_index_by_id(35).unwrap(), None);
    assert_eq!(mesh.element_index_by_id(200).unwrap(), Some(1));
    assert!(matches!(mesh.node_coordinates(4), Err(DpfError::OutOfRange(_))));
    assert_eq!(
        mesh.topology_flags().unwrap(),
        TopologyFlags {
            has_solid: false,
            has_shell: true,
            has_beam: true,
            has_point: false,
        }
    );
}

#[test]
fn mesh_batches_land_whole_or_not_at_all() {
    let (_engine, srv) = engine_and_server();
    let mesh = plate(&srv);

    let mut nodes = mesh.add_nodes(2);
    nodes[0] = NodeRecord::new(50, [2.0, 0.0, 0.0]);
    nodes[1] = NodeRecord::new(20, [2.0, 1.0, 0.0]);
    assert!(matches!(nodes.commit(), Err(DpfError::InvalidArgument(_))));
    assert_eq!(mesh.num_nodes().unwrap(), 4);

    let mut elements = mesh.add_elements(2);
    elements.set(0, 300, ElementShape::Point, &[0]);
    elements.set(1, 301, ElementShape::Beam, &[3, 9]);
    assert!(matches!(elements.commit(), Err(DpfError::InvalidArgument(_))));
    assert_eq!(mesh.num_elements().unwrap(), 2);

    // unbatched appends are never sent
    let _ = mesh.add_nodes(3);
    assert_eq!(mesh.num_nodes().unwrap(), 4);

    mesh.add_node(50, [2.0, 0.0, 0.0]).unwrap();
    mesh.add_element(300, ElementShape::Unknown, &[0, 1, 2, 3, 4, 0, 1, 2]).unwrap();
    assert_eq!(mesh.element_shape(2).unwrap(), ElementShape::Solid);
    assert!(mesh.topology_flags().unwrap().has_solid);
}

#[test]
fn mesh_named_selections_and_custom_properties() {
    let (_engine, srv) = engine_and_server();
    let mesh = plate(&srv);
    mesh.set_named_selection("edge", &scoping(&srv, &[30, 40])).unwrap();
    mesh.set_named_selection("corner", &scoping(&srv, &[10])).unwrap();
    assert_eq!(mesh.named_selections().unwrap(), vec!["edge", "corner"]);
    assert_eq!(mesh.named_selection("edge").unwrap().ids().unwrap(), vec![30, 40]);
    assert_eq!(mesh.named_selection_by_index(1).unwrap().ids().unwrap(), vec![10]);
    assert!(matches!(mesh.named_selection_by_index(2), Err(DpfError::OutOfRange(_))));
    assert!(mesh.named_selection("missing").unwrap_err().is_not_found());

    let thickness = PropertyField::scalar(1, Location::Elemental, Some(&srv)).unwrap();
    thickness.set_scoping(&Scoping::from_ids(&[100], Location::Elemental, Some(&srv)).unwrap()).unwrap();
    thickness.set_data(&[3]).unwrap();
    mesh.set_property("thickness", &thickness).unwrap();
    assert!(mesh.available_property_names().unwrap().contains(&"thickness".to_string()));
    let back: PropertyField = mesh.property("thickness").unwrap();
    assert_eq!(back.data().unwrap(), vec![3]);
}

/// Two steps: step 1 has substeps at 10 and 20 Hz, step 2 one at 30 Hz.
fn stepped_support(srv: &Server) -> TimeFreqSupport {
    let freqs = Field::scalar(2, Location::TimeFreqSteps, Some(srv)).unwrap();
    freqs.set_scoping(&Scoping::from_ids(&[1, 2], Location::TimeFreqSteps, Some(srv)).unwrap()).unwrap();
    freqs.set_data_pointer(&[0, 2]).unwrap();
    freqs.set_data(&[10.0, 20.0, 30.0]).unwrap();
    let support = TimeFreqSupport::new(Some(srv)).unwrap();
    support.set_time_frequencies(&freqs).unwrap();
    support
}

#[test]
fn time_freq_steps_and_cumulative_indices() {
    let (_engine, srv) = engine_and_server();
    let tf = stepped_support(&srv);
    assert_eq!(tf.n_sets().unwrap(), 3);
    assert_eq!(tf.frequency_by_step(1, 2, false).unwrap(), 20.0);
    assert_eq!(tf.frequency_by_step(2, 1, false).unwrap(), 30.0);
    assert_eq!(tf.frequency_by_cumulative_index(0, false).unwrap(), 10.0);
    assert_eq!(tf.cumulative_index(2, 1).unwrap(), 2);
    assert_eq!(tf.step_substep(1).unwrap(), (1, 2));
    assert_eq!(tf.step_substep(2).unwrap(), (2, 1));
    assert_eq!(tf.cumulative_index_by_frequency(30.0, false).unwrap(), 2);

    assert!(tf.frequency_by_step(3, 1, false).unwrap_err().is_not_found());
    assert!(tf.cumulative_index(1, 3).unwrap_err().is_not_found());
    assert!(tf.cumulative_index_by_frequency(15.0, false).unwrap_err().is_not_found());
    assert!(matches!(tf.step_substep(3), Err(DpfError::OutOfRange(_))));
}

#[test]
fn time_freq_optional_fields() {
    let (_engine, srv) = engine_and_server();
    let tf = TimeFreqSupport::new(Some(&srv)).unwrap();
    assert_eq!(tf.n_sets().unwrap(), 0);
    assert!(tf.time_frequencies(false).unwrap().is_none());
    assert!(tf.time_frequencies(true).unwrap().is_none());
    assert!(tf.rpms().unwrap().is_none());
    assert!(tf.harmonic_indices(0).unwrap().is_none());

    // without a scoping every value is its own step
    let freqs = Field::scalar(3, Location::TimeFreqSets, Some(&srv)).unwrap();
    freqs.set_data(&[0.1, 0.2, 0.3]).unwrap();
    tf.set_time_frequencies(&freqs).unwrap();
    let imaginary = Field::scalar(3, Location::TimeFreqSets, Some(&srv)).unwrap();
    imaginary.set_data(&[1.0, 2.0, 3.0]).unwrap();
    tf.set_complex_frequencies(&imaginary).unwrap();
    assert_eq!(tf.n_sets().unwrap(), 3);
    assert_eq!(tf.step_substep(2).unwrap(), (3, 1));
    assert_eq!(tf.frequency_by_step(2, 1, true).unwrap(), 2.0);

    let rpms = scalar_field(&srv, &[1], &[1500.0]);
    tf.set_rpms(&rpms).unwrap();
    assert_eq!(tf.rpms().unwrap().unwrap().data().unwrap(), vec![1500.0]);
    let harmonics = scalar_field(&srv, &[1, 2, 3], &[0.0, 1.0, 2.0]);
    tf.set_harmonic_indices(&harmonics, 0).unwrap();
    assert_eq!(tf.harmonic_indices(0).unwrap().unwrap().size().unwrap(), 3);
    assert!(tf.harmonic_indices(1).unwrap().is_none());
}

fn rotor(srv: &Server) -> CyclicSupport {
    let stage = CyclicStage::new(4, vec![1, 2, 3], vec![7, 8]).with_low_high(vec![(1, 3)]);
    let frame = vec![1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 1.0];
    CyclicSupport::new(vec![stage], frame, Some(srv)).unwrap()
}

#[test]
fn cyclic_expansion_over_sectors() {
    let (_engine, srv) = engine_and_server();
    let cyc = rotor(&srv);
    assert_eq!(cyc.num_stages().unwrap(), 1);
    assert_eq!(cyc.num_sectors(0).unwrap(), 4);
    assert_eq!(cyc.base_nodes_scoping(0).unwrap().ids().unwrap(), vec![1, 2, 3]);
    assert_eq!(cyc.base_elements_scoping(0).unwrap().ids().unwrap(), vec![7, 8]);
    assert_eq!(cyc.sectors_set_for_expansion(0).unwrap().ids().unwrap(), vec![0, 1, 2, 3]);
    assert_eq!(cyc.coordinate_system().unwrap().len(), 9);

    assert_eq!(cyc.expand_node_id(2, None, 0).unwrap().ids().unwrap(), vec![2, 5, 8, 11]);
    assert_eq!(cyc.expand_node_id(3, Some(&[1, 3]), 0).unwrap().ids().unwrap(), vec![6, 12]);
    assert_eq!(cyc.expand_element_id(7, Some(&[2]), 0).unwrap().ids().unwrap(), vec![23]);

    assert!(cyc.expand_node_id(9, None, 0).unwrap_err().is_not_found());
    assert!(matches!(cyc.expand_node_id(1, Some(&[4]), 0), Err(DpfError::OutOfRange(_))));
    assert!(matches!(cyc.num_sectors(1), Err(DpfError::OutOfRange(_))));
}

#[test]
fn cyclic_interface_maps_and_validation() {
    let (_engine, srv) = engine_and_server();
    let cyc = rotor(&srv);
    let low_high = cyc.low_high_map(0).unwrap();
    assert_eq!(low_high.scoping().unwrap().ids().unwrap(), vec![1]);
    assert_eq!(low_high.data().unwrap(), vec![3]);
    let high_low = cyc.high_low_map(0).unwrap();
    assert_eq!(high_low.entity_data_by_id(3).unwrap(), vec![1]);

    let restricted = CyclicStage::new(6, vec![1], vec![1]).with_sectors_for_expansion(vec![0, 2, 4]);
    let cyc = CyclicSupport::new(vec![restricted], Vec::new(), Some(&srv)).unwrap();
    assert_eq!(cyc.expand_node_id(1, None, 0).unwrap().ids().unwrap(), vec![1, 3, 5]);

    let err = CyclicSupport::new(vec![CyclicStage::new(0, vec![1], vec![])], Vec::new(), Some(&srv)).unwrap_err();
    assert!(matches!(err, DpfError::InvalidArgument(_)));
    assert!(matches!(CyclicSupport::new(Vec::new(), Vec::new(), Some(&srv)), Err(DpfError::InvalidArgument(_))));
}

#[test]
fn generic_support_holds_named_fields() {
    let (_engine, srv) = engine_and_server();
    let support = GenericSupport::new(&Location::Zone, Some(&srv)).unwrap();
    assert_eq!(support.location().unwrap(), Location::Zone);

    let names = StringField::new(2, Location::Zone, Some(&srv)).unwrap();
    names.set_scoping(&scoping(&srv, &[1, 2])).unwrap();
    names.set_data(&["inlet", "outlet"]).unwrap();
    support.set_property("names", &names).unwrap();
    let ids = PropertyField::scalar(2, Location::Zone, Some(&srv)).unwrap();
    ids.set_data(&[11, 12]).unwrap();
    support.set_property("ids", &ids).unwrap();

    assert_eq!(support.property_names().unwrap(), vec!["names", "ids"]);
    let back: StringField = support.property("names").unwrap();
    assert_eq!(back.entity_data_by_id(2).unwrap(), vec!["outlet".to_string()]);
    assert!(matches!(support.property::<Field>("ids"), Err(DpfError::TypeMismatch(_))));
    assert!(support.property_any("none").unwrap_err().is_not_found());
}

#[test]
fn result_info_describes_available_results() {
    let (_engine, srv) = engine_and_server();
    let mut displacement = AvailableResult::new("displacement", "U", Dimensionality::vector(3), Location::Nodal);
    displacement.unit = "m".into();
    let stress = AvailableResult::new("stress", "S", Dimensionality::symmatrix(3), Location::ElementalNodal);
    let mut labels = BTreeMap::new();
    labels.insert("zone".to_string(), vec![(1, "rotor".to_string()), (2, "stator".to_string())]);
    let data = ResultInfoData {
        analysis_type: AnalysisType::Modal,
        results: vec![displacement, stress],
        qualifier_labels: labels,
        ..ResultInfoData::default()
    };
    let info = ResultInfo::new(data.clone(), Some(&srv)).unwrap();

    assert_eq!(info.describe().unwrap(), data);
    assert_eq!(info.analysis_type().unwrap(), AnalysisType::Modal);
    assert_eq!(info.n_results().unwrap(), 2);
    let u = info.result("U").unwrap().unwrap();
    assert_eq!(u.name, "displacement");
    assert_eq!(u.n_components(), 3);
    assert!(info.result("temperature").unwrap().is_none());

    assert_eq!(info.available_qualifier_labels().unwrap().values().unwrap(), vec!["zone".to_string()]);
    let zones = info.qualifier_label_support("zone").unwrap();
    let names: StringField = zones.property("names").unwrap();
    assert_eq!(names.entity_data_by_id(2).unwrap(), vec!["stator".to_string()]);
    assert!(info.qualifier_label_support("body").unwrap_err().is_not_found());
}
