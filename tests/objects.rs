mod util;
use util::*;

use dpf_client::prelude::*;
use dpf_client::transport::call::{EntityKind, ValueKind};

#[test]
fn primitive_collections_move_values_in_bulk() {
    let (_engine, srv) = engine_with_chunks(32, 0);
    let ints = CollectionOfInt::new(Some(&srv)).unwrap();
    let values: Vec<i32> = (0..100).map(|i| i * i).collect();
    ints.set_values(values.clone()).unwrap();
    assert_eq!(ints.size().unwrap(), 100);
    assert_eq!(ints.values().unwrap(), values);
    assert_eq!(ints.get_obj_by_index(7).unwrap(), 49);

    let names = CollectionOfString::new(Some(&srv)).unwrap();
    names.set_values(vec!["x".into(), String::new(), "long enough to span chunks".into()]).unwrap();
    assert_eq!(names.values().unwrap()[2], "long enough to span chunks");

    let doubles = CollectionOfDouble::new(Some(&srv)).unwrap();
    doubles.add_label("time", None).unwrap();
    doubles.add_entry(&LabelSpace::from([("time", 1)]), &0.5).unwrap();
    doubles.add_entry(&LabelSpace::from([("time", 2)]), &1.5).unwrap();
    assert!(matches!(doubles.set_values(vec![1.0]), Err(DpfError::InvalidArgument(_))));
    doubles.set_values(vec![10.0, 20.0]).unwrap();
    assert_eq!(doubles.get_obj(&LabelSpace::from([("time", 2)])).unwrap(), 20.0);
}

#[test]
fn add_entry_replaces_while_push_back_appends() {
    let (_engine, srv) = engine_and_server();
    let c = CollectionOfInt::new(Some(&srv)).unwrap();
    c.add_label("body", None).unwrap();
    let ls = LabelSpace::from([("body", 1)]);
    c.add_entry(&ls, &1).unwrap();
    c.add_entry(&ls, &2).unwrap();
    assert_eq!(c.size().unwrap(), 1);
    assert_eq!(c.get_obj(&ls).unwrap(), 2);

    c.push_back_entry(&ls, &3).unwrap();
    assert_eq!(c.size().unwrap(), 2);
    assert!(matches!(c.get_obj(&ls), Err(DpfError::InvalidArgument(_))));
    assert_eq!(c.get_num_obj_for_label_space(&ls).unwrap(), 2);

    c.set_entry_by_index(1, &4).unwrap();
    assert_eq!(c.get_obj_by_index(1).unwrap(), 4);
    assert_eq!(c.get_label_space(1).unwrap(), ls);
    assert!(matches!(c.get_obj_by_index(2), Err(DpfError::OutOfRange(_))));
}

#[test]
fn labels_need_declaring_and_defaults_fill_gaps() {
    let (_engine, srv) = engine_and_server();
    let c = ScopingsContainer::new(Some(&srv)).unwrap();
    c.add_label("time", None).unwrap();
    let s = scoping(&srv, &[1]);
    assert!(matches!(
        c.add_entry(&LabelSpace::from([("body", 1)]), &s),
        Err(DpfError::InvalidArgument(_))
    ));
    c.add_entry(&LabelSpace::from([("time", 1)]), &s).unwrap();
    // a later label needs a default for the entries already present
    assert!(matches!(c.add_label("body", None), Err(DpfError::InvalidArgument(_))));
    c.add_label("body", Some(0)).unwrap();
    assert_eq!(c.labels().unwrap(), vec!["time", "body"]);
    assert!(c.has_label("body").unwrap());
    assert_eq!(c.get_label_space(0).unwrap(), LabelSpace::from([("time", 1), ("body", 0)]));

    // the default also completes partial label-spaces
    c.add_entry(&LabelSpace::from([("time", 2)]), &scoping(&srv, &[2])).unwrap();
    assert_eq!(c.get_obj(&LabelSpace::from([("time", 2), ("body", 0)])).unwrap().ids().unwrap(), vec![2]);

    c.resize(1).unwrap();
    assert_eq!(c.size().unwrap(), 1);
    c.reserve(16).unwrap();
    assert!(!c.is_empty().unwrap());
}

#[test]
fn fields_container_time_series() {
    let (_engine, srv) = engine_and_server();
    let fields: Vec<Field> = (1..=3)
        .map(|t| scalar_field(&srv, &[1, 2], &[f64::from(t), f64::from(t) * 10.0]))
        .collect();
    let fc = FieldsContainer::from_time_series(&fields, Some(&srv)).unwrap();
    assert_eq!(fc.size().unwrap(), 3);
    assert_eq!(fc.labels().unwrap(), vec!["time"]);
    let f = fc.field_at_time(2, &LabelSpace::new()).unwrap();
    assert_eq!(f.data().unwrap(), vec![2.0, 20.0]);
    assert!(fc.field_at_time(4, &LabelSpace::new()).unwrap_err().is_not_found());
    assert_eq!(fc.get_label_scoping("time").unwrap().ids().unwrap(), vec![1, 2, 3]);

    let tf = TimeFreqSupport::new(Some(&srv)).unwrap();
    assert!(fc.get_support("time").unwrap().is_none());
    fc.set_support("time", &Support::TimeFreq(tf)).unwrap();
    assert!(fc.get_support("time").unwrap().is_some_and(|s| s.as_time_freq().is_some()));
}

#[test]
fn meshes_container_keeps_meshes() {
    let (_engine, srv) = engine_and_server();
    let mc = MeshesContainer::new(Some(&srv)).unwrap();
    mc.add_label("body", None).unwrap();
    for body in 1..=2 {
        let mesh = MeshedRegion::new(1, 0, Some(&srv)).unwrap();
        mesh.add_node(body, [0.0; 3]).unwrap();
        mc.add_entry(&LabelSpace::from([("body", body)]), &mesh).unwrap();
    }
    let second = mc.get_obj(&LabelSpace::from([("body", 2)])).unwrap();
    assert_eq!(second.nodes_scoping().unwrap().ids().unwrap(), vec![2]);
}

#[test]
fn data_tree_stores_typed_attributes() {
    let (_engine, srv) = engine_and_server();
    let tree = DataTree::new(Some(&srv)).unwrap();
    tree.set("iterations", 12).unwrap();
    tree.set("tolerance", 1e-6).unwrap();
    tree.set("solver", "sparse").unwrap();
    tree.set("converged", true).unwrap();
    tree.set("residuals", vec![0.5, 0.05]).unwrap();

    assert_eq!(tree.get::<i32>("iterations").unwrap(), 12);
    assert_eq!(tree.get::<f64>("tolerance").unwrap(), 1e-6);
    assert_eq!(tree.get::<String>("solver").unwrap(), "sparse");
    assert!(tree.get::<bool>("converged").unwrap());
    assert_eq!(tree.get::<Vec<f64>>("residuals").unwrap(), vec![0.5, 0.05]);
    assert!(matches!(tree.get::<i32>("solver"), Err(DpfError::TypeMismatch(_))));
    assert!(tree.get::<i32>("missing").unwrap_err().is_not_found());

    assert_eq!(tree.names().unwrap(), vec!["converged", "iterations", "residuals", "solver", "tolerance"]);
    tree.remove("solver").unwrap();
    assert!(!tree.has("solver").unwrap());
    assert!(tree.has("tolerance").unwrap());
}

#[test]
fn any_wraps_values_and_objects() {
    let (_engine, srv) = engine_and_server();
    let n = Any::from_primitive(7, Some(&srv)).unwrap();
    assert_eq!(n.kind().unwrap(), ValueKind::Int);
    assert_eq!(n.cast::<i32>().unwrap(), 7);
    assert!(matches!(n.cast::<String>(), Err(DpfError::TypeMismatch(_))));

    let f = scalar_field(&srv, &[5], &[2.5]);
    let wrapped = Any::new(&f).unwrap();
    assert_eq!(wrapped.kind().unwrap(), ValueKind::Object(EntityKind::Field));
    let back: Field = wrapped.cast().unwrap();
    assert_eq!(back.data().unwrap(), vec![2.5]);
    assert!(matches!(wrapped.cast::<Scoping>(), Err(DpfError::TypeMismatch(_))));
}

#[test]
fn generic_data_container_holds_named_objects() {
    let (_engine, srv) = engine_and_server();
    let gdc = GenericDataContainer::new(Some(&srv)).unwrap();
    gdc.set_property("selection", &scoping(&srv, &[4, 5])).unwrap();
    gdc.set_property("pressure", &scalar_field(&srv, &[4, 5], &[1.0, 2.0])).unwrap();

    assert_eq!(gdc.property_names().unwrap(), vec!["pressure", "selection"]);
    let s: Scoping = gdc.property("selection").unwrap();
    assert_eq!(s.ids().unwrap(), vec![4, 5]);
    assert_eq!(gdc.property_any("pressure").unwrap().kind(), EntityKind::Field);
    assert!(matches!(gdc.property::<Field>("selection"), Err(DpfError::TypeMismatch(_))));
    assert!(gdc.property_any("nothing").unwrap_err().is_not_found());
}

#[test]
fn data_sources_track_result_and_auxiliary_files() {
    let (_engine, srv) = engine_and_server();
    let ds = DataSources::new(None, Some(&srv)).unwrap();
    assert_eq!(ds.result_key().unwrap(), "");
    assert!(ds.entries().unwrap().is_empty());

    ds.set_result_file_path("/runs/a/file.rst", None).unwrap();
    ds.add_file_path("/runs/a/file.mode", None, None).unwrap();
    ds.add_file_path("/runs/a/part1.rst", Some("rst"), Some(1)).unwrap();
    assert_eq!(ds.result_key().unwrap(), "rst");
    assert_eq!(ds.result_files().unwrap(), vec!["/runs/a/file.rst"]);

    ds.set_result_file_path("/runs/b/model.d3plot", None).unwrap();
    let entries = ds.entries().unwrap();
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].path, "/runs/b/model.d3plot");
    assert_eq!(entries[0].key, "d3plot");
    assert_eq!(entries[1].key, "mode");
    assert_eq!(entries[2].domain, Some(1));
    assert!(entries.iter().filter(|e| e.is_result).count() == 1);
}
