mod util;
use util::*;

use dpf_client::prelude::*;
use dpf_client::server;
use std::collections::BTreeSet;

#[test]
fn scoping_round_trip_of_100k_ids() {
    let (_engine, srv) = engine_and_server();
    let ids: Vec<i32> = (1..=100_000).collect();
    let s = Scoping::new(Some(Location::Nodal), Some(&srv)).unwrap();
    s.set_ids(&ids).unwrap();
    assert_eq!(s.ids().unwrap(), ids);
    assert_eq!(s.size().unwrap(), 100_000);
    assert_eq!(s.id_by_index(0).unwrap(), 1);
    assert_eq!(s.index_by_id(50_000).unwrap(), 49_999);
    assert_eq!(s.index_by_id(200_000).unwrap(), -1);
    assert_eq!(s.location().unwrap(), Location::Nodal);
}

#[test]
fn scalar_field_of_zeros_round_trips() {
    let (_engine, srv) = engine_and_server();
    let n = 100_000;
    let f = Field::scalar(n, Location::Elemental, Some(&srv)).unwrap();
    let ids: Vec<i32> = (1..=n as i32).collect();
    f.set_scoping(&Scoping::from_ids(&ids, Location::Elemental, Some(&srv)).unwrap())
        .unwrap();
    let zeros = vec![0.0f64; n];
    f.set_data(&zeros).unwrap();
    assert_eq!(f.data().unwrap(), zeros);
    assert_eq!(f.n_components().unwrap(), 1);
    assert_eq!(f.size().unwrap(), n);
    assert_eq!(f.location().unwrap(), Location::Elemental);
}

#[test]
fn collection_queries_by_partial_label_space() {
    let (_engine, srv) = engine_and_server();
    let c = ScopingsContainer::new(Some(&srv)).unwrap();
    c.add_label("body", None).unwrap();
    c.add_label("time", None).unwrap();
    let a = scoping(&srv, &[1]);
    let b = scoping(&srv, &[2]);
    let d = scoping(&srv, &[3]);
    c.add_entry(&LabelSpace::from([("body", 1), ("time", 1)]), &a).unwrap();
    c.add_entry(&LabelSpace::from([("body", 2), ("time", 1)]), &b).unwrap();
    c.add_entry(&LabelSpace::from([("body", 1), ("time", 3)]), &d).unwrap();

    let at_t1 = c.get_objs_for_label_space(&LabelSpace::new().with("time", 1)).unwrap();
    let ids: Vec<Vec<i32>> = at_t1.iter().map(|s| s.ids().unwrap()).collect();
    assert_eq!(ids, vec![vec![1], vec![2]]);
    assert_eq!(
        c.get_num_obj_for_label_space(&LabelSpace::new().with("time", 99)).unwrap(),
        0
    );
    assert_eq!(c.size().unwrap(), 3);
    assert_eq!(c.get_label_scoping("time").unwrap().ids().unwrap(), vec![1, 3]);
}

#[test]
fn operator_chain_produces_named_norm() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let ds = DataSources::new(Some("/models/beam.rst"), Some(&srv)).unwrap();
    let disp = Operator::new("displacement", Some(&srv)).unwrap();
    disp.connect(4, &ds).unwrap();
    let norm = Operator::new("norm", Some(&srv)).unwrap();
    norm.connect(0, disp.output(0)).unwrap();

    let out: Field = norm.get_output(0).unwrap();
    assert_eq!(out.n_components().unwrap(), 1);
    assert!(out.name().unwrap().contains("displacement"));
    assert!(approx_eq(&out.data().unwrap(), &DISPLACEMENT_NORMS));
    assert_eq!(out.scoping().unwrap().ids().unwrap(), vec![1, 2, 3]);
    assert_eq!(norm.status().unwrap(), OperatorStatus::Succeeded);
}

#[test]
fn workflow_text_round_trip_keeps_structure() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let disp = Operator::new("displacement", Some(&srv)).unwrap();
    let norm = Operator::new("norm", Some(&srv)).unwrap();
    let fwd = Operator::new("forward", Some(&srv)).unwrap();
    norm.connect(0, disp.output(0)).unwrap();
    fwd.connect(0, norm.output(0)).unwrap();

    let wf = Workflow::new(Some(&srv)).unwrap();
    wf.add_operators(&[&disp, &norm, &fwd]).unwrap();
    wf.set_input_name("data_sources", &disp, 4).unwrap();
    wf.set_output_name("norm", &fwd, 0).unwrap();
    wf.set_output_name("displacement", &disp, 0).unwrap();

    let text = wf.to_text().unwrap();
    let copy = Workflow::from_text(&text, Some(&srv)).unwrap();

    let set = |v: Vec<String>| v.into_iter().collect::<BTreeSet<_>>();
    assert_eq!(set(copy.input_names().unwrap()), set(wf.input_names().unwrap()));
    assert_eq!(set(copy.output_names().unwrap()), set(wf.output_names().unwrap()));
    let mut a = wf.operator_names().unwrap();
    let mut b = copy.operator_names().unwrap();
    a.sort();
    b.sort();
    assert_eq!(a, b);
    assert_eq!(a, vec!["displacement", "forward", "norm"]);

    let ds = DataSources::new(Some("/models/beam.rst"), Some(&srv)).unwrap();
    copy.connect("data_sources", &ds).unwrap();
    let out: Field = copy.get_output("norm").unwrap();
    assert!(approx_eq(&out.data().unwrap(), &DISPLACEMENT_NORMS));
}

#[test]
fn dropped_fields_release_their_engine_objects() {
    let (_engine, srv) = engine_and_server();
    let _session = Session::new(Some(&srv)).unwrap();
    let before = server::live_object_count(&srv).unwrap();
    for i in 0..1000 {
        let f = Field::scalar(1, Location::Nodal, Some(&srv)).unwrap();
        f.push_back(i, &[f64::from(i)]).unwrap();
    }
    assert_eq!(server::live_object_count(&srv).unwrap(), before);
}
