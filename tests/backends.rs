mod util;
use util::*;

use dpf_client::config::ServerConfig;
use dpf_client::prelude::*;
use dpf_client::server::{self, requires_version};
use serial_test::serial;

#[test]
#[serial]
fn native_backend_serves_the_same_operations() {
    let engine = LoopbackEngine::with_version("7.1");
    register_result_operators(&engine);
    let srv = engine.connect_native(ServerConfig::default()).unwrap();
    assert_eq!(srv.kind(), CommunicationProtocol::InProcess);
    assert_eq!(server::server_info(&srv).unwrap().version, "7.1");

    let ids: Vec<i32> = (1..=10_000).collect();
    let s = scoping(&srv, &ids);
    assert_eq!(s.ids().unwrap(), ids);
    assert_eq!(s.index_by_id(10_000).unwrap(), 9_999);

    let ds = DataSources::new(Some("/models/beam.rst"), Some(&srv)).unwrap();
    let disp = Operator::new("displacement", Some(&srv)).unwrap();
    disp.connect(4, &ds).unwrap();
    let norm = Operator::new("norm", Some(&srv)).unwrap();
    norm.connect(0, disp.output(0)).unwrap();
    let out: Field = norm.get_output(0).unwrap();
    assert!(approx_eq(&out.data().unwrap(), &DISPLACEMENT_NORMS));
}

#[test]
#[serial]
fn native_errors_keep_their_category() {
    let engine = LoopbackEngine::new();
    let srv = engine.connect_native(ServerConfig::default()).unwrap();
    let s = scoping(&srv, &[4, 5]);
    assert!(matches!(s.id_by_index(7), Err(DpfError::OutOfRange(_))));
    assert!(matches!(Operator::new("no_such_operator", Some(&srv)), Err(DpfError::NotFound(_))));
    let token = CancelToken::new();
    token.cancel();
    let err = s.ids_with(&mut TransferOptions::new().with_cancel(token)).unwrap_err();
    assert!(err.is_cancelled());
}

#[test]
#[serial]
fn native_release_turns_calls_into_null_object() {
    let engine = LoopbackEngine::new();
    let srv = engine.connect_native(ServerConfig::default()).unwrap();
    let s = scoping(&srv, &[1]);
    srv.release();
    assert!(matches!(s.size(), Err(DpfError::NullObject)));
    drop(s);
}

#[test]
fn tcp_backend_round_trips_arrays() {
    let engine = LoopbackEngine::new();
    let listener = engine.serve_tcp(&ServerConfig::default()).unwrap();
    let srv = connect_to_server(&ServerConfig::rpc("127.0.0.1", listener.port())).unwrap();
    assert_eq!(srv.kind(), CommunicationProtocol::Rpc);

    let values: Vec<f64> = (0..3000).map(|i| f64::from(i) * 0.5).collect();
    let ids: Vec<i32> = (1..=1000).collect();
    let f = Field::vector(1000, 3, Location::Nodal, Some(&srv)).unwrap();
    f.set_scoping(&scoping(&srv, &ids)).unwrap();
    f.set_data(&values).unwrap();
    assert_eq!(f.data().unwrap(), values);
    assert_eq!(f.entity_data_by_id(2).unwrap(), vec![1.5, 2.0, 2.5]);
    assert_eq!(engine.live_object_count(), server::live_object_count(&srv).unwrap());
}

#[test]
fn released_rpc_server_makes_handles_null() {
    let (_engine, srv) = engine_and_server();
    let s = scoping(&srv, &[1, 2]);
    srv.release();
    assert!(srv.is_released());
    assert!(matches!(s.ids(), Err(DpfError::NullObject)));
}

#[test]
fn objects_do_not_cross_backends() {
    let (_a, left) = engine_and_server();
    let (_b, right) = engine_and_server();
    let f = Field::scalar(2, Location::Nodal, Some(&left)).unwrap();
    let foreign = scoping(&right, &[1, 2]);
    assert!(matches!(f.set_scoping(&foreign), Err(DpfError::InvalidArgument(_))));

    let copy = foreign.copy_to(&left).unwrap();
    f.set_scoping(&copy).unwrap();
    assert_eq!(f.scoping().unwrap().ids().unwrap(), vec![1, 2]);
}

#[test]
fn old_engines_refuse_gated_features() {
    let engine = LoopbackEngine::with_version("4.0");
    let srv = engine.connect_default().unwrap();
    let err = GenericSupport::new(&Location::Nodal, Some(&srv)).unwrap_err();
    match err {
        DpfError::VersionNotSupported { required, actual } => {
            assert_eq!(required, "5.0");
            assert_eq!(actual, "4.0");
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(requires_version(srv.as_ref(), "4.0").is_ok());
}

#[test]
fn engine_failures_name_the_operator() {
    let (engine, srv) = engine_and_server();
    register_failing_operator(&engine);
    let op = Operator::new("fail", Some(&srv)).unwrap();
    let err = op.run().unwrap_err();
    match &err {
        DpfError::Engine { message, template, .. } => {
            assert!(message.contains("corrupt"));
            assert_eq!(template.as_deref(), Some("fail"));
        }
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(op.status().unwrap(), OperatorStatus::Failed);
}
