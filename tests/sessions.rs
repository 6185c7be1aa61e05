mod util;
use util::*;

use dpf_client::prelude::*;
use dpf_client::progress::{ProgressRecord, ProgressRecorder};

fn norm_workflow(srv: &Server) -> Workflow {
    let disp = Operator::new("displacement", Some(srv)).unwrap();
    let norm = Operator::new("norm", Some(srv)).unwrap();
    norm.connect(0, disp.output(0)).unwrap();
    let ds = DataSources::new(Some("/models/beam.rst"), Some(srv)).unwrap();
    disp.connect(4, &ds).unwrap();

    let wf = Workflow::new(Some(srv)).unwrap();
    wf.add_operators(&[&disp, &norm]).unwrap();
    wf.set_output_name("norm", &norm, 0).unwrap();
    wf
}

#[test]
fn flush_reports_progress_then_errors_per_name() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    register_failing_operator(&engine);

    let session = Session::new(Some(&srv)).unwrap();
    let wf = norm_workflow(&srv);
    let bad = Operator::new("fail", Some(&srv)).unwrap();
    session.add_workflow("solve", &wf).unwrap();
    session.add_operator("bad", &bad, 0).unwrap();
    assert_eq!(session.registered().unwrap(), vec!["solve", "bad"]);

    let listener = session.start_listening();
    session.flush_workflows().unwrap();
    session.close().unwrap();
    let events = listener.join().unwrap();

    let solve: Vec<_> = events.iter().filter(|e| e.name == "solve").cloned().collect();
    assert_eq!(
        solve,
        vec![ProgressEvent::progress("solve", 0.0), ProgressEvent::progress("solve", 100.0)]
    );

    let bad_events: Vec<_> = events.iter().filter(|e| e.name == "bad").collect();
    assert_eq!(bad_events.len(), 2);
    assert_eq!(bad_events[0].percentage, Some(0.0));
    let state = bad_events[1].state.as_deref().unwrap();
    assert!(state.starts_with("error: "), "{state}");
    assert!(state.contains("corrupt"));
}

#[test]
fn percentages_never_decrease() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let session = Session::new(Some(&srv)).unwrap();
    let wf = norm_workflow(&srv);
    let disp_out = Operator::new("displacement", Some(&srv)).unwrap();
    disp_out
        .connect(4, &DataSources::new(Some("/models/beam.rst"), Some(&srv)).unwrap())
        .unwrap();
    wf.add_operator(&disp_out).unwrap();
    wf.set_output_name("displacement", &disp_out, 0).unwrap();
    session.add_workflow("solve", &wf).unwrap();

    session.flush_workflows().unwrap();
    session.close().unwrap();

    let mut seen = Vec::new();
    session
        .listen(|ev| {
            if let Some(p) = ev.percentage {
                seen.push(p);
            }
            true
        })
        .unwrap();
    assert_eq!(seen, vec![0.0, 50.0, 100.0]);
}

#[test]
fn listen_progress_feeds_a_sink() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let session = Session::new(Some(&srv)).unwrap();
    session.add_workflow("solve", &norm_workflow(&srv)).unwrap();
    session.flush_workflows().unwrap();
    session.close().unwrap();

    let mut rec = ProgressRecorder::new();
    session.listen_progress("solve", &mut rec).unwrap();
    assert_eq!(
        rec.records,
        vec![
            ProgressRecord::Start(Some(100)),
            ProgressRecord::Update(0),
            ProgressRecord::Update(100),
            ProgressRecord::Finish,
        ]
    );
}

#[test]
fn listener_can_stop_early() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let session = Session::new(Some(&srv)).unwrap();
    session.add_workflow("a", &norm_workflow(&srv)).unwrap();
    session.add_workflow("b", &norm_workflow(&srv)).unwrap();
    session.flush_workflows().unwrap();

    let mut first = None;
    session
        .listen(|ev| {
            first = Some(ev);
            false
        })
        .unwrap();
    assert_eq!(first, Some(ProgressEvent::progress("a", 0.0)));
    // the connection is still usable afterwards
    assert_eq!(session.registered().unwrap(), vec!["a", "b"]);
}

#[test]
fn shutdown_refuses_new_registrations() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let session = Session::new(Some(&srv)).unwrap();
    session
        .add_event_handler("progress", &[("interval_ms", "100")])
        .unwrap();
    session
        .add_signal_emitter("log", "solver", &[("level", "info")])
        .unwrap();
    session.prepare_shutdown().unwrap();

    let err = session.add_workflow("late", &norm_workflow(&srv)).unwrap_err();
    match err {
        DpfError::Engine { message, .. } => assert!(message.contains("shutting down")),
        other => panic!("unexpected {other:?}"),
    }
    assert!(session.registered().unwrap().is_empty());
    session.release().unwrap();
}

#[test]
fn registering_under_an_existing_name_replaces_it() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let session = Session::new(Some(&srv)).unwrap();
    session.add_workflow("solve", &norm_workflow(&srv)).unwrap();
    session.add_workflow("solve", &Workflow::new(Some(&srv)).unwrap()).unwrap();
    assert_eq!(session.registered().unwrap(), vec!["solve"]);

    session.flush_workflows().unwrap();
    session.close().unwrap();
    let listener = session.start_listening();
    let events = listener.join().unwrap();
    // the empty replacement completes at once
    assert_eq!(
        events,
        vec![ProgressEvent::progress("solve", 0.0), ProgressEvent::progress("solve", 100.0)]
    );
}

#[test]
fn duplicated_session_outlives_the_original_handle() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let session = Session::new(Some(&srv)).unwrap();
    let dup = session.duplicate().unwrap();
    drop(session);

    dup.add_workflow("solve", &norm_workflow(&srv)).unwrap();
    dup.flush_workflows().unwrap();
    dup.close().unwrap();
    let mut events = Vec::new();
    dup.listen(|ev| {
        events.push(ev);
        true
    })
    .unwrap();
    assert_eq!(
        events,
        vec![ProgressEvent::progress("solve", 0.0), ProgressEvent::progress("solve", 100.0)]
    );
}
