mod util;
use util::*;

use dpf_client::codec::Payload;
use dpf_client::data::FieldValueKind;
use dpf_client::dpf_error::EngineFailure;
use dpf_client::operator::{PinSpec, SpecificationData};
use dpf_client::prelude::*;
use dpf_client::transport::call::Primitive;
use dpf_client::transport::loopback::{EngineObject, EvalContext, FieldData, OperatorDef};

/// `scale`: multiplies a scalar field by the `factor` config option.
fn register_scale(engine: &LoopbackEngine) {
    let spec = SpecificationData::new("Scales a scalar field.")
        .with_input(0, PinSpec::new("field", &["field"], "field to scale"))
        .with_output(0, PinSpec::new("field", &["field"], "scaled field"));
    let def = OperatorDef::new("scale", spec, |ctx: &mut EvalContext<'_>| {
        let factor = match ctx.config("factor") {
            Some(Primitive::Double(v)) => *v,
            _ => return Err(EngineFailure::invalid("factor must be a double")),
        };
        let f = ctx.field(0)?;
        let values: Vec<f64> = f
            .doubles()
            .ok_or_else(|| EngineFailure::type_mismatch("scale needs a double field"))?
            .iter()
            .map(|v| v * factor)
            .collect();
        let def = FieldDefinitionData::new(f.definition.location.clone(), Dimensionality::scalar());
        ctx.set_output(0, EngineObject::Field(FieldData::with_values(FieldValueKind::Double, def, f.ids(), Payload::Double(values))));
        Ok(())
    })
    .with_default("factor", 2.0, "multiplier");
    engine.register(def);
}

#[test]
fn config_defaults_and_overrides() {
    let (engine, srv) = engine_and_server();
    register_scale(&engine);
    let input = scalar_field(&srv, &[1, 2], &[1.5, -4.0]);

    let op = Operator::new("scale", Some(&srv)).unwrap();
    op.connect(0, &input).unwrap();
    assert_eq!(op.config().unwrap().get_double("factor").unwrap(), 2.0);
    let out: Field = op.get_output(0).unwrap();
    assert_eq!(out.data().unwrap(), vec![3.0, -8.0]);

    let cfg = OperatorConfig::default_for("scale", Some(&srv)).unwrap();
    cfg.set_double("factor", 10.0).unwrap();
    op.set_config(&cfg).unwrap();
    assert_eq!(op.status().unwrap(), OperatorStatus::NotRun);
    let out: Field = op.get_output(0).unwrap();
    assert_eq!(out.data().unwrap(), vec![15.0, -40.0]);

    let custom = OperatorConfig::new(Some(&srv)).unwrap();
    custom.set_double("factor", 0.5).unwrap();
    let halver = Operator::with_config("scale", &custom, Some(&srv)).unwrap();
    halver.connect(0, &input).unwrap();
    let out: Field = halver.get_output(0).unwrap();
    assert_eq!(out.data().unwrap(), vec![0.75, -2.0]);
    assert!(custom.get_int("missing").unwrap_err().is_not_found());
}

#[test]
fn forward_passes_primitives_through() {
    let (_engine, srv) = engine_and_server();
    let fwd = Operator::new("forward", Some(&srv)).unwrap();
    fwd.connect(0, 42).unwrap();
    fwd.connect(1, 2.5).unwrap();
    fwd.connect(2, vec![7, 8, 9]).unwrap();
    fwd.connect(3, true).unwrap();
    assert_eq!(fwd.get_output::<i32>(0).unwrap(), 42);
    assert_eq!(fwd.get_output::<f64>(1).unwrap(), 2.5);
    assert_eq!(fwd.get_output::<Vec<i32>>(2).unwrap(), vec![7, 8, 9]);
    assert!(fwd.get_output::<bool>(3).unwrap());
    assert!(matches!(fwd.get_output::<String>(0), Err(DpfError::TypeMismatch(_))));
    assert!(fwd.has_output_when_evaluated(1).unwrap());
    assert!(!fwd.has_output_when_evaluated(9).unwrap());

    fwd.disconnect(1).unwrap();
    assert!(fwd.get_output::<f64>(1).unwrap_err().is_not_found());
}

#[test]
fn long_strings_are_streamed_into_pins() {
    let (_engine, srv) = engine_with_chunks(64, usize::MAX);
    let long = "mesh/body_".repeat(40);
    let fwd = Operator::new("forward", Some(&srv)).unwrap();
    fwd.connect(0, long.as_str()).unwrap();
    fwd.connect(1, "short").unwrap();
    assert_eq!(fwd.get_output::<String>(0).unwrap(), long);
    assert_eq!(fwd.get_output::<String>(1).unwrap(), "short");

    let wf = Workflow::new(Some(&srv)).unwrap();
    wf.add_operator(&fwd).unwrap();
    wf.set_input_name("path", &fwd, 0).unwrap();
    wf.set_output_name("path", &fwd, 0).unwrap();
    wf.connect("path", long.clone()).unwrap();
    assert_eq!(wf.get_output::<String>("path").unwrap(), long);
}

#[test]
fn bad_connections_are_rejected() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let norm = Operator::new("norm", Some(&srv)).unwrap();
    assert!(matches!(norm.connect(0, norm.output(0)), Err(DpfError::InvalidArgument(_))));
    assert!(matches!(norm.connect(7, 1.0), Err(DpfError::InvalidArgument(_))));

    // nothing connected
    let err = norm.run().unwrap_err();
    assert!(matches!(err, DpfError::InvalidArgument(_)), "{err:?}");
    assert_eq!(norm.status().unwrap(), OperatorStatus::Failed);
}

#[test]
fn specification_describes_pins() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let spec = Operator::new("displacement", Some(&srv))
        .unwrap()
        .specification()
        .unwrap();
    assert!(spec.description().unwrap().contains("displacements"));
    let inputs = spec.inputs().unwrap();
    assert_eq!(inputs.keys().copied().collect::<Vec<_>>(), vec![4]);
    assert_eq!(inputs[&4].name, "data_sources");
    assert_eq!(spec.outputs().unwrap()[&0].type_names, vec!["field"]);

    let fwd = OperatorSpecification::new("forward", Some(&srv)).unwrap();
    assert_eq!(fwd.properties().unwrap().get("category").map(String::as_str), Some("utility"));
    assert!(OperatorSpecification::new("nope", Some(&srv)).unwrap_err().is_not_found());
}

#[test]
fn derivative_inherits_inputs() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let input = scalar_field(&srv, &[1, 2], &[3.0, 4.0]);
    let norm = Operator::new("norm", Some(&srv)).unwrap();
    norm.connect(0, &input).unwrap();
    assert!(norm.derivative().unwrap().is_none());

    let fwd = Operator::new("forward", Some(&srv)).unwrap();
    norm.set_derivative(&fwd).unwrap();
    let d = norm.derivative().unwrap().unwrap();
    assert_eq!(d.name().unwrap(), "forward");
    let passed: Field = d.get_output(0).unwrap();
    assert_eq!(passed.data().unwrap(), vec![3.0, 4.0]);
    assert!(matches!(norm.set_derivative(&norm), Err(DpfError::InvalidArgument(_))));
}

/// Left: displacement exposing `data_sources` and `field`.
fn reader(srv: &Server) -> Workflow {
    let disp = Operator::new("displacement", Some(srv)).unwrap();
    let wf = Workflow::new(Some(srv)).unwrap();
    wf.add_operator(&disp).unwrap();
    wf.set_input_name("data_sources", &disp, 4).unwrap();
    wf.set_output_name("field", &disp, 0).unwrap();
    wf
}

/// Right: norm exposing `input` and `norm`.
fn reducer(srv: &Server, input: &str) -> Workflow {
    let norm = Operator::new("norm", Some(srv)).unwrap();
    let wf = Workflow::new(Some(srv)).unwrap();
    wf.add_operator(&norm).unwrap();
    wf.set_input_name(input, &norm, 0).unwrap();
    wf.set_output_name("norm", &norm, 0).unwrap();
    wf
}

#[test]
fn connect_with_links_same_named_pins() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let left = reader(&srv);
    let right = reducer(&srv, "field");
    right.connect_with(&left).unwrap();

    assert_eq!(right.input_names().unwrap(), vec!["data_sources"]);
    let mut outputs = right.output_names().unwrap();
    outputs.sort();
    assert_eq!(outputs, vec!["field", "norm"]);

    let ds = DataSources::new(Some("/models/beam.rst"), Some(&srv)).unwrap();
    right.connect("data_sources", &ds).unwrap();
    let out: Field = right.get_output("norm").unwrap();
    assert!(approx_eq(&out.data().unwrap(), &DISPLACEMENT_NORMS));
    assert!(right.connect("field", 1.0).unwrap_err().is_not_found());
}

#[test]
fn connect_with_map_renames() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);
    let left = reader(&srv);
    let right = reducer(&srv, "vectors");
    right.connect_with_map(&left, Some(&[("field", "vectors")])).unwrap();

    let ds = DataSources::new(Some("/models/beam.rst"), Some(&srv)).unwrap();
    right.connect("data_sources", &ds).unwrap();
    let out: Field = right.get_output("norm").unwrap();
    assert!(approx_eq(&out.data().unwrap(), &DISPLACEMENT_NORMS));

    let other = reducer(&srv, "vectors");
    let err = other.connect_with_map(&left, Some(&[("nothing", "vectors")])).unwrap_err();
    assert!(err.is_not_found(), "{err}");
    assert!(matches!(other.connect_with(&other), Err(DpfError::InvalidArgument(_))));
}

#[test]
fn recorded_workflows_follow_ownership() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);

    let observed = reader(&srv);
    let id = observed.record(Some("observed"), false).unwrap();
    let again = Workflow::get_recorded(id, Some(&srv)).unwrap();
    assert_eq!(again.operator_names().unwrap(), vec!["displacement"]);
    drop(again);
    drop(observed);
    assert!(Workflow::get_recorded(id, Some(&srv)).unwrap_err().is_not_found());

    let owned = reader(&srv);
    let id = owned.record(Some("owned"), true).unwrap();
    drop(owned);
    let back = Workflow::get_recorded(id, Some(&srv)).unwrap();
    assert_eq!(back.input_names().unwrap(), vec!["data_sources"]);

    assert!(Workflow::get_recorded(9_999, Some(&srv)).unwrap_err().is_not_found());
}

#[test]
fn remote_copy_lands_on_the_target_engine() {
    let (engine, srv) = engine_and_server();
    let (target_engine, target) = engine_and_server();
    register_result_operators(&engine);
    register_result_operators(&target_engine);

    let left = reader(&srv);
    let wf = reducer(&srv, "field");
    wf.connect_with(&left).unwrap();

    let copy = wf.remote_copy(&target).unwrap();
    let mut names = copy.operator_names().unwrap();
    names.sort();
    assert_eq!(names, vec!["displacement", "norm"]);

    let ds = DataSources::new(Some("/models/beam.rst"), Some(&target)).unwrap();
    copy.connect("data_sources", &ds).unwrap();
    let out: Field = copy.get_output("norm").unwrap();
    assert!(approx_eq(&out.data().unwrap(), &DISPLACEMENT_NORMS));
}

#[test]
fn recorded_workflows_resolve_by_identifier() {
    let (engine, srv) = engine_and_server();
    register_result_operators(&engine);

    let first = reader(&srv);
    first.record(Some("reader"), true).unwrap();
    let second = reducer(&srv, "field");
    second.record(Some("reader"), true).unwrap();
    let latest = Workflow::get_recorded_by_identifier("reader", Some(&srv)).unwrap();
    assert_eq!(latest.operator_names().unwrap(), vec!["norm"]);
    assert!(Workflow::get_recorded_by_identifier("nobody", Some(&srv)).unwrap_err().is_not_found());

    // expired observed records leave the registry on the next registry call
    let observed = reader(&srv);
    observed.record(Some("short-lived"), false).unwrap();
    assert_eq!(engine.recorded_count(), 3);
    drop(observed);
    assert!(Workflow::get_recorded_by_identifier("short-lived", Some(&srv)).unwrap_err().is_not_found());
    assert_eq!(engine.recorded_count(), 2);
}
