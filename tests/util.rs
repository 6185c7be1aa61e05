#![allow(dead_code)]
use dpf_client::codec::Payload;
use dpf_client::config::ServerConfig;
use dpf_client::data::FieldValueKind;
use dpf_client::dpf_error::EngineFailure;
use dpf_client::operator::{PinSpec, SpecificationData};
use dpf_client::prelude::*;
use dpf_client::transport::loopback::{EngineObject, EvalContext, FieldData};

/// Fresh engine plus an RPC client with default settings.
pub fn engine_and_server() -> (LoopbackEngine, Server) {
    let engine = LoopbackEngine::new();
    let server = engine.connect_default().unwrap();
    (engine, server)
}

/// Fresh engine plus an RPC client streaming in `chunk_bytes` chunks and
/// reporting progress above `threshold` elements.
pub fn engine_with_chunks(chunk_bytes: usize, threshold: usize) -> (LoopbackEngine, Server) {
    let engine = LoopbackEngine::new();
    let config = ServerConfig::default()
        .with_streaming_buffer_size(chunk_bytes)
        .unwrap()
        .with_progress_threshold(threshold);
    let server = engine.connect(config).unwrap();
    (engine, server)
}

/// Displacements produced by the `displacement` operator, node-major.
pub const DISPLACEMENTS: [f64; 9] = [3.0, 4.0, 0.0, 0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
pub const DISPLACEMENT_NORMS: [f64; 3] = [5.0, 1.0, 3.0];

/// Registers `displacement` (data sources on pin 4, nodal 3-vector on
/// output 0) and `norm` (field on pin 0, scalar field on output 0).
pub fn register_result_operators(engine: &LoopbackEngine) {
    let spec = SpecificationData::new("Nodal displacements read from the result file.")
        .with_input(4, PinSpec::new("data_sources", &["data_sources"], "result files"))
        .with_output(0, PinSpec::new("fields_container", &["field"], "displacements"));
    engine.register_operator("displacement", spec, |ctx: &mut EvalContext<'_>| {
        let sources = ctx.object(4)?;
        let n_files = match &*sources.lock() {
            EngineObject::DataSources(entries) => entries.len(),
            other => return Err(EngineFailure::type_mismatch(format!("pin 4 holds {}", other.kind()))),
        };
        if n_files == 0 {
            return Err(EngineFailure::invalid("no result file"));
        }
        let def = FieldDefinitionData::new(Location::Nodal, Dimensionality::vector(3))
            .with_name("displacement")
            .with_unit("m");
        let field = FieldData::with_values(FieldValueKind::Double, def, vec![1, 2, 3], Payload::Double(DISPLACEMENTS.to_vec()));
        ctx.set_output(0, EngineObject::Field(field));
        Ok(())
    });

    let spec = SpecificationData::new("Euclidean norm of each entity.")
        .with_input(0, PinSpec::new("field", &["field"], "field to reduce"))
        .with_output(0, PinSpec::new("field", &["field"], "scalar norms"));
    engine.register_operator("norm", spec, |ctx: &mut EvalContext<'_>| {
        let f = ctx.field(0)?;
        let nc = f.n_components().max(1);
        let values = f
            .doubles()
            .ok_or_else(|| EngineFailure::type_mismatch("norm needs a double field"))?;
        let norms: Vec<f64> = values
            .chunks(nc)
            .map(|c| c.iter().map(|v| v * v).sum::<f64>().sqrt())
            .collect();
        let def = FieldDefinitionData::new(f.definition.location.clone(), Dimensionality::scalar())
            .with_name(format!("norm({})", f.definition.name))
            .with_unit(f.definition.unit.clone());
        ctx.set_output(0, EngineObject::Field(FieldData::with_values(FieldValueKind::Double, def, f.ids(), Payload::Double(norms))));
        Ok(())
    });
}

/// Registers `fail`, which always reports an engine error.
pub fn register_failing_operator(engine: &LoopbackEngine) {
    let spec = SpecificationData::new("Always fails.")
        .with_input(0, PinSpec::new("any", &["any"], "ignored").optional())
        .with_output(0, PinSpec::new("any", &["any"], "never produced"));
    engine.register_operator("fail", spec, |_ctx: &mut EvalContext<'_>| {
        Err(EngineFailure::generic("result file is corrupt"))
    });
}

/// Scoping with `ids` on `server`.
pub fn scoping(server: &Server, ids: &[i32]) -> Scoping {
    Scoping::from_ids(ids, Location::Nodal, Some(server)).unwrap()
}

/// Scalar nodal field over `ids` holding `values`.
pub fn scalar_field(server: &Server, ids: &[i32], values: &[f64]) -> Field {
    let f = Field::scalar(ids.len(), Location::Nodal, Some(server)).unwrap();
    f.set_scoping(&scoping(server, ids)).unwrap();
    f.set_data(values).unwrap();
    f
}

pub fn approx_eq(a: &[f64], b: &[f64]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() < 1e-12)
}
