//! Operator catalog, lazy graph evaluation and workflow text.
//!
//! An evaluation pass walks the graph upstream from the requested operator.
//! Each operator runs at most once per pass; a back edge is reported as a
//! cycle instead of recursing forever. Locks are held only while bindings
//! are copied out, never across an upstream evaluation.

use super::store::{
    Binding, ConfigData, EngineObject, EngineResult, EngineValue, ExposedPin, FieldData, OperatorData, Shared,
    WorkflowData, shared, wrong_kind,
};
use crate::dpf_error::EngineFailure;
use crate::operator::OperatorStatus;
use crate::operator::config::ConfigOption;
use crate::operator::specification::{PinSpec, SpecificationData};
use crate::transport::call::Primitive;
use log::{debug, trace};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

pub type EvalFn = dyn Fn(&mut EvalContext<'_>) -> EngineResult<()> + Send + Sync;

/// Catalog entry: specification, default config and body.
pub struct OperatorDef {
    pub name: String,
    pub spec: SpecificationData,
    pub defaults: Vec<ConfigOption>,
    pub eval: Arc<EvalFn>,
}

impl fmt::Debug for OperatorDef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperatorDef")
            .field("name", &self.name)
            .field("defaults", &self.defaults)
            .finish_non_exhaustive()
    }
}

impl OperatorDef {
    pub fn new<F>(name: impl Into<String>, spec: SpecificationData, eval: F) -> Self
    where
        F: Fn(&mut EvalContext<'_>) -> EngineResult<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            spec,
            defaults: Vec::new(),
            eval: Arc::new(eval),
        }
    }

    pub fn with_default(mut self, name: &str, value: impl Into<Primitive>, document: &str) -> Self {
        self.defaults.push(ConfigOption {
            name: name.to_string(),
            value: value.into(),
            document: document.to_string(),
        });
        self
    }
}

/// `forward`: every connected input reappears on the output of the same pin.
fn forward_def() -> OperatorDef {
    let spec = SpecificationData::new("Forwards its inputs unchanged.")
        .with_input(0, PinSpec::new("any", &["any"], "values to forward").ellipsis())
        .with_output(0, PinSpec::new("any", &["any"], "forwarded values").ellipsis())
        .with_property("category", "utility");
    OperatorDef::new("forward", spec, |ctx| {
        let inputs: Vec<(i32, EngineValue)> = ctx.inputs().map(|(p, v)| (p, v.clone())).collect();
        for (pin, v) in inputs {
            ctx.set_output(pin, v);
        }
        Ok(())
    })
}

/// Operators an engine can instantiate, by name.
#[derive(Debug)]
pub struct Catalog {
    defs: RwLock<BTreeMap<String, Arc<OperatorDef>>>,
}

impl Catalog {
    pub fn with_builtins() -> Self {
        let c = Self {
            defs: RwLock::new(BTreeMap::new()),
        };
        c.register(forward_def());
        c
    }

    /// Adds or replaces `def`.
    pub fn register(&self, def: OperatorDef) {
        debug!("catalog: register `{}`", def.name);
        self.defs.write().insert(def.name.clone(), Arc::new(def));
    }

    pub fn get(&self, name: &str) -> EngineResult<Arc<OperatorDef>> {
        self.defs
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| EngineFailure::not_found(format!("operator `{name}` not found in catalog")))
    }

    pub fn names(&self) -> Vec<String> {
        self.defs.read().keys().cloned().collect()
    }
}

/// Inputs, configuration and outputs of one operator run.
pub struct EvalContext<'a> {
    operator: &'a str,
    inputs: BTreeMap<i32, EngineValue>,
    config: Vec<ConfigOption>,
    outputs: BTreeMap<i32, EngineValue>,
}

impl<'a> EvalContext<'a> {
    fn new(operator: &'a str, inputs: BTreeMap<i32, EngineValue>, config: Vec<ConfigOption>) -> Self {
        Self {
            operator,
            inputs,
            config,
            outputs: BTreeMap::new(),
        }
    }

    pub fn operator(&self) -> &str {
        self.operator
    }

    pub fn inputs(&self) -> impl Iterator<Item = (i32, &EngineValue)> {
        self.inputs.iter().map(|(&p, v)| (p, v))
    }

    pub fn input(&self, pin: i32) -> Option<&EngineValue> {
        self.inputs.get(&pin)
    }

    /// # Errors
    /// `InvalidArgument` when nothing is connected to `pin`.
    pub fn require(&self, pin: i32) -> EngineResult<&EngineValue> {
        self.input(pin)
            .ok_or_else(|| EngineFailure::invalid(format!("input pin {pin} is not connected")))
    }

    pub fn primitive(&self, pin: i32) -> EngineResult<&Primitive> {
        self.require(pin)?
            .primitive()
            .ok_or_else(|| EngineFailure::type_mismatch(format!("pin {pin} holds an object")))
    }

    pub fn double(&self, pin: i32) -> EngineResult<f64> {
        match self.primitive(pin)? {
            Primitive::Double(v) => Ok(*v),
            Primitive::Int(v) => Ok(f64::from(*v)),
            other => Err(EngineFailure::type_mismatch(format!("pin {pin} holds {:?}", other.value_kind()))),
        }
    }

    pub fn object(&self, pin: i32) -> EngineResult<Shared> {
        self.require(pin)?
            .object()
            .cloned()
            .ok_or_else(|| EngineFailure::type_mismatch(format!("pin {pin} holds a primitive")))
    }

    /// Copy of the field connected to `pin`.
    pub fn field(&self, pin: i32) -> EngineResult<FieldData> {
        let obj = self.object(pin)?;
        let guard = obj.lock();
        match &*guard {
            EngineObject::Field(f) => Ok(f.clone()),
            other => Err(wrong_kind("a field", other.kind())),
        }
    }

    pub fn config(&self, name: &str) -> Option<&Primitive> {
        self.config.iter().find(|o| o.name == name).map(|o| &o.value)
    }

    pub fn config_bool(&self, name: &str) -> bool {
        matches!(self.config(name), Some(Primitive::Bool(true)))
    }

    pub fn set_output(&mut self, pin: i32, value: impl Into<EngineValue>) {
        self.outputs.insert(pin, value.into());
    }
}

fn operator_key(op: &Shared) -> usize {
    Arc::as_ptr(op) as usize
}

/// One evaluation pass.
#[derive(Default)]
pub struct Evaluator {
    memo: HashMap<usize, BTreeMap<i32, EngineValue>>,
    visiting: HashSet<usize>,
}

impl Evaluator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Outputs of `op`, evaluating its upstream graph first.
    pub fn outputs(&mut self, op: &Shared) -> EngineResult<BTreeMap<i32, EngineValue>> {
        let key = operator_key(op);
        if let Some(out) = self.memo.get(&key) {
            return Ok(out.clone());
        }
        if !self.visiting.insert(key) {
            return Err(EngineFailure::generic("operator graph contains a cycle"));
        }
        let snapshot = {
            let mut guard = op.lock();
            match &mut *guard {
                EngineObject::Operator(o) => {
                    o.status = OperatorStatus::Running;
                    Ok((o.name.clone(), o.def.clone(), o.inputs.clone(), o.config.clone()))
                }
                other => Err(wrong_kind("an operator", other.kind())),
            }
        };
        let result = snapshot.and_then(|(name, def, inputs, config)| {
            trace!("evaluate `{name}`");
            self.run(&name, &def.eval, inputs, &config).map_err(|mut e| {
                if e.template.is_none() {
                    e.template = Some(name.clone());
                }
                e
            })
        });
        self.visiting.remove(&key);
        if let EngineObject::Operator(o) = &mut *op.lock() {
            match &result {
                Ok(out) => {
                    o.status = OperatorStatus::Succeeded;
                    o.outputs = out.clone();
                }
                Err(_) => o.status = OperatorStatus::Failed,
            }
        }
        let out = result?;
        self.memo.insert(key, out.clone());
        Ok(out)
    }

    fn run(
        &mut self,
        name: &str,
        eval: &Arc<EvalFn>,
        bindings: BTreeMap<i32, Binding>,
        config: &Shared,
    ) -> EngineResult<BTreeMap<i32, EngineValue>> {
        let mut inputs = BTreeMap::new();
        for (pin, binding) in bindings {
            let value = match binding {
                Binding::Value(v) => v,
                Binding::Output { op, pin: source } => {
                    let mut upstream = self.outputs(&op)?;
                    upstream.remove(&source).ok_or_else(|| {
                        EngineFailure::generic(format!("upstream output pin {source} feeding pin {pin} is empty"))
                    })?
                }
            };
            inputs.insert(pin, value);
        }
        let options = match &*config.lock() {
            EngineObject::OperatorConfig(c) => c.options.clone(),
            _ => Vec::new(),
        };
        let mut ctx = EvalContext::new(name, inputs, options);
        eval(&mut ctx)?;
        Ok(ctx.outputs)
    }
}

// --- workflow text ---

#[derive(Debug, Serialize, Deserialize)]
enum InputText {
    Primitive(Primitive),
    Output { op: usize, pin: i32 },
}

#[derive(Debug, Serialize, Deserialize)]
struct OperatorText {
    name: String,
    config: Vec<ConfigOption>,
    inputs: Vec<(i32, InputText)>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PinText {
    name: String,
    op: usize,
    pin: i32,
}

#[derive(Debug, Serialize, Deserialize)]
struct WorkflowText {
    format: u32,
    operators: Vec<OperatorText>,
    inputs: Vec<PinText>,
    outputs: Vec<PinText>,
}

const WORKFLOW_TEXT_FORMAT: u32 = 1;

fn position(ops: &[Shared], op: &Shared) -> Option<usize> {
    ops.iter().position(|o| Arc::ptr_eq(o, op))
}

fn pins_text(ops: &[Shared], pins: &[ExposedPin]) -> Vec<PinText> {
    pins.iter()
        .filter_map(|p| {
            position(ops, &p.op).map(|op| PinText {
                name: p.name.clone(),
                op,
                pin: p.pin,
            })
        })
        .collect()
}

/// JSON text of `wf`. Object-valued inputs are not carried.
pub fn workflow_to_text(wf: &WorkflowData) -> EngineResult<String> {
    let mut operators = Vec::with_capacity(wf.operators.len());
    for op in &wf.operators {
        let (name, bindings, config) = match &*op.lock() {
            EngineObject::Operator(o) => (o.name.clone(), o.inputs.clone(), o.config.clone()),
            other => return Err(wrong_kind("an operator", other.kind())),
        };
        let config = match &*config.lock() {
            EngineObject::OperatorConfig(c) => c.options.clone(),
            _ => Vec::new(),
        };
        let inputs = bindings
            .into_iter()
            .filter_map(|(pin, b)| match b {
                Binding::Value(EngineValue::Primitive(p)) => Some((pin, InputText::Primitive(p))),
                Binding::Value(EngineValue::Object(_)) => None,
                Binding::Output { op, pin: source } => {
                    position(&wf.operators, &op).map(|i| (pin, InputText::Output { op: i, pin: source }))
                }
            })
            .collect();
        operators.push(OperatorText { name, config, inputs });
    }
    let text = WorkflowText {
        format: WORKFLOW_TEXT_FORMAT,
        operators,
        inputs: pins_text(&wf.operators, &wf.inputs),
        outputs: pins_text(&wf.operators, &wf.outputs),
    };
    serde_json::to_string_pretty(&text).map_err(|e| EngineFailure::generic(format!("workflow text: {e}")))
}

/// Rebuild a workflow from [`workflow_to_text`] output.
///
/// # Errors
/// `InvalidArgument` for malformed text, `NotFound` for an operator this
/// catalog does not know.
pub fn workflow_from_text(text: &str, catalog: &Catalog) -> EngineResult<WorkflowData> {
    let parsed: WorkflowText =
        serde_json::from_str(text).map_err(|e| EngineFailure::invalid(format!("malformed workflow text: {e}")))?;
    if parsed.format != WORKFLOW_TEXT_FORMAT {
        return Err(EngineFailure::invalid(format!("unsupported workflow text format {}", parsed.format)));
    }
    let mut ops = Vec::with_capacity(parsed.operators.len());
    for op in &parsed.operators {
        let def = catalog.get(&op.name)?;
        let config = shared(EngineObject::OperatorConfig(ConfigData {
            options: op.config.clone(),
        }));
        ops.push(shared(EngineObject::Operator(OperatorData::new(def, Some(config)))));
    }
    let lookup = |i: usize| {
        ops.get(i)
            .cloned()
            .ok_or_else(|| EngineFailure::invalid(format!("workflow text references operator {i}")))
    };
    for (op, text) in ops.iter().zip(parsed.operators) {
        let mut bindings = BTreeMap::new();
        for (pin, input) in text.inputs {
            let b = match input {
                InputText::Primitive(p) => Binding::Value(EngineValue::Primitive(p)),
                InputText::Output { op: i, pin: source } => Binding::Output {
                    op: lookup(i)?,
                    pin: source,
                },
            };
            bindings.insert(pin, b);
        }
        if let EngineObject::Operator(o) = &mut *op.lock() {
            o.inputs = bindings;
        }
    }
    let mut wf = WorkflowData::default();
    for p in parsed.inputs {
        wf.set_input(ExposedPin {
            name: p.name,
            op: lookup(p.op)?,
            pin: p.pin,
        });
    }
    for p in parsed.outputs {
        wf.set_output(ExposedPin {
            name: p.name,
            op: lookup(p.op)?,
            pin: p.pin,
        });
    }
    wf.operators = ops;
    Ok(wf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dpf_error::ErrorCode;

    fn operator(catalog: &Catalog, name: &str) -> Shared {
        shared(EngineObject::Operator(OperatorData::new(catalog.get(name).unwrap(), None)))
    }

    fn bind(op: &Shared, pin: i32, b: Binding) {
        if let EngineObject::Operator(o) = &mut *op.lock() {
            o.inputs.insert(pin, b);
        }
    }

    #[test]
    fn chained_forwards_evaluate_lazily() {
        let catalog = Catalog::with_builtins();
        let a = operator(&catalog, "forward");
        let b = operator(&catalog, "forward");
        bind(&a, 0, Binding::Value(Primitive::Int(4).into()));
        bind(&b, 0, Binding::Output { op: a.clone(), pin: 0 });
        let out = Evaluator::new().outputs(&b).unwrap();
        assert_eq!(out[&0].primitive(), Some(&Primitive::Int(4)));
        match &*a.lock() {
            EngineObject::Operator(o) => assert_eq!(o.status, OperatorStatus::Succeeded),
            _ => unreachable!(),
        }
    }

    #[test]
    fn cycles_are_reported() {
        let catalog = Catalog::with_builtins();
        let a = operator(&catalog, "forward");
        let b = operator(&catalog, "forward");
        bind(&a, 0, Binding::Output { op: b.clone(), pin: 0 });
        bind(&b, 0, Binding::Output { op: a.clone(), pin: 0 });
        let err = Evaluator::new().outputs(&a).unwrap_err();
        assert!(err.message.contains("cycle"));
    }

    #[test]
    fn failures_name_the_operator() {
        let catalog = Catalog::with_builtins();
        catalog.register(OperatorDef::new("boom", SpecificationData::new("fails"), |_| {
            Err(EngineFailure::generic("exploded"))
        }));
        let a = operator(&catalog, "boom");
        let b = operator(&catalog, "forward");
        bind(&b, 0, Binding::Output { op: a, pin: 0 });
        let err = Evaluator::new().outputs(&b).unwrap_err();
        assert_eq!(err.template.as_deref(), Some("boom"));
        assert_eq!(catalog.get("nope").unwrap_err().code, ErrorCode::NotFound);
    }

    #[test]
    fn text_keeps_structure() {
        let catalog = Catalog::with_builtins();
        let a = operator(&catalog, "forward");
        let b = operator(&catalog, "forward");
        bind(&a, 1, Binding::Value(Primitive::Double(2.5).into()));
        bind(&b, 0, Binding::Output { op: a.clone(), pin: 1 });
        let mut wf = WorkflowData::default();
        wf.add_operator(a.clone());
        wf.add_operator(b.clone());
        wf.set_input(ExposedPin {
            name: "in".into(),
            op: a,
            pin: 1,
        });
        wf.set_output(ExposedPin {
            name: "out".into(),
            op: b,
            pin: 0,
        });
        let text = workflow_to_text(&wf).unwrap();
        let back = workflow_from_text(&text, &catalog).unwrap();
        assert_eq!(back.operators.len(), 2);
        let out = back.output("out").unwrap().op.clone();
        let values = Evaluator::new().outputs(&out).unwrap();
        assert_eq!(values[&0].primitive(), Some(&Primitive::Double(2.5)));
        assert!(workflow_from_text("{", &catalog).is_err());
    }
}
