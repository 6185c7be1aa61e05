//! Operators, their configuration, workflows and sessions.

use super::{needs_stream, require_kind, with, wrong_stream};
use crate::codec::Payload;
use crate::dpf_error::EngineFailure;
use crate::operator::OperatorStatus;
use crate::session::ProgressEvent;
use crate::transport::call::{
    Call, EntityKind, ObjectId, OperatorCall, OperatorConfigCall, PinValue, Primitive, Reply, SessionCall, SpecificationCall,
    Value, WorkflowCall,
};
use crate::transport::loopback::graph::{Evaluator, workflow_from_text, workflow_to_text};
use crate::transport::loopback::store::{
    Binding, ConfigData, EngineObject, EngineResult, EngineValue, ExposedPin, OperatorData, SessionHub, SessionState,
    Shared, WorkflowData, shared,
};
use crate::transport::loopback::{EngineCore, Recorded, engine_at, prune_records};
use log::{debug, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::Ordering;

fn is_operator(k: EntityKind) -> bool {
    k == EntityKind::Operator
}

fn is_workflow(k: EntityKind) -> bool {
    k == EntityKind::Workflow
}

/// The single string of a large-string upload.
fn large_string(payload: Payload) -> EngineResult<String> {
    match payload {
        Payload::Strings(mut v) if v.len() == 1 => Ok(v.remove(0)),
        Payload::Bytes(b) => String::from_utf8(b).map_err(|e| EngineFailure::invalid(format!("string is not UTF-8: {e}"))),
        other => Err(EngineFailure::type_mismatch(format!(
            "expected one string, got {} {:?} values",
            other.len(),
            other.kind()
        ))),
    }
}

fn exposed(pins: &[ExposedPin], name: &str, side: &str) -> EngineResult<(Shared, i32)> {
    pins.iter()
        .find(|p| p.name == name)
        .map(|p| (p.op.clone(), p.pin))
        .ok_or_else(|| EngineFailure::not_found(format!("workflow has no {side} named `{name}`")))
}

impl EngineCore {
    /// Binding of `value` for an input of `target`.
    fn binding(&self, target: &Shared, value: PinValue) -> EngineResult<Binding> {
        match value {
            PinValue::Primitive(p) => Ok(Binding::Value(p.into())),
            PinValue::Object(id) => Ok(Binding::Value(EngineValue::Object(self.obj(id)?))),
            PinValue::Output { op, pin } => {
                let source = self.obj(op)?;
                require_kind(&source, is_operator, "an operator")?;
                if Arc::ptr_eq(&source, target) {
                    return Err(EngineFailure::invalid("an operator cannot feed its own input"));
                }
                Ok(Binding::Output { op: source, pin })
            }
        }
    }

    fn bind_input(&self, op: &Shared, pin: i32, value: PinValue) -> EngineResult<Reply> {
        let binding = self.binding(op, value)?;
        with!(op.clone(), Operator, "an operator", |o| {
            if !o.def.spec.accepts_input(pin) {
                return Err(EngineFailure::invalid(format!("operator `{}` has no input pin {pin}", o.name)));
            }
            o.inputs.insert(pin, binding);
            o.status = OperatorStatus::NotRun;
            Ok(Reply::Unit)
        })
    }

    pub(in crate::transport::loopback) fn operator(&self, call: OperatorCall) -> EngineResult<Reply> {
        match call {
            OperatorCall::New { name, config } => {
                let def = self.catalog.get(&name)?;
                let config = match config {
                    Some(id) => {
                        let c = self.obj(id)?;
                        require_kind(&c, |k| k == EntityKind::OperatorConfig, "an operator config")?;
                        Some(c)
                    }
                    None => None,
                };
                debug!("loopback {}: new operator `{name}`", self.address);
                Ok(self.register(EngineObject::Operator(OperatorData::new(def, config))))
            }
            OperatorCall::Name { obj } => {
                with!(self.obj(obj)?, Operator, "an operator", |o| Ok(Reply::Text(o.name.clone())))
            }
            OperatorCall::Connect { obj, pin, value } => self.bind_input(&self.obj(obj)?, pin, value),
            OperatorCall::Disconnect { obj, pin } => with!(self.obj(obj)?, Operator, "an operator", |o| {
                o.inputs.remove(&pin);
                o.status = OperatorStatus::NotRun;
                Ok(Reply::Unit)
            }),
            OperatorCall::Run { obj } => {
                let op = self.obj(obj)?;
                Evaluator::new().outputs(&op)?;
                Ok(Reply::Unit)
            }
            OperatorCall::Status { obj } => {
                with!(self.obj(obj)?, Operator, "an operator", |o| Ok(Reply::Status(o.status)))
            }
            OperatorCall::GetOutput { obj, pin, kind } => {
                let op = self.obj(obj)?;
                let value = Evaluator::new()
                    .outputs(&op)?
                    .remove(&pin)
                    .ok_or_else(|| EngineFailure::not_found(format!("output pin {pin} is empty")))?;
                Ok(Reply::Value(self.typed(value, kind)?))
            }
            OperatorCall::HasOutputWhenEvaluated { obj, pin } => {
                let op = self.obj(obj)?;
                Ok(Reply::Bool(Evaluator::new().outputs(&op)?.contains_key(&pin)))
            }
            OperatorCall::Config { obj } => {
                let config = with!(self.obj(obj)?, Operator, "an operator", |o| Ok(o.config.clone()))?;
                Ok(self.register_shared(config))
            }
            OperatorCall::SetConfig { obj, config } => {
                let config = self.obj(config)?;
                require_kind(&config, |k| k == EntityKind::OperatorConfig, "an operator config")?;
                with!(self.obj(obj)?, Operator, "an operator", |o| {
                    o.config = config;
                    o.status = OperatorStatus::NotRun;
                    Ok(Reply::Unit)
                })
            }
            OperatorCall::Derivative { obj } => {
                let derivative = with!(self.obj(obj)?, Operator, "an operator", |o| {
                    o.derivative
                        .clone()
                        .ok_or_else(|| EngineFailure::not_found(format!("operator `{}` has no derivative", o.name)))
                })?;
                Ok(self.register_shared(derivative))
            }
            OperatorCall::SetDerivative { obj, derivative } => {
                let op = self.obj(obj)?;
                let derivative = self.obj(derivative)?;
                if Arc::ptr_eq(&op, &derivative) {
                    return Err(EngineFailure::invalid("an operator cannot be its own derivative"));
                }
                let inputs = with!(op.clone(), Operator, "an operator", |o| Ok(o.inputs.clone()))?;
                with!(derivative.clone(), Operator, "a derivative operator", |d| {
                    if d.inputs.is_empty() {
                        d.inputs = inputs;
                    }
                    Ok(())
                })?;
                with!(op, Operator, "an operator", |o| {
                    o.derivative = Some(derivative);
                    Ok(Reply::Unit)
                })
            }
            call @ OperatorCall::ConnectLargeString { .. } => Err(needs_stream(&Call::Operator(call))),
        }
    }

    pub(in crate::transport::loopback) fn operator_upload(&self, call: OperatorCall, payload: Payload) -> EngineResult<Reply> {
        match call {
            OperatorCall::ConnectLargeString { obj, pin } => {
                let s = large_string(payload)?;
                self.bind_input(&self.obj(obj)?, pin, PinValue::Primitive(Primitive::String(s)))
            }
            other => Err(wrong_stream(&Call::Operator(other))),
        }
    }

    pub(in crate::transport::loopback) fn operator_config(&self, call: OperatorConfigCall) -> EngineResult<Reply> {
        match call {
            OperatorConfigCall::New { operator } => {
                let options = match operator {
                    Some(name) => self.catalog.get(&name)?.defaults.clone(),
                    None => Vec::new(),
                };
                Ok(self.register(EngineObject::OperatorConfig(ConfigData { options })))
            }
            OperatorConfigCall::Set { obj, name, value } => {
                with!(self.obj(obj)?, OperatorConfig, "an operator config", |c| {
                    c.set(&name, value);
                    Ok(Reply::Unit)
                })
            }
            OperatorConfigCall::Get { obj, name } => {
                with!(self.obj(obj)?, OperatorConfig, "an operator config", |c| {
                    c.get(&name)
                        .map(|o| Reply::Value(Value::Primitive(o.value.clone())))
                        .ok_or_else(|| EngineFailure::not_found(format!("no config option `{name}`")))
                })
            }
            OperatorConfigCall::Options { obj } => {
                with!(self.obj(obj)?, OperatorConfig, "an operator config", |c| {
                    Ok(Reply::ConfigOptions(c.options.clone()))
                })
            }
        }
    }

    pub(in crate::transport::loopback) fn specification(&self, call: SpecificationCall) -> EngineResult<Reply> {
        match call {
            SpecificationCall::New { operator } => {
                let spec = self.catalog.get(&operator)?.spec.clone();
                Ok(self.register(EngineObject::Specification(spec)))
            }
            SpecificationCall::Describe { obj } => {
                with!(self.obj(obj)?, Specification, "an operator specification", |s| {
                    Ok(Reply::Specification(s.clone()))
                })
            }
        }
    }

    // --- workflows ---

    fn workflow_snapshot(&self, obj: ObjectId) -> EngineResult<WorkflowData> {
        with!(self.obj(obj)?, Workflow, "a workflow", |w| Ok(w.clone()))
    }

    fn expose(&self, obj: ObjectId, name: String, op: ObjectId, pin: i32, output: bool) -> EngineResult<Reply> {
        let op = self.obj(op)?;
        require_kind(&op, is_operator, "an operator")?;
        with!(self.obj(obj)?, Workflow, "a workflow", |w| {
            w.add_operator(op.clone());
            let pin = ExposedPin { name, op, pin };
            if output {
                w.set_output(pin);
            } else {
                w.set_input(pin);
            }
            Ok(Reply::Unit)
        })
    }

    fn connect_exposed(&self, obj: ObjectId, name: &str, value: PinValue) -> EngineResult<Reply> {
        let (op, pin) = exposed(&self.workflow_snapshot(obj)?.inputs, name, "input")?;
        self.bind_input(&op, pin, value)
    }

    /// `this` absorbs `left`: `(left output, this input)` pairs become
    /// connections and the consumed inputs disappear.
    fn connect_with(&self, this: ObjectId, left: ObjectId, map: Option<Vec<(String, String)>>) -> EngineResult<Reply> {
        let this_obj = self.obj(this)?;
        let left_obj = self.obj(left)?;
        if Arc::ptr_eq(&this_obj, &left_obj) {
            return Err(EngineFailure::invalid("a workflow cannot be connected with itself"));
        }
        let this_wf = self.workflow_snapshot(this)?;
        let left_wf = self.workflow_snapshot(left)?;
        let pairs = match map {
            Some(m) => m,
            None => left_wf
                .outputs
                .iter()
                .filter(|o| this_wf.input(&o.name).is_some())
                .map(|o| (o.name.clone(), o.name.clone()))
                .collect(),
        };
        let mut links = Vec::with_capacity(pairs.len());
        for (out_name, in_name) in &pairs {
            let (source, source_pin) = exposed(&left_wf.outputs, out_name, "output")?;
            let (target, target_pin) = exposed(&this_wf.inputs, in_name, "input")?;
            if Arc::ptr_eq(&source, &target) {
                return Err(EngineFailure::invalid(format!("`{out_name}` and `{in_name}` are pins of one operator")));
            }
            links.push((target, target_pin, source, source_pin));
        }
        for (target, pin, source, source_pin) in links {
            with!(target, Operator, "an operator", |o| {
                o.inputs.insert(pin, Binding::Output { op: source, pin: source_pin });
                o.status = OperatorStatus::NotRun;
                Ok(())
            })?;
        }
        let consumed: HashSet<&str> = pairs.iter().map(|(_, i)| i.as_str()).collect();
        with!(this_obj, Workflow, "a workflow", |w| {
            w.inputs.retain(|p| !consumed.contains(p.name.as_str()));
            for op in left_wf.operators {
                w.add_operator(op);
            }
            for p in left_wf.inputs {
                if w.input(&p.name).is_none() {
                    w.set_input(p);
                }
            }
            for p in left_wf.outputs {
                if w.output(&p.name).is_none() {
                    w.set_output(p);
                }
            }
            Ok(Reply::Unit)
        })
    }

    pub(in crate::transport::loopback) fn workflow(&self, call: WorkflowCall) -> EngineResult<Reply> {
        match call {
            WorkflowCall::New => Ok(self.register(EngineObject::Workflow(WorkflowData::default()))),
            WorkflowCall::AddOperator { obj, op } => {
                let op = self.obj(op)?;
                require_kind(&op, is_operator, "an operator")?;
                with!(self.obj(obj)?, Workflow, "a workflow", |w| {
                    w.add_operator(op);
                    Ok(Reply::Unit)
                })
            }
            WorkflowCall::OperatorNames { obj } => {
                let names = self
                    .workflow_snapshot(obj)?
                    .operators
                    .iter()
                    .map(|op| match &*op.lock() {
                        EngineObject::Operator(o) => o.name.clone(),
                        other => other.kind().to_string(),
                    })
                    .collect();
                Ok(Reply::Strings(names))
            }
            WorkflowCall::SetInputName { obj, name, op, pin } => self.expose(obj, name, op, pin, false),
            WorkflowCall::SetOutputName { obj, name, op, pin } => self.expose(obj, name, op, pin, true),
            WorkflowCall::InputNames { obj } => {
                with!(self.obj(obj)?, Workflow, "a workflow", |w| {
                    Ok(Reply::Strings(w.inputs.iter().map(|p| p.name.clone()).collect()))
                })
            }
            WorkflowCall::OutputNames { obj } => {
                with!(self.obj(obj)?, Workflow, "a workflow", |w| {
                    Ok(Reply::Strings(w.outputs.iter().map(|p| p.name.clone()).collect()))
                })
            }
            WorkflowCall::Connect { obj, name, value } => self.connect_exposed(obj, &name, value),
            WorkflowCall::GetOutput { obj, name, kind } => {
                let (op, pin) = exposed(&self.workflow_snapshot(obj)?.outputs, &name, "output")?;
                let value = Evaluator::new()
                    .outputs(&op)?
                    .remove(&pin)
                    .ok_or_else(|| EngineFailure::not_found(format!("output `{name}` is empty")))?;
                Ok(Reply::Value(self.typed(value, kind)?))
            }
            WorkflowCall::ConnectWith { obj, other, map } => self.connect_with(obj, other, map),
            WorkflowCall::Record {
                obj,
                identifier,
                transfer_ownership,
            } => {
                let wf = self.obj(obj)?;
                require_kind(&wf, is_workflow, "a workflow")?;
                let id = self.next_record.fetch_add(1, Ordering::SeqCst);
                let record = if transfer_ownership {
                    Recorded::Owned(wf)
                } else {
                    Recorded::Observed(Arc::downgrade(&wf))
                };
                debug!("loopback {}: record workflow as {id} ({identifier:?})", self.address);
                let mut records = self.records.lock();
                prune_records(&mut records);
                records.insert(id, (identifier, record));
                Ok(Reply::Int(id))
            }
            WorkflowCall::GetRecorded { id } => {
                let wf = {
                    let mut records = self.records.lock();
                    prune_records(&mut records);
                    records.get(&id).and_then(|(_, r)| r.get())
                }
                .ok_or_else(|| EngineFailure::not_found(format!("no live recorded workflow {id}")))?;
                Ok(self.register_shared(wf))
            }
            WorkflowCall::GetRecordedByIdentifier { identifier } => {
                // the latest record under a name wins
                let wf = {
                    let mut records = self.records.lock();
                    prune_records(&mut records);
                    records
                        .values()
                        .rev()
                        .find(|(name, _)| name.as_deref() == Some(identifier.as_str()))
                        .and_then(|(_, r)| r.get())
                }
                .ok_or_else(|| EngineFailure::not_found(format!("no live workflow recorded as `{identifier}`")))?;
                Ok(self.register_shared(wf))
            }
            WorkflowCall::RemoteCopy { obj, address } => {
                let text = with!(self.obj(obj)?, Workflow, "a workflow", |w| workflow_to_text(w))?;
                let target =
                    engine_at(&address).ok_or_else(|| EngineFailure::not_found(format!("no engine at `{address}`")))?;
                let copy = workflow_from_text(&text, &target.catalog)?;
                debug!("loopback {}: workflow copied to {address}", self.address);
                Ok(Reply::Object(target.objects.insert(shared(EngineObject::Workflow(copy)))))
            }
            call @ (WorkflowCall::ConnectLargeString { .. } | WorkflowCall::FromText | WorkflowCall::ToText { .. }) => {
                Err(needs_stream(&Call::Workflow(call)))
            }
        }
    }

    pub(in crate::transport::loopback) fn workflow_upload(&self, call: WorkflowCall, payload: Payload) -> EngineResult<Reply> {
        match call {
            WorkflowCall::ConnectLargeString { obj, name } => {
                let s = large_string(payload)?;
                self.connect_exposed(obj, &name, PinValue::Primitive(Primitive::String(s)))
            }
            WorkflowCall::FromText => {
                let text = large_string(payload)?;
                let wf = workflow_from_text(&text, &self.catalog)?;
                Ok(self.register(EngineObject::Workflow(wf)))
            }
            other => Err(wrong_stream(&Call::Workflow(other))),
        }
    }

    pub(in crate::transport::loopback) fn workflow_download(&self, call: WorkflowCall) -> EngineResult<Payload> {
        match call {
            WorkflowCall::ToText { obj } => {
                let text = with!(self.obj(obj)?, Workflow, "a workflow", |w| workflow_to_text(w))?;
                Ok(Payload::Bytes(text.into_bytes()))
            }
            other => Err(wrong_stream(&Call::Workflow(other))),
        }
    }

    // --- sessions ---

    fn hub(&self, obj: ObjectId) -> EngineResult<Arc<SessionHub>> {
        with!(self.obj(obj)?, Session, "a session", |h| Ok(h.clone()))
    }

    /// Run `register` on the session state unless it is shutting down.
    fn register_in(&self, obj: ObjectId, register: impl FnOnce(&mut SessionState)) -> EngineResult<Reply> {
        let hub = self.hub(obj)?;
        let mut state = hub.state.lock();
        if state.shutting_down {
            return Err(EngineFailure::generic("session is shutting down"));
        }
        register(&mut state);
        Ok(Reply::Unit)
    }

    fn flush_workflow(hub: &SessionHub, name: &str, wf: &Shared) -> EngineResult<()> {
        let outputs = with!(wf.clone(), Workflow, "a workflow", |w| Ok(w.outputs.clone()))?;
        if outputs.is_empty() {
            hub.push(ProgressEvent::progress(name, 100.0));
            return Ok(());
        }
        let mut evaluator = Evaluator::new();
        let n = outputs.len();
        for (i, pin) in outputs.iter().enumerate() {
            evaluator.outputs(&pin.op)?;
            hub.push(ProgressEvent::progress(name, 100.0 * (i + 1) as f64 / n as f64));
        }
        Ok(())
    }

    pub(in crate::transport::loopback) fn session(&self, call: SessionCall) -> EngineResult<Reply> {
        match call {
            SessionCall::New => Ok(self.register(EngineObject::Session(Arc::new(SessionHub::default())))),
            SessionCall::AddWorkflow { obj, name, workflow } => {
                let wf = self.obj(workflow)?;
                require_kind(&wf, is_workflow, "a workflow")?;
                self.register_in(obj, |s| match s.workflows.iter_mut().find(|(n, _)| *n == name) {
                    Some(entry) => entry.1 = wf,
                    None => s.workflows.push((name, wf)),
                })
            }
            SessionCall::AddOperator { obj, name, op, pin } => {
                let op = self.obj(op)?;
                require_kind(&op, is_operator, "an operator")?;
                self.register_in(obj, |s| match s.operators.iter_mut().find(|(n, _, _)| *n == name) {
                    Some(entry) => {
                        entry.1 = op;
                        entry.2 = pin;
                    }
                    None => s.operators.push((name, op, pin)),
                })
            }
            SessionCall::AddEventHandler { obj, kind, properties } => self.register_in(obj, |s| {
                s.handlers.push(format!("{kind} {properties:?}"));
            }),
            SessionCall::AddSignalEmitter {
                obj,
                kind,
                name,
                properties,
            } => self.register_in(obj, |s| {
                s.emitters.push(format!("{kind}:{name} {properties:?}"));
            }),
            SessionCall::Registered { obj } => {
                let hub = self.hub(obj)?;
                let s = hub.state.lock();
                let names = s
                    .workflows
                    .iter()
                    .map(|(n, _)| n.clone())
                    .chain(s.operators.iter().map(|(n, _, _)| n.clone()))
                    .collect();
                Ok(Reply::Strings(names))
            }
            SessionCall::FlushWorkflows { obj } => {
                let hub = self.hub(obj)?;
                let (workflows, operators) = {
                    let s = hub.state.lock();
                    (s.workflows.clone(), s.operators.clone())
                };
                for (name, wf) in workflows {
                    hub.push(ProgressEvent::progress(&name, 0.0));
                    if let Err(e) = Self::flush_workflow(&hub, &name, &wf) {
                        warn!("session flush of `{name}` failed: {}", e.message);
                        hub.push(ProgressEvent::state(&name, format!("error: {}", e.message)));
                    }
                }
                for (name, op, _) in operators {
                    hub.push(ProgressEvent::progress(&name, 0.0));
                    match Evaluator::new().outputs(&op) {
                        Ok(_) => hub.push(ProgressEvent::progress(&name, 100.0)),
                        Err(e) => {
                            warn!("session flush of `{name}` failed: {}", e.message);
                            hub.push(ProgressEvent::state(&name, format!("error: {}", e.message)));
                        }
                    }
                }
                Ok(Reply::Unit)
            }
            SessionCall::PrepareShutdown { obj } => {
                self.hub(obj)?.state.lock().shutting_down = true;
                Ok(Reply::Unit)
            }
            SessionCall::Release { obj } => {
                self.hub(obj)?.close();
                Ok(Reply::Unit)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn large_strings_arrive_as_one_string_or_utf8_bytes() {
        assert_eq!(large_string(Payload::Strings(vec!["abc".into()])).unwrap(), "abc");
        assert_eq!(large_string(Payload::Bytes(b"xyz".to_vec())).unwrap(), "xyz");
        assert!(large_string(Payload::Strings(vec!["a".into(), "b".into()])).is_err());
        assert!(large_string(Payload::Int(vec![1])).is_err());
    }

    #[test]
    fn missing_exposed_pin_is_not_found() {
        let err = exposed(&[], "in", "input").unwrap_err();
        assert!(err.message.contains("`in`"));
    }
}
