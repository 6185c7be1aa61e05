//! Call routing of the loopback engine.
//!
//! Handlers copy what they need out of an object's lock and release it
//! before registering new handles or locking a second, unrelated object.

mod data;
mod ops;
mod support;

use super::store::{EngineObject, EngineResult, EngineValue, Shared, kind_of, shared, wrong_kind};
use super::EngineCore;
use crate::codec::Payload;
use crate::dpf_error::EngineFailure;
use crate::session::ProgressEvent;
use crate::transport::call::{BaseCall, Call, EntityKind, FileCall, ObjectId, OutputKind, Reply, ServerInfo, Transfer, Value, ValueKind};
use log::{debug, trace};
use std::sync::atomic::Ordering;

/// Lock `$obj`, run `$body` on its `$variant` record or fail with a kind error.
macro_rules! with {
    ($obj:expr, $variant:ident, $what:literal, |$v:ident| $body:expr) => {{
        let obj: $crate::transport::loopback::store::Shared = $obj;
        let mut guard = obj.lock();
        let out = match &mut *guard {
            $crate::transport::loopback::store::EngineObject::$variant($v) => $body,
            other => Err($crate::transport::loopback::store::wrong_kind($what, other.kind())),
        };
        out
    }};
}
pub(crate) use with;

pub(super) fn count(n: usize) -> Reply {
    Reply::Int(n as i64)
}

/// `i` as a position inside `0..len`.
pub(super) fn index(i: i32, len: usize, what: &str) -> EngineResult<usize> {
    usize::try_from(i)
        .ok()
        .filter(|&i| i < len)
        .ok_or_else(|| EngineFailure::out_of_range(format!("{what} index {i} outside 0..{len}")))
}

pub(super) fn size_arg(n: i32) -> EngineResult<usize> {
    usize::try_from(n).map_err(|_| EngineFailure::invalid(format!("negative size {n}")))
}

pub(super) fn require_kind(obj: &Shared, ok: impl Fn(EntityKind) -> bool, what: &str) -> EngineResult<()> {
    let k = kind_of(obj);
    if ok(k) { Ok(()) } else { Err(wrong_kind(what, k)) }
}

fn needs_stream(call: &Call) -> EngineFailure {
    EngineFailure::invalid(format!("{} call needs a data stream", call.service()))
}

fn wrong_stream(call: &Call) -> EngineFailure {
    EngineFailure::invalid(format!("{} call does not take this stream", call.service()))
}

fn describe(obj: &EngineObject) -> String {
    match obj {
        EngineObject::Scoping(s) => format!("Scoping ({}, {} ids)", s.location, s.ids.len()),
        EngineObject::Field(f) => format!(
            "{} ({}, {} components, {} values)",
            f.value_kind.entity(),
            f.definition.location,
            f.n_components(),
            f.data_size()
        ),
        EngineObject::Collection(c) => format!(
            "{} ({} entries, labels {:?})",
            obj.kind(),
            c.entries.len(),
            c.labels.iter().map(|(l, _)| l.as_str()).collect::<Vec<_>>()
        ),
        EngineObject::Mesh(m) => format!("MeshedRegion ({} nodes, {} elements)", m.nodes.len(), m.elements.len()),
        EngineObject::Operator(o) => format!("Operator `{}` ({:?})", o.name, o.status),
        EngineObject::Workflow(w) => format!(
            "Workflow ({} operators, {} inputs, {} outputs)",
            w.operators.len(),
            w.inputs.len(),
            w.outputs.len()
        ),
        other => other.kind().to_string(),
    }
}

impl EngineCore {
    pub(crate) fn server_info(&self) -> ServerInfo {
        ServerInfo {
            version: self.version.clone(),
            address: self.address.clone(),
        }
    }

    pub(super) fn obj(&self, id: ObjectId) -> EngineResult<Shared> {
        self.objects.get(id)
    }

    pub(super) fn register(&self, obj: EngineObject) -> Reply {
        Reply::Object(self.objects.insert(shared(obj)))
    }

    pub(super) fn register_shared(&self, obj: Shared) -> Reply {
        Reply::Object(self.objects.insert(obj))
    }

    /// Reply value for `v`; objects get a fresh handle.
    pub(super) fn to_value(&self, v: EngineValue) -> Value {
        match v {
            EngineValue::Object(o) => Value::Object(self.objects.insert(o)),
            EngineValue::Primitive(p) => Value::Primitive(p),
        }
    }

    /// `v` checked against `kind`; `Object(Any)` boxes anything that is not already an `Any`.
    pub(super) fn typed(&self, v: EngineValue, kind: OutputKind) -> EngineResult<Value> {
        let actual = v.kind();
        if kind == OutputKind::Object(EntityKind::Any) && actual != ValueKind::Object(EntityKind::Any) {
            return Ok(Value::Object(self.objects.insert(shared(EngineObject::Any(v)))));
        }
        if !kind.accepts(actual) {
            return Err(EngineFailure::type_mismatch(format!("value is {actual}, requested {kind:?}")));
        }
        Ok(self.to_value(v))
    }

    /// Answer a plain request.
    pub(crate) fn handle(&self, call: Call) -> EngineResult<Reply> {
        if call.transfer() != Transfer::None {
            return Err(needs_stream(&call));
        }
        if call.creates_object() && self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineFailure::generic("engine is shutting down"));
        }
        trace!("loopback {}: {call:?}", self.address);
        match call {
            Call::Base(c) => self.base(c),
            Call::Scoping(c) => self.scoping(c),
            Call::Field(c) => self.field(c),
            Call::FieldDefinition(c) => self.field_definition(c),
            Call::Collection(c) => self.collection(c),
            Call::Mesh(c) => self.mesh(c),
            Call::TimeFreq(c) => self.time_freq(c),
            Call::Cyclic(c) => self.cyclic(c),
            Call::GenericSupport(c) => self.generic_support(c),
            Call::ResultInfo(c) => self.result_info(c),
            Call::DataSources(c) => self.data_sources(c),
            Call::Operator(c) => self.operator(c),
            Call::OperatorConfig(c) => self.operator_config(c),
            Call::Specification(c) => self.specification(c),
            Call::Workflow(c) => self.workflow(c),
            Call::Session(c) => self.session(c),
            Call::DataTree(c) => self.data_tree(c),
            Call::GenericDataContainer(c) => self.container(c),
            Call::Any(c) => self.any(c),
            Call::File(c) => self.file(c),
        }
    }

    /// Answer a call paired with an uploaded array.
    pub(crate) fn handle_upload(&self, call: Call, payload: Payload) -> EngineResult<Reply> {
        if call.transfer() != Transfer::Upload {
            return Err(wrong_stream(&call));
        }
        if call.creates_object() && self.shutting_down.load(Ordering::SeqCst) {
            return Err(EngineFailure::generic("engine is shutting down"));
        }
        debug!("loopback upload {} ({} values)", call.service(), payload.len());
        match call {
            Call::Scoping(c) => self.scoping_upload(c, payload),
            Call::Field(c) => self.field_upload(c, payload),
            Call::Collection(c) => self.collection_upload(c, payload),
            Call::Operator(c) => self.operator_upload(c, payload),
            Call::Workflow(c) => self.workflow_upload(c, payload),
            Call::File(FileCall::Upload { server_path, use_tmp_dir }) => {
                let bytes = payload
                    .into_bytes()
                    .map_err(|e| EngineFailure::type_mismatch(e.to_string()))?;
                Ok(Reply::Text(self.store_file(&server_path, use_tmp_dir, bytes)))
            }
            other => Err(wrong_stream(&other)),
        }
    }

    /// Produce the array answering a download call.
    pub(crate) fn handle_download(&self, call: Call) -> EngineResult<Payload> {
        if call.transfer() != Transfer::Download {
            return Err(wrong_stream(&call));
        }
        debug!("loopback download {}", call.service());
        match call {
            Call::Scoping(c) => self.scoping_download(c),
            Call::Field(c) => self.field_download(c),
            Call::Collection(c) => self.collection_download(c),
            Call::Workflow(c) => self.workflow_download(c),
            Call::File(FileCall::Download { server_path }) => {
                let path = normalize(&server_path);
                self.files
                    .lock()
                    .get(&path)
                    .cloned()
                    .map(Payload::Bytes)
                    .ok_or_else(|| EngineFailure::not_found(format!("no file `{path}` on the engine")))
            }
            other => Err(wrong_stream(&other)),
        }
    }

    /// Feed the events of `session` to `on_event` until the session closes
    /// or `on_event` returns `false`.
    pub(crate) fn listen(&self, session: ObjectId, on_event: &mut dyn FnMut(ProgressEvent) -> bool) -> EngineResult<()> {
        let hub = with!(self.obj(session)?, Session, "a session", |h| Ok(h.clone()))?;
        while let Some(ev) = hub.next_event() {
            if !on_event(ev) {
                break;
            }
        }
        Ok(())
    }

    fn base(&self, call: BaseCall) -> EngineResult<Reply> {
        match call {
            BaseCall::ServerInfo => Ok(Reply::ServerInfo(self.server_info())),
            BaseCall::Release { obj } => {
                let o = self.objects.remove(obj)?;
                if self.objects.is_referenced(&o) {
                    return Ok(Reply::Unit);
                }
                if let EngineObject::Session(hub) = &*o.lock() {
                    hub.close();
                }
                Ok(Reply::Unit)
            }
            BaseCall::Duplicate { obj } => {
                let o = self.obj(obj)?;
                Ok(self.register_shared(o))
            }
            BaseCall::LiveObjectCount => Ok(count(self.objects.len())),
            BaseCall::OperatorNames => Ok(Reply::Strings(self.catalog.names())),
            BaseCall::PrepareShutdown => {
                debug!("loopback {} preparing shutdown", self.address);
                self.shutting_down.store(true, Ordering::SeqCst);
                Ok(Reply::Unit)
            }
            BaseCall::Describe { obj } => {
                let o = self.obj(obj)?;
                let text = describe(&o.lock());
                Ok(Reply::Text(text))
            }
        }
    }

    // --- virtual file system ---

    fn store_file(&self, server_path: &str, use_tmp_dir: bool, bytes: Vec<u8>) -> String {
        let path = if use_tmp_dir {
            normalize(&format!("{}/{server_path}", self.tmp_dir))
        } else {
            normalize(server_path)
        };
        debug!("loopback file `{path}` ({} bytes)", bytes.len());
        self.files.lock().insert(path.clone(), bytes);
        path
    }

    fn file(&self, call: FileCall) -> EngineResult<Reply> {
        match call {
            FileCall::List { server_path } => {
                let dir = normalize(&server_path);
                let prefix = if dir.is_empty() { String::new() } else { format!("{dir}/") };
                let files = self.files.lock();
                Ok(Reply::Strings(
                    files
                        .keys()
                        .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
                        .collect(),
                ))
            }
            FileCall::TmpDir => Ok(Reply::Text(self.tmp_dir.clone())),
            FileCall::Upload { .. } | FileCall::Download { .. } => Err(needs_stream(&Call::File(call))),
        }
    }
}

/// `/`-separated path without empty or `.` segments, no trailing slash;
/// keeps a leading `/`.
fn normalize(path: &str) -> String {
    let rooted = path.starts_with('/') || path.starts_with('\\');
    let parts: Vec<&str> = path
        .split(['/', '\\'])
        .filter(|p| !p.is_empty() && *p != ".")
        .collect();
    let joined = parts.join("/");
    if rooted { format!("/{joined}") } else { joined }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_normalized() {
        assert_eq!(normalize("a//b/./c/"), "a/b/c");
        assert_eq!(normalize("/tmp\\x.rst"), "/tmp/x.rst");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn index_bounds() {
        assert_eq!(index(2, 3, "entry").unwrap(), 2);
        assert!(index(3, 3, "entry").is_err());
        assert!(index(-1, 3, "entry").is_err());
        assert!(size_arg(-4).is_err());
    }
}
