//! Typed handles to engine-owned objects.
//!
//! An [`ObjectHandle`] is `(id, kind, server)` plus an ownership flag. The
//! owning handle issues exactly one release to the engine: on `Drop`, on an
//! explicit [`ObjectHandle::release`], or never if ownership was handed back
//! with [`ObjectHandle::take_ownership`]. Release errors inside `Drop` are
//! degraded to a `log::warn!`.
//!
//! Handles are not synchronised: sharing one across threads needs external
//! synchronisation by the caller.

use crate::dpf_error::DpfError;
use crate::transport::call::{
    BaseCall, Call, EntityKind, ObjectId, OutputKind, Primitive, RawObject, Reply, Value,
};
use crate::transport::Server;
use log::{trace, warn};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

pub struct ObjectHandle {
    id: ObjectId,
    kind: EntityKind,
    server: Server,
    owned: AtomicBool,
}

impl fmt::Debug for ObjectHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("backend", &self.server.id())
            .field("owned", &self.is_owned())
            .finish()
    }
}

impl ObjectHandle {
    /// Take ownership of an object the engine just produced.
    pub fn from_raw(raw: RawObject, server: Server) -> Self {
        Self {
            id: raw.id,
            kind: raw.kind,
            server,
            owned: AtomicBool::new(true),
        }
    }

    /// Issue a creating call and own its result.
    pub fn create(server: &Server, call: Call) -> Result<Self, DpfError> {
        let raw = server.call(call)?.into_object()?;
        Ok(Self::from_raw(raw, server.clone()))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn raw(&self) -> RawObject {
        RawObject {
            id: self.id,
            kind: self.kind,
        }
    }

    pub fn server(&self) -> &Server {
        &self.server
    }

    pub fn is_owned(&self) -> bool {
        self.owned.load(Ordering::SeqCst)
    }

    pub fn call(&self, call: Call) -> Result<Reply, DpfError> {
        self.server.call(call)
    }

    /// Independent engine reference to the same object.
    pub fn duplicate(&self) -> Result<ObjectHandle, DpfError> {
        let raw = self.call(Call::Base(BaseCall::Duplicate { obj: self.id }))?.into_object()?;
        Ok(Self::from_raw(raw, self.server.clone()))
    }

    /// Hand the object back to the engine: this handle stops releasing it.
    pub fn take_ownership(&self) -> ObjectId {
        self.owned.store(false, Ordering::SeqCst);
        self.id
    }

    /// Release now, reporting failures instead of logging them.
    ///
    /// # Errors
    /// The engine's release error, or `NullObject` if this handle no longer
    /// owns the object.
    pub fn release(self) -> Result<(), DpfError> {
        if !self.owned.swap(false, Ordering::SeqCst) {
            return Err(DpfError::NullObject);
        }
        if self.server.is_released() {
            return Ok(());
        }
        self.server
            .call(Call::Base(BaseCall::Release { obj: self.id }))?
            .into_unit()
    }

    /// `InvalidArgument` unless both handles live on the same backend.
    pub fn ensure_same_server(&self, other: &ObjectHandle) -> Result<(), DpfError> {
        ensure_on(&self.server, other)
    }
}

/// `InvalidArgument` unless `handle` lives on `server`.
pub fn ensure_on(server: &Server, handle: &ObjectHandle) -> Result<(), DpfError> {
    if server.id() == handle.server.id() {
        Ok(())
    } else {
        Err(DpfError::InvalidArgument(format!(
            "object {} lives on backend {}, call targets backend {}",
            handle.id,
            handle.server.id().get(),
            server.id().get()
        )))
    }
}

impl Drop for ObjectHandle {
    fn drop(&mut self) {
        if !self.owned.swap(false, Ordering::SeqCst) || self.server.is_released() {
            return;
        }
        trace!("release {} ({})", self.id, self.kind);
        let res = self
            .server
            .call(Call::Base(BaseCall::Release { obj: self.id }))
            .and_then(Reply::into_unit);
        if let Err(e) = res {
            warn!("failed to release {} ({}): {e}", self.id, self.kind);
        }
    }
}

/// A typed wrapper around one [`ObjectHandle`].
pub trait DpfObject: Sized {
    /// Whether a handle of runtime type `kind` may back `Self`.
    fn accepts(kind: EntityKind) -> bool;

    /// Type requested when this object is read from an output pin.
    fn output_kind() -> OutputKind;

    /// Wrap without checking; used by [`from_handle`](Self::from_handle).
    fn wrap(handle: ObjectHandle) -> Self;

    fn handle(&self) -> &ObjectHandle;

    /// Checked downcast of an untyped handle.
    ///
    /// # Errors
    /// `TypeMismatch` if the runtime tag is not accepted.
    fn from_handle(handle: ObjectHandle) -> Result<Self, DpfError> {
        if Self::accepts(handle.kind()) {
            Ok(Self::wrap(handle))
        } else {
            Err(DpfError::TypeMismatch(format!(
                "expected {:?}, engine object is {}",
                Self::output_kind(),
                handle.kind()
            )))
        }
    }

    fn server(&self) -> &Server {
        self.handle().server()
    }

    fn object_id(&self) -> ObjectId {
        self.handle().id()
    }

    fn duplicate(&self) -> Result<Self, DpfError> {
        Self::from_handle(self.handle().duplicate()?)
    }
}

/// Implements [`DpfObject`] for a `{ handle: ObjectHandle }` struct bound to
/// one entity kind.
macro_rules! dpf_object {
    ($ty:ty, $kind:expr) => {
        impl $crate::handle::DpfObject for $ty {
            fn accepts(kind: $crate::transport::call::EntityKind) -> bool {
                kind == $kind
            }

            fn output_kind() -> $crate::transport::call::OutputKind {
                $crate::transport::call::OutputKind::Object($kind)
            }

            fn wrap(handle: $crate::handle::ObjectHandle) -> Self {
                Self { handle }
            }

            fn handle(&self) -> &$crate::handle::ObjectHandle {
                &self.handle
            }
        }
    };
}
pub(crate) use dpf_object;

/// Any engine object, typed at runtime.
#[derive(Debug)]
pub struct DynObject {
    handle: ObjectHandle,
}

impl DpfObject for DynObject {
    fn accepts(_kind: EntityKind) -> bool {
        true
    }

    fn output_kind() -> OutputKind {
        OutputKind::AnyObject
    }

    fn wrap(handle: ObjectHandle) -> Self {
        Self { handle }
    }

    fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl DynObject {
    pub fn kind(&self) -> EntityKind {
        self.handle.kind()
    }

    /// Downcast by runtime tag.
    ///
    /// # Errors
    /// `TypeMismatch`; the handle is released in that case.
    pub fn cast<T: DpfObject>(self) -> Result<T, DpfError> {
        T::from_handle(self.handle)
    }

    pub fn into_handle(self) -> ObjectHandle {
        self.handle
    }
}

/// Anything that can be read from an output pin.
pub trait FromOutput: Sized {
    fn output_kind() -> OutputKind;

    fn from_value(value: Value, server: &Server) -> Result<Self, DpfError>;
}

impl<T: DpfObject> FromOutput for T {
    fn output_kind() -> OutputKind {
        <T as DpfObject>::output_kind()
    }

    fn from_value(value: Value, server: &Server) -> Result<Self, DpfError> {
        match value {
            Value::Object(raw) => T::from_handle(ObjectHandle::from_raw(raw, server.clone())),
            Value::Primitive(p) => Err(DpfError::TypeMismatch(format!(
                "expected {:?}, got {:?}",
                <T as DpfObject>::output_kind(),
                p.value_kind()
            ))),
        }
    }
}

fn primitive_mismatch(expected: OutputKind, value: &Value) -> DpfError {
    DpfError::TypeMismatch(format!("expected {expected:?}, got {}", value.kind()))
}

macro_rules! primitive_output {
    ($ty:ty, $kind:ident, $variant:ident) => {
        impl FromOutput for $ty {
            fn output_kind() -> OutputKind {
                OutputKind::$kind
            }

            fn from_value(value: Value, _server: &Server) -> Result<Self, DpfError> {
                match value {
                    Value::Primitive(Primitive::$variant(v)) => Ok(v),
                    other => Err(primitive_mismatch(OutputKind::$kind, &other)),
                }
            }
        }
    };
}

primitive_output!(i32, Int, Int);
primitive_output!(f64, Double, Double);
primitive_output!(bool, Bool, Bool);
primitive_output!(String, String, String);
primitive_output!(Vec<i32>, Ints, Ints);
primitive_output!(Vec<f64>, Doubles, Doubles);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackEngine;

    #[test]
    fn drop_releases_once() {
        let engine = LoopbackEngine::new();
        let server = engine.connect_default().unwrap();
        let base = engine.live_object_count();
        let h = ObjectHandle::create(
            &server,
            Call::Scoping(crate::transport::call::ScopingCall::New { location: None }),
        )
        .unwrap();
        let dup = h.duplicate().unwrap();
        assert_eq!(engine.live_object_count(), base + 2);
        drop(h);
        assert_eq!(engine.live_object_count(), base + 1);
        dup.release().unwrap();
        assert_eq!(engine.live_object_count(), base);
    }

    #[test]
    fn take_ownership_disarms_drop() {
        let engine = LoopbackEngine::new();
        let server = engine.connect_default().unwrap();
        let base = engine.live_object_count();
        let h = ObjectHandle::create(&server, Call::DataTree(crate::transport::call::DataTreeCall::New)).unwrap();
        let id = h.take_ownership();
        drop(h);
        assert_eq!(engine.live_object_count(), base + 1);
        server.call(Call::Base(BaseCall::Release { obj: id })).unwrap();
        assert_eq!(engine.live_object_count(), base);
    }

    #[test]
    fn released_backend_makes_drop_a_no_op() {
        let engine = LoopbackEngine::new();
        let server = engine.connect_default().unwrap();
        let h = ObjectHandle::create(&server, Call::DataTree(crate::transport::call::DataTreeCall::New)).unwrap();
        server.release();
        drop(h);
        assert!(server.is_released());
    }
}
