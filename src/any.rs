//! `Any`: a polymorphic engine value with a runtime type tag.

use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, FromOutput, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{AnyCall, Call, EntityKind, Primitive, ValueKind};

#[derive(Debug)]
pub struct Any {
    handle: ObjectHandle,
}

dpf_object!(Any, EntityKind::Any);

impl Any {
    /// Wrap an engine object.
    pub fn new<T: DpfObject>(obj: &T) -> Result<Self, DpfError> {
        let server = obj.server();
        Ok(Self {
            handle: ObjectHandle::create(server, Call::Any(AnyCall::FromObject { obj: obj.object_id() }))?,
        })
    }

    pub fn from_primitive(value: impl Into<Primitive>, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::Any(AnyCall::FromPrimitive { value: value.into() }))?,
        })
    }

    /// Runtime type of the wrapped value.
    pub fn kind(&self) -> Result<ValueKind, DpfError> {
        self.handle
            .call(Call::Any(AnyCall::Kind { obj: self.handle.id() }))?
            .into_value_kind()
    }

    /// Typed view of the wrapped value.
    ///
    /// # Errors
    /// `TypeMismatch` when the runtime tag is not a `T`.
    pub fn cast<T: FromOutput>(&self) -> Result<T, DpfError> {
        let v = self
            .handle
            .call(Call::Any(AnyCall::Unwrap {
                obj: self.handle.id(),
                kind: T::output_kind(),
            }))?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }
}
