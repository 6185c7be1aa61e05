//! DataTree: named primitive values.

use crate::dpf_error::DpfError;
use crate::handle::{FromOutput, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, DataTreeCall, EntityKind, Primitive};

#[derive(Debug)]
pub struct DataTree {
    handle: ObjectHandle,
}

dpf_object!(DataTree, EntityKind::DataTree);

impl DataTree {
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::DataTree(DataTreeCall::New))?,
        })
    }

    /// Accepts `i32`, `f64`, `bool`, strings and `i32`/`f64` vectors.
    pub fn set(&self, name: &str, value: impl Into<Primitive>) -> Result<(), DpfError> {
        self.handle
            .call(Call::DataTree(DataTreeCall::Set {
                obj: self.handle.id(),
                name: name.to_string(),
                value: value.into(),
            }))?
            .into_unit()
    }

    /// # Errors
    /// `NotFound` for a missing name, `TypeMismatch` for another type.
    pub fn get<T: FromOutput>(&self, name: &str) -> Result<T, DpfError> {
        let v = self
            .handle
            .call(Call::DataTree(DataTreeCall::Get {
                obj: self.handle.id(),
                name: name.to_string(),
            }))?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }

    pub fn has(&self, name: &str) -> Result<bool, DpfError> {
        self.handle
            .call(Call::DataTree(DataTreeCall::Has {
                obj: self.handle.id(),
                name: name.to_string(),
            }))?
            .into_bool()
    }

    pub fn remove(&self, name: &str) -> Result<(), DpfError> {
        self.handle
            .call(Call::DataTree(DataTreeCall::Remove {
                obj: self.handle.id(),
                name: name.to_string(),
            }))?
            .into_unit()
    }

    pub fn names(&self) -> Result<Vec<String>, DpfError> {
        self.handle
            .call(Call::DataTree(DataTreeCall::Names { obj: self.handle.id() }))?
            .into_strings()
    }
}
