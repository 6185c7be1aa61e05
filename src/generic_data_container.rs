//! GenericDataContainer: property name -> any engine object.

use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, DynObject, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, ContainerCall, EntityKind};

#[derive(Debug)]
pub struct GenericDataContainer {
    handle: ObjectHandle,
}

dpf_object!(GenericDataContainer, EntityKind::GenericDataContainer);

impl GenericDataContainer {
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::GenericDataContainer(ContainerCall::New))?,
        })
    }

    pub fn set_property<T: DpfObject>(&self, name: &str, value: &T) -> Result<(), DpfError> {
        self.handle.ensure_same_server(value.handle())?;
        self.handle
            .call(Call::GenericDataContainer(ContainerCall::SetProperty {
                obj: self.handle.id(),
                name: name.to_string(),
                value: value.object_id(),
            }))?
            .into_unit()
    }

    pub fn property_any(&self, name: &str) -> Result<DynObject, DpfError> {
        let raw = self
            .handle
            .call(Call::GenericDataContainer(ContainerCall::Property {
                obj: self.handle.id(),
                name: name.to_string(),
            }))?
            .into_object()?;
        DynObject::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    /// # Errors
    /// `NotFound` for a missing name, `TypeMismatch` if it is not a `T`.
    pub fn property<T: DpfObject>(&self, name: &str) -> Result<T, DpfError> {
        self.property_any(name)?.cast()
    }

    pub fn property_names(&self) -> Result<Vec<String>, DpfError> {
        self.handle
            .call(Call::GenericDataContainer(ContainerCall::PropertyNames { obj: self.handle.id() }))?
            .into_strings()
    }
}
