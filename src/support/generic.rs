//! Generic support: property name -> supporting field.
//!
//! Requires engine 5.0 or newer.

use crate::data::location::Location;
use crate::data::FieldBase;
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, DynObject, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, GenericSupportCall, Reply};
use crate::transport::requires_version;

pub const MIN_VERSION: &str = "5.0";

#[derive(Debug)]
pub struct GenericSupport {
    handle: ObjectHandle,
}

dpf_object!(GenericSupport, EntityKind::GenericSupport);

impl GenericSupport {
    /// # Errors
    /// `VersionNotSupported` on engines older than 5.0.
    pub fn new(location: &Location, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        requires_version(server.as_ref(), MIN_VERSION)?;
        Ok(Self {
            handle: ObjectHandle::create(
                &server,
                Call::GenericSupport(GenericSupportCall::New {
                    location: location.to_string(),
                }),
            )?,
        })
    }

    fn call(&self, call: GenericSupportCall) -> Result<Reply, DpfError> {
        requires_version(self.handle.server().as_ref(), MIN_VERSION)?;
        self.handle.call(Call::GenericSupport(call))
    }

    pub fn location(&self) -> Result<Location, DpfError> {
        Ok(Location::from(
            self.call(GenericSupportCall::Location { obj: self.handle.id() })?
                .into_text()?
                .as_str(),
        ))
    }

    /// Attach a `Field`, `PropertyField` or `StringField` under `name`.
    pub fn set_property<F: FieldBase>(&self, name: &str, field: &F) -> Result<(), DpfError> {
        self.handle.ensure_same_server(field.handle())?;
        self.call(GenericSupportCall::SetProperty {
            obj: self.handle.id(),
            name: name.to_string(),
            field: field.object_id(),
        })?
        .into_unit()
    }

    /// Property `name` as a `T`.
    ///
    /// # Errors
    /// `NotFound` for an unknown name, `TypeMismatch` if the stored field is
    /// not a `T`.
    pub fn property<T: DpfObject>(&self, name: &str) -> Result<T, DpfError> {
        self.property_any(name)?.cast()
    }

    pub fn property_any(&self, name: &str) -> Result<DynObject, DpfError> {
        let raw = self
            .call(GenericSupportCall::Property {
                obj: self.handle.id(),
                name: name.to_string(),
            })?
            .into_object()?;
        DynObject::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    pub fn property_names(&self) -> Result<Vec<String>, DpfError> {
        self.call(GenericSupportCall::PropertyNames { obj: self.handle.id() })?
            .into_strings()
    }
}
