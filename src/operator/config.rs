//! Operator configuration: named scalar options.

use crate::dpf_error::DpfError;
use crate::handle::{FromOutput, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, OperatorConfigCall, Primitive, Value};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigOption {
    pub name: String,
    pub value: Primitive,
    pub document: String,
}

#[derive(Debug)]
pub struct OperatorConfig {
    handle: ObjectHandle,
}

dpf_object!(OperatorConfig, EntityKind::OperatorConfig);

impl OperatorConfig {
    /// Empty config.
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        Self::create(None, server)
    }

    /// Config pre-populated with the defaults of `operator`.
    pub fn default_for(operator: &str, server: Option<&Server>) -> Result<Self, DpfError> {
        Self::create(Some(operator.to_string()), server)
    }

    fn create(operator: Option<String>, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::OperatorConfig(OperatorConfigCall::New { operator }))?,
        })
    }

    pub fn set(&self, name: &str, value: impl Into<Primitive>) -> Result<(), DpfError> {
        self.handle
            .call(Call::OperatorConfig(OperatorConfigCall::Set {
                obj: self.handle.id(),
                name: name.to_string(),
                value: value.into(),
            }))?
            .into_unit()
    }

    /// Option `name` as `T`.
    ///
    /// # Errors
    /// `NotFound` for an unknown option, `TypeMismatch` for another type.
    pub fn get<T: FromOutput>(&self, name: &str) -> Result<T, DpfError> {
        let v = self
            .handle
            .call(Call::OperatorConfig(OperatorConfigCall::Get {
                obj: self.handle.id(),
                name: name.to_string(),
            }))?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }

    pub fn set_int(&self, name: &str, v: i32) -> Result<(), DpfError> {
        self.set(name, v)
    }

    pub fn set_double(&self, name: &str, v: f64) -> Result<(), DpfError> {
        self.set(name, v)
    }

    pub fn set_bool(&self, name: &str, v: bool) -> Result<(), DpfError> {
        self.set(name, v)
    }

    pub fn get_int(&self, name: &str) -> Result<i32, DpfError> {
        self.get(name)
    }

    pub fn get_double(&self, name: &str) -> Result<f64, DpfError> {
        self.get(name)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool, DpfError> {
        self.get(name)
    }

    pub fn options(&self) -> Result<Vec<ConfigOption>, DpfError> {
        self.handle
            .call(Call::OperatorConfig(OperatorConfigCall::Options { obj: self.handle.id() }))?
            .into_config_options()
    }

    /// Raw value of `name`, whatever its type.
    pub fn value(&self, name: &str) -> Result<Primitive, DpfError> {
        match self
            .handle
            .call(Call::OperatorConfig(OperatorConfigCall::Get {
                obj: self.handle.id(),
                name: name.to_string(),
            }))?
            .into_value()?
        {
            Value::Primitive(p) => Ok(p),
            Value::Object(o) => Err(DpfError::TypeMismatch(format!("config option is an object ({})", o.kind))),
        }
    }
}
