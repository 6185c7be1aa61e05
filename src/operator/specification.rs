//! Operator specification: documented pins and configuration options.

use crate::dpf_error::DpfError;
use crate::handle::{ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, SpecificationCall};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One documented pin.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PinSpec {
    pub name: String,
    /// Accepted engine type names, e.g. `"field"`, `"fields_container"`.
    pub type_names: Vec<String>,
    pub derived_class: Option<String>,
    pub optional: bool,
    /// Accepts positional values from this pin onward.
    pub ellipsis: bool,
    pub document: String,
    pub aliases: Vec<String>,
}

impl PinSpec {
    pub fn new(name: impl Into<String>, type_names: &[&str], document: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            type_names: type_names.iter().map(|s| s.to_string()).collect(),
            document: document.into(),
            ..Self::default()
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn ellipsis(mut self) -> Self {
        self.ellipsis = true;
        self
    }

    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.aliases.push(alias.into());
        self
    }
}

/// Documented configuration option.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConfigSpec {
    pub name: String,
    pub type_names: Vec<String>,
    pub default_value: String,
    pub document: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SpecificationData {
    pub description: String,
    pub inputs: BTreeMap<i32, PinSpec>,
    pub outputs: BTreeMap<i32, PinSpec>,
    pub config_options: Vec<ConfigSpec>,
    pub properties: BTreeMap<String, String>,
}

impl SpecificationData {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn with_input(mut self, pin: i32, spec: PinSpec) -> Self {
        self.inputs.insert(pin, spec);
        self
    }

    pub fn with_output(mut self, pin: i32, spec: PinSpec) -> Self {
        self.outputs.insert(pin, spec);
        self
    }

    pub fn with_config(mut self, spec: ConfigSpec) -> Self {
        self.config_options.push(spec);
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Whether an input may be connected to `pin`.
    ///
    /// An empty input table accepts every pin; otherwise the pin must be
    /// declared or lie past an ellipsis pin.
    pub fn accepts_input(&self, pin: i32) -> bool {
        self.inputs.is_empty()
            || self.inputs.contains_key(&pin)
            || self.inputs.range(..pin).any(|(_, s)| s.ellipsis)
    }

    /// Pin declared under `name` or one of its aliases.
    pub fn input_pin_by_name(&self, name: &str) -> Option<i32> {
        self.inputs
            .iter()
            .find(|(_, s)| s.name == name || s.aliases.iter().any(|a| a == name))
            .map(|(&p, _)| p)
    }
}

#[derive(Debug)]
pub struct OperatorSpecification {
    handle: ObjectHandle,
}

dpf_object!(OperatorSpecification, EntityKind::OperatorSpecification);

impl OperatorSpecification {
    /// Specification of the catalog operator `operator`.
    ///
    /// # Errors
    /// `NotFound` for an unknown operator name.
    pub fn new(operator: &str, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(
                &server,
                Call::Specification(SpecificationCall::New {
                    operator: operator.to_string(),
                }),
            )?,
        })
    }

    pub fn data(&self) -> Result<SpecificationData, DpfError> {
        self.handle
            .call(Call::Specification(SpecificationCall::Describe { obj: self.handle.id() }))?
            .into_specification()
    }

    pub fn description(&self) -> Result<String, DpfError> {
        Ok(self.data()?.description)
    }

    pub fn inputs(&self) -> Result<BTreeMap<i32, PinSpec>, DpfError> {
        Ok(self.data()?.inputs)
    }

    pub fn outputs(&self) -> Result<BTreeMap<i32, PinSpec>, DpfError> {
        Ok(self.data()?.outputs)
    }

    pub fn config_specs(&self) -> Result<Vec<ConfigSpec>, DpfError> {
        Ok(self.data()?.config_options)
    }

    pub fn properties(&self) -> Result<BTreeMap<String, String>, DpfError> {
        Ok(self.data()?.properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ellipsis_pins_accept_trailing_inputs() {
        let spec = SpecificationData::new("merge")
            .with_input(0, PinSpec::new("fields1", &["field"], "").ellipsis())
            .with_input(-1, PinSpec::new("weights", &["vector<double>"], "").optional());
        assert!(spec.accepts_input(0));
        assert!(spec.accepts_input(7));
        assert!(spec.accepts_input(-1));
        assert!(!spec.accepts_input(-2));
        assert!(SpecificationData::new("any").accepts_input(42));
    }

    #[test]
    fn pin_lookup_by_alias() {
        let spec = SpecificationData::new("")
            .with_input(4, PinSpec::new("data_sources", &["data_sources"], "").with_alias("ds"));
        assert_eq!(spec.input_pin_by_name("ds"), Some(4));
        assert_eq!(spec.input_pin_by_name("mesh"), None);
    }
}
