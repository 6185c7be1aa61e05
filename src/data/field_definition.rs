//! Field definition: location, dimensionality, unit, shell layers,
//! quantity types and name.

use super::location::{Dimensionality, Location, ShellLayers};
use crate::dpf_error::DpfError;
use crate::handle::{ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, FieldDefinitionCall};
use serde::{Deserialize, Serialize};

/// Plain description of a field's values.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldDefinitionData {
    pub location: Location,
    pub dimensionality: Dimensionality,
    pub unit: String,
    pub shell_layers: ShellLayers,
    pub quantity_types: Vec<String>,
    pub name: String,
}

impl FieldDefinitionData {
    pub fn new(location: Location, dimensionality: Dimensionality) -> Self {
        Self {
            location,
            dimensionality,
            ..Self::default()
        }
    }

    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_quantity_type(mut self, quantity: impl Into<String>) -> Self {
        self.quantity_types.push(quantity.into());
        self
    }

    pub fn n_components(&self) -> usize {
        self.dimensionality.component_count()
    }
}

/// Engine-side field definition object.
#[derive(Debug)]
pub struct FieldDefinition {
    handle: ObjectHandle,
}

dpf_object!(FieldDefinition, EntityKind::FieldDefinition);

impl FieldDefinition {
    pub fn new(data: FieldDefinitionData, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        let handle = ObjectHandle::create(&server, Call::FieldDefinition(FieldDefinitionCall::New { data }))?;
        Ok(Self { handle })
    }

    pub fn data(&self) -> Result<FieldDefinitionData, DpfError> {
        self.handle
            .call(Call::FieldDefinition(FieldDefinitionCall::Get { obj: self.handle.id() }))?
            .into_field_definition()
    }

    pub fn set_data(&self, data: FieldDefinitionData) -> Result<(), DpfError> {
        self.handle
            .call(Call::FieldDefinition(FieldDefinitionCall::Set {
                obj: self.handle.id(),
                data,
            }))?
            .into_unit()
    }

    fn update(&self, f: impl FnOnce(&mut FieldDefinitionData)) -> Result<(), DpfError> {
        let mut d = self.data()?;
        f(&mut d);
        self.set_data(d)
    }

    pub fn location(&self) -> Result<Location, DpfError> {
        Ok(self.data()?.location)
    }

    pub fn set_location(&self, location: Location) -> Result<(), DpfError> {
        self.update(|d| d.location = location)
    }

    pub fn unit(&self) -> Result<String, DpfError> {
        Ok(self.data()?.unit)
    }

    pub fn set_unit(&self, unit: &str) -> Result<(), DpfError> {
        self.update(|d| d.unit = unit.to_string())
    }

    pub fn dimensionality(&self) -> Result<Dimensionality, DpfError> {
        Ok(self.data()?.dimensionality)
    }

    pub fn set_dimensionality(&self, dim: Dimensionality) -> Result<(), DpfError> {
        dim.validate()?;
        self.update(|d| d.dimensionality = dim)
    }

    pub fn shell_layers(&self) -> Result<ShellLayers, DpfError> {
        Ok(self.data()?.shell_layers)
    }

    pub fn set_shell_layers(&self, layers: ShellLayers) -> Result<(), DpfError> {
        self.update(|d| d.shell_layers = layers)
    }

    pub fn name(&self) -> Result<String, DpfError> {
        Ok(self.data()?.name)
    }

    pub fn set_name(&self, name: &str) -> Result<(), DpfError> {
        self.update(|d| d.name = name.to_string())
    }
}
