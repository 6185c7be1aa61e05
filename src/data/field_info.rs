//! Field value kinds and the one-shot field summary.

use crate::transport::call::EntityKind;
use serde::{Deserialize, Serialize};

/// Element type stored by a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FieldValueKind {
    Double,
    Int,
    String,
    /// User type of `unitary_size` bytes, opaque to the engine.
    Custom { unitary_size: u32, type_name: String },
}

impl FieldValueKind {
    pub fn entity(&self) -> EntityKind {
        match self {
            FieldValueKind::Double => EntityKind::Field,
            FieldValueKind::Int => EntityKind::PropertyField,
            FieldValueKind::String => EntityKind::StringField,
            FieldValueKind::Custom { .. } => EntityKind::CustomTypeField,
        }
    }

    /// Bytes per element (strings report 0).
    pub fn unitary_size(&self) -> usize {
        match self {
            FieldValueKind::Double => 8,
            FieldValueKind::Int => 4,
            FieldValueKind::String => 0,
            FieldValueKind::Custom { unitary_size, .. } => *unitary_size as usize,
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            FieldValueKind::Double => "double",
            FieldValueKind::Int => "int32",
            FieldValueKind::String => "string",
            FieldValueKind::Custom { type_name, .. } => type_name,
        }
    }
}

/// Shape summary of a field, fetched in a single round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    pub value_kind: FieldValueKind,
    pub n_components: usize,
    /// Number of stored values (units for custom fields).
    pub data_size: usize,
    /// Number of entities in the scoping.
    pub size: usize,
    pub has_data_pointer: bool,
}

impl FieldInfo {
    pub fn unitary_size(&self) -> usize {
        self.value_kind.unitary_size()
    }

    pub fn type_name(&self) -> &str {
        self.value_kind.type_name()
    }

    /// Number of entities that carry data.
    pub fn n_elementary_data(&self) -> usize {
        if self.n_components == 0 {
            0
        } else {
            self.data_size / self.n_components
        }
    }
}
