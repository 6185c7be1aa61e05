//! Primitive data objects: scopings and the field family.

pub mod custom_type_field;
pub mod field;
pub mod field_definition;
pub mod field_info;
pub mod location;
pub mod scoping;
pub mod string_field;

pub use custom_type_field::CustomTypeField;
pub use field::{Field, FieldBase, FieldScalar, PropertyField, TypedField};
pub use field_definition::{FieldDefinition, FieldDefinitionData};
pub use field_info::{FieldInfo, FieldValueKind};
pub use location::{Dimensionality, Location, Nature, ShellLayers};
pub use scoping::Scoping;
pub use string_field::StringField;
