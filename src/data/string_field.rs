//! Field of variable-length strings, one per entity.

use super::field::FieldBase;
use super::field_definition::FieldDefinitionData;
use super::field_info::FieldValueKind;
use super::location::{Dimensionality, Location};
use super::scoping::to_i32;
use crate::codec::Payload;
use crate::dpf_error::DpfError;
use crate::handle::{ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, FieldCall};
use crate::transport::TransferOptions;

#[derive(Debug)]
pub struct StringField {
    handle: ObjectHandle,
}

dpf_object!(StringField, EntityKind::StringField);

impl FieldBase for StringField {}

impl StringField {
    pub fn new(n_entities: usize, location: Location, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        let handle = ObjectHandle::create(
            &server,
            Call::Field(FieldCall::New {
                value_kind: FieldValueKind::String,
                n_entities: to_i32(n_entities)?,
                definition: FieldDefinitionData::new(location, Dimensionality::scalar()),
            }),
        )?;
        Ok(Self { handle })
    }

    pub fn data(&self) -> Result<Vec<String>, DpfError> {
        self.data_with(&mut TransferOptions::new())
    }

    pub fn data_with(&self, opts: &mut TransferOptions<'_>) -> Result<Vec<String>, DpfError> {
        self.handle
            .server()
            .download(Call::Field(FieldCall::GetData { obj: self.handle.id() }), opts)?
            .into_strings()
    }

    /// Upload through the NUL-separated string stream.
    pub fn set_data<S: AsRef<str>>(&self, values: &[S]) -> Result<(), DpfError> {
        self.set_data_with(values, &mut TransferOptions::new())
    }

    pub fn set_data_with<S: AsRef<str>>(&self, values: &[S], opts: &mut TransferOptions<'_>) -> Result<(), DpfError> {
        let owned: Vec<String> = values.iter().map(|s| s.as_ref().to_string()).collect();
        if owned.iter().any(|s| s.contains('\0')) {
            return Err(DpfError::InvalidArgument("string values may not contain NUL".into()));
        }
        self.handle
            .server()
            .upload(
                Call::Field(FieldCall::SetData { obj: self.handle.id() }),
                &Payload::Strings(owned),
                opts,
            )?
            .into_unit()
    }

    pub fn entity_data(&self, index: usize) -> Result<Vec<String>, DpfError> {
        self.handle
            .call(Call::Field(FieldCall::EntityDataByIndex {
                obj: self.handle.id(),
                index: to_i32(index)?,
            }))?
            .into_payload()?
            .into_strings()
    }

    pub fn entity_data_by_id(&self, id: i32) -> Result<Vec<String>, DpfError> {
        self.handle
            .call(Call::Field(FieldCall::EntityDataById { obj: self.handle.id(), id }))?
            .into_payload()?
            .into_strings()
    }

    pub fn push_back(&self, id: i32, values: &[&str]) -> Result<(), DpfError> {
        self.handle
            .call(Call::Field(FieldCall::PushBack {
                obj: self.handle.id(),
                id,
                data: Payload::Strings(values.iter().map(|s| s.to_string()).collect()),
            }))?
            .into_unit()
    }

    pub fn copy_to(&self, server: &Server) -> Result<Self, DpfError> {
        let info = self.info()?;
        let copy = Self::new(info.size, self.location()?, Some(server))?;
        copy.set_scoping(&self.scoping()?.copy_to(server)?)?;
        copy.set_data(&self.data()?)?;
        Ok(copy)
    }
}
