//! Field of a user-defined plain-old-data type.
//!
//! The engine only knows the unitary byte size; values travel as an opaque
//! byte stream and are reinterpreted on the client through `bytemuck`.

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
use bytemuck::Pod;
use std::mem::size_of;

#[derive(Debug)]
pub struct CustomTypeField {
    handle: ObjectHandle,
}

dpf_object!(CustomTypeField, EntityKind::CustomTypeField);

impl FieldBase for CustomTypeField {}

impl CustomTypeField {
    /// Field whose elements are `unitary_size` bytes wide.
    pub fn with_unitary_size(
        unitary_size: usize,
        type_name: &str,
        n_entities: usize,
        location: Location,
        server: Option<&Server>,
    ) -> Result<Self, DpfError> {
        if unitary_size == 0 {
            return Err(DpfError::InvalidArgument("unitary size must be positive".into()));
        }
        let server = server::resolve(server)?;
        let handle = ObjectHandle::create(
            &server,
            Call::Field(FieldCall::New {
                value_kind: FieldValueKind::Custom {
                    unitary_size: u32::try_from(unitary_size)
                        .map_err(|_| DpfError::InvalidArgument(format!("unitary size {unitary_size}")))?,
                    type_name: type_name.to_string(),
                },
                n_entities: to_i32(n_entities)?,
                definition: FieldDefinitionData::new(location, Dimensionality::scalar()),
            }),
        )?;
        Ok(Self { handle })
    }

    /// Field of `T`, named after the Rust type.
    pub fn new<T: Pod>(n_entities: usize, location: Location, server: Option<&Server>) -> Result<Self, DpfError> {
        Self::with_unitary_size(size_of::<T>(), std::any::type_name::<T>(), n_entities, location, server)
    }

    pub fn unitary_size(&self) -> Result<usize, DpfError> {
        Ok(self.info()?.unitary_size())
    }

    pub fn type_name(&self) -> Result<String, DpfError> {
        Ok(self.info()?.type_name().to_string())
    }

    /// # Errors
    /// `InvalidArgument` unless `bytes.len()` is a multiple of the unitary size.
    pub fn set_data_bytes(&self, bytes: &[u8]) -> Result<(), DpfError> {
        self.set_data_bytes_with(bytes, &mut TransferOptions::new())
    }

    pub fn set_data_bytes_with(&self, bytes: &[u8], opts: &mut TransferOptions<'_>) -> Result<(), DpfError> {
        self.handle
            .server()
            .upload(
                Call::Field(FieldCall::SetData { obj: self.handle.id() }),
                &Payload::Bytes(bytes.to_vec()),
                opts,
            )?
            .into_unit()
    }

    pub fn data_bytes(&self) -> Result<Vec<u8>, DpfError> {
        self.data_bytes_with(&mut TransferOptions::new())
    }

    pub fn data_bytes_with(&self, opts: &mut TransferOptions<'_>) -> Result<Vec<u8>, DpfError> {
        self.handle
            .server()
            .download(Call::Field(FieldCall::GetData { obj: self.handle.id() }), opts)?
            .into_bytes()
    }

    fn check_type<T: Pod>(&self) -> Result<(), DpfError> {
        let unit = self.unitary_size()?;
        if unit == size_of::<T>() {
            Ok(())
        } else {
            Err(DpfError::TypeMismatch(format!(
                "field stores {unit}-byte values, {} is {} bytes",
                std::any::type_name::<T>(),
                size_of::<T>()
            )))
        }
    }

    pub fn set_data<T: Pod>(&self, values: &[T]) -> Result<(), DpfError> {
        self.check_type::<T>()?;
        self.set_data_bytes(bytemuck::cast_slice(values))
    }

    /// Values reinterpreted as `T`.
    ///
    /// # Errors
    /// `TypeMismatch` when `T` does not have the field's unitary size.
    pub fn data<T: Pod>(&self) -> Result<Vec<T>, DpfError> {
        self.check_type::<T>()?;
        pod_from_bytes(&self.data_bytes()?)
    }

    pub fn entity_data<T: Pod>(&self, index: usize) -> Result<Vec<T>, DpfError> {
        self.check_type::<T>()?;
        let bytes = self
            .handle
            .call(Call::Field(FieldCall::EntityDataByIndex {
                obj: self.handle.id(),
                index: to_i32(index)?,
            }))?
            .into_payload()?
            .into_bytes()?;
        pod_from_bytes(&bytes)
    }

    pub fn push_back<T: Pod>(&self, id: i32, values: &[T]) -> Result<(), DpfError> {
        self.check_type::<T>()?;
        self.handle
            .call(Call::Field(FieldCall::PushBack {
                obj: self.handle.id(),
                id,
                data: Payload::Bytes(bytemuck::cast_slice(values).to_vec()),
            }))?
            .into_unit()
    }
}

/// Copy into a properly aligned `Vec<T>`.
fn pod_from_bytes<T: Pod>(bytes: &[u8]) -> Result<Vec<T>, DpfError> {
    let unit = size_of::<T>().max(1);
    if bytes.len() % unit != 0 {
        return Err(DpfError::protocol(format!(
            "{} bytes is not a whole number of {unit}-byte values",
            bytes.len()
        )));
    }
    let mut out = vec![T::zeroed(); bytes.len() / unit];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(bytes);
    Ok(out)
}
