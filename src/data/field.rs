//! Numeric fields and the operations shared by every field flavour.
//!
//! [`TypedField<T>`] covers `f64` ([`Field`]) and `i32` ([`PropertyField`]).
//! String and custom-type fields live in sibling modules and reuse the
//! [`FieldBase`] defaults.

use super::field_definition::{FieldDefinition, FieldDefinitionData};
use super::field_info::{FieldInfo, FieldValueKind};
use super::location::{Dimensionality, Location};
use super::scoping::{Scoping, to_i32};
use crate::codec::Payload;
use crate::dpf_error::{DpfError, none_if_not_found};
use crate::handle::{DpfObject, ObjectHandle, ensure_on};
use crate::server::{self, Server};
use crate::support::Support;
use crate::transport::call::{Call, EntityKind, FieldCall, OutputKind};
use crate::transport::TransferOptions;
use std::fmt;
use std::marker::PhantomData;

/// Operations common to all field kinds.
pub trait FieldBase: DpfObject {
    fn info(&self) -> Result<FieldInfo, DpfError> {
        let h = self.handle();
        h.call(Call::Field(FieldCall::Info { obj: h.id() }))?.into_field_info()
    }

    fn n_components(&self) -> Result<usize, DpfError> {
        Ok(self.info()?.n_components)
    }

    /// Number of stored values.
    fn data_size(&self) -> Result<usize, DpfError> {
        Ok(self.info()?.data_size)
    }

    /// Number of entities in the scoping.
    fn size(&self) -> Result<usize, DpfError> {
        Ok(self.info()?.size)
    }

    fn n_elementary_data(&self) -> Result<usize, DpfError> {
        Ok(self.info()?.n_elementary_data())
    }

    /// Per-entity offsets, `None` for fixed-width fields.
    fn data_pointer(&self) -> Result<Option<Vec<i32>>, DpfError> {
        if !self.info()?.has_data_pointer {
            return Ok(None);
        }
        let h = self.handle();
        let dp = h
            .server()
            .download(Call::Field(FieldCall::GetDataPointer { obj: h.id() }), &mut TransferOptions::new())?
            .into_ints()?;
        Ok(Some(dp))
    }

    /// Install per-entity offsets: entity `i` covers `data[dp[i]..dp[i+1]]`.
    fn set_data_pointer(&self, dp: &[i32]) -> Result<(), DpfError> {
        let h = self.handle();
        h.server()
            .upload(
                Call::Field(FieldCall::SetDataPointer { obj: h.id() }),
                &Payload::Int(dp.to_vec()),
                &mut TransferOptions::new(),
            )?
            .into_unit()
    }

    fn scoping(&self) -> Result<Scoping, DpfError> {
        let h = self.handle();
        let raw = h.call(Call::Field(FieldCall::Scoping { obj: h.id() }))?.into_object()?;
        Scoping::from_handle(ObjectHandle::from_raw(raw, h.server().clone()))
    }

    fn set_scoping(&self, scoping: &Scoping) -> Result<(), DpfError> {
        let h = self.handle();
        h.ensure_same_server(scoping.handle())?;
        h.call(Call::Field(FieldCall::SetScoping {
            obj: h.id(),
            scoping: scoping.object_id(),
        }))?
        .into_unit()
    }

    /// Mesh or time-frequency support, if any.
    fn support(&self) -> Result<Option<Support>, DpfError> {
        let h = self.handle();
        let raw = h.call(Call::Field(FieldCall::Support { obj: h.id() })).and_then(|r| r.into_object());
        match none_if_not_found(raw)? {
            Some(raw) => Support::from_handle(ObjectHandle::from_raw(raw, h.server().clone())).map(Some),
            None => Ok(None),
        }
    }

    fn set_support(&self, support: &Support) -> Result<(), DpfError> {
        let h = self.handle();
        h.ensure_same_server(support.handle())?;
        h.call(Call::Field(FieldCall::SetSupport {
            obj: h.id(),
            support: support.handle().id(),
        }))?
        .into_unit()
    }

    /// Copy of the definition as an engine object.
    fn field_definition(&self) -> Result<FieldDefinition, DpfError> {
        let h = self.handle();
        let raw = h.call(Call::Field(FieldCall::Definition { obj: h.id() }))?.into_object()?;
        FieldDefinition::from_handle(ObjectHandle::from_raw(raw, h.server().clone()))
    }

    fn set_field_definition(&self, definition: &FieldDefinition) -> Result<(), DpfError> {
        let h = self.handle();
        h.ensure_same_server(definition.handle())?;
        h.call(Call::Field(FieldCall::SetDefinition {
            obj: h.id(),
            definition: definition.object_id(),
        }))?
        .into_unit()
    }

    fn definition_data(&self) -> Result<FieldDefinitionData, DpfError> {
        let h = self.handle();
        h.call(Call::Field(FieldCall::DefinitionData { obj: h.id() }))?
            .into_field_definition()
    }

    fn update_definition(&self, f: impl FnOnce(&mut FieldDefinitionData)) -> Result<(), DpfError> {
        let mut def = self.definition_data()?;
        f(&mut def);
        let h = self.handle();
        h.call(Call::Field(FieldCall::UpdateDefinition {
            obj: h.id(),
            definition: def,
        }))?
        .into_unit()
    }

    fn location(&self) -> Result<Location, DpfError> {
        Ok(self.definition_data()?.location)
    }

    fn unit(&self) -> Result<String, DpfError> {
        Ok(self.definition_data()?.unit)
    }

    fn set_unit(&self, unit: &str) -> Result<(), DpfError> {
        self.update_definition(|d| d.unit = unit.to_string())
    }

    fn name(&self) -> Result<String, DpfError> {
        Ok(self.definition_data()?.name)
    }

    fn set_name(&self, name: &str) -> Result<(), DpfError> {
        self.update_definition(|d| d.name = name.to_string())
    }

    fn dimensionality(&self) -> Result<Dimensionality, DpfError> {
        Ok(self.definition_data()?.dimensionality)
    }

    /// Resize data to `data_size` values and the scoping to `scoping_size` ids.
    fn resize(&self, data_size: usize, scoping_size: usize) -> Result<(), DpfError> {
        let h = self.handle();
        h.call(Call::Field(FieldCall::Resize {
            obj: h.id(),
            data_size: to_i32(data_size)?,
            scoping_size: to_i32(scoping_size)?,
        }))?
        .into_unit()
    }
}

/// Element type of a numeric field.
pub trait FieldScalar: Copy + PartialEq + fmt::Debug + Send + Sync + 'static {
    const VALUE_KIND: FieldValueKind;
    const ENTITY: EntityKind;

    fn into_payload(values: Vec<Self>) -> Payload;

    fn from_payload(payload: Payload) -> Result<Vec<Self>, DpfError>;
}

impl FieldScalar for f64 {
    const VALUE_KIND: FieldValueKind = FieldValueKind::Double;
    const ENTITY: EntityKind = EntityKind::Field;

    fn into_payload(values: Vec<Self>) -> Payload {
        Payload::Double(values)
    }

    fn from_payload(payload: Payload) -> Result<Vec<Self>, DpfError> {
        payload.into_doubles()
    }
}

impl FieldScalar for i32 {
    const VALUE_KIND: FieldValueKind = FieldValueKind::Int;
    const ENTITY: EntityKind = EntityKind::PropertyField;

    fn into_payload(values: Vec<Self>) -> Payload {
        Payload::Int(values)
    }

    fn from_payload(payload: Payload) -> Result<Vec<Self>, DpfError> {
        payload.into_ints()
    }
}

/// Field of `T` values.
pub struct TypedField<T: FieldScalar> {
    handle: ObjectHandle,
    _values: PhantomData<T>,
}

/// Float64 field.
pub type Field = TypedField<f64>;
/// Int32 field (ids, connectivity, element types, ...).
pub type PropertyField = TypedField<i32>;

impl<T: FieldScalar> fmt::Debug for TypedField<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedField")
            .field("kind", &T::VALUE_KIND)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<T: FieldScalar> DpfObject for TypedField<T> {
    fn accepts(kind: EntityKind) -> bool {
        kind == T::ENTITY
    }

    fn output_kind() -> OutputKind {
        OutputKind::Object(T::ENTITY)
    }

    fn wrap(handle: ObjectHandle) -> Self {
        Self {
            handle,
            _values: PhantomData,
        }
    }

    fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl<T: FieldScalar> FieldBase for TypedField<T> {}

impl<T: FieldScalar> TypedField<T> {
    /// Empty field pre-sized for `n_entities`.
    pub fn new(n_entities: usize, definition: FieldDefinitionData, server: Option<&Server>) -> Result<Self, DpfError> {
        definition.dimensionality.validate()?;
        let server = server::resolve(server)?;
        let handle = ObjectHandle::create(
            &server,
            Call::Field(FieldCall::New {
                value_kind: T::VALUE_KIND,
                n_entities: to_i32(n_entities)?,
                definition,
            }),
        )?;
        Ok(Self::wrap(handle))
    }

    pub fn scalar(n_entities: usize, location: Location, server: Option<&Server>) -> Result<Self, DpfError> {
        Self::new(n_entities, FieldDefinitionData::new(location, Dimensionality::scalar()), server)
    }

    pub fn vector(n_entities: usize, n_components: u32, location: Location, server: Option<&Server>) -> Result<Self, DpfError> {
        Self::new(
            n_entities,
            FieldDefinitionData::new(location, Dimensionality::vector(n_components)),
            server,
        )
    }

    /// All values, entity-major.
    pub fn data(&self) -> Result<Vec<T>, DpfError> {
        self.data_with(&mut TransferOptions::new())
    }

    pub fn data_with(&self, opts: &mut TransferOptions<'_>) -> Result<Vec<T>, DpfError> {
        let p = self
            .handle
            .server()
            .download(Call::Field(FieldCall::GetData { obj: self.handle.id() }), opts)?;
        T::from_payload(p)
    }

    /// # Errors
    /// `InvalidArgument` when a fixed-width field receives a length that is
    /// not a multiple of its component count.
    pub fn set_data(&self, values: &[T]) -> Result<(), DpfError> {
        self.set_data_with(values, &mut TransferOptions::new())
    }

    pub fn set_data_with(&self, values: &[T], opts: &mut TransferOptions<'_>) -> Result<(), DpfError> {
        self.handle
            .server()
            .upload(
                Call::Field(FieldCall::SetData { obj: self.handle.id() }),
                &T::into_payload(values.to_vec()),
                opts,
            )?
            .into_unit()
    }

    /// Values of the entity at `index`.
    ///
    /// # Errors
    /// `OutOfRange` for a bad index; `InvariantViolation` when the entity
    /// width cannot be derived without a data pointer.
    pub fn entity_data(&self, index: usize) -> Result<Vec<T>, DpfError> {
        let p = self
            .handle
            .call(Call::Field(FieldCall::EntityDataByIndex {
                obj: self.handle.id(),
                index: to_i32(index)?,
            }))?
            .into_payload()?;
        T::from_payload(p)
    }

    /// Values of the entity with scoping id `id`.
    pub fn entity_data_by_id(&self, id: i32) -> Result<Vec<T>, DpfError> {
        let p = self
            .handle
            .call(Call::Field(FieldCall::EntityDataById { obj: self.handle.id(), id }))?
            .into_payload()?;
        T::from_payload(p)
    }

    /// Append one entity with id `id` and `values`.
    pub fn push_back(&self, id: i32, values: &[T]) -> Result<(), DpfError> {
        self.handle
            .call(Call::Field(FieldCall::PushBack {
                obj: self.handle.id(),
                id,
                data: T::into_payload(values.to_vec()),
            }))?
            .into_unit()
    }

    /// Explicit copy (definition, scoping, data, data pointer) onto another backend.
    pub fn copy_to(&self, server: &Server) -> Result<Self, DpfError> {
        let info = self.info()?;
        let copy = Self::new(info.size, self.definition_data()?, Some(server))?;
        let scoping = self.scoping()?.copy_to(server)?;
        copy.set_scoping(&scoping)?;
        copy.set_data(&self.data()?)?;
        if let Some(dp) = self.data_pointer()? {
            copy.set_data_pointer(&dp)?;
        }
        Ok(copy)
    }

    /// `InvalidArgument` unless the field lives on `server`.
    pub fn ensure_on(&self, server: &Server) -> Result<(), DpfError> {
        ensure_on(server, &self.handle)
    }
}
