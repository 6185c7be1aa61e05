//! Collections of entries keyed by label-spaces.
//!
//! `add_entry` is an upsert keyed by the full label-space: an existing entry
//! with exactly the same bindings is replaced in place, otherwise the entry
//! is appended. `push_back_entry` always appends, even for a duplicate
//! label-space. `set_entry_by_index` replaces the entry at a position.
//! Insertion order is preserved for index-based access and for queries.

pub mod label_space;
pub mod primitive;

pub use label_space::LabelSpace;
pub use primitive::{CollectionOfDouble, CollectionOfInt, CollectionOfString, PrimitiveEntry};

use crate::any::Any;
use crate::data::scoping::to_i32;
use crate::data::{Field, PropertyField, Scoping, StringField};
use crate::dpf_error::{DpfError, none_if_not_found};
use crate::handle::{DpfObject, ObjectHandle, ensure_on};
use crate::mesh::MeshedRegion;
use crate::server::{self, Server};
use crate::support::Support;
use crate::transport::call::{
    Call, CollectionCall, EntityKind, EntryKind, EntryValue, ObjectId, OutputKind, Value,
};
use std::fmt;
use std::marker::PhantomData;

/// Type storable in a [`Collection`].
pub trait CollectionEntry: Sized {
    const ENTRY: EntryKind;

    /// Wire form of the entry, checked against the collection's backend.
    fn to_entry(&self, server: &Server) -> Result<EntryValue, DpfError>;

    fn from_value(value: Value, server: &Server) -> Result<Self, DpfError>;
}

macro_rules! object_entry {
    ($ty:ty, $entry:expr) => {
        impl CollectionEntry for $ty {
            const ENTRY: EntryKind = $entry;

            fn to_entry(&self, server: &Server) -> Result<EntryValue, DpfError> {
                ensure_on(server, self.handle())?;
                Ok(EntryValue::Object(self.object_id()))
            }

            fn from_value(value: Value, server: &Server) -> Result<Self, DpfError> {
                <$ty as $crate::handle::FromOutput>::from_value(value, server)
            }
        }
    };
}

object_entry!(Field, EntryKind::Field);
object_entry!(PropertyField, EntryKind::PropertyField);
object_entry!(StringField, EntryKind::StringField);
object_entry!(Scoping, EntryKind::Scoping);
object_entry!(MeshedRegion, EntryKind::MeshedRegion);
object_entry!(Any, EntryKind::Any);

/// Label-indexed collection of `T`.
pub struct Collection<T: CollectionEntry> {
    handle: ObjectHandle,
    _entries: PhantomData<T>,
}

pub type FieldsContainer = Collection<Field>;
pub type PropertyFieldsContainer = Collection<PropertyField>;
pub type StringFieldsContainer = Collection<StringField>;
pub type ScopingsContainer = Collection<Scoping>;
pub type MeshesContainer = Collection<MeshedRegion>;
pub type AnyCollection = Collection<Any>;

impl<T: CollectionEntry> fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("entry", &T::ENTRY)
            .field("handle", &self.handle)
            .finish()
    }
}

impl<T: CollectionEntry> DpfObject for Collection<T> {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Collection(T::ENTRY)
    }

    fn output_kind() -> OutputKind {
        OutputKind::Object(EntityKind::Collection(T::ENTRY))
    }

    fn wrap(handle: ObjectHandle) -> Self {
        Self {
            handle,
            _entries: PhantomData,
        }
    }

    fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl<T: CollectionEntry> Collection<T> {
    pub fn new(server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        let handle = ObjectHandle::create(&server, Call::Collection(CollectionCall::New { entry: T::ENTRY }))?;
        Ok(Self::wrap(handle))
    }

    fn id(&self) -> ObjectId {
        self.handle.id()
    }

    fn call(&self, call: CollectionCall) -> Result<crate::transport::call::Reply, DpfError> {
        self.handle.call(Call::Collection(call))
    }

    /// Declare a label; `default` fills it on entries that omit it.
    pub fn add_label(&self, label: &str, default: Option<i32>) -> Result<(), DpfError> {
        self.call(CollectionCall::AddLabel {
            obj: self.id(),
            label: label.to_string(),
            default,
        })?
        .into_unit()
    }

    pub fn labels(&self) -> Result<Vec<String>, DpfError> {
        self.call(CollectionCall::Labels { obj: self.id() })?.into_strings()
    }

    pub fn has_label(&self, label: &str) -> Result<bool, DpfError> {
        Ok(self.labels()?.iter().any(|l| l == label))
    }

    /// Upsert keyed by the full label-space.
    ///
    /// # Errors
    /// `InvalidArgument` for an undeclared label or a missing label without
    /// default.
    pub fn add_entry(&self, label_space: &LabelSpace, entry: &T) -> Result<(), DpfError> {
        let entry = entry.to_entry(self.handle.server())?;
        self.call(CollectionCall::AddEntry {
            obj: self.id(),
            label_space: label_space.clone(),
            entry,
        })?
        .into_unit()
    }

    /// Append, keeping any existing entry with the same label-space.
    pub fn push_back_entry(&self, label_space: &LabelSpace, entry: &T) -> Result<(), DpfError> {
        let entry = entry.to_entry(self.handle.server())?;
        self.call(CollectionCall::PushBackEntry {
            obj: self.id(),
            label_space: label_space.clone(),
            entry,
        })?
        .into_unit()
    }

    /// Replace the entry at `index`, keeping its label-space.
    pub fn set_entry_by_index(&self, index: usize, entry: &T) -> Result<(), DpfError> {
        let entry = entry.to_entry(self.handle.server())?;
        self.call(CollectionCall::SetEntryByIndex {
            obj: self.id(),
            index: to_i32(index)?,
            entry,
        })?
        .into_unit()
    }

    /// The single entry matching `label_space`.
    ///
    /// # Errors
    /// `NotFound` when nothing matches, `InvalidArgument` when several do.
    pub fn get_obj(&self, label_space: &LabelSpace) -> Result<T, DpfError> {
        let v = self
            .call(CollectionCall::GetEntry {
                obj: self.id(),
                label_space: label_space.clone(),
            })?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }

    pub fn get_obj_by_index(&self, index: usize) -> Result<T, DpfError> {
        let v = self
            .call(CollectionCall::GetEntryByIndex {
                obj: self.id(),
                index: to_i32(index)?,
            })?
            .into_value()?;
        T::from_value(v, self.handle.server())
    }

    /// Every entry matching the sub-space, in insertion order.
    pub fn get_objs_for_label_space(&self, label_space: &LabelSpace) -> Result<Vec<T>, DpfError> {
        let server = self.handle.server();
        self.call(CollectionCall::GetEntries {
            obj: self.id(),
            label_space: label_space.clone(),
        })?
        .into_values()?
        .into_iter()
        .map(|v| T::from_value(v, server))
        .collect()
    }

    pub fn get_num_obj_for_label_space(&self, label_space: &LabelSpace) -> Result<usize, DpfError> {
        self.call(CollectionCall::CountEntries {
            obj: self.id(),
            label_space: label_space.clone(),
        })?
        .into_count()
    }

    pub fn get_label_space(&self, index: usize) -> Result<LabelSpace, DpfError> {
        self.call(CollectionCall::LabelSpaceByIndex {
            obj: self.id(),
            index: to_i32(index)?,
        })?
        .into_label_space()
    }

    /// Distinct values taken by `label`, in first-seen order.
    pub fn get_label_scoping(&self, label: &str) -> Result<Scoping, DpfError> {
        let raw = self
            .call(CollectionCall::LabelScoping {
                obj: self.id(),
                label: label.to_string(),
            })?
            .into_object()?;
        Scoping::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    pub fn size(&self) -> Result<usize, DpfError> {
        self.call(CollectionCall::Size { obj: self.id() })?.into_count()
    }

    pub fn is_empty(&self) -> Result<bool, DpfError> {
        Ok(self.size()? == 0)
    }

    pub fn reserve(&self, n: usize) -> Result<(), DpfError> {
        self.call(CollectionCall::Reserve {
            obj: self.id(),
            size: to_i32(n)?,
        })?
        .into_unit()
    }

    /// Truncate, or grow with default-constructed entries.
    pub fn resize(&self, n: usize) -> Result<(), DpfError> {
        self.call(CollectionCall::Resize {
            obj: self.id(),
            size: to_i32(n)?,
        })?
        .into_unit()
    }

    /// Support attached to `label`, if any.
    pub fn get_support(&self, label: &str) -> Result<Option<Support>, DpfError> {
        let raw = self
            .call(CollectionCall::Support {
                obj: self.id(),
                label: label.to_string(),
            })
            .and_then(|r| r.into_object());
        match none_if_not_found(raw)? {
            Some(raw) => Support::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone())).map(Some),
            None => Ok(None),
        }
    }

    pub fn set_support(&self, label: &str, support: &Support) -> Result<(), DpfError> {
        self.handle.ensure_same_server(support.handle())?;
        self.call(CollectionCall::SetSupport {
            obj: self.id(),
            label: label.to_string(),
            support: support.handle().id(),
        })?
        .into_unit()
    }
}

impl FieldsContainer {
    /// Declare `time` and add one field per time set, keyed `{time: i + 1}`.
    pub fn from_time_series(fields: &[Field], server: Option<&Server>) -> Result<Self, DpfError> {
        let fc = Self::new(server)?;
        fc.add_label("time", None)?;
        for (i, f) in fields.iter().enumerate() {
            fc.add_entry(&LabelSpace::from([("time", to_i32(i + 1)?)]), f)?;
        }
        Ok(fc)
    }

    /// Field at time set `time` (1-based) among entries matching `extra`.
    pub fn field_at_time(&self, time: i32, extra: &LabelSpace) -> Result<Field, DpfError> {
        self.get_obj(&extra.clone().with("time", time))
    }
}
