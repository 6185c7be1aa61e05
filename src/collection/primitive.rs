//! Collections of inline scalars with bulk set/get.

use super::{Collection, CollectionEntry};
use crate::codec::Payload;
use crate::dpf_error::DpfError;
use crate::server::Server;
use crate::transport::call::{Call, CollectionCall, EntryKind, EntryValue, Primitive, Value};
use crate::transport::TransferOptions;

pub type CollectionOfInt = Collection<i32>;
pub type CollectionOfDouble = Collection<f64>;
pub type CollectionOfString = Collection<String>;

/// Scalar stored inline in a collection.
pub trait PrimitiveEntry: CollectionEntry {
    fn into_payload(values: Vec<Self>) -> Payload;

    fn from_payload(payload: Payload) -> Result<Vec<Self>, DpfError>;
}

macro_rules! primitive_entry {
    ($ty:ty, $entry:ident, $variant:ident, $payload:ident, $into:ident) => {
        impl CollectionEntry for $ty {
            const ENTRY: EntryKind = EntryKind::$entry;

            fn to_entry(&self, _server: &Server) -> Result<EntryValue, DpfError> {
                Ok(EntryValue::Primitive(Primitive::$variant(self.clone())))
            }

            fn from_value(value: Value, _server: &Server) -> Result<Self, DpfError> {
                match value {
                    Value::Primitive(Primitive::$variant(v)) => Ok(v),
                    other => Err(DpfError::TypeMismatch(format!(
                        "expected {:?} entry, got {}",
                        EntryKind::$entry,
                        other.kind()
                    ))),
                }
            }
        }

        impl PrimitiveEntry for $ty {
            fn into_payload(values: Vec<Self>) -> Payload {
                Payload::$payload(values)
            }

            fn from_payload(payload: Payload) -> Result<Vec<Self>, DpfError> {
                payload.$into()
            }
        }
    };
}

primitive_entry!(i32, Int, Int, Int, into_ints);
primitive_entry!(f64, Double, Double, Double, into_doubles);
primitive_entry!(String, String, String, Strings, into_strings);

impl<T: PrimitiveEntry> Collection<T> {
    /// Replace all values in one chunked upload.
    ///
    /// Entries keep their label-spaces, so a labelled collection must
    /// receive exactly `size()` values; an unlabelled one is resized.
    pub fn set_values(&self, values: Vec<T>) -> Result<(), DpfError> {
        self.set_values_with(values, &mut TransferOptions::new())
    }

    pub fn set_values_with(&self, values: Vec<T>, opts: &mut TransferOptions<'_>) -> Result<(), DpfError> {
        self.handle
            .server()
            .upload(
                Call::Collection(CollectionCall::SetPrimitives { obj: self.handle.id() }),
                &T::into_payload(values),
                opts,
            )?
            .into_unit()
    }

    /// All values in entry order.
    pub fn values(&self) -> Result<Vec<T>, DpfError> {
        self.values_with(&mut TransferOptions::new())
    }

    pub fn values_with(&self, opts: &mut TransferOptions<'_>) -> Result<Vec<T>, DpfError> {
        let p = self
            .handle
            .server()
            .download(Call::Collection(CollectionCall::GetPrimitives { obj: self.handle.id() }), opts)?;
        T::from_payload(p)
    }
}
