//! Scoping: ordered integer ids with a location tag.
//!
//! Ids move through the chunked codec. Mapping an external scoping onto this
//! one uses a client-side `id -> index` table built on first use and
//! dropped whenever this handle mutates the ids.

use super::location::Location;
use crate::codec::Payload;
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, ObjectHandle};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, OutputKind, ScopingCall};
use crate::transport::TransferOptions;
use hashbrown::HashMap;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;

pub struct Scoping {
    handle: ObjectHandle,
    index_cache: Mutex<Option<Arc<HashMap<i32, usize>>>>,
}

impl fmt::Debug for Scoping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scoping").field("handle", &self.handle).finish()
    }
}

impl DpfObject for Scoping {
    fn accepts(kind: EntityKind) -> bool {
        kind == EntityKind::Scoping
    }

    fn output_kind() -> OutputKind {
        OutputKind::Object(EntityKind::Scoping)
    }

    fn wrap(handle: ObjectHandle) -> Self {
        Self {
            handle,
            index_cache: Mutex::new(None),
        }
    }

    fn handle(&self) -> &ObjectHandle {
        &self.handle
    }
}

impl Scoping {
    /// Empty scoping; `None` keeps the engine's default location.
    pub fn new(location: Option<Location>, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        let handle = ObjectHandle::create(
            &server,
            Call::Scoping(ScopingCall::New {
                location: location.map(|l| l.as_str().to_string()),
            }),
        )?;
        Ok(Self::wrap(handle))
    }

    /// New scoping holding `ids`.
    pub fn from_ids(ids: &[i32], location: Location, server: Option<&Server>) -> Result<Self, DpfError> {
        let s = Self::new(Some(location), server)?;
        s.set_ids(ids)?;
        Ok(s)
    }

    fn id(&self) -> crate::transport::call::ObjectId {
        self.handle.id()
    }

    fn invalidate(&self) {
        *self.index_cache.lock() = None;
    }

    /// Replace the ids (chunked upload).
    pub fn set_ids(&self, ids: &[i32]) -> Result<(), DpfError> {
        self.set_ids_with(ids, &mut TransferOptions::new())
    }

    pub fn set_ids_with(&self, ids: &[i32], opts: &mut TransferOptions<'_>) -> Result<(), DpfError> {
        self.invalidate();
        self.handle
            .server()
            .upload(
                Call::Scoping(ScopingCall::SetIds { obj: self.id() }),
                &Payload::Int(ids.to_vec()),
                opts,
            )?
            .into_unit()
    }

    /// All ids in order (chunked download).
    pub fn ids(&self) -> Result<Vec<i32>, DpfError> {
        self.ids_with(&mut TransferOptions::new())
    }

    pub fn ids_with(&self, opts: &mut TransferOptions<'_>) -> Result<Vec<i32>, DpfError> {
        self.handle
            .server()
            .download(Call::Scoping(ScopingCall::GetIds { obj: self.id() }), opts)?
            .into_ints()
    }

    pub fn size(&self) -> Result<usize, DpfError> {
        self.handle
            .call(Call::Scoping(ScopingCall::Size { obj: self.id() }))?
            .into_count()
    }

    pub fn location(&self) -> Result<Location, DpfError> {
        let s = self
            .handle
            .call(Call::Scoping(ScopingCall::Location { obj: self.id() }))?
            .into_text()?;
        Ok(Location::from(s.as_str()))
    }

    pub fn set_location(&self, location: Location) -> Result<(), DpfError> {
        self.handle
            .call(Call::Scoping(ScopingCall::SetLocation {
                obj: self.id(),
                location: location.as_str().to_string(),
            }))?
            .into_unit()
    }

    /// # Errors
    /// `OutOfRange` for an index outside `0..size`.
    pub fn id_by_index(&self, index: usize) -> Result<i32, DpfError> {
        let index = to_i32(index)?;
        let id = self
            .handle
            .call(Call::Scoping(ScopingCall::IdByIndex { obj: self.id(), index }))?
            .into_int()?;
        reply_i32(id)
    }

    /// Position of `id`, or `-1` when absent.
    pub fn index_by_id(&self, id: i32) -> Result<i32, DpfError> {
        let i = self
            .handle
            .call(Call::Scoping(ScopingCall::IndexById { obj: self.id(), id }))?
            .into_int()?;
        reply_i32(i)
    }

    pub fn resize(&self, size: usize) -> Result<(), DpfError> {
        self.invalidate();
        self.handle
            .call(Call::Scoping(ScopingCall::Resize { obj: self.id(), size: to_i32(size)? }))?
            .into_unit()
    }

    pub fn reserve(&self, size: usize) -> Result<(), DpfError> {
        self.handle
            .call(Call::Scoping(ScopingCall::Reserve { obj: self.id(), size: to_i32(size)? }))?
            .into_unit()
    }

    /// Write `id` at `index`, growing the scoping when `index == size`.
    pub fn set_entity(&self, id: i32, index: usize) -> Result<(), DpfError> {
        self.invalidate();
        self.handle
            .call(Call::Scoping(ScopingCall::SetEntity {
                obj: self.id(),
                id,
                index: to_i32(index)?,
            }))?
            .into_unit()
    }

    /// Engine-side hash of the ids.
    pub fn hash(&self) -> Result<i64, DpfError> {
        self.handle
            .call(Call::Scoping(ScopingCall::Hash { obj: self.id() }))?
            .into_int()
    }

    fn index_map(&self) -> Result<Arc<HashMap<i32, usize>>, DpfError> {
        if let Some(m) = self.index_cache.lock().as_ref() {
            return Ok(m.clone());
        }
        let ids = self.ids()?;
        let mut map = HashMap::with_capacity(ids.len());
        for (i, id) in ids.into_iter().enumerate() {
            map.entry(id).or_insert(i);
        }
        let map = Arc::new(map);
        *self.index_cache.lock() = Some(map.clone());
        Ok(map)
    }

    /// Map every id of `external` onto this scoping.
    ///
    /// Returns the indices of the ids found (in `external` order) and a mask
    /// with one entry per external id, `false` where the id is absent.
    pub fn map_external(&self, external: &Scoping) -> Result<(Vec<usize>, Vec<bool>), DpfError> {
        let map = self.index_map()?;
        let ext = external.ids()?;
        let mut indices = Vec::with_capacity(ext.len());
        let mut mask = Vec::with_capacity(ext.len());
        for id in ext {
            match map.get(&id) {
                Some(&i) => {
                    indices.push(i);
                    mask.push(true);
                }
                None => mask.push(false),
            }
        }
        Ok((indices, mask))
    }

    /// Explicit copy onto another backend.
    pub fn copy_to(&self, server: &Server) -> Result<Scoping, DpfError> {
        let copy = Scoping::new(Some(self.location()?), Some(server))?;
        copy.set_ids(&self.ids()?)?;
        Ok(copy)
    }
}

pub(crate) fn to_i32(n: usize) -> Result<i32, DpfError> {
    i32::try_from(n).map_err(|_| DpfError::OutOfRange(format!("{n} does not fit in int32")))
}

fn reply_i32(v: i64) -> Result<i32, DpfError> {
    i32::try_from(v).map_err(|_| DpfError::protocol(format!("engine replied {v}, outside int32")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_outside_int32_are_protocol_errors() {
        assert_eq!(reply_i32(-1).unwrap(), -1);
        assert_eq!(reply_i32(i64::from(i32::MAX)).unwrap(), i32::MAX);
        let err = reply_i32(i64::from(i32::MAX) + 1).unwrap_err();
        assert!(matches!(err, DpfError::Transport { .. }), "{err:?}");
    }
}
