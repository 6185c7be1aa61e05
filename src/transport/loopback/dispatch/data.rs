//! Scopings, fields, collections and the small key/value containers.

use super::{count, index, needs_stream, require_kind, size_arg, with, wrong_stream};
use crate::codec::Payload;
use crate::collection::label_space::LabelSpace;
use crate::data::field_definition::FieldDefinitionData;
use crate::data::field_info::FieldValueKind;
use crate::data::location::{Dimensionality, Location};
use crate::dpf_error::EngineFailure;
use crate::transport::call::{
    AnyCall, Call, CollectionCall, ContainerCall, DataTreeCall, EntityKind, EntryKind, EntryValue, FieldCall,
    FieldDefinitionCall, Primitive, Reply, ScopingCall, Value,
};
use crate::transport::loopback::EngineCore;
use crate::transport::loopback::store::{
    CollectionData, EngineObject, EngineResult, EngineValue, FieldData, MeshData, ScopingData, kind_of, wrong_kind,
};
use std::collections::BTreeMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

fn check_dimensionality(definition: &FieldDefinitionData) -> EngineResult<()> {
    definition
        .dimensionality
        .validate()
        .map_err(|e| EngineFailure::invalid(e.to_string()))
}

fn to_offset(n: usize) -> EngineResult<i32> {
    i32::try_from(n).map_err(|_| EngineFailure::invalid(format!("{n} values do not fit a data pointer")))
}

/// Default-constructed entry of a grown collection.
fn default_entry(kind: EntryKind) -> EngineValue {
    let field = |value_kind: FieldValueKind| -> EngineValue {
        EngineObject::Field(FieldData::new(
            value_kind,
            FieldDefinitionData::new(Location::Nodal, Dimensionality::scalar()),
        ))
        .into()
    };
    match kind {
        EntryKind::Int => Primitive::Int(0).into(),
        EntryKind::Double => Primitive::Double(0.0).into(),
        EntryKind::String => Primitive::String(String::new()).into(),
        EntryKind::Field => field(FieldValueKind::Double),
        EntryKind::PropertyField => field(FieldValueKind::Int),
        EntryKind::StringField => field(FieldValueKind::String),
        EntryKind::Scoping => EngineObject::Scoping(ScopingData::new(Location::Nodal.as_str(), Vec::new())).into(),
        EntryKind::MeshedRegion => EngineObject::Mesh(MeshData::default()).into(),
        EntryKind::Any => EngineObject::Any(Primitive::Int(0).into()).into(),
    }
}

impl EngineCore {
    pub(in crate::transport::loopback) fn scoping(&self, call: ScopingCall) -> EngineResult<Reply> {
        match call {
            ScopingCall::New { location } => {
                let location = location.unwrap_or_else(|| Location::Nodal.as_str().to_string());
                Ok(self.register(EngineObject::Scoping(ScopingData::new(location, Vec::new()))))
            }
            ScopingCall::Size { obj } => with!(self.obj(obj)?, Scoping, "a scoping", |s| Ok(count(s.ids.len()))),
            ScopingCall::Location { obj } => {
                with!(self.obj(obj)?, Scoping, "a scoping", |s| Ok(Reply::Text(s.location.clone())))
            }
            ScopingCall::SetLocation { obj, location } => with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                s.location = location;
                Ok(Reply::Unit)
            }),
            ScopingCall::IdByIndex { obj, index: i } => with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                index(i, s.ids.len(), "scoping").map(|i| Reply::Int(i64::from(s.ids[i])))
            }),
            ScopingCall::IndexById { obj, id } => with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                Ok(Reply::Int(s.ids.iter().position(|&x| x == id).map_or(-1, |p| p as i64)))
            }),
            ScopingCall::Resize { obj, size } => {
                let n = size_arg(size)?;
                with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                    s.ids.resize(n, 0);
                    Ok(Reply::Unit)
                })
            }
            ScopingCall::Reserve { obj, size } => {
                let n = size_arg(size)?;
                with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                    s.ids.reserve(n);
                    Ok(Reply::Unit)
                })
            }
            ScopingCall::SetEntity { obj, id, index: i } => with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                let len = s.ids.len();
                match usize::try_from(i) {
                    Ok(i) if i < len => s.ids[i] = id,
                    Ok(i) if i == len => s.ids.push(id),
                    _ => return Err(EngineFailure::out_of_range(format!("scoping index {i} outside 0..={len}"))),
                }
                Ok(Reply::Unit)
            }),
            ScopingCall::Hash { obj } => with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                let mut h = DefaultHasher::new();
                s.location.hash(&mut h);
                s.ids.hash(&mut h);
                Ok(Reply::Int(h.finish() as i64))
            }),
            other @ (ScopingCall::SetIds { .. } | ScopingCall::GetIds { .. }) => {
                Err(needs_stream(&Call::Scoping(other)))
            }
        }
    }

    pub(in crate::transport::loopback) fn scoping_upload(&self, call: ScopingCall, payload: Payload) -> EngineResult<Reply> {
        match call {
            ScopingCall::SetIds { obj } => {
                let ids = payload.into_ints().map_err(|e| EngineFailure::type_mismatch(e.to_string()))?;
                with!(self.obj(obj)?, Scoping, "a scoping", |s| {
                    s.ids = ids;
                    Ok(Reply::Unit)
                })
            }
            other => Err(wrong_stream(&Call::Scoping(other))),
        }
    }

    pub(in crate::transport::loopback) fn scoping_download(&self, call: ScopingCall) -> EngineResult<Payload> {
        match call {
            ScopingCall::GetIds { obj } => {
                with!(self.obj(obj)?, Scoping, "a scoping", |s| Ok(Payload::Int(s.ids.clone())))
            }
            other => Err(wrong_stream(&Call::Scoping(other))),
        }
    }

    pub(in crate::transport::loopback) fn field(&self, call: FieldCall) -> EngineResult<Reply> {
        match call {
            FieldCall::New {
                value_kind,
                n_entities,
                definition,
            } => {
                check_dimensionality(&definition)?;
                if let FieldValueKind::Custom { unitary_size: 0, .. } = value_kind {
                    return Err(EngineFailure::invalid("custom field type needs a non-zero unitary size"));
                }
                let mut f = FieldData::new(value_kind, definition);
                let reserve = size_arg(n_entities)? * f.n_components();
                match &mut f.data {
                    Payload::Int(v) => v.reserve(reserve),
                    Payload::Double(v) => v.reserve(reserve),
                    _ => {}
                }
                Ok(self.register(EngineObject::Field(f)))
            }
            FieldCall::Info { obj } => with!(self.obj(obj)?, Field, "a field", |f| {
                let size = f.ids().len();
                Ok(Reply::FieldInfo(f.info(size)))
            }),
            FieldCall::EntityDataByIndex { obj, index: i } => with!(self.obj(obj)?, Field, "a field", |f| {
                let size = f.ids().len();
                let i = usize::try_from(i)
                    .map_err(|_| EngineFailure::out_of_range(format!("entity index {i} outside 0..{size}")))?;
                let range = f.entity_range(i, size)?;
                Ok(Reply::Payload(f.slice(range)))
            }),
            FieldCall::EntityDataById { obj, id } => with!(self.obj(obj)?, Field, "a field", |f| {
                let ids = f.ids();
                let i = ids
                    .iter()
                    .position(|&x| x == id)
                    .ok_or_else(|| EngineFailure::not_found(format!("no entity with id {id}")))?;
                let range = f.entity_range(i, ids.len())?;
                Ok(Reply::Payload(f.slice(range)))
            }),
            FieldCall::PushBack { obj, id, data } => with!(self.obj(obj)?, Field, "a field", |f| {
                let fixed = f.data_pointer.is_none();
                f.check_payload(&data, fixed)?;
                let nc = f.n_components();
                let units = match (&f.value_kind, &data) {
                    (FieldValueKind::Custom { unitary_size, .. }, Payload::Bytes(b)) => {
                        b.len() / (*unitary_size as usize).max(1)
                    }
                    (_, p) => p.len(),
                };
                if fixed && nc > 0 && units != nc {
                    return Err(EngineFailure::invalid(format!(
                        "entity {id} brings {units} values, expected {nc}"
                    )));
                }
                let start = to_offset(f.data_size())?;
                if let Some(dp) = &mut f.data_pointer {
                    dp.push(start);
                }
                f.append(data);
                if let EngineObject::Scoping(s) = &mut *f.scoping.lock() {
                    s.ids.push(id);
                }
                Ok(Reply::Unit)
            }),
            FieldCall::Resize {
                obj,
                data_size,
                scoping_size,
            } => {
                let (data_size, scoping_size) = (size_arg(data_size)?, size_arg(scoping_size)?);
                with!(self.obj(obj)?, Field, "a field", |f| {
                    f.resize_data(data_size);
                    if let Some(dp) = &mut f.data_pointer {
                        dp.truncate(scoping_size);
                    }
                    if let EngineObject::Scoping(s) = &mut *f.scoping.lock() {
                        s.ids.resize(scoping_size, 0);
                    }
                    Ok(Reply::Unit)
                })
            }
            FieldCall::Scoping { obj } => {
                let scoping = with!(self.obj(obj)?, Field, "a field", |f| Ok(f.scoping.clone()))?;
                Ok(self.register_shared(scoping))
            }
            FieldCall::SetScoping { obj, scoping } => {
                let field = self.obj(obj)?;
                require_kind(&field, EntityKind::is_field, "a field")?;
                let scoping = self.obj(scoping)?;
                require_kind(&scoping, |k| k == EntityKind::Scoping, "a scoping")?;
                with!(field, Field, "a field", |f| {
                    f.scoping = scoping;
                    Ok(Reply::Unit)
                })
            }
            FieldCall::Support { obj } => {
                let support = with!(self.obj(obj)?, Field, "a field", |f| {
                    f.support
                        .clone()
                        .ok_or_else(|| EngineFailure::not_found("field has no support"))
                })?;
                Ok(self.register_shared(support))
            }
            FieldCall::SetSupport { obj, support } => {
                let support = self.obj(support)?;
                require_kind(&support, EntityKind::is_support, "a support")?;
                with!(self.obj(obj)?, Field, "a field", |f| {
                    f.support = Some(support);
                    Ok(Reply::Unit)
                })
            }
            FieldCall::DefinitionData { obj } => {
                with!(self.obj(obj)?, Field, "a field", |f| Ok(Reply::FieldDefinition(f.definition.clone())))
            }
            FieldCall::UpdateDefinition { obj, definition } => {
                check_dimensionality(&definition)?;
                with!(self.obj(obj)?, Field, "a field", |f| {
                    f.definition = definition;
                    Ok(Reply::Unit)
                })
            }
            FieldCall::Definition { obj } => {
                let definition = with!(self.obj(obj)?, Field, "a field", |f| Ok(f.definition.clone()))?;
                Ok(self.register(EngineObject::FieldDefinition(definition)))
            }
            FieldCall::SetDefinition { obj, definition } => {
                let definition = with!(self.obj(definition)?, FieldDefinition, "a field definition", |d| {
                    Ok(d.clone())
                })?;
                with!(self.obj(obj)?, Field, "a field", |f| {
                    f.definition = definition;
                    Ok(Reply::Unit)
                })
            }
            other @ (FieldCall::SetData { .. }
            | FieldCall::GetData { .. }
            | FieldCall::SetDataPointer { .. }
            | FieldCall::GetDataPointer { .. }) => Err(needs_stream(&Call::Field(other))),
        }
    }

    pub(in crate::transport::loopback) fn field_upload(&self, call: FieldCall, payload: Payload) -> EngineResult<Reply> {
        match call {
            FieldCall::SetData { obj } => with!(self.obj(obj)?, Field, "a field", |f| {
                f.check_payload(&payload, f.data_pointer.is_none())?;
                f.data = payload;
                Ok(Reply::Unit)
            }),
            FieldCall::SetDataPointer { obj } => {
                let dp = payload.into_ints().map_err(|e| EngineFailure::type_mismatch(e.to_string()))?;
                if dp.iter().any(|&o| o < 0) || dp.windows(2).any(|w| w[0] > w[1]) {
                    return Err(EngineFailure::invalid("data pointer offsets must be non-negative and non-decreasing"));
                }
                with!(self.obj(obj)?, Field, "a field", |f| {
                    f.data_pointer = Some(dp);
                    Ok(Reply::Unit)
                })
            }
            other => Err(wrong_stream(&Call::Field(other))),
        }
    }

    pub(in crate::transport::loopback) fn field_download(&self, call: FieldCall) -> EngineResult<Payload> {
        match call {
            FieldCall::GetData { obj } => with!(self.obj(obj)?, Field, "a field", |f| Ok(f.data.clone())),
            FieldCall::GetDataPointer { obj } => with!(self.obj(obj)?, Field, "a field", |f| {
                Ok(Payload::Int(f.data_pointer.clone().unwrap_or_default()))
            }),
            other => Err(wrong_stream(&Call::Field(other))),
        }
    }

    pub(in crate::transport::loopback) fn field_definition(&self, call: FieldDefinitionCall) -> EngineResult<Reply> {
        match call {
            FieldDefinitionCall::New { data } => {
                check_dimensionality(&data)?;
                Ok(self.register(EngineObject::FieldDefinition(data)))
            }
            FieldDefinitionCall::Get { obj } => with!(self.obj(obj)?, FieldDefinition, "a field definition", |d| {
                Ok(Reply::FieldDefinition(d.clone()))
            }),
            FieldDefinitionCall::Set { obj, data } => {
                check_dimensionality(&data)?;
                with!(self.obj(obj)?, FieldDefinition, "a field definition", |d| {
                    *d = data;
                    Ok(Reply::Unit)
                })
            }
        }
    }

    /// Entry checked against the collection's entry kind.
    fn entry_value(&self, entry: EntryValue, kind: EntryKind) -> EngineResult<EngineValue> {
        match (entry, kind.entity()) {
            (EntryValue::Object(id), Some(expected)) => {
                let obj = self.obj(id)?;
                let actual = kind_of(&obj);
                if actual != expected {
                    return Err(wrong_kind(&format!("a {expected} entry"), actual));
                }
                Ok(EngineValue::Object(obj))
            }
            (EntryValue::Primitive(p), None) => {
                let fits = matches!(
                    (kind, &p),
                    (EntryKind::Int, Primitive::Int(_))
                        | (EntryKind::Double, Primitive::Double(_))
                        | (EntryKind::String, Primitive::String(_))
                );
                if fits {
                    Ok(p.into())
                } else {
                    Err(EngineFailure::type_mismatch(format!(
                        "collection of {kind:?} cannot hold a {}",
                        p.value_kind()
                    )))
                }
            }
            (EntryValue::Object(_), None) => Err(EngineFailure::type_mismatch(format!(
                "collection of {kind:?} holds primitives, not objects"
            ))),
            (EntryValue::Primitive(p), Some(expected)) => Err(EngineFailure::type_mismatch(format!(
                "collection of {expected} cannot hold a {}",
                p.value_kind()
            ))),
        }
    }

    /// Resolve `entry` and store it with `place`, which sees the
    /// collection and the resolved value.
    fn put_entry(
        &self,
        obj: crate::transport::call::ObjectId,
        entry: EntryValue,
        place: impl FnOnce(&mut CollectionData, EngineValue) -> EngineResult<()>,
    ) -> EngineResult<Reply> {
        let coll = self.obj(obj)?;
        let kind = with!(coll.clone(), Collection, "a collection", |c| Ok(c.entry_kind()))?;
        let value = self.entry_value(entry, kind)?;
        with!(coll, Collection, "a collection", |c| place(c, value).map(|()| Reply::Unit))
    }

    pub(in crate::transport::loopback) fn collection(&self, call: CollectionCall) -> EngineResult<Reply> {
        match call {
            CollectionCall::New { entry } => Ok(self.register(EngineObject::Collection(CollectionData::new(entry)))),
            CollectionCall::AddLabel { obj, label, default } => {
                with!(self.obj(obj)?, Collection, "a collection", |c| {
                    match c.labels.iter_mut().find(|(l, _)| *l == label) {
                        Some((_, d)) => {
                            if default.is_some() {
                                *d = default;
                            }
                        }
                        None => {
                            if !c.entries.is_empty() {
                                let value = default.ok_or_else(|| {
                                    EngineFailure::invalid(format!(
                                        "label `{label}` needs a default on a collection that already has entries"
                                    ))
                                })?;
                                for (ls, _) in &mut c.entries {
                                    ls.insert(label.clone(), value);
                                }
                            }
                            c.labels.push((label, default));
                        }
                    }
                    Ok(Reply::Unit)
                })
            }
            CollectionCall::Labels { obj } => with!(self.obj(obj)?, Collection, "a collection", |c| {
                Ok(Reply::Strings(c.labels.iter().map(|(l, _)| l.clone()).collect()))
            }),
            CollectionCall::AddEntry { obj, label_space, entry } => self.put_entry(obj, entry, |c, value| {
                let full = c.full_label_space(&label_space)?;
                match c.entries.iter().position(|(ls, _)| *ls == full) {
                    Some(i) => c.entries[i].1 = value,
                    None => c.entries.push((full, value)),
                }
                Ok(())
            }),
            CollectionCall::PushBackEntry { obj, label_space, entry } => self.put_entry(obj, entry, |c, value| {
                let full = c.full_label_space(&label_space)?;
                c.entries.push((full, value));
                Ok(())
            }),
            CollectionCall::SetEntryByIndex { obj, index: i, entry } => self.put_entry(obj, entry, |c, value| {
                let i = index(i, c.entries.len(), "entry")?;
                c.entries[i].1 = value;
                Ok(())
            }),
            CollectionCall::GetEntry { obj, label_space } => {
                let value = with!(self.obj(obj)?, Collection, "a collection", |c| {
                    let found = c.matching(&label_space)?;
                    match found.as_slice() {
                        [i] => Ok(c.entries[*i].1.clone()),
                        [] => Err(EngineFailure::not_found(format!("no entry matches {label_space:?}"))),
                        many => Err(EngineFailure::invalid(format!(
                            "{} entries match {label_space:?}",
                            many.len()
                        ))),
                    }
                })?;
                Ok(Reply::Value(self.to_value(value)))
            }
            CollectionCall::GetEntryByIndex { obj, index: i } => {
                let value = with!(self.obj(obj)?, Collection, "a collection", |c| {
                    index(i, c.entries.len(), "entry").map(|i| c.entries[i].1.clone())
                })?;
                Ok(Reply::Value(self.to_value(value)))
            }
            CollectionCall::GetEntries { obj, label_space } => {
                let values: Vec<EngineValue> = with!(self.obj(obj)?, Collection, "a collection", |c| {
                    Ok(c.matching(&label_space)?
                        .into_iter()
                        .map(|i| c.entries[i].1.clone())
                        .collect())
                })?;
                Ok(Reply::Values(values.into_iter().map(|v| self.to_value(v)).collect()))
            }
            CollectionCall::CountEntries { obj, label_space } => {
                with!(self.obj(obj)?, Collection, "a collection", |c| Ok(count(c.matching(&label_space)?.len())))
            }
            CollectionCall::LabelSpaceByIndex { obj, index: i } => {
                with!(self.obj(obj)?, Collection, "a collection", |c| {
                    index(i, c.entries.len(), "entry").map(|i| Reply::LabelSpace(c.entries[i].0.clone()))
                })
            }
            CollectionCall::LabelScoping { obj, label } => {
                let ids = with!(self.obj(obj)?, Collection, "a collection", |c| {
                    if !c.has_label(&label) {
                        return Err(EngineFailure::invalid(format!("label `{label}` is not declared")));
                    }
                    let mut ids: Vec<i32> = Vec::new();
                    for v in c.entries.iter().filter_map(|(ls, _)| ls.get(&label)) {
                        if !ids.contains(&v) {
                            ids.push(v);
                        }
                    }
                    Ok(ids)
                })?;
                Ok(self.register(EngineObject::Scoping(ScopingData::new(label, ids))))
            }
            CollectionCall::Size { obj } => {
                with!(self.obj(obj)?, Collection, "a collection", |c| Ok(count(c.entries.len())))
            }
            CollectionCall::Reserve { obj, size } => {
                let n = size_arg(size)?;
                with!(self.obj(obj)?, Collection, "a collection", |c| {
                    c.entries.reserve(n);
                    Ok(Reply::Unit)
                })
            }
            CollectionCall::Resize { obj, size } => {
                let n = size_arg(size)?;
                with!(self.obj(obj)?, Collection, "a collection", |c| {
                    let kind = c.entry_kind();
                    for pos in c.entries.len()..n {
                        let mut ls = LabelSpace::new();
                        for (label, default) in &c.labels {
                            ls.insert(label.clone(), default.unwrap_or(pos as i32 + 1));
                        }
                        c.entries.push((ls, default_entry(kind)));
                    }
                    c.entries.truncate(n);
                    Ok(Reply::Unit)
                })
            }
            CollectionCall::Support { obj, label } => {
                let support = with!(self.obj(obj)?, Collection, "a collection", |c| {
                    c.supports
                        .get(&label)
                        .cloned()
                        .ok_or_else(|| EngineFailure::not_found(format!("no support for label `{label}`")))
                })?;
                Ok(self.register_shared(support))
            }
            CollectionCall::SetSupport { obj, label, support } => {
                let support = self.obj(support)?;
                require_kind(&support, EntityKind::is_support, "a support")?;
                with!(self.obj(obj)?, Collection, "a collection", |c| {
                    if !c.has_label(&label) {
                        return Err(EngineFailure::invalid(format!("label `{label}` is not declared")));
                    }
                    c.supports.insert(label, support);
                    Ok(Reply::Unit)
                })
            }
            other @ (CollectionCall::SetPrimitives { .. } | CollectionCall::GetPrimitives { .. }) => {
                Err(needs_stream(&Call::Collection(other)))
            }
        }
    }

    pub(in crate::transport::loopback) fn collection_upload(&self, call: CollectionCall, payload: Payload) -> EngineResult<Reply> {
        let CollectionCall::SetPrimitives { obj } = call else {
            return Err(wrong_stream(&Call::Collection(call)));
        };
        with!(self.obj(obj)?, Collection, "a collection", |c| {
            let values: Vec<Primitive> = match (c.entry_kind(), payload) {
                (EntryKind::Int, Payload::Int(v)) => v.into_iter().map(Primitive::Int).collect(),
                (EntryKind::Double, Payload::Double(v)) => v.into_iter().map(Primitive::Double).collect(),
                (EntryKind::String, Payload::Strings(v)) => v.into_iter().map(Primitive::String).collect(),
                (kind, p) => {
                    return Err(EngineFailure::type_mismatch(format!(
                        "collection of {kind:?} cannot store {:?} values",
                        p.kind()
                    )));
                }
            };
            if c.labels.is_empty() {
                c.entries = values.into_iter().map(|p| (LabelSpace::new(), p.into())).collect();
            } else if values.len() == c.entries.len() {
                for (entry, p) in c.entries.iter_mut().zip(values) {
                    entry.1 = p.into();
                }
            } else {
                return Err(EngineFailure::invalid(format!(
                    "{} values for a labelled collection of {} entries",
                    values.len(),
                    c.entries.len()
                )));
            }
            Ok(Reply::Unit)
        })
    }

    pub(in crate::transport::loopback) fn collection_download(&self, call: CollectionCall) -> EngineResult<Payload> {
        let CollectionCall::GetPrimitives { obj } = call else {
            return Err(wrong_stream(&Call::Collection(call)));
        };
        with!(self.obj(obj)?, Collection, "a collection", |c| {
            let kind = c.entry_kind();
            let mut out = match kind {
                EntryKind::Int => Payload::Int(Vec::with_capacity(c.entries.len())),
                EntryKind::Double => Payload::Double(Vec::with_capacity(c.entries.len())),
                EntryKind::String => Payload::Strings(Vec::with_capacity(c.entries.len())),
                other => {
                    return Err(EngineFailure::type_mismatch(format!(
                        "collection of {other:?} holds objects"
                    )));
                }
            };
            for (_, v) in &c.entries {
                match (&mut out, v.primitive()) {
                    (Payload::Int(o), Some(Primitive::Int(x))) => o.push(*x),
                    (Payload::Double(o), Some(Primitive::Double(x))) => o.push(*x),
                    (Payload::Strings(o), Some(Primitive::String(x))) => o.push(x.clone()),
                    _ => return Err(EngineFailure::invariant(format!("collection of {kind:?} holds a foreign entry"))),
                }
            }
            Ok(out)
        })
    }

    pub(in crate::transport::loopback) fn data_tree(&self, call: DataTreeCall) -> EngineResult<Reply> {
        match call {
            DataTreeCall::New => Ok(self.register(EngineObject::DataTree(BTreeMap::new()))),
            DataTreeCall::Set { obj, name, value } => with!(self.obj(obj)?, DataTree, "a data tree", |t| {
                t.insert(name, value);
                Ok(Reply::Unit)
            }),
            DataTreeCall::Get { obj, name } => with!(self.obj(obj)?, DataTree, "a data tree", |t| {
                t.get(&name)
                    .cloned()
                    .map(|p| Reply::Value(Value::Primitive(p)))
                    .ok_or_else(|| EngineFailure::not_found(format!("no attribute `{name}`")))
            }),
            DataTreeCall::Has { obj, name } => {
                with!(self.obj(obj)?, DataTree, "a data tree", |t| Ok(Reply::Bool(t.contains_key(&name))))
            }
            DataTreeCall::Remove { obj, name } => with!(self.obj(obj)?, DataTree, "a data tree", |t| {
                t.remove(&name);
                Ok(Reply::Unit)
            }),
            DataTreeCall::Names { obj } => {
                with!(self.obj(obj)?, DataTree, "a data tree", |t| Ok(Reply::Strings(t.keys().cloned().collect())))
            }
        }
    }

    pub(in crate::transport::loopback) fn container(&self, call: ContainerCall) -> EngineResult<Reply> {
        match call {
            ContainerCall::New => Ok(self.register(EngineObject::Container(BTreeMap::new()))),
            ContainerCall::SetProperty { obj, name, value } => {
                let value = self.obj(value)?;
                with!(self.obj(obj)?, Container, "a generic data container", |c| {
                    c.insert(name, value);
                    Ok(Reply::Unit)
                })
            }
            ContainerCall::Property { obj, name } => {
                let value = with!(self.obj(obj)?, Container, "a generic data container", |c| {
                    c.get(&name)
                        .cloned()
                        .ok_or_else(|| EngineFailure::not_found(format!("no property `{name}`")))
                })?;
                Ok(self.register_shared(value))
            }
            ContainerCall::PropertyNames { obj } => with!(self.obj(obj)?, Container, "a generic data container", |c| {
                Ok(Reply::Strings(c.keys().cloned().collect()))
            }),
        }
    }

    pub(in crate::transport::loopback) fn any(&self, call: AnyCall) -> EngineResult<Reply> {
        match call {
            AnyCall::FromObject { obj } => {
                let inner = self.obj(obj)?;
                Ok(self.register(EngineObject::Any(EngineValue::Object(inner))))
            }
            AnyCall::FromPrimitive { value } => Ok(self.register(EngineObject::Any(value.into()))),
            AnyCall::Kind { obj } => {
                let inner = with!(self.obj(obj)?, Any, "an any", |v| Ok(v.clone()))?;
                Ok(Reply::ValueKind(inner.kind()))
            }
            AnyCall::Unwrap { obj, kind } => {
                let inner = with!(self.obj(obj)?, Any, "an any", |v| Ok(v.clone()))?;
                let actual = inner.kind();
                if !kind.accepts(actual) {
                    return Err(EngineFailure::type_mismatch(format!("any holds {actual}, requested {kind:?}")));
                }
                Ok(Reply::Value(self.to_value(inner)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grown_entries_follow_the_entry_kind() {
        assert!(matches!(default_entry(EntryKind::Double), EngineValue::Primitive(Primitive::Double(_))));
        let v = default_entry(EntryKind::PropertyField);
        assert_eq!(v.kind(), crate::transport::call::ValueKind::Object(EntityKind::PropertyField));
    }
}
