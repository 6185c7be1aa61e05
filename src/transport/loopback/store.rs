//! Engine-side object records and the handle table.
//!
//! Every object lives behind its own lock. Handles are table entries
//! pointing at a shared record; duplicating a handle adds an entry for the
//! same record, releasing one removes only that entry.
//!
//! Lock order is container before contained (field before its scoping,
//! collection before its entries). No code path locks the other way round.

use super::graph::OperatorDef;
use crate::codec::{ArrayKind, Payload};
use crate::collection::label_space::LabelSpace;
use crate::data::field_definition::FieldDefinitionData;
use crate::data::field_info::{FieldInfo, FieldValueKind};
use crate::data_sources::DataSourceEntry;
use crate::dpf_error::{EngineFailure, ErrorCode};
use crate::mesh::records::{ElementRecord, NodeRecord};
use crate::operator::OperatorStatus;
use crate::operator::config::ConfigOption;
use crate::operator::specification::SpecificationData;
use crate::session::ProgressEvent;
use crate::support::cyclic::CyclicStage;
use crate::support::result_info::ResultInfoData;
use crate::transport::call::{EntityKind, EntryKind, ObjectId, Primitive, RawObject, ValueKind};
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

pub type EngineResult<T> = Result<T, EngineFailure>;

pub type Shared = Arc<Mutex<EngineObject>>;

pub fn shared(obj: EngineObject) -> Shared {
    Arc::new(Mutex::new(obj))
}

pub(crate) fn wrong_kind(expected: &str, found: EntityKind) -> EngineFailure {
    EngineFailure::type_mismatch(format!("expected {expected}, found {found}"))
}

/// Value held by a pin, a collection entry or an `Any`.
#[derive(Clone)]
pub enum EngineValue {
    Object(Shared),
    Primitive(Primitive),
}

impl EngineValue {
    /// Locks the object, so never call it while holding that lock.
    pub fn kind(&self) -> ValueKind {
        match self {
            EngineValue::Object(o) => ValueKind::Object(o.lock().kind()),
            EngineValue::Primitive(p) => p.value_kind(),
        }
    }

    pub fn object(&self) -> Option<&Shared> {
        match self {
            EngineValue::Object(o) => Some(o),
            EngineValue::Primitive(_) => None,
        }
    }

    pub fn primitive(&self) -> Option<&Primitive> {
        match self {
            EngineValue::Primitive(p) => Some(p),
            EngineValue::Object(_) => None,
        }
    }
}

impl fmt::Debug for EngineValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineValue::Object(o) => write!(f, "Object({:p})", Arc::as_ptr(o)),
            EngineValue::Primitive(p) => write!(f, "{p:?}"),
        }
    }
}

impl From<Primitive> for EngineValue {
    fn from(p: Primitive) -> Self {
        EngineValue::Primitive(p)
    }
}

impl From<Shared> for EngineValue {
    fn from(o: Shared) -> Self {
        EngineValue::Object(o)
    }
}

impl From<EngineObject> for EngineValue {
    fn from(o: EngineObject) -> Self {
        EngineValue::Object(shared(o))
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScopingData {
    pub location: String,
    pub ids: Vec<i32>,
}

impl ScopingData {
    pub fn new(location: impl Into<String>, ids: Vec<i32>) -> Self {
        Self {
            location: location.into(),
            ids,
        }
    }
}

pub(crate) fn array_kind(kind: &FieldValueKind) -> ArrayKind {
    match kind {
        FieldValueKind::Double => ArrayKind::Double,
        FieldValueKind::Int => ArrayKind::Int,
        FieldValueKind::String => ArrayKind::Strings,
        FieldValueKind::Custom { .. } => ArrayKind::Bytes,
    }
}

/// Field of any value kind.
#[derive(Debug, Clone)]
pub struct FieldData {
    pub value_kind: FieldValueKind,
    pub definition: FieldDefinitionData,
    pub scoping: Shared,
    pub data: Payload,
    pub data_pointer: Option<Vec<i32>>,
    pub support: Option<Shared>,
}

impl FieldData {
    /// Empty field with an empty scoping at the definition's location.
    pub fn new(value_kind: FieldValueKind, definition: FieldDefinitionData) -> Self {
        let scoping = shared(EngineObject::Scoping(ScopingData::new(
            definition.location.as_str(),
            Vec::new(),
        )));
        Self {
            data: Payload::empty(array_kind(&value_kind)),
            value_kind,
            definition,
            scoping,
            data_pointer: None,
            support: None,
        }
    }

    /// Fixed-width field over `ids` holding `data`.
    pub fn with_values(value_kind: FieldValueKind, definition: FieldDefinitionData, ids: Vec<i32>, data: Payload) -> Self {
        let mut f = Self::new(value_kind, definition);
        f.scoping = shared(EngineObject::Scoping(ScopingData::new(f.definition.location.as_str(), ids)));
        f.data = data;
        f
    }

    /// Same definition, scoping and support, new values.
    pub fn derive(&self, data: Payload) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    pub fn n_components(&self) -> usize {
        self.definition.n_components()
    }

    /// Stored values, in units of the value kind.
    pub fn data_size(&self) -> usize {
        match (&self.data, &self.value_kind) {
            (Payload::Bytes(b), FieldValueKind::Custom { unitary_size, .. }) if *unitary_size > 0 => {
                b.len() / *unitary_size as usize
            }
            (p, _) => p.len(),
        }
    }

    pub fn doubles(&self) -> Option<&[f64]> {
        match &self.data {
            Payload::Double(v) => Some(v),
            _ => None,
        }
    }

    pub fn ints(&self) -> Option<&[i32]> {
        match &self.data {
            Payload::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Scoping ids. Locks the scoping.
    pub fn ids(&self) -> Vec<i32> {
        match &*self.scoping.lock() {
            EngineObject::Scoping(s) => s.ids.clone(),
            _ => Vec::new(),
        }
    }

    pub fn info(&self, size: usize) -> FieldInfo {
        FieldInfo {
            value_kind: self.value_kind.clone(),
            n_components: self.n_components(),
            data_size: self.data_size(),
            size,
            has_data_pointer: self.data_pointer.is_some(),
        }
    }

    /// Values held by entity `index` of a field whose scoping has `size` ids.
    pub fn entity_range(&self, index: usize, size: usize) -> EngineResult<Range<usize>> {
        if index >= size {
            return Err(EngineFailure::out_of_range(format!(
                "entity index {index} outside 0..{size}"
            )));
        }
        let total = self.data_size();
        let range = match &self.data_pointer {
            Some(dp) => {
                let start = dp.get(index).copied().ok_or_else(|| {
                    EngineFailure::invariant(format!("data pointer has {} offsets for {size} entities", dp.len()))
                })?;
                let end = dp.get(index + 1).copied().map_or(total, |e| e.max(0) as usize);
                start.max(0) as usize..end
            }
            None => {
                let nc = self.n_components();
                if total != size * nc {
                    return Err(EngineFailure::invariant(format!(
                        "{total} values for {size} entities of {nc} components and no data pointer"
                    )));
                }
                index * nc..(index + 1) * nc
            }
        };
        if range.start > range.end || range.end > total {
            return Err(EngineFailure::invariant(format!(
                "entity {index} covers {range:?} of {total} values"
            )));
        }
        Ok(range)
    }

    pub fn slice(&self, range: Range<usize>) -> Payload {
        match &self.data {
            Payload::Int(v) => Payload::Int(v[range].to_vec()),
            Payload::Double(v) => Payload::Double(v[range].to_vec()),
            Payload::Strings(v) => Payload::Strings(v[range].to_vec()),
            Payload::Bytes(v) => {
                let unit = self.value_kind.unitary_size().max(1);
                Payload::Bytes(v[range.start * unit..range.end * unit].to_vec())
            }
        }
    }

    /// Check that `data` may be stored in this field.
    pub fn check_payload(&self, data: &Payload, fixed_width: bool) -> EngineResult<()> {
        let expected = array_kind(&self.value_kind);
        if data.kind() != expected {
            return Err(EngineFailure::type_mismatch(format!(
                "{} field cannot store {:?} values",
                self.value_kind.type_name(),
                data.kind()
            )));
        }
        let units = match (&self.value_kind, data) {
            (FieldValueKind::Custom { unitary_size, .. }, Payload::Bytes(b)) => {
                let unit = *unitary_size as usize;
                if unit == 0 || b.len() % unit != 0 {
                    return Err(EngineFailure::invalid(format!(
                        "{} bytes is not a whole number of {unit}-byte values",
                        b.len()
                    )));
                }
                b.len() / unit
            }
            (_, p) => p.len(),
        };
        let nc = self.n_components();
        if fixed_width && nc > 0 && units % nc != 0 {
            return Err(EngineFailure::invalid(format!(
                "{units} values is not a multiple of {nc} components"
            )));
        }
        Ok(())
    }

    pub fn append(&mut self, data: Payload) {
        match (&mut self.data, data) {
            (Payload::Int(a), Payload::Int(b)) => a.extend(b),
            (Payload::Double(a), Payload::Double(b)) => a.extend(b),
            (Payload::Strings(a), Payload::Strings(b)) => a.extend(b),
            (Payload::Bytes(a), Payload::Bytes(b)) => a.extend(b),
            _ => {}
        }
    }

    /// Grow or shrink to `n` units, padding with zeros or empty strings.
    pub fn resize_data(&mut self, n: usize) {
        let unit = self.value_kind.unitary_size().max(1);
        match &mut self.data {
            Payload::Int(v) => v.resize(n, 0),
            Payload::Double(v) => v.resize(n, 0.0),
            Payload::Strings(v) => v.resize(n, String::new()),
            Payload::Bytes(v) => v.resize(n * unit, 0),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct CollectionData {
    pub entry: Option<EntryKind>,
    /// Declared labels with their optional default value.
    pub labels: Vec<(String, Option<i32>)>,
    pub entries: Vec<(LabelSpace, EngineValue)>,
    pub supports: BTreeMap<String, Shared>,
}

impl CollectionData {
    pub fn new(entry: EntryKind) -> Self {
        Self {
            entry: Some(entry),
            ..Self::default()
        }
    }

    pub fn entry_kind(&self) -> EntryKind {
        self.entry.unwrap_or(EntryKind::Any)
    }

    pub fn has_label(&self, label: &str) -> bool {
        self.labels.iter().any(|(l, _)| l == label)
    }

    /// Complete `partial` with defaults; every key must be declared and
    /// every declared label bound.
    pub fn full_label_space(&self, partial: &LabelSpace) -> EngineResult<LabelSpace> {
        if let Some(unknown) = partial.labels().find(|l| !self.has_label(l)) {
            return Err(EngineFailure::invalid(format!("label `{unknown}` is not declared")));
        }
        let mut full = partial.clone();
        for (label, default) in &self.labels {
            if full.contains(label) {
                continue;
            }
            match default {
                Some(d) => {
                    full.insert(label.clone(), *d);
                }
                None => {
                    return Err(EngineFailure::invalid(format!(
                        "label `{label}` is unbound and has no default"
                    )));
                }
            }
        }
        Ok(full)
    }

    /// Indices of the entries matching `query`; every query key must be declared.
    pub fn matching(&self, query: &LabelSpace) -> EngineResult<Vec<usize>> {
        if let Some(unknown) = query.labels().find(|l| !self.has_label(l)) {
            return Err(EngineFailure::invalid(format!("label `{unknown}` is not declared")));
        }
        Ok(self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (ls, _))| ls.matches(query))
            .map(|(i, _)| i)
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshData {
    pub unit: String,
    pub nodes: Vec<NodeRecord>,
    pub elements: Vec<ElementRecord>,
    pub named_selections: Vec<(String, Shared)>,
    /// Properties set explicitly; they shadow the derived ones.
    pub properties: BTreeMap<String, Shared>,
}

#[derive(Debug, Clone, Default)]
pub struct TimeFreqData {
    pub frequencies: Option<Shared>,
    pub imaginary: Option<Shared>,
    pub rpms: Option<Shared>,
    pub harmonic_indices: BTreeMap<i32, Shared>,
}

#[derive(Debug, Clone, Default)]
pub struct CyclicData {
    pub stages: Vec<CyclicStage>,
    pub coordinate_system: Vec<f64>,
}

#[derive(Debug, Clone, Default)]
pub struct GenericSupportData {
    pub location: String,
    pub properties: Vec<(String, Shared)>,
}

/// Input binding of an operator pin.
#[derive(Debug, Clone)]
pub enum Binding {
    Value(EngineValue),
    Output { op: Shared, pin: i32 },
}

#[derive(Debug, Clone)]
pub struct OperatorData {
    pub name: String,
    pub def: Arc<OperatorDef>,
    pub inputs: BTreeMap<i32, Binding>,
    pub config: Shared,
    pub status: OperatorStatus,
    pub outputs: BTreeMap<i32, EngineValue>,
    pub derivative: Option<Shared>,
}

impl OperatorData {
    pub fn new(def: Arc<OperatorDef>, config: Option<Shared>) -> Self {
        let config = config.unwrap_or_else(|| {
            shared(EngineObject::OperatorConfig(ConfigData {
                options: def.defaults.clone(),
            }))
        });
        Self {
            name: def.name.clone(),
            def,
            inputs: BTreeMap::new(),
            config,
            status: OperatorStatus::NotRun,
            outputs: BTreeMap::new(),
            derivative: None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ConfigData {
    pub options: Vec<ConfigOption>,
}

impl ConfigData {
    pub fn get(&self, name: &str) -> Option<&ConfigOption> {
        self.options.iter().find(|o| o.name == name)
    }

    pub fn set(&mut self, name: &str, value: Primitive) {
        match self.options.iter_mut().find(|o| o.name == name) {
            Some(o) => o.value = value,
            None => self.options.push(ConfigOption {
                name: name.to_string(),
                value,
                document: String::new(),
            }),
        }
    }
}

/// Workflow pin exposed under a name.
#[derive(Debug, Clone)]
pub struct ExposedPin {
    pub name: String,
    pub op: Shared,
    pub pin: i32,
}

#[derive(Debug, Clone, Default)]
pub struct WorkflowData {
    pub operators: Vec<Shared>,
    pub inputs: Vec<ExposedPin>,
    pub outputs: Vec<ExposedPin>,
}

impl WorkflowData {
    pub fn contains(&self, op: &Shared) -> bool {
        self.operators.iter().any(|o| Arc::ptr_eq(o, op))
    }

    pub fn add_operator(&mut self, op: Shared) {
        if !self.contains(&op) {
            self.operators.push(op);
        }
    }

    pub fn input(&self, name: &str) -> Option<&ExposedPin> {
        self.inputs.iter().find(|p| p.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&ExposedPin> {
        self.outputs.iter().find(|p| p.name == name)
    }
}

fn expose(pins: &mut Vec<ExposedPin>, pin: ExposedPin) {
    match pins.iter_mut().find(|p| p.name == pin.name) {
        Some(p) => *p = pin,
        None => pins.push(pin),
    }
}

impl WorkflowData {
    pub fn set_input(&mut self, pin: ExposedPin) {
        expose(&mut self.inputs, pin);
    }

    pub fn set_output(&mut self, pin: ExposedPin) {
        expose(&mut self.outputs, pin);
    }
}

#[derive(Debug, Default)]
pub struct SessionState {
    pub workflows: Vec<(String, Shared)>,
    pub operators: Vec<(String, Shared, i32)>,
    pub handlers: Vec<String>,
    pub emitters: Vec<String>,
    pub events: VecDeque<ProgressEvent>,
    pub closed: bool,
    pub shutting_down: bool,
}

/// Registrations and pending events of a session.
#[derive(Debug, Default)]
pub struct SessionHub {
    pub state: Mutex<SessionState>,
    ready: Condvar,
}

impl SessionHub {
    pub fn push(&self, event: ProgressEvent) {
        let mut s = self.state.lock();
        if !s.closed {
            s.events.push_back(event);
        }
        drop(s);
        self.ready.notify_all();
    }

    pub fn close(&self) {
        self.state.lock().closed = true;
        self.ready.notify_all();
    }

    /// Blocks until an event is queued; `None` once closed and drained.
    pub fn next_event(&self) -> Option<ProgressEvent> {
        let mut s = self.state.lock();
        loop {
            if let Some(ev) = s.events.pop_front() {
                return Some(ev);
            }
            if s.closed {
                return None;
            }
            self.ready.wait(&mut s);
        }
    }
}

#[derive(Debug, Clone)]
pub enum EngineObject {
    Scoping(ScopingData),
    Field(FieldData),
    FieldDefinition(FieldDefinitionData),
    Collection(CollectionData),
    Mesh(MeshData),
    TimeFreq(TimeFreqData),
    Cyclic(CyclicData),
    GenericSupport(GenericSupportData),
    ResultInfo(ResultInfoData),
    DataSources(Vec<DataSourceEntry>),
    Operator(OperatorData),
    OperatorConfig(ConfigData),
    Specification(SpecificationData),
    Workflow(WorkflowData),
    Session(Arc<SessionHub>),
    DataTree(BTreeMap<String, Primitive>),
    Container(BTreeMap<String, Shared>),
    Any(EngineValue),
}

impl EngineObject {
    pub fn kind(&self) -> EntityKind {
        match self {
            EngineObject::Scoping(_) => EntityKind::Scoping,
            EngineObject::Field(f) => f.value_kind.entity(),
            EngineObject::FieldDefinition(_) => EntityKind::FieldDefinition,
            EngineObject::Collection(c) => EntityKind::Collection(c.entry_kind()),
            EngineObject::Mesh(_) => EntityKind::MeshedRegion,
            EngineObject::TimeFreq(_) => EntityKind::TimeFreqSupport,
            EngineObject::Cyclic(_) => EntityKind::CyclicSupport,
            EngineObject::GenericSupport(_) => EntityKind::GenericSupport,
            EngineObject::ResultInfo(_) => EntityKind::ResultInfo,
            EngineObject::DataSources(_) => EntityKind::DataSources,
            EngineObject::Operator(_) => EntityKind::Operator,
            EngineObject::OperatorConfig(_) => EntityKind::OperatorConfig,
            EngineObject::Specification(_) => EntityKind::OperatorSpecification,
            EngineObject::Workflow(_) => EntityKind::Workflow,
            EngineObject::Session(_) => EntityKind::Session,
            EngineObject::DataTree(_) => EntityKind::DataTree,
            EngineObject::Container(_) => EntityKind::GenericDataContainer,
            EngineObject::Any(_) => EntityKind::Any,
        }
    }
}

pub fn kind_of(obj: &Shared) -> EntityKind {
    obj.lock().kind()
}

/// Live handles, keyed by id.
#[derive(Default)]
pub struct ObjectTable {
    next: AtomicU64,
    objects: DashMap<u64, Shared>,
}

impl fmt::Debug for ObjectTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectTable").field("live", &self.len()).finish()
    }
}

impl ObjectTable {
    /// New handle to `obj`. Locks `obj` to read its kind.
    pub fn insert(&self, obj: Shared) -> RawObject {
        let kind = kind_of(&obj);
        let id = self.next.fetch_add(1, Ordering::Relaxed) + 1;
        self.objects.insert(id, obj);
        RawObject { id: ObjectId(id), kind }
    }

    pub fn get(&self, id: ObjectId) -> EngineResult<Shared> {
        self.objects
            .get(&id.0)
            .map(|e| e.value().clone())
            .ok_or_else(|| EngineFailure::new(ErrorCode::NullObject, format!("no live object {id}")))
    }

    pub fn remove(&self, id: ObjectId) -> EngineResult<Shared> {
        self.objects
            .remove(&id.0)
            .map(|(_, o)| o)
            .ok_or_else(|| EngineFailure::new(ErrorCode::NullObject, format!("no live object {id}")))
    }

    /// Whether any live handle still points at `obj`.
    pub fn is_referenced(&self, obj: &Shared) -> bool {
        self.objects.iter().any(|e| Arc::ptr_eq(e.value(), obj))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::location::{Dimensionality, Location};

    fn vector_field(ids: Vec<i32>, data: Vec<f64>) -> FieldData {
        FieldData::with_values(
            FieldValueKind::Double,
            FieldDefinitionData::new(Location::Nodal, Dimensionality::vector(3)),
            ids,
            Payload::Double(data),
        )
    }

    #[test]
    fn fixed_width_entity_ranges() {
        let f = vector_field(vec![5, 6], (0..6).map(f64::from).collect());
        assert_eq!(f.entity_range(1, 2).unwrap(), 3..6);
        assert_eq!(f.entity_range(2, 2).unwrap_err().code, ErrorCode::OutOfRange);
        let short = vector_field(vec![5, 6], vec![0.0; 4]);
        assert_eq!(short.entity_range(0, 2).unwrap_err().code, ErrorCode::InvariantViolation);
    }

    #[test]
    fn data_pointer_ranges() {
        let mut f = vector_field(vec![1, 2], vec![0.0; 5]);
        f.definition.dimensionality = Dimensionality::scalar();
        f.data_pointer = Some(vec![0, 2]);
        assert_eq!(f.entity_range(0, 2).unwrap(), 0..2);
        assert_eq!(f.entity_range(1, 2).unwrap(), 2..5);
    }

    #[test]
    fn full_label_space_uses_defaults() {
        let mut c = CollectionData::new(EntryKind::Field);
        c.labels.push(("time".into(), None));
        c.labels.push(("body".into(), Some(0)));
        let full = c.full_label_space(&LabelSpace::from([("time", 2)])).unwrap();
        assert_eq!(full, LabelSpace::from([("time", 2), ("body", 0)]));
        assert!(c.full_label_space(&LabelSpace::from([("body", 1)])).is_err());
        assert!(c.full_label_space(&LabelSpace::from([("zone", 1), ("time", 1)])).is_err());
    }

    #[test]
    fn duplicated_handles_share_the_record() {
        let table = ObjectTable::default();
        let obj = shared(EngineObject::DataTree(BTreeMap::new()));
        let a = table.insert(obj.clone());
        let b = table.insert(obj);
        assert_ne!(a.id, b.id);
        assert_eq!(table.len(), 2);
        let released = table.remove(a.id).unwrap();
        assert!(table.get(b.id).is_ok());
        assert!(table.is_referenced(&released));
        assert_eq!(table.get(a.id).unwrap_err().code, ErrorCode::NullObject);
        table.remove(b.id).unwrap();
        assert!(!table.is_referenced(&released));
    }
}
