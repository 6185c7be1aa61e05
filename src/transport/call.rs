//! Request/response vocabulary shared by every backend.
//!
//! A [`Call`] is grouped by entity the way the engine groups its services
//! (base, scoping, field, mesh, operator, ...). Calls that move bulk arrays
//! are flagged by [`Call::transfer`]; the backend pairs them with an upload
//! or a download stream instead of an inline reply.

use crate::collection::label_space::LabelSpace;
use crate::data::field_definition::FieldDefinitionData;
use crate::data::field_info::{FieldInfo, FieldValueKind};
use crate::data_sources::DataSourceEntry;
use crate::dpf_error::{DpfError, EngineFailure};
use crate::mesh::records::{ElementRecord, NodeRecord, TopologyFlags};
use crate::operator::OperatorStatus;
use crate::operator::config::ConfigOption;
use crate::operator::specification::SpecificationData;
use crate::codec::Payload;
use crate::support::cyclic::CyclicStage;
use crate::support::result_info::ResultInfoData;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Engine-side object identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Entry type of a collection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    Field,
    PropertyField,
    StringField,
    Scoping,
    MeshedRegion,
    Any,
    Int,
    Double,
    String,
}

impl EntryKind {
    /// Entity kind of an object entry; `None` for primitive entries.
    pub fn entity(self) -> Option<EntityKind> {
        match self {
            EntryKind::Field => Some(EntityKind::Field),
            EntryKind::PropertyField => Some(EntityKind::PropertyField),
            EntryKind::StringField => Some(EntityKind::StringField),
            EntryKind::Scoping => Some(EntityKind::Scoping),
            EntryKind::MeshedRegion => Some(EntityKind::MeshedRegion),
            EntryKind::Any => Some(EntityKind::Any),
            EntryKind::Int | EntryKind::Double | EntryKind::String => None,
        }
    }

    pub fn is_primitive(self) -> bool {
        self.entity().is_none()
    }
}

/// Runtime type tag of an engine object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Scoping,
    Field,
    PropertyField,
    StringField,
    CustomTypeField,
    Collection(EntryKind),
    MeshedRegion,
    TimeFreqSupport,
    CyclicSupport,
    GenericSupport,
    ResultInfo,
    DataSources,
    Streams,
    Operator,
    OperatorConfig,
    OperatorSpecification,
    Workflow,
    Session,
    DataTree,
    GenericDataContainer,
    Any,
    LabelSpace,
    FieldDefinition,
}

impl EntityKind {
    pub fn is_support(self) -> bool {
        matches!(
            self,
            EntityKind::MeshedRegion
                | EntityKind::TimeFreqSupport
                | EntityKind::CyclicSupport
                | EntityKind::GenericSupport
        )
    }

    pub fn is_field(self) -> bool {
        matches!(
            self,
            EntityKind::Field
                | EntityKind::PropertyField
                | EntityKind::StringField
                | EntityKind::CustomTypeField
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntityKind::Collection(e) => write!(f, "Collection<{e:?}>"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Object reference as it travels in a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RawObject {
    pub id: ObjectId,
    pub kind: EntityKind,
}

/// Inline value that is not an engine object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Primitive {
    Int(i32),
    Double(f64),
    Bool(bool),
    String(String),
    Ints(Vec<i32>),
    Doubles(Vec<f64>),
}

impl Primitive {
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Primitive::Int(_) => ValueKind::Int,
            Primitive::Double(_) => ValueKind::Double,
            Primitive::Bool(_) => ValueKind::Bool,
            Primitive::String(_) => ValueKind::String,
            Primitive::Ints(_) => ValueKind::Ints,
            Primitive::Doubles(_) => ValueKind::Doubles,
        }
    }
}

macro_rules! primitive_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(impl From<$ty> for Primitive {
            fn from(v: $ty) -> Self {
                Primitive::$variant(v.into())
            }
        })*
    };
}

primitive_from!(
    i32 => Int,
    f64 => Double,
    bool => Bool,
    String => String,
    &str => String,
    Vec<i32> => Ints,
    Vec<f64> => Doubles,
    &[i32] => Ints,
    &[f64] => Doubles,
);

/// Type of a value held by the engine (object or primitive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ValueKind {
    Object(EntityKind),
    Int,
    Double,
    Bool,
    String,
    Ints,
    Doubles,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueKind::Object(k) => write!(f, "{k}"),
            other => write!(f, "{other:?}"),
        }
    }
}

/// Type requested when reading an output or unwrapping an `Any`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OutputKind {
    /// A specific entity; `Object(Any)` wraps whatever the pin holds.
    Object(EntityKind),
    /// Any support (mesh, time-frequency, cyclic, generic).
    Support,
    /// Any entity, untyped.
    AnyObject,
    Int,
    Double,
    Bool,
    String,
    Ints,
    Doubles,
}

impl OutputKind {
    /// Whether a value of type `actual` satisfies this request.
    pub fn accepts(self, actual: ValueKind) -> bool {
        match (self, actual) {
            (OutputKind::Object(EntityKind::Any), _) => true,
            (OutputKind::Object(k), ValueKind::Object(a)) => k == a,
            (OutputKind::Support, ValueKind::Object(a)) => a.is_support(),
            (OutputKind::AnyObject, ValueKind::Object(_)) => true,
            (OutputKind::Int, ValueKind::Int)
            | (OutputKind::Double, ValueKind::Double)
            | (OutputKind::Bool, ValueKind::Bool)
            | (OutputKind::String, ValueKind::String)
            | (OutputKind::Ints, ValueKind::Ints)
            | (OutputKind::Doubles, ValueKind::Doubles) => true,
            _ => false,
        }
    }
}

/// Value fed into an operator or workflow pin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PinValue {
    Primitive(Primitive),
    Object(ObjectId),
    /// Output `pin` of operator `op`.
    Output { op: ObjectId, pin: i32 },
}

/// Value returned by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Object(RawObject),
    Primitive(Primitive),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Object(o) => ValueKind::Object(o.kind),
            Value::Primitive(p) => p.value_kind(),
        }
    }
}

/// Entry argument for collection insertion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntryValue {
    Object(ObjectId),
    Primitive(Primitive),
}

/// Engine identity reported on connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerInfo {
    /// `"major.minor"`.
    pub version: String,
    /// Transport address other engines can reach this one at.
    pub address: String,
}

/// Direction of the bulk stream attached to a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transfer {
    None,
    Upload,
    Download,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BaseCall {
    ServerInfo,
    Release { obj: ObjectId },
    Duplicate { obj: ObjectId },
    LiveObjectCount,
    OperatorNames,
    PrepareShutdown,
    Describe { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ScopingCall {
    New { location: Option<String> },
    SetIds { obj: ObjectId },
    GetIds { obj: ObjectId },
    Size { obj: ObjectId },
    Location { obj: ObjectId },
    SetLocation { obj: ObjectId, location: String },
    IdByIndex { obj: ObjectId, index: i32 },
    IndexById { obj: ObjectId, id: i32 },
    Resize { obj: ObjectId, size: i32 },
    Reserve { obj: ObjectId, size: i32 },
    SetEntity { obj: ObjectId, id: i32, index: i32 },
    Hash { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldCall {
    New {
        value_kind: FieldValueKind,
        n_entities: i32,
        definition: FieldDefinitionData,
    },
    Info { obj: ObjectId },
    SetData { obj: ObjectId },
    GetData { obj: ObjectId },
    SetDataPointer { obj: ObjectId },
    GetDataPointer { obj: ObjectId },
    EntityDataByIndex { obj: ObjectId, index: i32 },
    EntityDataById { obj: ObjectId, id: i32 },
    PushBack { obj: ObjectId, id: i32, data: Payload },
    Resize { obj: ObjectId, data_size: i32, scoping_size: i32 },
    Scoping { obj: ObjectId },
    SetScoping { obj: ObjectId, scoping: ObjectId },
    Support { obj: ObjectId },
    SetSupport { obj: ObjectId, support: ObjectId },
    DefinitionData { obj: ObjectId },
    UpdateDefinition { obj: ObjectId, definition: FieldDefinitionData },
    Definition { obj: ObjectId },
    SetDefinition { obj: ObjectId, definition: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldDefinitionCall {
    New { data: FieldDefinitionData },
    Get { obj: ObjectId },
    Set { obj: ObjectId, data: FieldDefinitionData },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollectionCall {
    New { entry: EntryKind },
    AddLabel { obj: ObjectId, label: String, default: Option<i32> },
    Labels { obj: ObjectId },
    AddEntry { obj: ObjectId, label_space: LabelSpace, entry: EntryValue },
    PushBackEntry { obj: ObjectId, label_space: LabelSpace, entry: EntryValue },
    SetEntryByIndex { obj: ObjectId, index: i32, entry: EntryValue },
    GetEntry { obj: ObjectId, label_space: LabelSpace },
    GetEntryByIndex { obj: ObjectId, index: i32 },
    GetEntries { obj: ObjectId, label_space: LabelSpace },
    CountEntries { obj: ObjectId, label_space: LabelSpace },
    LabelSpaceByIndex { obj: ObjectId, index: i32 },
    LabelScoping { obj: ObjectId, label: String },
    Size { obj: ObjectId },
    Reserve { obj: ObjectId, size: i32 },
    Resize { obj: ObjectId, size: i32 },
    Support { obj: ObjectId, label: String },
    SetSupport { obj: ObjectId, label: String, support: ObjectId },
    SetPrimitives { obj: ObjectId },
    GetPrimitives { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MeshCall {
    New { num_nodes: i32, num_elements: i32 },
    NumNodes { obj: ObjectId },
    NumElements { obj: ObjectId },
    NumFaces { obj: ObjectId },
    Unit { obj: ObjectId },
    SetUnit { obj: ObjectId, unit: String },
    PropertyNames { obj: ObjectId },
    Property { obj: ObjectId, name: String },
    SetProperty { obj: ObjectId, name: String, field: ObjectId },
    NodesScoping { obj: ObjectId },
    ElementsScoping { obj: ObjectId },
    FacesScoping { obj: ObjectId },
    NamedSelections { obj: ObjectId },
    NamedSelection { obj: ObjectId, name: String },
    SetNamedSelection { obj: ObjectId, name: String, scoping: ObjectId },
    AddNodes { obj: ObjectId, nodes: Vec<NodeRecord> },
    AddElements { obj: ObjectId, elements: Vec<ElementRecord> },
    TopologyFlags { obj: ObjectId },
    NodeCoordinates { obj: ObjectId, index: i32 },
    ElementConnectivity { obj: ObjectId, index: i32 },
    ElementShape { obj: ObjectId, index: i32 },
    NodeIndexById { obj: ObjectId, id: i32 },
    ElementIndexById { obj: ObjectId, id: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TimeFreqCall {
    New,
    Frequencies { obj: ObjectId, complex: bool },
    SetFrequencies { obj: ObjectId, field: ObjectId, complex: bool },
    Rpms { obj: ObjectId },
    SetRpms { obj: ObjectId, field: ObjectId },
    HarmonicIndices { obj: ObjectId, stage: i32 },
    SetHarmonicIndices { obj: ObjectId, stage: i32, field: ObjectId },
    NSets { obj: ObjectId },
    FrequencyByStep { obj: ObjectId, step: i32, substep: i32, complex: bool },
    FrequencyByCumulative { obj: ObjectId, index: i32, complex: bool },
    CumulativeIndex { obj: ObjectId, step: i32, substep: i32 },
    StepSubstep { obj: ObjectId, index: i32 },
    CumulativeIndexByFrequency { obj: ObjectId, value: f64, complex: bool },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CyclicCall {
    New { stages: Vec<CyclicStage>, coordinate_system: Vec<f64> },
    NumStages { obj: ObjectId },
    NumSectors { obj: ObjectId, stage: i32 },
    BaseNodesScoping { obj: ObjectId, stage: i32 },
    BaseElementsScoping { obj: ObjectId, stage: i32 },
    SectorsForExpansion { obj: ObjectId, stage: i32 },
    CoordinateSystem { obj: ObjectId },
    LowHighMap { obj: ObjectId, stage: i32 },
    HighLowMap { obj: ObjectId, stage: i32 },
    ExpandNodeId { obj: ObjectId, id: i32, sectors: Option<Vec<i32>>, stage: i32 },
    ExpandElementId { obj: ObjectId, id: i32, sectors: Option<Vec<i32>>, stage: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GenericSupportCall {
    New { location: String },
    Location { obj: ObjectId },
    SetProperty { obj: ObjectId, name: String, field: ObjectId },
    Property { obj: ObjectId, name: String },
    PropertyNames { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResultInfoCall {
    New { info: ResultInfoData },
    Describe { obj: ObjectId },
    QualifierLabels { obj: ObjectId },
    QualifierLabelSupport { obj: ObjectId, label: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataSourcesCall {
    New { result_path: Option<String> },
    SetResultFilePath { obj: ObjectId, path: String, key: Option<String> },
    AddFilePath { obj: ObjectId, path: String, key: Option<String>, domain: Option<i32> },
    ResultKey { obj: ObjectId },
    Entries { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorCall {
    New { name: String, config: Option<ObjectId> },
    Name { obj: ObjectId },
    Connect { obj: ObjectId, pin: i32, value: PinValue },
    ConnectLargeString { obj: ObjectId, pin: i32 },
    Disconnect { obj: ObjectId, pin: i32 },
    Run { obj: ObjectId },
    Status { obj: ObjectId },
    GetOutput { obj: ObjectId, pin: i32, kind: OutputKind },
    HasOutputWhenEvaluated { obj: ObjectId, pin: i32 },
    Config { obj: ObjectId },
    SetConfig { obj: ObjectId, config: ObjectId },
    Derivative { obj: ObjectId },
    SetDerivative { obj: ObjectId, derivative: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorConfigCall {
    New { operator: Option<String> },
    Set { obj: ObjectId, name: String, value: Primitive },
    Get { obj: ObjectId, name: String },
    Options { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SpecificationCall {
    New { operator: String },
    Describe { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WorkflowCall {
    New,
    AddOperator { obj: ObjectId, op: ObjectId },
    OperatorNames { obj: ObjectId },
    SetInputName { obj: ObjectId, name: String, op: ObjectId, pin: i32 },
    SetOutputName { obj: ObjectId, name: String, op: ObjectId, pin: i32 },
    InputNames { obj: ObjectId },
    OutputNames { obj: ObjectId },
    Connect { obj: ObjectId, name: String, value: PinValue },
    ConnectLargeString { obj: ObjectId, name: String },
    GetOutput { obj: ObjectId, name: String, kind: OutputKind },
    ConnectWith { obj: ObjectId, other: ObjectId, map: Option<Vec<(String, String)>> },
    ToText { obj: ObjectId },
    FromText,
    Record { obj: ObjectId, identifier: Option<String>, transfer_ownership: bool },
    GetRecorded { id: i64 },
    GetRecordedByIdentifier { identifier: String },
    RemoteCopy { obj: ObjectId, address: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SessionCall {
    New,
    AddWorkflow { obj: ObjectId, name: String, workflow: ObjectId },
    AddOperator { obj: ObjectId, name: String, op: ObjectId, pin: i32 },
    AddEventHandler { obj: ObjectId, kind: String, properties: Vec<(String, String)> },
    AddSignalEmitter { obj: ObjectId, kind: String, name: String, properties: Vec<(String, String)> },
    Registered { obj: ObjectId },
    FlushWorkflows { obj: ObjectId },
    PrepareShutdown { obj: ObjectId },
    Release { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataTreeCall {
    New,
    Set { obj: ObjectId, name: String, value: Primitive },
    Get { obj: ObjectId, name: String },
    Has { obj: ObjectId, name: String },
    Remove { obj: ObjectId, name: String },
    Names { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ContainerCall {
    New,
    SetProperty { obj: ObjectId, name: String, value: ObjectId },
    Property { obj: ObjectId, name: String },
    PropertyNames { obj: ObjectId },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AnyCall {
    FromObject { obj: ObjectId },
    FromPrimitive { value: Primitive },
    Kind { obj: ObjectId },
    Unwrap { obj: ObjectId, kind: OutputKind },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FileCall {
    Upload { server_path: String, use_tmp_dir: bool },
    Download { server_path: String },
    List { server_path: String },
    TmpDir,
}

/// One request, grouped by the engine service that handles it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Call {
    Base(BaseCall),
    Scoping(ScopingCall),
    Field(FieldCall),
    FieldDefinition(FieldDefinitionCall),
    Collection(CollectionCall),
    Mesh(MeshCall),
    TimeFreq(TimeFreqCall),
    Cyclic(CyclicCall),
    GenericSupport(GenericSupportCall),
    ResultInfo(ResultInfoCall),
    DataSources(DataSourcesCall),
    Operator(OperatorCall),
    OperatorConfig(OperatorConfigCall),
    Specification(SpecificationCall),
    Workflow(WorkflowCall),
    Session(SessionCall),
    DataTree(DataTreeCall),
    GenericDataContainer(ContainerCall),
    Any(AnyCall),
    File(FileCall),
}

impl Call {
    /// Service name, used in logs.
    pub fn service(&self) -> &'static str {
        match self {
            Call::Base(_) => "Base",
            Call::Scoping(_) => "Scoping",
            Call::Field(_) => "Field",
            Call::FieldDefinition(_) => "FieldDefinition",
            Call::Collection(_) => "Collection",
            Call::Mesh(_) => "MeshedRegion",
            Call::TimeFreq(_) => "TimeFreqSupport",
            Call::Cyclic(_) => "CyclicSupport",
            Call::GenericSupport(_) => "GenericSupport",
            Call::ResultInfo(_) => "ResultInfo",
            Call::DataSources(_) => "DataSources",
            Call::Operator(_) => "Operator",
            Call::OperatorConfig(_) => "OperatorConfig",
            Call::Specification(_) => "OperatorSpecification",
            Call::Workflow(_) => "Workflow",
            Call::Session(_) => "Session",
            Call::DataTree(_) => "DataTree",
            Call::GenericDataContainer(_) => "GenericDataContainer",
            Call::Any(_) => "Any",
            Call::File(_) => "File",
        }
    }

    /// Which stream, if any, this call is paired with.
    pub fn transfer(&self) -> Transfer {
        match self {
            Call::Scoping(ScopingCall::SetIds { .. })
            | Call::Field(FieldCall::SetData { .. })
            | Call::Field(FieldCall::SetDataPointer { .. })
            | Call::Collection(CollectionCall::SetPrimitives { .. })
            | Call::Operator(OperatorCall::ConnectLargeString { .. })
            | Call::Workflow(WorkflowCall::ConnectLargeString { .. })
            | Call::Workflow(WorkflowCall::FromText)
            | Call::File(FileCall::Upload { .. }) => Transfer::Upload,
            Call::Scoping(ScopingCall::GetIds { .. })
            | Call::Field(FieldCall::GetData { .. })
            | Call::Field(FieldCall::GetDataPointer { .. })
            | Call::Collection(CollectionCall::GetPrimitives { .. })
            | Call::Workflow(WorkflowCall::ToText { .. })
            | Call::File(FileCall::Download { .. }) => Transfer::Download,
            _ => Transfer::None,
        }
    }

    /// Calls that create a new engine object.
    pub fn creates_object(&self) -> bool {
        matches!(
            self,
            Call::Scoping(ScopingCall::New { .. })
                | Call::Field(FieldCall::New { .. })
                | Call::FieldDefinition(FieldDefinitionCall::New { .. })
                | Call::Collection(CollectionCall::New { .. })
                | Call::Mesh(MeshCall::New { .. })
                | Call::TimeFreq(TimeFreqCall::New)
                | Call::Cyclic(CyclicCall::New { .. })
                | Call::GenericSupport(GenericSupportCall::New { .. })
                | Call::ResultInfo(ResultInfoCall::New { .. })
                | Call::DataSources(DataSourcesCall::New { .. })
                | Call::Operator(OperatorCall::New { .. })
                | Call::OperatorConfig(OperatorConfigCall::New { .. })
                | Call::Specification(SpecificationCall::New { .. })
                | Call::Workflow(WorkflowCall::New)
                | Call::Workflow(WorkflowCall::FromText)
                | Call::Session(SessionCall::New)
                | Call::DataTree(DataTreeCall::New)
                | Call::GenericDataContainer(ContainerCall::New)
                | Call::Any(AnyCall::FromObject { .. })
                | Call::Any(AnyCall::FromPrimitive { .. })
        )
    }
}

/// Answer to a [`Call`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Reply {
    Unit,
    Object(RawObject),
    Objects(Vec<RawObject>),
    Value(Value),
    Values(Vec<Value>),
    Int(i64),
    Double(f64),
    Bool(bool),
    Text(String),
    Strings(Vec<String>),
    Payload(Payload),
    ServerInfo(ServerInfo),
    FieldInfo(FieldInfo),
    FieldDefinition(FieldDefinitionData),
    LabelSpace(LabelSpace),
    Status(OperatorStatus),
    Specification(SpecificationData),
    ConfigOptions(Vec<ConfigOption>),
    ResultInfo(ResultInfoData),
    TopologyFlags(TopologyFlags),
    DataSourceEntries(Vec<DataSourceEntry>),
    ValueKind(ValueKind),
    Error(EngineFailure),
}

fn unexpected(expected: &str, got: &Reply) -> DpfError {
    DpfError::protocol(format!("expected {expected} reply, got {got:?}"))
}

macro_rules! reply_accessor {
    ($name:ident, $variant:ident, $ty:ty) => {
        pub fn $name(self) -> Result<$ty, DpfError> {
            match self {
                Reply::$variant(v) => Ok(v),
                Reply::Error(f) => Err(f.into()),
                other => Err(unexpected(stringify!($variant), &other)),
            }
        }
    };
}

impl Reply {
    /// Turn an engine failure into `Err`, pass everything else through.
    pub fn into_result(self) -> Result<Reply, DpfError> {
        match self {
            Reply::Error(f) => Err(f.into()),
            other => Ok(other),
        }
    }

    pub fn into_unit(self) -> Result<(), DpfError> {
        match self {
            Reply::Unit => Ok(()),
            Reply::Error(f) => Err(f.into()),
            other => Err(unexpected("Unit", &other)),
        }
    }

    reply_accessor!(into_object, Object, RawObject);
    reply_accessor!(into_objects, Objects, Vec<RawObject>);
    reply_accessor!(into_value, Value, Value);
    reply_accessor!(into_values, Values, Vec<Value>);
    reply_accessor!(into_int, Int, i64);
    reply_accessor!(into_double, Double, f64);
    reply_accessor!(into_bool, Bool, bool);
    reply_accessor!(into_text, Text, String);
    reply_accessor!(into_strings, Strings, Vec<String>);
    reply_accessor!(into_payload, Payload, Payload);
    reply_accessor!(into_server_info, ServerInfo, ServerInfo);
    reply_accessor!(into_field_info, FieldInfo, FieldInfo);
    reply_accessor!(into_field_definition, FieldDefinition, FieldDefinitionData);
    reply_accessor!(into_label_space, LabelSpace, LabelSpace);
    reply_accessor!(into_status, Status, OperatorStatus);
    reply_accessor!(into_specification, Specification, SpecificationData);
    reply_accessor!(into_config_options, ConfigOptions, Vec<ConfigOption>);
    reply_accessor!(into_result_info, ResultInfo, ResultInfoData);
    reply_accessor!(into_topology_flags, TopologyFlags, TopologyFlags);
    reply_accessor!(into_data_source_entries, DataSourceEntries, Vec<DataSourceEntry>);
    reply_accessor!(into_value_kind, ValueKind, ValueKind);

    /// Integer reply narrowed to `usize`.
    pub fn into_count(self) -> Result<usize, DpfError> {
        let n = self.into_int()?;
        usize::try_from(n).map_err(|_| DpfError::protocol(format!("negative count {n}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_kind_acceptance() {
        assert!(OutputKind::Support.accepts(ValueKind::Object(EntityKind::MeshedRegion)));
        assert!(!OutputKind::Support.accepts(ValueKind::Object(EntityKind::Field)));
        assert!(OutputKind::Object(EntityKind::Any).accepts(ValueKind::Int));
        assert!(!OutputKind::Object(EntityKind::Field).accepts(ValueKind::Object(EntityKind::PropertyField)));
        assert!(!OutputKind::Double.accepts(ValueKind::Int));
    }

    #[test]
    fn transfer_direction() {
        let id = ObjectId(1);
        assert_eq!(Call::Scoping(ScopingCall::SetIds { obj: id }).transfer(), Transfer::Upload);
        assert_eq!(Call::Field(FieldCall::GetData { obj: id }).transfer(), Transfer::Download);
        assert_eq!(Call::Base(BaseCall::ServerInfo).transfer(), Transfer::None);
    }

    #[test]
    fn error_reply_becomes_err() {
        let r = Reply::Error(EngineFailure::out_of_range("index 9"));
        assert_eq!(r.into_int(), Err(DpfError::OutOfRange("index 9".into())));
        assert!(Reply::Unit.into_int().is_err());
    }
}
