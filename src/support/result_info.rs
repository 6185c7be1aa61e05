//! Result metadata: analysis, physics, units, solver and available results.
//!
//! The whole description travels as one [`ResultInfoData`] record; the
//! accessors on [`ResultInfo`] are conveniences over a single round trip.

use super::generic::GenericSupport;
use crate::collection::label_space::LabelSpace;
use crate::collection::primitive::CollectionOfString;
use crate::data::location::{Dimensionality, Location};
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, EntityKind, ResultInfoCall};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AnalysisType {
    #[default]
    Static,
    Transient,
    Harmonic,
    Modal,
    Buckling,
    Other(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PhysicsType {
    #[default]
    Mechanical,
    Thermal,
    Magnetic,
    Electric,
    Fluid,
    Other(String),
}

/// Predefined engine unit system, or a custom list of base units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnitSystem {
    Predefined { id: i32, name: String },
    Custom { base_units: Vec<String> },
}

impl Default for UnitSystem {
    fn default() -> Self {
        UnitSystem::Predefined {
            id: 0,
            name: "MKS: m, kg, N, s, V, A, degC".into(),
        }
    }
}

impl fmt::Display for UnitSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitSystem::Predefined { name, .. } => f.write_str(name),
            UnitSystem::Custom { base_units } => write!(f, "{}", base_units.join(", ")),
        }
    }
}

/// Identity of the solver that wrote the result.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SolverInfo {
    pub version: String,
    pub date: String,
    pub time: String,
    pub user: String,
    pub job: String,
    pub product: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubResult {
    pub name: String,
    pub description: String,
}

/// One result the file can provide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailableResult {
    pub name: String,
    pub physics_name: String,
    pub scripting_name: String,
    pub unit: String,
    pub dimensionality: Dimensionality,
    pub location: Location,
    pub homogeneity: String,
    pub sub_results: Vec<SubResult>,
    pub qualifier_label_spaces: Vec<LabelSpace>,
}

impl AvailableResult {
    pub fn new(name: impl Into<String>, scripting_name: impl Into<String>, dimensionality: Dimensionality, location: Location) -> Self {
        let name = name.into();
        Self {
            physics_name: name.clone(),
            name,
            scripting_name: scripting_name.into(),
            unit: String::new(),
            dimensionality,
            location,
            homogeneity: String::new(),
            sub_results: Vec::new(),
            qualifier_label_spaces: Vec::new(),
        }
    }

    pub fn n_components(&self) -> usize {
        self.dimensionality.component_count()
    }
}

/// Complete result-info record.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResultInfoData {
    pub analysis_type: AnalysisType,
    pub physics_type: PhysicsType,
    pub unit_system: UnitSystem,
    pub solver: SolverInfo,
    pub results: Vec<AvailableResult>,
    /// Qualifier label -> `(value, display name)` pairs.
    pub qualifier_labels: BTreeMap<String, Vec<(i32, String)>>,
}

impl ResultInfoData {
    pub fn n_results(&self) -> usize {
        self.results.len()
    }

    /// Lookup by name or scripting name.
    pub fn result(&self, name: &str) -> Option<&AvailableResult> {
        self.results.iter().find(|r| r.name == name || r.scripting_name == name)
    }
}

#[derive(Debug)]
pub struct ResultInfo {
    handle: ObjectHandle,
}

dpf_object!(ResultInfo, EntityKind::ResultInfo);

impl ResultInfo {
    pub fn new(info: ResultInfoData, server: Option<&Server>) -> Result<Self, DpfError> {
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(&server, Call::ResultInfo(ResultInfoCall::New { info }))?,
        })
    }

    pub fn describe(&self) -> Result<ResultInfoData, DpfError> {
        self.handle
            .call(Call::ResultInfo(ResultInfoCall::Describe { obj: self.handle.id() }))?
            .into_result_info()
    }

    pub fn analysis_type(&self) -> Result<AnalysisType, DpfError> {
        Ok(self.describe()?.analysis_type)
    }

    pub fn physics_type(&self) -> Result<PhysicsType, DpfError> {
        Ok(self.describe()?.physics_type)
    }

    pub fn unit_system(&self) -> Result<UnitSystem, DpfError> {
        Ok(self.describe()?.unit_system)
    }

    pub fn solver(&self) -> Result<SolverInfo, DpfError> {
        Ok(self.describe()?.solver)
    }

    pub fn n_results(&self) -> Result<usize, DpfError> {
        Ok(self.describe()?.n_results())
    }

    pub fn available_results(&self) -> Result<Vec<AvailableResult>, DpfError> {
        Ok(self.describe()?.results)
    }

    pub fn result(&self, name: &str) -> Result<Option<AvailableResult>, DpfError> {
        Ok(self.describe()?.result(name).cloned())
    }

    /// Names of the qualifier labels, as a string collection.
    pub fn available_qualifier_labels(&self) -> Result<CollectionOfString, DpfError> {
        let raw = self
            .handle
            .call(Call::ResultInfo(ResultInfoCall::QualifierLabels { obj: self.handle.id() }))?
            .into_object()?;
        CollectionOfString::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    /// Support of a qualifier label: location is the label, property
    /// `names` holds the display names scoped by label value.
    pub fn qualifier_label_support(&self, label: &str) -> Result<GenericSupport, DpfError> {
        let raw = self
            .handle
            .call(Call::ResultInfo(ResultInfoCall::QualifierLabelSupport {
                obj: self.handle.id(),
                label: label.to_string(),
            }))?
            .into_object()?;
        GenericSupport::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }
}
