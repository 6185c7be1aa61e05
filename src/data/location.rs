//! Location, nature and dimensionality tags shared by scopings and fields.

use crate::dpf_error::DpfError;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

/// Semantic domain of a set of ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Location {
    #[default]
    Nodal,
    Elemental,
    ElementalNodal,
    Faces,
    Overall,
    TimeFreqSets,
    TimeFreqSteps,
    Zone,
    Sectors,
    NamedSelection,
    /// Any engine-defined location not listed above.
    Custom(String),
}

impl Location {
    /// Engine spelling of the location.
    pub fn as_str(&self) -> &str {
        match self {
            Location::Nodal => "Nodal",
            Location::Elemental => "Elemental",
            Location::ElementalNodal => "ElementalNodal",
            Location::Faces => "Faces",
            Location::Overall => "overall",
            Location::TimeFreqSets => "TimeFreq_sets",
            Location::TimeFreqSteps => "TimeFreq_steps",
            Location::Zone => "zone",
            Location::Sectors => "sectors",
            Location::NamedSelection => "NamedSelection",
            Location::Custom(s) => s,
        }
    }
}

impl FromStr for Location {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "Nodal" => Location::Nodal,
            "Elemental" => Location::Elemental,
            "ElementalNodal" => Location::ElementalNodal,
            "Faces" => Location::Faces,
            "overall" => Location::Overall,
            "TimeFreq_sets" => Location::TimeFreqSets,
            "TimeFreq_steps" => Location::TimeFreqSteps,
            "zone" => Location::Zone,
            "sectors" => Location::Sectors,
            "NamedSelection" => Location::NamedSelection,
            other => Location::Custom(other.to_string()),
        })
    }
}

impl From<&str> for Location {
    fn from(s: &str) -> Self {
        match s.parse() {
            Ok(l) => l,
            Err(never) => match never {},
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Tensor nature of one entity's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Nature {
    Scalar,
    Vector,
    Matrix,
    SymMatrix,
}

/// Nature plus shape; fixes the component count of a field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensionality {
    pub nature: Nature,
    pub dims: Vec<u32>,
}

impl Default for Dimensionality {
    fn default() -> Self {
        Self::scalar()
    }
}

impl Dimensionality {
    pub fn scalar() -> Self {
        Self {
            nature: Nature::Scalar,
            dims: vec![1],
        }
    }

    pub fn vector(n: u32) -> Self {
        Self {
            nature: Nature::Vector,
            dims: vec![n],
        }
    }

    pub fn matrix(rows: u32, cols: u32) -> Self {
        Self {
            nature: Nature::Matrix,
            dims: vec![rows, cols],
        }
    }

    /// Symmetric `n x n` tensor stored as its upper triangle.
    pub fn symmatrix(n: u32) -> Self {
        Self {
            nature: Nature::SymMatrix,
            dims: vec![n],
        }
    }

    /// Number of stored values per entity.
    pub fn component_count(&self) -> usize {
        match self.nature {
            Nature::Scalar => 1,
            Nature::Vector => self.dims.first().copied().unwrap_or(1) as usize,
            Nature::Matrix => self.dims.iter().map(|&d| d as usize).product(),
            Nature::SymMatrix => {
                let n = self.dims.first().copied().unwrap_or(3) as usize;
                n * (n + 1) / 2
            }
        }
    }

    /// `InvalidArgument` for shapes with a zero extent.
    pub fn validate(&self) -> Result<(), DpfError> {
        if self.dims.is_empty() || self.dims.contains(&0) {
            return Err(DpfError::InvalidArgument(format!(
                "dimensionality {:?}{:?} has an empty extent",
                self.nature, self.dims
            )));
        }
        Ok(())
    }
}

/// Shell layer selection carried by a field definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ShellLayers {
    #[default]
    NotSet,
    Top,
    Bottom,
    TopBottom,
    Mid,
    TopBottomMid,
    NonLayer,
    LayerIndependent,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_spellings_round_trip() {
        for l in [Location::Nodal, Location::Overall, Location::TimeFreqSets, Location::Zone] {
            assert_eq!(Location::from(l.as_str()), l);
        }
        assert_eq!(Location::from("cells"), Location::Custom("cells".into()));
    }

    #[test]
    fn component_counts() {
        assert_eq!(Dimensionality::scalar().component_count(), 1);
        assert_eq!(Dimensionality::vector(3).component_count(), 3);
        assert_eq!(Dimensionality::matrix(3, 3).component_count(), 9);
        assert_eq!(Dimensionality::symmatrix(3).component_count(), 6);
        assert!(Dimensionality::vector(0).validate().is_err());
    }
}
