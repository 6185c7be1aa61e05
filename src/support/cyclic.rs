//! Cyclic-symmetry support: base sectors and their expansion.

use crate::data::{PropertyField, Scoping};
use crate::dpf_error::DpfError;
use crate::handle::{DpfObject, ObjectHandle, dpf_object};
use crate::server::{self, Server};
use crate::transport::call::{Call, CyclicCall, EntityKind, Primitive, Reply, Value};
use serde::{Deserialize, Serialize};

/// Description of one cyclic stage, as stored by the engine.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CyclicStage {
    pub num_sectors: i32,
    pub base_node_ids: Vec<i32>,
    pub base_element_ids: Vec<i32>,
    /// `(low, high)` node ids paired across the sector interface.
    pub low_high: Vec<(i32, i32)>,
    /// Sectors expanded by default; all sectors when `None`.
    pub sectors_for_expansion: Option<Vec<i32>>,
}

impl CyclicStage {
    pub fn new(num_sectors: i32, base_node_ids: Vec<i32>, base_element_ids: Vec<i32>) -> Self {
        Self {
            num_sectors,
            base_node_ids,
            base_element_ids,
            ..Self::default()
        }
    }

    pub fn with_low_high(mut self, pairs: Vec<(i32, i32)>) -> Self {
        self.low_high = pairs;
        self
    }

    pub fn with_sectors_for_expansion(mut self, sectors: Vec<i32>) -> Self {
        self.sectors_for_expansion = Some(sectors);
        self
    }
}

#[derive(Debug)]
pub struct CyclicSupport {
    handle: ObjectHandle,
}

dpf_object!(CyclicSupport, EntityKind::CyclicSupport);

impl CyclicSupport {
    /// `coordinate_system` is the 3x3 row-major rotation frame of the
    /// symmetry axis.
    pub fn new(stages: Vec<CyclicStage>, coordinate_system: Vec<f64>, server: Option<&Server>) -> Result<Self, DpfError> {
        if stages.is_empty() {
            return Err(DpfError::InvalidArgument("cyclic support needs at least one stage".into()));
        }
        if let Some(s) = stages.iter().find(|s| s.num_sectors <= 0) {
            return Err(DpfError::InvalidArgument(format!("invalid sector count {}", s.num_sectors)));
        }
        let server = server::resolve(server)?;
        Ok(Self {
            handle: ObjectHandle::create(
                &server,
                Call::Cyclic(CyclicCall::New {
                    stages,
                    coordinate_system,
                }),
            )?,
        })
    }

    fn call(&self, call: CyclicCall) -> Result<Reply, DpfError> {
        self.handle.call(Call::Cyclic(call))
    }

    fn object<T: DpfObject>(&self, call: CyclicCall) -> Result<T, DpfError> {
        let raw = self.call(call)?.into_object()?;
        T::from_handle(ObjectHandle::from_raw(raw, self.handle.server().clone()))
    }

    pub fn num_stages(&self) -> Result<usize, DpfError> {
        self.call(CyclicCall::NumStages { obj: self.handle.id() })?.into_count()
    }

    /// # Errors
    /// `OutOfRange` for an unknown stage.
    pub fn num_sectors(&self, stage: i32) -> Result<usize, DpfError> {
        self.call(CyclicCall::NumSectors {
            obj: self.handle.id(),
            stage,
        })?
        .into_count()
    }

    pub fn base_nodes_scoping(&self, stage: i32) -> Result<Scoping, DpfError> {
        self.object(CyclicCall::BaseNodesScoping {
            obj: self.handle.id(),
            stage,
        })
    }

    pub fn base_elements_scoping(&self, stage: i32) -> Result<Scoping, DpfError> {
        self.object(CyclicCall::BaseElementsScoping {
            obj: self.handle.id(),
            stage,
        })
    }

    pub fn sectors_set_for_expansion(&self, stage: i32) -> Result<Scoping, DpfError> {
        self.object(CyclicCall::SectorsForExpansion {
            obj: self.handle.id(),
            stage,
        })
    }

    pub fn coordinate_system(&self) -> Result<Vec<f64>, DpfError> {
        match self.call(CyclicCall::CoordinateSystem { obj: self.handle.id() })?.into_value()? {
            Value::Primitive(Primitive::Doubles(cs)) => Ok(cs),
            other => Err(DpfError::protocol(format!("expected coordinate system, got {other:?}"))),
        }
    }

    /// Low node ids as the scoping, paired high node ids as the data.
    pub fn low_high_map(&self, stage: i32) -> Result<PropertyField, DpfError> {
        self.object(CyclicCall::LowHighMap {
            obj: self.handle.id(),
            stage,
        })
    }

    /// High node ids as the scoping, paired low node ids as the data.
    pub fn high_low_map(&self, stage: i32) -> Result<PropertyField, DpfError> {
        self.object(CyclicCall::HighLowMap {
            obj: self.handle.id(),
            stage,
        })
    }

    /// Ids duplicating base node `id` over `sectors` (all when `None`).
    pub fn expand_node_id(&self, id: i32, sectors: Option<&[i32]>, stage: i32) -> Result<Scoping, DpfError> {
        self.object(CyclicCall::ExpandNodeId {
            obj: self.handle.id(),
            id,
            sectors: sectors.map(<[i32]>::to_vec),
            stage,
        })
    }

    pub fn expand_element_id(&self, id: i32, sectors: Option<&[i32]>, stage: i32) -> Result<Scoping, DpfError> {
        self.object(CyclicCall::ExpandElementId {
            obj: self.handle.id(),
            id,
            sectors: sectors.map(<[i32]>::to_vec),
            stage,
        })
    }
}
