//! Supports: domain metadata a field or a collection label refers to.

pub mod cyclic;
pub mod generic;
pub mod result_info;
pub mod time_freq;

pub use cyclic::{CyclicStage, CyclicSupport};
pub use generic::GenericSupport;
pub use result_info::{ResultInfo, ResultInfoData};
pub use time_freq::TimeFreqSupport;

use crate::handle::{DpfObject, ObjectHandle};
use crate::mesh::MeshedRegion;
use crate::transport::call::{EntityKind, OutputKind};

/// Any support, tagged by its runtime kind.
#[derive(Debug)]
pub enum Support {
    Mesh(MeshedRegion),
    TimeFreq(TimeFreqSupport),
    Cyclic(CyclicSupport),
    Generic(GenericSupport),
}

impl DpfObject for Support {
    fn accepts(kind: EntityKind) -> bool {
        kind.is_support()
    }

    fn output_kind() -> OutputKind {
        OutputKind::Support
    }

    fn wrap(handle: ObjectHandle) -> Self {
        match handle.kind() {
            EntityKind::MeshedRegion => Support::Mesh(MeshedRegion::wrap(handle)),
            EntityKind::TimeFreqSupport => Support::TimeFreq(TimeFreqSupport::wrap(handle)),
            EntityKind::CyclicSupport => Support::Cyclic(CyclicSupport::wrap(handle)),
            _ => Support::Generic(GenericSupport::wrap(handle)),
        }
    }

    fn handle(&self) -> &ObjectHandle {
        match self {
            Support::Mesh(s) => s.handle(),
            Support::TimeFreq(s) => s.handle(),
            Support::Cyclic(s) => s.handle(),
            Support::Generic(s) => s.handle(),
        }
    }
}

impl Support {
    pub fn kind(&self) -> EntityKind {
        self.handle().kind()
    }

    pub fn as_mesh(&self) -> Option<&MeshedRegion> {
        match self {
            Support::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn as_time_freq(&self) -> Option<&TimeFreqSupport> {
        match self {
            Support::TimeFreq(t) => Some(t),
            _ => None,
        }
    }

    pub fn into_mesh(self) -> Option<MeshedRegion> {
        match self {
            Support::Mesh(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_time_freq(self) -> Option<TimeFreqSupport> {
        match self {
            Support::TimeFreq(t) => Some(t),
            _ => None,
        }
    }
}

impl From<MeshedRegion> for Support {
    fn from(m: MeshedRegion) -> Self {
        Support::Mesh(m)
    }
}

impl From<TimeFreqSupport> for Support {
    fn from(t: TimeFreqSupport) -> Self {
        Support::TimeFreq(t)
    }
}

impl From<CyclicSupport> for Support {
    fn from(c: CyclicSupport) -> Self {
        Support::Cyclic(c)
    }
}

impl From<GenericSupport> for Support {
    fn from(g: GenericSupport) -> Self {
        Support::Generic(g)
    }
}
