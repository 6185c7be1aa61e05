#![cfg_attr(docsrs, feature(doc_cfg))]
//! # dpf-client
//!
//! dpf-client is a client-side binding for a finite-element post-processing
//! engine. The engine owns every object; this crate hands out typed handles
//! to them, builds operator graphs and moves bulk arrays in and out.
//!
//! ## Features
//! - Typed handles (scopings, the field family, collections, meshes,
//!   supports, operators, workflows, sessions) released automatically on drop
//! - Two interchangeable backends: framed RPC over a byte channel and an
//!   in-process C-ABI function table
//! - Chunked, cancellable bulk transfers with progress reporting
//! - An in-memory [`transport::loopback`] engine for tests and offline use
//!
//! ## Usage
//!
//! ```no_run
//! use dpf_client::prelude::*;
//!
//! # fn main() -> Result<(), DpfError> {
//! let server = connect_to_server(&ServerConfig::from_env()?)?;
//! let scoping = Scoping::new(Some(Location::Nodal), Some(&server))?;
//! scoping.set_ids(&[1, 2, 3])?;
//! assert_eq!(scoping.size()?, 3);
//! # Ok(())
//! # }
//! ```
//!
//! ## Ownership
//! Every handle owns one engine-side reference. Dropping it releases that
//! reference; [`handle::ObjectHandle::duplicate`] takes a second one. A
//! server that is gone turns every later call on its handles into
//! [`DpfError::NullObject`](dpf_error::DpfError::NullObject).

pub mod any;
pub mod codec;
pub mod collection;
pub mod config;
pub mod data;
pub mod data_sources;
pub mod data_tree;
pub mod dpf_error;
pub mod file_transfer;
pub mod generic_data_container;
pub mod handle;
pub mod mesh;
pub mod operator;
pub mod progress;
pub mod server;
pub mod session;
pub mod support;
pub mod transport;
pub mod workflow;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    pub use crate::any::Any;
    pub use crate::collection::{
        AnyCollection, Collection, CollectionOfDouble, CollectionOfInt, CollectionOfString, FieldsContainer,
        LabelSpace, MeshesContainer, PropertyFieldsContainer, ScopingsContainer, StringFieldsContainer,
    };
    pub use crate::config::{CommunicationProtocol, ServerConfig};
    pub use crate::data::{
        CustomTypeField, Dimensionality, Field, FieldBase, FieldDefinition, FieldDefinitionData, Location, Nature,
        PropertyField, Scoping, ShellLayers, StringField,
    };
    pub use crate::data_sources::DataSources;
    pub use crate::data_tree::DataTree;
    pub use crate::dpf_error::{DpfError, ErrorCode};
    pub use crate::generic_data_container::GenericDataContainer;
    pub use crate::handle::{DpfObject, FromOutput};
    pub use crate::mesh::{ElementRecord, ElementShape, MeshedRegion, NodeRecord};
    pub use crate::operator::{Operator, OperatorConfig, OperatorSpecification, OperatorStatus};
    pub use crate::progress::{NoProgress, ProgressSink};
    pub use crate::server::{Server, connect_to_server};
    pub use crate::session::{ProgressEvent, Session};
    pub use crate::support::{CyclicSupport, GenericSupport, ResultInfo, Support, TimeFreqSupport};
    pub use crate::transport::loopback::LoopbackEngine;
    pub use crate::transport::{CancelToken, TransferOptions};
    pub use crate::workflow::Workflow;
}
