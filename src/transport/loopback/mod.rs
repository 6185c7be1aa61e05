//! In-memory engine for tests and offline use.
//!
//! A [`LoopbackEngine`] owns an object store, an operator catalog, a
//! workflow registry and a small virtual file system. Clients reach it the
//! same three ways they reach a real engine: framed RPC over in-memory
//! channels ([`LoopbackEngine::connect`]), framed RPC over TCP
//! ([`LoopbackEngine::serve_tcp`]) and the native C-ABI table
//! ([`native_shim::loopback_api_table`]).
//!
//! The only built-in operator is `forward`; anything numeric comes from
//! operators registered with [`LoopbackEngine::register_operator`].

mod dispatch;
pub mod graph;
pub mod native_shim;
mod serve;
pub mod store;

pub use graph::{EvalContext, OperatorDef};
pub use store::{EngineObject, EngineResult, EngineValue, FieldData, Shared};

use crate::config::ServerConfig;
use crate::dpf_error::DpfError;
use crate::operator::specification::SpecificationData;
use crate::transport::Server;
use crate::transport::channel::{MemoryConnector, TcpChannel};
use crate::transport::native::NativeBackend;
use crate::transport::rpc::RpcBackend;
use dashmap::DashMap;
use graph::Catalog;
use log::{debug, info, warn};
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use store::ObjectTable;

pub const DEFAULT_ENGINE_VERSION: &str = "7.1";

static ENGINES: Lazy<DashMap<String, Weak<EngineCore>>> = Lazy::new(DashMap::new);
static NEXT_ENGINE: AtomicU64 = AtomicU64::new(1);

/// Live engine registered under `address`.
pub(crate) fn engine_at(address: &str) -> Option<Arc<EngineCore>> {
    ENGINES.get(address).and_then(|w| w.upgrade())
}

/// Recorded workflow, owned or observed.
#[derive(Debug)]
pub(crate) enum Recorded {
    Owned(Shared),
    Observed(Weak<parking_lot::Mutex<EngineObject>>),
}

impl Recorded {
    fn get(&self) -> Option<Shared> {
        match self {
            Recorded::Owned(s) => Some(s.clone()),
            Recorded::Observed(w) => w.upgrade(),
        }
    }

    fn is_live(&self) -> bool {
        match self {
            Recorded::Owned(_) => true,
            Recorded::Observed(w) => w.strong_count() > 0,
        }
    }
}

/// Drop observed records whose workflow is gone.
pub(crate) fn prune_records(records: &mut BTreeMap<i64, (Option<String>, Recorded)>) {
    records.retain(|_, (_, r)| r.is_live());
}

/// State shared by every connection to one engine.
pub(crate) struct EngineCore {
    address: String,
    version: String,
    objects: ObjectTable,
    catalog: Catalog,
    files: Mutex<BTreeMap<String, Vec<u8>>>,
    tmp_dir: String,
    records: Mutex<BTreeMap<i64, (Option<String>, Recorded)>>,
    next_record: AtomicI64,
    shutting_down: AtomicBool,
}

impl fmt::Debug for EngineCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineCore")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("objects", &self.objects)
            .finish_non_exhaustive()
    }
}

impl Drop for EngineCore {
    fn drop(&mut self) {
        ENGINES.remove(&self.address);
    }
}

/// Handle on an in-memory engine; clones share the engine.
#[derive(Clone, Debug)]
pub struct LoopbackEngine {
    core: Arc<EngineCore>,
}

impl Default for LoopbackEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl LoopbackEngine {
    pub fn new() -> Self {
        Self::with_version(DEFAULT_ENGINE_VERSION)
    }

    /// Engine reporting `version` (`"major.minor"`) to its clients.
    pub fn with_version(version: &str) -> Self {
        let n = NEXT_ENGINE.fetch_add(1, Ordering::Relaxed);
        let address = format!("loopback://{n}");
        let core = Arc::new(EngineCore {
            address: address.clone(),
            version: version.to_string(),
            objects: ObjectTable::default(),
            catalog: Catalog::with_builtins(),
            files: Mutex::new(BTreeMap::new()),
            tmp_dir: format!("/loopback{n}/tmp"),
            records: Mutex::new(BTreeMap::new()),
            next_record: AtomicI64::new(1),
            shutting_down: AtomicBool::new(false),
        });
        ENGINES.insert(address.clone(), Arc::downgrade(&core));
        info!("loopback engine {version} at {address}");
        Self { core }
    }

    pub fn address(&self) -> &str {
        &self.core.address
    }

    pub fn version(&self) -> &str {
        &self.core.version
    }

    /// Number of live handles, all connections included.
    pub fn live_object_count(&self) -> usize {
        self.core.objects.len()
    }

    pub fn operator_names(&self) -> Vec<String> {
        self.core.catalog.names()
    }

    /// Entries of the workflow registry, expired ones included until the
    /// next registry call prunes them.
    pub fn recorded_count(&self) -> usize {
        self.core.records.lock().len()
    }

    /// Add `def` to the catalog, replacing an operator of the same name.
    pub fn register(&self, def: OperatorDef) {
        self.core.catalog.register(def);
    }

    pub fn register_operator<F>(&self, name: &str, spec: SpecificationData, eval: F)
    where
        F: Fn(&mut EvalContext<'_>) -> EngineResult<()> + Send + Sync + 'static,
    {
        self.register(OperatorDef::new(name, spec, eval));
    }

    /// Framed RPC client over in-memory channels; every pooled channel gets
    /// its own serving thread.
    pub fn connect(&self, config: ServerConfig) -> Result<Server, DpfError> {
        let core = self.core.clone();
        let chunk = config.streaming_buffer_size;
        let connector = MemoryConnector::new(self.core.address.clone(), config.timeout, config.max_frame_size, move |ch| {
            let core = core.clone();
            thread::spawn(move || serve::serve_channel(&core, ch, chunk));
        });
        Ok(Arc::new(RpcBackend::connect(Box::new(connector), config)?))
    }

    pub fn connect_default(&self) -> Result<Server, DpfError> {
        self.connect(ServerConfig::default())
    }

    /// In-process client over the native C-ABI table of this engine.
    pub fn connect_native(&self, config: ServerConfig) -> Result<Server, DpfError> {
        let table = native_shim::loopback_api_table(self);
        Ok(Arc::new(NativeBackend::from_table(table, config)?))
    }

    /// Serve framed RPC on `127.0.0.1` at an ephemeral port.
    pub fn serve_tcp(&self, config: &ServerConfig) -> Result<TcpServer, DpfError> {
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let local = listener.local_addr()?;
        let stop = Arc::new(AtomicBool::new(false));
        let core = self.core.clone();
        let (chunk, max_frame) = (config.streaming_buffer_size, config.max_frame_size);
        let flag = stop.clone();
        thread::spawn(move || {
            for stream in listener.incoming() {
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                let channel = match stream.map_err(DpfError::from).and_then(|s| TcpChannel::new(s, max_frame)) {
                    Ok(c) => c,
                    Err(e) => {
                        warn!("loopback tcp accept failed: {e}");
                        continue;
                    }
                };
                let core = core.clone();
                thread::spawn(move || serve::serve_channel(&core, channel, chunk));
            }
            debug!("loopback tcp listener on {local} stopped");
        });
        info!("loopback engine {} serving on {local}", self.core.address);
        Ok(TcpServer { local, stop })
    }
}

/// TCP listener of a loopback engine; stops accepting when dropped.
#[derive(Debug)]
pub struct TcpServer {
    local: SocketAddr,
    stop: Arc<AtomicBool>,
}

impl TcpServer {
    pub fn port(&self) -> u16 {
        self.local.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        // wake the blocking accept
        let _ = TcpStream::connect(self.local);
    }
}
