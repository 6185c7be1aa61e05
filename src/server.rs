//! Server locator and server-level operations.
//!
//! The global server is the only process-wide connection state. It is
//! created on first use from [`ServerConfig::from_env`] and torn down
//! explicitly by [`release_server`]; a mutex serialises initialisation.

use crate::config::{CommunicationProtocol, ServerConfig};
use crate::dpf_error::DpfError;
use crate::transport::call::{BaseCall, Call, ServerInfo};
use crate::transport::native::NativeBackend;
use crate::transport::rpc::RpcBackend;
use log::info;
use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::sync::Arc;

pub use crate::transport::{Server, requires_version};

static GLOBAL_SERVER: Lazy<Mutex<Option<Server>>> = Lazy::new(|| Mutex::new(None));

/// Open a backend as described by `config`.
pub fn connect_to_server(config: &ServerConfig) -> Result<Server, DpfError> {
    let server: Server = match config.protocol {
        CommunicationProtocol::Rpc => Arc::new(RpcBackend::connect_tcp(config.clone())?),
        CommunicationProtocol::InProcess => Arc::new(NativeBackend::load(config.clone())?),
    };
    info!("connected to {:?} server at {}", config.protocol, server.address());
    Ok(server)
}

/// The process-wide server, connecting from the environment on first use.
pub fn global_server() -> Result<Server, DpfError> {
    let mut guard = GLOBAL_SERVER.lock();
    if let Some(s) = guard.as_ref() {
        return Ok(s.clone());
    }
    let server = connect_to_server(&ServerConfig::from_env()?)?;
    *guard = Some(server.clone());
    Ok(server)
}

/// Install `server` as the global one; returns the previous server.
pub fn set_global_server(server: Server) -> Option<Server> {
    GLOBAL_SERVER.lock().replace(server)
}

pub fn has_global_server() -> bool {
    GLOBAL_SERVER.lock().is_some()
}

/// Drop the global server and release its connection.
pub fn release_server() {
    if let Some(s) = GLOBAL_SERVER.lock().take() {
        info!("releasing global server at {}", s.address());
        s.release();
    }
}

/// Explicit server if given, the global one otherwise.
pub fn resolve(server: Option<&Server>) -> Result<Server, DpfError> {
    match server {
        Some(s) => Ok(s.clone()),
        None => global_server(),
    }
}

pub fn server_info(server: &Server) -> Result<ServerInfo, DpfError> {
    server.call(Call::Base(BaseCall::ServerInfo))?.into_server_info()
}

/// Number of live engine handles, all clients included.
pub fn live_object_count(server: &Server) -> Result<usize, DpfError> {
    server.call(Call::Base(BaseCall::LiveObjectCount))?.into_count()
}

/// Names of the operators the engine can instantiate.
pub fn operator_names(server: &Server) -> Result<Vec<String>, DpfError> {
    server.call(Call::Base(BaseCall::OperatorNames))?.into_strings()
}

/// Ask the engine to stop accepting new objects.
pub fn prepare_shutdown(server: &Server) -> Result<(), DpfError> {
    info!("prepare shutdown of {}", server.address());
    server.call(Call::Base(BaseCall::PrepareShutdown))?.into_unit()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::loopback::LoopbackEngine;
    use serial_test::serial;

    #[test]
    #[serial]
    fn global_server_can_be_installed_and_released() {
        let engine = LoopbackEngine::new();
        let server = engine.connect_default().unwrap();
        set_global_server(server.clone());
        let got = resolve(None).unwrap();
        assert_eq!(got.id(), server.id());
        release_server();
        assert!(!has_global_server());
        assert!(server.is_released());
    }

    #[test]
    fn server_level_calls() {
        let engine = LoopbackEngine::with_version("6.2");
        let server = engine.connect_default().unwrap();
        let info = server_info(&server).unwrap();
        assert_eq!(info.version, "6.2");
        assert!(info.address.starts_with("loopback://"));
        assert!(operator_names(&server).unwrap().contains(&"forward".to_string()));
        assert!(requires_version(server.as_ref(), "6.0").is_ok());
        assert!(matches!(
            requires_version(server.as_ref(), "7.0"),
            Err(DpfError::VersionNotSupported { .. })
        ));
    }
}
