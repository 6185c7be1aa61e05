//! Server configuration and the environment-variable locator.
//!
//! A [`ServerConfig`] selects the backend (`Rpc` or `InProcess`), where to
//! find it, and the transport-level knobs shared by every call made through
//! that backend (chunk size, progress threshold, timeout).

use crate::dpf_error::DpfError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Selects the backend protocol.
pub const ENV_PROTOCOL: &str = "DPF_SERVER_PROTOCOL";
/// Engine host for the RPC backend.
pub const ENV_IP: &str = "DPF_IP";
/// Engine port for the RPC backend.
pub const ENV_PORT: &str = "DPF_PORT";
/// Path to the native engine library for the in-process backend.
pub const ENV_LIB_PATH: &str = "DPF_LIB_PATH";
/// Chunk size in bytes for streamed arrays.
pub const ENV_STREAMING_BUFFER_SIZE: &str = "DPF_STREAMING_BUFFER_SIZE";
/// Transport timeout in milliseconds; `0` disables it.
pub const ENV_TIMEOUT_MS: &str = "DPF_TIMEOUT_MS";

pub const DEFAULT_IP: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 50052;
pub const DEFAULT_STREAMING_BUFFER_SIZE: usize = 512 * 1024;
/// Downloads report progress above this many elements.
pub const DEFAULT_PROGRESS_THRESHOLD: usize = 1_000_000;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// How the client reaches the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CommunicationProtocol {
    /// Message-based RPC to a remote engine.
    #[default]
    Rpc,
    /// C-ABI function table loaded from a native library.
    InProcess,
}

impl FromStr for CommunicationProtocol {
    type Err = DpfError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "rpc" | "grpc" | "remote" => Ok(CommunicationProtocol::Rpc),
            "inprocess" | "in_process" | "native" => Ok(CommunicationProtocol::InProcess),
            other => Err(DpfError::InvalidArgument(format!(
                "unknown protocol `{other}` (expected `rpc` or `inprocess`)"
            ))),
        }
    }
}

/// Connection and transfer settings for one backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub protocol: CommunicationProtocol,
    pub ip: String,
    pub port: u16,
    pub lib_path: Option<PathBuf>,
    pub streaming_buffer_size: usize,
    pub progress_threshold: usize,
    pub timeout: Option<Duration>,
    pub max_frame_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: CommunicationProtocol::default(),
            ip: DEFAULT_IP.to_string(),
            port: DEFAULT_PORT,
            lib_path: None,
            streaming_buffer_size: DEFAULT_STREAMING_BUFFER_SIZE,
            progress_threshold: DEFAULT_PROGRESS_THRESHOLD,
            timeout: Some(DEFAULT_TIMEOUT),
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl ServerConfig {
    /// Defaults overridden by any of the `DPF_*` environment variables.
    pub fn from_env() -> Result<Self, DpfError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DpfError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut cfg = ServerConfig::default();
        if let Some(p) = lookup(ENV_PROTOCOL) {
            cfg.protocol = p.parse()?;
        }
        if let Some(ip) = lookup(ENV_IP) {
            cfg.ip = ip;
        }
        if let Some(port) = lookup(ENV_PORT) {
            cfg.port = parse_var(ENV_PORT, &port)?;
        }
        if let Some(path) = lookup(ENV_LIB_PATH) {
            cfg.lib_path = Some(PathBuf::from(path));
        }
        if let Some(size) = lookup(ENV_STREAMING_BUFFER_SIZE) {
            cfg = cfg.with_streaming_buffer_size(parse_var(ENV_STREAMING_BUFFER_SIZE, &size)?)?;
        }
        if let Some(ms) = lookup(ENV_TIMEOUT_MS) {
            let ms: u64 = parse_var(ENV_TIMEOUT_MS, &ms)?;
            cfg.timeout = (ms > 0).then(|| Duration::from_millis(ms));
        }
        Ok(cfg)
    }

    pub fn rpc(ip: impl Into<String>, port: u16) -> Self {
        Self {
            protocol: CommunicationProtocol::Rpc,
            ip: ip.into(),
            port,
            ..Self::default()
        }
    }

    pub fn in_process(lib_path: impl Into<PathBuf>) -> Self {
        Self {
            protocol: CommunicationProtocol::InProcess,
            lib_path: Some(lib_path.into()),
            ..Self::default()
        }
    }

    /// # Errors
    /// `InvalidArgument` when `bytes == 0`.
    pub fn with_streaming_buffer_size(mut self, bytes: usize) -> Result<Self, DpfError> {
        if bytes == 0 {
            return Err(DpfError::InvalidArgument(
                "streaming buffer size must be positive".into(),
            ));
        }
        self.streaming_buffer_size = bytes;
        Ok(self)
    }

    pub fn with_progress_threshold(mut self, elements: usize) -> Self {
        self.progress_threshold = elements;
        self
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// `ip:port` as used by TCP connectors.
    pub fn address(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

fn parse_var<T: FromStr>(key: &str, raw: &str) -> Result<T, DpfError> {
    raw.trim()
        .parse()
        .map_err(|_| DpfError::InvalidArgument(format!("{key}: cannot parse `{raw}`")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |k| map.get(k).cloned()
    }

    #[test]
    fn defaults_when_nothing_set() {
        let cfg = ServerConfig::from_lookup(|_| None).unwrap();
        assert_eq!(cfg, ServerConfig::default());
        assert_eq!(cfg.address(), "127.0.0.1:50052");
    }

    #[test]
    fn env_overrides() {
        let cfg = ServerConfig::from_lookup(lookup(&[
            (ENV_PROTOCOL, "InProcess"),
            (ENV_LIB_PATH, "/opt/engine/libdpf.so"),
            (ENV_PORT, "6000"),
            (ENV_STREAMING_BUFFER_SIZE, "4096"),
            (ENV_TIMEOUT_MS, "0"),
        ]))
        .unwrap();
        assert_eq!(cfg.protocol, CommunicationProtocol::InProcess);
        assert_eq!(cfg.port, 6000);
        assert_eq!(cfg.streaming_buffer_size, 4096);
        assert_eq!(cfg.timeout, None);
        assert_eq!(cfg.lib_path, Some(PathBuf::from("/opt/engine/libdpf.so")));
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(ServerConfig::from_lookup(lookup(&[(ENV_PORT, "port")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[(ENV_PROTOCOL, "carrier-pigeon")])).is_err());
        assert!(ServerConfig::from_lookup(lookup(&[(ENV_STREAMING_BUFFER_SIZE, "0")])).is_err());
    }
}
