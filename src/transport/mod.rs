//! Transport abstraction: one call surface over interchangeable backends.
//!
//! [`Backend`] is the API object injected into every handle. Two production
//! implementations exist, [`rpc::RpcBackend`] (framed messages over a
//! [`channel::Channel`]) and [`native::NativeBackend`] (C-ABI function table),
//! plus the in-memory [`loopback`] engine used by the tests.
//!
//! A process may hold objects from several backends at once. Objects never
//! cross backends implicitly; every call checks that its arguments live on
//! the same [`BackendId`].

pub mod call;
pub mod channel;
pub mod loopback;
pub mod native;
pub mod rpc;
pub mod wire;

use crate::codec::Payload;
use crate::config::{CommunicationProtocol, ServerConfig};
use crate::dpf_error::DpfError;
use crate::progress::ProgressSink;
use crate::session::ProgressEvent;
use call::{Call, ObjectId, Reply};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Shared, type-erased backend.
pub type Server = Arc<dyn Backend>;

/// Process-unique identity of a backend instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendId(u64);

impl BackendId {
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        BackendId(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// `(major, minor)` engine version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerVersion {
    pub major: u32,
    pub minor: u32,
}

impl ServerVersion {
    pub const fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn meets(self, required: ServerVersion) -> bool {
        self >= required
    }
}

impl FromStr for ServerVersion {
    type Err = DpfError;

    /// Accepts `"7"`, `"7.0"` and `"7.0.1"` (patch ignored).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || DpfError::InvalidArgument(format!("malformed server version `{s}`"));
        let mut parts = s.trim().split('.');
        let major = parts.next().ok_or_else(bad)?.parse().map_err(|_| bad())?;
        let minor = match parts.next() {
            Some(m) => m.parse().map_err(|_| bad())?,
            None => 0,
        };
        Ok(Self { major, minor })
    }
}

impl fmt::Display for ServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Cooperative cancellation flag for streaming calls.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-call knobs for bulk operations.
#[derive(Default)]
pub struct TransferOptions<'a> {
    pub progress: Option<&'a mut dyn ProgressSink>,
    pub cancel: Option<CancelToken>,
}

impl<'a> TransferOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress(mut self, sink: &'a mut dyn ProgressSink) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn with_cancel(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Reborrow of the sink for one transfer.
    pub fn progress(&mut self) -> Option<&mut dyn ProgressSink> {
        match self.progress.as_mut() {
            Some(p) => {
                let p: &mut dyn ProgressSink = &mut **p;
                Some(p)
            }
            None => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(CancelToken::is_cancelled)
    }
}

impl fmt::Debug for TransferOptions<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferOptions")
            .field("progress", &self.progress.is_some())
            .field("cancel", &self.cancel)
            .finish()
    }
}

/// Uniform call surface of an engine connection.
///
/// Implementations must be callable from several threads; each call blocks
/// until its reply (or its whole stream) has been received.
pub trait Backend: Send + Sync + fmt::Debug {
    fn id(&self) -> BackendId;

    fn kind(&self) -> CommunicationProtocol;

    /// Address other engines can reach this one at.
    fn address(&self) -> String;

    fn version(&self) -> ServerVersion;

    fn config(&self) -> &ServerConfig;

    /// Plain request/response.
    fn call(&self, call: Call) -> Result<Reply, DpfError>;

    /// Stream `payload` to the engine as part of `call`.
    ///
    /// # Errors
    /// `Transport{Cancelled}` if the token fires; the engine object is left
    /// unchanged in that case.
    fn upload(
        &self,
        call: Call,
        payload: &Payload,
        opts: &mut TransferOptions<'_>,
    ) -> Result<Reply, DpfError>;

    /// Stream an array back from the engine.
    ///
    /// # Errors
    /// `Transport{Cancelled}` if the token fires; nothing partial is returned.
    fn download(&self, call: Call, opts: &mut TransferOptions<'_>) -> Result<Payload, DpfError>;

    /// Long-lived call delivering session events until the session closes
    /// or `on_event` returns `false`.
    fn listen(
        &self,
        session: ObjectId,
        on_event: &mut dyn FnMut(ProgressEvent) -> bool,
    ) -> Result<(), DpfError>;

    /// Tear down the connection; later deleters become no-ops.
    fn release(&self);

    fn is_released(&self) -> bool;
}

/// Fail with `VersionNotSupported` unless the engine is at least `required`.
///
/// # Errors
/// `VersionNotSupported` with both versions, or `InvalidArgument` if
/// `required` does not parse.
pub fn requires_version(server: &dyn Backend, required: &str) -> Result<(), DpfError> {
    let req: ServerVersion = required.parse()?;
    let actual = server.version();
    if actual.meets(req) {
        Ok(())
    } else {
        Err(DpfError::VersionNotSupported {
            required: req.to_string(),
            actual: actual.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_parse_and_order() {
        let v: ServerVersion = "7.1".parse().unwrap();
        assert_eq!(v, ServerVersion::new(7, 1));
        assert_eq!("5".parse::<ServerVersion>().unwrap(), ServerVersion::new(5, 0));
        assert!(v.meets(ServerVersion::new(5, 0)));
        assert!(!ServerVersion::new(4, 0).meets(ServerVersion::new(5, 0)));
        assert!("x.1".parse::<ServerVersion>().is_err());
    }

    #[test]
    fn backend_ids_are_unique() {
        assert_ne!(BackendId::next(), BackendId::next());
    }

    #[test]
    fn cancel_token_is_shared() {
        let t = CancelToken::new();
        let opts = TransferOptions::new().with_cancel(t.clone());
        assert!(!opts.is_cancelled());
        t.cancel();
        assert!(opts.is_cancelled());
    }
}
