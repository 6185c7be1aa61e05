//! DpfError: Unified error type for dpf-client public APIs
//!
//! Every fallible call in the crate returns `Result<_, DpfError>`. Engine-side
//! failures arrive as [`EngineFailure`] records and are translated into the
//! matching variant by [`From<EngineFailure>`].

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Connectivity failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportErrorKind {
    /// No answer within the transport timeout.
    Timeout,
    /// Peer unreachable or connection closed.
    Unavailable,
    /// The caller cancelled a streaming call.
    Cancelled,
    /// Local I/O failure.
    Io,
    /// Malformed or unexpected frame.
    Protocol,
}

impl fmt::Display for TransportErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TransportErrorKind::Timeout => "timeout",
            TransportErrorKind::Unavailable => "unavailable",
            TransportErrorKind::Cancelled => "cancelled",
            TransportErrorKind::Io => "io",
            TransportErrorKind::Protocol => "protocol",
        };
        f.write_str(s)
    }
}

/// Unified error type for dpf-client operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum DpfError {
    /// Connectivity problem between client and engine.
    #[error("transport error ({kind}): {message}")]
    Transport {
        kind: TransportErrorKind,
        message: String,
    },
    /// The engine rejected the call; `message` is authoritative.
    #[error("engine error: {message}{}", EngineContext(.template, .id))]
    Engine {
        message: String,
        template: Option<String>,
        id: Option<u64>,
    },
    /// Handle is null or was already released.
    #[error("null or released object")]
    NullObject,
    /// The requested type does not match the actual type.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),
    /// Feature gated on a newer engine.
    #[error("server version {actual} does not support this feature (requires {required})")]
    VersionNotSupported { required: String, actual: String },
    /// A client-side contract was broken.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),
    /// Index outside the valid range.
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// Key or id not present.
    #[error("not found: {0}")]
    NotFound(String),
    /// Shape, size or location is wrong for the callee.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

struct EngineContext<'a>(&'a Option<String>, &'a Option<u64>);

impl fmt::Display for EngineContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.0, self.1) {
            (Some(t), Some(id)) => write!(f, " (operator `{t}`, object {id})"),
            (Some(t), None) => write!(f, " (operator `{t}`)"),
            (None, Some(id)) => write!(f, " (object {id})"),
            (None, None) => Ok(()),
        }
    }
}

impl DpfError {
    pub fn transport(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        DpfError::Transport {
            kind,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::transport(TransportErrorKind::Protocol, message)
    }

    pub fn cancelled() -> Self {
        Self::transport(TransportErrorKind::Cancelled, "call cancelled by caller")
    }

    pub fn engine(message: impl Into<String>) -> Self {
        DpfError::Engine {
            message: message.into(),
            template: None,
            id: None,
        }
    }

    /// `true` for `TransportError{cancelled}`.
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            DpfError::Transport {
                kind: TransportErrorKind::Cancelled,
                ..
            }
        )
    }

    /// `true` for `NotFound` and for engine messages reporting a missing object.
    pub fn is_not_found(&self) -> bool {
        match self {
            DpfError::NotFound(_) => true,
            DpfError::Engine { message, .. } => message.to_ascii_lowercase().contains("not found"),
            _ => false,
        }
    }
}

/// Optional-query decorator: maps "not found" failures to `Ok(None)`.
///
/// ```
/// use dpf_client::dpf_error::{none_if_not_found, DpfError};
/// let r: Result<i32, DpfError> = Err(DpfError::engine("source operator not found"));
/// assert_eq!(none_if_not_found(r).unwrap(), None);
/// ```
pub fn none_if_not_found<T>(result: Result<T, DpfError>) -> Result<Option<T>, DpfError> {
    match result {
        Ok(v) => Ok(Some(v)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Engine-side error categories carried over the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Generic,
    NotFound,
    OutOfRange,
    TypeMismatch,
    InvalidArgument,
    InvariantViolation,
    NullObject,
    Cancelled,
}

/// Failure record produced by an engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineFailure {
    pub code: ErrorCode,
    pub message: String,
    /// Name of the failing operator, when an evaluation failed.
    pub template: Option<String>,
    /// Id of the failing object, when known.
    pub id: Option<u64>,
}

impl EngineFailure {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            template: None,
            id: None,
        }
    }

    pub fn generic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Generic, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::OutOfRange, message)
    }

    pub fn type_mismatch(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TypeMismatch, message)
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvariantViolation, message)
    }

    pub fn with_operator(mut self, template: impl Into<String>, id: u64) -> Self {
        self.template = Some(template.into());
        self.id = Some(id);
        self
    }
}

impl fmt::Display for EngineFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.code, self.message)
    }
}

impl From<EngineFailure> for DpfError {
    fn from(f: EngineFailure) -> Self {
        match f.code {
            ErrorCode::Generic => DpfError::Engine {
                message: f.message,
                template: f.template,
                id: f.id,
            },
            ErrorCode::NotFound => DpfError::NotFound(f.message),
            ErrorCode::OutOfRange => DpfError::OutOfRange(f.message),
            ErrorCode::TypeMismatch => DpfError::TypeMismatch(f.message),
            ErrorCode::InvalidArgument => DpfError::InvalidArgument(f.message),
            ErrorCode::InvariantViolation => DpfError::InvariantViolation(f.message),
            ErrorCode::NullObject => DpfError::NullObject,
            ErrorCode::Cancelled => DpfError::transport(TransportErrorKind::Cancelled, f.message),
        }
    }
}

impl From<std::io::Error> for DpfError {
    fn from(e: std::io::Error) -> Self {
        use std::io::ErrorKind;
        let kind = match e.kind() {
            ErrorKind::TimedOut | ErrorKind::WouldBlock => TransportErrorKind::Timeout,
            ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::UnexpectedEof => TransportErrorKind::Unavailable,
            _ => TransportErrorKind::Io,
        };
        DpfError::transport(kind, e.to_string())
    }
}

impl From<bincode::Error> for DpfError {
    fn from(e: bincode::Error) -> Self {
        DpfError::protocol(format!("frame codec: {e}"))
    }
}

impl From<serde_json::Error> for DpfError {
    fn from(e: serde_json::Error) -> Self {
        DpfError::protocol(format!("json: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_codes_translate() {
        let e: DpfError = EngineFailure::not_found("no such label").into();
        assert_eq!(e, DpfError::NotFound("no such label".into()));
        let e: DpfError = EngineFailure::generic("boom").with_operator("norm", 7).into();
        assert!(e.to_string().contains("operator `norm`"));
        assert!(e.to_string().contains("object 7"));
    }

    #[test]
    fn decorator_only_swallows_not_found() {
        let ok: Result<u8, DpfError> = Ok(3);
        assert_eq!(none_if_not_found(ok).unwrap(), Some(3));
        let nf: Result<u8, DpfError> = Err(DpfError::NotFound("x".into()));
        assert_eq!(none_if_not_found(nf).unwrap(), None);
        let other: Result<u8, DpfError> = Err(DpfError::NullObject);
        assert!(none_if_not_found(other).is_err());
    }

    #[test]
    fn io_errors_map_to_transport_kinds() {
        let e: DpfError = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow").into();
        assert!(matches!(
            e,
            DpfError::Transport {
                kind: TransportErrorKind::Timeout,
                ..
            }
        ));
    }
}
