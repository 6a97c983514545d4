//! Typed protocol errors.
//!
//! Внутренние подсистемы (engine, log, transport) возвращают anyhow::Result.
//! На границе сессии всё сводится к ProtoError с одним из закрытых ErrorKind,
//! который и уходит клиенту в теле ответа.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed set of error kinds a request can fail with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Unknown, expired or foreign snapid / wbid / itid.
    InvalidHandle,
    /// Empty key/table, malformed range, unknown method.
    InvalidArgument,
    /// Operation is illegal in the cursor's current state.
    InvalidState,
    /// A per-session handle table is full.
    ResourceExhausted,
    /// Underlying store I/O error, corruption or server-side timeout.
    EngineFailure,
    /// Frame could not be decoded as an envelope.
    ParseError,
    /// Envelope decoded but is not a request.
    InvalidRequest,
}

impl ErrorKind {
    /// JSON-RPC style numeric code used on the wire.
    pub fn code(self) -> i32 {
        match self {
            ErrorKind::InvalidHandle => -32001,
            ErrorKind::InvalidArgument => -32602,
            ErrorKind::InvalidState => -32003,
            ErrorKind::ResourceExhausted => -32004,
            ErrorKind::EngineFailure => -32005,
            ErrorKind::ParseError => -32700,
            ErrorKind::InvalidRequest => -32600,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidHandle => "InvalidHandle",
            ErrorKind::InvalidArgument => "InvalidArgument",
            ErrorKind::InvalidState => "InvalidState",
            ErrorKind::ResourceExhausted => "ResourceExhausted",
            ErrorKind::EngineFailure => "EngineFailure",
            ErrorKind::ParseError => "ParseError",
            ErrorKind::InvalidRequest => "InvalidRequest",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Wire code for a request that missed its deadline; reported with kind EngineFailure.
pub const CODE_TIMEOUT: i32 = -32800;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {message}")]
pub struct ProtoError {
    pub kind: ErrorKind,
    pub message: String,
}

impl ProtoError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_handle(what: &str, handle: u64) -> Self {
        Self::new(
            ErrorKind::InvalidHandle,
            format!("unknown or expired {} {}", what, handle),
        )
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidState, message)
    }

    pub fn exhausted(what: &str, limit: usize) -> Self {
        Self::new(
            ErrorKind::ResourceExhausted,
            format!("too many open {} (limit {})", what, limit),
        )
    }

    /// Свернуть ошибку движка (anyhow с контекстом) в EngineFailure.
    pub fn engine(err: anyhow::Error) -> Self {
        Self::new(ErrorKind::EngineFailure, format!("{:#}", err))
    }
}

pub type ProtoResult<T> = std::result::Result<T, ProtoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_distinct() {
        let all = [
            ErrorKind::InvalidHandle,
            ErrorKind::InvalidArgument,
            ErrorKind::InvalidState,
            ErrorKind::ResourceExhausted,
            ErrorKind::EngineFailure,
            ErrorKind::ParseError,
            ErrorKind::InvalidRequest,
        ];
        let mut codes: Vec<i32> = all.iter().map(|k| k.code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(!codes.contains(&CODE_TIMEOUT));
    }

    #[test]
    fn engine_error_keeps_context_chain() {
        let e = anyhow::anyhow!("disk gone").context("append batch record");
        let pe = ProtoError::engine(e);
        assert_eq!(pe.kind, ErrorKind::EngineFailure);
        assert!(pe.message.contains("append batch record"));
        assert!(pe.message.contains("disk gone"));
    }
}
