//! Error types for spec compilation, session supervision and resume.

use std::fmt;
use thiserror::Error;

use crate::transfer::codes;

pub type Result<T> = std::result::Result<T, TransferError>;

/// Code carried by failures that did not originate from the transfer
/// executable (spawn failure, accept timeout, bad exit status).
pub const SYNTHETIC_CODE: u32 = 0;

/// A coded transfer failure, either reported by the executable on its
/// management channel or synthesized from an OS-level failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaspError {
    pub code: u32,
    pub message: String,
    retryable: bool,
}

impl FaspError {
    /// Build an error whose retry eligibility comes from the code table.
    pub fn new(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            retryable: codes::lookup(code).is_some_and(|info| info.retryable),
        }
    }

    /// Non-retryable error for failures outside the protocol.
    pub fn synthetic(message: impl Into<String>) -> Self {
        Self::new(SYNTHETIC_CODE, message)
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }

    pub fn is_retryable(&self) -> bool {
        self.retryable
    }

    pub fn mnemonic(&self) -> Option<&'static str> {
        codes::lookup(self.code).map(|info| info.mnemonic)
    }
}

impl fmt::Display for FaspError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.mnemonic() {
            Some(mnemonic) => write!(f, "{} (code {}, {})", self.message, self.code, mnemonic),
            None => write!(f, "{} (code {})", self.message, self.code),
        }
    }
}

impl std::error::Error for FaspError {}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("missing mandatory parameter: {key}")]
    MissingParameter { key: String },

    #[error("parameter {key}: value {value} has type {actual}, expected {expected}")]
    InvalidType {
        key: String,
        value: String,
        actual: &'static str,
        expected: String,
    },

    #[error("parameter {key}: unsupported value {value:?}, expected one of: {allowed}")]
    InvalidValue {
        key: String,
        value: String,
        allowed: String,
    },

    #[error("invalid transfer spec: {0}")]
    InvalidSpec(String),

    #[error("management protocol violation: {0}")]
    Protocol(String),

    #[error(transparent)]
    Fasp(#[from] FaspError),

    #[error("maximum number of retries reached ({iter_max}), last error: {last}")]
    RetriesExhausted { iter_max: u32, last: FaspError },

    #[error("no such job: {0}")]
    UnknownJob(String),

    #[error("job {job} has no session {index}")]
    UnknownSession { job: String, index: usize },

    #[error("management channel of job {job} session {index} is not open")]
    ChannelClosed { job: String, index: usize },

    #[error("operation not supported by this agent: {0}")]
    Unsupported(&'static str),

    #[error("agent error: {0}")]
    Agent(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransferError {
    /// True for errors raised while compiling a spec, before anything spawns.
    pub fn is_compilation(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. }
                | Self::InvalidType { .. }
                | Self::InvalidValue { .. }
                | Self::InvalidSpec(_)
        )
    }

    /// The coded transfer error behind this error, if any.
    pub fn fasp(&self) -> Option<&FaspError> {
        match self {
            Self::Fasp(err) => Some(err),
            Self::RetriesExhausted { last, .. } => Some(last),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_from_table() {
        // 16: connection lost
        assert!(FaspError::new(16, "lost").is_retryable());
        // 19: authentication failure
        assert!(!FaspError::new(19, "auth").is_retryable());
        assert!(!FaspError::new(9999, "unknown").is_retryable());
        assert!(!FaspError::synthetic("spawn failed").is_retryable());
    }

    #[test]
    fn test_override_retryable() {
        let err = FaspError::new(19, "bearer token expired").with_retryable(true);
        assert!(err.is_retryable());
        assert_eq!(err.code, 19);
    }

    #[test]
    fn test_display_includes_mnemonic() {
        let err = FaspError::new(4, "No such file or directory");
        assert_eq!(
            err.to_string(),
            "No such file or directory (code 4, ERR_NO_SUCH_FILE)"
        );
        assert_eq!(FaspError::synthetic("boom").to_string(), "boom (code 0)");
    }

    #[test]
    fn test_compilation_classification() {
        let err = TransferError::MissingParameter {
            key: "remote_host".into(),
        };
        assert!(err.is_compilation());
        assert!(!TransferError::Protocol("bad".into()).is_compilation());
    }
}
