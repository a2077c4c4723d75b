//! Error types for the embedding layer
//!
//! `EmbedError` classifies the failures the lifecycle manager reasons about
//! (bad configuration, boundary misuse). Failures raised by the interpreter
//! itself travel as `anyhow::Error` with context naming the step that failed.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EmbedError {
    /* ===================== Configuration ===================== */
    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Unable to set Python program name: interpreter path contains a NUL byte")]
    PathDecode,

    #[error("Unable to set Python program name: path to interpreter too long ({len} characters, limit {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("{var} only needs to be set to ~30 seconds")]
    AttachOutOfRange { var: &'static str },

    #[error("{var} must be set to an integer base 10 or omitted")]
    AttachInvalid { var: &'static str },

    /* ===================== Lifecycle ===================== */
    #[error("called from interpreter code, which is still running")]
    Reentrant,

    #[error("interpreter is not initialized")]
    NotInitialized,

    #[error("re-initializing the interpreter after shutdown is not supported")]
    AlreadyShutDown,
}

pub type Result<T, E = EmbedError> = std::result::Result<T, E>;
