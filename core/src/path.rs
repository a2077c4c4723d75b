//! Interpreter path resolution
//!
//! The interpreter must learn its own executable path before it initializes,
//! otherwise it cannot find the virtual environment it belongs to. The path
//! comes from `SIMBRIDGE_PYTHON_BIN`; anything wrong with it means falling back
//! to the system-wide interpreter.
//!
//! The path stays raw bytes here. The interpreter decodes it with the host
//! locale, turning bytes that do not decode into lone surrogates, so a
//! virtual environment under a non-UTF-8 directory still works.

use std::ffi::{OsStr, OsString};
use std::fmt;

use tracing::{error, info};

use crate::config::PYTHON_BIN_VAR;
use crate::error::{EmbedError, Result};

/// Capacity of the interpreter's program-name buffer, in wide characters,
/// including the terminating NUL
#[cfg(unix)]
pub const MAX_PATH_CHARS: usize = libc::PATH_MAX as usize;
#[cfg(not(unix))]
pub const MAX_PATH_CHARS: usize = 260;

/// An interpreter path that fits the program-name buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterPath {
    raw: OsString,
}

impl InterpreterPath {
    /// Bound-check a raw value
    pub fn decode(raw: &OsStr) -> Result<Self> {
        let bytes = raw.as_encoded_bytes();
        if bytes.contains(&0) {
            return Err(EmbedError::PathDecode);
        }

        let len = decoded_len(bytes);
        if len >= MAX_PATH_CHARS {
            return Err(EmbedError::PathTooLong {
                len,
                max: MAX_PATH_CHARS - 1,
            });
        }

        Ok(Self {
            raw: raw.to_os_string(),
        })
    }

    pub fn as_os_str(&self) -> &OsStr {
        &self.raw
    }
}

impl fmt::Display for InterpreterPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw.to_string_lossy())
    }
}

/// Wide characters the path decodes to: one per character, plus one per
/// byte that is not valid UTF-8 (each becomes its own escape)
fn decoded_len(bytes: &[u8]) -> usize {
    bytes
        .utf8_chunks()
        .map(|chunk| chunk.valid().chars().count() + chunk.invalid().len())
        .sum()
}

/// Resolve the configured interpreter path, logging why when there is none
pub fn resolve(raw: Option<&OsStr>) -> Option<InterpreterPath> {
    let Some(raw) = raw else {
        info!("Did not detect Python virtual environment. Using system-wide Python interpreter");
        return None;
    };

    match InterpreterPath::decode(raw) {
        Ok(path) => Some(path),
        Err(err) => {
            error!("{}", err);
            info!("Python executable path ({}): {}", PYTHON_BIN_VAR, raw.to_string_lossy());
            None
        }
    }
}
