//! Environment-driven configuration
//!
//! Everything the embedding layer can be told comes from environment
//! variables, read once per `Init`. The lookup goes through [`EnvSource`] so
//! tests can hand in a plain map instead of mutating the process environment.
//!
//! Values are read as `OsString`: the host process may carry variables that
//! are not valid Unicode and reading them must never panic.

use std::borrow::Borrow;
use std::collections::HashMap;
use std::ffi::{OsStr, OsString};
use std::hash::Hash;
use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::error::{EmbedError, Result};

pub const LOG_LEVEL_VAR: &str = "SIMBRIDGE_LOG_LEVEL";
pub const PYTHON_BIN_VAR: &str = "SIMBRIDGE_PYTHON_BIN";
pub const ATTACH_VAR: &str = "SIMBRIDGE_ATTACH";
pub const ENTRY_MODULE_VAR: &str = "SIMBRIDGE_ENTRY_MODULE";
pub const ENV_FILE_VAR: &str = "SIMBRIDGE_ENV_FILE";

/// Module imported by `RunEntryPoint` to locate the entry point
pub const DEFAULT_ENTRY_MODULE: &str = "simbridge.entry";

/* ===================== Sources ===================== */

/// Read-only key/value lookup
pub trait EnvSource {
    fn get(&self, key: &str) -> Option<OsString>;
}

/// The real process environment
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessEnv;

impl EnvSource for ProcessEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

impl<K, V> EnvSource for HashMap<K, V>
where
    K: Borrow<str> + Hash + Eq,
    V: AsRef<OsStr>,
{
    fn get(&self, key: &str) -> Option<OsString> {
        HashMap::get(self, key).map(|v| v.as_ref().to_os_string())
    }
}

impl<T: EnvSource + ?Sized> EnvSource for &T {
    fn get(&self, key: &str) -> Option<OsString> {
        (**self).get(key)
    }
}

/// A primary source with fallback values loaded from a dotenv file
///
/// The file never overrides the primary source and is never written back
/// into the process environment.
#[derive(Debug)]
pub struct Layered<E> {
    primary: E,
    file: HashMap<String, String>,
}

impl<E: EnvSource> Layered<E> {
    /// Overlay the file named by `SIMBRIDGE_ENV_FILE`, if the primary source sets it
    pub fn from_source(primary: E) -> Self {
        let file = match primary.get(ENV_FILE_VAR) {
            Some(path) => read_env_file(Path::new(&path)),
            None => HashMap::new(),
        };
        Self { primary, file }
    }
}

impl<E: EnvSource> EnvSource for Layered<E> {
    fn get(&self, key: &str) -> Option<OsString> {
        self.primary
            .get(key)
            .or_else(|| self.file.get(key).map(OsString::from))
    }
}

fn read_env_file(path: &Path) -> HashMap<String, String> {
    let iter = match dotenvy::from_path_iter(path) {
        Ok(iter) => iter,
        Err(err) => {
            warn!("Ignoring {} {}: {}", ENV_FILE_VAR, path.display(), err);
            return HashMap::new();
        }
    };

    let mut values = HashMap::new();
    for item in iter {
        match item {
            Ok((key, value)) => {
                values.insert(key, value);
            }
            Err(err) => {
                warn!("Ignoring {} {}: {}", ENV_FILE_VAR, path.display(), err);
                return HashMap::new();
            }
        }
    }
    values
}

/* ===================== Resolved Configuration ===================== */

/// Raw configuration values for one `Init`
///
/// Values stay raw here; each lifecycle step parses (and reports) its own.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EmbedConfig {
    pub log_level: Option<OsString>,
    pub python_bin: Option<OsString>,
    pub attach: Option<OsString>,
    pub entry_module: String,
}

impl EmbedConfig {
    pub fn load(env: &impl EnvSource) -> Self {
        let env = Layered::from_source(env);

        let entry_module = match env.get(ENTRY_MODULE_VAR) {
            Some(name) => match name.into_string() {
                Ok(name) if !name.is_empty() => name,
                Ok(_) => DEFAULT_ENTRY_MODULE.to_string(),
                Err(name) => {
                    warn!(
                        "{} is not valid UTF-8 ({:?}), using {}",
                        ENTRY_MODULE_VAR, name, DEFAULT_ENTRY_MODULE
                    );
                    DEFAULT_ENTRY_MODULE.to_string()
                }
            },
            None => DEFAULT_ENTRY_MODULE.to_string(),
        };

        Self {
            log_level: env.get(LOG_LEVEL_VAR),
            python_bin: env.get(PYTHON_BIN_VAR),
            attach: env.get(ATTACH_VAR),
            entry_module,
        }
    }
}

/* ===================== Attach Delay ===================== */

/// Parse the debugger attach delay
///
/// Accepts an unsigned base-10 integer of seconds, at least 1 and below
/// `u32::MAX`. Surrounding whitespace and a leading `+` are tolerated.
pub fn parse_attach_delay(raw: &OsStr) -> Result<Duration> {
    let invalid = EmbedError::AttachInvalid { var: ATTACH_VAR };
    let out_of_range = EmbedError::AttachOutOfRange { var: ATTACH_VAR };

    let text = raw.to_str().ok_or(invalid.clone())?.trim();
    let digits = text.strip_prefix('+').unwrap_or(text);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(invalid);
    }

    let seconds: u64 = digits.parse().map_err(|_| out_of_range.clone())?;
    if seconds >= u64::from(u32::MAX) {
        return Err(out_of_range);
    }
    if seconds == 0 {
        return Err(invalid);
    }

    Ok(Duration::from_secs(seconds))
}
