//! Logging integration
//!
//! Diagnostics are plain `tracing` events. The host decides how loud they
//! are through [`LogLevel`], which mirrors the simulator's level names and the
//! numeric levels Python's `logging` uses, so one value can drive both the
//! native filter and the interpreter-side loggers.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use tracing::level_filters::LevelFilter;
use tracing::Level;
use tracing_subscriber::layer::{Layer, Layered, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::EmbedError;

/// Extra layer that sees every event passing the level filter
pub type ForwardLayer = Box<dyn Layer<Registry> + Send + Sync>;

type Base = Layered<Option<ForwardLayer>, Registry>;

static FILTER: OnceLock<reload::Handle<LevelFilter, Base>> = OnceLock::new();
static LEVEL: AtomicU8 = AtomicU8::new(LogLevel::Info as u8);

/* ===================== Levels ===================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    Trace = 5,
    Debug = 10,
    Info = 20,
    Warning = 30,
    Error = 40,
    Critical = 50,
}

impl LogLevel {
    pub const ALL: [LogLevel; 6] = [
        LogLevel::Critical,
        LogLevel::Error,
        LogLevel::Warning,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogLevel::Critical => "CRITICAL",
            LogLevel::Error => "ERROR",
            LogLevel::Warning => "WARNING",
            LogLevel::Info => "INFO",
            LogLevel::Debug => "DEBUG",
            LogLevel::Trace => "TRACE",
        }
    }

    /// Level number as understood by Python's `logging` module
    pub fn numeric(self) -> i32 {
        self as i32
    }

    pub fn filter(self) -> LevelFilter {
        match self {
            LogLevel::Critical | LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warning => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }

    pub fn from_tracing(level: &Level) -> Self {
        match *level {
            Level::ERROR => LogLevel::Error,
            Level::WARN => LogLevel::Warning,
            Level::INFO => LogLevel::Info,
            Level::DEBUG => LogLevel::Debug,
            Level::TRACE => LogLevel::Trace,
        }
    }

    fn from_u8(value: u8) -> Self {
        Self::ALL
            .into_iter()
            .find(|level| *level as u8 == value)
            .unwrap_or(LogLevel::Info)
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact, case-sensitive match on the level name
impl FromStr for LogLevel {
    type Err = EmbedError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| EmbedError::InvalidLogLevel(s.to_string()))
    }
}

/* ===================== Subscriber ===================== */

/// Install the process-wide subscriber
///
/// Returns false when a subscriber is already installed, either by an
/// earlier call or by the host. The level filter then only tracks
/// [`set_level`] through [`level`].
pub fn install(forward: Option<ForwardLayer>) -> bool {
    if FILTER.get().is_some() {
        return false;
    }

    let (filter, handle) = reload::Layer::new(level().filter());
    let subscriber = Registry::default().with(forward).with(filter).with(
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false),
    );

    match subscriber.try_init() {
        Ok(()) => FILTER.set(handle).is_ok(),
        Err(_) => false,
    }
}

/// Current host log level
pub fn level() -> LogLevel {
    LogLevel::from_u8(LEVEL.load(Ordering::Relaxed))
}

/// Change the host log level
pub fn set_level(level: LogLevel) {
    LEVEL.store(level as u8, Ordering::Relaxed);
    if let Some(handle) = FILTER.get() {
        // Only fails if the subscriber was dropped, which a global one never is
        let _ = handle.modify(|filter| *filter = level.filter());
    }
}
