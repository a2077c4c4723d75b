//! Interpreter lifecycle manager
//!
//! One [`Embedder`] exists per process and owns the embedded interpreter for
//! the whole simulation run. The host drives it through four operations:
//!
//! - [`Embedder::init`]: start the interpreter and park it, leaving the
//!   native thread free
//! - [`Embedder::run_entry_point`]: load the entry point by name and call it
//!   with the host's arguments
//! - [`Embedder::notify_event`]: forward a simulator event to the
//!   interpreter side
//! - [`Embedder::shutdown`]: tear everything down (idempotent)
//!
//! None of them panics or propagates an error into the host, except `init`
//! when called twice. Failures are logged; `run_entry_point` reports a status.
//!
//! Interpreter code may call back into the host while it runs, so the shared
//! state is never locked across a call into the interpreter. Nested
//! `run_entry_point` and `notify_event` calls behave as top-level ones;
//! only a nested `shutdown` is refused.

use std::ffi::OsStr;
use std::os::raw::c_int;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::args::ArgumentVector;
use crate::boundary::{Boundary, LockGuard, Side};
use crate::config::{self, EmbedConfig, EnvSource, ProcessEnv};
use crate::error::EmbedError;
use crate::interpreter::{Entry, Interpreter, Startup, EVENT_HOOK, FILTER_HOOK, LOG_HOOK};
use crate::logging::{self, LogLevel};
use crate::path::{self, InterpreterPath};

/// Message passed to the event hook when the host supplies none
pub const DEFAULT_EVENT_MESSAGE: &str = "No message provided";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    Initialized,
    ShutDown,
}

/// Outcome of [`Embedder::run_entry_point`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    /// The entry point was called and returned
    Started,
    /// An earlier call already succeeded; nothing was done
    AlreadyRunning,
    Failed,
}

impl RunStatus {
    /// Status code handed to the host
    pub fn code(self) -> c_int {
        match self {
            RunStatus::Started | RunStatus::AlreadyRunning => 0,
            RunStatus::Failed => -1,
        }
    }
}

struct State<O> {
    phase: Phase,
    entry_module: String,
    /// Held from a successful entry-point load until shutdown
    event_fn: Option<Arc<O>>,
}

pub struct Embedder<I: Interpreter, E = ProcessEnv> {
    interpreter: I,
    env: E,
    boundary: Boundary,
    state: Mutex<State<I::Object>>,
    pause: fn(Duration),
}

impl<I: Interpreter> Embedder<I, ProcessEnv> {
    /// Embedder configured from the process environment
    pub fn new(interpreter: I) -> Self {
        Self::with_env(interpreter, ProcessEnv)
    }
}

impl<I: Interpreter, E: EnvSource> Embedder<I, E> {
    pub fn with_env(interpreter: I, env: E) -> Self {
        Self {
            interpreter,
            env,
            boundary: Boundary::new(),
            state: Mutex::new(State {
                phase: Phase::Uninitialized,
                entry_module: config::DEFAULT_ENTRY_MODULE.to_string(),
                event_fn: None,
            }),
            pause: std::thread::sleep,
        }
    }

    /// Replace the debugger-attach wait (a plain sleep by default)
    pub fn with_pause(mut self, pause: fn(Duration)) -> Self {
        self.pause = pause;
        self
    }

    pub fn interpreter(&self) -> &I {
        &self.interpreter
    }

    /// Which side currently owns control
    pub fn side(&self) -> Side {
        self.boundary.side()
    }

    pub fn phase(&self) -> Phase {
        self.lock_state().phase
    }

    /// Whether the event hook is held, i.e. the entry point was loaded
    pub fn is_running(&self) -> bool {
        self.lock_state().event_fn.is_some()
    }

    fn lock_state(&self) -> MutexGuard<'_, State<I::Object>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /* ===================== Init ===================== */

    /// Create and initialize the interpreter
    ///
    /// Afterwards the interpreter lock is released and its thread state saved.
    /// Any failure is logged and leaves the interpreter uninitialized; the
    /// host keeps running without scripting support.
    ///
    /// # Panics
    ///
    /// If the interpreter is already initialized.
    pub fn init(&self) {
        let config = EmbedConfig::load(&self.env);
        if let Some(raw) = &config.log_level {
            apply_log_level(raw);
        }

        let phase = self.phase();
        assert!(
            phase != Phase::Initialized,
            "the interpreter must not be initialized twice"
        );
        if phase == Phase::ShutDown {
            error!("{}", EmbedError::AlreadyShutDown);
            return;
        }

        let crossing = self.boundary.cross();

        // The program name must be set before initialization so the
        // interpreter can locate its prefix from it
        let program = path::resolve(config.python_bin.as_deref());
        if let Some(program) = &program {
            info!("Using Python interpreter at {}", program);
        }

        let startup = Startup::new(program);
        if let Err(err) = self.interpreter.initialize(&startup) {
            error!("{:#}", err);
            return;
        }

        if let Some(expected) = &startup.program {
            self.check_executable(expected);
        }

        self.interpreter.save_thread();
        drop(crossing);

        let mut state = self.lock_state();
        state.entry_module = config.entry_module;
        state.phase = Phase::Initialized;
        drop(state);

        debug!("Interpreter initialized");

        if let Some(raw) = &config.attach {
            self.wait_for_debugger(raw);
        }
    }

    fn check_executable(&self, expected: &InterpreterPath) {
        match self.interpreter.executable() {
            Ok(actual) if actual.as_os_str() == expected.as_os_str() => {}
            Ok(actual) => error!(
                "Unexpected sys.executable value (expected '{}', got '{}')",
                expected,
                actual.to_string_lossy()
            ),
            Err(err) => error!("{:#}", err),
        }
    }

    fn wait_for_debugger(&self, raw: &OsStr) {
        match config::parse_attach_delay(raw) {
            Ok(delay) => {
                warn!(
                    "Waiting for {} seconds - attach to PID {} with your debugger",
                    delay.as_secs(),
                    std::process::id()
                );
                (self.pause)(delay);
            }
            Err(err) => error!("{}", err),
        }
    }

    /* ===================== Entry Point ===================== */

    /// Load the entry point and call it with the host's arguments
    ///
    /// Idempotent once the event hook is held: later calls, including ones
    /// made from inside the running entry point, return
    /// [`RunStatus::AlreadyRunning`] without touching the interpreter.
    pub fn run_entry_point(&self, argv: &ArgumentVector) -> RunStatus {
        let entry_module = {
            let state = self.lock_state();
            if state.event_fn.is_some() {
                return RunStatus::AlreadyRunning;
            }
            if state.phase != Phase::Initialized {
                error!("Cannot run the entry point: {}", EmbedError::NotInitialized);
                return RunStatus::Failed;
            }
            state.entry_module.clone()
        };

        let crossing = self.boundary.cross();
        let _lock = LockGuard::acquire(&crossing, &self.interpreter);
        match self.bootstrap(&entry_module, argv) {
            Ok(()) => RunStatus::Started,
            Err(err) => {
                error!("{:#}", err);
                RunStatus::Failed
            }
        }
    }

    fn bootstrap(&self, entry_module: &str, argv: &ArgumentVector) -> anyhow::Result<()> {
        let Entry {
            module,
            entry_point,
        } = self.interpreter.load_entry(entry_module)?;

        let log = self
            .interpreter
            .getattr(&module, LOG_HOOK)
            .context("Failed to get the log hook from the entry module")?;
        let filter = self
            .interpreter
            .getattr(&module, FILTER_HOOK)
            .context("Failed to get the log filter hook from the entry module")?;
        self.interpreter.install_log_hooks(log, filter);

        let event_fn = self
            .interpreter
            .getattr(&module, EVENT_HOOK)
            .context("Failed to get the event hook from the entry module")?;
        self.lock_state().event_fn = Some(Arc::new(event_fn));

        // The state stays unlocked while Python runs; it may call back in
        debug!("Calling entry point with {} arguments", argv.len());
        self.interpreter
            .call_entry(&entry_point, argv)
            .context("Entry point failed")?;

        Ok(())
    }

    /* ===================== Events ===================== */

    /// Forward a simulator event; a no-op until the entry point is loaded
    ///
    /// Events raised while interpreter code is running (the entry point or
    /// another event handler calling into the simulator) are delivered too.
    pub fn notify_event(&self, message: Option<&str>) {
        let event_fn = self.lock_state().event_fn.clone();
        let Some(event_fn) = event_fn else {
            return;
        };

        let crossing = self.boundary.cross();
        let _lock = LockGuard::acquire(&crossing, &self.interpreter);
        let message = message.unwrap_or(DEFAULT_EVENT_MESSAGE);
        if let Err(err) = self.interpreter.call_event(&event_fn, message) {
            error!("Passing event to upper layer failed: {:#}", err);
        }
    }

    /* ===================== Shutdown ===================== */

    /// Finalize the interpreter
    ///
    /// The host may call this from an error path and again from its final
    /// cleanup, so anything but the first call on an initialized interpreter
    /// is a no-op. A call made while interpreter code is on the stack is
    /// refused.
    pub fn shutdown(&self) {
        if !self.interpreter.is_initialized() {
            debug!("Interpreter not initialized, nothing to clean up");
            return;
        }
        if self.boundary.side() == Side::Interpreter {
            error!("Cannot shut down the interpreter: {}", EmbedError::Reentrant);
            return;
        }

        let crossing = self.boundary.cross();
        let lock = LockGuard::acquire(&crossing, &self.interpreter);
        let event_fn = {
            let mut state = self.lock_state();
            state.phase = Phase::ShutDown;
            state.event_fn.take()
        };
        drop(event_fn);
        self.interpreter.finalize_log_hooks();
        // Exit handlers run here and may still call back in
        lock.finalize();
        drop(crossing);

        info!("Interpreter finalized");
    }
}

fn apply_log_level(raw: &OsStr) {
    let parsed = match raw.to_str() {
        Some(name) => name.parse::<LogLevel>(),
        None => Err(EmbedError::InvalidLogLevel(raw.to_string_lossy().into_owned())),
    };

    match parsed {
        Ok(level) => logging::set_level(level),
        Err(err) => error!("{}", err),
    }
}
