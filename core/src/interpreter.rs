//! The interpreter seam
//!
//! The lifecycle manager drives an embedded interpreter only through
//! [`Interpreter`]. The CPython implementation lives in the Python binding
//! crate; tests drive a scripted fake.
//!
//! Unless stated otherwise a method must be called while the calling thread
//! holds the interpreter lock (see [`crate::boundary::LockGuard`]).

use std::ffi::OsString;

use anyhow::Result;

use crate::args::ArgumentVector;
use crate::path::InterpreterPath;

/// `argv[0]` presented to the interpreter's own initialization
pub const PROGRAM_NAME: &str = "simbridge";

/// Entry-module attribute receiving native log records
pub const LOG_HOOK: &str = "_log_from_c";
/// Entry-module attribute deciding whether a logger is enabled
pub const FILTER_HOOK: &str = "_filter_from_c";
/// Entry-module attribute receiving simulator events
pub const EVENT_HOOK: &str = "_sim_event";

/// Options for the interpreter's own initialization
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Startup {
    /// Program name; `None` lets the interpreter pick its default
    pub program: Option<InterpreterPath>,
    /// The single-element `sys.argv`
    pub argv0: &'static str,
}

impl Startup {
    pub fn new(program: Option<InterpreterPath>) -> Self {
        Self {
            program,
            argv0: PROGRAM_NAME,
        }
    }
}

/// What the loader module's `load_entry()` hands back
#[derive(Debug)]
pub struct Entry<O> {
    pub module: O,
    pub entry_point: O,
}

pub trait Interpreter {
    /// Owned reference to an object living inside the interpreter
    type Object;

    /// Proof that this thread acquired the lock; handed back to release it
    type Token;

    /// Initialize the interpreter. Called without the lock; on success the
    /// calling thread holds it.
    fn initialize(&self, startup: &Startup) -> Result<()>;

    /// Lock-free check; true between a successful `initialize` and `finalize`
    fn is_initialized(&self) -> bool;

    /// The interpreter's self-reported executable path
    fn executable(&self) -> Result<OsString>;

    /// Give up the lock held since `initialize`, keeping the thread state
    fn save_thread(&self);

    /// Take the lock. Called without it.
    fn acquire(&self) -> Self::Token;

    fn release(&self, token: Self::Token);

    /// Tear the interpreter down for good, consuming the held lock
    fn finalize(&self, token: Self::Token);

    /// Import `loader` and call its `load_entry()`
    fn load_entry(&self, loader: &str) -> Result<Entry<Self::Object>>;

    fn getattr(&self, object: &Self::Object, name: &str) -> Result<Self::Object>;

    /// Call `entry_point(argv)` with `argv` decoded as a list of text values
    fn call_entry(&self, entry_point: &Self::Object, argv: &ArgumentVector) -> Result<()>;

    /// Call `callable(message)`
    fn call_event(&self, callable: &Self::Object, message: &str) -> Result<()>;

    /// Route native log records into the interpreter
    fn install_log_hooks(&self, log: Self::Object, filter: Self::Object);

    /// Stop routing log records and drop the hooks
    fn finalize_log_hooks(&self);
}
