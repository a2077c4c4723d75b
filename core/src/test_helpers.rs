//! Test helpers: a scripted in-memory interpreter
//!
//! `FakeInterpreter` records every call the lifecycle manager makes and
//! asserts the locking rules the real interpreter relies on: lock-requiring
//! calls panic when the lock is not held, and every acquire is paired with a
//! release. Like the real lock it is reentrant, so callbacks run from inside
//! the entry point or an event handler can call back into the host.

use std::cell::{Cell, RefCell};
use std::ffi::OsString;
use std::rc::Rc;
use std::sync::Mutex;

use anyhow::{anyhow, bail, Result};

use crate::args::ArgumentVector;
use crate::interpreter::{Entry, Interpreter, Startup};

/// Serializes tests that read or write the process-wide log level
pub static LEVEL_LOCK: Mutex<()> = Mutex::new(());

/// An interpreter object; counts how many are alive
#[derive(Debug)]
pub struct FakeObject {
    pub name: String,
    live: Rc<Cell<usize>>,
}

impl Drop for FakeObject {
    fn drop(&mut self) {
        self.live.set(self.live.get() - 1);
    }
}

/// Runs once from inside an interpreter call, like Python code calling back
/// into the host
pub type Callback = Box<dyn Fn()>;

#[derive(Default)]
pub struct FakeInterpreter {
    // Scripted behaviour
    pub fail_initialize: bool,
    pub reported_executable: Option<OsString>,
    pub fail_executable: bool,
    pub fail_load: bool,
    pub missing_attribute: Option<&'static str>,
    pub fail_entry: bool,
    pub fail_event: bool,
    pub during_entry: RefCell<Option<Callback>>,
    pub during_event: RefCell<Option<Callback>>,

    // Observed state
    pub initialized: Cell<bool>,
    pub held: Cell<usize>,
    pub saved_thread: Cell<bool>,
    pub acquires: Cell<usize>,
    pub finalizes: Cell<usize>,
    pub live: Rc<Cell<usize>>,
    pub startups: RefCell<Vec<Startup>>,
    pub loaders: RefCell<Vec<String>>,
    pub entry_calls: RefCell<Vec<ArgumentVector>>,
    pub events: RefCell<Vec<String>>,
    pub log_hooks: RefCell<Option<(FakeObject, FakeObject)>>,
}

impl FakeInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Already initialized and resting, as after `Init`
    pub fn initialized() -> Self {
        let fake = Self::default();
        fake.initialized.set(true);
        fake.saved_thread.set(true);
        fake
    }

    pub fn lock_held(&self) -> bool {
        self.held.get() > 0
    }

    /// How many times the lock is currently taken
    pub fn lock_depth(&self) -> usize {
        self.held.get()
    }

    pub fn thread_saved(&self) -> bool {
        self.saved_thread.get()
    }

    pub fn acquire_count(&self) -> usize {
        self.acquires.get()
    }

    pub fn finalize_count(&self) -> usize {
        self.finalizes.get()
    }

    /// Interpreter objects not yet dropped
    pub fn live_objects(&self) -> usize {
        self.live.get()
    }

    pub fn log_hooks_installed(&self) -> bool {
        self.log_hooks.borrow().is_some()
    }

    fn object(&self, name: &str) -> FakeObject {
        self.live.set(self.live.get() + 1);
        FakeObject {
            name: name.to_string(),
            live: Rc::clone(&self.live),
        }
    }

    fn require_lock(&self, what: &str) {
        assert!(self.held.get() > 0, "{} called without the interpreter lock", what);
        assert!(self.initialized.get(), "{} called on a finalized interpreter", what);
    }
}

fn run_once(callback: &RefCell<Option<Callback>>) {
    let callback = callback.borrow_mut().take();
    if let Some(callback) = callback {
        callback();
    }
}

impl Interpreter for FakeInterpreter {
    type Object = FakeObject;
    type Token = ();

    fn initialize(&self, startup: &Startup) -> Result<()> {
        assert!(!self.initialized.get(), "initialize called twice");
        self.startups.borrow_mut().push(startup.clone());
        if self.fail_initialize {
            bail!("Failed to initialize Python: scripted failure");
        }
        self.initialized.set(true);
        self.held.set(1);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    fn executable(&self) -> Result<OsString> {
        self.require_lock("executable");
        if self.fail_executable {
            bail!("Failed to load sys.executable");
        }
        let startups = self.startups.borrow();
        let requested = startups
            .last()
            .and_then(|s| s.program.as_ref())
            .map(|p| p.as_os_str().to_os_string())
            .unwrap_or_else(|| OsString::from("/usr/bin/python3"));
        Ok(self.reported_executable.clone().unwrap_or(requested))
    }

    fn save_thread(&self) {
        self.require_lock("save_thread");
        assert_eq!(self.held.get(), 1, "thread saved inside a nested lock");
        self.held.set(0);
        self.saved_thread.set(true);
    }

    fn acquire(&self) {
        assert!(self.initialized.get(), "lock taken on an uninitialized interpreter");
        self.held.set(self.held.get() + 1);
        self.acquires.set(self.acquires.get() + 1);
    }

    fn release(&self, _token: ()) {
        assert!(self.held.get() > 0, "lock released but not held");
        self.held.set(self.held.get() - 1);
    }

    fn finalize(&self, _token: ()) {
        self.require_lock("finalize");
        assert!(!self.log_hooks_installed(), "finalized with log hooks installed");
        assert_eq!(self.held.get(), 1, "finalized inside a nested lock");
        self.held.set(0);
        self.saved_thread.set(false);
        self.initialized.set(false);
        self.finalizes.set(self.finalizes.get() + 1);
    }

    fn load_entry(&self, loader: &str) -> Result<Entry<FakeObject>> {
        self.require_lock("load_entry");
        self.loaders.borrow_mut().push(loader.to_string());
        if self.fail_load {
            return Err(anyhow!("ModuleNotFoundError: No module named '{}'", loader)
                .context(format!("Failed to import {}", loader)));
        }
        Ok(Entry {
            module: self.object("entry_module"),
            entry_point: self.object("entry_point"),
        })
    }

    fn getattr(&self, object: &FakeObject, name: &str) -> Result<FakeObject> {
        self.require_lock("getattr");
        if self.missing_attribute == Some(name) {
            bail!("AttributeError: '{}' has no attribute '{}'", object.name, name);
        }
        Ok(self.object(name))
    }

    fn call_entry(&self, entry_point: &FakeObject, argv: &ArgumentVector) -> Result<()> {
        self.require_lock("call_entry");
        assert_eq!(entry_point.name, "entry_point");
        self.entry_calls.borrow_mut().push(argv.clone());
        run_once(&self.during_entry);
        if self.fail_entry {
            bail!("RuntimeError: entry point raised");
        }
        Ok(())
    }

    fn call_event(&self, callable: &FakeObject, message: &str) -> Result<()> {
        self.require_lock("call_event");
        assert_eq!(callable.name, crate::interpreter::EVENT_HOOK);
        self.events.borrow_mut().push(message.to_string());
        run_once(&self.during_event);
        if self.fail_event {
            bail!("RuntimeError: event handler raised");
        }
        Ok(())
    }

    fn install_log_hooks(&self, log: FakeObject, filter: FakeObject) {
        self.require_lock("install_log_hooks");
        *self.log_hooks.borrow_mut() = Some((log, filter));
    }

    fn finalize_log_hooks(&self) {
        self.require_lock("finalize_log_hooks");
        self.log_hooks.borrow_mut().take();
    }
}
