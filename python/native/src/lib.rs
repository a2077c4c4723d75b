//! Embedded CPython for a simulator host
//!
//! The host links this library and drives the interpreter through four C
//! entry points, in order:
//!
//! ```text
//! simbridge_init()                       once, before anything else
//! simbridge_run_entry_point(argc, argv)  start the Python side
//! simbridge_notify_event(message)        any number of times
//! simbridge_shutdown()                   once or more during teardown
//! ```
//!
//! All of them must be called from the host's main thread. The same
//! operations are available to Rust callers as [`init`], [`run_entry_point`],
//! [`notify_event`] and [`shutdown`].

use std::any::Any;
use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::panic::{self, AssertUnwindSafe};
use std::sync::OnceLock;

use simbridge_core::{logging, ArgumentVector, Embedder, RunStatus};
use tracing::error;

pub mod interpreter;
pub mod log_bridge;

pub use interpreter::{PyHandle, PythonInterpreter};
pub use log_bridge::PythonLogLayer;

/// Global lifecycle manager
static EMBEDDER: OnceLock<Embedder<PythonInterpreter>> = OnceLock::new();

/// Get or create the global lifecycle manager
pub fn embedder() -> &'static Embedder<PythonInterpreter> {
    EMBEDDER.get_or_init(|| Embedder::new(PythonInterpreter::new()))
}

/* ===================== Lifecycle ===================== */

/// Install logging and initialize the interpreter
pub fn init() {
    logging::install(Some(Box::new(PythonLogLayer)));
    embedder().init();
}

pub fn run_entry_point(argv: &ArgumentVector) -> RunStatus {
    embedder().run_entry_point(argv)
}

pub fn notify_event(message: Option<&str>) {
    embedder().notify_event(message)
}

pub fn shutdown() {
    embedder().shutdown()
}

/* ===================== C API ===================== */

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

/// Keep panics from unwinding into the host
fn guarded<T>(what: &str, fallback: T, f: impl FnOnce() -> T) -> T {
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(value) => value,
        Err(payload) => {
            error!("{} panicked: {}", what, panic_message(payload.as_ref()));
            fallback
        }
    }
}

/// Initialize the embedded interpreter
///
/// Calling it while the interpreter is initialized aborts the process.
#[no_mangle]
pub extern "C" fn simbridge_init() {
    init();
}

/// Load the entry module and call its entry point with `argv`
///
/// Returns 0 when the entry point started (now or by an earlier call) and
/// -1 on failure.
///
/// # Safety
///
/// `argv` must be null or point to `argc` pointers, each null or a valid
/// NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn simbridge_run_entry_point(
    argc: c_int,
    argv: *const *const c_char,
) -> c_int {
    let argv = ArgumentVector::from_raw(argc, argv);
    guarded("simbridge_run_entry_point", RunStatus::Failed, || {
        run_entry_point(&argv)
    })
    .code()
}

/// Forward a simulator event; null sends the default message
///
/// # Safety
///
/// `message` must be null or a valid NUL-terminated string.
#[no_mangle]
pub unsafe extern "C" fn simbridge_notify_event(message: *const c_char) {
    let message = (!message.is_null()).then(|| CStr::from_ptr(message).to_string_lossy());
    guarded("simbridge_notify_event", (), || {
        notify_event(message.as_deref())
    });
}

/// Finalize the interpreter; safe to call more than once
#[no_mangle]
pub extern "C" fn simbridge_shutdown() {
    guarded("simbridge_shutdown", (), shutdown);
}
