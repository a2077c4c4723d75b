//! CPython behind the `Interpreter` seam
//!
//! Initialization and finalization go through the raw C API (`PyConfig`,
//! `PyEval_SaveThread`, `PyGILState_*`) because the host, not Python, owns the
//! process. Everything else uses pyo3 inside `Python::with_gil`, which nests
//! on top of the lock the lifecycle manager already holds.

use std::ffi::{CStr, CString, OsStr, OsString};
use std::fmt::Display;
use std::mem::{ManuallyDrop, MaybeUninit};
use std::ptr;
use std::sync::{Mutex, PoisonError};

use anyhow::{anyhow, bail, Result};
use pyo3::exceptions::PyValueError;
use pyo3::ffi;
use pyo3::prelude::*;
use pyo3::types::PyList;
use simbridge_core::{ArgumentVector, Entry, Interpreter, Startup};
use tracing::warn;

use crate::log_bridge;

/* ===================== Handles ===================== */

/// Owned reference to a Python object
///
/// Dropping it releases the reference immediately when the interpreter is
/// alive; after finalization the reference is simply forgotten.
pub struct PyHandle(ManuallyDrop<Py<PyAny>>);

impl PyHandle {
    pub fn new(object: Py<PyAny>) -> Self {
        Self(ManuallyDrop::new(object))
    }

    pub fn bind<'a, 'py>(&'a self, py: Python<'py>) -> &'a Bound<'py, PyAny> {
        self.0.bind(py)
    }

    pub fn clone_ref(&self, py: Python<'_>) -> Py<PyAny> {
        self.0.clone_ref(py)
    }
}

impl Drop for PyHandle {
    fn drop(&mut self) {
        // SAFETY: the field is never touched again
        let object = unsafe { ManuallyDrop::take(&mut self.0) };
        if unsafe { ffi::Py_IsInitialized() } != 0 {
            Python::with_gil(|_py| drop(object));
        } else {
            std::mem::forget(object);
        }
    }
}

/// Thread state parked by `PyEval_SaveThread`
struct SavedThread(#[allow(dead_code)] *mut ffi::PyThreadState);

// Only the interpreter dereferences it, under its own rules
unsafe impl Send for SavedThread {}

/// `PyGILState_Ensure` result, handed back on release
pub struct GilToken(ffi::PyGILState_STATE);

/* ===================== Errors ===================== */

trait PyResultExt<T> {
    /// Print the traceback to `sys.stderr` and keep the message
    fn or_report(self, py: Python<'_>, context: impl Display) -> Result<T>;
}

impl<T> PyResultExt<T> for PyResult<T> {
    fn or_report(self, py: Python<'_>, context: impl Display) -> Result<T> {
        self.map_err(|err| {
            let message = err.to_string();
            err.print(py);
            anyhow!(message).context(context.to_string())
        })
    }
}

/// Turn a failed `PyStatus` into an error carrying its message and function
unsafe fn check_status(status: ffi::PyStatus, what: &str) -> Result<()> {
    let err_msg = status.err_msg;
    let func = status.func;
    if ffi::PyStatus_Exception(status) == 0 {
        return Ok(());
    }

    let mut message = what.to_string();
    if !err_msg.is_null() {
        message.push_str(&format!("\n\terror: {}", CStr::from_ptr(err_msg).to_string_lossy()));
    }
    if !func.is_null() {
        message.push_str(&format!("\n\tfunction: {}", CStr::from_ptr(func).to_string_lossy()));
    }
    Err(anyhow!(message))
}

/// NUL-terminated wide string as the C API expects
#[cfg(not(windows))]
pub(crate) fn to_wide(text: &str) -> Vec<libc::wchar_t> {
    text.chars()
        .map(|c| c as u32 as libc::wchar_t)
        .chain(Some(0))
        .collect()
}

#[cfg(windows)]
pub(crate) fn to_wide(text: &str) -> Vec<libc::wchar_t> {
    text.encode_utf16()
        .map(|u| u as libc::wchar_t)
        .chain(Some(0))
        .collect()
}

/// Program name for `PyConfig`, decoded the way the interpreter decodes its
/// own command line: with the host locale, undecodable bytes escaped
#[cfg(unix)]
unsafe fn program_name(path: &OsStr) -> Result<Vec<libc::wchar_t>> {
    use std::os::unix::ffi::OsStrExt;

    let bytes = CString::new(path.as_bytes())?;
    let mut size = 0;
    let decoded = ffi::Py_DecodeLocale(bytes.as_ptr(), &mut size);
    if decoded.is_null() {
        bail!("Unable to set Python program name: decoding error in interpreter path");
    }

    let wide = std::slice::from_raw_parts(decoded, size as usize)
        .iter()
        .copied()
        .chain(Some(0))
        .collect();
    ffi::PyMem_RawFree(decoded.cast());
    Ok(wide)
}

#[cfg(windows)]
unsafe fn program_name(path: &OsStr) -> Result<Vec<libc::wchar_t>> {
    use std::os::windows::ffi::OsStrExt;

    Ok(path
        .encode_wide()
        .map(|u| u as libc::wchar_t)
        .chain(Some(0))
        .collect())
}

/// Decode with the locale encoding, embedding undecodable bytes as lone
/// surrogates (PEP 383) so they survive a round trip
fn decode_locale<'py>(py: Python<'py>, bytes: &[u8]) -> PyResult<Bound<'py, PyAny>> {
    let text = CString::new(bytes).map_err(|err| PyValueError::new_err(err.to_string()))?;
    unsafe {
        let object = ffi::PyUnicode_DecodeLocale(text.as_ptr(), c"surrogateescape".as_ptr());
        Bound::from_owned_ptr_or_err(py, object)
    }
}

/* ===================== Interpreter ===================== */

#[derive(Default)]
pub struct PythonInterpreter {
    saved: Mutex<Option<SavedThread>>,
}

impl PythonInterpreter {
    pub fn new() -> Self {
        Self::default()
    }

    unsafe fn start(config: *mut ffi::PyConfig, startup: &Startup) -> Result<()> {
        if let Some(program) = &startup.program {
            let program = program_name(program.as_os_str())?;
            check_status(
                ffi::PyConfig_SetString(
                    config,
                    ptr::addr_of_mut!((*config).program_name),
                    program.as_ptr(),
                ),
                "Failed to set the program name during the Python initialization",
            )?;
        }

        let argv0 = to_wide(startup.argv0);
        check_status(
            ffi::PyWideStringList_Append(ptr::addr_of_mut!((*config).argv), argv0.as_ptr()),
            "Failed to set ARGV during the Python initialization",
        )?;

        check_status(ffi::Py_InitializeFromConfig(config), "Failed to initialize Python")
    }
}

impl Interpreter for PythonInterpreter {
    type Object = PyHandle;
    type Token = GilToken;

    fn initialize(&self, startup: &Startup) -> Result<()> {
        unsafe {
            let mut config = MaybeUninit::<ffi::PyConfig>::uninit();
            ffi::PyConfig_InitPythonConfig(config.as_mut_ptr());
            let result = Self::start(config.as_mut_ptr(), startup);
            ffi::PyConfig_Clear(config.as_mut_ptr());
            result
        }
    }

    fn is_initialized(&self) -> bool {
        unsafe { ffi::Py_IsInitialized() != 0 }
    }

    fn executable(&self) -> Result<OsString> {
        Python::with_gil(|py| {
            PyModule::import(py, "sys")
                .and_then(|sys| sys.getattr("executable"))
                .and_then(|executable| executable.extract::<OsString>())
                .or_report(py, "Failed to load sys.executable")
        })
    }

    fn save_thread(&self) {
        let state = unsafe { ffi::PyEval_SaveThread() };
        *self.saved.lock().unwrap_or_else(PoisonError::into_inner) = Some(SavedThread(state));
    }

    fn acquire(&self) -> GilToken {
        GilToken(unsafe { ffi::PyGILState_Ensure() })
    }

    fn release(&self, token: GilToken) {
        unsafe { ffi::PyGILState_Release(token.0) }
    }

    fn finalize(&self, _token: GilToken) {
        // The lock taken for finalization is never released: the interpreter
        // and its thread states stop existing
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).take();
        if unsafe { ffi::Py_FinalizeEx() } < 0 {
            warn!("Python finalization could not flush buffered data");
        }
    }

    fn load_entry(&self, loader: &str) -> Result<Entry<PyHandle>> {
        Python::with_gil(|py| {
            let module = PyModule::import(py, loader)
                .or_report(py, format!("Failed to import {}", loader))?;
            let info = module
                .call_method0("load_entry")
                .or_report(py, format!("{}.load_entry() failed", loader))?;
            let (module, entry_point) = info
                .extract::<(Py<PyAny>, Py<PyAny>)>()
                .or_report(py, format!("{}.load_entry() must return (module, entry_point)", loader))?;

            Ok(Entry {
                module: PyHandle::new(module),
                entry_point: PyHandle::new(entry_point),
            })
        })
    }

    fn getattr(&self, object: &PyHandle, name: &str) -> Result<PyHandle> {
        Python::with_gil(|py| {
            object
                .bind(py)
                .getattr(name)
                .map(|attr| PyHandle::new(attr.unbind()))
                .or_report(py, format!("Failed to get attribute {}", name))
        })
    }

    fn call_entry(&self, entry_point: &PyHandle, argv: &ArgumentVector) -> Result<()> {
        Python::with_gil(|py| {
            let args = argv
                .iter()
                .map(|arg| decode_locale(py, arg))
                .collect::<PyResult<Vec<_>>>()
                .or_report(py, "Failed to decode the argument vector")?;
            let args = PyList::new(py, args).or_report(py, "Failed to build the argument list")?;

            entry_point
                .bind(py)
                .call1((args,))
                .or_report(py, "Entry point raised an exception")?;
            Ok(())
        })
    }

    fn call_event(&self, callable: &PyHandle, message: &str) -> Result<()> {
        Python::with_gil(|py| {
            callable
                .bind(py)
                .call1((message,))
                .map(drop)
                .or_report(py, "Event hook raised an exception")
        })
    }

    fn install_log_hooks(&self, log: PyHandle, filter: PyHandle) {
        log_bridge::install(log, filter);
    }

    fn finalize_log_hooks(&self) {
        log_bridge::finalize();
    }
}
