//! Native log records into Python logging
//!
//! Once the entry module hands over its `_log_from_c` / `_filter_from_c`
//! hooks, every `tracing` event that passes the host level filter is offered
//! to the filter hook and, if accepted, emitted through the log hook:
//!
//! ```text
//! _filter_from_c(logger_name, level) -> bool
//! _log_from_c(logger_name, level, filename, lineno, msg, function_name)
//! ```
//!
//! Levels are the numeric Python ones. Hook failures print a traceback and
//! are otherwise ignored.

use std::cell::Cell;
use std::fmt::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use pyo3::prelude::*;
use simbridge_core::LogLevel;
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::interpreter::PyHandle;

struct Hooks {
    log: PyHandle,
    filter: PyHandle,
}

static HOOKS: Mutex<Option<Hooks>> = Mutex::new(None);
static ACTIVE: AtomicBool = AtomicBool::new(false);

thread_local! {
    static FORWARDING: Cell<bool> = const { Cell::new(false) };
}

/// Start forwarding to the given hooks. Called with the interpreter lock held.
pub fn install(log: PyHandle, filter: PyHandle) {
    let previous = HOOKS
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .replace(Hooks { log, filter });
    ACTIVE.store(true, Ordering::Release);
    drop(previous);
}

/// Stop forwarding and drop the hooks. Called with the interpreter lock held.
pub fn finalize() {
    ACTIVE.store(false, Ordering::Release);
    let hooks = HOOKS.lock().unwrap_or_else(PoisonError::into_inner).take();
    drop(hooks);
}

pub fn is_active() -> bool {
    ACTIVE.load(Ordering::Acquire)
}

/// Python logger name for a tracing target
pub(crate) fn logger_name(target: &str) -> String {
    target.replace("::", ".")
}

/// Layer that forwards events to the installed hooks
#[derive(Debug, Default, Clone, Copy)]
pub struct PythonLogLayer;

impl<S: Subscriber> Layer<S> for PythonLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        if !is_active() {
            return;
        }
        // Anything logged while a hook runs stays native
        if FORWARDING.with(|f| f.replace(true)) {
            return;
        }
        forward(event);
        FORWARDING.with(|f| f.set(false));
    }
}

fn forward(event: &Event<'_>) {
    let meta = event.metadata();
    let mut message = MessageVisitor::default();
    event.record(&mut message);

    let name = logger_name(meta.target());
    let level = LogLevel::from_tracing(meta.level()).numeric();
    let filename = meta.file().unwrap_or("");
    let lineno = meta.line().unwrap_or(0);
    let function_name = meta.module_path().unwrap_or("");

    Python::with_gil(|py| {
        // Take new references so the hooks run without the mutex held
        let hooks = HOOKS
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|h| (h.log.clone_ref(py), h.filter.clone_ref(py)));
        let Some((log, filter)) = hooks else {
            return;
        };

        match filter
            .bind(py)
            .call1((name.as_str(), level))
            .and_then(|enabled| enabled.is_truthy())
        {
            Ok(true) => {}
            Ok(false) => return,
            Err(err) => {
                err.print(py);
                return;
            }
        }

        if let Err(err) = log.bind(py).call1((
            name.as_str(),
            level,
            filename,
            lineno,
            message.finish(),
            function_name,
        )) {
            err.print(py);
        }
    });
}

/// Renders the `message` field followed by any other fields as `key=value`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn finish(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields
        } else {
            format!("{} {}", self.message, self.fields)
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message.push_str(value);
        } else {
            self.record_debug(field, &value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            let _ = write!(self.message, "{:?}", value);
            return;
        }
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{}={:?}", field.name(), value);
    }
}
