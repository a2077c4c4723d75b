//! Boundary crossing discipline
//!
//! Control passes between the host's native code and the interpreter. Two
//! scope guards bracket every region that touches interpreter state:
//!
//! - [`Crossing`] marks the transition to the interpreter side and back.
//!   Crossings nest: interpreter code may call back into a host entry point,
//!   which crosses again, and control is back on the host side only once the
//!   outermost crossing ends.
//! - [`LockGuard`] holds the interpreter lock. It can only be taken inside a
//!   crossing and is always released before the crossing ends. The lock is
//!   reentrant, so a nested crossing takes it again on top of the outer one.
//!
//! Both release on drop, so every exit path (early return, `?`, unwind) hands
//! control back to the host.

use std::sync::atomic::{AtomicUsize, Ordering};

use tracing::trace;

use crate::interpreter::Interpreter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Host,
    Interpreter,
}

/// Which side currently owns control, counted in live crossings
#[derive(Debug, Default)]
pub struct Boundary {
    depth: AtomicUsize,
}

impl Boundary {
    pub const fn new() -> Self {
        Self {
            depth: AtomicUsize::new(0),
        }
    }

    pub fn side(&self) -> Side {
        match self.depth() {
            0 => Side::Host,
            _ => Side::Interpreter,
        }
    }

    /// Number of live crossings
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Acquire)
    }

    /// Transition to the interpreter side
    pub fn cross(&self) -> Crossing<'_> {
        let depth = self.depth.fetch_add(1, Ordering::AcqRel) + 1;
        trace!(depth, "Returning to Python");
        Crossing { boundary: self }
    }
}

/// A live transition to the interpreter side; dropping it returns to the host
#[must_use]
#[derive(Debug)]
pub struct Crossing<'a> {
    boundary: &'a Boundary,
}

impl Drop for Crossing<'_> {
    fn drop(&mut self) {
        let depth = self.boundary.depth.fetch_sub(1, Ordering::AcqRel) - 1;
        trace!(depth, "Returning to simulator");
    }
}

/// The interpreter lock, held for the guard's lifetime
#[must_use]
pub struct LockGuard<'a, I: Interpreter> {
    interpreter: &'a I,
    token: Option<I::Token>,
}

impl<'a, I: Interpreter> LockGuard<'a, I> {
    pub fn acquire(_crossing: &'a Crossing<'_>, interpreter: &'a I) -> Self {
        let token = interpreter.acquire();
        Self {
            interpreter,
            token: Some(token),
        }
    }

    /// Finalize the interpreter with the lock held; the lock is never released
    pub fn finalize(mut self) {
        if let Some(token) = self.token.take() {
            self.interpreter.finalize(token);
        }
    }
}

impl<I: Interpreter> Drop for LockGuard<'_, I> {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            self.interpreter.release(token);
        }
    }
}
