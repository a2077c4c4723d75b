//! Host argument vector
//!
//! The host hands over `argc`/`argv` as raw C strings in whatever encoding
//! its locale uses. They are kept as bytes here; turning them into
//! interpreter text (with a byte-preserving error handler) is the
//! interpreter's job.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArgumentVector {
    args: Vec<Vec<u8>>,
}

impl ArgumentVector {
    /// Copy a C `argv` array
    ///
    /// A null `argv` or a negative `argc` gives an empty vector; a null
    /// element becomes an empty argument so positions are preserved.
    ///
    /// # Safety
    ///
    /// When `argv` is non-null it must point to at least `argc` pointers,
    /// each either null or a valid NUL-terminated string.
    pub unsafe fn from_raw(argc: c_int, argv: *const *const c_char) -> Self {
        if argv.is_null() || argc <= 0 {
            return Self::default();
        }

        let args = (0..argc as usize)
            .map(|i| {
                let arg = *argv.add(i);
                if arg.is_null() {
                    Vec::new()
                } else {
                    CStr::from_ptr(arg).to_bytes().to_vec()
                }
            })
            .collect();

        Self { args }
    }

    pub fn len(&self) -> usize {
        self.args.len()
    }

    pub fn is_empty(&self) -> bool {
        self.args.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &[u8]> {
        self.args.iter().map(Vec::as_slice)
    }
}

impl<T: Into<Vec<u8>>> FromIterator<T> for ArgumentVector {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self {
            args: iter.into_iter().map(Into::into).collect(),
        }
    }
}
