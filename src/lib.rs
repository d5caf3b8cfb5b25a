//! Handles for dynamically loaded libraries.
//!
//! A [`Handle`] opens a shared library, resolves symbol addresses in it, and releases it. Two
//! process-wide pseudo-handles, [`default_handle()`] and [`next_handle()`], search the global
//! symbol namespace and the objects loaded after the caller, respectively.

#[macro_use]
extern crate tracing;

use std::ffi::OsStr;

mod error;
pub use error::{Error, Result};

mod flags;
pub use flags::OpenFlags;

mod handle;
pub use handle::{Handle, Pseudo};

mod pseudo;
pub use pseudo::{default_handle, next_handle, sym, sym_defined};

mod sys;

/// Opens a library with the default flags. Shorthand for [`Handle::new()`].
pub fn dlopen(name: impl AsRef<OsStr>) -> Result<Handle> {
    Handle::new(name)
}
