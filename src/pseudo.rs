//! Process-wide pseudo-handles.
//!
//! `DEFAULT` and `NEXT` wrap loader sentinels rather than loaded libraries. They are created on
//! first use, shared by reference, and never released.
//!
//! Note that `NEXT` is relative to the object containing this crate's code, which is whatever
//! binary or shared library it was linked into.

use std::{ffi::c_void, ptr::NonNull};

use once_cell::sync::Lazy;

use crate::{sys, Error, Handle, Pseudo, Result};

static DEFAULT: Lazy<Option<Handle>> =
    Lazy::new(|| sys::DEFAULT.map(|raw| Handle::pseudo(raw, Pseudo::Default)));

static NEXT: Lazy<Option<Handle>> =
    Lazy::new(|| sys::NEXT.map(|raw| Handle::pseudo(raw, Pseudo::Next)));

/// Returns the `DEFAULT` pseudo-handle, which searches the default global symbol order.
///
/// Fails with [`Error::Unsupported`] on platforms without one, notably Windows.
///
/// The returned handle is shared, so it can't be closed:
///
/// ```compile_fail
/// let handle = dl_handle::default_handle().unwrap();
/// handle.close();
/// ```
pub fn default_handle() -> Result<&'static Handle> {
    DEFAULT
        .as_ref()
        .ok_or(Error::Unsupported("the DEFAULT pseudo-handle"))
}

/// Returns the `NEXT` pseudo-handle, which searches the objects loaded after the one issuing
/// the lookup. Useful for wrapping a function and forwarding to the "real" one.
///
/// Fails with [`Error::Unsupported`] on platforms without one, notably Windows.
pub fn next_handle() -> Result<&'static Handle> {
    NEXT.as_ref()
        .ok_or(Error::Unsupported("the NEXT pseudo-handle"))
}

/// Resolves `name` through the `NEXT` pseudo-handle.
pub fn sym(name: &str) -> Result<NonNull<c_void>> {
    next_handle()?.symbol(name)
}

/// Returns whether `name` resolves through the `NEXT` pseudo-handle.
pub fn sym_defined(name: &str) -> Result<bool> {
    next_handle()?.symbol_defined(name)
}
