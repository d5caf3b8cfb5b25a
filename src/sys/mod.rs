//! Platform loader backends.
//!
//! Every backend exposes the same set of items:
//!
//! - `Name`, the native encoding of a library name, and `encode_name()` to produce it;
//! - `open()`, `symbol()`, `close()` and `file_name()` over the raw loader context;
//! - `DEFAULT` and `NEXT`, the pseudo-handle sentinels, if the platform has them;
//! - the `RTLD_*` flag values backing [`OpenFlags`](crate::OpenFlags).
//!
//! Every call whose failure is diagnosed clears the loader error state right before the call and
//! queries it right after, so a stale message from an unrelated failure can't be reported.

use std::ffi::c_void;

/// Raw loader context: a `dlopen()` handle or an `HMODULE`.
pub type Raw = *mut c_void;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
pub use self::unix::*;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
pub use self::windows::*;
