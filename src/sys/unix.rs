//! `dlopen()` backend.

use std::{
    ffi::{c_void, CStr, CString, OsStr},
    os::{raw::c_int, unix::ffi::OsStrExt},
    path::PathBuf,
    ptr::{self, NonNull},
};

use libc::{dlclose, dlerror, dlopen, dlsym};

use super::Raw;

pub const RTLD_LAZY: c_int = libc::RTLD_LAZY;
pub const RTLD_NOW: c_int = libc::RTLD_NOW;
pub const RTLD_GLOBAL: c_int = libc::RTLD_GLOBAL;
pub const RTLD_LOCAL: c_int = libc::RTLD_LOCAL;
pub const RTLD_NOLOAD: c_int = libc::RTLD_NOLOAD;
pub const RTLD_NODELETE: c_int = libc::RTLD_NODELETE;

pub const DEFAULT: Option<Raw> = Some(libc::RTLD_DEFAULT);
pub const NEXT: Option<Raw> = Some(libc::RTLD_NEXT);

pub type Name = CString;

/// Converts a library name into the form `dlopen()` accepts.
///
/// Returns `None` if the name contains a NUL byte.
pub fn encode_name(name: &OsStr) -> Option<Name> {
    CString::new(name.as_bytes()).ok()
}

/// Takes the pending `dlerror()` message, if any.
///
/// # Safety
///
/// Must not race with another `dlerror()` consumer on the same thread.
unsafe fn take_error() -> Option<String> {
    let error = dlerror();
    if error.is_null() {
        None
    } else {
        Some(CStr::from_ptr(error).to_string_lossy().into_owned())
    }
}

/// Opens a library with `dlopen()`. `None` opens the process image.
pub fn open(name: Option<&Name>, flags: c_int) -> Result<Raw, String> {
    let name = name.map_or(ptr::null(), |name| name.as_ptr());

    unsafe {
        // Clear the previous error.
        dlerror();

        let raw = dlopen(name, flags);
        if raw.is_null() {
            Err(take_error().unwrap_or_else(|| "dlopen failed".to_owned()))
        } else {
            Ok(raw)
        }
    }
}

/// Obtains a symbol address using `dlsym()`.
///
/// # Safety
///
/// `raw` must be a live `dlopen()` handle or one of the pseudo-handle sentinels.
pub unsafe fn symbol(raw: Raw, name: &CStr) -> Result<NonNull<c_void>, String> {
    // Clear the previous error.
    dlerror();

    let ptr = dlsym(raw, name.as_ptr());

    if let Some(error) = take_error() {
        return Err(error);
    }

    NonNull::new(ptr).ok_or_else(|| format!("{} resolved to a null address", name.to_string_lossy()))
}

/// Releases a `dlopen()` handle, returning `dlclose()`'s status.
///
/// # Safety
///
/// `raw` must be a live `dlopen()` handle. It is invalid after this call, even on failure.
pub unsafe fn close(raw: Raw) -> Result<c_int, String> {
    dlerror();

    let status = dlclose(raw);
    if status == 0 {
        Ok(status)
    } else {
        Err(take_error().unwrap_or_else(|| format!("dlclose returned {status}")))
    }
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
const RTLD_DI_LINKMAP: c_int = 2;

/// Leading fields of glibc's `struct link_map`.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
#[allow(dead_code)]
#[repr(C)]
struct LinkMap {
    l_addr: usize,
    l_name: *const libc::c_char,
    l_ld: *mut c_void,
    l_next: *mut LinkMap,
    l_prev: *mut LinkMap,
}

#[cfg(all(target_os = "linux", target_env = "gnu"))]
extern "C" {
    fn dlinfo(handle: *mut c_void, request: c_int, info: *mut c_void) -> c_int;
}

/// Returns the path of the object backing `raw`.
///
/// The main program's link map has an empty name, which is reported as `None`.
///
/// # Safety
///
/// `raw` must be a live `dlopen()` handle.
#[cfg(all(target_os = "linux", target_env = "gnu"))]
pub unsafe fn file_name(raw: Raw) -> Option<PathBuf> {
    let mut map: *mut LinkMap = ptr::null_mut();

    dlerror();
    if dlinfo(raw, RTLD_DI_LINKMAP, (&mut map as *mut *mut LinkMap).cast()) != 0 {
        if let Some(error) = take_error() {
            trace!("dlinfo failed: {error}");
        }
        return None;
    }

    if map.is_null() || (*map).l_name.is_null() {
        return None;
    }

    let name = CStr::from_ptr((*map).l_name).to_bytes();
    if name.is_empty() {
        return None;
    }

    Some(PathBuf::from(OsStr::from_bytes(name)))
}

/// Returns the path of the object backing `raw`.
///
/// # Safety
///
/// `raw` must be a live `dlopen()` handle.
#[cfg(not(all(target_os = "linux", target_env = "gnu")))]
pub unsafe fn file_name(_raw: Raw) -> Option<PathBuf> {
    None
}
