//! `LoadLibraryW()` backend.

use std::{
    ffi::{c_void, CStr, CString, OsStr, OsString},
    io,
    os::{
        raw::c_int,
        windows::ffi::{OsStrExt, OsStringExt},
    },
    path::PathBuf,
    ptr::{self, NonNull},
};

use winapi::{
    shared::minwindef::{DWORD, HMODULE},
    um::{
        errhandlingapi::{GetLastError, SetLastError},
        libloaderapi::{FreeLibrary, GetModuleFileNameW, GetModuleHandleExW, GetProcAddress, LoadLibraryW},
    },
};

use super::Raw;

// The Windows loader has no binding modes. These only give `OpenFlags` distinct bits.
pub const RTLD_LAZY: c_int = 0x0001;
pub const RTLD_NOW: c_int = 0x0002;
pub const RTLD_GLOBAL: c_int = 0x0100;
pub const RTLD_LOCAL: c_int = 0;
pub const RTLD_NOLOAD: c_int = 0x0004;
pub const RTLD_NODELETE: c_int = 0x1000;

pub const DEFAULT: Option<Raw> = None;
pub const NEXT: Option<Raw> = None;

/// NUL-terminated UTF-16.
pub type Name = Vec<u16>;

/// Longest path `GetModuleFileNameW()` can return.
const MAX_PATH_LEN: usize = 32_768;

/// Converts a library name into the form `LoadLibraryW()` accepts.
///
/// Returns `None` if the name contains a NUL character.
pub fn encode_name(name: &OsStr) -> Option<Name> {
    let mut wide: Vec<u16> = name.encode_wide().collect();
    if wide.contains(&0) {
        return None;
    }

    wide.push(0);
    Some(wide)
}

/// Formats `GetLastError()`.
fn last_error() -> String {
    let code = unsafe { GetLastError() };
    io::Error::from_raw_os_error(code as i32).to_string()
}

/// Opens a library with `LoadLibraryW()`. `None` opens the process image.
pub fn open(name: Option<&Name>, _flags: c_int) -> Result<Raw, String> {
    let module: HMODULE = unsafe {
        SetLastError(0);

        match name {
            Some(name) => LoadLibraryW(name.as_ptr()),
            None => {
                // Takes a reference like LoadLibraryW() does, so FreeLibrary() stays balanced.
                let mut module = ptr::null_mut();
                if GetModuleHandleExW(0, ptr::null(), &mut module) == 0 {
                    ptr::null_mut()
                } else {
                    module
                }
            }
        }
    };

    if module.is_null() {
        Err(last_error())
    } else {
        Ok(module.cast())
    }
}

/// Obtains a symbol address using `GetProcAddress()`.
///
/// If `name` isn't exported, retries with the ANSI variant (`nameA`), so `GetFileAttributes`
/// resolves to `GetFileAttributesA`.
///
/// # Safety
///
/// `raw` must be a live module handle.
pub unsafe fn symbol(raw: Raw, name: &CStr) -> Result<NonNull<c_void>, String> {
    let module: HMODULE = raw.cast();

    SetLastError(0);
    if let Some(ptr) = NonNull::new(GetProcAddress(module, name.as_ptr()) as *mut c_void) {
        return Ok(ptr);
    }
    let error = last_error();

    let mut ansi = name.to_bytes().to_vec();
    ansi.push(b'A');
    if let Ok(ansi) = CString::new(ansi) {
        SetLastError(0);
        if let Some(ptr) = NonNull::new(GetProcAddress(module, ansi.as_ptr()) as *mut c_void) {
            return Ok(ptr);
        }
    }

    Err(error)
}

/// Releases a module handle with `FreeLibrary()`.
///
/// # Safety
///
/// `raw` must be a live module handle. It is invalid after this call, even on failure.
pub unsafe fn close(raw: Raw) -> Result<c_int, String> {
    SetLastError(0);

    if FreeLibrary(raw.cast()) != 0 {
        Ok(0)
    } else {
        Err(last_error())
    }
}

/// Returns the path of the module backing `raw`.
///
/// # Safety
///
/// `raw` must be a live module handle.
pub unsafe fn file_name(raw: Raw) -> Option<PathBuf> {
    let mut buffer = vec![0u16; 260];

    loop {
        SetLastError(0);
        let len = GetModuleFileNameW(raw.cast(), buffer.as_mut_ptr(), buffer.len() as DWORD) as usize;
        if len == 0 {
            trace!("GetModuleFileNameW failed: {}", last_error());
            return None;
        }

        // A full buffer means the path was truncated.
        if len < buffer.len() {
            buffer.truncate(len);
            return Some(PathBuf::from(OsString::from_wide(&buffer)));
        }

        if buffer.len() >= MAX_PATH_LEN {
            return None;
        }
        let new_len = (buffer.len() * 2).min(MAX_PATH_LEN);
        buffer.resize(new_len, 0);
    }
}
