//! Dynamic library handles.

use std::{
    ffi::{c_void, CString, OsStr},
    fmt,
    path::PathBuf,
    ptr::NonNull,
};

use tracing::instrument;

use crate::{sys, Error, OpenFlags, Result};

/// A pseudo-handle kind: a symbol search order rather than one loaded library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Pseudo {
    /// Search the default global order, starting from the beginning as the dynamic linker would
    /// for a fresh reference.
    Default,
    /// Search only the objects loaded after the one issuing the lookup, skipping its own
    /// definitions.
    Next,
}

impl fmt::Display for Pseudo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pseudo::Default => f.write_str("DEFAULT"),
            Pseudo::Next => f.write_str("NEXT"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Kind {
    Library { flags: OpenFlags },
    Pseudo(Pseudo),
}

/// The loader context.
#[derive(Debug, Clone, Copy)]
struct Raw(sys::Raw);

// Safety: the context is an opaque token; the loader is thread-safe for open, lookup and close.
unsafe impl Send for Raw {}
unsafe impl Sync for Raw {}

/// A handle to a loaded dynamic library, or to one of the process-wide pseudo-handles.
///
/// Dropping a handle does not unload the library unless closing was enabled with
/// [`enable_close()`](Self::enable_close). Addresses obtained from the handle stay valid only
/// while the library stays mapped.
///
/// # Examples
///
/// ```no_run
/// use dl_handle::Handle;
///
/// let mut libc = Handle::new("libc.so.6")?;
/// let calloc = libc.symbol("calloc")?;
/// assert!(!libc.symbol_defined("fooo")?);
/// assert_eq!(libc.close()?, 0);
/// # Ok::<(), dl_handle::Error>(())
/// ```
#[derive(Debug)]
pub struct Handle {
    raw: Raw,
    kind: Kind,
    closed: bool,
    close_enabled: bool,
}

impl Drop for Handle {
    fn drop(&mut self) {
        if !self.close_enabled || self.closed {
            return;
        }

        if let Err(err) = self.close() {
            warn!("error closing handle {:p} on drop: {err}", self.raw.0);
        }
    }
}

/// Validates a symbol name and converts it for the loader.
fn symbol_name(name: &str) -> Result<CString> {
    if name.is_empty() {
        return Err(Error::InvalidSymbolName(name.to_owned()));
    }

    CString::new(name).map_err(|_| Error::InvalidSymbolName(name.to_owned()))
}

impl Handle {
    /// Opens a library with the default flags (lazy binding, local scope).
    ///
    /// `name` is a path or a name the loader searches for, like `libc.so.6`. Opening a library
    /// runs its initialization code.
    pub fn new(name: impl AsRef<OsStr>) -> Result<Self> {
        Self::open(Some(name), OpenFlags::default())
    }

    /// Opens the running process image with the default flags.
    ///
    /// Symbols already linked into the process, like `malloc`, are resolvable through it.
    pub fn this() -> Result<Self> {
        Self::open(None::<&OsStr>, OpenFlags::default())
    }

    /// Opens a library, or the process image if `name` is `None`, with the given flags.
    pub fn open<N: AsRef<OsStr>>(name: Option<N>, flags: OpenFlags) -> Result<Self> {
        Self::open_os(name.as_ref().map(AsRef::as_ref), flags)
    }

    #[instrument(name = "Handle::open", skip_all, fields(name = ?name, flags = ?flags))]
    fn open_os(name: Option<&OsStr>, flags: OpenFlags) -> Result<Self> {
        let target = name.map_or_else(
            || "the process image".to_owned(),
            |name| name.to_string_lossy().into_owned(),
        );

        let native = match name {
            Some(name) => Some(
                sys::encode_name(name).ok_or_else(|| Error::InvalidLibraryName(target.clone()))?,
            ),
            None => None,
        };

        let raw = sys::open(native.as_ref(), flags.bits())
            .map_err(|message| Error::LibraryLoad {
                name: target.clone(),
                message,
            })?;

        debug!("opened {target} as {raw:p}");

        Ok(Self {
            raw: Raw(raw),
            kind: Kind::Library { flags },
            closed: false,
            close_enabled: false,
        })
    }

    /// Wraps a loader sentinel.
    pub(crate) fn pseudo(raw: sys::Raw, which: Pseudo) -> Self {
        Self {
            raw: Raw(raw),
            kind: Kind::Pseudo(which),
            closed: false,
            close_enabled: false,
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed {
            Err(Error::Closed)
        } else {
            Ok(())
        }
    }

    /// Resolves the address of a symbol.
    ///
    /// The address is untyped; interpreting it is up to the caller.
    ///
    /// # Errors
    ///
    /// - [`Error::Closed`] if the handle is closed,
    /// - [`Error::InvalidSymbolName`] if `name` is empty or contains a NUL byte,
    /// - [`Error::SymbolNotFound`] if the loader can't resolve `name`, including when it resolves
    ///   to a null address.
    pub fn symbol(&self, name: &str) -> Result<NonNull<c_void>> {
        self.ensure_open()?;
        let c_name = symbol_name(name)?;

        // Safety: the handle is open, so `raw` is a live context or a loader sentinel.
        let ptr = unsafe { sys::symbol(self.raw.0, &c_name) }.map_err(|message| {
            Error::SymbolNotFound {
                name: name.to_owned(),
                message,
            }
        })?;

        trace!("resolved {name} to {ptr:p}");
        Ok(ptr)
    }

    /// Same as [`symbol()`](Self::symbol), for callers used to indexed lookup.
    #[inline]
    pub fn get(&self, name: &str) -> Result<NonNull<c_void>> {
        self.symbol(name)
    }

    /// Returns whether `name` resolves.
    ///
    /// Returns `Ok(false)` where [`symbol()`](Self::symbol) would fail with
    /// [`Error::SymbolNotFound`]; every other error is propagated.
    pub fn symbol_defined(&self, name: &str) -> Result<bool> {
        match self.symbol(name) {
            Ok(_) => Ok(true),
            Err(Error::SymbolNotFound { .. }) => Ok(false),
            Err(err) => Err(err),
        }
    }

    /// Releases the library and returns the loader's status code, `0`.
    ///
    /// Closing twice is an error rather than a no-op. If the loader fails to release the
    /// library, the handle is closed anyway and [`Error::Close`] is returned.
    #[instrument(name = "Handle::close", skip_all, fields(raw = ?self.raw.0))]
    pub fn close(&mut self) -> Result<i32> {
        self.ensure_open()?;

        if let Kind::Pseudo(which) = self.kind {
            return Err(Error::NotCloseable(which));
        }

        self.closed = true;

        // Safety: the handle was open and is a library handle, so `raw` is a live context that
        // hasn't been released yet.
        let status = unsafe { sys::close(self.raw.0) }.map_err(|message| Error::Close { message })?;

        debug!("closed");
        Ok(status)
    }

    /// Makes dropping the handle close it.
    pub fn enable_close(&mut self) {
        self.close_enabled = true;
    }

    /// Makes dropping the handle leave the library loaded. This is the default.
    pub fn disable_close(&mut self) {
        self.close_enabled = false;
    }

    /// Returns whether dropping the handle closes it.
    pub fn is_close_enabled(&self) -> bool {
        self.close_enabled
    }

    /// Returns whether the handle has been closed.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Returns the pseudo-handle kind, or `None` for a library handle.
    pub fn pseudo_kind(&self) -> Option<Pseudo> {
        match self.kind {
            Kind::Library { .. } => None,
            Kind::Pseudo(which) => Some(which),
        }
    }

    /// Returns the flags the library was opened with, or `None` for a pseudo-handle.
    pub fn flags(&self) -> Option<OpenFlags> {
        match self.kind {
            Kind::Library { flags } => Some(flags),
            Kind::Pseudo(_) => None,
        }
    }

    /// Returns the path of the file backing the library.
    ///
    /// `Ok(None)` means the path is unknown: the platform can't tell, the handle refers to the
    /// main program, or it is a pseudo-handle.
    pub fn file_name(&self) -> Result<Option<PathBuf>> {
        self.ensure_open()?;

        match self.kind {
            // Safety: the handle is open, so `raw` is a live context.
            Kind::Library { .. } => Ok(unsafe { sys::file_name(self.raw.0) }),
            Kind::Pseudo(_) => Ok(None),
        }
    }

    /// Returns the loader context as an integer.
    pub fn to_integer(&self) -> usize {
        self.raw.0 as usize
    }

    /// Returns the loader context as an address. Same bit pattern as
    /// [`to_integer()`](Self::to_integer).
    pub fn as_raw(&self) -> *mut c_void {
        self.raw.0
    }
}
