//! Errors.

use thiserror::Error;

use crate::Pseudo;

/// Dynamic library handle errors.
///
/// Errors originating from the loader carry its diagnostic text verbatim in `message`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The loader could not find or load the library.
    #[error("could not load {name}: {message}")]
    LibraryLoad { name: String, message: String },
    /// The symbol is not resolvable in the handle's search scope.
    #[error("unknown symbol \"{name}\": {message}")]
    SymbolNotFound { name: String, message: String },
    /// The handle has already been closed.
    #[error("handle is closed")]
    Closed,
    /// Pseudo-handles are owned by the process and are never released.
    #[error("the {0} pseudo-handle cannot be closed")]
    NotCloseable(Pseudo),
    /// The symbol name is empty or contains a NUL byte.
    #[error("invalid symbol name {0:?}")]
    InvalidSymbolName(String),
    /// The library name contains a NUL byte.
    #[error("invalid library name {0:?}")]
    InvalidLibraryName(String),
    /// The loader failed to release the library. The handle is closed regardless.
    #[error("could not close handle: {message}")]
    Close { message: String },
    /// The platform's loader has no equivalent of the requested feature.
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
