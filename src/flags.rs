//! Loader flags.

use std::os::raw::c_int;

use bitflags::bitflags;

use crate::sys;

bitflags! {
    /// Binding flags passed through to the loader when opening a library.
    ///
    /// On Windows the flags are only recorded for diagnostics, the loader has no equivalent.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenFlags: c_int {
        /// Resolve function references on first use.
        const LAZY = sys::RTLD_LAZY;
        /// Resolve all references while opening.
        const NOW = sys::RTLD_NOW;
        /// Make the library's symbols available to subsequently loaded libraries.
        const GLOBAL = sys::RTLD_GLOBAL;
        /// Keep the library's symbols out of the global namespace.
        const LOCAL = sys::RTLD_LOCAL;
        /// Only succeed if the library is already loaded.
        const NOLOAD = sys::RTLD_NOLOAD;
        /// Never unload the library, even after the last close.
        const NODELETE = sys::RTLD_NODELETE;
    }
}

impl Default for OpenFlags {
    /// Lazy binding, local scope.
    fn default() -> Self {
        Self::LAZY | Self::LOCAL
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_lazy_local() {
        let flags = OpenFlags::default();
        assert!(flags.contains(OpenFlags::LAZY));
        assert!(flags.contains(OpenFlags::LOCAL));
        assert!(!flags.contains(OpenFlags::NOW));
        assert!(!flags.contains(OpenFlags::GLOBAL));
    }

    #[test]
    fn platform_bits_are_retained() {
        let extra = 0x4000_0000;
        let flags = OpenFlags::NOW | OpenFlags::from_bits_retain(extra);
        assert_eq!(flags.bits(), sys::RTLD_NOW | extra);
    }
}
