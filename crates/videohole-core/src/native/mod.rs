//! Native capability loading and platform adapters.
//!
//! Platform entry points are resolved at runtime with `libloading`. Each
//! group of entry points is a [`CapabilitySet`]: a plain struct of function
//! pointers filled once from a [`NativeLibrary`] and passed around
//! explicitly. A set either resolves completely or not at all.

pub mod drm_manager;
pub mod media_player;

pub use drm_manager::{DrmManagerApi, NativeDrmEngine};
pub use media_player::{EcoreWindowDisplay, MediaPlayerApi, MediaPlayerPrivateApi, NativeMediaPlayer};

use crate::error::Error;
use libloading::Library;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use thiserror::Error as ThisError;
use tracing::{debug, error, info};

/// Failure to load a library or one of its symbols
#[derive(Debug, Clone, ThisError)]
pub enum LoadError {
    #[error("library not found: {0}")]
    LibraryNotFound(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("library {0} is closed")]
    Closed(&'static str),
}

impl From<LoadError> for Error {
    fn from(e: LoadError) -> Self {
        match &e {
            LoadError::LibraryNotFound(_) | LoadError::Closed(_) => Error::init("dlopen", e.to_string()),
            LoadError::SymbolNotFound(_) => Error::init("dlsym", e.to_string()),
        }
    }
}

/// Group of entry points resolved together
pub trait CapabilitySet: Sized {
    /// Resolve every entry point. Keeps `library` loaded for as long as the
    /// set lives.
    fn resolve(library: &Arc<Library>) -> Result<Self, LoadError>;
}

/// Copy a function pointer out of `library`.
///
/// # Safety
/// `T` must match the C signature of the exported symbol. `name` must be
/// NUL-terminated.
pub(crate) unsafe fn symbol<T: Copy>(library: &Library, name: &'static [u8]) -> Result<T, LoadError> {
    let printable = String::from_utf8_lossy(name.strip_suffix(b"\0").unwrap_or(name));
    // SAFETY: forwarded to the caller.
    let sym = unsafe { library.get::<T>(name) }
        .map_err(|e| LoadError::SymbolNotFound(format!("{printable}: {e}")))?;
    Ok(*sym)
}

/// Handle on a dynamically loaded library
pub struct NativeLibrary {
    name: &'static str,
    library: Option<Arc<Library>>,
}

impl NativeLibrary {
    pub fn open(name: &'static str) -> Result<Self, LoadError> {
        info!(library = name, "Loading native library");
        // SAFETY: platform system libraries without load-time side effects
        // beyond symbol registration.
        let library = unsafe { Library::new(name) }
            .map_err(|e| LoadError::LibraryNotFound(format!("{name}: {e}")))?;
        Ok(Self {
            name,
            library: Some(Arc::new(library)),
        })
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_open(&self) -> bool {
        self.library.is_some()
    }

    /// Resolve a capability set from this library
    pub fn resolve<C: CapabilitySet>(&self) -> Result<C, LoadError> {
        let library = self.library.as_ref().ok_or(LoadError::Closed(self.name))?;
        C::resolve(library)
    }

    /// Drop this handle. Capability sets resolved earlier stay valid.
    pub fn close(&mut self) {
        if self.library.take().is_some() {
            debug!(library = self.name, "Closed native library");
        }
    }
}

impl Drop for NativeLibrary {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for NativeLibrary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeLibrary")
            .field("name", &self.name)
            .field("loaded", &self.library.is_some())
            .finish()
    }
}

/// Read a C string owned by the callee
///
/// # Safety
/// `ptr` must be null or point to a NUL-terminated string valid for the
/// duration of the call.
pub(crate) unsafe fn c_string_lossy(ptr: *const std::ffi::c_char) -> String {
    if ptr.is_null() {
        return String::new();
    }
    // SAFETY: forwarded to the caller.
    unsafe { std::ffi::CStr::from_ptr(ptr) }
        .to_string_lossy()
        .into_owned()
}

/// Borrow `len` bytes at `ptr`, treating null or non-positive lengths as empty
///
/// # Safety
/// When non-null, `ptr` must be valid for reads of `len` bytes for `'a`.
pub(crate) unsafe fn byte_slice<'a>(ptr: *const u8, len: i64) -> &'a [u8] {
    if ptr.is_null() || len <= 0 {
        return &[];
    }
    // SAFETY: forwarded to the caller.
    unsafe { std::slice::from_raw_parts(ptr, len as usize) }
}

/// Run a callback body invoked from C, returning `fallback` if it panics.
///
/// Unwinding across an `extern "C"` boundary aborts the process, so every
/// trampoline routes its body through here.
pub(crate) fn guard_callback<T>(callback: &'static str, fallback: T, body: impl FnOnce() -> T) -> T {
    match catch_unwind(AssertUnwindSafe(body)) {
        Ok(value) => value,
        Err(payload) => {
            let reason = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            error!(callback, reason = %reason, "Native callback panicked");
            fallback
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_library() {
        let err = NativeLibrary::open("libvideohole-does-not-exist.so.0").unwrap_err();
        assert!(matches!(err, LoadError::LibraryNotFound(_)));
        let err: Error = err.into();
        assert!(matches!(err, Error::InitializationFailure { .. }));
    }

    #[test]
    fn test_byte_slice_guards() {
        // SAFETY: null and negative lengths never dereference.
        unsafe {
            assert!(byte_slice(std::ptr::null(), 10).is_empty());
            let data = [1u8, 2, 3];
            assert!(byte_slice(data.as_ptr(), -1).is_empty());
            assert_eq!(byte_slice(data.as_ptr(), 2), &[1, 2]);
        }
    }

    #[test]
    fn test_guard_callback_passes_value_through() {
        assert_eq!(guard_callback("ok", -1, || 7), 7);
    }

    #[test]
    fn test_guard_callback_returns_fallback_on_panic() {
        let code = guard_callback("boom", -1, || -> i32 { panic!("handler failed") });
        assert_eq!(code, -1);
        assert!(!guard_callback("boom", false, || -> bool { panic!("{}", String::from("owned")) }));
    }

    #[test]
    fn test_c_string_null() {
        // SAFETY: null is handled before dereferencing.
        assert_eq!(unsafe { c_string_lossy(std::ptr::null()) }, "");
    }
}
