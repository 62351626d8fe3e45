//! Entry point to a Menoh implementation.

use std::ffi::{CStr, CString};
use std::fmt;

use crate::error::MenohError;
use crate::ffi;

/// A Menoh engine, reached through its C function table.
///
/// Every native object created by this crate remembers the engine it came
/// from, so handles built from one engine are never passed to another.
#[derive(Clone, Copy)]
pub struct Engine {
    api: &'static ffi::MenohApi,
}

impl Engine {
    /// Wraps a function table.
    pub fn new(api: &'static ffi::MenohApi) -> Self {
        Self { api }
    }

    /// Returns the engine backed by the linked `libmenoh`.
    #[cfg(feature = "link")]
    pub fn linked() -> Self {
        Self::new(&ffi::LINKED)
    }

    pub(crate) fn api(&self) -> &'static ffi::MenohApi {
        self.api
    }

    /// Converts a Menoh status code to a Rust Result.
    ///
    /// Must be called right after the failing call: the engine only keeps
    /// the last error message until the next call on this thread.
    pub(crate) fn check(&self, code: ffi::MenohErrorCode) -> Result<(), MenohError> {
        if code == 0 {
            return Ok(());
        }
        let msg = unsafe {
            let ptr = (self.api.get_last_error_message)();
            if ptr.is_null() {
                String::new()
            } else {
                CStr::from_ptr(ptr).to_string_lossy().into_owned()
            }
        };
        Err(MenohError::from_status(code, msg))
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("api", &(self.api as *const ffi::MenohApi))
            .finish()
    }
}

/// Converts a name to a C string, rejecting interior NUL bytes.
pub(crate) fn c_string(s: &str) -> Result<CString, MenohError> {
    CString::new(s).map_err(|e| MenohError::InvalidArgument(e.to_string()))
}
