//! Owned wrapper around one native Menoh object.

use std::os::raw::c_void;
use std::ptr;

use parking_lot::Mutex;
use tracing::debug;

use crate::engine::Engine;
use crate::error::MenohError;

/// Deleter from the Menoh function table.
pub(crate) type Deleter = unsafe extern "C" fn(*mut c_void);

/// Exclusively owns one native pointer and deletes it at most once.
///
/// Native calls run inside [`Handle::with`], which holds the lock for the
/// whole call, so a concurrent [`Handle::release`] either happens before the
/// call (and the call fails with [`MenohError::Released`]) or waits for it.
pub(crate) struct Handle {
    raw: Mutex<*mut c_void>,
    engine: Engine,
    delete: Deleter,
    kind: &'static str,
}

// The pointer is only touched under the mutex.
unsafe impl Send for Handle {}
unsafe impl Sync for Handle {}

impl Handle {
    pub(crate) fn new(engine: Engine, raw: *mut c_void, delete: Deleter, kind: &'static str) -> Self {
        Self {
            raw: Mutex::new(raw),
            engine,
            delete,
            kind,
        }
    }

    pub(crate) fn engine(&self) -> Engine {
        self.engine
    }

    /// Runs `f` with the live pointer, or fails if the handle was released.
    pub(crate) fn with<T>(
        &self,
        f: impl FnOnce(*mut c_void) -> Result<T, MenohError>,
    ) -> Result<T, MenohError> {
        let raw = self.raw.lock();
        if raw.is_null() {
            return Err(MenohError::Released(self.kind));
        }
        f(*raw)
    }

    pub(crate) fn is_live(&self) -> bool {
        !self.raw.lock().is_null()
    }

    /// Returns the current pointer value (null once released).
    #[cfg(test)]
    pub(crate) fn raw(&self) -> *mut c_void {
        *self.raw.lock()
    }

    /// Deletes the native object. Returns false if it was already released.
    pub(crate) fn release(&self) -> bool {
        let mut raw = self.raw.lock();
        if raw.is_null() {
            return false;
        }
        let p = std::mem::replace(&mut *raw, ptr::null_mut());
        unsafe { (self.delete)(p) };
        debug!("menoh: released {}", self.kind);
        true
    }
}

impl Drop for Handle {
    fn drop(&mut self) {
        self.release();
    }
}
