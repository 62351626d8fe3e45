//! Parsed ONNX model data.

use std::path::Path;
use std::ptr;

use parking_lot::Mutex;
use tracing::debug;

use crate::buffer::{self, DirectBuffer, ForeignBuffer, Provenance};
use crate::engine::{c_string, Engine};
use crate::error::MenohError;
use crate::ffi;
use crate::handle::Handle;
use crate::profile::VariableProfileTable;

/// A model loaded and parsed by the engine.
///
/// When loaded from memory, the bytes handed to the engine are kept alive
/// until [`ModelData::close`]: copies made by this crate are freed there,
/// a [`DirectBuffer`] is only released back to its owner.
pub struct ModelData {
    handle: Handle,
    backing: Mutex<Option<ForeignBuffer>>,
}

impl ModelData {
    /// Loads an ONNX model from a file.
    pub fn from_onnx_file(engine: &Engine, path: impl AsRef<Path>) -> Result<Self, MenohError> {
        let path = path.as_ref();
        let path_str = path
            .to_str()
            .ok_or_else(|| MenohError::InvalidArgument(format!("path is not valid UTF-8: {path:?}")))?;
        let c_path = c_string(path_str)?;

        let mut raw: ffi::MenohModelDataHandle = ptr::null_mut();
        engine.check(unsafe { (engine.api().make_model_data_from_onnx)(c_path.as_ptr(), &mut raw) })?;
        debug!("menoh: loaded model data from {path_str:?}");

        Ok(Self::new(engine, raw, None))
    }

    /// Loads an ONNX model from bytes. The bytes are always copied.
    pub fn from_onnx_bytes(engine: &Engine, data: &[u8]) -> Result<Self, MenohError> {
        Self::from_memory(engine, buffer::copy_in(data)?)
    }

    /// Loads an ONNX model from `data[offset..offset + length]`.
    pub fn from_onnx_bytes_range(
        engine: &Engine,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<Self, MenohError> {
        if data.is_empty() {
            return Err(MenohError::EmptyBuffer);
        }
        Self::from_onnx_bytes(engine, buffer::checked_range(data, offset, length)?)
    }

    /// Loads an ONNX model from the readable region of a direct buffer,
    /// without copying it. The buffer's cursors are left untouched.
    pub fn from_onnx_buffer(engine: &Engine, data: &DirectBuffer) -> Result<Self, MenohError> {
        Self::from_memory(engine, buffer::bridge(data, true)?)
    }

    fn from_memory(engine: &Engine, bytes: ForeignBuffer) -> Result<Self, MenohError> {
        let size = i32::try_from(bytes.len())
            .map_err(|_| MenohError::InvalidArgument(format!("model data too large: {} bytes", bytes.len())))?;

        let mut raw: ffi::MenohModelDataHandle = ptr::null_mut();
        engine.check(unsafe {
            (engine.api().make_model_data_from_onnx_data_on_memory)(bytes.as_ptr(), size, &mut raw)
        })?;
        debug!("menoh: loaded model data from {size} bytes ({:?})", bytes.provenance());

        Ok(Self::new(engine, raw, Some(bytes)))
    }

    fn new(engine: &Engine, raw: ffi::MenohModelDataHandle, backing: Option<ForeignBuffer>) -> Self {
        Self {
            handle: Handle::new(*engine, raw, engine.api().delete_model_data, "model data"),
            backing: Mutex::new(backing),
        }
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Optimizes the model data for the shapes in `table`, typically
    /// shrinking it. Call after building the table and before dropping it.
    pub fn optimize(&self, table: &VariableProfileTable) -> Result<&Self, MenohError> {
        let engine = self.handle.engine();
        self.handle.with(|data| {
            table.handle().with(|vpt| {
                engine.check(unsafe { (engine.api().model_data_optimize)(data, vpt) })
            })
        })?;
        debug!("menoh: optimized model data");
        Ok(self)
    }

    /// Provenance of the bytes this model was parsed from, or `None` if it
    /// was loaded from a file or has been closed.
    pub fn backing_provenance(&self) -> Option<Provenance> {
        self.backing.lock().as_ref().map(|b| b.provenance())
    }

    pub fn has_backing_buffer(&self) -> bool {
        self.backing.lock().is_some()
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    /// Deletes the native model data, then drops the backing bytes.
    /// Safe to call more than once.
    pub fn close(&self) {
        self.handle.release();
        self.backing.lock().take();
    }
}

impl Drop for ModelData {
    fn drop(&mut self) {
        self.close();
    }
}
