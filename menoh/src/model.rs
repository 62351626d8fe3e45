//! Model building, attached buffers, and inference.

use std::collections::HashMap;
use std::fmt;
use std::os::raw::c_void;
use std::ptr;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::buffer::{self, BufferSource, ForeignBuffer, NativeMemory, Provenance};
use crate::config::BackendConfig;
use crate::dtype::DType;
use crate::engine::c_string;
use crate::error::MenohError;
use crate::ffi;
use crate::handle::Handle;
use crate::model_data::ModelData;
use crate::profile::{self, VariableProfileTable};

/// Buffers attached by name. Every pointer the engine holds for a
/// variable is kept alive by the matching entry.
type Registry = HashMap<String, ForeignBuffer>;

fn provenance_of(registry: &Mutex<Registry>, name: &str) -> Option<Provenance> {
    registry.lock().get(name).map(|b| b.provenance())
}

// ---------------------------------------------------------------------------
// ModelBuilder
// ---------------------------------------------------------------------------

/// Attaches caller buffers to variables and builds [`Model`]s.
pub struct ModelBuilder {
    handle: Handle,
    attached: Mutex<Registry>,
}

impl ModelBuilder {
    /// Creates a builder for the variables in `table`.
    pub fn new(table: &VariableProfileTable) -> Result<Self, MenohError> {
        let engine = table.handle().engine();
        let mut raw: ffi::MenohModelBuilderHandle = ptr::null_mut();
        table
            .handle()
            .with(|vpt| engine.check(unsafe { (engine.api().make_model_builder)(vpt, &mut raw) }))?;
        Ok(Self {
            handle: Handle::new(engine, raw, engine.api().delete_model_builder, "model builder"),
            attached: Mutex::new(Registry::new()),
        })
    }

    /// Attaches `source` as the buffer of variable `name`.
    ///
    /// A [`DirectBuffer`](crate::DirectBuffer) is used in place, so the engine
    /// reads inputs from it and writes outputs into it. Slices are copied.
    /// Attaching the same name again replaces the earlier buffer.
    pub fn attach<'a>(&self, name: &str, source: impl Into<BufferSource<'a>>) -> Result<&Self, MenohError> {
        self.attach_buffer(name, buffer::bridge(source, false)?)?;
        Ok(self)
    }

    /// Attaches a copy of `values[offset..offset + length]`.
    pub fn attach_range(&self, name: &str, values: &[f32], offset: usize, length: usize) -> Result<&Self, MenohError> {
        self.attach_buffer(name, buffer::copy_in_range(values, offset, length)?)?;
        Ok(self)
    }

    pub(crate) fn attach_buffer(&self, name: &str, buffer: ForeignBuffer) -> Result<(), MenohError> {
        let c_name = c_string(name)?;
        let engine = self.handle.engine();
        let mut attached = self.attached.lock();
        self.handle.with(|raw| {
            engine.check(unsafe {
                (engine.api().model_builder_attach_external_buffer)(raw, c_name.as_ptr(), buffer.as_ptr() as *mut c_void)
            })
        })?;
        trace!(
            "menoh: attached {} bytes to {name:?} ({:?})",
            buffer.len(),
            buffer.provenance()
        );
        if attached.insert(name.to_string(), buffer).is_some() {
            warn!("menoh: replaced the buffer attached to {name:?}");
        }
        Ok(())
    }

    /// Names of the variables with an attached buffer, sorted.
    pub fn attached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attached.lock().keys().cloned().collect();
        names.sort();
        names
    }

    /// Provenance of the buffer attached to `name`, if any.
    pub fn attached(&self, name: &str) -> Option<Provenance> {
        provenance_of(&self.attached, name)
    }

    /// Builds a model on `backend_name` with a JSON `backend_config`
    /// (empty for the backend's defaults).
    ///
    /// Fails with [`MenohError::BufferTooSmall`] if an attached buffer is
    /// shorter than the variable it backs.
    pub fn build(&self, model_data: &ModelData, backend_name: &str, backend_config: &str) -> Result<Model, MenohError> {
        let c_backend = c_string(backend_name)?;
        let c_config = c_string(backend_config)?;
        let engine = self.handle.engine();

        let attached = self.attached.lock();
        let mut raw: ffi::MenohModelHandle = ptr::null_mut();
        self.handle.with(|builder| {
            model_data.handle().with(|data| {
                engine.check(unsafe {
                    (engine.api().build_model)(builder, data, c_backend.as_ptr(), c_config.as_ptr(), &mut raw)
                })
            })
        })?;
        let model = Model {
            handle: Handle::new(engine, raw, engine.api().delete_model, "model"),
            attached: Mutex::new(attached.clone()),
        };

        for (name, buffer) in attached.iter() {
            let required = model.variable(name)?.buffer_len();
            if buffer.len() < required {
                return Err(MenohError::BufferTooSmall {
                    name: name.clone(),
                    len: buffer.len(),
                    required,
                });
            }
        }
        debug!("menoh: built model on {backend_name:?} with {} attached buffers", attached.len());
        Ok(model)
    }

    /// Builds a model with the backend named in `config`.
    pub fn build_with(&self, model_data: &ModelData, config: &BackendConfig) -> Result<Model, MenohError> {
        self.build(model_data, &config.name, &config.config)
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    /// Deletes the native builder and drops its buffer registry. Models
    /// already built keep their own copy of the registry.
    pub fn close(&self) {
        self.handle.release();
        self.attached.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// A built model, ready to run.
pub struct Model {
    handle: Handle,
    attached: Mutex<Registry>,
}

impl Model {
    /// Returns a view of variable `name`.
    pub fn variable(&self, name: &str) -> Result<Variable<'_>, MenohError> {
        let c_name = c_string(name)?;
        let engine = self.handle.engine();
        let api = engine.api();

        let (profile, data) = self.handle.with(|raw| {
            let profile = profile::query_profile(
                engine,
                raw,
                &c_name,
                api.model_get_variable_dtype,
                api.model_get_variable_dims_size,
                api.model_get_variable_dims_at,
            )?;
            let mut data: *mut c_void = ptr::null_mut();
            engine.check(unsafe { (api.model_get_variable_buffer_handle)(raw, c_name.as_ptr(), &mut data) })?;
            Ok((profile, data))
        })?;

        let len = buffer_len(profile.dtype(), profile.dims()).ok_or(MenohError::EmptyBuffer)?;
        if data.is_null() {
            return Err(MenohError::EmptyBuffer);
        }
        let backing = self.attached.lock().get(name).map(|b| Arc::clone(b.memory()));

        Ok(Variable {
            model: self,
            name: name.to_string(),
            dtype: profile.dtype(),
            dims: profile.dims().to_vec(),
            data: data as *mut u8,
            len,
            backing,
        })
    }

    /// Runs inference once. Inputs are read from and outputs written to the
    /// variable buffers.
    ///
    /// Attached regions are locked for writing until the run returns.
    pub fn run(&self) -> Result<(), MenohError> {
        let engine = self.handle.engine();
        self.handle.with(|raw| {
            let attached = self.attached.lock();
            let mut regions: Vec<&Arc<NativeMemory>> = attached.values().map(|b| b.memory()).collect();
            regions.sort_by_key(|m| Arc::as_ptr(*m));
            regions.dedup_by_key(|m| Arc::as_ptr(*m));
            let _guards: Vec<_> = regions.iter().map(|m| m.write()).collect();
            engine.check(unsafe { (engine.api().model_run)(raw) })
        })
    }

    /// Provenance of the buffer attached to `name`, if any.
    pub fn attached(&self, name: &str) -> Option<Provenance> {
        provenance_of(&self.attached, name)
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    /// Deletes the native model, then drops its buffer registry.
    pub fn close(&self) {
        self.handle.release();
        self.attached.lock().clear();
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

/// Byte length of a variable, or `None` for a rank-0 or empty shape.
fn buffer_len(dtype: DType, dims: &[i32]) -> Option<usize> {
    if dims.is_empty() {
        return None;
    }
    dims.iter()
        .try_fold(dtype.size(), |acc, &d| usize::try_from(d).ok().and_then(|d| acc.checked_mul(d)))
        .filter(|&n| n > 0)
}

// ---------------------------------------------------------------------------
// Variable
// ---------------------------------------------------------------------------

/// A view of one variable's buffer inside a [`Model`].
///
/// Every access checks that the model is still open.
pub struct Variable<'m> {
    model: &'m Model,
    name: String,
    dtype: DType,
    dims: Vec<i32>,
    data: *mut u8,
    len: usize,
    // Attached region behind `data`, if any.
    backing: Option<Arc<NativeMemory>>,
}

impl Variable<'_> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[i32] {
        &self.dims
    }

    /// Size of the buffer in bytes.
    pub fn buffer_len(&self) -> usize {
        self.len
    }

    /// Copies the whole buffer out.
    pub fn to_bytes(&self) -> Result<Vec<u8>, MenohError> {
        self.model.handle.with(|_| {
            let mut out = vec![0u8; self.len];
            let _guard = self.backing.as_ref().map(|m| m.read());
            unsafe { ptr::copy_nonoverlapping(self.data, out.as_mut_ptr(), self.len) };
            Ok(out)
        })
    }

    /// Copies the whole buffer out as native-order f32 values.
    pub fn to_f32_vec(&self) -> Result<Vec<f32>, MenohError> {
        Ok(buffer::f32_from_ne_bytes(&self.to_bytes()?))
    }

    /// Copies `data` to the start of the buffer. The rest is left as is.
    pub fn write_bytes(&self, data: &[u8]) -> Result<(), MenohError> {
        self.write_raw(data.as_ptr(), data.len())
    }

    /// Writes `values` in native byte order to the start of the buffer.
    pub fn write_f32(&self, values: &[f32]) -> Result<(), MenohError> {
        self.write_bytes(&buffer::f32_to_ne_bytes(values))
    }

    pub(crate) fn write_foreign(&self, src: &ForeignBuffer) -> Result<(), MenohError> {
        self.write_raw(src.as_ptr(), src.len())
    }

    /// Fails with [`MenohError::LengthMismatch`] unless `len` bytes fit.
    pub(crate) fn check_fits(&self, len: usize) -> Result<(), MenohError> {
        if len > self.len {
            return Err(MenohError::LengthMismatch {
                name: self.name.clone(),
                len,
                capacity: self.len,
            });
        }
        Ok(())
    }

    fn write_raw(&self, src: *const u8, len: usize) -> Result<(), MenohError> {
        self.check_fits(len)?;
        self.model.handle.with(|_| {
            let _guard = self.backing.as_ref().map(|m| m.write());
            unsafe { ptr::copy_nonoverlapping(src, self.data, len) };
            Ok(())
        })
    }

    #[cfg(test)]
    pub(crate) fn as_ptr(&self) -> *mut u8 {
        self.data
    }
}

impl fmt::Debug for Variable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Variable")
            .field("name", &self.name)
            .field("dtype", &self.dtype)
            .field("dims", &self.dims)
            .field("len", &self.len)
            .finish()
    }
}
