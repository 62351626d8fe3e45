//! Variable profiles: the input shapes a caller declares and the shapes the
//! engine resolves for every variable of the graph.

use std::ffi::CStr;
use std::os::raw::{c_char, c_void};
use std::ptr;

use tracing::debug;

use crate::dtype::DType;
use crate::engine::{c_string, Engine};
use crate::error::MenohError;
use crate::ffi;
use crate::handle::Handle;
use crate::model_data::ModelData;

/// Data type and shape of one variable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariableProfile {
    dtype: DType,
    dims: Vec<i32>,
}

impl VariableProfile {
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    pub fn dims(&self) -> &[i32] {
        &self.dims
    }
}

pub(crate) type GetI32 = unsafe extern "C" fn(*mut c_void, *const c_char, *mut i32) -> ffi::MenohErrorCode;
pub(crate) type GetDimsAt = unsafe extern "C" fn(*mut c_void, *const c_char, i32, *mut i32) -> ffi::MenohErrorCode;

/// Reads dtype and dims of `name` through one of the engine's
/// `get_dtype`/`get_dims_size`/`get_dims_at` triples.
pub(crate) fn query_profile(
    engine: Engine,
    raw: *mut c_void,
    name: &CStr,
    get_dtype: GetI32,
    get_dims_size: GetI32,
    get_dims_at: GetDimsAt,
) -> Result<VariableProfile, MenohError> {
    let mut dtype = 0;
    engine.check(unsafe { get_dtype(raw, name.as_ptr(), &mut dtype) })?;
    let dtype = DType::from_id(dtype)?;

    let mut size = 0;
    engine.check(unsafe { get_dims_size(raw, name.as_ptr(), &mut size) })?;

    let mut dims = Vec::with_capacity(size.max(0) as usize);
    for i in 0..size {
        let mut d = 0;
        engine.check(unsafe { get_dims_at(raw, name.as_ptr(), i, &mut d) })?;
        dims.push(d);
    }
    Ok(VariableProfile { dtype, dims })
}

// ---------------------------------------------------------------------------
// VariableProfileTableBuilder
// ---------------------------------------------------------------------------

/// Collects input profiles and requested output names.
pub struct VariableProfileTableBuilder {
    handle: Handle,
}

impl VariableProfileTableBuilder {
    pub fn new(engine: &Engine) -> Result<Self, MenohError> {
        let mut raw: ffi::MenohVariableProfileTableBuilderHandle = ptr::null_mut();
        engine.check(unsafe { (engine.api().make_variable_profile_table_builder)(&mut raw) })?;
        Ok(Self {
            handle: Handle::new(
                *engine,
                raw,
                engine.api().delete_variable_profile_table_builder,
                "variable profile table builder",
            ),
        })
    }

    /// Declares an input variable with its dtype and shape.
    ///
    /// Any rank is accepted except 0.
    pub fn add_input_profile(&self, name: &str, dtype: DType, dims: &[i32]) -> Result<&Self, MenohError> {
        if dims.is_empty() {
            return Err(MenohError::InvalidArgument(format!(
                "input profile {name:?} must have at least one dimension"
            )));
        }
        let dims_size = i32::try_from(dims.len())
            .map_err(|_| MenohError::InvalidArgument(format!("too many dimensions: {}", dims.len())))?;
        let c_name = c_string(name)?;
        let engine = self.handle.engine();

        self.handle.with(|raw| {
            engine.check(unsafe {
                (engine.api().variable_profile_table_builder_add_input_profile)(
                    raw,
                    c_name.as_ptr(),
                    dtype.id(),
                    dims_size,
                    dims.as_ptr(),
                )
            })
        })?;
        Ok(self)
    }

    /// Requests an output variable by name.
    pub fn add_output_name(&self, name: &str) -> Result<&Self, MenohError> {
        let c_name = c_string(name)?;
        let engine = self.handle.engine();
        self.handle.with(|raw| {
            engine.check(unsafe {
                (engine.api().variable_profile_table_builder_add_output_name)(raw, c_name.as_ptr())
            })
        })?;
        Ok(self)
    }

    /// Resolves the declared profiles against `model_data`.
    pub fn build(&self, model_data: &ModelData) -> Result<VariableProfileTable, MenohError> {
        let engine = self.handle.engine();
        let mut raw: ffi::MenohVariableProfileTableHandle = ptr::null_mut();
        self.handle.with(|builder| {
            model_data.handle().with(|data| {
                engine.check(unsafe { (engine.api().build_variable_profile_table)(builder, data, &mut raw) })
            })
        })?;
        debug!("menoh: built variable profile table");

        Ok(VariableProfileTable {
            handle: Handle::new(
                engine,
                raw,
                engine.api().delete_variable_profile_table,
                "variable profile table",
            ),
        })
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    pub fn close(&self) {
        self.handle.release();
    }

    #[cfg(test)]
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

// ---------------------------------------------------------------------------
// VariableProfileTable
// ---------------------------------------------------------------------------

/// Resolved profiles of the declared inputs and requested outputs.
pub struct VariableProfileTable {
    handle: Handle,
}

impl VariableProfileTable {
    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }

    /// Looks up the profile of a variable.
    pub fn variable_profile(&self, name: &str) -> Result<VariableProfile, MenohError> {
        let c_name = c_string(name)?;
        let engine = self.handle.engine();
        let api = engine.api();
        self.handle.with(|raw| {
            query_profile(
                engine,
                raw,
                &c_name,
                api.variable_profile_table_get_dtype,
                api.variable_profile_table_get_dims_size,
                api.variable_profile_table_get_dims_at,
            )
        })
    }

    pub fn is_closed(&self) -> bool {
        !self.handle.is_live()
    }

    pub fn close(&self) {
        self.handle.release();
    }
}
