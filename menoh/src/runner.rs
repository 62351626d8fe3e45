//! One-stop runner that owns the whole build pipeline.
//!
//! ```no_run
//! # #[cfg(feature = "link")]
//! # fn main() -> Result<(), giztoy_menoh::MenohError> {
//! use giztoy_menoh::{DType, Engine, ModelRunner};
//!
//! let runner = ModelRunner::from_onnx_file(&Engine::linked(), "and_op.onnx")?
//!     .add_input_profile("input", DType::Float, &[4, 2])?
//!     .add_output_name("output")?
//!     .attach("input", &[0.0f32, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0])?
//!     .build()?;
//!
//! runner.run()?;
//! let output = runner.variable("output")?.to_f32_vec()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "link"))]
//! # fn main() {}
//! ```

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::buffer::{self, BufferSource, DirectBuffer, ForeignBuffer};
use crate::config::BackendConfig;
use crate::dtype::DType;
use crate::engine::Engine;
use crate::error::MenohError;
use crate::model::{Model, ModelBuilder, Variable};
use crate::model_data::ModelData;
use crate::profile::{VariableProfileTable, VariableProfileTableBuilder};

// ---------------------------------------------------------------------------
// ModelRunnerBuilder
// ---------------------------------------------------------------------------

/// Collects profiles, buffers and the backend for a [`ModelRunner`].
///
/// Dropping the builder, including on an error in a chained call, releases
/// everything it holds.
pub struct ModelRunnerBuilder {
    data: ModelData,
    table_builder: VariableProfileTableBuilder,
    backend: BackendConfig,
    attached: HashMap<String, ForeignBuffer>,
}

impl ModelRunnerBuilder {
    fn new(engine: &Engine, data: ModelData) -> Result<Self, MenohError> {
        Ok(Self {
            table_builder: VariableProfileTableBuilder::new(engine)?,
            data,
            backend: BackendConfig::default(),
            attached: HashMap::new(),
        })
    }

    pub fn add_input_profile(self, name: &str, dtype: DType, dims: &[i32]) -> Result<Self, MenohError> {
        self.table_builder.add_input_profile(name, dtype, dims)?;
        Ok(self)
    }

    pub fn add_output_name(self, name: &str) -> Result<Self, MenohError> {
        self.table_builder.add_output_name(name)?;
        Ok(self)
    }

    /// Attaches a buffer to `name`, with the same rules as
    /// [`ModelBuilder::attach`]. The buffer is handed to the engine by
    /// [`build`](Self::build).
    pub fn attach<'a>(mut self, name: &str, source: impl Into<BufferSource<'a>>) -> Result<Self, MenohError> {
        self.attached
            .insert(name.to_string(), buffer::bridge(source, false)?);
        Ok(self)
    }

    /// Attaches a copy of `values[offset..offset + length]` to `name`.
    pub fn attach_range(mut self, name: &str, values: &[f32], offset: usize, length: usize) -> Result<Self, MenohError> {
        self.attached
            .insert(name.to_string(), buffer::copy_in_range(values, offset, length)?);
        Ok(self)
    }

    pub fn backend_name(mut self, name: impl Into<String>) -> Self {
        self.backend.name = name.into();
        self
    }

    pub fn backend_config(mut self, config: impl Into<String>) -> Self {
        self.backend.config = config.into();
        self
    }

    pub fn backend(mut self, backend: BackendConfig) -> Self {
        self.backend = backend;
        self
    }

    /// Backend the runner will be built on.
    pub fn config(&self) -> &BackendConfig {
        &self.backend
    }

    /// Names with an attached buffer, sorted.
    pub fn attached_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.attached.keys().cloned().collect();
        names.sort();
        names
    }

    /// Resolves the profiles, attaches the buffers, optimizes the model data
    /// and builds the model.
    pub fn build(self) -> Result<ModelRunner, MenohError> {
        let Self {
            data,
            table_builder,
            backend,
            attached,
        } = self;

        let table = table_builder.build(&data)?;
        let model_builder = ModelBuilder::new(&table)?;
        for (name, buffer) in attached {
            model_builder.attach_buffer(&name, buffer)?;
        }
        data.optimize(&table)?;
        let model = model_builder.build_with(&data, &backend)?;
        debug!("menoh: runner ready on {:?}", backend.name);

        Ok(ModelRunner {
            model,
            model_builder,
            table,
            table_builder,
            data,
        })
    }
}

// ---------------------------------------------------------------------------
// ModelRunner
// ---------------------------------------------------------------------------

/// A built model together with everything it was built from.
pub struct ModelRunner {
    model: Model,
    model_builder: ModelBuilder,
    table: VariableProfileTable,
    table_builder: VariableProfileTableBuilder,
    data: ModelData,
}

impl ModelRunner {
    pub fn from_onnx_file(engine: &Engine, path: impl AsRef<Path>) -> Result<ModelRunnerBuilder, MenohError> {
        ModelRunnerBuilder::new(engine, ModelData::from_onnx_file(engine, path)?)
    }

    pub fn from_onnx_bytes(engine: &Engine, data: &[u8]) -> Result<ModelRunnerBuilder, MenohError> {
        ModelRunnerBuilder::new(engine, ModelData::from_onnx_bytes(engine, data)?)
    }

    pub fn from_onnx_bytes_range(
        engine: &Engine,
        data: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<ModelRunnerBuilder, MenohError> {
        ModelRunnerBuilder::new(engine, ModelData::from_onnx_bytes_range(engine, data, offset, length)?)
    }

    /// Loads the model from a direct buffer without copying it.
    pub fn from_onnx_buffer(engine: &Engine, data: &DirectBuffer) -> Result<ModelRunnerBuilder, MenohError> {
        ModelRunnerBuilder::new(engine, ModelData::from_onnx_buffer(engine, data)?)
    }

    /// Runs with the variable buffers as they are.
    pub fn run(&self) -> Result<(), MenohError> {
        self.model.run()
    }

    /// Copies `source` into variable `name`, then runs.
    pub fn run_with<'a>(&self, name: &str, source: impl Into<BufferSource<'a>>) -> Result<(), MenohError> {
        self.run_with_all(&[(name, source.into())])
    }

    /// Copies `values[offset..offset + length]` into variable `name`, then runs.
    pub fn run_with_range(&self, name: &str, values: &[f32], offset: usize, length: usize) -> Result<(), MenohError> {
        self.assign(name, buffer::copy_in_range(values, offset, length)?)?;
        self.model.run()
    }

    /// Copies every `(name, source)` pair into its variable, then runs once.
    ///
    /// Each source is copied to the start of the variable's buffer. All
    /// pairs are checked first: an unknown name, or a source larger than
    /// its buffer ([`MenohError::LengthMismatch`]), fails before any
    /// variable is written.
    pub fn run_with_all(&self, inputs: &[(&str, BufferSource<'_>)]) -> Result<(), MenohError> {
        let mut staged = Vec::with_capacity(inputs.len());
        for (name, source) in inputs {
            let data = buffer::copy_in(*source)?;
            let var = self.model.variable(name)?;
            var.check_fits(data.len())?;
            staged.push((var, data));
        }
        for (var, data) in &staged {
            var.write_foreign(data)?;
        }
        self.model.run()
    }

    fn assign(&self, name: &str, data: ForeignBuffer) -> Result<(), MenohError> {
        self.model.variable(name)?.write_foreign(&data)
    }

    pub fn variable(&self, name: &str) -> Result<Variable<'_>, MenohError> {
        self.model.variable(name)
    }

    pub fn is_closed(&self) -> bool {
        self.model.is_closed()
    }

    /// Releases the model, model builder, profile table, profile table
    /// builder and model data, in that order.
    pub fn close(&self) {
        self.model.close();
        self.model_builder.close();
        self.table.close();
        self.table_builder.close();
        self.data.close();
    }
}

impl Drop for ModelRunner {
    fn drop(&mut self) {
        self.close();
    }
}
