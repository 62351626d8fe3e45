//! Rust bindings for the Menoh DNN inference library.
//!
//! Menoh runs ONNX models on CPU backends such as MKL-DNN. This crate wraps
//! its C handle API, providing safe Rust types for the build pipeline:
//! ModelData (parsed model), VariableProfileTable (resolved shapes),
//! ModelBuilder and Model (inference), and ModelRunner (all of the above).
//!
//! # Usage
//!
//! ```no_run
//! # #[cfg(feature = "link")]
//! # fn main() -> Result<(), giztoy_menoh::MenohError> {
//! use giztoy_menoh::{DType, Engine, ModelBuilder, ModelData, VariableProfileTableBuilder};
//!
//! let engine = Engine::linked();
//! let data = ModelData::from_onnx_file(&engine, "and_op.onnx")?;
//!
//! let vpt_builder = VariableProfileTableBuilder::new(&engine)?;
//! vpt_builder
//!     .add_input_profile("input", DType::Float, &[4, 2])?
//!     .add_output_name("output")?;
//! let vpt = vpt_builder.build(&data)?;
//!
//! let builder = ModelBuilder::new(&vpt)?;
//! builder.attach("input", &[0.0f32, 0.0, 0.0, 1.0, 1.0, 0.0, 1.0, 1.0])?;
//! data.optimize(&vpt)?;
//! let model = builder.build(&data, "mkldnn", "")?;
//!
//! model.run()?;
//! let output = model.variable("output")?.to_f32_vec()?;
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "link"))]
//! # fn main() {}
//! ```
//!
//! # Buffers
//!
//! The engine keeps raw pointers into attached buffers. A [`DirectBuffer`]
//! is attached in place; any other source is copied into memory owned by
//! the attaching object. Either way the memory stays valid until the last
//! [`ModelBuilder`] or [`Model`] that references it is closed.
//!
//! # Linking
//!
//! With the `link` feature, `libmenoh` is linked dynamically and
//! [`Engine::linked`] reaches it. Without it, an [`Engine`] can wrap any
//! other [`ffi::MenohApi`] table.
//!
//! # Thread Safety
//!
//! Owning types are `Send + Sync`. Calls on one native object are serialized;
//! closing an object from one thread while another uses it is safe, and
//! the later call fails with [`MenohError::Released`].
//!
//! Buffer memory shared between [`DirectBuffer`] clones and attached models
//! is guarded by a reader/writer lock. [`Model::run`] holds it for writing on
//! every attached buffer, so a concurrent read sees a region either before
//! or after a run.

mod buffer;
mod config;
mod dtype;
mod engine;
mod error;
pub mod ffi;
mod handle;
mod model;
mod model_data;
mod profile;
mod runner;

#[cfg(test)]
mod testing;

pub use buffer::{bridge, copy_in, copy_in_range, BufferSource, DirectBuffer, ForeignBuffer, Provenance};
pub use config::{BackendConfig, DEFAULT_BACKEND_CONFIG, DEFAULT_BACKEND_NAME};
pub use dtype::DType;
pub use engine::Engine;
pub use error::{ErrorCode, MenohError};
pub use model::{Model, ModelBuilder, Variable};
pub use model_data::ModelData;
pub use profile::{VariableProfile, VariableProfileTable, VariableProfileTableBuilder};
pub use runner::{ModelRunner, ModelRunnerBuilder};
