use serde::{Deserialize, Serialize};

use crate::error::MenohError;

/// Element data type of a variable (`menoh_dtype`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(i32)]
pub enum DType {
    Float = 0,
}

impl DType {
    /// Returns the engine's id for this dtype.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Byte size of one element.
    pub fn size(self) -> usize {
        match self {
            DType::Float => 4,
        }
    }

    /// Looks up a dtype by engine id.
    pub fn from_id(id: i32) -> Result<Self, MenohError> {
        match id {
            0 => Ok(DType::Float),
            other => Err(MenohError::UnknownDType(other)),
        }
    }
}
