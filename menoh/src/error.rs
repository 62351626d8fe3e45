use std::fmt;

use thiserror::Error;

/// Status codes returned by the Menoh C API (`menoh_error_code`).
///
/// The integer values are the Menoh 1.1 ABI and must not be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ErrorCode {
    Success = 0,
    StdError = 1,
    UnknownError = 2,
    InvalidFilename = 3,
    UnsupportedOnnxOpsetVersion = 4,
    OnnxParseError = 5,
    InvalidDType = 6,
    InvalidAttributeType = 7,
    UnsupportedOperatorAttribute = 8,
    DimensionMismatch = 9,
    VariableNotFound = 10,
    IndexOutOfRange = 11,
    JsonParseError = 12,
    InvalidBackendName = 13,
    UnsupportedOperator = 14,
    FailedToConfigureOperator = 15,
    BackendError = 16,
    SameNamedVariableAlreadyExist = 17,
    UnsupportedInputDims = 18,
}

impl ErrorCode {
    const ALL: [ErrorCode; 19] = [
        ErrorCode::Success,
        ErrorCode::StdError,
        ErrorCode::UnknownError,
        ErrorCode::InvalidFilename,
        ErrorCode::UnsupportedOnnxOpsetVersion,
        ErrorCode::OnnxParseError,
        ErrorCode::InvalidDType,
        ErrorCode::InvalidAttributeType,
        ErrorCode::UnsupportedOperatorAttribute,
        ErrorCode::DimensionMismatch,
        ErrorCode::VariableNotFound,
        ErrorCode::IndexOutOfRange,
        ErrorCode::JsonParseError,
        ErrorCode::InvalidBackendName,
        ErrorCode::UnsupportedOperator,
        ErrorCode::FailedToConfigureOperator,
        ErrorCode::BackendError,
        ErrorCode::SameNamedVariableAlreadyExist,
        ErrorCode::UnsupportedInputDims,
    ];

    /// Maps a raw status code, or `None` if the code is not part of the ABI.
    pub fn from_raw(code: i32) -> Option<Self> {
        usize::try_from(code).ok().and_then(|i| Self::ALL.get(i).copied())
    }

    /// Returns the raw status code.
    pub fn id(self) -> i32 {
        self as i32
    }

    /// Returns the snake_case name used by `menoh.h`.
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Success => "success",
            ErrorCode::StdError => "std_error",
            ErrorCode::UnknownError => "unknown_error",
            ErrorCode::InvalidFilename => "invalid_filename",
            ErrorCode::UnsupportedOnnxOpsetVersion => "unsupported_onnx_opset_version",
            ErrorCode::OnnxParseError => "onnx_parse_error",
            ErrorCode::InvalidDType => "invalid_dtype",
            ErrorCode::InvalidAttributeType => "invalid_attribute_type",
            ErrorCode::UnsupportedOperatorAttribute => "unsupported_operator_attribute",
            ErrorCode::DimensionMismatch => "dimension_mismatch",
            ErrorCode::VariableNotFound => "variable_not_found",
            ErrorCode::IndexOutOfRange => "index_out_of_range",
            ErrorCode::JsonParseError => "json_parse_error",
            ErrorCode::InvalidBackendName => "invalid_backend_name",
            ErrorCode::UnsupportedOperator => "unsupported_operator",
            ErrorCode::FailedToConfigureOperator => "failed_to_configure_operator",
            ErrorCode::BackendError => "backend_error",
            ErrorCode::SameNamedVariableAlreadyExist => "same_named_variable_already_exist",
            ErrorCode::UnsupportedInputDims => "unsupported_input_dims",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Errors returned by Menoh operations.
#[derive(Debug, Error)]
pub enum MenohError {
    /// The engine reported a failure.
    #[error("{code}: {message}")]
    Engine { code: ErrorCode, message: String },

    /// The engine returned a status code outside the known ABI.
    #[error("undefined error code {code}: {message}")]
    Undefined { code: i32, message: String },

    #[error("menoh: buffer must not be empty")]
    EmptyBuffer,

    #[error("menoh: buffer is not direct")]
    NotDirect,

    #[error("menoh: invalid argument: {0}")]
    InvalidArgument(String),

    #[error("menoh: failed to allocate {0} bytes")]
    OutOfMemory(usize),

    #[error("menoh: {0} has been released")]
    Released(&'static str),

    #[error("menoh: undefined dtype: {0}")]
    UnknownDType(i32),

    #[error("menoh: data with length {len} can't be assigned to the variable {name:?} (capacity {capacity})")]
    LengthMismatch { name: String, len: usize, capacity: usize },

    /// An attached buffer is smaller than the variable it backs.
    #[error("menoh: buffer of {len} bytes attached to the variable {name:?} needs at least {required} bytes")]
    BufferTooSmall { name: String, len: usize, required: usize },

    #[error("menoh: invalid backend config: {0}")]
    BackendConfig(#[from] serde_json::Error),
}

impl MenohError {
    /// Builds the error for a non-zero status and the engine's last message.
    pub(crate) fn from_status(code: i32, message: String) -> Self {
        match ErrorCode::from_raw(code) {
            Some(code) => MenohError::Engine { code, message },
            None => MenohError::Undefined { code, message },
        }
    }

    /// Returns the engine error code, if the engine reported this error.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            MenohError::Engine { code, .. } => Some(*code),
            _ => None,
        }
    }
}
