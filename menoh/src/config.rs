//! Backend selection for [`ModelBuilder::build_with`](crate::ModelBuilder::build_with).

use serde::{Deserialize, Serialize};

use crate::error::MenohError;

/// Default backend, Intel MKL-DNN on CPU.
pub const DEFAULT_BACKEND_NAME: &str = "mkldnn";

/// Default backend config (empty: use the backend's defaults).
pub const DEFAULT_BACKEND_CONFIG: &str = "";

/// Backend name and its JSON configuration string, as passed to
/// `menoh_build_model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Backend name (default: "mkldnn").
    pub name: String,
    /// Backend configuration, a JSON object or empty (default: "").
    #[serde(default)]
    pub config: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_BACKEND_NAME.to_string(),
            config: DEFAULT_BACKEND_CONFIG.to_string(),
        }
    }
}

impl BackendConfig {
    /// Selects `name` with an empty config.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: String::new(),
        }
    }

    /// Sets the raw config string.
    pub fn with_config(mut self, config: impl Into<String>) -> Self {
        self.config = config.into();
        self
    }

    /// Sets the config by serializing `value` to JSON.
    ///
    /// ```
    /// use giztoy_menoh::BackendConfig;
    /// use serde_json::json;
    ///
    /// let cfg = BackendConfig::new("mkldnn").with_json(&json!({"cpu_id": "0"})).unwrap();
    /// assert_eq!(cfg.config, r#"{"cpu_id":"0"}"#);
    /// ```
    pub fn with_json<T: Serialize>(mut self, value: &T) -> Result<Self, MenohError> {
        self.config = serde_json::to_string(value)?;
        Ok(self)
    }
}
