//! Session configuration.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Capacity of the slot arrays shared with the evaluation layer.
pub const DEFAULT_MAX_PARAMS: usize = 2000;

/// Settings fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Size of the parameter, normalisation and index arrays.
    pub max_params: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { max_params: DEFAULT_MAX_PARAMS }
    }
}

impl SessionConfig {
    /// Config with an explicit capacity.
    pub fn with_max_params(max_params: usize) -> Self {
        Self { max_params }
    }

    /// Parse and validate a JSON document.
    pub fn from_json_str(s: &str) -> Result<Self> {
        let cfg: Self = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Read, parse and validate a JSON file.
    pub fn from_json_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        log::debug!("loading session config from {}", path.display());
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Slot 0 of the constants region is reserved, so at least two slots are needed.
    pub fn validate(&self) -> Result<()> {
        if self.max_params < 2 {
            return Err(Error::Validation(format!(
                "max_params must be at least 2, got {}",
                self.max_params
            )));
        }
        Ok(())
    }
}
