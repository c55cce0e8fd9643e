//! Process-wide configuration.
//!
//! Settings are read once at startup and never re-read: the imaging engine
//! is a process-level decision, not a per-call parameter, and the failure
//! and validation toggles gate driver behavior for the process lifetime.
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! backend = "rust"          # Imaging engine: "rust" or "vips"
//! silent_failure = false    # On processing errors, fall back to the source
//! validate_on_open = true   # Exercise decoded sources eagerly
//! base_url = "/media/"      # Prefix for generated URLs
//! ```
//!
//! Config files are sparse — override just the values you want. Unknown
//! keys are rejected to catch typos early.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("unknown backend `{name}`; valid options are `rust` and `vips`")]
    UnknownBackend { name: String },
    #[error("backend `{name}` is not compiled in; rebuild with the `vips` feature")]
    BackendUnavailable { name: String },
}

/// The imaging engine a process runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Engine {
    /// Pure-Rust engine (`image` crate). The default.
    Rust,
    /// libvips engine, available with the `vips` cargo feature.
    Vips,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Imaging engine name, matched case-insensitively.
    pub backend: String,
    /// When a processor fails, log and substitute the unprocessed source
    /// instead of propagating the error. Per-format, not global.
    pub silent_failure: bool,
    /// Run the engine's verification probe on every opened source.
    pub validate_on_open: bool,
    /// URL prefix for stored paths.
    pub base_url: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            backend: "rust".to_owned(),
            silent_failure: false,
            validate_on_open: true,
            base_url: "/media/".to_owned(),
        }
    }
}

impl Settings {
    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        Ok(toml::from_str(content)?)
    }

    /// Resolve the configured engine.
    ///
    /// Selecting `vips` in a build without the feature is a configuration
    /// error, reported as such rather than falling back silently.
    pub fn engine(&self) -> Result<Engine, SettingsError> {
        match self.backend.to_ascii_lowercase().as_str() {
            "rust" => Ok(Engine::Rust),
            "vips" => {
                #[cfg(feature = "vips")]
                {
                    Ok(Engine::Vips)
                }
                #[cfg(not(feature = "vips"))]
                {
                    Err(SettingsError::BackendUnavailable {
                        name: self.backend.clone(),
                    })
                }
            }
            _ => Err(SettingsError::UnknownBackend {
                name: self.backend.clone(),
            }),
        }
    }
}
