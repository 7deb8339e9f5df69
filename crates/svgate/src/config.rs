//! JSON configuration.
//!
//! ```json
//! {
//!   "engine": { "command": "merman-cli", "args": ["render", "--id", "{id}", "-"] },
//!   "export": { "scale": 2.0, "background": "white", "maxPixels": 67108864 }
//! }
//! ```
//!
//! Every field is optional; missing fields keep their defaults.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Placeholder in [`EngineSettings::args`] replaced by the slot's render identifier.
pub const ID_PLACEHOLDER: &str = "{id}";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SvgateConfig {
    pub engine: EngineSettings,
    pub export: ExportSettings,
}

/// How to reach the external layout engine. Fixed for the lifetime of the process once the
/// engine is initialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EngineSettings {
    /// Executable that reads diagram text on stdin and prints SVG on stdout.
    pub command: String,
    /// Arguments; `{id}` is replaced by the render identifier.
    pub args: Vec<String>,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            command: "merman-cli".to_string(),
            args: vec![
                "render".to_string(),
                "--id".to_string(),
                ID_PLACEHOLDER.to_string(),
                "-".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExportSettings {
    /// Supersampling factor applied to the logical size.
    pub scale: f32,
    /// Opaque backdrop painted under the diagram (`white`, `#rrggbb`, ...).
    pub background: String,
    /// Fallback font family for text without a resolvable family.
    pub font_family: String,
    pub load_system_fonts: bool,
    /// Largest drawing surface, in pixels, an export may allocate.
    pub max_pixels: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            scale: crate::export::DEFAULT_SCALE,
            background: "white".to_string(),
            font_family: "Arial".to_string(),
            load_system_fonts: true,
            max_pixels: crate::export::DEFAULT_MAX_PIXELS,
        }
    }
}

impl SvgateConfig {
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.command.trim().is_empty() {
            return Err(ConfigError::Invalid("engine.command is empty".to_string()));
        }
        let scale = self.export.scale;
        if !(scale.is_finite() && scale > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "export.scale must be a positive number, got {scale}"
            )));
        }
        match crate::export::parse_color(&self.export.background) {
            None => {
                return Err(ConfigError::Invalid(format!(
                    "export.background is not a color: {:?}",
                    self.export.background
                )));
            }
            Some(color) if !color.is_opaque() => {
                return Err(ConfigError::Invalid(format!(
                    "export.background must be opaque, got {:?}",
                    self.export.background
                )));
            }
            Some(_) => {}
        }
        if self.export.max_pixels == 0 {
            return Err(ConfigError::Invalid(
                "export.maxPixels must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
