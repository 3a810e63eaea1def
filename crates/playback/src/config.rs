use std::path::Path;
use std::time::Duration;

use renderer::SurfaceSize;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Player settings. Every field has a default, so partial JSON is accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Logical width of the render target.
    pub width: f32,
    /// Logical height of the render target.
    pub height: f32,
    /// Device pixels per logical unit. Read once at player construction.
    pub pixel_density: f32,
    pub auto_play: bool,
    pub looping: bool,
    /// Fallback delay before `prepare()` when the host never signals that its
    /// render context is ready.
    pub preparation_delay_ms: u64,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            width: 640.0,
            height: 360.0,
            pixel_density: 1.0,
            auto_play: false,
            looping: false,
            preparation_delay_ms: 100,
        }
    }
}

impl PlayerConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn surface_size(&self) -> SurfaceSize {
        SurfaceSize::from_logical(self.width, self.height, self.pixel_density)
    }

    pub fn preparation_delay(&self) -> Duration {
        Duration::from_millis(self.preparation_delay_ms)
    }
}
