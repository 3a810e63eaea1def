use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompositionLoadError {
    #[error("failed to read composition {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid composition JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// One track of a composition, placed on the composition timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackSpec {
    pub id: String,
    /// Source the engine decodes for this track.
    #[serde(default)]
    pub source: Option<String>,
    /// Composition time (seconds) at which the track starts.
    #[serde(default)]
    pub start: f64,
    pub duration: f64,
    /// Offset into the source, in seconds.
    #[serde(default)]
    pub in_offset: f64,
}

impl TrackSpec {
    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn is_active_at(&self, time: f64) -> bool {
        time >= self.start && time < self.end()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CompositionSpec {
    #[serde(default)]
    pub tracks: Vec<TrackSpec>,
    /// Explicit duration; defaults to the end of the last track.
    #[serde(default)]
    pub duration: Option<f64>,
}

impl CompositionSpec {
    pub fn from_json_str(json: &str) -> Result<Self, CompositionLoadError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, CompositionLoadError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| CompositionLoadError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json_str(&json)
    }

    pub fn duration(&self) -> f64 {
        self.duration.unwrap_or_else(|| {
            self.tracks
                .iter()
                .map(TrackSpec::end)
                .fold(0.0_f64, f64::max)
        })
    }

    pub fn active_tracks(&self, time: f64) -> impl Iterator<Item = &TrackSpec> {
        self.tracks.iter().filter(move |track| track.is_active_at(time))
    }
}
