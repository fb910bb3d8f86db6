//! Last known positions, kept across restarts.
//!
//! The file is a best-effort hint: a missing or unreadable file only means
//! covers start from the default position.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::Path;

use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::cover::motion::clamp;
use crate::cover::CoverSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SavedPosition {
    pub position: f64,
    pub tilt: f64,
}

impl SavedPosition {
    fn sanitized(self) -> Option<Self> {
        if self.position.is_nan() || self.tilt.is_nan() {
            return None;
        }
        Some(Self {
            position: clamp(self.position),
            tilt: clamp(self.tilt),
        })
    }
}

impl From<&CoverSnapshot> for SavedPosition {
    fn from(snapshot: &CoverSnapshot) -> Self {
        Self {
            position: snapshot.position,
            tilt: snapshot.tilt,
        }
    }
}

/// Positions keyed by cover `unique_id`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StateFile {
    #[serde(default)]
    pub covers: BTreeMap<String, SavedPosition>,
}

impl StateFile {
    /// Read the state file, falling back to an empty one on any problem
    pub fn load(path: &Path) -> Self {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No state file at '{}', starting fresh", path.display());
                return Self::default();
            }
            Err(e) => {
                warn!("Failed to read state file '{}': {}", path.display(), e);
                return Self::default();
            }
        };

        match serde_json::from_str::<StateFile>(&content) {
            Ok(state) => Self {
                covers: state
                    .covers
                    .into_iter()
                    .filter_map(|(id, saved)| saved.sanitized().map(|s| (id, s)))
                    .collect(),
            },
            Err(e) => {
                warn!("Ignoring corrupt state file '{}': {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Write the file next to its final location, then move it into place
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let json = serde_json::to_string_pretty(self).context("Failed to encode state")?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write '{}'", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to replace '{}'", path.display()))?;
        Ok(())
    }

    pub fn get(&self, unique_id: &str) -> Option<SavedPosition> {
        self.covers.get(unique_id).copied()
    }

    pub fn insert(&mut self, unique_id: String, saved: SavedPosition) {
        self.covers.insert(unique_id, saved);
    }
}
