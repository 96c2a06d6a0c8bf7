//! Engine config loading and persistence.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Bounded retry budget for revision-guarded top comparisons.
    pub top_retry_limit: u32,
    /// Ledger records examined per sweeper batch.
    pub sweep_batch_size: usize,
    /// Snapshot stub when a bid's user no longer resolves.
    pub deleted_user_label: String,
    /// Snapshot stub when a bid's media no longer resolves.
    pub deleted_media_label: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            top_retry_limit: 8,
            sweep_batch_size: 500,
            deleted_user_label: "Deleted User".to_string(),
            deleted_media_label: "Deleted Media".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load from a JSON file; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        match fs::read_to_string(path) {
            Ok(raw) => serde_json::from_str(&raw).map_err(|e| Error::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(Error::Config {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        fs::write(path, raw).map_err(|e| Error::Config {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = EngineConfig::load(&dir.path().join("absent.json")).unwrap();
        assert_eq!(cfg.top_retry_limit, EngineConfig::default().top_retry_limit);
    }

    #[test]
    fn round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("engine.json");
        let mut cfg = EngineConfig::default();
        cfg.top_retry_limit = 3;
        cfg.save(&path).unwrap();
        let back = EngineConfig::load(&path).unwrap();
        assert_eq!(back.top_retry_limit, 3);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: EngineConfig = serde_json::from_str(r#"{"sweep_batch_size": 50}"#).unwrap();
        assert_eq!(cfg.sweep_batch_size, 50);
        assert_eq!(cfg.deleted_user_label, "Deleted User");
    }
}
