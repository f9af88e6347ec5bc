use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use facetrack_core::shared::constants::{DEFAULT_EMBEDDING_DIM, DEFAULT_MATCH_THRESHOLD};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store_dir: Option<PathBuf>,
    pub match_threshold: f64,
    pub embedding_dim: usize,
    pub worker_threads: Option<usize>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            store_dir: None,
            match_threshold: DEFAULT_MATCH_THRESHOLD,
            embedding_dim: DEFAULT_EMBEDDING_DIM,
            worker_threads: None,
        }
    }
}

impl Settings {
    pub fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("FaceTrack").join("settings.json"))
    }

    /// Platform data directory for identity records.
    ///
    /// - macOS: `~/Library/Application Support/FaceTrack/identities/`
    /// - Linux: `$XDG_DATA_HOME/FaceTrack/identities/` or `~/.local/share/FaceTrack/identities/`
    /// - Windows: `%APPDATA%/FaceTrack/identities/`
    pub fn default_store_dir() -> Option<PathBuf> {
        dirs::data_dir().map(|d| d.join("FaceTrack").join("identities"))
    }

    pub fn load() -> Self {
        Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default()
    }

    /// Missing or malformed files fall back to defaults.
    pub fn load_from(path: &Path) -> Self {
        fs::read_to_string(path)
            .ok()
            .and_then(|json| match serde_json::from_str(&json) {
                Ok(settings) => Some(settings),
                Err(e) => {
                    log::warn!("Ignoring malformed settings {}: {e}", path.display());
                    None
                }
            })
            .unwrap_or_default()
    }

    pub fn save_to(&self, path: &Path) -> Result<(), Box<dyn std::error::Error>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store_dir.clone().or_else(Self::default_store_dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            Settings::load_from(&dir.path().join("none.json")),
            Settings::default()
        );
    }

    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert_eq!(Settings::load_from(&path), Settings::default());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(&path, r#"{ "embedding_dim": 128 }"#).unwrap();

        let settings = Settings::load_from(&path);

        assert_eq!(settings.embedding_dim, 128);
        assert_eq!(settings.match_threshold, DEFAULT_MATCH_THRESHOLD);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.json");
        let settings = Settings {
            store_dir: Some(dir.path().join("ids")),
            match_threshold: 0.55,
            embedding_dim: 256,
            worker_threads: Some(4),
        };

        settings.save_to(&path).unwrap();

        assert_eq!(Settings::load_from(&path), settings);
    }

    #[test]
    fn test_explicit_store_dir_wins() {
        let settings = Settings {
            store_dir: Some(PathBuf::from("/tmp/ids")),
            ..Settings::default()
        };
        assert_eq!(settings.store_dir(), Some(PathBuf::from("/tmp/ids")));
    }
}
