//! Host configuration: which connector to run and how to name the variables.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tunes_mpris::{ConnectorConfig, ConnectorKind};

const CONFIG_DIR: &str = "dyntunes";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Names used for each published variable.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub album_art_url: String,
    pub playing: String,
    pub position: String,
    pub length: String,
    pub is_connected: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            title: "Title".to_string(),
            artist: "Artist".to_string(),
            album: "Album".to_string(),
            album_art_url: "AlbumArtUrl".to_string(),
            playing: "IsPlaying".to_string(),
            position: "Position".to_string(),
            length: "Length".to_string(),
            is_connected: "IsConnected".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DynTunesConfig {
    pub connector: ConnectorKind,
    pub mpris: ConnectorConfig,
    /// Space the variables live in, e.g. "User" for "User/Music_Title"
    pub key_space: String,
    /// Prepended to every field name, e.g. "Music_" for "User/Music_Title"
    pub key_prefix: String,
    /// Container the variables are grouped under
    pub slot_name: String,
    pub fields: FieldNames,
    /// How often the host reads the connector state
    pub update_interval_ms: u64,
}

impl Default for DynTunesConfig {
    fn default() -> Self {
        Self {
            connector: ConnectorKind::default(),
            mpris: ConnectorConfig::default(),
            key_space: "User".to_string(),
            key_prefix: "Music_".to_string(),
            slot_name: "🎵 DynTunes".to_string(),
            fields: FieldNames::default(),
            update_interval_ms: 100,
        }
    }
}

impl DynTunesConfig {
    /// `~/.config/dyntunes/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_DIR).join(CONFIG_FILE))
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    /// Load from file, or return defaults if missing or invalid.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                Self::default()
            }
            Err(e) => {
                log::warn!("Ignoring config {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms.max(1))
    }
}
