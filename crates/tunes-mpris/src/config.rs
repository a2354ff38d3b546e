//! Connector tuning, passed into the loop at construction.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const ART_CACHE_SUBDIR: &str = "DynTunes/album_art";

/// Settings for the bus-backed connector.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorConfig {
    /// Sleep between ticks while something is playing.
    #[serde(with = "secs")]
    pub poll_interval_playing: Duration,
    /// Sleep between ticks otherwise.
    #[serde(with = "secs")]
    pub poll_interval_idle: Duration,
    /// Minimum gap between two connection attempts.
    #[serde(with = "secs")]
    pub reconnect_throttle: Duration,
    /// Hold-off after the bound player disappears from the bus.
    #[serde(with = "secs")]
    pub vanished_backoff: Duration,
    /// Retry delay while the session bus itself is unreachable.
    #[serde(with = "secs")]
    pub connect_retry: Duration,
    /// Service name suffix that always wins selection.
    pub preferred_suffix: String,
    /// Case-insensitive substrings marking browser-hosted players.
    pub browser_deny_list: Vec<String>,
    /// `None` uses `<cache dir>/DynTunes/album_art`.
    pub art_cache_dir: Option<PathBuf>,
    pub art_cache_capacity: usize,
    /// Abort the process on unexpected loop errors instead of logging them.
    pub fail_fast: bool,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            poll_interval_playing: Duration::from_millis(500),
            poll_interval_idle: Duration::from_secs(2),
            reconnect_throttle: Duration::from_secs(10),
            vanished_backoff: Duration::from_secs(5),
            connect_retry: Duration::from_secs(2),
            preferred_suffix: ".spotify".to_string(),
            browser_deny_list: ["chromium", "brave", "firefox", "chrome", "plasma-browser"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            art_cache_dir: None,
            art_cache_capacity: 100,
            fail_fast: false,
        }
    }
}

impl ConnectorConfig {
    /// Resolved art cache directory.
    pub fn art_cache_dir(&self) -> PathBuf {
        self.art_cache_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(ART_CACHE_SUBDIR)
        })
    }
}

/// Durations as fractional seconds.
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
