//! Player selection among the advertised MPRIS services

use crate::config::ConnectorConfig;

/// Well-known MPRIS bus name prefix.
pub const MPRIS_PREFIX: &str = "org.mpris.MediaPlayer2.";

/// Extract short name from full bus name
/// "org.mpris.MediaPlayer2.spotify" -> "spotify"
/// "org.mpris.MediaPlayer2.firefox.instance_1_234" -> "firefox"
pub fn short_name(bus_name: &str) -> &str {
    let rest = bus_name.strip_prefix(MPRIS_PREFIX).unwrap_or(bus_name);
    rest.split('.').next().unwrap_or(rest)
}

/// Fixed priority policy for picking one player.
#[derive(Clone, Debug)]
pub struct SourcePolicy {
    preferred_suffix: String,
    /// Lower-cased browser markers
    browser_markers: Vec<String>,
}

impl SourcePolicy {
    pub fn new(preferred_suffix: impl Into<String>, browser_markers: &[String]) -> Self {
        Self {
            preferred_suffix: preferred_suffix.into(),
            browser_markers: browser_markers.iter().map(|m| m.to_lowercase()).collect(),
        }
    }

    pub fn from_config(config: &ConnectorConfig) -> Self {
        Self::new(config.preferred_suffix.clone(), &config.browser_deny_list)
    }

    pub fn is_browser(&self, service: &str) -> bool {
        let lower = service.to_lowercase();
        self.browser_markers.iter().any(|m| lower.contains(m.as_str()))
    }

    /// Pick the player to follow.
    ///
    /// Candidates are ordered by name first, so the result only depends on
    /// which services exist, not on the order the bus listed them in.
    /// Priority: preferred suffix, then any non-browser, then any browser.
    pub fn select<'a>(&self, services: &'a [String]) -> Option<&'a str> {
        let mut sorted: Vec<&'a str> = services.iter().map(String::as_str).collect();
        sorted.sort_unstable();
        sorted.dedup();

        if !self.preferred_suffix.is_empty() {
            if let Some(s) = sorted.iter().find(|s| s.ends_with(&self.preferred_suffix)) {
                return Some(*s);
            }
        }

        sorted
            .iter()
            .find(|s| !self.is_browser(s))
            .or_else(|| sorted.iter().find(|s| self.is_browser(s)))
            .or_else(|| sorted.first())
            .copied()
    }
}

impl Default for SourcePolicy {
    fn default() -> Self {
        Self::from_config(&ConnectorConfig::default())
    }
}
