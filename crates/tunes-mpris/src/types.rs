//! Core types for tunes-mpris

use std::collections::HashMap;

/// Playback status from MPRIS player
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PlaybackStatus {
    Playing,
    Paused,
    #[default]
    Stopped,
}

impl PlaybackStatus {
    pub fn from_str(s: &str) -> Self {
        match s {
            "Playing" => PlaybackStatus::Playing,
            "Paused" => PlaybackStatus::Paused,
            _ => PlaybackStatus::Stopped,
        }
    }

    pub fn is_playing(&self) -> bool {
        matches!(self, PlaybackStatus::Playing)
    }
}

/// Published "what is playing" state.
///
/// A new value is built and published as a whole on every loop tick, so a
/// reader always sees one consistent record.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album: Option<String>,
    /// Local file path when the art could be resolved to one, otherwise the
    /// reference exactly as the player reported it.
    pub album_art: Option<String>,
    pub is_playing: bool,
    pub position_secs: f32,
    /// 0 means unknown
    pub length_secs: f32,
    pub is_connected: bool,
}

impl Snapshot {
    /// Clear the live flags, keeping text fields for display continuity.
    pub fn disconnected(&self) -> Self {
        Self {
            is_playing: false,
            is_connected: false,
            ..self.clone()
        }
    }
}

/// Loosely typed metadata value, decoded from whatever the player sent.
#[derive(Clone, Debug, PartialEq)]
pub enum MetaValue {
    Str(String),
    StrList(Vec<String>),
    I64(i64),
    U64(u64),
    I32(i32),
    U32(u32),
    F64(f64),
    Bool(bool),
    /// Anything else (dicts, nested variants, ...)
    Other,
}

/// Metadata property bag keyed by xesam/mpris key.
pub type MetadataBag = HashMap<String, MetaValue>;
