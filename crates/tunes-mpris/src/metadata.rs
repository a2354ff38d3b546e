//! Normalization of the MPRIS metadata bag into snapshot fields.
//!
//! Players disagree on value types (signed vs unsigned lengths, string vs
//! list artists), so every key is decoded leniently and a bad value only
//! drops that one field.

use crate::types::{MetaValue, MetadataBag, Snapshot};
use log::debug;

pub const KEY_TITLE: &str = "xesam:title";
pub const KEY_ARTIST: &str = "xesam:artist";
pub const KEY_ALBUM: &str = "xesam:album";
pub const KEY_ALBUM_ARTIST: &str = "xesam:albumArtist";
pub const KEY_ART_URL: &str = "mpris:artUrl";
pub const KEY_LENGTH: &str = "mpris:length";

const FILE_SCHEME: &str = "file://";

/// Where album art points to, after scheme inspection.
#[derive(Clone, Debug, PartialEq)]
pub enum ArtRef {
    /// Decoded local filesystem path
    Local(String),
    /// http(s) URL, to be resolved through the art cache
    Remote(String),
    /// Anything else, passed through untouched
    Verbatim(String),
}

impl ArtRef {
    pub fn parse(raw: &str) -> Self {
        if has_scheme(raw, FILE_SCHEME) {
            ArtRef::Local(file_url_to_path(raw))
        } else if has_scheme(raw, "http://") || has_scheme(raw, "https://") {
            ArtRef::Remote(raw.to_string())
        } else {
            ArtRef::Verbatim(raw.to_string())
        }
    }
}

/// Partial snapshot update produced from one metadata bag.
/// `None` means "leave the current value alone".
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetadataUpdate {
    pub title: Option<String>,
    pub artist: Option<String>,
    pub album_artist: Option<String>,
    pub album: Option<String>,
    pub art: Option<ArtRef>,
    pub length_secs: Option<f32>,
}

impl MetadataUpdate {
    /// Apply text and length fields. Art is left to the caller since remote
    /// art has to go through the cache first.
    pub fn apply(&self, snapshot: &mut Snapshot) {
        if let Some(title) = &self.title {
            snapshot.title = Some(title.clone());
        }
        if let Some(album) = &self.album {
            snapshot.album = Some(album.clone());
        }
        if let Some(artist) = &self.artist {
            snapshot.artist = Some(artist.clone());
        }
        let artist_empty = snapshot.artist.as_deref().is_none_or(str::is_empty);
        if artist_empty {
            if let Some(album_artist) = &self.album_artist {
                snapshot.artist = Some(album_artist.clone());
            }
        }
        if let Some(length) = self.length_secs {
            snapshot.length_secs = length;
        }
    }
}

/// Decode a metadata bag. Unknown keys are ignored.
pub fn normalize(bag: &MetadataBag) -> MetadataUpdate {
    let mut update = MetadataUpdate::default();

    for (key, value) in bag {
        match key.as_str() {
            KEY_ART_URL => match value {
                MetaValue::Str(raw) if !raw.is_empty() => update.art = Some(ArtRef::parse(raw)),
                MetaValue::Str(_) => {}
                other => malformed(key, other),
            },
            KEY_LENGTH => match micros_to_secs(value) {
                Some(secs) => update.length_secs = Some(secs),
                None => malformed(key, value),
            },
            KEY_ALBUM => match value {
                MetaValue::Str(s) => update.album = Some(s.clone()),
                other => malformed(key, other),
            },
            KEY_TITLE => match value {
                MetaValue::Str(s) => update.title = Some(s.clone()),
                other => malformed(key, other),
            },
            KEY_ARTIST => match join_artists(value) {
                Some(artist) => update.artist = Some(artist),
                None => malformed(key, value),
            },
            KEY_ALBUM_ARTIST => match join_artists(value) {
                Some(artist) => update.album_artist = Some(artist),
                None => malformed(key, value),
            },
            _ => {}
        }
    }

    // Empty artist values never overwrite
    update.artist = update.artist.filter(|a| !a.is_empty());
    update.album_artist = update.album_artist.filter(|a| !a.is_empty());
    update
}

/// MPRIS lengths and positions are microseconds.
pub fn micros_to_secs(value: &MetaValue) -> Option<f32> {
    let micros: u64 = match value {
        MetaValue::U64(u) => *u,
        MetaValue::I64(i) => u64::try_from(*i).ok()?,
        MetaValue::U32(u) => u64::from(*u),
        MetaValue::I32(i) => u64::try_from(*i).ok()?,
        _ => return None,
    };
    Some((micros as f64 / 1_000_000.0) as f32)
}

fn join_artists(value: &MetaValue) -> Option<String> {
    match value {
        MetaValue::Str(s) => Some(s.clone()),
        MetaValue::StrList(list) => Some(list.join(", ")),
        _ => None,
    }
}

/// URL schemes are case-insensitive.
fn has_scheme(raw: &str, scheme: &str) -> bool {
    raw.get(..scheme.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(scheme))
}

/// `file:///home/me/My%20Art.png` -> `/home/me/My Art.png`
fn file_url_to_path(url: &str) -> String {
    let rest = &url[FILE_SCHEME.len()..];
    // Skip an authority such as "localhost"
    let path = match rest.find('/') {
        Some(idx) => &rest[idx..],
        None => rest,
    };
    match urlencoding::decode(path) {
        Ok(decoded) => decoded.into_owned(),
        Err(_) => path.replace("%20", " "),
    }
}

fn malformed(key: &str, value: &MetaValue) {
    debug!("Skipping malformed metadata value for {}: {:?}", key, value);
}
