//! tunes-mpris - polling MPRIS connector
//!
//! Features:
//! - Single session bus connection, one background loop
//! - Deterministic player selection (preferred app, then non-browsers)
//! - Lenient metadata decoding
//! - Content-addressed album art cache with bounded size
//! - Non-blocking snapshot reads for any number of consumers

pub mod art_cache;
pub mod client;
pub mod config;
pub mod connector;
pub mod error;
pub mod metadata;
pub mod runner;
pub mod sources;
pub mod types;

pub use art_cache::{ArtCache, ArtFetcher, HttpFetcher};
pub use client::{MediaBus, PlayerHandle, SessionBus};
pub use config::ConnectorConfig;
pub use connector::{
    ConnectorKind, DummyConnector, MprisConnector, MusicConnector, create_connector,
};
pub use error::{ArtError, ConnectorError};
pub use runner::{ConnectorLoop, LinkState, Pause, Signals};
pub use sources::SourcePolicy;
pub use types::{MetaValue, MetadataBag, PlaybackStatus, Snapshot};
