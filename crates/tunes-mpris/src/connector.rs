//! Connector contract and its two implementations.
//!
//! Consumers hold a `Box<dyn MusicConnector>` and never care whether the
//! data comes from the session bus or is made up.

use crate::art_cache::{ArtCache, HttpFetcher};
use crate::client::SessionBus;
use crate::config::ConnectorConfig;
use crate::runner::{ConnectorLoop, Signals};
use crate::types::Snapshot;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// What a consumer can do with a connector.
pub trait MusicConnector: Send + Sync {
    /// Most recently published snapshot. Never blocks on the loop.
    fn get_state(&self) -> Snapshot;

    /// Ask the loop to drop its binding and reconnect at the next tick.
    fn reconnect(&self);

    /// Ask the background thread to stop.
    fn shutdown(&self);
}

/// Which connector to create.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectorKind {
    #[default]
    Mpris,
    Dummy,
}

/// Create the connector for `kind` and start its background thread.
pub fn create_connector(
    kind: ConnectorKind,
    config: &ConnectorConfig,
) -> io::Result<Box<dyn MusicConnector>> {
    Ok(match kind {
        ConnectorKind::Mpris => Box::new(MprisConnector::start(config.clone())?),
        ConnectorKind::Dummy => Box::new(DummyConnector::start(DUMMY_TICK)?),
    })
}

/// Handle shared by both connectors: a snapshot receiver plus loop signals.
struct Handle {
    state: watch::Receiver<Snapshot>,
    signals: Arc<Signals>,
}

impl Handle {
    fn new() -> (Self, watch::Sender<Snapshot>) {
        let (tx, rx) = watch::channel(Snapshot::default());
        let handle = Self {
            state: rx,
            signals: Arc::new(Signals::default()),
        };
        (handle, tx)
    }

    fn get_state(&self) -> Snapshot {
        self.state.borrow().clone()
    }
}

/// Bus-backed connector running on its own thread.
pub struct MprisConnector {
    handle: Handle,
}

impl MprisConnector {
    pub fn start(config: ConnectorConfig) -> io::Result<Self> {
        let (handle, publisher) = Handle::new();
        let signals = Arc::clone(&handle.signals);

        std::thread::Builder::new()
            .name("mpris-connector".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        error!("Failed to create tokio runtime for MPRIS: {}", e);
                        return;
                    }
                };
                rt.block_on(run_connector(config, signals, publisher));
            })?;

        Ok(Self { handle })
    }
}

impl MusicConnector for MprisConnector {
    fn get_state(&self) -> Snapshot {
        self.handle.get_state()
    }

    fn reconnect(&self) {
        self.handle.signals.request_reconnect();
    }

    fn shutdown(&self) {
        self.handle.signals.request_shutdown();
    }
}

impl Drop for MprisConnector {
    fn drop(&mut self) {
        self.handle.signals.request_shutdown();
    }
}

/// Connect to the session bus (retrying forever) and hand over to the loop.
async fn run_connector(
    config: ConnectorConfig,
    signals: Arc<Signals>,
    publisher: watch::Sender<Snapshot>,
) {
    let bus = loop {
        if signals.is_shutdown() {
            return;
        }
        match SessionBus::connect().await {
            Ok(bus) => break bus,
            Err(e) => {
                warn!("{}. Retrying in {:?}...", e, config.connect_retry);
                publisher.send_modify(|s| *s = s.disconnected());
                signals.sleep(config.connect_retry).await;
            }
        }
    };
    info!("Connected to session bus");

    let art = ArtCache::open(
        config.art_cache_dir(),
        config.art_cache_capacity,
        HttpFetcher::new(),
    );
    ConnectorLoop::new(bus, config, art, signals, publisher)
        .run()
        .await;
}

const DUMMY_TICK: Duration = Duration::from_secs(1);

/// Synthetic always-playing source, for demos and wiring tests.
pub struct DummyConnector {
    handle: Handle,
}

impl DummyConnector {
    pub fn start(tick: Duration) -> io::Result<Self> {
        let (handle, publisher) = Handle::new();
        let signals = Arc::clone(&handle.signals);
        let started = Instant::now();

        std::thread::Builder::new()
            .name("dummy-connector".to_string())
            .spawn(move || {
                while !signals.is_shutdown() {
                    publisher.send_replace(synthetic_snapshot(started.elapsed()));
                    std::thread::sleep(tick);
                }
            })?;

        Ok(Self { handle })
    }
}

impl MusicConnector for DummyConnector {
    fn get_state(&self) -> Snapshot {
        self.handle.get_state()
    }

    fn reconnect(&self) {}

    fn shutdown(&self) {
        self.handle.signals.request_shutdown();
    }
}

impl Drop for DummyConnector {
    fn drop(&mut self) {
        self.handle.signals.request_shutdown();
    }
}

/// Fake "now playing" after `elapsed` of uptime.
pub fn synthetic_snapshot(elapsed: Duration) -> Snapshot {
    Snapshot {
        title: Some("Title".to_string()),
        artist: Some("Artist".to_string()),
        is_playing: true,
        is_connected: true,
        position_secs: elapsed.as_secs_f32(),
        ..Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::tests::FakeBus;
    use crate::types::PlaybackStatus;

    #[test]
    fn test_synthetic_snapshot_advances() {
        let a = synthetic_snapshot(Duration::from_millis(1500));
        let b = synthetic_snapshot(Duration::from_millis(2500));
        assert!(a.is_playing && a.is_connected);
        assert_eq!(a.position_secs, 1.5);
        assert!(b.position_secs > a.position_secs);
    }

    #[test]
    fn test_dummy_connector_publishes() {
        let connector = DummyConnector::start(Duration::from_millis(10)).unwrap();
        std::thread::sleep(Duration::from_millis(50));
        let first = connector.get_state();
        assert_eq!(first.title.as_deref(), Some("Title"));

        connector.reconnect();
        std::thread::sleep(Duration::from_millis(50));
        assert!(connector.get_state().position_secs > first.position_secs);
        connector.shutdown();
    }

    #[test]
    fn test_connector_kind_names() {
        let kind: ConnectorKind = serde_json::from_str(r#""dummy""#).unwrap();
        assert_eq!(kind, ConnectorKind::Dummy);
        assert_eq!(ConnectorKind::default(), ConnectorKind::Mpris);
    }

    #[tokio::test(start_paused = true)]
    async fn test_contract_over_loop() {
        let tmp = tempfile::tempdir().unwrap();
        let (handle, publisher) = Handle::new();
        let bus = FakeBus::default();
        bus.add_player("org.mpris.MediaPlayer2.vlc", PlaybackStatus::Playing);

        let art = ArtCache::open(tmp.path().join("art"), 100, HttpFetcher::new());
        let mut runner = ConnectorLoop::new(
            bus.clone(),
            ConnectorConfig::default(),
            art,
            Arc::clone(&handle.signals),
            publisher,
        );
        let connector = MprisConnector { handle };

        assert_eq!(connector.get_state(), Snapshot::default());
        runner.tick().await;
        assert!(connector.get_state().is_playing);

        // Idempotent, and honoured at the next tick despite the throttle
        connector.reconnect();
        connector.reconnect();
        runner.tick().await;
        runner.tick().await;
        assert_eq!(bus.list_calls(), 2);
        assert!(connector.get_state().is_connected);
    }
}
