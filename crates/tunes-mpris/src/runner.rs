//! Connector loop: owns the player binding and publishes snapshots.
//!
//! One tick = (maybe) connect, then refresh from the bound player, then
//! publish. The caller sleeps for whatever [`Pause`] the tick returns.

use crate::art_cache::{ArtCache, ArtFetcher, HttpFetcher};
use crate::client::{MediaBus, PlayerHandle};
use crate::config::ConnectorConfig;
use crate::error::ConnectorError;
use crate::metadata::{self, ArtRef};
use crate::sources::{SourcePolicy, short_name};
use crate::types::Snapshot;
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::time::Instant;

/// Binding state of the loop
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LinkState {
    Unbound,
    /// Bound, but the player has not reported `Playing` yet
    BoundUnconfirmed,
    BoundConfirmed,
    /// Player vanished, holding off before the next attempt
    Backoff,
}

/// How long to wait before the next tick
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pause {
    /// Normal cadence, cut short by reconnect or shutdown requests
    Poll(Duration),
    /// Fixed hold-off, not interruptible
    Backoff(Duration),
}

/// Cross-thread requests into the loop.
#[derive(Debug, Default)]
pub struct Signals {
    reconnect: AtomicBool,
    shutdown: AtomicBool,
    wake: Notify,
}

impl Signals {
    pub fn request_reconnect(&self) {
        self.reconnect.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn request_shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    fn take_reconnect(&self) -> bool {
        self.reconnect.swap(false, Ordering::SeqCst)
    }

    /// Sleep, returning early if a request comes in.
    pub async fn sleep(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.wake.notified() => {}
        }
    }
}

/// The bus-backed connector state machine.
pub struct ConnectorLoop<B: MediaBus, F = HttpFetcher> {
    bus: B,
    config: ConnectorConfig,
    policy: SourcePolicy,
    art: Arc<Mutex<ArtCache<F>>>,
    signals: Arc<Signals>,
    publisher: watch::Sender<Snapshot>,
    player: Option<B::Player>,
    state: LinkState,
    last_attempt: Option<Instant>,
    backoff_until: Option<Instant>,
    snapshot: Snapshot,
    last_art: Option<ResolvedArt>,
}

/// Last remote art lookup, so a track's art is resolved once and not on
/// every tick.
#[derive(Clone, Debug)]
struct ResolvedArt {
    url: String,
    resolved: String,
    /// Set when the lookup fell back to the URL
    retry_at: Option<Instant>,
}

impl<B, F> ConnectorLoop<B, F>
where
    B: MediaBus,
    F: ArtFetcher + 'static,
{
    pub fn new(
        bus: B,
        config: ConnectorConfig,
        art: ArtCache<F>,
        signals: Arc<Signals>,
        publisher: watch::Sender<Snapshot>,
    ) -> Self {
        Self {
            bus,
            policy: SourcePolicy::from_config(&config),
            config,
            art: Arc::new(Mutex::new(art)),
            signals,
            publisher,
            player: None,
            state: LinkState::Unbound,
            last_attempt: None,
            backoff_until: None,
            snapshot: Snapshot::default(),
            last_art: None,
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    /// Tick until shutdown is requested.
    pub async fn run(mut self) {
        info!("MPRIS connector loop started");
        while !self.signals.is_shutdown() {
            match self.tick().await {
                Pause::Poll(duration) => self.signals.sleep(duration).await,
                Pause::Backoff(duration) => tokio::time::sleep(duration).await,
            }
        }
        self.unbind();
        self.snapshot = self.snapshot.disconnected();
        self.publish();
        info!("MPRIS connector loop stopped");
    }

    /// One decision point. Never fails; errors become state changes.
    pub async fn tick(&mut self) -> Pause {
        let now = Instant::now();

        if let Some(until) = self.backoff_until {
            if now < until {
                return Pause::Backoff(until - now);
            }
            self.backoff_until = None;
            self.set_state(LinkState::Unbound);
        }

        let forced = self.signals.take_reconnect();
        if forced {
            info!("Reconnect requested");
            self.unbind();
            self.snapshot = self.snapshot.disconnected();
            self.set_state(LinkState::Unbound);
        }

        let mut status_ok = true;
        if self.player.is_none() {
            let throttled = self
                .last_attempt
                .is_some_and(|last| now.duration_since(last) < self.config.reconnect_throttle);
            if forced || !throttled {
                self.last_attempt = Some(now);
                match self.connect().await {
                    Ok(ok) => status_ok = ok,
                    Err(e) => return self.handle_error(e),
                }
            } else {
                debug!("Connection attempt throttled");
            }
        }

        if self.player.is_some() && status_ok {
            if let Err(e) = self.refresh().await {
                return self.handle_error(e);
            }
        }

        self.publish();
        Pause::Poll(self.poll_interval())
    }

    /// Select and bind a player. `Ok(false)` means bound but the status
    /// check failed, so refreshing waits for the next tick.
    async fn connect(&mut self) -> Result<bool, ConnectorError> {
        let services = self.bus.list_services().await?;
        let Some(service) = self.policy.select(&services).map(str::to_string) else {
            debug!("No MPRIS players on the bus");
            return Ok(true);
        };

        info!("Connecting to player: {}", service);
        let player = self.bus.bind(&service).await?;
        let status = player.playback_status().await;
        self.player = Some(player);

        match status {
            Ok(status) if status.is_playing() => {
                self.set_state(LinkState::BoundConfirmed);
                Ok(true)
            }
            Ok(_) => {
                self.set_state(LinkState::BoundUnconfirmed);
                Ok(true)
            }
            Err(e) if e.is_vanished() => Err(e),
            Err(e) => {
                debug!("Status check on {} failed: {}", service, e);
                self.set_state(LinkState::BoundUnconfirmed);
                Ok(false)
            }
        }
    }

    /// Query the bound player and rebuild the working snapshot.
    async fn refresh(&mut self) -> Result<(), ConnectorError> {
        let Some(player) = self.player.as_ref() else {
            return Ok(());
        };

        let position_us = player.position_micros().await?;
        let status = player.playback_status().await?;
        let bag = player.metadata().await?;

        if status.is_playing() && self.state == LinkState::BoundUnconfirmed {
            self.set_state(LinkState::BoundConfirmed);
        }

        let mut next = self.snapshot.clone();
        next.position_secs = (position_us.max(0) as f64 / 1_000_000.0) as f32;
        next.is_playing = status.is_playing();
        next.is_connected = self.state == LinkState::BoundConfirmed;

        let mut update = metadata::normalize(&bag);
        update.apply(&mut next);
        if let Some(art) = update.art.take() {
            next.album_art = Some(self.resolve_art(art).await);
        }

        debug!(
            "Fetched state: title={:?}, playing={}, pos={:.1}s",
            next.title, next.is_playing, next.position_secs
        );
        self.snapshot = next;
        Ok(())
    }

    async fn resolve_art(&mut self, art: ArtRef) -> String {
        let url = match art {
            ArtRef::Remote(url) => url,
            ArtRef::Local(path) => return path,
            ArtRef::Verbatim(raw) => return raw,
        };

        if let Some(last) = self.last_art.as_ref().filter(|last| last.url == url) {
            match last.retry_at {
                Some(retry_at) if Instant::now() < retry_at => return last.resolved.clone(),
                Some(_) => {}
                None if Path::new(&last.resolved).is_file() => return last.resolved.clone(),
                None => {}
            }
        }

        // Downloads block, keep them off the async thread.
        let cache = Arc::clone(&self.art);
        let task_url = url.clone();
        let resolved = tokio::task::spawn_blocking(move || {
            let mut cache = cache.lock().unwrap_or_else(|poisoned| {
                warn!("Album art cache lock was poisoned, recovering");
                poisoned.into_inner()
            });
            cache.resolve(&task_url)
        })
        .await
        .unwrap_or_else(|e| {
            warn!("Album art task failed: {}", e);
            url.clone()
        });

        let retry_at = (resolved == url).then(|| Instant::now() + self.config.reconnect_throttle);
        if retry_at.is_some() {
            debug!("Album art unavailable, next try in {:?}", self.config.reconnect_throttle);
        }
        self.last_art = Some(ResolvedArt {
            url,
            resolved: resolved.clone(),
            retry_at,
        });
        resolved
    }

    fn handle_error(&mut self, err: ConnectorError) -> Pause {
        self.unbind();
        self.snapshot = self.snapshot.disconnected();

        if err.is_vanished() {
            let backoff = self.config.vanished_backoff;
            warn!("Player vanished ({}), retrying in {:?}", err, backoff);
            self.backoff_until = Some(Instant::now() + backoff);
            self.set_state(LinkState::Backoff);
            self.publish();
            return Pause::Backoff(backoff);
        }

        warn!("Failed to update MPRIS status: {}", err);
        if self.config.fail_fast {
            error!("Aborting on unexpected connector error (fail_fast)");
            std::process::abort();
        }
        self.set_state(LinkState::Unbound);
        self.publish();
        Pause::Poll(self.config.poll_interval_idle)
    }

    fn unbind(&mut self) {
        if let Some(player) = self.player.take() {
            info!("Unbinding from player: {}", short_name(player.service()));
        }
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!("Connector state {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn poll_interval(&self) -> Duration {
        if self.snapshot.is_playing {
            self.config.poll_interval_playing
        } else {
            self.config.poll_interval_idle
        }
    }

    fn publish(&mut self) {
        if !self.snapshot.is_connected {
            self.snapshot.is_playing = false;
        }
        self.publisher.send_replace(self.snapshot.clone());
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::error::ArtError;
    use crate::metadata::{KEY_ARTIST, KEY_ART_URL, KEY_LENGTH, KEY_TITLE};
    use crate::types::{MetaValue, MetadataBag, PlaybackStatus};
    use std::collections::HashMap;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Copy, Debug, PartialEq)]
    pub(crate) enum Failure {
        Vanished,
        Bus,
    }

    #[derive(Default)]
    pub(crate) struct FakePlayerState {
        pub status: PlaybackStatus,
        pub position_us: i64,
        pub metadata: MetadataBag,
        pub failure: Option<Failure>,
    }

    #[derive(Default)]
    pub(crate) struct FakeBusState {
        pub services: Vec<String>,
        pub players: HashMap<String, FakePlayerState>,
        pub list_calls: usize,
        pub bound: Vec<String>,
    }

    /// Scripted in-memory bus
    #[derive(Clone, Default)]
    pub(crate) struct FakeBus {
        pub inner: Arc<Mutex<FakeBusState>>,
    }

    impl FakeBus {
        pub fn add_player(&self, service: &str, status: PlaybackStatus) {
            let mut inner = self.inner.lock().unwrap();
            inner.services.push(service.to_string());
            inner.players.insert(
                service.to_string(),
                FakePlayerState {
                    status,
                    ..Default::default()
                },
            );
        }

        pub fn with_player<R>(&self, service: &str, f: impl FnOnce(&mut FakePlayerState) -> R) -> R {
            let mut inner = self.inner.lock().unwrap();
            f(inner.players.get_mut(service).unwrap())
        }

        pub fn list_calls(&self) -> usize {
            self.inner.lock().unwrap().list_calls
        }

        pub fn bound(&self) -> Vec<String> {
            self.inner.lock().unwrap().bound.clone()
        }
    }

    pub(crate) struct FakePlayer {
        service: String,
        inner: Arc<Mutex<FakeBusState>>,
    }

    impl FakePlayer {
        fn query<T>(&self, f: impl FnOnce(&FakePlayerState) -> T) -> Result<T, ConnectorError> {
            let inner = self.inner.lock().unwrap();
            let Some(player) = inner.players.get(&self.service) else {
                return Err(ConnectorError::ServiceVanished(self.service.clone()));
            };
            match player.failure {
                Some(Failure::Vanished) => Err(ConnectorError::ServiceVanished(self.service.clone())),
                Some(Failure::Bus) => Err(ConnectorError::Bus("timeout".to_string())),
                None => Ok(f(player)),
            }
        }
    }

    impl MediaBus for FakeBus {
        type Player = FakePlayer;

        async fn list_services(&self) -> Result<Vec<String>, ConnectorError> {
            let mut inner = self.inner.lock().unwrap();
            inner.list_calls += 1;
            Ok(inner.services.clone())
        }

        async fn bind(&self, service: &str) -> Result<FakePlayer, ConnectorError> {
            self.inner.lock().unwrap().bound.push(service.to_string());
            Ok(FakePlayer {
                service: service.to_string(),
                inner: Arc::clone(&self.inner),
            })
        }
    }

    impl PlayerHandle for FakePlayer {
        fn service(&self) -> &str {
            &self.service
        }

        async fn playback_status(&self) -> Result<PlaybackStatus, ConnectorError> {
            self.query(|p| p.status)
        }

        async fn position_micros(&self) -> Result<i64, ConnectorError> {
            self.query(|p| p.position_us)
        }

        async fn metadata(&self) -> Result<MetadataBag, ConnectorError> {
            self.query(|p| p.metadata.clone())
        }
    }

    /// Serves a tiny jpeg, or always fails when `failing` is set.
    #[derive(Clone, Default)]
    pub(crate) struct StaticFetcher {
        calls: Arc<AtomicUsize>,
        failing: bool,
    }

    impl StaticFetcher {
        fn failing() -> Self {
            Self {
                failing: true,
                ..Default::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ArtFetcher for StaticFetcher {
        fn fetch(&self, _url: &str) -> Result<Vec<u8>, ArtError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failing {
                return Err(ArtError::Download("503 Service Unavailable".to_string()));
            }
            Ok(vec![0xFF, 0xD8, 0xFF])
        }
    }

    const SPOTIFY: &str = "org.mpris.MediaPlayer2.spotify";
    const VLC: &str = "org.mpris.MediaPlayer2.vlc";
    const FIREFOX: &str = "org.mpris.MediaPlayer2.firefox";

    struct Harness {
        bus: FakeBus,
        signals: Arc<Signals>,
        state: watch::Receiver<Snapshot>,
        runner: ConnectorLoop<FakeBus, StaticFetcher>,
        _tmp: tempfile::TempDir,
    }

    fn harness() -> Harness {
        harness_with(StaticFetcher::default())
    }

    fn harness_with(fetcher: StaticFetcher) -> Harness {
        let tmp = tempfile::tempdir().unwrap();
        let bus = FakeBus::default();
        let signals = Arc::new(Signals::default());
        let (tx, rx) = watch::channel(Snapshot::default());
        let art = ArtCache::open(tmp.path().join("art"), 100, fetcher);
        let runner = ConnectorLoop::new(
            bus.clone(),
            ConnectorConfig::default(),
            art,
            Arc::clone(&signals),
            tx,
        );
        Harness {
            bus,
            signals,
            state: rx,
            runner,
            _tmp: tmp,
        }
    }

    fn snapshot(h: &Harness) -> Snapshot {
        h.state.borrow().clone()
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_bus_stays_unbound_without_backoff() {
        let mut h = harness();

        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_secs(2)));
        assert_eq!(h.runner.state(), LinkState::Unbound);
        assert_eq!(h.bus.list_calls(), 1);

        // Throttled until the attempt interval has passed
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_secs(2)));
        assert_eq!(h.bus.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(8)).await;
        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_secs(2)));
        assert_eq!(h.bus.list_calls(), 2);
        assert_eq!(h.runner.state(), LinkState::Unbound);
        assert!(!snapshot(&h).is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_playing_player_is_confirmed_and_published() {
        let mut h = harness();
        h.bus.add_player(FIREFOX, PlaybackStatus::Playing);
        h.bus.add_player(SPOTIFY, PlaybackStatus::Playing);
        h.bus.with_player(SPOTIFY, |p| {
            p.position_us = 42_500_000;
            p.metadata = [
                (KEY_TITLE, MetaValue::Str("Song".to_string())),
                (KEY_ARTIST, MetaValue::StrList(vec!["A".to_string(), "B".to_string()])),
                (KEY_LENGTH, MetaValue::U64(185_000_000)),
                (KEY_ART_URL, MetaValue::Str("file:///tmp/cover%201.png".to_string())),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
        });

        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_millis(500)));
        assert_eq!(h.runner.state(), LinkState::BoundConfirmed);
        assert_eq!(h.bus.bound(), vec![SPOTIFY.to_string()]);

        let snap = snapshot(&h);
        assert!(snap.is_connected);
        assert!(snap.is_playing);
        assert_eq!(snap.title.as_deref(), Some("Song"));
        assert_eq!(snap.artist.as_deref(), Some("A, B"));
        assert_eq!(snap.length_secs, 185.0);
        assert_eq!(snap.position_secs, 42.5);
        assert_eq!(snap.album_art.as_deref(), Some("/tmp/cover 1.png"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_paused_player_is_unconfirmed_until_playing() {
        let mut h = harness();
        h.bus.add_player(VLC, PlaybackStatus::Paused);

        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_secs(2)));
        assert_eq!(h.runner.state(), LinkState::BoundUnconfirmed);
        let snap = snapshot(&h);
        assert!(!snap.is_connected);
        assert!(!snap.is_playing);

        h.bus.with_player(VLC, |p| p.status = PlaybackStatus::Playing);
        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_millis(500)));
        assert_eq!(h.runner.state(), LinkState::BoundConfirmed);
        assert!(snapshot(&h).is_connected);

        // Pausing keeps the confirmed binding
        h.bus.with_player(VLC, |p| p.status = PlaybackStatus::Paused);
        h.runner.tick().await;
        let snap = snapshot(&h);
        assert!(snap.is_connected);
        assert!(!snap.is_playing);
        assert_eq!(h.bus.list_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_status_check_binds_unconfirmed() {
        let mut h = harness();
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        h.bus.with_player(VLC, |p| p.failure = Some(Failure::Bus));

        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_secs(2)));
        assert_eq!(h.runner.state(), LinkState::BoundUnconfirmed);

        h.bus.with_player(VLC, |p| p.failure = None);
        h.runner.tick().await;
        assert_eq!(h.runner.state(), LinkState::BoundConfirmed);
        assert_eq!(h.bus.bound().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_player_backs_off() {
        let mut h = harness();
        h.bus.add_player(SPOTIFY, PlaybackStatus::Playing);
        h.runner.tick().await;
        assert!(snapshot(&h).is_playing);

        h.bus.with_player(SPOTIFY, |p| p.failure = Some(Failure::Vanished));
        assert_eq!(h.runner.tick().await, Pause::Backoff(Duration::from_secs(5)));
        assert_eq!(h.runner.state(), LinkState::Backoff);
        let snap = snapshot(&h);
        assert!(!snap.is_connected);
        assert!(!snap.is_playing);

        // Reconnect during the hold-off waits for it to elapse.
        h.bus.with_player(SPOTIFY, |p| p.failure = None);
        h.signals.request_reconnect();
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(h.runner.tick().await, Pause::Backoff(Duration::from_secs(4)));
        assert_eq!(h.bus.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(4)).await;
        h.runner.tick().await;
        assert_eq!(h.bus.list_calls(), 2);
        assert_eq!(h.runner.state(), LinkState::BoundConfirmed);
        assert!(snapshot(&h).is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_without_reconnect_still_throttled() {
        let mut h = harness();
        h.bus.add_player(SPOTIFY, PlaybackStatus::Playing);
        h.runner.tick().await;

        h.bus.with_player(SPOTIFY, |p| p.failure = Some(Failure::Vanished));
        h.runner.tick().await;
        h.bus.with_player(SPOTIFY, |p| p.failure = None);

        tokio::time::advance(Duration::from_secs(5)).await;
        h.runner.tick().await;
        assert_eq!(h.runner.state(), LinkState::Unbound);
        assert_eq!(h.bus.list_calls(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        h.runner.tick().await;
        assert_eq!(h.bus.list_calls(), 2);
        assert_eq!(h.runner.state(), LinkState::BoundConfirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_generic_error_uses_normal_cadence() {
        // Unlike a vanished player, a failed query gets no special hold-off.
        let mut h = harness();
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        h.runner.tick().await;
        assert!(snapshot(&h).is_playing);

        h.bus.with_player(VLC, |p| p.failure = Some(Failure::Bus));
        assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_secs(2)));
        assert_eq!(h.runner.state(), LinkState::Unbound);
        let snap = snapshot(&h);
        assert!(!snap.is_connected);
        assert!(!snap.is_playing);

        // An explicit reconnect goes straight through.
        h.bus.with_player(VLC, |p| p.failure = None);
        h.signals.request_reconnect();
        h.runner.tick().await;
        assert_eq!(h.bus.list_calls(), 2);
        assert_eq!(h.runner.state(), LinkState::BoundConfirmed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_rebinds_and_bypasses_throttle_once() {
        let mut h = harness();
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        h.runner.tick().await;

        // A preferred player shows up; only a reconnect re-runs selection.
        h.bus.add_player(SPOTIFY, PlaybackStatus::Playing);
        h.runner.tick().await;
        assert_eq!(h.bus.bound(), vec![VLC.to_string()]);

        h.signals.request_reconnect();
        h.runner.tick().await;
        assert_eq!(h.bus.bound(), vec![VLC.to_string(), SPOTIFY.to_string()]);

        // Bypass was used up: losing the player now waits for the throttle.
        h.bus.with_player(SPOTIFY, |p| p.failure = Some(Failure::Bus));
        h.runner.tick().await;
        h.runner.tick().await;
        assert_eq!(h.bus.list_calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_art_goes_through_cache() {
        let mut h = harness();
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        let url = "https://example.com/covers/1.png";
        h.bus.with_player(VLC, |p| {
            p.metadata.insert(KEY_ART_URL.to_string(), MetaValue::Str(url.to_string()));
        });

        h.runner.tick().await;
        let art = snapshot(&h).album_art.unwrap();
        assert!(art.ends_with(".png"));
        assert_ne!(art, url);
        assert!(std::path::Path::new(&art).is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_exits_on_shutdown() {
        let h = harness();
        h.signals.request_shutdown();
        h.runner.run().await;
        assert!(!h.state.borrow().is_connected);
    }

    fn with_remote_art(h: &Harness, service: &str, url: &str) {
        h.bus.with_player(service, |p| {
            p.metadata
                .insert(KEY_ART_URL.to_string(), MetaValue::Str(url.to_string()));
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_art_not_refetched_every_tick() {
        let fetcher = StaticFetcher::failing();
        let mut h = harness_with(fetcher.clone());
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        let url = "https://example.com/a.png";
        with_remote_art(&h, VLC, url);

        // 20 ticks at the playing cadence: 10 s of playback
        for _ in 0..20 {
            assert_eq!(h.runner.tick().await, Pause::Poll(Duration::from_millis(500)));
            assert_eq!(snapshot(&h).album_art.as_deref(), Some(url));
            tokio::time::advance(Duration::from_millis(500)).await;
        }
        assert_eq!(fetcher.calls(), 1);

        // Past the retry gap one more attempt is made.
        h.runner.tick().await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_art_url_is_tried_immediately() {
        let fetcher = StaticFetcher::failing();
        let mut h = harness_with(fetcher.clone());
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        with_remote_art(&h, VLC, "https://example.com/a.png");
        h.runner.tick().await;

        with_remote_art(&h, VLC, "https://example.com/b.png");
        h.runner.tick().await;
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolved_art_is_reused_across_ticks() {
        let fetcher = StaticFetcher::default();
        let mut h = harness_with(fetcher.clone());
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        with_remote_art(&h, VLC, "https://example.com/a.png");

        h.runner.tick().await;
        let art = snapshot(&h).album_art.unwrap();
        h.runner.tick().await;
        assert_eq!(snapshot(&h).album_art.as_deref(), Some(art.as_str()));

        // Removed behind our back: fetched again
        std::fs::remove_file(&art).unwrap();
        h.runner.tick().await;
        assert_eq!(fetcher.calls(), 2);
        assert!(std::path::Path::new(&art).is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poisoned_art_lock_recovers() {
        let mut h = harness();
        h.bus.add_player(VLC, PlaybackStatus::Playing);
        with_remote_art(&h, VLC, "https://example.com/a.png");

        let art = Arc::clone(&h.runner.art);
        let _ = std::thread::spawn(move || {
            let _guard = art.lock().unwrap();
            panic!("poison the art cache lock");
        })
        .join();
        assert!(h.runner.art.is_poisoned());

        h.runner.tick().await;
        let resolved = snapshot(&h).album_art.unwrap();
        assert!(resolved.ends_with(".png"));
        assert!(std::path::Path::new(&resolved).is_file());
    }

    #[tokio::test(start_paused = true)]
    async fn test_vanished_on_first_status_read_backs_off() {
        let mut h = harness();
        h.bus.add_player(SPOTIFY, PlaybackStatus::Playing);
        h.bus.with_player(SPOTIFY, |p| p.failure = Some(Failure::Vanished));

        assert_eq!(h.runner.tick().await, Pause::Backoff(Duration::from_secs(5)));
        assert_eq!(h.runner.state(), LinkState::Backoff);
        assert_eq!(h.bus.bound(), vec![SPOTIFY.to_string()]);
        assert!(!snapshot(&h).is_connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconnect_cuts_poll_sleep_short() {
        let h = harness();
        let signals = Arc::clone(&h.signals);
        let bus = h.bus.clone();

        let trigger = async {
            tokio::time::sleep(Duration::from_secs(1)).await;
            assert_eq!(bus.list_calls(), 1);
            signals.request_reconnect();
            tokio::time::sleep(Duration::from_millis(10)).await;
            // Idle sleep is 2 s, so only a woken loop has tried again.
            assert_eq!(bus.list_calls(), 2);
            signals.request_shutdown();
        };
        tokio::join!(h.runner.run(), trigger);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cuts_poll_sleep_short() {
        let h = harness();
        let signals = Arc::clone(&h.signals);
        let start = Instant::now();

        let trigger = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            signals.request_shutdown();
        };
        tokio::join!(h.runner.run(), trigger);

        assert!(start.elapsed() < Duration::from_secs(2));
        assert_eq!(h.bus.list_calls(), 1);
    }
}
