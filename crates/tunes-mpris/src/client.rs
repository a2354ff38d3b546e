//! Session bus client.
//!
//! A thin, retry-free transport: list the advertised MPRIS services, bind a
//! proxy to one of them and read its properties. Policy lives in the
//! connector loop.

use crate::error::ConnectorError;
use crate::sources::MPRIS_PREFIX;
use crate::types::{MetaValue, MetadataBag, PlaybackStatus};
use std::collections::HashMap;
use std::future::Future;
use std::ops::Deref;
use zbus::Connection;
use zbus::zvariant::{OwnedValue, Value};

/// D-Bus proxy for MPRIS player interface
#[zbus::proxy(
    interface = "org.mpris.MediaPlayer2.Player",
    default_path = "/org/mpris/MediaPlayer2"
)]
trait MprisPlayer {
    #[zbus(property)]
    fn metadata(&self) -> zbus::Result<HashMap<String, OwnedValue>>;

    #[zbus(property)]
    fn playback_status(&self) -> zbus::Result<String>;

    #[zbus(property(emits_changed_signal = "false"))]
    fn position(&self) -> zbus::Result<i64>;
}

/// Service discovery and binding.
pub trait MediaBus {
    type Player: PlayerHandle;

    /// Advertised MPRIS service names, in bus order.
    fn list_services(&self) -> impl Future<Output = Result<Vec<String>, ConnectorError>> + Send;

    fn bind(
        &self,
        service: &str,
    ) -> impl Future<Output = Result<Self::Player, ConnectorError>> + Send;
}

/// Property queries on a bound player.
pub trait PlayerHandle {
    fn service(&self) -> &str;

    fn playback_status(
        &self,
    ) -> impl Future<Output = Result<PlaybackStatus, ConnectorError>> + Send;

    fn position_micros(&self) -> impl Future<Output = Result<i64, ConnectorError>> + Send;

    fn metadata(&self) -> impl Future<Output = Result<MetadataBag, ConnectorError>> + Send;
}

/// The live session bus connection.
pub struct SessionBus {
    connection: Connection,
}

impl SessionBus {
    pub async fn connect() -> Result<Self, ConnectorError> {
        let connection = Connection::session()
            .await
            .map_err(ConnectorError::Connection)?;
        Ok(Self { connection })
    }
}

impl MediaBus for SessionBus {
    type Player = BoundPlayer;

    async fn list_services(&self) -> Result<Vec<String>, ConnectorError> {
        let dbus_proxy = zbus::fdo::DBusProxy::new(&self.connection).await?;
        let names = dbus_proxy.list_names().await?;

        Ok(names
            .iter()
            .filter(|n| n.starts_with(MPRIS_PREFIX))
            .map(|n| n.to_string())
            .collect())
    }

    async fn bind(&self, service: &str) -> Result<BoundPlayer, ConnectorError> {
        // Polling reads every property fresh, so skip the proxy's cache.
        let proxy = MprisPlayerProxy::builder(&self.connection)
            .destination(service.to_string())?
            .cache_properties(zbus::proxy::CacheProperties::No)
            .build()
            .await?;

        Ok(BoundPlayer {
            service: service.to_string(),
            proxy,
        })
    }
}

/// A player bound on the session bus.
pub struct BoundPlayer {
    service: String,
    proxy: MprisPlayerProxy<'static>,
}

impl PlayerHandle for BoundPlayer {
    fn service(&self) -> &str {
        &self.service
    }

    async fn playback_status(&self) -> Result<PlaybackStatus, ConnectorError> {
        let status = self.proxy.playback_status().await?;
        Ok(PlaybackStatus::from_str(&status))
    }

    async fn position_micros(&self) -> Result<i64, ConnectorError> {
        Ok(self.proxy.position().await?)
    }

    async fn metadata(&self) -> Result<MetadataBag, ConnectorError> {
        let raw = self.proxy.metadata().await?;
        Ok(raw
            .iter()
            .map(|(key, value)| (key.clone(), to_meta_value(value.deref())))
            .collect())
    }
}

/// Decode a variant into the loosely typed metadata value.
fn to_meta_value(value: &Value<'_>) -> MetaValue {
    match value {
        Value::Str(s) => MetaValue::Str(s.to_string()),
        Value::ObjectPath(p) => MetaValue::Str(p.to_string()),
        Value::I64(i) => MetaValue::I64(*i),
        Value::U64(u) => MetaValue::U64(*u),
        Value::I32(i) => MetaValue::I32(*i),
        Value::U32(u) => MetaValue::U32(*u),
        Value::F64(f) => MetaValue::F64(*f),
        Value::Bool(b) => MetaValue::Bool(*b),
        Value::Value(inner) => to_meta_value(inner),
        Value::Array(arr) => {
            let strings: Option<Vec<String>> = arr
                .iter()
                .map(|item| match item {
                    Value::Str(s) => Some(s.to_string()),
                    _ => None,
                })
                .collect();
            strings.map_or(MetaValue::Other, MetaValue::StrList)
        }
        _ => MetaValue::Other,
    }
}
