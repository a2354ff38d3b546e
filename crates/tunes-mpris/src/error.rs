//! Error types for tunes-mpris

const SERVICE_UNKNOWN: &str = "org.freedesktop.DBus.Error.ServiceUnknown";
const NAME_HAS_NO_OWNER: &str = "org.freedesktop.DBus.Error.NameHasNoOwner";

/// Session bus and player query errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The session bus itself could not be reached.
    #[error("Cannot connect to session bus: {0}")]
    Connection(#[source] zbus::Error),

    /// The bound player left the bus.
    #[error("Service no longer present: {0}")]
    ServiceVanished(String),

    #[error("D-Bus error: {0}")]
    Bus(String),

    /// A reply arrived but did not have the expected shape.
    #[error("Malformed reply: {0}")]
    Protocol(String),
}

impl ConnectorError {
    pub fn is_vanished(&self) -> bool {
        matches!(self, ConnectorError::ServiceVanished(_))
    }
}

impl From<zbus::Error> for ConnectorError {
    fn from(err: zbus::Error) -> Self {
        match err {
            zbus::Error::MethodError(name, detail, _)
                if name.as_str() == SERVICE_UNKNOWN || name.as_str() == NAME_HAS_NO_OWNER =>
            {
                ConnectorError::ServiceVanished(detail.unwrap_or_else(|| name.to_string()))
            }
            zbus::Error::FDO(fdo) => ConnectorError::from(*fdo),
            zbus::Error::Variant(e) => ConnectorError::Protocol(e.to_string()),
            zbus::Error::InvalidReply => ConnectorError::Protocol("invalid reply".to_string()),
            other => ConnectorError::Bus(other.to_string()),
        }
    }
}

impl From<zbus::fdo::Error> for ConnectorError {
    fn from(err: zbus::fdo::Error) -> Self {
        match err {
            zbus::fdo::Error::ServiceUnknown(detail) | zbus::fdo::Error::NameHasNoOwner(detail) => {
                ConnectorError::ServiceVanished(detail)
            }
            other => ConnectorError::Bus(other.to_string()),
        }
    }
}

/// Album art acquisition errors. These never leave the art cache;
/// callers get the original URL back instead.
#[derive(Debug, thiserror::Error)]
pub enum ArtError {
    #[error("Download failed: {0}")]
    Download(String),

    #[error("Cache IO error: {0}")]
    CacheIo(#[from] std::io::Error),
}
