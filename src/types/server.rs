use redis::{ConnectionAddr, ConnectionInfo, RedisConnectionInfo};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A configured store server this crate may connect to
///
/// Identity is `host:port:db`; two descriptors with the same identity refer
/// to the same logical server regardless of display name or credential.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerDescriptor {
    /// Display name shown to the user; defaults to `host:port` when absent
    #[serde(default)]
    pub name: Option<String>,

    /// Hostname or IP of the server
    pub host: String,

    /// TCP port, 6379 unless configured otherwise
    #[serde(default = "default_port")]
    pub port: u16,

    /// Optional AUTH credential
    #[serde(default)]
    pub password: Option<String>,

    /// Logical database index
    #[serde(default)]
    pub db: i64,
}

fn default_port() -> u16 {
    6379
}

impl ServerDescriptor {
    /// Create a descriptor with defaults for port 6379, db 0, no credential
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            name: None,
            host: host.into(),
            port: default_port(),
            password: None,
            db: 0,
        }
    }

    /// Identity key: `host:port:db`
    pub fn identity(&self) -> String {
        format!("{}:{}:{}", self.host, self.port, self.db)
    }

    /// Name to show in logs and messages
    pub fn display_name(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => format!("{}:{}", self.host, self.port),
        }
    }

    /// Connection parameters for the transport
    ///
    /// Built structurally rather than as a `redis://` URL so a credential
    /// containing `@`, `/` or `:` needs no escaping.
    pub fn connection_info(&self) -> ConnectionInfo {
        ConnectionInfo {
            addr: ConnectionAddr::Tcp(self.host.clone(), self.port),
            redis: RedisConnectionInfo {
                db: self.db,
                username: None,
                password: self.password.clone(),
                ..Default::default()
            },
        }
    }
}

impl fmt::Display for ServerDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Connection lifecycle state, owned exclusively by the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionState {
    /// No session open; the initial state, and the state after `disconnect`
    Disconnected,

    /// A session is being opened and probed
    Connecting,

    /// The liveness probe succeeded; a handle is available
    Connected,

    /// The probe or a runtime command failed; a reconnect may be pending
    Error,
}

impl ConnectionState {
    /// Status name as a string
    pub fn name(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

/// A status change notification emitted by the registry
///
/// Delivered at least once per status change; no ordering guarantee is made
/// across different servers.
#[derive(Debug, Clone)]
pub struct ConnectionEvent {
    /// Identity key of the server that changed state
    pub server: String,

    /// Display name of the server
    pub name: String,

    /// The state the server moved to
    pub state: ConnectionState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_key_includes_db() {
        let mut descriptor = ServerDescriptor::new("localhost");
        descriptor.db = 3;
        assert_eq!(descriptor.identity(), "localhost:6379:3");
    }

    #[test]
    fn test_display_name_falls_back_to_host_port() {
        let descriptor = ServerDescriptor::new("redis.internal");
        assert_eq!(descriptor.display_name(), "redis.internal:6379");

        let named = ServerDescriptor {
            name: Some("staging".to_string()),
            ..descriptor
        };
        assert_eq!(named.display_name(), "staging");
    }

    #[test]
    fn test_connection_info_carries_credential_and_db() {
        let mut descriptor = ServerDescriptor::new("localhost");
        descriptor.db = 1;
        // Characters that would break a redis:// URL pass through verbatim
        descriptor.password = Some("p@ss:w/rd".to_string());

        let info = descriptor.connection_info();
        match info.addr {
            ConnectionAddr::Tcp(host, port) => {
                assert_eq!(host, "localhost");
                assert_eq!(port, 6379);
            }
            other => panic!("expected plain TCP address, got {other:?}"),
        }
        assert_eq!(info.redis.db, 1);
        assert_eq!(info.redis.username, None);
        assert_eq!(info.redis.password.as_deref(), Some("p@ss:w/rd"));
    }

    #[test]
    fn test_descriptor_deserializes_with_defaults() {
        let descriptor: ServerDescriptor =
            serde_json::from_str(r#"{"host": "localhost"}"#).unwrap();
        assert_eq!(descriptor.port, 6379);
        assert_eq!(descriptor.db, 0);
        assert!(descriptor.password.is_none());
    }
}
