//! Connector configuration and client identity.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default cadence of the connection monitor.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// Default time-to-live of the associate-session request, in seconds.
pub const DEFAULT_ASSOCIATION_TTL_SECS: u64 = 10;

/// Immutable identity and credential material of one client.
///
/// The `uri` is the routing identity the broker binds this connection to
/// during session association. The deployment assigns it; by default it is
/// derived from the client certificate file stem as
/// `cth://<stem>/<client_type>`.
#[derive(Debug, Clone)]
pub struct ClientMetadata {
    pub client_type: String,
    pub ca_crt_path: PathBuf,
    pub client_crt_path: PathBuf,
    pub client_key_path: PathBuf,
    pub uri: String,
}

impl ClientMetadata {
    pub fn new(
        client_type: impl Into<String>,
        ca_crt_path: impl Into<PathBuf>,
        client_crt_path: impl Into<PathBuf>,
        client_key_path: impl Into<PathBuf>,
    ) -> Self {
        let client_type = client_type.into();
        let client_crt_path = client_crt_path.into();
        let uri = default_uri(&client_crt_path, &client_type);
        Self {
            client_type,
            ca_crt_path: ca_crt_path.into(),
            client_crt_path,
            client_key_path: client_key_path.into(),
            uri,
        }
    }
}

fn default_uri(client_crt_path: &Path, client_type: &str) -> String {
    let name = client_crt_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "client".to_string());
    format!("cth://{name}/{client_type}")
}

/// Tunable configuration of a [`Connector`](crate::Connector).
///
/// # Example
///
/// ```rust,ignore
/// let config = ConnectorConfig::new(
///     "wss://broker.example.com:8142/weft",
///     "agent",
///     "/etc/weft/ca.pem",
///     "/etc/weft/agent01.pem",
///     "/etc/weft/agent01.key",
/// )
/// .with_heartbeat_interval(Duration::from_secs(30))
/// .with_client_uri("cth://agent01.example.com/agent");
/// ```
#[derive(Debug, Clone)]
pub struct ConnectorConfig {
    /// Broker WebSocket URL (`ws://` or `wss://`).
    pub server_url: String,
    /// Client identity and credential paths.
    pub metadata: ClientMetadata,
    /// Cadence of the monitor's heartbeat / reconnect checks (default 15 s).
    pub heartbeat_interval: Duration,
    /// TTL of the associate-session request envelope (default 10 s).
    pub association_ttl_secs: u64,
}

impl ConnectorConfig {
    pub fn new(
        server_url: impl Into<String>,
        client_type: impl Into<String>,
        ca_crt_path: impl Into<PathBuf>,
        client_crt_path: impl Into<PathBuf>,
        client_key_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            metadata: ClientMetadata::new(
                client_type,
                ca_crt_path,
                client_crt_path,
                client_key_path,
            ),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            association_ttl_secs: DEFAULT_ASSOCIATION_TTL_SECS,
        }
    }

    /// Set the monitor cadence (default 15 s).
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the associate-session request TTL in seconds (default 10 s).
    pub fn with_association_ttl_secs(mut self, secs: u64) -> Self {
        self.association_ttl_secs = secs;
        self
    }

    /// Override the derived client URI with a deployment-assigned identity.
    pub fn with_client_uri(mut self, uri: impl Into<String>) -> Self {
        self.metadata.uri = uri.into();
        self
    }
}
