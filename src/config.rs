//! Server configuration snapshot.
//!
//! The core consumes an immutable [`ServerConfig`] built by the CLI (or by
//! embedding code). Nothing here is re-read at runtime; restarting the
//! server is the only way to change it.

use std::path::PathBuf;
use std::time::Duration;

use crate::protocol::codec::DEFAULT_MAX_FRAME_LEN;

/// Write-buffer high-water mark (16 MiB). A session whose outbound buffer
/// grows past this without draining is torn down rather than ballooning.
pub const DEFAULT_WRITE_HIGH_WATER: usize = 16 * 1024 * 1024;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host to bind to.
    pub host: String,
    /// Port to listen on.
    pub port: u16,
    /// Maximum number of concurrent connections. Connections beyond the cap
    /// are accepted and immediately closed with no reply.
    pub max_connections: usize,
    /// Ceiling on the declared length of a single typed frame.
    pub max_frame_len: usize,
    /// Outbound buffer size at which a session is considered wedged.
    pub write_high_water: usize,
    /// Bound on the whole startup/authentication exchange.
    pub startup_timeout: Duration,
    /// ParameterStatus pairs announced after AuthenticationOk.
    pub parameters: Vec<(String, String)>,
    /// Whether the TLS collaborator is enabled. The core itself always
    /// answers SSLRequest with 'N'; this flag and the paths below are carried
    /// for a listener that terminates TLS in front of the protocol core.
    pub ssl_enabled: bool,
    /// TLS certificate path.
    pub ssl_cert: Option<PathBuf>,
    /// TLS key path.
    pub ssl_key: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5432,
            max_connections: 100,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            write_high_water: DEFAULT_WRITE_HIGH_WATER,
            startup_timeout: Duration::from_secs(10),
            parameters: default_parameters(),
            ssl_enabled: false,
            ssl_cert: None,
            ssl_key: None,
        }
    }
}

impl ServerConfig {
    /// The bind address in `host:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The ParameterStatus set psql expects to see at minimum.
fn default_parameters() -> Vec<(String, String)> {
    [
        ("server_version", "14.0"),
        ("client_encoding", "UTF8"),
        ("server_encoding", "UTF8"),
        ("DateStyle", "ISO, MDY"),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v.to_string()))
    .collect()
}
