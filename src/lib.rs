//! A server-side emulator of the PostgreSQL frontend/backend wire protocol
//! (version 3.0).
//!
//! `pgmock` accepts connections from unmodified PostgreSQL client drivers,
//! carries them through the startup/authentication handshake, and services
//! the simple- and extended-query cycles with pluggable application logic.
//! It is a protocol endpoint, not a SQL engine: values on the wire are
//! opaque octets, and every response beyond the protocol's own choreography
//! comes from the installed [`handler::Handler`].
//!
//! ```no_run
//! use pgmock::config::ServerConfig;
//! use pgmock::server::Server;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), std::io::Error> {
//!     Server::new(ServerConfig::default()).run().await
//! }
//! ```

pub mod config;
pub mod handler;
pub mod protocol;
pub mod server;
pub mod session;
