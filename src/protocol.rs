//! PostgreSQL wire protocol implementation.
//!
//! This module implements the server side of the PostgreSQL v3.0 wire
//! protocol: framing, frontend message decoding, and backend message
//! encoding. It is deliberately octet-transparent — values inside DataRow
//! and Bind payloads are opaque bytes whose interpretation belongs to the
//! installed [`Handler`](crate::handler::Handler).
//!
//! ## Architecture
//!
//! ```text
//! +----------+                           +----------+
//! |  Client  |  --- FrontendMessage -->  |  Server  |
//! |  (psql)  |  <-- BackendMessage  ---  | (pgmock) |
//! +----------+                           +----------+
//!               ^                   ^
//!               |   PostgresCodec   |
//!               +-------------------+
//! ```
//!
//! ## Terminology
//!
//! - **FrontendMessage**: Typed frames from client to server (Query, Parse, Bind, etc.)
//! - **StartupMessage**: Untyped startup-class frames (Startup, SSLRequest, CancelRequest)
//! - **BackendMessage**: Frames from server to client (RowDescription, DataRow, etc.)
//! - **Codec**: Framing and serialization for the wire protocol

pub mod backend;
pub mod codec;
pub mod error;
pub mod frontend;
pub mod types;

pub use backend::{
    AuthenticationRequest, BackendMessage, CopyFormat, DataValue, ErrorField, ErrorInfo,
    FieldDescription, TransactionStatus, sql_state,
};
pub use codec::{DEFAULT_MAX_FRAME_LEN, PostgresCodec, StartupCodec};
pub use error::ProtocolError;
pub use frontend::{
    BindMessage, CANCEL_REQUEST_CODE, CloseMessage, DescribeMessage, ExecuteMessage,
    FrontendMessage, GSSENC_REQUEST_CODE, PROTOCOL_VERSION, ParseMessage, SSL_REQUEST_CODE,
    StartupMessage, StartupParameters, TargetKind,
};
pub use types::{ErrorFieldCode, FormatCode, type_oid};
