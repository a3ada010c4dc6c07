use bytes::{BufMut, BytesMut};
use std::io;
use tokio_util::codec::Encoder;

use crate::protocol::codec::{PostgresCodec, StartupCodec, put_cstring};
use crate::protocol::types::{ErrorFieldCode, FormatCode};

/// SQL State codes used by the core.
///
/// References:
/// - <https://www.postgresql.org/docs/current/errcodes-appendix.html>
pub mod sql_state {
    // Class 08 - Connection Exception
    /// Connection exception (generic)
    pub const CONNECTION_EXCEPTION: &str = "08000";
    /// Protocol violation (malformed frame, illegal message for the state)
    pub const PROTOCOL_VIOLATION: &str = "08P01";

    // Class 28 - Invalid Authorization Specification
    /// Invalid authorization specification (bad user, failed password)
    pub const INVALID_AUTHORIZATION: &str = "28000";

    // Class 26 - Invalid SQL Statement Name
    /// Prepared statement does not exist
    pub const INVALID_SQL_STATEMENT_NAME: &str = "26000";

    // Class 34 - Invalid Cursor Name
    /// Portal does not exist
    pub const INVALID_CURSOR_NAME: &str = "34000";

    // Class 25 - Invalid Transaction State
    /// Current transaction is aborted, commands ignored until end of transaction block
    pub const IN_FAILED_SQL_TRANSACTION: &str = "25P02";

    // Class 42 - Syntax Error or Access Rule Violation
    /// Syntax error
    pub const SYNTAX_ERROR: &str = "42601";

    // Class 57 - Operator Intervention
    /// Query canceled by a CancelRequest
    pub const QUERY_CANCELED: &str = "57014";

    // Class 0A - Feature Not Supported
    /// Feature not supported
    pub const FEATURE_NOT_SUPPORTED: &str = "0A000";

    // Class XX - Internal Error
    /// Internal error
    pub const INTERNAL_ERROR: &str = "XX000";
}

/// Authentication request variants carried by the 'R' message.
///
/// The core only produces challenges and `Ok`; verifying credentials is the
/// authentication collaborator's job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthenticationRequest {
    /// Sub-type 0 - authentication succeeded
    Ok,
    /// Sub-type 3 - cleartext password requested
    CleartextPassword,
    /// Sub-type 5 - MD5 password requested, with the 4-byte salt
    Md5Password { salt: [u8; 4] },
    /// Sub-type 10 - SASL exchange, advertising mechanism names
    Sasl { mechanisms: Vec<String> },
}

impl AuthenticationRequest {
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            AuthenticationRequest::Ok => dst.put_i32(0),
            AuthenticationRequest::CleartextPassword => dst.put_i32(3),
            AuthenticationRequest::Md5Password { salt } => {
                dst.put_i32(5);
                dst.put_slice(salt);
            }
            AuthenticationRequest::Sasl { mechanisms } => {
                dst.put_i32(10);
                for mechanism in mechanisms {
                    put_cstring(dst, mechanism);
                }
                dst.put_u8(0); // end of mechanism list
            }
        }
    }
}

/// Messages sent by the backend (server) to the client.
///
/// Every constructor produces the bit-exact wire layout; encoding goes into a
/// buffer and never touches the socket directly.
#[derive(Debug)]
pub enum BackendMessage {
    /// 'R' - Authentication request / success
    Authentication(AuthenticationRequest),
    /// 'K' - Backend key data for cancel requests
    BackendKeyData { process_id: i32, secret_key: i32 },
    /// 'S' - Parameter status notification
    ParameterStatus { name: String, value: String },
    /// 'Z' - Ready for query
    ReadyForQuery { status: TransactionStatus },
    /// 'E' - Error response
    ErrorResponse { fields: Vec<ErrorField> },
    /// 'N' - Notice response
    NoticeResponse { fields: Vec<ErrorField> },
    /// 'T' - Row description (column metadata)
    RowDescription { fields: Vec<FieldDescription> },
    /// 'D' - Data row
    DataRow { values: Vec<DataValue> },
    /// 'C' - Command complete
    CommandComplete { tag: String },
    /// 'I' - Empty query response
    EmptyQueryResponse,
    /// '1' - Parse complete
    ParseComplete,
    /// '2' - Bind complete
    BindComplete,
    /// '3' - Close complete
    CloseComplete,
    /// 'n' - No data
    NoData,
    /// 's' - Portal suspended
    PortalSuspended,
    /// 't' - Parameter description
    ParameterDescription { param_types: Vec<i32> },
    /// 'G' - Copy-in response
    CopyInResponse { format: CopyFormat },
    /// 'H' - Copy-out response
    CopyOutResponse { format: CopyFormat },
    /// 'W' - Copy-both response
    CopyBothResponse { format: CopyFormat },
    /// 'd' - Copy data
    CopyData { data: Vec<u8> },
    /// 'c' - Copy done
    CopyDone,
    /// 'f' - Copy fail
    CopyFail { message: String },
}

impl BackendMessage {
    /// Returns the message type byte.
    pub fn ty(&self) -> u8 {
        match self {
            BackendMessage::Authentication(_) => b'R',
            BackendMessage::BackendKeyData { .. } => b'K',
            BackendMessage::ParameterStatus { .. } => b'S',
            BackendMessage::ReadyForQuery { .. } => b'Z',
            BackendMessage::ErrorResponse { .. } => b'E',
            BackendMessage::NoticeResponse { .. } => b'N',
            BackendMessage::RowDescription { .. } => b'T',
            BackendMessage::DataRow { .. } => b'D',
            BackendMessage::CommandComplete { .. } => b'C',
            BackendMessage::EmptyQueryResponse => b'I',
            BackendMessage::ParseComplete => b'1',
            BackendMessage::BindComplete => b'2',
            BackendMessage::CloseComplete => b'3',
            BackendMessage::NoData => b'n',
            BackendMessage::PortalSuspended => b's',
            BackendMessage::ParameterDescription { .. } => b't',
            BackendMessage::CopyInResponse { .. } => b'G',
            BackendMessage::CopyOutResponse { .. } => b'H',
            BackendMessage::CopyBothResponse { .. } => b'W',
            BackendMessage::CopyData { .. } => b'd',
            BackendMessage::CopyDone => b'c',
            BackendMessage::CopyFail { .. } => b'f',
        }
    }

    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            BackendMessage::Authentication(_) => "Authentication",
            BackendMessage::BackendKeyData { .. } => "BackendKeyData",
            BackendMessage::ParameterStatus { .. } => "ParameterStatus",
            BackendMessage::ReadyForQuery { .. } => "ReadyForQuery",
            BackendMessage::ErrorResponse { .. } => "ErrorResponse",
            BackendMessage::NoticeResponse { .. } => "NoticeResponse",
            BackendMessage::RowDescription { .. } => "RowDescription",
            BackendMessage::DataRow { .. } => "DataRow",
            BackendMessage::CommandComplete { .. } => "CommandComplete",
            BackendMessage::EmptyQueryResponse => "EmptyQueryResponse",
            BackendMessage::ParseComplete => "ParseComplete",
            BackendMessage::BindComplete => "BindComplete",
            BackendMessage::CloseComplete => "CloseComplete",
            BackendMessage::NoData => "NoData",
            BackendMessage::PortalSuspended => "PortalSuspended",
            BackendMessage::ParameterDescription { .. } => "ParameterDescription",
            BackendMessage::CopyInResponse { .. } => "CopyInResponse",
            BackendMessage::CopyOutResponse { .. } => "CopyOutResponse",
            BackendMessage::CopyBothResponse { .. } => "CopyBothResponse",
            BackendMessage::CopyData { .. } => "CopyData",
            BackendMessage::CopyDone => "CopyDone",
            BackendMessage::CopyFail { .. } => "CopyFail",
        }
    }

    /// Encodes this message into the given BytesMut buffer.
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.ty());

        let len_pos = dst.len();
        dst.put_i32(0); // placeholder

        self.encode_body(dst);

        let total_len = (dst.len() - len_pos) as i32;
        dst[len_pos..][..4].copy_from_slice(&total_len.to_be_bytes());
    }

    /// Encodes the body of this message into the given BytesMut buffer.
    fn encode_body(&self, dst: &mut BytesMut) {
        match self {
            BackendMessage::Authentication(request) => {
                request.encode(dst);
            }
            BackendMessage::BackendKeyData {
                process_id,
                secret_key,
            } => {
                dst.put_i32(*process_id);
                dst.put_i32(*secret_key);
            }
            BackendMessage::ParameterStatus { name, value } => {
                put_cstring(dst, name);
                put_cstring(dst, value);
            }
            BackendMessage::ReadyForQuery { status } => {
                dst.put_u8(status.as_byte());
            }
            BackendMessage::ErrorResponse { fields } | BackendMessage::NoticeResponse { fields } => {
                for field in fields {
                    field.encode(dst);
                }
                dst.put_u8(0); // terminator
            }
            BackendMessage::RowDescription { fields } => {
                dst.put_i16(fields.len() as i16);
                for field in fields {
                    field.encode(dst);
                }
            }
            BackendMessage::DataRow { values } => {
                dst.put_i16(values.len() as i16);
                for value in values {
                    value.encode(dst);
                }
            }
            BackendMessage::CommandComplete { tag } => {
                put_cstring(dst, tag);
            }
            BackendMessage::EmptyQueryResponse
            | BackendMessage::ParseComplete
            | BackendMessage::BindComplete
            | BackendMessage::CloseComplete
            | BackendMessage::NoData
            | BackendMessage::PortalSuspended
            | BackendMessage::CopyDone => {
                // No body for these messages
            }
            BackendMessage::ParameterDescription { param_types } => {
                dst.put_i16(param_types.len() as i16);
                for oid in param_types {
                    dst.put_i32(*oid);
                }
            }
            BackendMessage::CopyInResponse { format }
            | BackendMessage::CopyOutResponse { format }
            | BackendMessage::CopyBothResponse { format } => {
                format.encode(dst);
            }
            BackendMessage::CopyData { data } => {
                dst.put_slice(data);
            }
            BackendMessage::CopyFail { message } => {
                put_cstring(dst, message);
            }
        }
    }
}

impl Encoder<BackendMessage> for StartupCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

impl Encoder<BackendMessage> for PostgresCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: BackendMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        msg.encode(dst);
        Ok(())
    }
}

/// Transaction status indicator for ReadyForQuery message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TransactionStatus {
    /// 'I' - Idle (not in a transaction block)
    #[default]
    Idle,
    /// 'T' - In a transaction block
    InTransaction,
    /// 'E' - In a failed transaction block
    Failed,
}

impl TransactionStatus {
    pub fn as_byte(self) -> u8 {
        match self {
            TransactionStatus::Idle => b'I',
            TransactionStatus::InTransaction => b'T',
            TransactionStatus::Failed => b'E',
        }
    }
}

/// Overall and per-column formats announced in Copy responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CopyFormat {
    /// 0 = textual, 1 = binary
    pub overall: FormatCode,
    /// Per-column format codes
    pub columns: Vec<FormatCode>,
}

impl CopyFormat {
    /// All-text copy with the given column count.
    pub fn text(columns: usize) -> Self {
        Self {
            overall: FormatCode::Text,
            columns: vec![FormatCode::Text; columns],
        }
    }

    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.overall.as_i16() as u8);
        dst.put_i16(self.columns.len() as i16);
        for column in &self.columns {
            dst.put_i16(column.as_i16());
        }
    }
}

/// Error/Notice field.
#[derive(Debug)]
pub struct ErrorField {
    pub code: ErrorFieldCode,
    pub value: String,
}

impl ErrorField {
    /// Creates a new error field.
    pub fn new(code: ErrorFieldCode, value: impl Into<String>) -> Self {
        Self {
            code,
            value: value.into(),
        }
    }

    /// Encodes this error field into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        dst.put_u8(self.code.as_u8());
        put_cstring(dst, &self.value);
    }
}

/// Structured error information for PostgreSQL error responses.
///
/// Error responses have required fields (severity, SQL state, message) and
/// optional fields (position, detail, hint). This struct provides a
/// builder-style API for constructing well-formed error responses; handlers
/// return it to report application errors.
///
/// # Examples
///
/// ```rust
/// use pgmock::protocol::{ErrorInfo, sql_state};
///
/// // Simple error (severity defaults to "ERROR")
/// let err = ErrorInfo::new(sql_state::SYNTAX_ERROR, "unexpected token");
///
/// // Fatal error; the session is closed after the response is flushed
/// let err = ErrorInfo::new(sql_state::CONNECTION_EXCEPTION, "connection lost")
///     .with_severity("FATAL");
/// ```
#[derive(Debug, Clone)]
pub struct ErrorInfo {
    /// Severity level (ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG)
    pub severity: &'static str,
    /// SQLSTATE code (e.g., "08P01" for a protocol violation)
    pub code: &'static str,
    /// Primary human-readable error message
    pub message: String,
    /// Error cursor position in the original query string (1-indexed)
    pub position: Option<usize>,
}

impl ErrorInfo {
    /// Creates a new error with the required fields.
    ///
    /// Severity defaults to "ERROR".
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            severity: "ERROR",
            code,
            message: message.into(),
            position: None,
        }
    }

    /// Sets the severity level.
    ///
    /// Common values: "ERROR", "FATAL", "PANIC", "WARNING", "NOTICE", "DEBUG", "INFO", "LOG"
    pub fn with_severity(mut self, severity: &'static str) -> Self {
        self.severity = severity;
        self
    }

    /// Adds position information to this error.
    ///
    /// The position is 1-indexed, indicating the character position in the
    /// original query string where the error occurred.
    pub fn with_position(mut self, position: usize) -> Self {
        self.position = Some(position);
        self
    }

    /// Whether this error mandates closing the session once sent.
    pub fn is_fatal(&self) -> bool {
        self.severity == "FATAL" || self.severity == "PANIC"
    }

    fn fields(&self) -> Vec<ErrorField> {
        let mut fields = vec![
            ErrorField::new(ErrorFieldCode::Severity, self.severity),
            ErrorField::new(ErrorFieldCode::SeverityNonLocalized, self.severity),
            ErrorField::new(ErrorFieldCode::SqlState, self.code),
            ErrorField::new(ErrorFieldCode::Message, self.message.clone()),
        ];

        if let Some(pos) = self.position {
            fields.push(ErrorField::new(ErrorFieldCode::Position, pos.to_string()));
        }

        fields
    }

    /// Renders this error as a NoticeResponse instead of an ErrorResponse.
    pub fn into_notice(self) -> BackendMessage {
        BackendMessage::NoticeResponse {
            fields: self.fields(),
        }
    }
}

impl From<ErrorInfo> for BackendMessage {
    fn from(info: ErrorInfo) -> Self {
        BackendMessage::ErrorResponse {
            fields: info.fields(),
        }
    }
}

/// A single column value in a data row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataValue {
    /// SQL NULL value (encoded as length -1)
    Null,
    /// Non-NULL value (encoded as length + data bytes)
    Data(Vec<u8>),
}

impl DataValue {
    /// Convenience constructor for text-format values.
    pub fn text(value: impl AsRef<str>) -> Self {
        DataValue::Data(value.as_ref().as_bytes().to_vec())
    }

    /// Encodes this data value into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        match self {
            DataValue::Null => dst.put_i32(-1),
            DataValue::Data(bytes) => {
                dst.put_i32(bytes.len() as i32);
                dst.put_slice(bytes);
            }
        }
    }
}

/// Field description for RowDescription message.
#[derive(Debug, Clone)]
pub struct FieldDescription {
    /// Column name
    pub name: String,
    /// Table OID (0 if not from a table)
    pub table_oid: i32,
    /// Column attribute number (0 if not from a table)
    pub column_id: i16,
    /// Data type OID
    pub type_oid: i32,
    /// Data type size (-1 for variable length)
    pub type_size: i16,
    /// Type modifier (-1 if not applicable)
    pub type_modifier: i32,
    /// Format code
    pub format_code: FormatCode,
}

impl FieldDescription {
    /// A text-format column that is not backed by a table.
    pub fn text_column(name: impl Into<String>, type_oid: i32, type_size: i16) -> Self {
        Self {
            name: name.into(),
            table_oid: 0,
            column_id: 0,
            type_oid,
            type_size,
            type_modifier: -1,
            format_code: FormatCode::Text,
        }
    }

    /// Encodes this field description into the given BytesMut buffer.
    fn encode(&self, dst: &mut BytesMut) {
        put_cstring(dst, &self.name);
        dst.put_i32(self.table_oid);
        dst.put_i16(self.column_id);
        dst.put_i32(self.type_oid);
        dst.put_i16(self.type_size);
        dst.put_i32(self.type_modifier);
        dst.put_i16(self.format_code.as_i16());
    }
}
