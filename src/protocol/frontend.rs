use std::collections::HashMap;

use bytes::BytesMut;
use tokio_util::codec::Decoder;

use crate::protocol::ProtocolError;
use crate::protocol::codec::{
    MAX_STARTUP_FRAME_LEN, PostgresCodec, StartupCodec, get_bytes, get_cstring, get_i16, get_i32,
    get_u8,
};
use crate::protocol::types::FormatCode;

/// SSLRequest magic number
pub const SSL_REQUEST_CODE: i32 = (1234 << 16) | 5679; // 80877103

/// GSSENCRequest magic number
pub const GSSENC_REQUEST_CODE: i32 = (1234 << 16) | 5680; // 80877104

/// CancelRequest magic number
pub const CANCEL_REQUEST_CODE: i32 = (1234 << 16) | 5678; // 80877102

/// Protocol version 3.0 as it appears on the wire.
pub const PROTOCOL_VERSION: i32 = 3 << 16; // 0x00030000

/// Messages sent by the frontend (client) during the startup phase.
///
/// These are the only untyped frames in the protocol: a length prefix
/// followed by a 32-bit magic, with no leading type byte.
#[derive(Debug)]
pub enum StartupMessage {
    /// SSLRequest - client wants to negotiate SSL
    SslRequest,
    /// GSSENCRequest - client wants GSSAPI encryption
    GssEncRequest,
    /// CancelRequest - client wants to cancel a running session's query
    CancelRequest { process_id: i32, secret_key: i32 },
    /// StartupMessage - normal connection startup
    Startup {
        protocol_version: i32,
        parameters: StartupParameters,
    },
}

/// Startup parameters from the client.
#[derive(Debug, Clone, Default)]
pub struct StartupParameters {
    pub user: String,
    pub database: Option<String>,
    pub application_name: Option<String>,
    pub client_encoding: Option<String>,
    pub other: HashMap<String, String>,
}

impl StartupParameters {
    /// The database the client asked for, defaulting to the user name.
    pub fn database_or_user(&self) -> &str {
        self.database.as_deref().unwrap_or(&self.user)
    }
}

impl StartupMessage {
    fn parse(code: i32, mut body: BytesMut) -> Result<Self, ProtocolError> {
        match code {
            SSL_REQUEST_CODE if body.is_empty() => Ok(StartupMessage::SslRequest),
            GSSENC_REQUEST_CODE if body.is_empty() => Ok(StartupMessage::GssEncRequest),
            CANCEL_REQUEST_CODE if body.len() == 8 => {
                let process_id = get_i32(&mut body)?;
                let secret_key = get_i32(&mut body)?;
                Ok(StartupMessage::CancelRequest {
                    process_id,
                    secret_key,
                })
            }
            SSL_REQUEST_CODE | GSSENC_REQUEST_CODE | CANCEL_REQUEST_CODE => {
                Err(ProtocolError::InvalidMessage)
            }
            version if (version >> 16) == 3 => {
                let parameters = Self::parse_parameters(body)?;
                Ok(StartupMessage::Startup {
                    protocol_version: version,
                    parameters,
                })
            }
            _ => Err(ProtocolError::UnsupportedProtocolVersion(code)),
        }
    }

    fn parse_parameters(mut body: BytesMut) -> Result<StartupParameters, ProtocolError> {
        let mut params = StartupParameters::default();

        while !body.is_empty() {
            let name = get_cstring(&mut body)?;

            // Empty name signals end of parameters
            if name.is_empty() {
                break;
            }

            let value = get_cstring(&mut body)?;

            match name.as_str() {
                "user" => params.user = value,
                "database" => params.database = Some(value),
                "application_name" => params.application_name = Some(value),
                "client_encoding" => params.client_encoding = Some(value),
                _ => {
                    params.other.insert(name, value);
                }
            }
        }

        if params.user.is_empty() {
            return Err(ProtocolError::MissingParameter("user"));
        }

        Ok(params)
    }
}

impl Decoder for StartupCodec {
    type Item = StartupMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<StartupMessage>, ProtocolError> {
        if src.len() < 8 {
            return Ok(None);
        }

        let declared = i32::from_be_bytes([src[0], src[1], src[2], src[3]]);

        // Minimum length is 8 (length + magic)
        if declared < 8 {
            return Err(ProtocolError::InvalidMessage);
        }
        let declared = declared as usize;
        if declared > MAX_STARTUP_FRAME_LEN.min(self.max_frame_len) {
            return Err(ProtocolError::MessageTooLarge(declared));
        }

        if src.len() < declared {
            src.reserve(declared - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(declared);
        let _ = get_i32(&mut frame)?;
        let code = get_i32(&mut frame)?;
        StartupMessage::parse(code, frame).map(Some)
    }
}

/// Statement or portal selector in Describe / Close.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TargetKind {
    /// 'S' - a prepared statement
    Statement,
    /// 'P' - a portal
    Portal,
}

impl TargetKind {
    fn from_u8(b: u8) -> Result<Self, ProtocolError> {
        match b {
            b'S' => Ok(TargetKind::Statement),
            b'P' => Ok(TargetKind::Portal),
            _ => Err(ProtocolError::InvalidMessage),
        }
    }
}

/// Parse ('P') payload.
#[derive(Debug, Clone)]
pub struct ParseMessage {
    /// Destination prepared statement name ("" selects the unnamed statement).
    pub name: String,
    /// The query text to be prepared.
    pub query: String,
    /// Pre-specified parameter type OIDs (zero = unspecified).
    pub param_types: Vec<i32>,
}

/// Bind ('B') payload.
#[derive(Debug, Clone)]
pub struct BindMessage {
    /// Destination portal name ("" selects the unnamed portal).
    pub portal: String,
    /// Source prepared statement name.
    pub statement: String,
    /// Per-parameter format codes (possibly empty or a single code for all).
    pub param_formats: Vec<FormatCode>,
    /// Parameter values; `None` is SQL NULL (wire length -1).
    pub param_values: Vec<Option<Vec<u8>>>,
    /// Result-column format codes.
    pub result_formats: Vec<FormatCode>,
}

/// Describe ('D') payload.
#[derive(Debug, Clone)]
pub struct DescribeMessage {
    pub target: TargetKind,
    pub name: String,
}

/// Execute ('E') payload.
#[derive(Debug, Clone)]
pub struct ExecuteMessage {
    pub portal: String,
    /// Maximum number of rows to return; 0 means no limit.
    pub max_rows: i32,
}

/// Close ('C') payload.
#[derive(Debug, Clone)]
pub struct CloseMessage {
    pub target: TargetKind,
    pub name: String,
}

/// Typed frames sent by the frontend after the handshake.
#[derive(Debug)]
pub enum FrontendMessage {
    /// 'Q' - Simple query
    Query(String),
    /// 'P' - Parse (extended query)
    Parse(ParseMessage),
    /// 'B' - Bind (extended query)
    Bind(BindMessage),
    /// 'D' - Describe (extended query)
    Describe(DescribeMessage),
    /// 'E' - Execute (extended query)
    Execute(ExecuteMessage),
    /// 'C' - Close (extended query)
    Close(CloseMessage),
    /// 'S' - Sync
    Sync,
    /// 'H' - Flush
    Flush,
    /// 'X' - Terminate
    Terminate,
    /// 'p' - Password response to an authentication challenge
    Password(String),
    /// 'd' - Copy data
    CopyData(Vec<u8>),
    /// 'c' - Copy done
    CopyDone,
    /// 'f' - Copy fail
    CopyFail(String),
    /// Any other type byte; payload is preserved for the unknown handler.
    Unknown { ty: u8, payload: Vec<u8> },
}

impl FrontendMessage {
    /// Message name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            FrontendMessage::Query(_) => "Query",
            FrontendMessage::Parse(_) => "Parse",
            FrontendMessage::Bind(_) => "Bind",
            FrontendMessage::Describe(_) => "Describe",
            FrontendMessage::Execute(_) => "Execute",
            FrontendMessage::Close(_) => "Close",
            FrontendMessage::Sync => "Sync",
            FrontendMessage::Flush => "Flush",
            FrontendMessage::Terminate => "Terminate",
            FrontendMessage::Password(_) => "PasswordMessage",
            FrontendMessage::CopyData(_) => "CopyData",
            FrontendMessage::CopyDone => "CopyDone",
            FrontendMessage::CopyFail(_) => "CopyFail",
            FrontendMessage::Unknown { .. } => "Unknown",
        }
    }

    fn parse(ty: u8, mut body: BytesMut) -> Result<Self, ProtocolError> {
        match ty {
            b'Q' => Ok(FrontendMessage::Query(get_cstring(&mut body)?)),
            b'P' => {
                let name = get_cstring(&mut body)?;
                let query = get_cstring(&mut body)?;
                let count = get_i16(&mut body)?;
                if count < 0 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let mut param_types = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    param_types.push(get_i32(&mut body)?);
                }
                Ok(FrontendMessage::Parse(ParseMessage {
                    name,
                    query,
                    param_types,
                }))
            }
            b'B' => {
                let portal = get_cstring(&mut body)?;
                let statement = get_cstring(&mut body)?;

                let param_formats = Self::parse_format_codes(&mut body)?;

                let count = get_i16(&mut body)?;
                if count < 0 {
                    return Err(ProtocolError::InvalidMessage);
                }
                let mut param_values = Vec::with_capacity(count as usize);
                for _ in 0..count {
                    let len = get_i32(&mut body)?;
                    match len {
                        -1 => param_values.push(None),
                        n if n >= 0 => param_values.push(Some(get_bytes(&mut body, n as usize)?)),
                        _ => return Err(ProtocolError::InvalidMessage),
                    }
                }

                let result_formats = Self::parse_format_codes(&mut body)?;

                Ok(FrontendMessage::Bind(BindMessage {
                    portal,
                    statement,
                    param_formats,
                    param_values,
                    result_formats,
                }))
            }
            b'D' => {
                let target = TargetKind::from_u8(get_u8(&mut body)?)?;
                let name = get_cstring(&mut body)?;
                Ok(FrontendMessage::Describe(DescribeMessage { target, name }))
            }
            b'E' => {
                let portal = get_cstring(&mut body)?;
                let max_rows = get_i32(&mut body)?;
                Ok(FrontendMessage::Execute(ExecuteMessage { portal, max_rows }))
            }
            b'C' => {
                let target = TargetKind::from_u8(get_u8(&mut body)?)?;
                let name = get_cstring(&mut body)?;
                Ok(FrontendMessage::Close(CloseMessage { target, name }))
            }
            b'S' => Ok(FrontendMessage::Sync),
            b'H' => Ok(FrontendMessage::Flush),
            b'X' => Ok(FrontendMessage::Terminate),
            b'p' => Ok(FrontendMessage::Password(get_cstring(&mut body)?)),
            b'd' => Ok(FrontendMessage::CopyData(body.to_vec())),
            b'c' => Ok(FrontendMessage::CopyDone),
            b'f' => Ok(FrontendMessage::CopyFail(get_cstring(&mut body)?)),
            _ => Ok(FrontendMessage::Unknown {
                ty,
                payload: body.to_vec(),
            }),
        }
    }

    fn parse_format_codes(body: &mut BytesMut) -> Result<Vec<FormatCode>, ProtocolError> {
        let count = get_i16(body)?;
        if count < 0 {
            return Err(ProtocolError::InvalidMessage);
        }
        let mut codes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let code = get_i16(body)?;
            codes.push(FormatCode::try_from(code).map_err(|_| ProtocolError::InvalidMessage)?);
        }
        Ok(codes)
    }
}

impl Decoder for PostgresCodec {
    type Item = FrontendMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<FrontendMessage>, ProtocolError> {
        if src.len() < 5 {
            return Ok(None);
        }

        let ty = src[0];
        let declared = i32::from_be_bytes([src[1], src[2], src[3], src[4]]);

        // The length counts itself but not the type byte.
        if declared < 4 {
            return Err(ProtocolError::InvalidMessage);
        }
        let body_len = declared as usize - 4;
        if body_len > self.max_frame_len {
            return Err(ProtocolError::MessageTooLarge(declared as usize));
        }

        if src.len() < 5 + body_len {
            src.reserve(5 + body_len - src.len());
            return Ok(None);
        }

        let mut frame = src.split_to(5 + body_len);
        let _ = get_u8(&mut frame)?;
        let _ = get_i32(&mut frame)?;
        FrontendMessage::parse(ty, frame).map(Some)
    }
}
