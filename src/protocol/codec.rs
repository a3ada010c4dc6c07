use bytes::{Buf, BufMut, BytesMut};

use crate::protocol::ProtocolError;

/// Maximum frame size in bytes (1 MiB).
/// PostgreSQL allows up to 1 GB, but a mock server has no reason to accept
/// frames that large; the ceiling bounds per-connection allocations.
pub const DEFAULT_MAX_FRAME_LEN: usize = 1024 * 1024;

/// Upper bound on the declared length of a startup-class frame.
/// Startup packets carry a handful of short parameter strings.
pub const MAX_STARTUP_FRAME_LEN: usize = 10_000;

/// Read a null-terminated string from a BytesMut buffer.
/// Returns an error if there's no null terminator within the buffer.
/// Returns the string (without the null terminator) if successful.
pub fn get_cstring(src: &mut BytesMut) -> Result<String, ProtocolError> {
    let Some(null_pos) = src.iter().position(|&b| b == 0) else {
        return Err(ProtocolError::InvalidMessage);
    };

    let bytes = src.split_to(null_pos);
    src.advance(1);
    Ok(String::from_utf8(bytes.to_vec())?)
}

/// Write a null-terminated string to a BytesMut buffer.
pub fn put_cstring(dst: &mut BytesMut, s: &str) {
    dst.put_slice(s.as_bytes());
    dst.put_u8(0);
}

/// Read a single byte, failing on a truncated payload.
pub fn get_u8(src: &mut BytesMut) -> Result<u8, ProtocolError> {
    if src.is_empty() {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(src.get_u8())
}

/// Read a big-endian i16, failing on a truncated payload.
pub fn get_i16(src: &mut BytesMut) -> Result<i16, ProtocolError> {
    if src.len() < 2 {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(src.get_i16())
}

/// Read a big-endian i32, failing on a truncated payload.
pub fn get_i32(src: &mut BytesMut) -> Result<i32, ProtocolError> {
    if src.len() < 4 {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(src.get_i32())
}

/// Read exactly `n` bytes, failing when the declared count overflows the
/// remaining payload.
pub fn get_bytes(src: &mut BytesMut, n: usize) -> Result<Vec<u8>, ProtocolError> {
    if src.len() < n {
        return Err(ProtocolError::InvalidMessage);
    }
    Ok(src.split_to(n).to_vec())
}

/// Codec for the query phase of the PostgreSQL protocol.
/// Encodes BackendMessage (in backend.rs) and decodes FrontendMessage (in frontend.rs).
pub struct PostgresCodec {
    pub(crate) max_frame_len: usize,
}

impl PostgresCodec {
    /// Creates a new PostgresCodec with the default maximum frame length.
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Creates a new PostgresCodec with an explicit maximum frame length.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }
}

impl Default for PostgresCodec {
    fn default() -> Self {
        Self::new()
    }
}

/// Codec for the startup phase of the PostgreSQL protocol.
/// Decodes StartupMessage only (the server never receives typed frames
/// before the handshake completes).
pub struct StartupCodec {
    pub(crate) max_frame_len: usize,
}

impl StartupCodec {
    /// Creates a new StartupCodec with the default maximum frame length.
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Creates a new StartupCodec with an explicit maximum frame length.
    pub fn with_max_frame_len(max_frame_len: usize) -> Self {
        Self { max_frame_len }
    }

    /// Transitions to the query phase codec after a successful startup.
    pub fn ready(self) -> PostgresCodec {
        PostgresCodec {
            max_frame_len: self.max_frame_len,
        }
    }
}

impl Default for StartupCodec {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_cstring() {
        let mut buf = BytesMut::from(&b"hello\0world"[..]);
        assert_eq!(get_cstring(&mut buf).unwrap(), "hello".to_string());
        assert_eq!(buf, b"world"[..]);
    }

    #[test]
    fn test_get_cstring_unterminated() {
        let mut buf = BytesMut::from(&b"hello"[..]);
        assert!(get_cstring(&mut buf).is_err());
    }

    #[test]
    fn test_get_cstring_empty() {
        let mut buf = BytesMut::from(&b"\0rest"[..]);
        assert_eq!(get_cstring(&mut buf).unwrap(), "");
        assert_eq!(buf, b"rest"[..]);
    }

    #[test]
    fn test_put_cstring() {
        let mut buf = BytesMut::new();
        put_cstring(&mut buf, "test");
        assert_eq!(buf, b"test\0"[..]);
    }

    #[test]
    fn test_truncated_numerics() {
        let mut buf = BytesMut::from(&[0x01u8][..]);
        assert!(get_i16(&mut buf).is_err());

        let mut buf = BytesMut::from(&[0x01u8, 0x02, 0x03][..]);
        assert!(get_i32(&mut buf).is_err());
    }

    #[test]
    fn test_get_bytes_overflowing_count() {
        let mut buf = BytesMut::from(&b"abc"[..]);
        assert!(get_bytes(&mut buf, 4).is_err());

        let mut buf = BytesMut::from(&b"abc"[..]);
        assert_eq!(get_bytes(&mut buf, 3).unwrap(), b"abc".to_vec());
    }
}
