//! End-to-end wire protocol tests.
//!
//! Each test starts a server on an ephemeral port and speaks raw protocol
//! bytes over a plain TCP socket, the way an unmodified driver would.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use pgmock::config::ServerConfig;
use pgmock::handler::{Handler, HandlerAction, HandlerOutcome};
use pgmock::protocol::{
    BackendMessage, DataValue, DescribeMessage, ErrorInfo, ExecuteMessage, FieldDescription,
    ParseMessage, TargetKind, sql_state, type_oid,
};
use pgmock::server::Server;
use pgmock::session::Session;

const SSL_REQUEST: i32 = 80877103;
const CANCEL_REQUEST: i32 = 80877102;
const GSSENC_REQUEST: i32 = 80877104;
const VERSION_3: i32 = 3 << 16;

/// Starts a server with the given handler on an ephemeral port.
async fn start_server(config: ServerConfig, handler: Arc<dyn Handler>) -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let server = Server::with_handler(config, handler);
    tokio::spawn(async move {
        let _ = server.serve(listener).await;
    });
    port
}

async fn start_default_server() -> u16 {
    start_server(ServerConfig::default(), Arc::new(pgmock::handler::DefaultHandler)).await
}

/// A raw protocol client.
struct TestClient {
    stream: TcpStream,
}

impl TestClient {
    async fn connect(port: u16) -> Self {
        let stream = TcpStream::connect(("127.0.0.1", port)).await.unwrap();
        stream.set_nodelay(true).unwrap();
        Self { stream }
    }

    async fn send_untyped(&mut self, code: i32, body: &[u8]) {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((8 + body.len()) as i32).to_be_bytes());
        buf.extend_from_slice(&code.to_be_bytes());
        buf.extend_from_slice(body);
        self.stream.write_all(&buf).await.unwrap();
    }

    async fn send_typed(&mut self, ty: u8, body: &[u8]) {
        let mut buf = Vec::new();
        buf.push(ty);
        buf.extend_from_slice(&((4 + body.len()) as i32).to_be_bytes());
        buf.extend_from_slice(body);
        self.stream.write_all(&buf).await.unwrap();
    }

    async fn send_startup(&mut self, user: &str, database: &str) {
        let mut body = Vec::new();
        body.extend_from_slice(b"user\0");
        body.extend_from_slice(user.as_bytes());
        body.push(0);
        body.extend_from_slice(b"database\0");
        body.extend_from_slice(database.as_bytes());
        body.push(0);
        body.push(0);
        self.send_untyped(VERSION_3, &body).await;
    }

    async fn send_query(&mut self, sql: &str) {
        let mut body = sql.as_bytes().to_vec();
        body.push(0);
        self.send_typed(b'Q', &body).await;
    }

    async fn read_raw_byte(&mut self) -> u8 {
        let mut byte = [0u8; 1];
        tokio::time::timeout(Duration::from_secs(5), self.stream.read_exact(&mut byte))
            .await
            .expect("read timed out")
            .unwrap();
        byte[0]
    }

    /// Reads one typed frame; returns (type, payload).
    async fn read_frame(&mut self) -> (u8, Vec<u8>) {
        let ty = self.read_raw_byte().await;
        let mut len_buf = [0u8; 4];
        self.stream.read_exact(&mut len_buf).await.unwrap();
        let len = i32::from_be_bytes(len_buf) as usize;
        assert!(len >= 4, "frame length must count itself");
        let mut payload = vec![0u8; len - 4];
        self.stream.read_exact(&mut payload).await.unwrap();
        (ty, payload)
    }

    /// Reads frames up to and including ReadyForQuery.
    async fn read_until_ready(&mut self) -> Vec<(u8, Vec<u8>)> {
        let mut frames = Vec::new();
        loop {
            let frame = self.read_frame().await;
            let done = frame.0 == b'Z';
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Expects the peer to close without sending anything further.
    async fn expect_eof(&mut self) {
        let mut buf = [0u8; 1];
        let n = tokio::time::timeout(Duration::from_secs(5), self.stream.read(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(n, 0, "expected EOF, got byte 0x{:02x}", buf[0]);
    }

    /// Completes the SSL-reject + startup handshake; returns (pid, secret).
    async fn handshake(&mut self, user: &str) -> (i32, i32) {
        self.send_untyped(SSL_REQUEST, &[]).await;
        assert_eq!(self.read_raw_byte().await, b'N');

        self.send_startup(user, user).await;
        let frames = self.read_until_ready().await;

        // AuthenticationOk first, ReadyForQuery(Idle) last.
        assert_eq!(frames[0].0, b'R');
        assert_eq!(frames[0].1, vec![0, 0, 0, 0]);
        let last = frames.last().unwrap();
        assert_eq!(last.0, b'Z');
        assert_eq!(last.1, vec![b'I']);

        let key_data = frames
            .iter()
            .find(|(ty, _)| *ty == b'K')
            .expect("BackendKeyData missing");
        let pid = i32::from_be_bytes(key_data.1[0..4].try_into().unwrap());
        let secret = i32::from_be_bytes(key_data.1[4..8].try_into().unwrap());
        (pid, secret)
    }
}

/// Extracts the value of an ErrorResponse field by code.
fn error_field(payload: &[u8], code: u8) -> Option<String> {
    let mut rest = payload;
    while let Some((&field, tail)) = rest.split_first() {
        if field == 0 {
            break;
        }
        let end = tail.iter().position(|&b| b == 0)?;
        let value = String::from_utf8(tail[..end].to_vec()).ok()?;
        if field == code {
            return Some(value);
        }
        rest = &tail[end + 1..];
    }
    None
}

fn sqlstate(payload: &[u8]) -> String {
    error_field(payload, b'C').expect("ErrorResponse has no SQLSTATE field")
}

// --- startup and the simple query cycle ---

#[tokio::test]
async fn happy_startup_and_simple_query() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;

    client.send_untyped(SSL_REQUEST, &[]).await;
    assert_eq!(client.read_raw_byte().await, b'N');

    client.send_startup("u", "u").await;
    let frames = client.read_until_ready().await;

    // AuthenticationOk, 4 ParameterStatus, BackendKeyData, ReadyForQuery.
    assert_eq!(frames.len(), 7);
    assert_eq!(frames[0].0, b'R');
    let statuses: Vec<_> = frames.iter().filter(|(ty, _)| *ty == b'S').collect();
    assert_eq!(statuses.len(), 4);
    assert!(
        statuses
            .iter()
            .any(|(_, p)| p.starts_with(b"server_version\x0014.0\x00"))
    );
    assert_eq!(frames[5].0, b'K');
    assert_eq!(frames[6].0, b'Z');
    assert_eq!(frames[6].1, vec![b'I']);

    // Default query handler answers with EmptyQueryResponse.
    client.send_query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.len(), 2);
    assert_eq!(frames[0].0, b'I');
    assert_eq!(frames[1].0, b'Z');
    assert_eq!(frames[1].1, vec![b'I']);
}

#[tokio::test]
async fn gssenc_request_is_rejected_with_n() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;

    client.send_untyped(GSSENC_REQUEST, &[]).await;
    assert_eq!(client.read_raw_byte().await, b'N');

    client.send_startup("u", "u").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn startup_without_user_is_rejected() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;

    client.send_untyped(VERSION_3, b"database\0db\0\0").await;
    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'E');
    assert_eq!(sqlstate(&payload), "28000");
    assert_eq!(error_field(&payload, b'S').unwrap(), "FATAL");
    client.expect_eof().await;
}

#[tokio::test]
async fn unsupported_version_is_rejected() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;

    client.send_untyped(2 << 16, b"user\0u\0\0").await;
    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'E');
    assert_eq!(sqlstate(&payload), "08P01");
    client.expect_eof().await;
}

#[tokio::test]
async fn unknown_startup_magic_is_rejected() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;

    client.send_untyped(12345678, &[]).await;
    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'E');
    assert_eq!(sqlstate(&payload), "08P01");
    client.expect_eof().await;
}

// --- malformed framing ---

#[tokio::test]
async fn malformed_frame_length_closes_session() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    // Type byte followed by length -1.
    client.stream.write_all(b"Q").await.unwrap();
    client.stream.write_all(&[0xFF, 0xFF, 0xFF, 0xFF]).await.unwrap();

    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'E');
    assert_eq!(sqlstate(&payload), "08P01");
    client.expect_eof().await;
}

#[tokio::test]
async fn oversize_frame_length_closes_session() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.stream.write_all(b"Q").await.unwrap();
    client
        .stream
        .write_all(&0x7FFF_FFFFi32.to_be_bytes())
        .await
        .unwrap();

    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'E');
    assert_eq!(sqlstate(&payload), "08P01");
    client.expect_eof().await;
}

// --- extended query cycle ---

/// Echoes bound parameters back as a single text row.
struct EchoHandler;

impl Handler for EchoHandler {
    fn on_describe(&self, session: &mut Session, describe: &DescribeMessage) -> HandlerOutcome {
        if describe.target == TargetKind::Portal {
            let columns = session
                .get_portal(&describe.name)
                .map(|p| p.param_values.len())
                .unwrap_or(0);
            session.send(BackendMessage::RowDescription {
                fields: (0..columns)
                    .map(|i| {
                        FieldDescription::text_column(format!("c{}", i + 1), type_oid::TEXT, -1)
                    })
                    .collect(),
            });
            return Ok(HandlerAction::Continue);
        }

        session.send(BackendMessage::NoData);
        Ok(HandlerAction::Continue)
    }

    fn on_execute(&self, session: &mut Session, execute: &ExecuteMessage) -> HandlerOutcome {
        let values: Vec<DataValue> = session
            .get_portal(&execute.portal)
            .map(|portal| {
                portal
                    .param_values
                    .iter()
                    .map(|v| match v {
                        Some(bytes) => DataValue::Data(bytes.clone()),
                        None => DataValue::Null,
                    })
                    .collect()
            })
            .unwrap_or_default();

        session.send(BackendMessage::DataRow { values });
        session.send(BackendMessage::CommandComplete {
            tag: "SELECT 1".to_string(),
        });
        Ok(HandlerAction::Continue)
    }
}

fn parse_body(name: &str, query: &str, param_types: &[i32]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    body.extend_from_slice(query.as_bytes());
    body.push(0);
    body.extend_from_slice(&(param_types.len() as i16).to_be_bytes());
    for oid in param_types {
        body.extend_from_slice(&oid.to_be_bytes());
    }
    body
}

fn bind_body(portal: &str, statement: &str, params: &[Option<&[u8]>]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(portal.as_bytes());
    body.push(0);
    body.extend_from_slice(statement.as_bytes());
    body.push(0);
    body.extend_from_slice(&1i16.to_be_bytes());
    body.extend_from_slice(&0i16.to_be_bytes()); // all text
    body.extend_from_slice(&(params.len() as i16).to_be_bytes());
    for param in params {
        match param {
            Some(bytes) => {
                body.extend_from_slice(&(bytes.len() as i32).to_be_bytes());
                body.extend_from_slice(bytes);
            }
            None => body.extend_from_slice(&(-1i32).to_be_bytes()),
        }
    }
    body.extend_from_slice(&1i16.to_be_bytes());
    body.extend_from_slice(&0i16.to_be_bytes());
    body
}

fn describe_body(target: u8, name: &str) -> Vec<u8> {
    let mut body = vec![target];
    body.extend_from_slice(name.as_bytes());
    body.push(0);
    body
}

fn execute_body(portal: &str, max_rows: i32) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(portal.as_bytes());
    body.push(0);
    body.extend_from_slice(&max_rows.to_be_bytes());
    body
}

#[tokio::test]
async fn extended_burst_parse_bind_describe_execute_sync() {
    let port = start_server(ServerConfig::default(), Arc::new(EchoHandler)).await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client
        .send_typed(b'P', &parse_body("s", "SELECT $1::int", &[23]))
        .await;
    client
        .send_typed(b'B', &bind_body("", "s", &[Some(b"42".as_slice())]))
        .await;
    client.send_typed(b'D', &describe_body(b'P', "")).await;
    client.send_typed(b'E', &execute_body("", 0)).await;
    client.send_typed(b'S', &[]).await;

    let frames = client.read_until_ready().await;
    let types: Vec<u8> = frames.iter().map(|(ty, _)| *ty).collect();
    assert_eq!(types, vec![b'1', b'2', b'T', b'D', b'C', b'Z']);

    // DataRow carries the bound value back.
    let data_row = &frames[3].1;
    assert_eq!(&data_row[0..2], &1i16.to_be_bytes());
    assert_eq!(&data_row[2..6], &2i32.to_be_bytes());
    assert_eq!(&data_row[6..8], b"42");

    assert_eq!(&frames[4].1, b"SELECT 1\0");
    assert_eq!(frames[5].1, vec![b'I']);
}

#[tokio::test]
async fn describe_statement_reports_parameter_types() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client
        .send_typed(b'P', &parse_body("s", "SELECT $1::int", &[23]))
        .await;
    client.send_typed(b'D', &describe_body(b'S', "s")).await;
    client.send_typed(b'S', &[]).await;

    let frames = client.read_until_ready().await;
    let types: Vec<u8> = frames.iter().map(|(ty, _)| *ty).collect();
    assert_eq!(types, vec![b'1', b't', b'n', b'Z']);

    // ParameterDescription: count 1, oid 23.
    let params = &frames[1].1;
    assert_eq!(&params[0..2], &1i16.to_be_bytes());
    assert_eq!(&params[2..6], &23i32.to_be_bytes());
}

#[tokio::test]
async fn named_statement_survives_sync_unnamed_does_not() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_typed(b'P', &parse_body("named", "SELECT 1", &[])).await;
    client.send_typed(b'P', &parse_body("", "SELECT 2", &[])).await;
    client.send_typed(b'S', &[]).await;
    let frames = client.read_until_ready().await;
    assert_eq!(
        frames.iter().map(|(ty, _)| *ty).collect::<Vec<_>>(),
        vec![b'1', b'1', b'Z']
    );

    // The named statement can still be described after Sync...
    client.send_typed(b'D', &describe_body(b'S', "named")).await;
    client.send_typed(b'S', &[]).await;
    let frames = client.read_until_ready().await;
    assert_eq!(
        frames.iter().map(|(ty, _)| *ty).collect::<Vec<_>>(),
        vec![b't', b'n', b'Z']
    );

    // ...while the unnamed one is gone.
    client.send_typed(b'D', &describe_body(b'S', "")).await;
    client.send_typed(b'S', &[]).await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'E');
    assert_eq!(sqlstate(&frames[0].1), "26000");
    assert_eq!(frames.last().unwrap().0, b'Z');
}

// --- errors inside an extended burst ---

/// Rejects every Parse with a syntax error.
struct SyntaxErrorHandler;

impl Handler for SyntaxErrorHandler {
    fn on_parse(&self, _session: &mut Session, parse: &ParseMessage) -> HandlerOutcome {
        Err(ErrorInfo::new(
            sql_state::SYNTAX_ERROR,
            format!("syntax error at or near \"{}\"", parse.query),
        ))
    }
}

#[tokio::test]
async fn error_mid_burst_discards_until_sync() {
    let port = start_server(ServerConfig::default(), Arc::new(SyntaxErrorHandler)).await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_typed(b'P', &parse_body("s", "SELEC 1", &[])).await;
    client
        .send_typed(b'B', &bind_body("", "s", &[Some(b"42".as_slice())]))
        .await;
    client.send_typed(b'D', &describe_body(b'P', "")).await;
    client.send_typed(b'E', &execute_body("", 0)).await;
    client.send_typed(b'S', &[]).await;

    let frames = client.read_until_ready().await;
    assert_eq!(frames.len(), 2, "one ErrorResponse, one ReadyForQuery");
    assert_eq!(frames[0].0, b'E');
    assert_eq!(sqlstate(&frames[0].1), "42601");
    assert_eq!(error_field(&frames[0].1, b'S').unwrap(), "ERROR");
    assert_eq!(frames[1].0, b'Z');
    assert_eq!(frames[1].1, vec![b'I']);
}

#[tokio::test]
async fn bind_to_missing_statement_reports_26000() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client
        .send_typed(b'B', &bind_body("", "nope", &[Some(b"1".as_slice())]))
        .await;
    client.send_typed(b'S', &[]).await;

    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'E');
    assert_eq!(sqlstate(&frames[0].1), "26000");
    assert_eq!(frames.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn execute_missing_portal_reports_34000() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_typed(b'E', &execute_body("ghost", 0)).await;
    client.send_typed(b'S', &[]).await;

    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'E');
    assert_eq!(sqlstate(&frames[0].1), "34000");
    assert_eq!(frames.last().unwrap().0, b'Z');
}

// --- cancel requests ---

#[tokio::test]
async fn cancel_request_flags_target_session() {
    let port = start_default_server().await;

    let mut session_a = TestClient::connect(port).await;
    let (pid, secret) = session_a.handshake("u").await;

    // Cancel on a separate connection: no reply bytes, then close.
    let mut canceller = TestClient::connect(port).await;
    let mut body = Vec::new();
    body.extend_from_slice(&pid.to_be_bytes());
    body.extend_from_slice(&secret.to_be_bytes());
    canceller.send_untyped(CANCEL_REQUEST, &body).await;
    canceller.expect_eof().await;

    // The flagged session reports 57014 at its next ReadyForQuery.
    session_a.send_query("SELECT 1").await;
    let frames = session_a.read_until_ready().await;
    let error = frames
        .iter()
        .find(|(ty, _)| *ty == b'E')
        .expect("expected ErrorResponse after cancel");
    assert_eq!(sqlstate(&error.1), "57014");
    assert_eq!(frames.last().unwrap().0, b'Z');

    // The flag is consumed; the next cycle is clean.
    session_a.send_query("SELECT 1").await;
    let frames = session_a.read_until_ready().await;
    assert!(frames.iter().all(|(ty, _)| *ty != b'E'));
}

#[tokio::test]
async fn cancel_with_wrong_secret_is_ignored() {
    let port = start_default_server().await;

    let mut session_a = TestClient::connect(port).await;
    let (pid, secret) = session_a.handshake("u").await;

    let mut canceller = TestClient::connect(port).await;
    let mut body = Vec::new();
    body.extend_from_slice(&pid.to_be_bytes());
    body.extend_from_slice(&secret.wrapping_add(1).to_be_bytes());
    canceller.send_untyped(CANCEL_REQUEST, &body).await;
    canceller.expect_eof().await;

    session_a.send_query("SELECT 1").await;
    let frames = session_a.read_until_ready().await;
    assert!(frames.iter().all(|(ty, _)| *ty != b'E'));
}

// --- terminate ---

#[tokio::test]
async fn terminate_closes_without_reply() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_typed(b'X', &[]).await;
    client.expect_eof().await;
}

// --- protocol robustness ---

#[tokio::test]
async fn unknown_message_type_reports_08p01_and_recovers() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_typed(b'z', b"junk").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'E');
    assert_eq!(sqlstate(&frames[0].1), "08P01");
    assert_eq!(frames.last().unwrap().0, b'Z');

    // The session is still usable.
    client.send_query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn frame_split_across_writes_is_reassembled() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    let mut frame = Vec::new();
    frame.push(b'Q');
    frame.extend_from_slice(&13i32.to_be_bytes());
    frame.extend_from_slice(b"SELECT 1\0");

    let (first, second) = frame.split_at(3);
    client.stream.write_all(first).await.unwrap();
    client.stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.stream.write_all(second).await.unwrap();

    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'I');
    assert_eq!(frames.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn pipelined_queries_get_one_ready_each() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_query("SELECT 1").await;
    client.send_query("SELECT 2").await;

    let first = client.read_until_ready().await;
    let second = client.read_until_ready().await;
    assert_eq!(first.iter().filter(|(ty, _)| *ty == b'Z').count(), 1);
    assert_eq!(second.iter().filter(|(ty, _)| *ty == b'Z').count(), 1);
}

// --- transaction status tracking ---

#[tokio::test]
async fn begin_commit_move_transaction_status() {
    let port = start_default_server().await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_query("BEGIN").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.last().unwrap().1, vec![b'T']);

    client.send_query("SELECT 1").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.last().unwrap().1, vec![b'T']);

    client.send_query("COMMIT").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.last().unwrap().1, vec![b'I']);
}

/// Errors on demand, for transaction-failure tests.
struct FailingQueryHandler;

impl Handler for FailingQueryHandler {
    fn on_query(&self, session: &mut Session, sql: &str) -> HandlerOutcome {
        if sql.contains("boom") {
            return Err(ErrorInfo::new(sql_state::SYNTAX_ERROR, "boom"));
        }
        session.send(BackendMessage::EmptyQueryResponse);
        Ok(HandlerAction::Continue)
    }
}

#[tokio::test]
async fn error_in_transaction_marks_it_failed() {
    let port = start_server(ServerConfig::default(), Arc::new(FailingQueryHandler)).await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_query("BEGIN").await;
    client.read_until_ready().await;

    client.send_query("boom").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'E');
    assert_eq!(frames.last().unwrap().1, vec![b'E'], "failed transaction status");

    client.send_query("ROLLBACK").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames.last().unwrap().1, vec![b'I']);
}

// --- resource limits ---

#[tokio::test]
async fn connection_cap_accepts_and_closes() {
    let config = ServerConfig {
        max_connections: 1,
        ..Default::default()
    };
    let port = start_server(config, Arc::new(pgmock::handler::DefaultHandler)).await;

    let mut first = TestClient::connect(port).await;
    first.handshake("u").await;

    let mut second = TestClient::connect(port).await;
    second.expect_eof().await;

    // The first session is unaffected.
    first.send_query("SELECT 1").await;
    assert_eq!(first.read_until_ready().await.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn slot_freed_when_session_ends() {
    let config = ServerConfig {
        max_connections: 1,
        ..Default::default()
    };
    let port = start_server(config, Arc::new(pgmock::handler::DefaultHandler)).await;

    let mut first = TestClient::connect(port).await;
    first.handshake("u").await;
    first.send_typed(b'X', &[]).await;
    first.expect_eof().await;

    // Give the server a moment to unregister the session.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let mut second = TestClient::connect(port).await;
    second.handshake("u").await;
}

/// Floods the client with a row larger than the write high-water mark.
struct FloodingHandler;

impl Handler for FloodingHandler {
    fn on_query(&self, session: &mut Session, _sql: &str) -> HandlerOutcome {
        session.send(BackendMessage::DataRow {
            values: vec![DataValue::Data(vec![b'x'; 4096])],
        });
        Ok(HandlerAction::Continue)
    }
}

#[tokio::test]
async fn write_high_water_tears_down_session() {
    let config = ServerConfig {
        write_high_water: 1024,
        ..Default::default()
    };
    let port = start_server(config, Arc::new(FloodingHandler)).await;
    let mut client = TestClient::connect(port).await;
    client.handshake("u").await;

    client.send_query("SELECT oversized").await;
    client.expect_eof().await;
}

#[tokio::test]
async fn stalled_startup_times_out_without_reply() {
    let config = ServerConfig {
        startup_timeout: Duration::from_millis(200),
        ..Default::default()
    };
    let port = start_server(config, Arc::new(pgmock::handler::DefaultHandler)).await;

    let mut client = TestClient::connect(port).await;
    // Send nothing; the server must close with no reply.
    client.expect_eof().await;
}

// --- authentication exchange ---

/// Demands a cleartext password and checks it.
struct PasswordHandler;

impl Handler for PasswordHandler {
    fn on_startup(
        &self,
        session: &mut Session,
        _params: &pgmock::protocol::StartupParameters,
    ) -> HandlerOutcome {
        session.send(BackendMessage::Authentication(
            pgmock::protocol::AuthenticationRequest::CleartextPassword,
        ));
        Ok(HandlerAction::Continue)
    }

    fn on_password(&self, _session: &mut Session, password: &str) -> HandlerOutcome {
        if password == "sekret" {
            Ok(HandlerAction::Continue)
        } else {
            Err(ErrorInfo::new(
                sql_state::INVALID_AUTHORIZATION,
                "password authentication failed",
            )
            .with_severity("FATAL"))
        }
    }
}

#[tokio::test]
async fn cleartext_password_exchange_succeeds() {
    let port = start_server(ServerConfig::default(), Arc::new(PasswordHandler)).await;
    let mut client = TestClient::connect(port).await;

    client.send_startup("u", "u").await;

    // AuthenticationCleartextPassword challenge.
    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'R');
    assert_eq!(payload, vec![0, 0, 0, 3]);

    client.send_typed(b'p', b"sekret\0").await;
    let frames = client.read_until_ready().await;
    assert_eq!(frames[0].0, b'R');
    assert_eq!(frames[0].1, vec![0, 0, 0, 0]);
    assert_eq!(frames.last().unwrap().0, b'Z');
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let port = start_server(ServerConfig::default(), Arc::new(PasswordHandler)).await;
    let mut client = TestClient::connect(port).await;

    client.send_startup("u", "u").await;
    let (ty, _) = client.read_frame().await;
    assert_eq!(ty, b'R');

    client.send_typed(b'p', b"wrong\0").await;
    let (ty, payload) = client.read_frame().await;
    assert_eq!(ty, b'E');
    assert_eq!(sqlstate(&payload), "28000");
    assert_eq!(error_field(&payload, b'S').unwrap(), "FATAL");
    client.expect_eof().await;
}
