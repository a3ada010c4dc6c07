use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, warn};

use crate::config::ServerConfig;
use crate::handler::{Handler, HandlerAction};
use crate::protocol::{
    AuthenticationRequest, BackendMessage, ErrorInfo, FrontendMessage, PostgresCodec,
    ProtocolError, StartupCodec, StartupMessage, TransactionStatus, sql_state,
};
use crate::server::connection::ConnectionError;
use crate::server::registry::Registry;
use crate::session::Session;

/// Outcome of the startup negotiation.
pub enum HandshakeResult {
    /// Handshake completed; the connection moves to the query phase.
    Success {
        framed: Framed<TcpStream, PostgresCodec>,
        session: Session,
    },
    /// The connection is done: it carried a CancelRequest, was rejected, or
    /// went away before authenticating. Nothing further to run.
    Finished,
}

/// Startup-phase negotiation for a single client connection.
///
/// Walks the client through SSL/GSS rejection, CancelRequest routing, the
/// startup packet, and the optional password exchange, then hands a ready
/// session back to the listener. The whole exchange is bounded by
/// `startup_timeout`; a client that stalls mid-handshake is closed with no
/// reply.
pub struct Handshake {
    framed: Framed<TcpStream, StartupCodec>,
    pid: i32,
    config: Arc<ServerConfig>,
    handler: Arc<dyn Handler>,
    registry: Arc<Registry>,
}

impl Handshake {
    pub fn new(
        socket: TcpStream,
        pid: i32,
        config: Arc<ServerConfig>,
        handler: Arc<dyn Handler>,
        registry: Arc<Registry>,
    ) -> Self {
        let codec = StartupCodec::with_max_frame_len(config.max_frame_len);
        Self {
            framed: Framed::new(socket, codec),
            pid,
            config,
            handler,
            registry,
        }
    }

    pub async fn run(self) -> Result<HandshakeResult, ConnectionError> {
        let timeout = self.config.startup_timeout;
        match tokio::time::timeout(timeout, self.negotiate()).await {
            Ok(result) => result,
            Err(_) => Err(ConnectionError::StartupTimeout),
        }
    }

    async fn negotiate(mut self) -> Result<HandshakeResult, ConnectionError> {
        loop {
            let message = match self.framed.next().await {
                None => return Ok(HandshakeResult::Finished),
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    self.reject(&e).await;
                    return Err(e.into());
                }
            };

            match message {
                StartupMessage::SslRequest => {
                    debug!(pid = self.pid, "SSLRequest received");
                    match self.handler.on_ssl_request() {
                        Ok(HandlerAction::Continue) => {}
                        Ok(HandlerAction::FatalSession) => return Ok(HandshakeResult::Finished),
                        Err(info) => {
                            self.send_error(info).await;
                            return Ok(HandshakeResult::Finished);
                        }
                    }
                    // SSL unsupported by the core; a TLS deployment swaps the listener.
                    self.framed.get_mut().write_all(b"N").await?;
                    self.framed.get_mut().flush().await?;
                }
                StartupMessage::GssEncRequest => {
                    debug!(pid = self.pid, "GSSENCRequest received");
                    self.framed.get_mut().write_all(b"N").await?;
                    self.framed.get_mut().flush().await?;
                }
                StartupMessage::CancelRequest {
                    process_id,
                    secret_key,
                } => {
                    // No reply frame is ever sent on a cancel connection.
                    let resolved = self.registry.cancel(process_id, secret_key);
                    debug!(
                        pid = self.pid,
                        target = process_id,
                        resolved,
                        "CancelRequest received"
                    );
                    self.handler.on_cancel(process_id, secret_key, resolved);
                    return Ok(HandshakeResult::Finished);
                }
                StartupMessage::Startup {
                    protocol_version,
                    parameters,
                } => {
                    debug!(
                        pid = self.pid,
                        version = protocol_version,
                        user = %parameters.user,
                        database = %parameters.database_or_user(),
                        "startup packet received"
                    );
                    return self.authenticate(parameters).await;
                }
            }
        }
    }

    /// Runs the authentication exchange and sends the ready bundle.
    async fn authenticate(
        self,
        parameters: crate::protocol::StartupParameters,
    ) -> Result<HandshakeResult, ConnectionError> {
        let pid = self.pid;
        let secret_key = rand::random::<i32>();
        let mut session = Session::new(pid, secret_key, parameters.clone());

        let handler = Arc::clone(&self.handler);
        let config = Arc::clone(&self.config);

        // Startup-class framing is over; every further frame is typed.
        let mut framed = self.framed.map_codec(StartupCodec::ready);

        match handler.on_startup(&mut session, &parameters) {
            Ok(HandlerAction::Continue) => {}
            Ok(HandlerAction::FatalSession) => {
                flush_queued(&mut framed, &mut session).await?;
                return Ok(HandshakeResult::Finished);
            }
            Err(info) => {
                send_error(&mut framed, info).await;
                return Ok(HandshakeResult::Finished);
            }
        }

        let challenged = session.has_queued(|m| {
            matches!(m, BackendMessage::Authentication(r) if *r != AuthenticationRequest::Ok)
        });

        if challenged {
            flush_queued(&mut framed, &mut session).await?;

            match framed.next().await {
                Some(Ok(FrontendMessage::Password(password))) => {
                    match handler.on_password(&mut session, &password) {
                        Ok(HandlerAction::Continue) => {}
                        Ok(HandlerAction::FatalSession) => {
                            flush_queued(&mut framed, &mut session).await?;
                            return Ok(HandshakeResult::Finished);
                        }
                        Err(info) => {
                            warn!(pid, user = %session.user(), "authentication failed");
                            send_error(&mut framed, info).await;
                            return Ok(HandshakeResult::Finished);
                        }
                    }
                }
                Some(Ok(FrontendMessage::Terminate)) | None => {
                    return Ok(HandshakeResult::Finished);
                }
                Some(Ok(other)) => {
                    debug!(pid, message = other.name(), "expected PasswordMessage");
                    let info = ErrorInfo::new(
                        sql_state::PROTOCOL_VIOLATION,
                        "expected PasswordMessage during authentication",
                    )
                    .with_severity("FATAL");
                    send_error(&mut framed, info).await;
                    return Ok(HandshakeResult::Finished);
                }
                Some(Err(e)) => {
                    send_error(
                        &mut framed,
                        protocol_error_info(&e),
                    )
                    .await;
                    return Err(e.into());
                }
            }
        }

        // Authenticated: AuthenticationOk, the ParameterStatus set,
        // BackendKeyData, and the first ReadyForQuery.
        framed
            .feed(BackendMessage::Authentication(AuthenticationRequest::Ok))
            .await?;
        for (name, value) in &config.parameters {
            framed
                .feed(BackendMessage::ParameterStatus {
                    name: name.clone(),
                    value: value.clone(),
                })
                .await?;
        }
        framed
            .feed(BackendMessage::BackendKeyData {
                process_id: pid,
                secret_key,
            })
            .await?;

        // Anything the password handler queued (notices etc.) goes out
        // before the session is declared ready.
        for msg in session.drain_out() {
            framed.feed(msg).await?;
        }

        framed
            .feed(BackendMessage::ReadyForQuery {
                status: TransactionStatus::Idle,
            })
            .await?;
        framed.flush().await?;

        Ok(HandshakeResult::Success { framed, session })
    }

    /// Reports a startup-phase protocol error before closing.
    async fn reject(mut self, error: &ProtocolError) {
        let info = protocol_error_info(error);
        let _ = self.framed.send(info.into()).await;
    }

    async fn send_error(&mut self, info: ErrorInfo) {
        let _ = self.framed.send(info.into()).await;
    }
}

/// Maps a startup decode failure to the ErrorResponse the client sees.
fn protocol_error_info(error: &ProtocolError) -> ErrorInfo {
    match error {
        ProtocolError::MissingParameter(name) => ErrorInfo::new(
            sql_state::INVALID_AUTHORIZATION,
            format!("startup packet is missing the {} parameter", name),
        )
        .with_severity("FATAL"),
        ProtocolError::UnsupportedProtocolVersion(version) => ErrorInfo::new(
            sql_state::PROTOCOL_VIOLATION,
            format!("unsupported protocol version {}", version),
        )
        .with_severity("FATAL"),
        other => ErrorInfo::new(sql_state::PROTOCOL_VIOLATION, other.to_string())
            .with_severity("FATAL"),
    }
}

async fn send_error(framed: &mut Framed<TcpStream, PostgresCodec>, info: ErrorInfo) {
    let _ = framed.send(info.into()).await;
}

async fn flush_queued(
    framed: &mut Framed<TcpStream, PostgresCodec>,
    session: &mut Session,
) -> Result<(), std::io::Error> {
    for msg in session.drain_out() {
        framed.feed(msg).await?;
    }
    framed.flush().await
}
