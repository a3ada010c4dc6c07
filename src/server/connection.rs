mod error;

pub use error::ConnectionError;

use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, trace, warn};

use crate::config::ServerConfig;
use crate::handler::{Handler, HandlerAction, HandlerOutcome};
use crate::protocol::{
    BackendMessage, BindMessage, CloseMessage, DescribeMessage, ErrorInfo, ExecuteMessage,
    FrontendMessage, ParseMessage, PostgresCodec, ProtocolError, TargetKind, sql_state,
};
use crate::session::{Portal, PreparedStatement, Session, transaction_status_after};

/// Where the session sits inside the query protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Between cycles; every message type is acceptable.
    Ready,
    /// Inside an extended-query burst (a non-Sync message seen since the
    /// last Sync). Responses are queued but no ReadyForQuery is emitted.
    Extended,
    /// An error occurred mid-burst; everything but Sync and Terminate is
    /// read and discarded until the client resynchronizes.
    ExtendedError,
}

/// Drives one authenticated session through the simple- and extended-query
/// cycles.
///
/// The connection owns the framed socket and the [`Session`]; handlers only
/// ever see the session. All ReadyForQuery frames are emitted here, which
/// keeps the protocol invariant — one per completed Query, one per Sync —
/// in a single place.
pub struct Connection {
    framed: Framed<TcpStream, PostgresCodec>,
    session: Session,
    handler: Arc<dyn Handler>,
    write_high_water: usize,
    phase: Phase,
}

impl Connection {
    pub fn new(
        framed: Framed<TcpStream, PostgresCodec>,
        session: Session,
        handler: Arc<dyn Handler>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            framed,
            session,
            handler,
            write_high_water: config.write_high_water,
            phase: Phase::Ready,
        }
    }

    pub async fn run(mut self) -> Result<(), ConnectionError> {
        loop {
            let message = match self.framed.next().await {
                None => return Ok(()),
                Some(Ok(message)) => message,
                Some(Err(e)) => {
                    // Malformed framing always closes the session.
                    self.send_fatal_protocol_error(&e).await;
                    return Err(e.into());
                }
            };

            self.log_inbound(&message);

            if self.phase == Phase::ExtendedError
                && !matches!(message, FrontendMessage::Sync | FrontendMessage::Terminate)
            {
                continue;
            }

            self.session.begin_dispatch();

            let fatal = match message {
                FrontendMessage::Terminate => {
                    self.handler.on_terminate(&mut self.session);
                    return Ok(());
                }
                FrontendMessage::Query(sql) => self.run_query_cycle(&sql),
                FrontendMessage::Sync => self.run_sync(),
                FrontendMessage::Flush => {
                    self.flush_queued().await?;
                    false
                }
                FrontendMessage::Parse(parse) => self.run_extended(|conn| conn.do_parse(&parse)),
                FrontendMessage::Bind(bind) => self.run_extended(|conn| conn.do_bind(&bind)),
                FrontendMessage::Describe(describe) => {
                    self.run_extended(|conn| conn.do_describe(&describe))
                }
                FrontendMessage::Execute(execute) => {
                    self.run_extended(|conn| conn.do_execute(&execute))
                }
                FrontendMessage::Close(close) => self.run_extended(|conn| conn.do_close(&close)),
                FrontendMessage::Password(_) => {
                    // Legal only during the authentication exchange.
                    self.run_illegal_message("PasswordMessage outside authentication")
                }
                FrontendMessage::CopyData(data) => self.run_unknown(b'd', &data),
                FrontendMessage::CopyDone => self.run_unknown(b'c', &[]),
                FrontendMessage::CopyFail(message) => {
                    let mut payload = message.into_bytes();
                    payload.push(0);
                    self.run_unknown(b'f', &payload)
                }
                FrontendMessage::Unknown { ty, payload } => self.run_unknown(ty, &payload),
            };

            self.flush_queued().await?;

            if fatal {
                return Ok(());
            }
        }
    }

    // --- simple query cycle ---

    /// Runs one simple-query cycle: handler frames, transaction-status
    /// tracking, then exactly one ReadyForQuery.
    fn run_query_cycle(&mut self, sql: &str) -> bool {
        let fatal = match self.handler.on_query(&mut self.session, sql) {
            Ok(HandlerAction::Continue) => {
                if !self.session.transaction_touched() {
                    if let Some(status) = transaction_status_after(sql) {
                        self.session.apply_transaction_status(status);
                    }
                }
                false
            }
            Ok(HandlerAction::FatalSession) => true,
            Err(info) => self.report_error(info),
        };

        self.phase = Phase::Ready;
        if fatal {
            return true;
        }

        self.report_cancel_if_requested();
        self.send_ready_for_query();
        false
    }

    // --- extended query cycle ---

    /// Runs one eagerly-executed extended-query step. An error parks the
    /// session in `ExtendedError` until Sync, after emitting the
    /// ErrorResponse exactly once.
    fn run_extended(&mut self, step: impl FnOnce(&mut Self) -> HandlerOutcome) -> bool {
        self.phase = Phase::Extended;
        match step(self) {
            Ok(HandlerAction::Continue) => false,
            Ok(HandlerAction::FatalSession) => true,
            Err(info) => {
                let fatal = self.report_error(info);
                self.phase = Phase::ExtendedError;
                fatal
            }
        }
    }

    fn do_parse(&mut self, parse: &ParseMessage) -> HandlerOutcome {
        self.session.put_statement(
            &parse.name,
            PreparedStatement::new(&parse.query, parse.param_types.clone()),
        );
        let outcome = self.handler.on_parse(&mut self.session, parse);
        if outcome.is_err() {
            self.session.close_statement(&parse.name);
        }
        outcome
    }

    fn do_bind(&mut self, bind: &BindMessage) -> HandlerOutcome {
        if self.session.get_statement(&bind.statement).is_none() {
            return Err(ErrorInfo::new(
                sql_state::INVALID_SQL_STATEMENT_NAME,
                format!("prepared statement \"{}\" does not exist", bind.statement),
            ));
        }

        self.session.put_portal(
            &bind.portal,
            Portal {
                statement: bind.statement.clone(),
                param_formats: bind.param_formats.clone(),
                param_values: bind.param_values.clone(),
                result_formats: bind.result_formats.clone(),
            },
        );
        let outcome = self.handler.on_bind(&mut self.session, bind);
        if outcome.is_err() {
            self.session.close_portal(&bind.portal);
        }
        outcome
    }

    fn do_describe(&mut self, describe: &DescribeMessage) -> HandlerOutcome {
        let exists = match describe.target {
            TargetKind::Statement => self.session.get_statement(&describe.name).is_some(),
            TargetKind::Portal => self.session.get_portal(&describe.name).is_some(),
        };
        if !exists {
            return Err(missing_target_error(describe.target, &describe.name));
        }
        self.handler.on_describe(&mut self.session, describe)
    }

    fn do_execute(&mut self, execute: &ExecuteMessage) -> HandlerOutcome {
        if self.session.get_portal(&execute.portal).is_none() {
            return Err(missing_target_error(TargetKind::Portal, &execute.portal));
        }
        self.handler.on_execute(&mut self.session, execute)
    }

    fn do_close(&mut self, close: &CloseMessage) -> HandlerOutcome {
        // Handler runs first so it can still inspect the doomed object.
        let outcome = self.handler.on_close(&mut self.session, close);
        match close.target {
            TargetKind::Statement => self.session.close_statement(&close.name),
            TargetKind::Portal => self.session.close_portal(&close.name),
        }
        outcome
    }

    /// Sync closes the burst: error state and unnamed objects are dropped,
    /// and exactly one ReadyForQuery reports the post-burst status.
    fn run_sync(&mut self) -> bool {
        let fatal = match self.handler.on_sync(&mut self.session) {
            Ok(HandlerAction::Continue) => false,
            Ok(HandlerAction::FatalSession) => true,
            Err(info) => self.report_error(info),
        };

        self.session.clear_unnamed();
        self.phase = Phase::Ready;
        if fatal {
            return true;
        }

        self.report_cancel_if_requested();
        self.send_ready_for_query();
        false
    }

    // --- everything else ---

    fn run_unknown(&mut self, ty: u8, payload: &[u8]) -> bool {
        let outcome = self.handler.on_unknown(&mut self.session, ty, payload);
        self.finish_non_cycle_outcome(outcome)
    }

    fn run_illegal_message(&mut self, message: &str) -> bool {
        let info = ErrorInfo::new(sql_state::PROTOCOL_VIOLATION, message);
        self.finish_non_cycle_outcome(Err(info))
    }

    /// Wraps up a message that is not part of a well-formed cycle. In Ready
    /// the error closes with a ReadyForQuery so the client can continue; in
    /// an extended burst it follows the burst's error discipline.
    fn finish_non_cycle_outcome(&mut self, outcome: HandlerOutcome) -> bool {
        match outcome {
            Ok(HandlerAction::Continue) => false,
            Ok(HandlerAction::FatalSession) => true,
            Err(info) => {
                let fatal = self.report_error(info);
                match self.phase {
                    Phase::Ready => {
                        if !fatal {
                            self.send_ready_for_query();
                        }
                    }
                    Phase::Extended | Phase::ExtendedError => {
                        self.phase = Phase::ExtendedError;
                    }
                }
                fatal
            }
        }
    }

    // --- plumbing ---

    /// Forwards an application error, marking an active transaction failed.
    /// Returns whether the severity mandates closing the session.
    fn report_error(&mut self, info: ErrorInfo) -> bool {
        let fatal = info.is_fatal();
        self.session.fail_transaction();
        self.session.send(info.into());
        fatal
    }

    /// Reports a pending cancellation once, right before ReadyForQuery.
    fn report_cancel_if_requested(&mut self) {
        if self.session.take_cancel() {
            self.session.send(
                ErrorInfo::new(
                    sql_state::QUERY_CANCELED,
                    "canceling statement due to user request",
                )
                .into(),
            );
        }
    }

    fn send_ready_for_query(&mut self) {
        self.session.send(BackendMessage::ReadyForQuery {
            status: self.session.transaction_status(),
        });
    }

    /// Serializes queued frames into the write buffer and flushes. A buffer
    /// that crosses the high-water mark means the peer stopped reading;
    /// the session is torn down rather than buffering without bound.
    async fn flush_queued(&mut self) -> Result<(), ConnectionError> {
        let pid = self.session.process_id();
        let buffer = self.framed.write_buffer_mut();
        for msg in self.session.drain_out() {
            let start = buffer.len();
            msg.encode(buffer);
            trace!(
                pid,
                message = msg.name(),
                r#type = %(msg.ty() as char),
                length = buffer.len() - start - 1,
                "frame sent"
            );
        }

        let buffered = self.framed.write_buffer().len();
        if buffered > self.write_high_water {
            warn!(pid, buffered, "write buffer exceeded high-water mark");
            return Err(ConnectionError::Backpressure { buffered });
        }

        self.framed.flush().await?;
        Ok(())
    }

    /// Reports a framing error and flushes; the connection closes right
    /// after, so delivery failures are irrelevant.
    async fn send_fatal_protocol_error(&mut self, error: &ProtocolError) {
        let info = ErrorInfo::new(sql_state::PROTOCOL_VIOLATION, error.to_string())
            .with_severity("FATAL");
        let _ = self.framed.send(info.into()).await;
    }

    fn log_inbound(&self, message: &FrontendMessage) {
        let pid = self.session.process_id();
        match message {
            FrontendMessage::Query(sql) => {
                debug!(pid, message = "Query", sql = %sql, "frame received")
            }
            FrontendMessage::Parse(p) => debug!(
                pid,
                message = "Parse",
                statement = %p.name,
                query = %p.query,
                params = p.param_types.len(),
                "frame received"
            ),
            FrontendMessage::Bind(b) => debug!(
                pid,
                message = "Bind",
                portal = %b.portal,
                statement = %b.statement,
                params = b.param_values.len(),
                "frame received"
            ),
            FrontendMessage::Describe(d) => debug!(
                pid,
                message = "Describe",
                target = ?d.target,
                name = %d.name,
                "frame received"
            ),
            FrontendMessage::Execute(e) => debug!(
                pid,
                message = "Execute",
                portal = %e.portal,
                max_rows = e.max_rows,
                "frame received"
            ),
            FrontendMessage::Close(c) => debug!(
                pid,
                message = "Close",
                target = ?c.target,
                name = %c.name,
                "frame received"
            ),
            FrontendMessage::Unknown { ty, payload } => warn!(
                pid,
                r#type = %(*ty as char),
                length = payload.len(),
                "unknown frame received"
            ),
            other => debug!(pid, message = other.name(), "frame received"),
        }
    }
}

fn missing_target_error(target: TargetKind, name: &str) -> ErrorInfo {
    match target {
        TargetKind::Statement => ErrorInfo::new(
            sql_state::INVALID_SQL_STATEMENT_NAME,
            format!("prepared statement \"{}\" does not exist", name),
        ),
        TargetKind::Portal => ErrorInfo::new(
            sql_state::INVALID_CURSOR_NAME,
            format!("portal \"{}\" does not exist", name),
        ),
    }
}
