//! Pluggable application logic.
//!
//! Every inbound message variant is routed to one method of the [`Handler`]
//! trait. Each method has a default body that produces the minimal
//! conformant response, so `DefaultHandler` (or any partial override) yields
//! a server that unmodified PostgreSQL clients can talk to. Installing
//! behavior is swapping the handler implementation — there are no nullable
//! callback slots.
//!
//! Handlers run to completion on the connection's task and must not block:
//! they enqueue response frames through [`Session::send`] and return. The
//! connection driver writes the queued frames afterwards, in order, and owns
//! every ReadyForQuery decision.
//!
//! ## Errors
//!
//! Returning `Err(ErrorInfo)` reports an application error: the core
//! forwards it as an ErrorResponse and, inside an extended-query burst,
//! discards everything until the next Sync. A `FATAL` severity closes the
//! session after the response is flushed, as does returning
//! [`HandlerAction::FatalSession`] without an error frame.
//!
//! ## Bookkeeping guarantees
//!
//! Before a handler method runs, the core has already validated and updated
//! the session's statement/portal tables: `on_parse` may look up its
//! freshly stored statement (e.g. to attach a tag), `on_bind`/`on_describe`/
//! `on_execute` are only invoked for names that exist, and missing names
//! have produced the conventional `26000`/`34000` errors without involving
//! the handler.

use crate::protocol::{
    BackendMessage, BindMessage, CloseMessage, DescribeMessage, ErrorInfo, ExecuteMessage,
    ParseMessage, StartupParameters, sql_state,
};
use crate::session::Session;

/// What the connection driver should do after a handler returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Keep serving the session.
    Continue,
    /// Flush queued frames, then close the connection.
    FatalSession,
}

/// Result of one handler invocation.
pub type HandlerOutcome = Result<HandlerAction, ErrorInfo>;

/// Application logic for one server instance.
///
/// Implementations are shared across connections (`Arc<dyn Handler>`), so
/// per-session state belongs in the [`Session`] (statements, portals, the
/// opaque statement tag) rather than in the handler itself.
pub trait Handler: Send + Sync {
    /// A client completed the startup packet. Enqueue an
    /// [`AuthenticationRequest`](crate::protocol::AuthenticationRequest)
    /// challenge (cleartext, MD5, SASL) to demand credentials; enqueue
    /// nothing to admit the session without one.
    fn on_startup(&self, _session: &mut Session, _params: &StartupParameters) -> HandlerOutcome {
        Ok(HandlerAction::Continue)
    }

    /// The response to an authentication challenge. Returning `Ok` accepts
    /// the credentials; `Err` rejects them and closes the session.
    fn on_password(&self, _session: &mut Session, _password: &str) -> HandlerOutcome {
        Ok(HandlerAction::Continue)
    }

    /// A simple query ('Q'). The handler may emit any number of
    /// (RowDescription, DataRow*, CommandComplete) groups, or
    /// EmptyQueryResponse. The core appends the terminating ReadyForQuery.
    fn on_query(&self, session: &mut Session, _sql: &str) -> HandlerOutcome {
        session.send(BackendMessage::EmptyQueryResponse);
        Ok(HandlerAction::Continue)
    }

    /// Parse ('P'). The statement is already stored on the session.
    fn on_parse(&self, session: &mut Session, _parse: &ParseMessage) -> HandlerOutcome {
        session.send(BackendMessage::ParseComplete);
        Ok(HandlerAction::Continue)
    }

    /// Bind ('B'). The portal is already stored on the session.
    fn on_bind(&self, session: &mut Session, _bind: &BindMessage) -> HandlerOutcome {
        session.send(BackendMessage::BindComplete);
        Ok(HandlerAction::Continue)
    }

    /// Describe ('D'). The named statement or portal exists.
    fn on_describe(&self, session: &mut Session, describe: &DescribeMessage) -> HandlerOutcome {
        use crate::protocol::TargetKind;

        if describe.target == TargetKind::Statement {
            let param_types = session
                .get_statement(&describe.name)
                .map(|stmt| stmt.param_types.clone());
            if let Some(param_types) = param_types {
                session.send(BackendMessage::ParameterDescription { param_types });
            }
        }
        session.send(BackendMessage::NoData);
        Ok(HandlerAction::Continue)
    }

    /// Execute ('E'). The named portal exists.
    fn on_execute(&self, session: &mut Session, _execute: &ExecuteMessage) -> HandlerOutcome {
        session.send(BackendMessage::EmptyQueryResponse);
        session.send(BackendMessage::CommandComplete { tag: String::new() });
        Ok(HandlerAction::Continue)
    }

    /// Close ('C'). Invoked before the core drops the statement or portal;
    /// closing a name that does not exist is not an error.
    fn on_close(&self, session: &mut Session, _close: &CloseMessage) -> HandlerOutcome {
        session.send(BackendMessage::CloseComplete);
        Ok(HandlerAction::Continue)
    }

    /// Sync ('S'). The core clears the extended-cycle error state and emits
    /// the ReadyForQuery itself.
    fn on_sync(&self, _session: &mut Session) -> HandlerOutcome {
        Ok(HandlerAction::Continue)
    }

    /// Terminate ('X'). The connection closes with no reply afterwards.
    fn on_terminate(&self, _session: &mut Session) {}

    /// A CancelRequest arrived on a side connection. The core has already
    /// resolved the (pid, secret) pair against the live-session table;
    /// `resolved` reports whether a session was flagged. Observation only —
    /// the cancel connection closes without a reply either way.
    fn on_cancel(&self, _process_id: i32, _secret_key: i32, _resolved: bool) {}

    /// SSLRequest before startup. The core answers 'N' after this hook
    /// returns; a TLS-terminating deployment replaces the listener, not
    /// this reply. Return `FatalSession` to drop clients that insist on TLS.
    fn on_ssl_request(&self) -> HandlerOutcome {
        Ok(HandlerAction::Continue)
    }

    /// A typed frame whose type byte the dispatcher does not know.
    fn on_unknown(&self, _session: &mut Session, ty: u8, _payload: &[u8]) -> HandlerOutcome {
        Err(ErrorInfo::new(
            sql_state::PROTOCOL_VIOLATION,
            format!("unknown message type 0x{:02x}", ty),
        ))
    }
}

/// The all-defaults handler: a conformant server that answers every query
/// with an empty result.
pub struct DefaultHandler;

impl Handler for DefaultHandler {}
