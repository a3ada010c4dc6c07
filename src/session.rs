//! Per-connection session state.
//!
//! A [`Session`] is the view of one client connection that handlers operate
//! on: identity established at startup, the transaction status indicator,
//! the outbound frame queue, and the named prepared statements and portals
//! of the extended query protocol. The session never touches the socket;
//! frames enqueued here are drained and written by the connection driver.

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::protocol::{BackendMessage, FormatCode, StartupParameters, TransactionStatus};

/// A prepared statement stored on the session.
///
/// The core records the query text and parameter types from Parse; `tag` is
/// an opaque slot for whatever the installed handler wants to associate with
/// the statement (a parsed AST, a plan id, ...).
pub struct PreparedStatement {
    /// Query text from the Parse message.
    pub query: String,
    /// Parameter type OIDs from the Parse message (zero = unspecified).
    pub param_types: Vec<i32>,
    /// Handler-owned token.
    pub tag: Option<Box<dyn Any + Send>>,
}

impl PreparedStatement {
    pub fn new(query: impl Into<String>, param_types: Vec<i32>) -> Self {
        Self {
            query: query.into(),
            param_types,
            tag: None,
        }
    }
}

impl std::fmt::Debug for PreparedStatement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreparedStatement")
            .field("query", &self.query)
            .field("param_types", &self.param_types)
            .field("tag", &self.tag.as_ref().map(|_| ".."))
            .finish()
    }
}

/// A portal (bound prepared statement) stored on the session.
///
/// A portal may be re-executed until it is closed, its statement is closed,
/// or a new Bind reuses its name.
#[derive(Debug, Clone)]
pub struct Portal {
    /// Name of the source prepared statement.
    pub statement: String,
    /// Parameter format codes from Bind.
    pub param_formats: Vec<FormatCode>,
    /// Bound parameter values (None = NULL).
    pub param_values: Vec<Option<Vec<u8>>>,
    /// Result column format codes from Bind.
    pub result_formats: Vec<FormatCode>,
}

/// The state of one authenticated client connection.
pub struct Session {
    process_id: i32,
    secret_key: i32,
    parameters: StartupParameters,
    transaction: TransactionStatus,
    transaction_touched: bool,
    cancel: Arc<AtomicBool>,
    out: Vec<BackendMessage>,
    /// Named prepared statements. Key "" is the unnamed statement.
    statements: HashMap<String, PreparedStatement>,
    /// Named portals. Key "" is the unnamed portal.
    portals: HashMap<String, Portal>,
}

impl Session {
    /// Creates a session for a connection that completed startup.
    pub fn new(process_id: i32, secret_key: i32, parameters: StartupParameters) -> Self {
        Self {
            process_id,
            secret_key,
            parameters,
            transaction: TransactionStatus::Idle,
            transaction_touched: false,
            cancel: Arc::new(AtomicBool::new(false)),
            out: Vec::new(),
            statements: HashMap::new(),
            portals: HashMap::new(),
        }
    }

    /// Backend process id, unique across live sessions.
    pub fn process_id(&self) -> i32 {
        self.process_id
    }

    /// Cancel secret established at session start.
    pub fn secret_key(&self) -> i32 {
        self.secret_key
    }

    /// Authenticated user name.
    pub fn user(&self) -> &str {
        &self.parameters.user
    }

    /// Selected database, defaulting to the user name.
    pub fn database(&self) -> &str {
        self.parameters.database_or_user()
    }

    /// All parameters sent in the startup packet.
    pub fn startup_parameters(&self) -> &StartupParameters {
        &self.parameters
    }

    // --- outbound queue ---

    /// Enqueues a backend message. The connection driver writes queued
    /// frames, in order, once the current dispatch returns.
    pub fn send(&mut self, msg: BackendMessage) {
        self.out.push(msg);
    }

    /// Takes every frame enqueued so far.
    pub(crate) fn drain_out(&mut self) -> Vec<BackendMessage> {
        std::mem::take(&mut self.out)
    }

    /// Whether a frame matching `pred` is currently queued.
    pub(crate) fn has_queued(&self, pred: impl Fn(&BackendMessage) -> bool) -> bool {
        self.out.iter().any(pred)
    }

    // --- transaction status ---

    /// Current transaction status, as reported in ReadyForQuery.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction
    }

    /// Sets the transaction status. When called from inside a query handler,
    /// this takes precedence over the core's BEGIN/COMMIT/ROLLBACK sniffing
    /// for that query.
    pub fn set_transaction_status(&mut self, status: TransactionStatus) {
        self.transaction = status;
        self.transaction_touched = true;
    }

    /// Marks the start of a dispatch; clears the handler-touched flag.
    pub(crate) fn begin_dispatch(&mut self) {
        self.transaction_touched = false;
    }

    /// Whether a handler changed the transaction status during this dispatch.
    pub(crate) fn transaction_touched(&self) -> bool {
        self.transaction_touched
    }

    /// Sets the status on the core's behalf, without claiming the dispatch's
    /// status decision for the handler.
    pub(crate) fn apply_transaction_status(&mut self, status: TransactionStatus) {
        self.transaction = status;
    }

    /// Moves an in-progress transaction to the failed state. No-op when idle.
    pub(crate) fn fail_transaction(&mut self) {
        if self.transaction == TransactionStatus::InTransaction {
            self.transaction = TransactionStatus::Failed;
        }
    }

    // --- cancellation ---

    /// Handle used by the registry to flag this session for cancellation.
    pub(crate) fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Whether a CancelRequest has targeted this session. Advisory; long
    /// handlers may poll this and abandon work early.
    pub fn cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Consumes a pending cancellation, returning true at most once per
    /// CancelRequest.
    pub(crate) fn take_cancel(&mut self) -> bool {
        self.cancel.swap(false, Ordering::SeqCst)
    }

    // --- prepared statements and portals ---

    /// Stores a prepared statement, replacing any statement with the same
    /// name. Portals bound to the replaced statement are closed.
    pub fn put_statement(&mut self, name: impl Into<String>, stmt: PreparedStatement) {
        let name = name.into();
        self.close_statement(&name);
        self.statements.insert(name, stmt);
    }

    /// Looks up a prepared statement by name.
    pub fn get_statement(&self, name: &str) -> Option<&PreparedStatement> {
        self.statements.get(name)
    }

    /// Mutable access to a prepared statement (e.g. to attach a tag).
    pub fn get_statement_mut(&mut self, name: &str) -> Option<&mut PreparedStatement> {
        self.statements.get_mut(name)
    }

    /// Closes a prepared statement together with every portal bound to it.
    pub fn close_statement(&mut self, name: &str) {
        if self.statements.remove(name).is_some() {
            self.portals.retain(|_, p| p.statement != name);
        }
    }

    /// Stores a portal. A Bind reusing an existing portal name silently
    /// replaces the old portal.
    pub fn put_portal(&mut self, name: impl Into<String>, portal: Portal) {
        self.portals.insert(name.into(), portal);
    }

    /// Looks up a portal by name.
    pub fn get_portal(&self, name: &str) -> Option<&Portal> {
        self.portals.get(name)
    }

    /// Closes a portal by name.
    pub fn close_portal(&mut self, name: &str) {
        self.portals.remove(name);
    }

    /// Discards the unnamed statement and portal. Called at Sync; named
    /// objects persist until closed explicitly or the session dies.
    pub(crate) fn clear_unnamed(&mut self) {
        self.close_statement("");
        self.close_portal("");
    }
}

/// Transaction status implied by a simple-query command, if any.
///
/// Only the leading keyword matters; the emulator does not parse SQL.
pub fn transaction_status_after(sql: &str) -> Option<TransactionStatus> {
    let first_word = sql
        .trim_start()
        .split(|c: char| c.is_whitespace() || c == ';')
        .next()
        .unwrap_or("");

    if first_word.eq_ignore_ascii_case("BEGIN") {
        Some(TransactionStatus::InTransaction)
    } else if first_word.eq_ignore_ascii_case("COMMIT")
        || first_word.eq_ignore_ascii_case("ROLLBACK")
    {
        Some(TransactionStatus::Idle)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_session() -> Session {
        let parameters = StartupParameters {
            user: "alice".to_string(),
            database: None,
            ..Default::default()
        };
        Session::new(7, 99, parameters)
    }

    fn dummy_stmt() -> PreparedStatement {
        PreparedStatement::new("SELECT 1", vec![])
    }

    fn portal_for(statement: &str) -> Portal {
        Portal {
            statement: statement.to_string(),
            param_formats: vec![],
            param_values: vec![],
            result_formats: vec![],
        }
    }

    #[test]
    fn test_database_defaults_to_user() {
        let session = test_session();
        assert_eq!(session.user(), "alice");
        assert_eq!(session.database(), "alice");
    }

    #[test]
    fn test_statement_lifecycle() {
        let mut session = test_session();

        session.put_statement("test", dummy_stmt());
        assert!(session.get_statement("test").is_some());
        assert!(session.get_statement("nonexistent").is_none());

        session.close_statement("test");
        assert!(session.get_statement("test").is_none());
    }

    #[test]
    fn test_statement_replacement_closes_portals() {
        let mut session = test_session();

        session.put_statement("stmt", dummy_stmt());
        session.put_portal("portal1", portal_for("stmt"));
        assert!(session.get_portal("portal1").is_some());

        // Replacing the statement closes dependent portals
        session.put_statement("stmt", dummy_stmt());
        assert!(session.get_portal("portal1").is_none());
    }

    #[test]
    fn test_bind_replaces_existing_portal() {
        let mut session = test_session();

        session.put_statement("a", dummy_stmt());
        session.put_statement("b", dummy_stmt());
        session.put_portal("p", portal_for("a"));
        session.put_portal("p", portal_for("b"));

        assert_eq!(session.get_portal("p").unwrap().statement, "b");
    }

    #[test]
    fn test_clear_unnamed() {
        let mut session = test_session();

        session.put_statement("", dummy_stmt());
        session.put_statement("named", dummy_stmt());
        session.put_portal("", portal_for(""));
        session.put_portal("named_portal", portal_for("named"));

        session.clear_unnamed();

        assert!(session.get_statement("").is_none());
        assert!(session.get_statement("named").is_some());
        assert!(session.get_portal("").is_none());
        assert!(session.get_portal("named_portal").is_some());
    }

    #[test]
    fn test_cancel_consumed_once() {
        let mut session = test_session();
        assert!(!session.take_cancel());

        session.cancel_flag().store(true, Ordering::SeqCst);
        assert!(session.cancel_requested());
        assert!(session.take_cancel());
        assert!(!session.take_cancel());
        assert!(!session.cancel_requested());
    }

    #[test]
    fn test_fail_transaction_only_when_active() {
        let mut session = test_session();

        session.fail_transaction();
        assert_eq!(session.transaction_status(), TransactionStatus::Idle);

        session.set_transaction_status(TransactionStatus::InTransaction);
        session.fail_transaction();
        assert_eq!(session.transaction_status(), TransactionStatus::Failed);
    }

    #[test]
    fn test_transaction_status_after() {
        assert_eq!(
            transaction_status_after("BEGIN"),
            Some(TransactionStatus::InTransaction)
        );
        assert_eq!(
            transaction_status_after("  begin;"),
            Some(TransactionStatus::InTransaction)
        );
        assert_eq!(
            transaction_status_after("COMMIT"),
            Some(TransactionStatus::Idle)
        );
        assert_eq!(
            transaction_status_after("rollback"),
            Some(TransactionStatus::Idle)
        );
        assert_eq!(transaction_status_after("SELECT 1"), None);
        assert_eq!(transaction_status_after(""), None);
    }
}
