use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

/// A registry of live backend sessions, keyed by process id.
///
/// This is the only state shared across connections. CancelRequests arrive
/// on their own connection and are resolved here: a matching (pid, secret)
/// pair flips the target session's advisory cancel flag. The registry is
/// written only by connection setup/teardown; cancel lookups are reads.
pub struct Registry {
    sessions: Mutex<HashMap<i32, SessionEntry>>,
}

struct SessionEntry {
    secret_key: i32,
    cancel: Arc<AtomicBool>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a session's cancel flag under its (pid, secret) pair.
    pub fn register(&self, process_id: i32, secret_key: i32, cancel: Arc<AtomicBool>) {
        self.sessions
            .lock()
            .insert(process_id, SessionEntry { secret_key, cancel });
    }

    /// Removes a session when its connection terminates.
    pub fn unregister(&self, process_id: i32) {
        self.sessions.lock().remove(&process_id);
    }

    /// Attempts to cancel the session identified by (pid, secret).
    ///
    /// Returns whether a session was flagged. An unknown pid or a wrong
    /// secret is silently ignored — the requester learns nothing either way.
    pub fn cancel(&self, process_id: i32, secret_key: i32) -> bool {
        let sessions = self.sessions.lock();
        match sessions.get(&process_id) {
            Some(entry) if entry.secret_key == secret_key => {
                entry.cancel.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    /// Whether no session is registered.
    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}
