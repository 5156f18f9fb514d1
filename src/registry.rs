use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use lazy_static::lazy_static;
use log::{info, warn};

use crate::session::SessionInner;

lazy_static! {
    static ref GLOBAL: Arc<SessionRegistry> = Arc::new(SessionRegistry::new());
}

/// Book-keeping of open sessions, so a host can close all of them on its way out.
///
/// Sessions register themselves when they open and deregister when they close. The registry
/// only holds weak references: it never keeps a session alive.
///
/// ```no_run
/// # use imap_account::SessionRegistry;
/// // e.g. from the host's termination handler
/// let closed = SessionRegistry::global().close_all();
/// ```
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<u64, Weak<Mutex<SessionInner>>>>,
}

impl SessionRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        SessionRegistry::default()
    }

    /// The process-wide registry that sessions use unless built with another one.
    pub fn global() -> Arc<SessionRegistry> {
        Arc::clone(&GLOBAL)
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<u64, Weak<Mutex<SessionInner>>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn register(&self, id: u64, session: Weak<Mutex<SessionInner>>) {
        let mut sessions = self.sessions();
        sessions.retain(|_, s| s.strong_count() > 0);
        sessions.insert(id, session);
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.sessions().remove(&id);
    }

    /// Close every registered session and empty the registry. Returns how many were closed.
    ///
    /// Errors from individual sessions are logged, not returned.
    pub fn close_all(&self) -> usize {
        // take the entries first: closing a session deregisters it
        let drained: Vec<_> = self.sessions().drain().collect();
        let mut closed = 0;
        for (id, session) in drained {
            let session = match session.upgrade() {
                Some(session) => session,
                None => continue,
            };
            let mut inner = session.lock().unwrap_or_else(PoisonError::into_inner);
            match inner.close() {
                Ok(()) => closed += 1,
                Err(e) => warn!("closing session {} failed: {}", id, e),
            }
        }
        info!("closed {} session(s)", closed);
        closed
    }

    /// Number of registered sessions.
    pub fn len(&self) -> usize {
        self.sessions()
            .values()
            .filter(|s| s.strong_count() > 0)
            .count()
    }

    /// Whether no open session is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
