//! A scripted stand-in for an IMAP server, for session and mailbox view tests.
//!
//! Every successful connection is handed a [`MockStream`] that replays the next script and
//! starts tagging at `a1`, as if login had already happened.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::account::{Account, AccountLocator, AccountOptions};
use crate::client::Client;
use crate::mock_stream::{MockStream, Transcript};
use crate::registry::SessionRegistry;
use crate::session::{Session, Status};
use crate::transport::{Connection, Connector, Diagnostics, Target};

pub(crate) struct ScriptedServer {
    scripts: Mutex<VecDeque<String>>,
    transcripts: Mutex<Vec<Transcript>>,
    attempts: Mutex<Vec<(u16, String)>>,
    refuse_next: AtomicBool,
}

impl ScriptedServer {
    /// A server accepting one connection per script; further connections are refused.
    pub(crate) fn new(scripts: &[&str]) -> Self {
        ScriptedServer {
            scripts: Mutex::new(scripts.iter().map(|s| s.to_string()).collect()),
            transcripts: Mutex::new(Vec::new()),
            attempts: Mutex::new(Vec::new()),
            refuse_next: AtomicBool::new(false),
        }
    }

    /// Every (port, configuration) tried, in order.
    pub(crate) fn attempts(&self) -> Vec<(u16, String)> {
        self.attempts.lock().unwrap().clone()
    }

    /// Refuse the next connection without using up a script.
    pub(crate) fn refuse_next(&self) {
        self.refuse_next.store(true, Ordering::SeqCst);
    }

    /// What the client sent on the `n`th accepted connection.
    pub(crate) fn transcript(&self, n: usize) -> Transcript {
        self.transcripts.lock().unwrap()[n].clone()
    }
}

impl Connector for ScriptedServer {
    fn connect(&self, target: &Target<'_>) -> Result<Connection, Diagnostics> {
        self.attempts
            .lock()
            .unwrap()
            .push((target.port, target.configuration.to_string()));
        let script = if self.refuse_next.swap(false, Ordering::SeqCst) {
            None
        } else {
            self.scripts.lock().unwrap().pop_front()
        };
        match script {
            Some(script) => {
                let stream = MockStream::new(script);
                self.transcripts.lock().unwrap().push(stream.transcript());
                Ok(Client::new(Box::new(stream)))
            }
            None => Err(Diagnostics::line(format!(
                "Connection failed to {},{}: Connection refused",
                target.host, target.port
            ))),
        }
    }
}

pub(crate) fn account() -> Account {
    let locator = AccountLocator::new("imap.example.com", "fred", "s3cret").unwrap();
    Account::new(locator, AccountOptions::default()).unwrap()
}

/// An open session on its own registry, connected to a server replaying `scripts`.
pub(crate) fn open_session(
    scripts: &[&str],
) -> (Session, Arc<ScriptedServer>, Arc<SessionRegistry>) {
    let server = Arc::new(ScriptedServer::new(scripts));
    let registry = Arc::new(SessionRegistry::new());
    let session = Session::builder(account())
        .registry(registry.clone())
        .connector(server.clone())
        .fast_negotiation(true)
        .build();
    session.open(None).unwrap();
    assert_eq!(session.status(), Status::Open);
    (session, server, registry)
}
