//! Runs against a live server, e.g. greenmail with authentication disabled (users are created on
//! first login, with the password equal to the user name):
//!
//! ```sh
//! docker run -p 3143:3143 -p 3993:3993 greenmail/standalone
//! cargo test --features test-full-imap
//! ```

use std::sync::Arc;

use imap_account::{
    Account, AccountLocator, AccountOptions, Ports, SecurityOption, Session, SessionRegistry,
    Status,
};

fn test_host() -> String {
    std::env::var("TEST_HOST").unwrap_or("127.0.0.1".to_string())
}

fn test_imap_port() -> u16 {
    std::env::var("TEST_IMAP_PORT")
        .unwrap_or("3143".to_string())
        .parse()
        .unwrap_or(3143)
}

fn test_imaps_port() -> u16 {
    std::env::var("TEST_IMAPS_PORT")
        .unwrap_or("3993".to_string())
        .parse()
        .unwrap_or(3993)
}

fn account(user: &str, ports: Vec<u16>) -> Account {
    let locator = AccountLocator::new(test_host(), user, user).unwrap();
    let options = AccountOptions {
        ports: Ports::Many(ports),
        ..Default::default()
    };
    Account::new(locator, options).unwrap()
}

fn session(user: &str, ports: Vec<u16>, registry: &Arc<SessionRegistry>) -> Session {
    let session = Session::builder(account(user, ports))
        .registry(registry.clone())
        .fast_negotiation(true)
        .build();
    session.open(None).unwrap();
    assert!(session.ready(), "could not negotiate with {}", test_host());
    session
}

fn message(subject: &str) -> String {
    format!(
        "From: sender@localhost\r\nTo: receiver@localhost\r\nSubject: {}\r\n\r\nHello.\r\n",
        subject
    )
}

#[test]
fn negotiates_implicit_tls_first() {
    let registry = Arc::new(SessionRegistry::new());
    let session = session(
        "negotiate@localhost",
        vec![test_imaps_port(), test_imap_port()],
        &registry,
    );
    let negotiated = session.negotiated().unwrap();
    assert_eq!(negotiated.port, test_imaps_port());
    assert!(negotiated.configuration.contains(SecurityOption::Ssl));
    session.close().unwrap();
}

#[test]
fn plain_port_never_uses_implicit_tls() {
    let registry = Arc::new(SessionRegistry::new());
    let session = session("plain@localhost", vec![test_imap_port()], &registry);
    let negotiated = session.negotiated().unwrap();
    assert_eq!(negotiated.port, test_imap_port());
    assert!(!negotiated.configuration.contains(SecurityOption::Ssl));
    session.close().unwrap();
}

#[test]
fn append_read_and_delete() {
    let registry = Arc::new(SessionRegistry::new());
    let user = "append@localhost";
    let session = session(user, vec![test_imaps_port()], &registry);

    let mut inbox = session.open_mailbox(None).unwrap();
    assert_eq!(inbox.name(), "INBOX");
    let before = inbox.message_count().unwrap();
    inbox.write(message("first").as_str()).unwrap();
    inbox.write(message("second").as_str()).unwrap();
    assert_eq!(inbox.message_count().unwrap(), before + 2);
    assert_eq!(session.message_count("INBOX").unwrap(), before + 2);

    let mut last = None;
    while let Some(reference) = inbox.read().unwrap() {
        last = Some(reference);
    }
    let last = last.unwrap();
    let header = session.fetch_header(last.mailbox(), last.uid()).unwrap();
    assert!(String::from_utf8_lossy(&header).contains("Subject: second"));

    session.delete("INBOX", last.uid()).unwrap();
    // expunged on close
    session.close().unwrap();

    let session = self::session(user, vec![test_imaps_port()], &registry);
    assert_eq!(session.message_count("INBOX").unwrap(), before + 1);
    assert!(!session
        .message_identifiers("INBOX")
        .unwrap()
        .contains(&last.uid()));
    session.close().unwrap();
}

#[test]
fn lists_mailboxes() {
    let registry = Arc::new(SessionRegistry::new());
    let session = session("list@localhost", vec![test_imaps_port()], &registry);
    let views = session.list_mailboxes("%").unwrap();
    assert!(views.iter().any(|v| v.path().eq_ignore_ascii_case("INBOX")));
    session.close().unwrap();
    assert!(session.list_mailboxes("%").unwrap().is_empty());
}

#[test]
fn close_all_closes_every_session() {
    let registry = Arc::new(SessionRegistry::new());
    let one = session("one@localhost", vec![test_imaps_port()], &registry);
    let two = session("two@localhost", vec![test_imaps_port()], &registry);
    assert_eq!(registry.len(), 2);

    assert_eq!(registry.close_all(), 2);
    assert!(registry.is_empty());
    assert_eq!(one.status(), Status::Closed);
    assert_eq!(two.status(), Status::Closed);
}
