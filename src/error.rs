//! IMAP account error types.

use std::io::Error as IoError;
use std::result;
use std::str::Utf8Error;

use bufstream::IntoInnerError as BufError;
use native_tls::Error as TlsError;
use thiserror::Error;

/// A convenience wrapper around `Result` for `imap_account::Error`.
pub type Result<T> = result::Result<T, Error>;

/// A set of errors that can occur while talking to an IMAP account.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// An `io::Error` that occurred while trying to read or write to a network stream.
    #[error("{0}")]
    Io(#[from] IoError),
    /// An error from the `native_tls` library while setting up or managing the socket.
    #[error("{0}")]
    Tls(#[from] TlsError),
    /// A BAD response from the IMAP server.
    #[error("Bad Response: {0}")]
    Bad(String),
    /// A NO response from the IMAP server.
    #[error("No Response: {0}")]
    No(String),
    /// The server closed the connection with a BYE response.
    #[error("Server said BYE: {0}")]
    Bye(String),
    /// The connection was terminated unexpectedly.
    #[error("Connection lost")]
    ConnectionLost,
    /// Error parsing a server response.
    #[error("{0}")]
    Parse(#[from] ParseError),
    /// Command inputs were not valid [IMAP
    /// strings](https://tools.ietf.org/html/rfc3501#section-4.3).
    #[error("{0}")]
    Validate(#[from] ValidateError),
    /// The server refused the literal of an `APPEND`.
    #[error("Could not append mail to mailbox")]
    Append,
    /// A required account locator field was absent.
    #[error("missing required account field `{0}`")]
    MissingField(&'static str),
    /// The account locator could not be parsed.
    #[error("invalid account locator: {0}")]
    Locator(#[from] url::ParseError),
    /// The reachability probe reported that the network is down.
    #[error("network is offline, cannot reach {0}")]
    NetworkOffline(String),
    /// Pointing the session at another mailbox failed.
    #[error("could not open mailbox `{mailbox}`: {source}")]
    Select {
        /// The mailbox the session was being pointed at.
        mailbox: String,
        /// What the server (or the transport) reported.
        #[source]
        source: Box<Error>,
    },
    /// The server did not return a usable mailbox list.
    #[error("could not list mailboxes: {0}")]
    List(#[source] Box<Error>),
    /// The session has not been opened, or negotiation did not succeed.
    #[error("session is not open")]
    NotReady,
    /// A message handed to a mailbox view produced no bytes to append.
    #[error("message could not be serialized")]
    NotSerializable,
    /// Account fields cannot change once a session has been opened.
    #[error("account settings are locked once the session is opened")]
    Locked,
}

impl<T> From<BufError<T>> for Error {
    fn from(err: BufError<T>) -> Error {
        Error::Io(err.into())
    }
}

impl Error {
    /// Whether this error means the underlying transport can no longer be used.
    pub fn is_fatal_transport(&self) -> bool {
        matches!(self, Error::Io(_) | Error::ConnectionLost | Error::Bye(_))
    }
}

/// An error occured while trying to parse a server response.
#[derive(Debug, Error)]
pub enum ParseError {
    /// Indicates an error parsing the status response. Such as OK, NO, and BAD.
    #[error("Unable to parse status response")]
    Invalid(Vec<u8>),
    /// An unexpected response was encountered.
    #[error("Encountered unexpected parse response: {0}")]
    Unexpected(String),
    /// The tagged completion did not carry the tag of the command in flight.
    #[error("Response tag `{0}` does not match the command in flight")]
    Tag(String),
    /// The client could not find or decode the server's greeting.
    #[error("Unable to parse server greeting")]
    Greeting(String),
    /// The server sent text that was expected to be UTF-8 but was not.
    #[error("Unable to parse data as UTF-8 text: {0}")]
    DataNotUtf8(#[from] Utf8Error),
}

/// An [invalid character](https://tools.ietf.org/html/rfc3501#section-4.3) was found in an input
/// string.
#[derive(Debug, Error)]
#[error("Invalid character in input: {0:?}")]
pub struct ValidateError(pub char);
