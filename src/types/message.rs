use std::fmt;

use super::Uid;
use crate::error::{Error, Result};

/// A pointer to one message on the server: the mailbox it lives in and its [`Uid`].
///
/// Mailbox views hand these out instead of message content. Resolving a reference into headers
/// or a parsed message is up to the caller (see [`crate::Session::fetch_header`]).
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct MessageRef {
    mailbox: String,
    uid: Uid,
}

impl MessageRef {
    /// Refer to message `uid` in `mailbox`.
    pub fn new(mailbox: impl Into<String>, uid: Uid) -> Self {
        MessageRef {
            mailbox: mailbox.into(),
            uid,
        }
    }

    /// The mailbox path this message lives in.
    pub fn mailbox(&self) -> &str {
        &self.mailbox
    }

    /// The server-assigned unique identifier.
    pub fn uid(&self) -> Uid {
        self.uid
    }
}

impl fmt::Display for MessageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.mailbox, self.uid)
    }
}

/// A message object that can render itself as a full RFC 5322 message.
///
/// Serialization is push-style: the implementation calls `sink` with consecutive chunks of the
/// message (headers and body, server-ready line endings), and the chunks are concatenated.
pub trait MessageSource {
    /// Push the message bytes into `sink`.
    fn stream_to(&self, sink: &mut dyn FnMut(&[u8])) -> Result<()>;
}

/// What a mailbox view can be asked to store.
pub enum Outgoing<'a> {
    /// An already serialized message.
    Raw(&'a [u8]),
    /// A message object that still has to be serialized.
    Message(&'a dyn MessageSource),
}

impl<'a> Outgoing<'a> {
    /// Collect the bytes to send with `APPEND`.
    ///
    /// Fails with [`Error::NotSerializable`] if there is nothing to send.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        let bytes = match self {
            Outgoing::Raw(raw) => raw.to_vec(),
            Outgoing::Message(msg) => {
                let mut out = Vec::new();
                msg.stream_to(&mut |chunk| out.extend_from_slice(chunk))?;
                out
            }
        };
        if bytes.is_empty() {
            return Err(Error::NotSerializable);
        }
        Ok(bytes)
    }
}

impl<'a> From<&'a [u8]> for Outgoing<'a> {
    fn from(raw: &'a [u8]) -> Self {
        Outgoing::Raw(raw)
    }
}

impl<'a> From<&'a str> for Outgoing<'a> {
    fn from(raw: &'a str) -> Self {
        Outgoing::Raw(raw.as_bytes())
    }
}

impl<'a, M: MessageSource> From<&'a M> for Outgoing<'a> {
    fn from(msg: &'a M) -> Self {
        Outgoing::Message(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Chunked(Vec<&'static str>);

    impl MessageSource for Chunked {
        fn stream_to(&self, sink: &mut dyn FnMut(&[u8])) -> Result<()> {
            for chunk in &self.0 {
                sink(chunk.as_bytes());
            }
            Ok(())
        }
    }

    #[test]
    fn message_chunks_are_concatenated() {
        let msg = Chunked(vec!["Subject: hi\r\n", "\r\n", "body\r\n"]);
        let bytes = Outgoing::from(&msg).into_bytes().unwrap();
        assert_eq!(bytes, b"Subject: hi\r\n\r\nbody\r\n".to_vec());
    }

    #[test]
    fn empty_message_is_not_serializable() {
        let msg = Chunked(vec![]);
        match Outgoing::from(&msg).into_bytes() {
            Err(Error::NotSerializable) => {}
            other => panic!("unexpected {:?}", other.map(|_| ())),
        }
        assert!(matches!(
            Outgoing::from("").into_bytes(),
            Err(Error::NotSerializable)
        ));
    }

    #[test]
    fn reference_display() {
        assert_eq!(MessageRef::new("INBOX", 42).to_string(), "INBOX#42");
    }
}
