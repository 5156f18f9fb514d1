//! This module contains types shared by the protocol client and the session layer.

use enumset::EnumSetType;
pub use enumset::EnumSet;

/// From section [2.3.1.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.1).
///
/// A 32-bit value assigned to each message, which when used with the unique identifier validity
/// value forms a 64-bit value that will not refer to any other message in the mailbox or any
/// subsequent mailbox with the same name forever.  Unique identifiers are assigned in a strictly
/// ascending fashion in the mailbox; as each message is added to the mailbox it is assigned a
/// higher UID than the message(s) which were added previously.  Unlike message sequence numbers,
/// unique identifiers are not necessarily contiguous.
///
/// Everything above the protocol client addresses messages by `Uid` only, since sequence numbers
/// shift whenever another message is expunged.
pub type Uid = u32;

/// From section [2.3.1.2 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-2.3.1.2).
///
/// A relative position from 1 to the number of messages in the mailbox.
/// This position is ordered by ascending unique identifier.
pub type Seq = u32;

/// How a mailbox is (to be) opened on the session's connection.
///
/// The empty set is the default: the mailbox is `SELECT`ed read-write.
#[derive(EnumSetType, Debug, Hash)]
pub enum OpenFlag {
    /// Use `EXAMINE` instead of `SELECT`.
    ReadOnly,
    /// Session-level: log in anonymously. Never part of a mailbox selection.
    Anonymous,
    /// Session-level: expunge when the session is closed. Never part of a mailbox selection.
    ExpungeOnClose,
}

impl OpenFlag {
    /// Flags that describe the whole session rather than a single mailbox selection.
    pub fn session_level() -> EnumSet<OpenFlag> {
        OpenFlag::Anonymous | OpenFlag::ExpungeOnClose
    }
}

/// Attributes attached to a mailbox name in a `LIST` response.
///
/// See [RFC 3501 section 7.2.2](https://tools.ietf.org/html/rfc3501#section-7.2.2) and
/// [RFC 3348](https://tools.ietf.org/html/rfc3348) for the child attributes.
#[derive(EnumSetType, Debug, Hash)]
pub enum MailboxAttribute {
    /// No child levels exist now and none can be created in the future.
    NoInferiors,
    /// The name cannot be selected as a mailbox.
    NoSelect,
    /// The server marked the mailbox "interesting".
    Marked,
    /// No new messages since the mailbox was last selected.
    Unmarked,
    /// The mailbox has child mailboxes.
    HasChildren,
    /// The mailbox has no child mailboxes.
    HasNoChildren,
}

impl MailboxAttribute {
    /// Map a raw attribute atom (e.g. `\HasChildren`) to a known attribute.
    ///
    /// Matching is case-insensitive, as servers disagree on capitalisation.
    pub fn from_atom(atom: &str) -> Option<Self> {
        let atom = atom.trim_start_matches('\\');
        match atom.to_ascii_lowercase().as_str() {
            "noinferiors" => Some(MailboxAttribute::NoInferiors),
            "noselect" | "nonexistent" => Some(MailboxAttribute::NoSelect),
            "marked" => Some(MailboxAttribute::Marked),
            "unmarked" => Some(MailboxAttribute::Unmarked),
            "haschildren" => Some(MailboxAttribute::HasChildren),
            "hasnochildren" => Some(MailboxAttribute::HasNoChildren),
            _ => None,
        }
    }
}

mod mailbox;
pub use self::mailbox::Mailbox;

mod name;
pub use self::name::Name;

mod capabilities;
pub use self::capabilities::Capabilities;

mod message;
pub use self::message::{MessageRef, MessageSource, Outgoing};
