use super::{EnumSet, MailboxAttribute};

/// A name that matches a `LIST` command.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Name {
    pub(crate) attributes: EnumSet<MailboxAttribute>,
    pub(crate) delimiter: Option<String>,
    pub(crate) name: String,
}

impl Name {
    /// Attributes of this name that this crate understands; unknown ones are dropped.
    pub fn attributes(&self) -> EnumSet<MailboxAttribute> {
        self.attributes
    }

    /// The hierarchy delimiter is a character used to delimit levels of hierarchy in a mailbox
    /// name.  `None` means that no hierarchy exists; the name is a "flat" name.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// The raw (still modified UTF-7 encoded) mailbox path, valid as an argument for `SELECT`
    /// unless [`MailboxAttribute::NoSelect`] is set.
    pub fn name(&self) -> &str {
        &self.name
    }
}
