use std::sync::{Mutex, PoisonError, Weak};

use log::debug;

use crate::error::{Error, Result};
use crate::session::SessionInner;
use crate::types::*;
use crate::utf7;

/// A client-side, pull-based view of one mailbox.
///
/// The view holds message references, never content. Its identifier list is fetched from the
/// server on first use and then stays a fixed snapshot until
/// [`initialize_search`](MailboxView::initialize_search) is called again. A cursor walks the
/// snapshot: [`read`](MailboxView::read) hands out the reference under the cursor and moves on,
/// [`peek`](MailboxView::peek) does not move, and [`rewind`](MailboxView::rewind) moves back.
///
/// Views are made by a [`Session`](crate::Session) and only refer back to it weakly; once the
/// session is gone every operation that needs the server fails with [`Error::NotReady`].
#[derive(Debug)]
pub struct MailboxView {
    session: Weak<Mutex<SessionInner>>,
    path: String,
    delimiter: Option<String>,
    attributes: EnumSet<MailboxAttribute>,
    ids: Option<Vec<Uid>>,
    cursor: usize,
    count: Option<u32>,
}

impl MailboxView {
    pub(crate) fn from_name(session: Weak<Mutex<SessionInner>>, name: Name) -> Self {
        MailboxView {
            session,
            path: name.name,
            delimiter: name.delimiter,
            attributes: name.attributes,
            ids: None,
            cursor: 0,
            count: None,
        }
    }

    fn with_session<T>(&self, op: impl FnOnce(&mut SessionInner) -> Result<T>) -> Result<T> {
        let session = self.session.upgrade().ok_or(Error::NotReady)?;
        let mut inner = session.lock().unwrap_or_else(PoisonError::into_inner);
        op(&mut inner)
    }

    /// The server path of this mailbox, in the server's encoding.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The hierarchy delimiter, if the server has a hierarchy.
    pub fn delimiter(&self) -> Option<&str> {
        self.delimiter.as_deref()
    }

    /// Attributes the server listed the mailbox with.
    pub fn attributes(&self) -> EnumSet<MailboxAttribute> {
        self.attributes
    }

    /// The human-readable name: the last path segment, decoded from modified UTF-7.
    pub fn name(&self) -> String {
        let last = match self.delimiter.as_deref() {
            Some(delim) if !delim.is_empty() => self.path.rsplit(delim).next().unwrap_or(""),
            _ => self.path.as_str(),
        };
        utf7::decode(last).into_owned()
    }

    /// Whether this view names a mailbox and its session can talk to the server.
    pub fn ready(&self) -> bool {
        !self.path.is_empty() && self.with_session(|s| Ok(s.ready())).unwrap_or(false)
    }

    /// (Re)load the identifier snapshot and put the cursor at the start.
    ///
    /// Search criteria are not supported; `query` is ignored and every message is listed.
    pub fn initialize_search(&mut self, query: Option<&str>) -> Result<()> {
        if let Some(query) = query {
            debug!("ignoring search criteria {:?} for {}", query, self.path);
        }
        let ids = self.with_session(|s| s.message_identifiers(&self.path))?;
        self.ids = Some(ids);
        self.cursor = 0;
        Ok(())
    }

    fn loaded(&mut self) -> Result<&[Uid]> {
        if self.ids.is_none() {
            self.initialize_search(None)?;
        }
        Ok(self.ids.as_deref().unwrap_or_default())
    }

    /// The reference under the cursor, without moving it. `None` once the view is exhausted.
    pub fn peek(&mut self) -> Result<Option<MessageRef>> {
        let cursor = self.cursor;
        let uid = self.loaded()?.get(cursor).copied();
        Ok(uid.map(|uid| MessageRef::new(self.path.as_str(), uid)))
    }

    /// The reference under the cursor, moving the cursor past it. `None` once the view is
    /// exhausted, however often it is asked.
    pub fn read(&mut self) -> Result<Option<MessageRef>> {
        let next = self.peek()?;
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    /// Move the cursor back by `count`, or to the start. Never moves before the first message.
    pub fn rewind(&mut self, count: Option<usize>) {
        self.cursor = match count {
            Some(count) => self.cursor.saturating_sub(count),
            None => 0,
        };
    }

    /// Append a message to this mailbox.
    ///
    /// Raw bytes are sent as they are; a [`MessageSource`] is serialized first. A message that
    /// serializes to nothing is rejected with [`Error::NotSerializable`] before anything is sent.
    pub fn write<'a>(&mut self, message: impl Into<Outgoing<'a>>) -> Result<()> {
        let bytes = message.into().into_bytes()?;
        let appended = self.with_session(|s| s.append(&bytes, &self.path))?;
        if appended {
            if let Some(count) = self.count.as_mut() {
                *count += 1;
            }
        }
        Ok(())
    }

    /// Views of the mailboxes one level below this one.
    pub fn child_views(&self) -> Result<Vec<MailboxView>> {
        let delimiter = match self.delimiter.as_deref() {
            Some(delim) if !self.attributes.contains(MailboxAttribute::NoInferiors) => delim,
            _ => return Ok(Vec::new()),
        };
        let pattern = format!("{}{}%", self.path, delimiter);
        let names = self.with_session(|s| s.list_names(&pattern))?;
        Ok(names
            .into_iter()
            .map(|name| MailboxView::from_name(self.session.clone(), name))
            .collect())
    }

    /// How many messages the mailbox holds. Asked once, then remembered.
    pub fn message_count(&mut self) -> Result<u32> {
        if let Some(count) = self.count {
            return Ok(count);
        }
        let count = self.with_session(|s| s.message_count(&self.path))?;
        self.count = Some(count);
        Ok(count)
    }

    /// Forget the snapshot and the cursor. Nothing is sent to the server.
    pub fn close(&mut self) {
        self.ids = None;
        self.cursor = 0;
    }
}
