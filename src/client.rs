use bufstream::BufStream;
use imap_proto::{Response, Status};
use log::debug;
use std::fmt;
use std::io::{BufRead, Read, Write};

use super::error::{Error, ParseError, Result, ValidateError};
use super::parse::{
    parse_capabilities, parse_greeting, parse_header_fetches, parse_ids, parse_mailbox,
    parse_names, parse_noop, Greeting, HeaderFetch, Unsolicited,
};
use super::types::*;

static TAG_PREFIX: &str = "a";
const INITIAL_TAG: u32 = 0;
const CR: u8 = 0x0d;
const LF: u8 = 0x0a;

macro_rules! quote {
    ($x:expr) => {
        format!("\"{}\"", $x.replace(r"\", r"\\").replace("\"", "\\\""))
    };
}

pub(crate) fn validate_str(value: &str) -> Result<String> {
    let quoted = quote!(value);
    if quoted.contains('\n') {
        return Err(Error::Validate(ValidateError('\n')));
    }
    if quoted.contains('\r') {
        return Err(Error::Validate(ValidateError('\r')));
    }
    Ok(quoted)
}

/// A blocking IMAP command stream over any `Read + Write` transport.
///
/// This only knows the handful of commands an account session needs. Every command is sent with
/// a fresh tag and the call blocks until the matching tagged completion arrives; untagged
/// responses that are not part of the answer are folded into [`Client::unsolicited`].
pub struct Client<T: Read + Write> {
    stream: BufStream<T>,
    tag: u32,
    unsolicited: Unsolicited,
}

impl<T: Read + Write> fmt::Debug for Client<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("tag", &self.tag)
            .field("unsolicited", &self.unsolicited)
            .finish_non_exhaustive()
    }
}

impl<T: Read + Write> Client<T> {
    /// Creates a new client with the underlying stream.
    ///
    /// Nothing is read yet; call [`Client::read_greeting`] on a fresh connection.
    pub fn new(stream: T) -> Client<T> {
        Client {
            stream: BufStream::new(stream),
            tag: INITIAL_TAG,
            unsolicited: Unsolicited::default(),
        }
    }

    /// Read the server greeting. Returns `true` if the server pre-authenticated the connection.
    pub fn read_greeting(&mut self) -> Result<bool> {
        let mut v = Vec::new();
        self.readline(&mut v)?;
        Ok(parse_greeting(&v)? == Greeting::PreAuth)
    }

    /// Unwrap the transport, e.g. to wrap it in TLS after `STARTTLS`.
    pub fn into_inner(self) -> Result<T> {
        Ok(self.stream.into_inner()?)
    }

    /// Untagged server chatter collected so far.
    pub fn unsolicited(&mut self) -> &mut Unsolicited {
        &mut self.unsolicited
    }

    /// Capability requests a listing of capabilities that the server supports.
    pub fn capabilities(&mut self) -> Result<Capabilities> {
        let lines = self.run_command_and_read_response("CAPABILITY")?;
        parse_capabilities(&lines, &mut self.unsolicited)
    }

    /// Ask the server to start TLS negotiation on this connection.
    ///
    /// On success the caller must hand [`Client::into_inner`] to a TLS connector.
    pub fn starttls(&mut self) -> Result<()> {
        self.run_command_and_check_ok("STARTTLS")
    }

    /// Log in to the IMAP server.
    pub fn login(&mut self, username: &str, password: &str) -> Result<()> {
        let command = format!(
            "LOGIN {} {}",
            validate_str(username)?,
            validate_str(password)?
        );
        self.run_command_and_check_ok(&command)
    }

    /// Selects a mailbox for read-write access.
    pub fn select(&mut self, mailbox_name: &str) -> Result<Mailbox> {
        let lines =
            self.run_command_and_read_response(&format!("SELECT {}", validate_str(mailbox_name)?))?;
        parse_mailbox(&lines, &mut self.unsolicited)
    }

    /// Examine is identical to Select, but the selected mailbox is identified as read-only
    pub fn examine(&mut self, mailbox_name: &str) -> Result<Mailbox> {
        let lines = self
            .run_command_and_read_response(&format!("EXAMINE {}", validate_str(mailbox_name)?))?;
        let mut mailbox = parse_mailbox(&lines, &mut self.unsolicited)?;
        mailbox.read_only = true;
        Ok(mailbox)
    }

    /// The LIST command returns a subset of names from the complete set
    /// of all names available to the client.
    pub fn list(&mut self, reference_name: &str, mailbox_pattern: &str) -> Result<Vec<Name>> {
        let lines = self.run_command_and_read_response(&format!(
            "LIST {} {}",
            validate_str(reference_name)?,
            validate_str(mailbox_pattern)?
        ))?;
        parse_names(&lines, &mut self.unsolicited)
    }

    /// Search the selected mailbox, returning unique identifiers in the order the server sent
    /// them.
    pub fn uid_search(&mut self, query: &str) -> Result<Vec<Uid>> {
        let lines = self.run_command_and_read_response(&format!("UID SEARCH {}", query))?;
        parse_ids(&lines, &mut self.unsolicited)
    }

    /// Fetch the RFC 822 header of message `uid` without setting `\Seen`.
    pub fn uid_fetch_header(&mut self, uid: Uid) -> Result<Vec<HeaderFetch>> {
        let lines =
            self.run_command_and_read_response(&format!("UID FETCH {} (UID RFC822.HEADER)", uid))?;
        parse_header_fetches(&lines, &mut self.unsolicited)
    }

    /// Alter the flags of message `uid`; `query` is e.g. `+FLAGS.SILENT (\Deleted)`.
    pub fn uid_store(&mut self, uid: Uid, query: &str) -> Result<()> {
        let lines = self.run_command_and_read_response(&format!("UID STORE {} {}", uid, query))?;
        parse_header_fetches(&lines, &mut self.unsolicited).map(|_| ())
    }

    /// Expunge permanently removes all messages that have the \Deleted flag set from the currently
    /// selected mailbox.
    pub fn expunge(&mut self) -> Result<()> {
        let lines = self.run_command_and_read_response("EXPUNGE")?;
        parse_noop(&lines, &mut self.unsolicited)
    }

    /// Noop always succeeds, and it does nothing, but it gives the server a chance to report
    /// mailbox size changes.
    pub fn noop(&mut self) -> Result<()> {
        let lines = self.run_command_and_read_response("NOOP")?;
        parse_noop(&lines, &mut self.unsolicited)
    }

    /// Logout informs the server that the client is done with the connection.
    pub fn logout(&mut self) -> Result<()> {
        // the untagged BYE that precedes the completion is expected here
        match self.run_command_and_read_response("LOGOUT") {
            Ok(_) | Err(Error::ConnectionLost) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// The APPEND command adds a mail to a mailbox.
    pub fn append(&mut self, mailbox_name: &str, content: &[u8]) -> Result<()> {
        self.run_command(&format!(
            "APPEND {} {{{}}}",
            validate_str(mailbox_name)?,
            content.len()
        ))?;
        let mut v = Vec::new();
        loop {
            v.clear();
            self.readline(&mut v)?;
            if v.starts_with(b"+") {
                break;
            }
            if v.starts_with(b"* ") {
                // unilateral data may arrive before the continuation
                while incomplete(&v) {
                    self.readline(&mut v)?;
                }
                parse_noop(&v, &mut self.unsolicited)?;
                continue;
            }
            // most likely a tagged NO, e.g. [TRYCREATE]
            self.read_response_onto(&mut v)?;
            return Err(Error::Append);
        }
        self.stream.write_all(content)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        debug!("C: <{} bytes of message literal>", content.len());
        let lines = self.read_response()?;
        parse_noop(&lines, &mut self.unsolicited)
    }

    /// Runs a command and checks if it returns OK.
    pub fn run_command_and_check_ok(&mut self, command: &str) -> Result<()> {
        let lines = self.run_command_and_read_response(command)?;
        parse_noop(&lines, &mut self.unsolicited)
    }

    /// Runs any command passed to it.
    pub fn run_command(&mut self, untagged_command: &str) -> Result<()> {
        let command = self.create_command(untagged_command);
        self.write_line(command.as_bytes())
    }

    /// Run a raw IMAP command and read back its (untagged) response lines.
    pub fn run_command_and_read_response(&mut self, untagged_command: &str) -> Result<Vec<u8>> {
        self.run_command(untagged_command)?;
        self.read_response()
    }

    fn read_response(&mut self) -> Result<Vec<u8>> {
        let mut v = Vec::new();
        self.read_response_onto(&mut v)?;
        Ok(v)
    }

    fn read_response_onto(&mut self, data: &mut Vec<u8>) -> Result<()> {
        let mut continue_from = None;
        let mut try_first = !data.is_empty();
        let match_tag = format!("{}{}", TAG_PREFIX, self.tag);
        loop {
            let line_start = if try_first {
                try_first = false;
                0
            } else {
                let start_new = data.len();
                self.readline(data)?;
                continue_from.take().unwrap_or(start_new)
            };

            let break_with = {
                let line = &data[line_start..];

                match imap_proto::parser::parse_response(line) {
                    Ok((
                        _,
                        Response::Done {
                            tag,
                            status,
                            information,
                            ..
                        },
                    )) => {
                        let information = information
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "no explanation given".to_string());
                        if tag.as_bytes() != match_tag.as_bytes() {
                            Some(Err(Error::Parse(ParseError::Tag(
                                String::from_utf8_lossy(tag.as_bytes()).into_owned(),
                            ))))
                        } else {
                            Some(match status {
                                Status::Ok => Ok(()),
                                Status::Bad => Err(Error::Bad(information)),
                                Status::No => Err(Error::No(information)),
                                status => Err(Error::Parse(ParseError::Unexpected(format!(
                                    "{:?} completion: {}",
                                    status, information
                                )))),
                            })
                        }
                    }
                    Ok(..) => None,
                    Err(nom::Err::Incomplete(..)) => {
                        continue_from = Some(line_start);
                        None
                    }
                    _ => Some(Err(Error::Parse(ParseError::Invalid(line.to_vec())))),
                }
            };

            match break_with {
                Some(Ok(())) => {
                    data.truncate(line_start);
                    break Ok(());
                }
                Some(Err(e)) => break Err(e),
                None => {}
            }
        }
    }

    fn readline(&mut self, into: &mut Vec<u8>) -> Result<usize> {
        let read = self.stream.read_until(LF, into)?;
        if read == 0 {
            return Err(Error::ConnectionLost);
        }

        if log::log_enabled!(log::Level::Debug) {
            let line = &into[(into.len() - read)..];
            debug!("S: {}", String::from_utf8_lossy(line).trim_end());
        }

        Ok(read)
    }

    fn create_command(&mut self, command: &str) -> String {
        self.tag += 1;
        format!("{}{} {}", TAG_PREFIX, self.tag, command)
    }

    fn write_line(&mut self, buf: &[u8]) -> Result<()> {
        self.stream.write_all(buf)?;
        self.stream.write_all(&[CR, LF])?;
        self.stream.flush()?;
        if log::log_enabled!(log::Level::Debug) {
            let line = String::from_utf8_lossy(buf);
            match line.split_once(" LOGIN ") {
                Some((tag, _)) => debug!("C: {} LOGIN <redacted>", tag),
                None => debug!("C: {}", line),
            }
        }
        Ok(())
    }
}

fn incomplete(line: &[u8]) -> bool {
    matches!(
        imap_proto::parser::parse_response(line),
        Err(nom::Err::Incomplete(..))
    )
}
