use imap_proto::{AttributeValue, MailboxDatum, Response, ResponseCode, Status};

use super::error::{Error, ParseError, Result};
use super::types::*;

/// Server chatter that arrives alongside command responses.
///
/// [RFC 3501 section 7](https://tools.ietf.org/html/rfc3501#section-7) allows the server to
/// send mailbox size updates and warnings at any time. The session keeps its message count
/// current from `exists`/`expunged`, and negotiation classifies failures from `alerts`.
#[derive(Debug, Default, Eq, PartialEq)]
pub struct Unsolicited {
    /// The last `EXISTS` count seen, if any.
    pub exists: Option<u32>,
    /// How many `EXPUNGE` responses were seen since the last `EXISTS`.
    pub expunged: u32,
    /// Text of untagged `NO`/`BAD` responses and `[ALERT]`s, in arrival order.
    pub alerts: Vec<String>,
}

impl Unsolicited {
    /// Fold `exists`/`expunged` into a message count the caller last knew as `count`.
    pub fn apply_to(&mut self, count: u32) -> u32 {
        let base = self.exists.take().unwrap_or(count);
        let count = base.saturating_sub(self.expunged);
        self.expunged = 0;
        count
    }

    // check if this is simply a unilateral server response
    // (see Section 7 of RFC 3501):
    fn absorb<'a>(&mut self, res: Response<'a>) -> Result<Option<Response<'a>>> {
        match res {
            Response::MailboxData(MailboxDatum::Exists(n)) => {
                self.exists = Some(n);
                self.expunged = 0;
            }
            Response::Expunge(_) => {
                self.expunged += 1;
            }
            Response::MailboxData(MailboxDatum::Recent(_))
            | Response::MailboxData(MailboxDatum::Flags(_))
            | Response::MailboxData(MailboxDatum::Status { .. })
            | Response::Capabilities(_)
            | Response::Fetch(..) => {}
            Response::Data {
                status: Status::Bye,
                information,
                ..
            } => {
                return Err(Error::Bye(
                    information.map(|s| s.to_string()).unwrap_or_default(),
                ));
            }
            Response::Data {
                status: Status::No,
                information,
                ..
            }
            | Response::Data {
                status: Status::Bad,
                information,
                ..
            } => {
                self.alerts
                    .push(information.map(|s| s.to_string()).unwrap_or_default());
            }
            Response::Data {
                code: Some(ResponseCode::Alert),
                information,
                ..
            } => {
                self.alerts
                    .push(information.map(|s| s.to_string()).unwrap_or_default());
            }
            Response::Data { .. } => {}
            res => return Ok(Some(res)),
        }
        Ok(None)
    }
}

pub(crate) enum MapOrNot<'a, T> {
    Map(T),
    Not(Response<'a>),
}

fn parse_many_into<'a, T, F>(
    mut lines: &'a [u8],
    into: &mut Vec<T>,
    unsolicited: &mut Unsolicited,
    mut map: F,
) -> Result<()>
where
    F: FnMut(Response<'a>) -> Result<MapOrNot<'a, T>>,
{
    while !lines.is_empty() {
        match imap_proto::parser::parse_response(lines) {
            Ok((rest, resp)) => {
                lines = rest;

                match map(resp)? {
                    MapOrNot::Map(t) => into.push(t),
                    MapOrNot::Not(resp) => {
                        if let Some(resp) = unsolicited.absorb(resp)? {
                            return Err(unexpected(resp));
                        }
                    }
                }
            }
            _ => {
                return Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
    Ok(())
}

fn unexpected(resp: Response<'_>) -> Error {
    Error::Parse(ParseError::Unexpected(format!("{:?}", resp)))
}

/// What the server said when the connection was opened.
#[derive(Debug, Eq, PartialEq)]
pub enum Greeting {
    /// Ready for `LOGIN`.
    Ok,
    /// Already authenticated, e.g. by the transport.
    PreAuth,
}

pub fn parse_greeting(line: &[u8]) -> Result<Greeting> {
    match imap_proto::parser::parse_response(line) {
        Ok((_, Response::Data { status, information, .. })) => match status {
            Status::Ok => Ok(Greeting::Ok),
            Status::PreAuth => Ok(Greeting::PreAuth),
            Status::Bye => Err(Error::Bye(
                information.map(|s| s.to_string()).unwrap_or_default(),
            )),
            _ => Err(Error::Parse(ParseError::Greeting(
                String::from_utf8_lossy(line).into_owned(),
            ))),
        },
        _ => Err(Error::Parse(ParseError::Greeting(
            String::from_utf8_lossy(line).into_owned(),
        ))),
    }
}

pub fn parse_noop(lines: &[u8], unsolicited: &mut Unsolicited) -> Result<()> {
    let mut nothing: Vec<()> = Vec::new();
    parse_many_into(lines, &mut nothing, unsolicited, |resp| {
        Ok(MapOrNot::Not(resp))
    })
}

pub fn parse_capabilities(lines: &[u8], unsolicited: &mut Unsolicited) -> Result<Capabilities> {
    let mut caps: Vec<String> = Vec::new();
    let mut lines = lines;
    while !lines.is_empty() {
        match imap_proto::parser::parse_response(lines) {
            Ok((rest, Response::Capabilities(c))) => {
                lines = rest;
                caps.extend(c.into_iter().map(capability_name));
            }
            Ok((rest, data)) => {
                lines = rest;
                if let Some(resp) = unsolicited.absorb(data)? {
                    return Err(unexpected(resp));
                }
            }
            _ => {
                return Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }
    Ok(caps.into_iter().collect())
}

#[allow(unreachable_patterns)]
fn capability_name(cap: imap_proto::Capability<'_>) -> String {
    use imap_proto::Capability;
    match cap {
        Capability::Imap4rev1 => "IMAP4REV1".to_string(),
        Capability::Auth(mech) => format!("AUTH={}", mech),
        Capability::Atom(atom) => atom.to_string(),
        other => format!("{:?}", other),
    }
}

pub fn parse_mailbox(mut lines: &[u8], unsolicited: &mut Unsolicited) -> Result<Mailbox> {
    let mut mailbox = Mailbox::default();

    while !lines.is_empty() {
        match imap_proto::parser::parse_response(lines) {
            Ok((
                rest,
                Response::Data {
                    status: Status::Ok,
                    code: Some(code),
                    ..
                },
            )) => {
                lines = rest;

                match code {
                    ResponseCode::UidValidity(uid) => {
                        mailbox.uid_validity = Some(uid);
                    }
                    ResponseCode::UidNext(unext) => {
                        mailbox.uid_next = Some(unext);
                    }
                    ResponseCode::ReadOnly => {
                        mailbox.read_only = true;
                    }
                    _ => {}
                }
            }
            Ok((rest, Response::MailboxData(MailboxDatum::Exists(e)))) => {
                lines = rest;
                mailbox.exists = e;
            }
            Ok((rest, Response::MailboxData(MailboxDatum::Recent(r)))) => {
                lines = rest;
                mailbox.recent = r;
            }
            Ok((rest, resp)) => {
                lines = rest;
                if let Some(resp) = unsolicited.absorb(resp)? {
                    return Err(unexpected(resp));
                }
            }
            _ => {
                return Err(Error::Parse(ParseError::Invalid(lines.to_vec())));
            }
        }
    }

    // the selection itself reports the size; only later updates should count
    unsolicited.exists = None;
    unsolicited.expunged = 0;
    Ok(mailbox)
}

pub fn parse_names(lines: &[u8], unsolicited: &mut Unsolicited) -> Result<Vec<Name>> {
    let mut names = Vec::new();
    parse_many_into(lines, &mut names, unsolicited, |resp| match resp {
        Response::MailboxData(MailboxDatum::List {
            name_attributes,
            delimiter,
            name,
        }) => Ok(MapOrNot::Map(Name {
            attributes: name_attributes
                .iter()
                .filter_map(|attr| MailboxAttribute::from_atom(name_attribute_atom(attr)))
                .collect(),
            delimiter: delimiter.map(|d| d.into_owned()),
            name: name.into_owned(),
        })),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(names)
}

fn name_attribute_atom<'a>(attr: &'a imap_proto::NameAttribute<'_>) -> &'a str {
    use imap_proto::NameAttribute;
    match attr {
        NameAttribute::NoInferiors => "\\NoInferiors",
        NameAttribute::NoSelect => "\\NoSelect",
        NameAttribute::Marked => "\\Marked",
        NameAttribute::Unmarked => "\\Unmarked",
        NameAttribute::All => "\\All",
        NameAttribute::Archive => "\\Archive",
        NameAttribute::Drafts => "\\Drafts",
        NameAttribute::Flagged => "\\Flagged",
        NameAttribute::Junk => "\\Junk",
        NameAttribute::Sent => "\\Sent",
        NameAttribute::Trash => "\\Trash",
        NameAttribute::Extension(s) => s,
        _ => "",
    }
}

/// UIDs from `UID SEARCH`, in the order the server sent them.
pub fn parse_ids(lines: &[u8], unsolicited: &mut Unsolicited) -> Result<Vec<Uid>> {
    let mut batches: Vec<Vec<u32>> = Vec::new();
    parse_many_into(lines, &mut batches, unsolicited, |resp| match resp {
        Response::MailboxData(MailboxDatum::Search(ids)) => Ok(MapOrNot::Map(ids)),
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(batches.into_iter().flatten().collect())
}

/// The parts of a `FETCH` response the session asks for.
#[derive(Debug, Eq, PartialEq)]
pub struct HeaderFetch {
    /// Sequence number of the message.
    pub message: Seq,
    /// Its UID, if the server sent one.
    pub uid: Option<Uid>,
    /// The raw header, if the server sent one.
    pub header: Option<Vec<u8>>,
}

pub fn parse_header_fetches(lines: &[u8], unsolicited: &mut Unsolicited) -> Result<Vec<HeaderFetch>> {
    let mut fetches = Vec::new();
    parse_many_into(lines, &mut fetches, unsolicited, |resp| match resp {
        Response::Fetch(num, attrs) => {
            let mut fetch = HeaderFetch {
                message: num,
                uid: None,
                header: None,
            };
            for attr in attrs {
                match attr {
                    AttributeValue::Uid(uid) => fetch.uid = Some(uid),
                    AttributeValue::Rfc822Header(Some(h)) => fetch.header = Some(h.into_owned()),
                    _ => {}
                }
            }
            Ok(MapOrNot::Map(fetch))
        }
        resp => Ok(MapOrNot::Not(resp)),
    })?;
    Ok(fetches)
}
