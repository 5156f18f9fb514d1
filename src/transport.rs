//! Transport security options and the connectors that turn them into authenticated clients.
//!
//! A [`Configuration`] is a set of [`SecurityOption`]s. The [`Connector`] trait takes a
//! [`Target`] (host, port, configuration and credentials) and either yields a logged-in
//! [`Connection`] or [`Diagnostics`]: the human-readable failure lines that the
//! [negotiator](crate::negotiate) classifies to decide what to try next.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use enumset::{EnumSet, EnumSetType};
use log::debug;
use native_tls::{HandshakeError, TlsConnector};

use crate::client::Client;
use crate::error::Error;
use crate::types::Capabilities;

/// A single knob of a transport configuration.
#[derive(EnumSetType, Debug, Hash)]
pub enum SecurityOption {
    /// Wrap the connection in TLS before the greeting (implicit TLS, usually port 993).
    Ssl,
    /// Upgrade a plaintext connection with `STARTTLS` before logging in.
    Tls,
    /// Never send the password over an unencrypted channel.
    Secure,
    /// Verify the server certificate and host name.
    ValidateCert,
    /// Accept any certificate the server presents.
    NoValidateCert,
}

impl SecurityOption {
    /// The conventional lower-case name, as used in mailbox specifiers (`/ssl/novalidate-cert`).
    pub fn name(self) -> &'static str {
        match self {
            SecurityOption::Ssl => "ssl",
            SecurityOption::Tls => "tls",
            SecurityOption::Secure => "secure",
            SecurityOption::ValidateCert => "validate-cert",
            SecurityOption::NoValidateCert => "novalidate-cert",
        }
    }
}

/// A set of security options to connect with. The empty configuration is plaintext.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct Configuration(EnumSet<SecurityOption>);

impl Configuration {
    /// Plaintext, no options.
    pub fn plaintext() -> Self {
        Configuration(EnumSet::empty())
    }

    /// The configurations a negotiator tries for every port, most secure first.
    pub fn candidates() -> Vec<Configuration> {
        use SecurityOption::*;
        vec![
            Configuration(Ssl | Secure | ValidateCert),
            Configuration(Ssl | Secure | NoValidateCert),
            Configuration(Tls | Secure),
            Configuration(Tls | Secure | NoValidateCert),
            Configuration::plaintext(),
        ]
    }

    /// Whether `option` is part of this configuration.
    pub fn contains(&self, option: SecurityOption) -> bool {
        self.0.contains(option)
    }

    /// The options in this configuration.
    pub fn options(&self) -> EnumSet<SecurityOption> {
        self.0
    }

    /// Whether the transport is encrypted before credentials are sent.
    pub fn is_encrypted(&self) -> bool {
        self.0.contains(SecurityOption::Ssl) || self.0.contains(SecurityOption::Tls)
    }

    fn validates_certificates(&self) -> bool {
        !self.0.contains(SecurityOption::NoValidateCert)
    }
}

impl From<EnumSet<SecurityOption>> for Configuration {
    fn from(options: EnumSet<SecurityOption>) -> Self {
        Configuration(options)
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, option) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", option.name())?;
        }
        write!(f, "]")
    }
}

/// A byte stream a [`Client`] can run over.
pub trait Stream: Read + Write + Send {}

impl<T: Read + Write + Send> Stream for T {}

/// A type-erased transport, so plaintext and TLS connections share one client type.
pub type BoxedStream = Box<dyn Stream>;

/// An authenticated client, as handed over by a [`Connector`].
pub type Connection = Client<BoxedStream>;

/// Everything a [`Connector`] needs for one attempt.
#[derive(Clone, Copy)]
pub struct Target<'a> {
    /// Server host name, also used for certificate validation.
    pub host: &'a str,
    /// TCP port.
    pub port: u16,
    /// Security options to apply.
    pub configuration: Configuration,
    /// Login name.
    pub username: &'a str,
    /// Login password.
    pub password: &'a str,
}

impl fmt::Debug for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("configuration", &self.configuration)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// Failure lines from one connection attempt, in the order they were produced.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Diagnostics(Vec<String>);

impl Diagnostics {
    /// Diagnostics consisting of a single line.
    pub fn line(line: impl Into<String>) -> Self {
        Diagnostics(vec![line.into()])
    }

    /// Append another line.
    pub fn push(&mut self, line: impl Into<String>) {
        self.0.push(line.into());
    }

    /// The lines collected so far.
    pub fn lines(&self) -> &[String] {
        &self.0
    }
}

impl From<Error> for Diagnostics {
    fn from(err: Error) -> Self {
        Diagnostics::line(err.to_string())
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("; "))
    }
}

/// Opens authenticated connections.
///
/// Implemented for [`NativeTlsConnector`], and for any `Fn(&Target) -> Result<Connection,
/// Diagnostics>` so tests and hosts can substitute their own transport.
pub trait Connector: Send + Sync {
    /// Connect, secure and log in according to `target`.
    fn connect(&self, target: &Target<'_>) -> Result<Connection, Diagnostics>;
}

impl<F> Connector for F
where
    F: Fn(&Target<'_>) -> Result<Connection, Diagnostics> + Send + Sync,
{
    fn connect(&self, target: &Target<'_>) -> Result<Connection, Diagnostics> {
        self(target)
    }
}

/// How long connecting, and then each read or write, may block before an attempt fails.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Connects over TCP, securing the stream with `native-tls`.
#[derive(Clone, Copy, Debug)]
pub struct NativeTlsConnector {
    timeout: Duration,
}

impl Default for NativeTlsConnector {
    fn default() -> Self {
        NativeTlsConnector {
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl NativeTlsConnector {
    /// A connector using [`DEFAULT_TIMEOUT`].
    pub fn new() -> Self {
        NativeTlsConnector::default()
    }

    /// Use `timeout` for connecting and for every read and write.
    ///
    /// A zero duration is not a valid socket timeout and is replaced by [`DEFAULT_TIMEOUT`].
    pub fn with_timeout(timeout: Duration) -> Self {
        if timeout.is_zero() {
            return NativeTlsConnector::default();
        }
        NativeTlsConnector { timeout }
    }

    /// The connect, read and write timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn handshake<S: Stream + 'static>(
        &self,
        target: &Target<'_>,
        stream: S,
    ) -> Result<BoxedStream, String> {
        let insecure = !target.configuration.validates_certificates();
        let connector = TlsConnector::builder()
            .danger_accept_invalid_certs(insecure)
            .danger_accept_invalid_hostnames(insecure)
            .build()
            .map_err(|e| e.to_string())?;
        match connector.connect(target.host, stream) {
            Ok(tls) => Ok(Box::new(tls)),
            Err(HandshakeError::Failure(e)) => Err(e.to_string()),
            Err(HandshakeError::WouldBlock(_)) => Err("handshake interrupted".to_string()),
        }
    }

    // resolve and try every address in order, as connect_all_timeout does
    fn open_tcp(&self, target: &Target<'_>) -> Result<TcpStream, Diagnostics> {
        let failed = |e: io::Error| {
            let reason = match e.kind() {
                io::ErrorKind::ConnectionRefused => "Connection refused".to_string(),
                _ => e.to_string(),
            };
            Diagnostics::line(format!(
                "Connection failed to {},{}: {}",
                target.host, target.port, reason
            ))
        };

        let addrs = (target.host, target.port).to_socket_addrs().map_err(failed)?;
        let mut last = io::Error::new(io::ErrorKind::NotFound, "no address resolved");
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, self.timeout) {
                Ok(tcp) => {
                    tcp.set_read_timeout(Some(self.timeout)).map_err(failed)?;
                    tcp.set_write_timeout(Some(self.timeout)).map_err(failed)?;
                    return Ok(tcp);
                }
                Err(e) => {
                    debug!("couldn't connect to {}: {}", addr, e);
                    last = e;
                }
            }
        }
        Err(failed(last))
    }
}

impl Connector for NativeTlsConnector {
    fn connect(&self, target: &Target<'_>) -> Result<Connection, Diagnostics> {
        let configuration = target.configuration;
        debug!(
            "connecting to {}:{} with {}",
            target.host, target.port, configuration
        );
        let tcp = self.open_tcp(target)?;

        let (mut client, preauth) = if configuration.contains(SecurityOption::Ssl) {
            let tls = self
                .handshake(target, tcp)
                .map_err(|reason| handshake_failure(target, "SSL negotiation failed", reason))?;
            let mut client = Client::new(tls);
            let preauth = client.read_greeting()?;
            (client, preauth)
        } else {
            let mut client: Connection = Client::new(Box::new(tcp));
            let preauth = client.read_greeting()?;
            if configuration.contains(SecurityOption::Tls) {
                let caps = client.capabilities()?;
                if !caps.has("STARTTLS") {
                    return Err(Diagnostics::line("Unable to negotiate TLS with this server"));
                }
                client
                    .starttls()
                    .map_err(|_| Diagnostics::line("Unable to negotiate TLS with this server"))?;
                let plain = client.into_inner()?;
                let tls = self.handshake(target, plain).map_err(|reason| {
                    handshake_failure(target, "Unable to negotiate TLS with this server", reason)
                })?;
                (Client::new(tls), preauth)
            } else {
                (client, preauth)
            }
        };

        if !preauth {
            let caps = client.capabilities()?;
            authenticate(&mut client, target, &caps)?;
        }
        Ok(client)
    }
}

// with validation on, the certificate may be the only problem: keep the protocol enabled
fn handshake_failure(
    target: &Target<'_>,
    protocol_failure: &str,
    reason: String,
) -> Diagnostics {
    if target.configuration.validates_certificates() {
        Diagnostics::line(format!("Certificate failure for {}: {}", target.host, reason))
    } else {
        let mut diag = Diagnostics::line(protocol_failure);
        diag.push(reason);
        diag
    }
}

fn authenticate(
    client: &mut Connection,
    target: &Target<'_>,
    caps: &Capabilities,
) -> Result<(), Diagnostics> {
    let configuration = target.configuration;
    if configuration.contains(SecurityOption::Secure) && !configuration.is_encrypted() {
        return Err(Diagnostics::line(
            "Can't do secure authentication with this server",
        ));
    }
    if caps.has("LOGINDISABLED") {
        return Err(Diagnostics::line("Server disabled LOGIN on this channel"));
    }
    match client.login(target.username, target.password) {
        Ok(()) => Ok(()),
        Err(Error::No(info)) | Err(Error::Bad(info)) => {
            let mut diag = Diagnostics::default();
            for alert in client.unsolicited().alerts.drain(..) {
                diag.push(alert);
            }
            diag.push(format!("Can not authenticate to IMAP server: {}", info));
            Err(diag)
        }
        Err(e) => Err(Diagnostics::line(format!(
            "IMAP connection broken (authenticate): {}",
            e
        ))),
    }
}
