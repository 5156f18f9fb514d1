//! Finding a (port, security configuration) pair the server accepts.
//!
//! Every candidate port is tried in order. For each port the [candidate
//! configurations](Configuration::candidates) are tried from most to least secure, and the
//! [`Diagnostics`] of every failed attempt are matched against an ordered rule table:
//!
//! | diagnostic                          | effect                                  |
//! |-------------------------------------|-----------------------------------------|
//! | ends in "connection refused"        | give up on this port                    |
//! | "SSL negotiation failed"            | no more `ssl` configurations this port  |
//! | "Unable to negotiate TLS"           | no more `tls` configurations this port  |
//! | "Can not authenticate to IMAP server" | stop negotiating altogether           |
//!
//! Lines that match no rule are ignored and the next configuration is tried.

use std::net::ToSocketAddrs;
use std::sync::atomic::{AtomicBool, Ordering};

use enumset::EnumSet;
use lazy_static::lazy_static;
use log::{debug, info, warn};
use regex::Regex;

use crate::error::{Error, Result};
use crate::transport::{Configuration, Connection, Connector, Diagnostics, SecurityOption, Target};

/// The plaintext IMAP port. Implicit TLS is never attempted on it.
pub const IMAP_PORT: u16 = 143;

static FAST_NEGOTIATION: AtomicBool = AtomicBool::new(false);

/// Skip the reachability probe before negotiating, process-wide.
pub fn set_fast_negotiation(fast: bool) {
    FAST_NEGOTIATION.store(fast, Ordering::Relaxed);
}

/// Whether negotiation currently skips the reachability probe.
pub fn fast_negotiation() -> bool {
    FAST_NEGOTIATION.load(Ordering::Relaxed)
}

/// What to do after a failed attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    /// Try the next port.
    AbandonPort,
    /// Skip configurations that use implicit TLS on this port.
    DisableSsl,
    /// Skip configurations that use `STARTTLS` on this port.
    DisableTls,
    /// The credentials are wrong; trying harder will not help.
    Abort,
}

lazy_static! {
    static ref RULES: Vec<(Regex, Action)> = vec![
        (
            Regex::new(r"(?i)connection refused$").unwrap(),
            Action::AbandonPort
        ),
        (
            Regex::new(r"(?i)^SSL negotiation failed").unwrap(),
            Action::DisableSsl
        ),
        (
            Regex::new(r"(?i)^Unable to negotiate TLS").unwrap(),
            Action::DisableTls
        ),
        (
            Regex::new(r"(?i)^Can not authenticate to IMAP server").unwrap(),
            Action::Abort
        ),
    ];
}

/// Match one diagnostic line against the rule table. The first matching rule wins.
pub fn classify(line: &str) -> Option<Action> {
    RULES
        .iter()
        .find(|(pattern, _)| pattern.is_match(line.trim_end()))
        .map(|(_, action)| *action)
}

/// Outcome of a [`NetworkProbe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Reachability {
    /// The network is up.
    Online,
    /// Something is off, but an attempt may still work.
    Degraded,
    /// No attempt can succeed.
    Offline,
}

/// Consulted once before the first connection attempt, unless fast negotiation is on.
pub trait NetworkProbe: Send + Sync {
    /// How reachable `host` looks right now.
    fn reachability(&self, host: &str) -> Reachability;
}

/// Treats a host name that resolves as reachable, and a failed lookup as degraded.
#[derive(Clone, Copy, Debug, Default)]
pub struct ResolverProbe;

impl NetworkProbe for ResolverProbe {
    fn reachability(&self, host: &str) -> Reachability {
        match (host, 0).to_socket_addrs() {
            Ok(addrs) if addrs.len() > 0 => Reachability::Online,
            Ok(_) => Reachability::Degraded,
            Err(e) => {
                debug!("could not resolve {}: {}", host, e);
                Reachability::Degraded
            }
        }
    }
}

/// The port and configuration a server accepted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Negotiated {
    /// TCP port.
    pub port: u16,
    /// Security options in effect.
    pub configuration: Configuration,
}

/// Account details a negotiation needs.
#[derive(Clone, Copy)]
pub struct Credentials<'a> {
    /// Server host name.
    pub host: &'a str,
    /// Login name.
    pub username: &'a str,
    /// Login password.
    pub password: &'a str,
}

/// Tries ports and configurations until a connector succeeds.
pub struct Negotiator<'a> {
    connector: &'a dyn Connector,
    probe: &'a dyn NetworkProbe,
    fast: bool,
}

impl<'a> Negotiator<'a> {
    /// A negotiator that honours the process-wide fast negotiation flag.
    pub fn new(connector: &'a dyn Connector, probe: &'a dyn NetworkProbe) -> Self {
        Negotiator {
            connector,
            probe,
            fast: fast_negotiation(),
        }
    }

    /// Override the process-wide fast negotiation flag for this negotiator.
    pub fn fast(mut self, fast: bool) -> Self {
        self.fast = fast;
        self
    }

    /// Find a working (port, configuration) pair.
    ///
    /// Returns the accepted pair together with the connection it was found on, or `None` if
    /// every combination failed. Only an offline network is reported as an error.
    pub fn negotiate(
        &self,
        credentials: Credentials<'_>,
        ports: &[u16],
    ) -> Result<Option<(Negotiated, Connection)>> {
        if !self.fast {
            match self.probe.reachability(credentials.host) {
                Reachability::Online => {}
                Reachability::Degraded => {
                    warn!(
                        "network looks degraded, trying {} anyway",
                        credentials.host
                    );
                }
                Reachability::Offline => {
                    return Err(Error::NetworkOffline(credentials.host.to_string()));
                }
            }
        }

        'ports: for &port in ports {
            let mut disabled: EnumSet<SecurityOption> = EnumSet::empty();
            for configuration in Configuration::candidates() {
                if port == IMAP_PORT && configuration.contains(SecurityOption::Ssl) {
                    continue;
                }
                if !(configuration.options() & disabled).is_empty() {
                    continue;
                }

                let target = Target {
                    host: credentials.host,
                    port,
                    configuration,
                    username: credentials.username,
                    password: credentials.password,
                };
                let diagnostics = match self.connector.connect(&target) {
                    Ok(connection) => {
                        info!(
                            "negotiated {}:{} with {}",
                            credentials.host, port, configuration
                        );
                        return Ok(Some((
                            Negotiated {
                                port,
                                configuration,
                            },
                            connection,
                        )));
                    }
                    Err(diagnostics) => diagnostics,
                };

                match self.apply(&diagnostics, &mut disabled) {
                    Some(Action::AbandonPort) => {
                        warn!("giving up on port {}: {}", port, diagnostics);
                        continue 'ports;
                    }
                    Some(Action::Abort) => {
                        warn!("negotiation aborted: {}", diagnostics);
                        return Ok(None);
                    }
                    _ => {
                        debug!(
                            "{}:{} {} failed: {}",
                            credentials.host, port, configuration, diagnostics
                        );
                    }
                }
            }
        }

        info!("no usable configuration for {}", credentials.host);
        Ok(None)
    }

    // disables options as lines dictate; returns the first terminal action, if any
    fn apply(
        &self,
        diagnostics: &Diagnostics,
        disabled: &mut EnumSet<SecurityOption>,
    ) -> Option<Action> {
        for line in diagnostics.lines() {
            match classify(line) {
                Some(Action::DisableSsl) => disabled.insert(SecurityOption::Ssl),
                Some(Action::DisableTls) => disabled.insert(SecurityOption::Tls),
                Some(action) => return Some(action),
                None => continue,
            };
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::Client;
    use crate::mock_stream::MockStream;
    use std::sync::Mutex;

    struct Fixed(Reachability);

    impl NetworkProbe for Fixed {
        fn reachability(&self, _host: &str) -> Reachability {
            self.0
        }
    }

    /// Records every attempt and answers from a script.
    struct Scripted<F> {
        attempts: Mutex<Vec<(u16, String)>>,
        answer: F,
    }

    impl<F> Scripted<F>
    where
        F: Fn(u16, Configuration) -> std::result::Result<(), Diagnostics> + Send + Sync,
    {
        fn new(answer: F) -> Self {
            Scripted {
                attempts: Mutex::new(Vec::new()),
                answer,
            }
        }

        fn attempts(&self) -> Vec<(u16, String)> {
            self.attempts.lock().unwrap().clone()
        }
    }

    impl<F> Connector for Scripted<F>
    where
        F: Fn(u16, Configuration) -> std::result::Result<(), Diagnostics> + Send + Sync,
    {
        fn connect(&self, target: &Target<'_>) -> std::result::Result<Connection, Diagnostics> {
            self.attempts
                .lock()
                .unwrap()
                .push((target.port, target.configuration.to_string()));
            (self.answer)(target.port, target.configuration)?;
            Ok(Client::new(Box::new(MockStream::default())))
        }
    }

    fn creds() -> Credentials<'static> {
        Credentials {
            host: "imap.example.com",
            username: "fred",
            password: "s3cret",
        }
    }

    #[test]
    fn classification() {
        assert_eq!(
            classify("Connection failed to imap.example.com,993: Connection refused"),
            Some(Action::AbandonPort)
        );
        assert_eq!(classify("SSL negotiation failed"), Some(Action::DisableSsl));
        assert_eq!(
            classify("Unable to negotiate TLS with this server"),
            Some(Action::DisableTls)
        );
        assert_eq!(
            classify("Can not authenticate to IMAP server: Invalid credentials"),
            Some(Action::Abort)
        );
        assert_eq!(classify("Server disabled LOGIN on this channel"), None);
    }

    #[test]
    fn ssl_is_never_tried_on_143() {
        let connector = Scripted::new(|_, _| Err(Diagnostics::line("nope")));
        let probe = Fixed(Reachability::Online);
        let negotiator = Negotiator::new(&connector, &probe).fast(true);
        assert!(negotiator.negotiate(creds(), &[143]).unwrap().is_none());
        let attempts = connector.attempts();
        assert_eq!(attempts.len(), 3);
        assert!(attempts.iter().all(|(_, c)| !c.contains("ssl")));
    }

    #[test]
    fn disabled_options_are_skipped_for_the_port() {
        let connector = Scripted::new(|port, configuration| {
            if configuration.contains(SecurityOption::Ssl) {
                Err(Diagnostics::line("SSL negotiation failed"))
            } else if port == 993 {
                Err(Diagnostics::line("something unexpected"))
            } else {
                Ok(())
            }
        });
        let probe = Fixed(Reachability::Online);
        let negotiator = Negotiator::new(&connector, &probe).fast(true);
        let (negotiated, _) = negotiator.negotiate(creds(), &[993, 1143]).unwrap().unwrap();
        let attempts = connector.attempts();
        let on_993: Vec<&str> = attempts
            .iter()
            .filter(|(p, _)| *p == 993)
            .map(|(_, c)| c.as_str())
            .collect();
        // second ssl configuration is skipped once the first failed
        assert_eq!(
            on_993,
            vec![
                "[ssl,secure,validate-cert]",
                "[tls,secure]",
                "[tls,secure,novalidate-cert]",
                "[]"
            ]
        );
        // a fresh port starts with nothing disabled
        assert_eq!(attempts[4], (1143, "[ssl,secure,validate-cert]".to_string()));
        assert_eq!(negotiated.port, 1143);
        assert_eq!(negotiated.configuration.to_string(), "[tls,secure]");
    }

    #[test]
    fn certificate_failure_still_tries_without_validation() {
        let connector = Scripted::new(|_, configuration: Configuration| {
            if configuration.contains(SecurityOption::NoValidateCert) {
                Ok(())
            } else {
                Err(Diagnostics::line(
                    "Certificate failure for imap.example.com: self-signed certificate",
                ))
            }
        });
        let probe = Fixed(Reachability::Online);
        let negotiator = Negotiator::new(&connector, &probe).fast(true);
        let (negotiated, _) = negotiator.negotiate(creds(), &[993]).unwrap().unwrap();
        assert_eq!(
            negotiated.configuration.to_string(),
            "[ssl,secure,novalidate-cert]"
        );
        assert_eq!(connector.attempts().len(), 2);
        assert_eq!(
            classify("Certificate failure for imap.example.com: self-signed certificate"),
            None
        );
    }

    #[test]
    fn authentication_failure_stops_every_port() {
        let connector = Scripted::new(|_, _| {
            Err(Diagnostics::line(
                "Can not authenticate to IMAP server: Invalid credentials",
            ))
        });
        let probe = Fixed(Reachability::Online);
        let negotiator = Negotiator::new(&connector, &probe).fast(true);
        assert!(negotiator.negotiate(creds(), &[993, 143]).unwrap().is_none());
        assert_eq!(connector.attempts().len(), 1);
    }

    #[test]
    fn refused_port_falls_back_to_plaintext_on_143() {
        let connector = Scripted::new(|port, configuration| {
            if port == 993 {
                Err(Diagnostics::line(
                    "Connection failed to imap.example.com,993: Connection refused",
                ))
            } else if configuration.contains(SecurityOption::Tls) {
                Err(Diagnostics::line("Unable to negotiate TLS with this server"))
            } else {
                Ok(())
            }
        });
        let probe = Fixed(Reachability::Online);
        let negotiator = Negotiator::new(&connector, &probe).fast(true);
        let (negotiated, _) = negotiator.negotiate(creds(), &[993, 143]).unwrap().unwrap();
        assert_eq!(
            negotiated,
            Negotiated {
                port: 143,
                configuration: Configuration::plaintext()
            }
        );
        assert_eq!(
            connector.attempts(),
            vec![
                (993, "[ssl,secure,validate-cert]".to_string()),
                (143, "[tls,secure]".to_string()),
                (143, "[]".to_string()),
            ]
        );
    }

    #[test]
    fn offline_fails_before_any_attempt() {
        let connector = Scripted::new(|_, _| Ok(()));
        let probe = Fixed(Reachability::Offline);
        let negotiator = Negotiator::new(&connector, &probe).fast(false);
        match negotiator.negotiate(creds(), &[993, 143]) {
            Err(Error::NetworkOffline(host)) => assert_eq!(host, "imap.example.com"),
            other => panic!("unexpected {:?}", other.map(|o| o.map(|(n, _)| n))),
        }
        assert!(connector.attempts().is_empty());
    }

    #[test]
    fn degraded_network_still_negotiates() {
        let connector = Scripted::new(|_, _| Ok(()));
        let probe = Fixed(Reachability::Degraded);
        let negotiator = Negotiator::new(&connector, &probe).fast(false);
        assert!(negotiator.negotiate(creds(), &[993]).unwrap().is_some());
    }

    #[test]
    fn fast_negotiation_skips_the_probe() {
        let connector = Scripted::new(|_, _| Ok(()));
        let probe = Fixed(Reachability::Offline);
        let negotiator = Negotiator::new(&connector, &probe).fast(true);
        assert!(negotiator.negotiate(creds(), &[993]).unwrap().is_some());
    }

    #[test]
    fn fast_negotiation_flag_is_process_wide() {
        let connector = Scripted::new(|_, _| Ok(()));
        let probe = Fixed(Reachability::Online);
        set_fast_negotiation(true);
        assert!(Negotiator::new(&connector, &probe).fast);
        set_fast_negotiation(false);
        assert!(!Negotiator::new(&connector, &probe).fast);
    }
}
