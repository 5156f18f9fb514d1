use std::collections::hash_set::Iter;
use std::collections::HashSet;

/// From [section 7.2.1 of RFC 3501](https://tools.ietf.org/html/rfc3501#section-7.2.1).
///
/// A list of capabilities that the server supports.
///
/// Two of them matter during negotiation: `STARTTLS`, which the `tls` configurations need, and
/// `LOGINDISABLED`, after which a client MUST NOT issue `LOGIN` on the current channel.
/// Capability names are stored upper-cased so lookups are case-insensitive.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Capabilities(pub(crate) HashSet<String>);

impl Capabilities {
    /// Check if the server has the given capability.
    pub fn has(&self, cap: &str) -> bool {
        self.0.contains(&cap.to_ascii_uppercase())
    }

    /// Iterate over all the server's capabilities
    pub fn iter(&self) -> Iter<'_, String> {
        self.0.iter()
    }

    /// Returns how many capabilities the server has.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if the server purports to have no capabilities.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<String>> FromIterator<S> for Capabilities {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Capabilities(
            iter.into_iter()
                .map(|c| c.into().to_ascii_uppercase())
                .collect(),
        )
    }
}
