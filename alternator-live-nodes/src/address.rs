use std::fmt::{Display, Formatter};
use std::net::Ipv6Addr;
use std::str::FromStr;

use http::uri::Authority;

use crate::error::{ConfigurationError, InvalidAddress};

/// Host used to check a scheme/port pair before any real host is known.
///
/// If this fails then the scheme or port is at fault, so later failures for
/// real hosts can be blamed on the host itself.
const VALIDATION_HOST: &str = "1.1.1.1";

#[derive(Debug, Default, Copy, Clone, PartialEq, Eq, Hash)]
/// The protocol used to talk to Alternator nodes.
pub enum Scheme {
    #[default]
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl FromStr for Scheme {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("http") {
            Ok(Scheme::Http)
        } else if s.eq_ignore_ascii_case("https") {
            Ok(Scheme::Https)
        } else {
            Err(ConfigurationError::UnsupportedScheme(s.to_string()))
        }
    }
}

impl Display for Scheme {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The scheme and port shared by every node of the cluster.
///
/// Discovery only returns bare host names, the template turns them
/// into full [NodeAddress]es.
pub struct AddressTemplate {
    scheme: Scheme,
    port: u16,
}

impl AddressTemplate {
    /// Creates a new template, checking the scheme/port pair up front.
    pub fn new(scheme: Scheme, port: u16) -> Result<Self, ConfigurationError> {
        if port == 0 {
            return Err(ConfigurationError::InvalidPort(port));
        }

        let template = Self { scheme, port };
        template.address(VALIDATION_HOST).map_err(|e| {
            ConfigurationError::InvalidAddressTemplate {
                scheme: scheme.to_string(),
                port,
                reason: e.reason,
            }
        })?;

        Ok(template)
    }

    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Builds the address of the node reachable at `host`.
    pub fn address(&self, host: &str) -> Result<NodeAddress, InvalidAddress> {
        let host = host.trim();
        if host.is_empty() {
            return Err(InvalidAddress {
                host: host.to_string(),
                reason: "host is empty".to_string(),
            });
        }

        // A `:` or bracket can only be part of an IPv6 literal, the authority
        // parser does not check what sits between brackets.
        let (host, uri_host) = if host.contains(&[':', '[', ']'][..]) {
            let literal = host
                .strip_prefix('[')
                .and_then(|h| h.strip_suffix(']'))
                .unwrap_or(host);

            if literal.parse::<Ipv6Addr>().is_err() {
                return Err(InvalidAddress {
                    host: host.to_string(),
                    reason: "host is neither a host name nor a valid IP address".to_string(),
                });
            }

            (literal, format!("[{}]", literal))
        } else {
            (host, host.to_string())
        };

        let authority = Authority::from_str(&format!("{}:{}", uri_host, self.port))
            .map_err(|e| InvalidAddress {
                host: host.to_string(),
                reason: e.to_string(),
            })?;

        // Reject anything the parser accepted by reading part of the host
        // as user info or a port.
        if authority.host() != uri_host || authority.port_u16() != Some(self.port) {
            return Err(InvalidAddress {
                host: host.to_string(),
                reason: "host is not a plain host name or IP address".to_string(),
            });
        }

        Ok(NodeAddress {
            scheme: self.scheme,
            host: host.to_string(),
            port: self.port,
            authority,
        })
    }
}

impl Default for AddressTemplate {
    fn default() -> Self {
        Self {
            scheme: crate::DEFAULT_SCHEME,
            port: crate::DEFAULT_PORT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
/// The address of a single Alternator node.
pub struct NodeAddress {
    scheme: Scheme,
    host: String,
    port: u16,
    authority: Authority,
}

impl NodeAddress {
    #[inline]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    #[inline]
    /// The host as it was provided, without IPv6 brackets.
    pub fn host(&self) -> &str {
        &self.host
    }

    #[inline]
    pub fn port(&self) -> u16 {
        self.port
    }

    #[inline]
    /// The `host:port` part of the node's URI.
    pub fn authority(&self) -> &Authority {
        &self.authority
    }

    /// Produces a full URL pointing at `path` on this node.
    ///
    /// `path` must start with `/`, the query is appended as-is.
    pub fn url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(query) if !query.is_empty() => {
                format!("{}://{}{}?{}", self.scheme, self.authority, path, query)
            },
            _ => format!("{}://{}{}", self.scheme, self.authority, path),
        }
    }
}

impl Display for NodeAddress {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority)
    }
}
