use std::fmt::{Debug, Display, Formatter};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use http::uri::PathAndQuery;

use crate::address::{AddressTemplate, Scheme};
use crate::error::ConfigurationError;
use crate::{
    DEFAULT_PORT,
    DEFAULT_REQUEST_TIMEOUT,
    DEFAULT_SCHEME,
    DEFAULT_UPDATE_PERIOD,
    LOCAL_NODES_PATH,
};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
/// Restricts discovery to the nodes of a single datacenter and/or rack.
///
/// Empty values mean no filtering.
pub struct FilterConfig {
    pub datacenter: String,
    pub rack: String,
}

impl FilterConfig {
    pub fn new(datacenter: impl Display, rack: impl Display) -> Self {
        Self {
            datacenter: datacenter.to_string(),
            rack: rack.to_string(),
        }
    }

    /// Only keep nodes in the given rack.
    pub fn rack(rack: impl Display) -> Self {
        Self {
            datacenter: String::new(),
            rack: rack.to_string(),
        }
    }

    /// Only keep nodes in the given datacenter.
    pub fn datacenter(datacenter: impl Display) -> Self {
        Self {
            datacenter: datacenter.to_string(),
            rack: String::new(),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.rack.is_empty() && self.datacenter.is_empty()
    }

    /// The `/localnodes` query string for this filter.
    ///
    /// ```ignore
    /// rack=r1&dc=dc1
    /// ```
    pub fn query(&self) -> Option<String> {
        let mut query = String::new();

        if !self.rack.is_empty() {
            query.push_str("rack=");
            query.push_str(&self.rack);
        }

        if !self.datacenter.is_empty() {
            if !query.is_empty() {
                query.push('&');
            }
            query.push_str("dc=");
            query.push_str(&self.datacenter);
        }

        if query.is_empty() {
            None
        } else {
            Some(query)
        }
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigurationError> {
        let query = match self.query() {
            None => return Ok(()),
            Some(query) => query,
        };

        let invalid = |reason: String| ConfigurationError::InvalidFilter {
            query: query.clone(),
            reason,
        };

        for value in [&self.rack, &self.datacenter] {
            if let Some(c) = value.chars().find(|c| matches!(c, '&' | '=' | '#' | '?')) {
                return Err(invalid(format!("{:?} contains reserved character {:?}", value, c)));
            }
        }

        PathAndQuery::from_str(&format!("{}?{}", LOCAL_NODES_PATH, query))
            .map_err(|e| invalid(e.to_string()))?;

        Ok(())
    }
}

#[derive(Clone)]
/// Settings for a [LiveNodes](crate::LiveNodes) directory.
pub struct LiveNodesConfig {
    /// The scheme every node is contacted with.
    pub scheme: Scheme,

    /// The port Alternator listens on, shared by every node.
    pub port: u16,

    /// The datacenter/rack requests should stay within.
    pub filter: FilterConfig,

    /// How often the node list is refreshed.
    ///
    /// When an idle period is set this becomes the minimum time between
    /// refreshes triggered by requests.
    pub update_period: Duration,

    /// How often the node list is refreshed when no requests go through.
    ///
    /// `None` disables request triggered refreshes, the list is then
    /// refreshed every `update_period`.
    pub idle_update_period: Option<Duration>,

    /// The timeout applied to each `/localnodes` request.
    pub request_timeout: Duration,

    /// Accept invalid or self-signed server certificates on `https` clusters.
    pub ignore_server_certificate_errors: bool,

    /// The client certificate presented to nodes requiring mutual TLS.
    pub client_identity: Option<reqwest::Identity>,

    /// An HTTP client to use for discovery instead of building one.
    ///
    /// When set, `request_timeout`, `ignore_server_certificate_errors` and
    /// `client_identity` are left to the provided client.
    pub http_client: Option<reqwest::Client>,
}

impl Default for LiveNodesConfig {
    fn default() -> Self {
        Self {
            scheme: DEFAULT_SCHEME,
            port: DEFAULT_PORT,
            filter: FilterConfig::default(),
            update_period: DEFAULT_UPDATE_PERIOD,
            idle_update_period: None,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            ignore_server_certificate_errors: false,
            client_identity: None,
            http_client: None,
        }
    }
}

impl Debug for LiveNodesConfig {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveNodesConfig")
            .field("scheme", &self.scheme)
            .field("port", &self.port)
            .field("filter", &self.filter)
            .field("update_period", &self.update_period)
            .field("idle_update_period", &self.idle_update_period)
            .field("request_timeout", &self.request_timeout)
            .field(
                "ignore_server_certificate_errors",
                &self.ignore_server_certificate_errors,
            )
            .field("client_identity", &self.client_identity.is_some())
            .field("http_client", &self.http_client.is_some())
            .finish()
    }
}

impl LiveNodesConfig {
    pub fn with_scheme(mut self, scheme: Scheme) -> Self {
        self.scheme = scheme;
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_rack(mut self, rack: impl Display) -> Self {
        self.filter.rack = rack.to_string();
        self
    }

    pub fn with_datacenter(mut self, datacenter: impl Display) -> Self {
        self.filter.datacenter = datacenter.to_string();
        self
    }

    pub fn with_filter(mut self, filter: FilterConfig) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_update_period(mut self, period: Duration) -> Self {
        self.update_period = period;
        self
    }

    pub fn with_idle_update_period(mut self, period: Duration) -> Self {
        self.idle_update_period = Some(period);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_ignore_server_certificate_errors(mut self, ignore: bool) -> Self {
        self.ignore_server_certificate_errors = ignore;
        self
    }

    pub fn with_client_identity(mut self, identity: reqwest::Identity) -> Self {
        self.client_identity = Some(identity);
        self
    }

    /// Loads the client certificate from a PEM certificate and a PEM private key file.
    pub fn with_client_identity_files(
        self,
        cert_file: impl AsRef<Path>,
        key_file: impl AsRef<Path>,
    ) -> Result<Self, ConfigurationError> {
        let read = |path: &Path| {
            std::fs::read(path).map_err(|e| {
                ConfigurationError::ClientIdentity(format!("{}: {}", path.display(), e))
            })
        };

        let mut pem = read(cert_file.as_ref())?;
        pem.push(b'\n');
        pem.extend(read(key_file.as_ref())?);

        let identity = reqwest::Identity::from_pem(&pem)
            .map_err(|e| ConfigurationError::ClientIdentity(e.to_string()))?;

        Ok(self.with_client_identity(identity))
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// The template used to turn discovered hosts into node addresses.
    pub fn address_template(&self) -> Result<AddressTemplate, ConfigurationError> {
        AddressTemplate::new(self.scheme, self.port)
    }

    /// Checks every setting, returning the address template on success.
    pub(crate) fn validate(&self) -> Result<AddressTemplate, ConfigurationError> {
        let template = self.address_template()?;
        self.filter.validate()?;

        if self.update_period.is_zero() {
            return Err(ConfigurationError::ZeroPeriod("update period"));
        }

        if matches!(self.idle_update_period, Some(period) if period.is_zero()) {
            return Err(ConfigurationError::ZeroPeriod("idle update period"));
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigurationError::ZeroPeriod("request timeout"));
        }

        Ok(template)
    }

    /// Builds the client used for `/localnodes` requests.
    pub(crate) fn build_http_client(&self) -> Result<reqwest::Client, ConfigurationError> {
        if let Some(client) = self.http_client.as_ref() {
            return Ok(client.clone());
        }

        // Requests must reach the addressed node itself.
        let mut builder = reqwest::Client::builder()
            .no_proxy()
            .timeout(self.request_timeout)
            .danger_accept_invalid_certs(self.ignore_server_certificate_errors);

        if let Some(identity) = self.client_identity.clone() {
            builder = builder.identity(identity);
        }

        builder.build().map_err(ConfigurationError::HttpClient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_query() {
        assert_eq!(FilterConfig::default().query(), None);
        assert_eq!(FilterConfig::rack("r1").query().as_deref(), Some("rack=r1"));
        assert_eq!(
            FilterConfig::datacenter("dc1").query().as_deref(),
            Some("dc=dc1")
        );
        assert_eq!(
            FilterConfig::new("dc1", "r1").query().as_deref(),
            Some("rack=r1&dc=dc1")
        );
    }

    #[test]
    fn test_filter_validation() {
        assert!(FilterConfig::default().validate().is_ok());
        assert!(FilterConfig::new("datacenter1", "rack1").validate().is_ok());

        let res = FilterConfig::rack("bad rack").validate();
        assert!(matches!(res, Err(ConfigurationError::InvalidFilter { .. })));

        let res = FilterConfig::datacenter("dc1&rack=r2").validate();
        assert!(matches!(res, Err(ConfigurationError::InvalidFilter { .. })));

        let res = FilterConfig::datacenter("dc#1").validate();
        assert!(matches!(res, Err(ConfigurationError::InvalidFilter { .. })));
    }

    #[test]
    fn test_defaults() {
        let cfg = LiveNodesConfig::default();
        assert_eq!(cfg.scheme, Scheme::Http);
        assert_eq!(cfg.port, 8080);
        assert!(cfg.filter.is_empty());
        assert_eq!(cfg.update_period, Duration::from_secs(10));
        assert_eq!(cfg.idle_update_period, None);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_zero_periods_are_rejected() {
        let res = LiveNodesConfig::default()
            .with_update_period(Duration::ZERO)
            .validate();
        assert!(matches!(res, Err(ConfigurationError::ZeroPeriod("update period"))));

        let res = LiveNodesConfig::default()
            .with_idle_update_period(Duration::ZERO)
            .validate();
        assert!(matches!(
            res,
            Err(ConfigurationError::ZeroPeriod("idle update period"))
        ));
    }

    #[test]
    fn test_missing_client_identity_files() {
        let res = LiveNodesConfig::default()
            .with_client_identity_files("/does/not/exist.crt", "/does/not/exist.key");
        assert!(matches!(res, Err(ConfigurationError::ClientIdentity(_))));
    }

    #[test]
    fn test_invalid_client_identity() {
        let dir = std::env::temp_dir();
        let cert = dir.join(format!("alternator-lb-{}.crt", std::process::id()));
        let key = dir.join(format!("alternator-lb-{}.key", std::process::id()));
        std::fs::write(&cert, b"not a certificate").unwrap();
        std::fs::write(&key, b"not a key").unwrap();

        let res = LiveNodesConfig::default().with_client_identity_files(&cert, &key);
        assert!(matches!(res, Err(ConfigurationError::ClientIdentity(_))));

        let _ = std::fs::remove_file(cert);
        let _ = std::fs::remove_file(key);
    }

    #[test]
    fn test_invalid_port_is_rejected() {
        let res = LiveNodesConfig::default().with_port(0).validate();
        assert!(matches!(res, Err(ConfigurationError::InvalidPort(0))));
    }
}
