use thiserror::Error;

#[derive(Debug, Error)]
/// The directory could not be created from the provided settings.
///
/// These errors are raised at construction time and are never retried.
pub enum ConfigurationError {
    #[error("At least one seed node must be provided.")]
    EmptySeedList,

    #[error("Unsupported scheme {0:?}, expected `http` or `https`.")]
    UnsupportedScheme(String),

    #[error("Invalid port {0}, expected a value between 1 and 65535.")]
    InvalidPort(u16),

    #[error("Scheme {scheme} and port {port} do not produce a valid URI: {reason}")]
    InvalidAddressTemplate {
        scheme: String,
        port: u16,
        reason: String,
    },

    #[error("Invalid seed node: {0}")]
    /// One of the seed hosts does not produce a valid URI.
    InvalidSeed(#[from] InvalidAddress),

    #[error("Invalid rack/datacenter filter {query:?}: {reason}")]
    /// The rack or datacenter cannot be rendered into a `/localnodes` query.
    InvalidFilter { query: String, reason: String },

    #[error("The {0} must be greater than zero.")]
    ZeroPeriod(&'static str),

    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("Failed to load client certificate: {0}")]
    ClientIdentity(String),

    #[error("The background refresh task must be started from within a tokio runtime.")]
    NoRuntime,
}

#[derive(Debug, Error)]
#[error("Cannot build a node address from host {host:?}: {reason}")]
/// A single host could not be combined with the scheme and port into a URI.
pub struct InvalidAddress {
    pub host: String,
    pub reason: String,
}

#[derive(Debug, Error)]
/// A single `/localnodes` request failed.
///
/// Failures during background refresh are logged and the last known
/// node set is kept.
pub enum DiscoveryError {
    #[error("Request to {target} failed: {source}")]
    Request {
        target: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Node {target} returned an invalid node list: {source}")]
    InvalidResponse {
        target: String,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error)]
/// The configured rack/datacenter does not look right to the cluster.
pub enum ValidationError {
    #[error(
        "Node {target} returned an empty node list for {query:?}, \
        the datacenter or rack might be incorrect."
    )]
    EmptyNodeList { target: String, query: String },

    #[error("Failed to read the list of nodes: {0}")]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Error)]
/// The rack/datacenter capability probe could not reach a conclusion.
pub enum ProbeError {
    #[error("Node {target} returned an empty node list, unable to tell if rack filtering is supported.")]
    EmptyNodeList { target: String },

    #[error("Failed to read the list of nodes: {0}")]
    Discovery(#[from] DiscoveryError),
}

#[derive(Debug, Error)]
/// No usable rack/datacenter filter could be picked for the cluster.
pub enum FilterSelectionError {
    #[error("{0}")]
    Configuration(#[from] ConfigurationError),

    #[error("{0}")]
    Probe(#[from] ProbeError),

    #[error("Failed to read the list of nodes: {0}")]
    Discovery(#[from] DiscoveryError),
}
