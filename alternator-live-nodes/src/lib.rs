//! # Alternator live nodes
//! Client-side load balancing for Alternator, the DynamoDB compatible API of ScyllaDB.
//!
//! A [LiveNodes] directory starts from one or more seed nodes and keeps an up-to-date
//! list of the cluster's nodes by periodically asking one of them for `/localnodes`.
//! Every call to [LiveNodes::next] returns the next node in round-robin order, which
//! an SDK integration can use as the target of its next request or connection.
//!
//! ```ignore
//! let nodes = LiveNodes::new(["10.0.0.1"], LiveNodesConfig::default().with_port(8000))?;
//! nodes.start()?;
//!
//! let target = nodes.next();
//! ```
//!
//! Discovery can optionally be restricted to a single datacenter and/or rack, use
//! [LiveNodes::check_filter_supported] and [LiveNodes::check_filter_configured] to
//! make sure the cluster understands the filter, or create the directory with
//! [LiveNodes::with_supported_filter] to fall back to a filter the cluster supports.

#[macro_use]
extern crate tracing;

mod address;
mod config;
mod directory;
mod discovery;
mod error;
mod node_set;
mod probe;
mod statistics;

use std::time::Duration;

pub use address::{AddressTemplate, NodeAddress, Scheme};
pub use async_trait::async_trait;
pub use config::{FilterConfig, LiveNodesConfig};
pub use directory::{DirectoryState, LiveNodes, RefreshOutcome};
pub use discovery::{parse_local_nodes, Discovery, HttpDiscovery};
pub use error::{
    ConfigurationError,
    DiscoveryError,
    FilterSelectionError,
    InvalidAddress,
    ProbeError,
    ValidationError,
};
pub use node_set::NodeSet;
pub use probe::FAKE_RACK;
pub use statistics::{LiveNodesStatistics, LiveNodesStatisticsInner};

pub static DEFAULT_SCHEME: Scheme = Scheme::Http;
pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_UPDATE_PERIOD: Duration = Duration::from_secs(10);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// The endpoint every Alternator node serves its view of the cluster on.
pub static LOCAL_NODES_PATH: &str = "/localnodes";
