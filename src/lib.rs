//! # Alternator load balancing
//! Client-side load balancing for Alternator, the DynamoDB compatible API of ScyllaDB.
//!
//! This is a convenience package which re-exports the sub-projects, you can also
//! depend on them directly:
//!
//! ### Features
//! - `live-nodes` - A directory of the cluster's live nodes with background refresh
//!   and round-robin node selection.

#[cfg(feature = "live-nodes")]
pub use alternator_live_nodes as live_nodes;
