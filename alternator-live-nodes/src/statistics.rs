use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Counter = AtomicU64;

#[derive(Debug, Clone, Default)]
/// Live metrics around the node directory.
pub struct LiveNodesStatistics(Arc<LiveNodesStatisticsInner>);

impl Deref for LiveNodesStatistics {
    type Target = LiveNodesStatisticsInner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, Default)]
pub struct LiveNodesStatisticsInner {
    /// The number of nodes currently requests are spread across.
    pub(crate) num_live_nodes: Counter,
    /// The number of refreshes which replaced the node list.
    pub(crate) num_refreshes: Counter,
    /// The number of refreshes which failed to reach a node.
    pub(crate) num_failed_refreshes: Counter,
    /// The number of refreshes skipped as another one was in flight.
    pub(crate) num_skipped_refreshes: Counter,
}

impl LiveNodesStatisticsInner {
    /// The number of nodes currently requests are spread across.
    pub fn num_live_nodes(&self) -> u64 {
        self.num_live_nodes.load(Ordering::Relaxed)
    }

    /// The number of refreshes which replaced the node list.
    pub fn num_refreshes(&self) -> u64 {
        self.num_refreshes.load(Ordering::Relaxed)
    }

    /// The number of refreshes which failed to reach a node.
    pub fn num_failed_refreshes(&self) -> u64 {
        self.num_failed_refreshes.load(Ordering::Relaxed)
    }

    /// The number of refreshes skipped as another one was in flight.
    pub fn num_skipped_refreshes(&self) -> u64 {
        self.num_skipped_refreshes.load(Ordering::Relaxed)
    }
}
