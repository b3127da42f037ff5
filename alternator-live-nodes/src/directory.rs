use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};

use crate::address::NodeAddress;
use crate::config::{FilterConfig, LiveNodesConfig};
use crate::discovery::{Discovery, HttpDiscovery};
use crate::error::{ConfigurationError, DiscoveryError};
use crate::node_set::NodeSet;
use crate::statistics::LiveNodesStatistics;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The result of a single refresh attempt.
pub enum RefreshOutcome {
    /// The node list was replaced with `n` nodes.
    Updated(usize),
    /// The contacted node returned no nodes, the current list was kept.
    Unchanged,
    /// Another refresh was already in flight.
    Skipped,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
/// The lifecycle state of the background refresh task.
pub enum DirectoryState {
    /// The directory serves the nodes it knows of but is not refreshing them.
    Ready,
    /// The background refresh task is running.
    Running,
    /// The directory has been stopped and will not refresh again.
    Stopped,
}

enum RefreshTask {
    Ready,
    Running(JoinHandle<()>),
    Stopped,
}

/// Maintains the list of live Alternator nodes and hands them out in
/// round-robin order.
///
/// The list starts with the seed nodes and is periodically replaced by
/// the list returned by one of the live nodes' `/localnodes` endpoint.
/// Selecting a node never waits on the network.
///
/// The background task is stopped when the directory is dropped, wrap the
/// directory in an [Arc] to share it.
pub struct LiveNodes {
    inner: Arc<LiveNodesInner>,
}

impl LiveNodes {
    /// Creates a new directory which discovers nodes over HTTP.
    ///
    /// Every setting and seed host is checked here, a directory which
    /// was created successfully will not fail because of its configuration.
    pub fn new<S>(
        seeds: impl IntoIterator<Item = S>,
        config: LiveNodesConfig,
    ) -> Result<Self, ConfigurationError>
    where
        S: AsRef<str>,
    {
        let discovery = HttpDiscovery::from_config(&config)?;
        Self::with_discovery(seeds, config, discovery)
    }

    /// Creates a new directory using a custom [Discovery] implementation.
    pub fn with_discovery<S, D>(
        seeds: impl IntoIterator<Item = S>,
        config: LiveNodesConfig,
        discovery: D,
    ) -> Result<Self, ConfigurationError>
    where
        S: AsRef<str>,
        D: Discovery,
    {
        let template = config.validate()?;

        let seeds = seeds
            .into_iter()
            .map(|seed| template.address(seed.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        let initial_nodes = NodeSet::new(seeds).ok_or(ConfigurationError::EmptySeedList)?;

        let statistics = LiveNodesStatistics::default();
        statistics
            .num_live_nodes
            .store(initial_nodes.len() as u64, Ordering::Relaxed);

        let inner = LiveNodesInner {
            nodes: ArcSwap::from_pointee(initial_nodes.clone()),
            initial_nodes,
            cursor: AtomicUsize::new(0),
            filter: config.filter,
            update_period: config.update_period,
            idle_update_period: config.idle_update_period,
            discovery: Arc::new(discovery),
            refreshing: AtomicBool::new(false),
            created_at: Instant::now(),
            next_refresh_at: AtomicU64::new(as_millis(config.update_period)),
            refresh_signal: Notify::new(),
            statistics,
            task: Mutex::new(RefreshTask::Ready),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Starts the background refresh task.
    ///
    /// The first refresh happens straight away. Starting a directory which
    /// is already running or has been stopped does nothing.
    pub fn start(&self) -> Result<(), ConfigurationError> {
        let mut task = self.inner.task.lock();
        match &*task {
            RefreshTask::Running(_) => return Ok(()),
            RefreshTask::Stopped => {
                debug!("Directory has been stopped, ignoring start.");
                return Ok(());
            },
            RefreshTask::Ready => {},
        }

        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ConfigurationError::NoRuntime)?;
        let handle = runtime.spawn(refresh_cycle(self.inner.clone()));
        *task = RefreshTask::Running(handle);

        info!(
            seed_nodes = %self.inner.initial_nodes.len(),
            update_period = ?self.inner.update_period,
            idle_update_period = ?self.inner.idle_update_period,
            "Started live nodes refresh."
        );

        Ok(())
    }

    /// Stops the background refresh task.
    ///
    /// A refresh which is in flight is abandoned, the node list is left as
    /// it was. Calling this more than once is fine.
    pub fn stop(&self) {
        let mut task = self.inner.task.lock();
        let previous = std::mem::replace(&mut *task, RefreshTask::Stopped);
        if let RefreshTask::Running(handle) = previous {
            handle.abort();
            info!("Stopped live nodes refresh.");
        }
    }

    /// The lifecycle state of the directory.
    pub fn state(&self) -> DirectoryState {
        match &*self.inner.task.lock() {
            RefreshTask::Ready => DirectoryState::Ready,
            RefreshTask::Running(_) => DirectoryState::Running,
            RefreshTask::Stopped => DirectoryState::Stopped,
        }
    }

    /// Selects the next node in round-robin order.
    ///
    /// When request triggered refreshes are enabled this also wakes the
    /// refresh task once the update period has elapsed.
    pub fn next(&self) -> NodeAddress {
        self.inner.maybe_signal_refresh();
        self.inner.next_node()
    }

    /// Refreshes the node list now.
    ///
    /// Unlike the background refresh, failures are returned to the caller.
    /// The current node list is kept on failure.
    pub async fn refresh(&self) -> Result<RefreshOutcome, DiscoveryError> {
        self.inner.refresh().await
    }

    #[inline]
    /// A snapshot of the nodes currently in use.
    pub fn nodes(&self) -> NodeSet {
        NodeSet::clone(&self.inner.nodes.load())
    }

    #[inline]
    /// The seed nodes the directory was created with.
    pub fn initial_nodes(&self) -> &NodeSet {
        &self.inner.initial_nodes
    }

    #[inline]
    /// The datacenter/rack discovery is restricted to.
    pub fn filter(&self) -> &FilterConfig {
        &self.inner.filter
    }

    #[inline]
    /// Gets the live directory statistics.
    pub fn statistics(&self) -> LiveNodesStatistics {
        self.inner.statistics.clone()
    }

    #[inline]
    pub(crate) fn discovery(&self) -> &dyn Discovery {
        self.inner.discovery.as_ref()
    }

    #[inline]
    /// Selects a node without triggering a refresh.
    pub(crate) fn next_node(&self) -> NodeAddress {
        self.inner.next_node()
    }
}

impl Drop for LiveNodes {
    fn drop(&mut self) {
        self.stop();
    }
}

struct LiveNodesInner {
    nodes: ArcSwap<NodeSet>,
    initial_nodes: NodeSet,
    cursor: AtomicUsize,
    filter: FilterConfig,
    update_period: Duration,
    idle_update_period: Option<Duration>,
    discovery: Arc<dyn Discovery>,
    refreshing: AtomicBool,
    created_at: Instant,
    /// Milliseconds since `created_at` after which `next()` may wake the
    /// refresh task.
    next_refresh_at: AtomicU64,
    refresh_signal: Notify,
    statistics: LiveNodesStatistics,
    task: Mutex<RefreshTask>,
}

impl LiveNodesInner {
    fn next_node(&self) -> NodeAddress {
        let nodes = self.nodes.load();
        let cursor = self.cursor.fetch_add(1, Ordering::Relaxed);
        nodes.get_wrapping(cursor).clone()
    }

    fn elapsed_millis(&self) -> u64 {
        as_millis(self.created_at.elapsed())
    }

    fn schedule_next_refresh(&self) {
        let next = self.elapsed_millis().saturating_add(as_millis(self.update_period));
        self.next_refresh_at.store(next, Ordering::Release);
    }

    fn maybe_signal_refresh(&self) {
        if self.idle_update_period.is_none() {
            return;
        }

        let now = self.elapsed_millis();
        let due = self.next_refresh_at.load(Ordering::Acquire);
        if now < due {
            return;
        }

        // Only the caller which moves the deadline forward wakes the task.
        let next = now.saturating_add(as_millis(self.update_period));
        if self
            .next_refresh_at
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Relaxed)
            .is_ok()
        {
            self.refresh_signal.notify_one();
        }
    }

    async fn refresh(&self) -> Result<RefreshOutcome, DiscoveryError> {
        let _guard = match RefreshGuard::acquire(&self.refreshing) {
            Some(guard) => guard,
            None => {
                self.statistics
                    .num_skipped_refreshes
                    .fetch_add(1, Ordering::Relaxed);
                return Ok(RefreshOutcome::Skipped);
            },
        };

        self.schedule_next_refresh();

        let target = self.next_node();
        let nodes = match self.discovery.fetch(&target, &self.filter).await {
            Ok(nodes) => nodes,
            Err(e) => {
                self.statistics
                    .num_failed_refreshes
                    .fetch_add(1, Ordering::Relaxed);
                return Err(e);
            },
        };

        let nodes = match NodeSet::new(nodes) {
            Some(nodes) => nodes,
            None => {
                debug!(
                    target_node = %target,
                    "Node returned an empty node list, keeping current nodes."
                );
                return Ok(RefreshOutcome::Unchanged);
            },
        };

        let num_nodes = nodes.len();
        self.nodes.store(Arc::new(nodes));
        // The new list may be shorter, start from its beginning.
        self.cursor.store(0, Ordering::Relaxed);

        self.statistics
            .num_live_nodes
            .store(num_nodes as u64, Ordering::Relaxed);
        self.statistics.num_refreshes.fetch_add(1, Ordering::Relaxed);

        debug!(
            target_node = %target,
            num_nodes = num_nodes,
            "Updated live nodes."
        );

        Ok(RefreshOutcome::Updated(num_nodes))
    }
}

/// Marks a refresh as in flight until dropped.
///
/// Dropping also happens when the refresh task is aborted mid-request,
/// so an abandoned refresh never blocks later ones.
struct RefreshGuard<'a> {
    flag: &'a AtomicBool,
}

impl<'a> RefreshGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Relaxed)
            .ok()
            .map(|_| Self { flag })
    }
}

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

/// Periodically refreshes the node list until aborted.
///
/// With an idle update period the timer runs on the idle period and
/// `next()` wakes the task whenever the update period has elapsed.
async fn refresh_cycle(inner: Arc<LiveNodesInner>) {
    let period = inner.idle_update_period.unwrap_or(inner.update_period);
    let mut interval = interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {},
            _ = inner.refresh_signal.notified() => {},
        }

        match inner.refresh().await {
            Ok(RefreshOutcome::Skipped) => {
                debug!("Refresh already in progress, skipping.");
            },
            Ok(_) => {},
            Err(e) => {
                warn!(
                    error = %e,
                    num_live_nodes = inner.statistics.num_live_nodes(),
                    "Failed to refresh live nodes, keeping current nodes."
                );
            },
        }
    }
}

fn as_millis(duration: Duration) -> u64 {
    duration.as_millis().try_into().unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Barrier;

    use async_trait::async_trait;

    use super::*;
    use crate::address::AddressTemplate;

    /// Returns a fixed set of hosts, or an error when set to `None`.
    struct StaticDiscovery {
        hosts: Arc<Mutex<Option<Vec<&'static str>>>>,
        targets: Arc<Mutex<Vec<NodeAddress>>>,
        template: AddressTemplate,
    }

    impl StaticDiscovery {
        fn new(hosts: Option<Vec<&'static str>>) -> Self {
            Self {
                hosts: Arc::new(Mutex::new(hosts)),
                targets: Default::default(),
                template: AddressTemplate::default(),
            }
        }
    }

    #[async_trait]
    impl Discovery for StaticDiscovery {
        async fn fetch(
            &self,
            target: &NodeAddress,
            _filter: &FilterConfig,
        ) -> Result<Vec<NodeAddress>, DiscoveryError> {
            self.targets.lock().push(target.clone());

            match self.hosts.lock().clone() {
                Some(hosts) => Ok(hosts
                    .into_iter()
                    .filter_map(|host| self.template.address(host).ok())
                    .collect()),
                None => Err(DiscoveryError::InvalidResponse {
                    target: target.to_string(),
                    source: serde_json::from_slice::<Vec<String>>(b"oops").unwrap_err(),
                }),
            }
        }
    }

    fn hosts(nodes: &NodeSet) -> Vec<&str> {
        nodes.iter().map(|node| node.host()).collect()
    }

    async fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[test]
    fn test_seed_node_is_used_before_refresh() {
        let cfg = LiveNodesConfig::default().with_port(9999);
        let nodes = LiveNodes::with_discovery(["10.0.0.1"], cfg, StaticDiscovery::new(None))
            .expect("Create directory");

        assert_eq!(nodes.state(), DirectoryState::Ready);
        assert_eq!(nodes.next().to_string(), "http://10.0.0.1:9999");
    }

    #[test]
    fn test_construction_errors() {
        let res = LiveNodes::with_discovery(
            Vec::<String>::new(),
            LiveNodesConfig::default(),
            StaticDiscovery::new(None),
        );
        assert!(matches!(res, Err(ConfigurationError::EmptySeedList)));

        let res = LiveNodes::with_discovery(
            ["10.0.0.1", "bad seed"],
            LiveNodesConfig::default(),
            StaticDiscovery::new(None),
        );
        assert!(matches!(res, Err(ConfigurationError::InvalidSeed(_))));

        // A port belongs in the config, not in the seed.
        let res = LiveNodes::with_discovery(
            ["10.0.0.1:8000"],
            LiveNodesConfig::default(),
            StaticDiscovery::new(None),
        );
        assert!(matches!(res, Err(ConfigurationError::InvalidSeed(_))));

        let res = LiveNodes::with_discovery(
            ["10.0.0.1"],
            LiveNodesConfig::default().with_port(0),
            StaticDiscovery::new(None),
        );
        assert!(matches!(res, Err(ConfigurationError::InvalidPort(0))));

        let res = LiveNodes::with_discovery(
            ["10.0.0.1"],
            LiveNodesConfig::default().with_rack("bad rack"),
            StaticDiscovery::new(None),
        );
        assert!(matches!(res, Err(ConfigurationError::InvalidFilter { .. })));
    }

    #[test]
    fn test_sequential_round_robin() {
        let seeds = ["a", "b", "c", "d"];
        let nodes =
            LiveNodes::with_discovery(seeds, LiveNodesConfig::default(), StaticDiscovery::new(None))
                .expect("Create directory");

        let first_node = nodes.next();
        let first = seeds
            .iter()
            .position(|seed| *seed == first_node.host())
            .expect("Node should be a seed");

        for i in 1..=25 {
            let expected = seeds[(first + i) % seeds.len()];
            assert_eq!(nodes.next().host(), expected, "Round robin skipped a node.");
        }
    }

    #[test]
    fn test_concurrent_next_is_fair() {
        let seeds = (1..=10).map(|i| format!("10.0.0.{}", i)).collect::<Vec<_>>();
        let nodes =
            LiveNodes::with_discovery(&seeds, LiveNodesConfig::default(), StaticDiscovery::new(None))
                .expect("Create directory");

        let num_threads = 10;
        let calls_per_thread = 10;
        let barrier = Barrier::new(num_threads);

        let selected = std::thread::scope(|scope| {
            let handles = (0..num_threads)
                .map(|_| {
                    scope.spawn(|| {
                        barrier.wait();
                        (0..calls_per_thread)
                            .map(|_| nodes.next())
                            .collect::<Vec<_>>()
                    })
                })
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|handle| handle.join().expect("Thread should not panic"))
                .collect::<Vec<_>>()
        });

        assert_eq!(selected.len(), 100);

        let mut counts = HashMap::<String, usize>::new();
        for node in selected {
            *counts.entry(node.host().to_string()).or_default() += 1;
        }
        assert_eq!(counts.len(), 10);
        assert!(
            counts.values().all(|count| *count == 10),
            "Expected every node to be selected exactly 10 times, got: {:?}",
            counts,
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces_nodes() {
        let discovery = StaticDiscovery::new(Some(vec!["10.0.0.2", "10.0.0.3", "10.0.0.4"]));
        let targets = discovery.targets.clone();
        let nodes = LiveNodes::with_discovery(["10.0.0.1"], LiveNodesConfig::default(), discovery)
            .expect("Create directory");

        let outcome = nodes.refresh().await.expect("Refresh nodes");
        assert_eq!(outcome, RefreshOutcome::Updated(3));
        assert_eq!(hosts(&nodes.nodes()), ["10.0.0.2", "10.0.0.3", "10.0.0.4"]);
        assert_eq!(hosts(nodes.initial_nodes()), ["10.0.0.1"]);

        // The cursor starts again from the beginning of the new list.
        assert_eq!(nodes.next().host(), "10.0.0.2");
        assert_eq!(nodes.next().host(), "10.0.0.3");

        // Discovery must have been asked from a live node.
        assert_eq!(targets.lock()[0].host(), "10.0.0.1");

        let stats = nodes.statistics();
        assert_eq!(stats.num_live_nodes(), 3);
        assert_eq!(stats.num_refreshes(), 1);
        assert_eq!(stats.num_failed_refreshes(), 0);
    }

    #[tokio::test]
    async fn test_empty_refresh_keeps_nodes() {
        let nodes = LiveNodes::with_discovery(
            ["10.0.0.1", "10.0.0.2"],
            LiveNodesConfig::default(),
            StaticDiscovery::new(Some(vec![])),
        )
        .expect("Create directory");

        let outcome = nodes.refresh().await.expect("Refresh nodes");
        assert_eq!(outcome, RefreshOutcome::Unchanged);
        assert_eq!(hosts(&nodes.nodes()), ["10.0.0.1", "10.0.0.2"]);
        assert_eq!(nodes.statistics().num_refreshes(), 0);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_nodes() {
        let nodes = LiveNodes::with_discovery(
            ["10.0.0.1", "10.0.0.2"],
            LiveNodesConfig::default(),
            StaticDiscovery::new(None),
        )
        .expect("Create directory");

        nodes.refresh().await.expect_err("Refresh should fail");
        assert_eq!(hosts(&nodes.nodes()), ["10.0.0.1", "10.0.0.2"]);
        assert_eq!(nodes.statistics().num_failed_refreshes(), 1);
    }

    /// Takes a while to answer, keeping a refresh in flight.
    struct SlowDiscovery;

    #[async_trait]
    impl Discovery for SlowDiscovery {
        async fn fetch(
            &self,
            _target: &NodeAddress,
            _filter: &FilterConfig,
        ) -> Result<Vec<NodeAddress>, DiscoveryError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            let node = AddressTemplate::default().address("10.0.0.9").unwrap();
            Ok(vec![node])
        }
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_skipped() {
        let nodes =
            LiveNodes::with_discovery(["10.0.0.1"], LiveNodesConfig::default(), SlowDiscovery)
                .expect("Create directory");

        let (first, second) = tokio::join!(nodes.refresh(), async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            nodes.refresh().await
        });

        assert_eq!(first.expect("Refresh nodes"), RefreshOutcome::Updated(1));
        assert_eq!(second.expect("Refresh nodes"), RefreshOutcome::Skipped);
        assert_eq!(nodes.statistics().num_skipped_refreshes(), 1);

        // The flag is released once the first refresh completes.
        assert_eq!(nodes.refresh().await.expect("Refresh nodes"), RefreshOutcome::Updated(1));
        assert_eq!(hosts(&nodes.nodes()), ["10.0.0.9"]);
    }

    #[tokio::test]
    async fn test_background_refresh() {
        let discovery = StaticDiscovery::new(None);
        let hosts_handle = discovery.hosts.clone();
        let cfg = LiveNodesConfig::default().with_update_period(Duration::from_millis(50));
        let nodes =
            LiveNodes::with_discovery(["10.0.0.1"], cfg, discovery).expect("Create directory");

        nodes.start().expect("Start directory");
        assert_eq!(nodes.state(), DirectoryState::Running);

        // Failures are logged and retried, never surfaced.
        let stats = nodes.statistics();
        assert!(wait_for(Duration::from_secs(5), || stats.num_failed_refreshes() >= 2).await);
        assert_eq!(hosts(&nodes.nodes()), ["10.0.0.1"]);

        *hosts_handle.lock() = Some(vec!["10.0.0.5", "10.0.0.6"]);
        assert!(wait_for(Duration::from_secs(5), || stats.num_refreshes() >= 1).await);
        assert_eq!(hosts(&nodes.nodes()), ["10.0.0.5", "10.0.0.6"]);

        nodes.stop();
        assert_eq!(nodes.state(), DirectoryState::Stopped);
    }

    #[tokio::test]
    async fn test_next_triggers_refresh_when_idle_period_is_set() {
        let discovery = StaticDiscovery::new(Some(vec!["10.0.0.2"]));
        let cfg = LiveNodesConfig::default()
            .with_update_period(Duration::from_millis(50))
            .with_idle_update_period(Duration::from_secs(3600));
        let nodes =
            LiveNodes::with_discovery(["10.0.0.1"], cfg, discovery).expect("Create directory");
        nodes.start().expect("Start directory");

        let stats = nodes.statistics();
        assert!(wait_for(Duration::from_secs(5), || stats.num_refreshes() == 1).await);

        // The idle timer will not fire again within the test, only `next()` can.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(stats.num_refreshes(), 1);

        nodes.next();
        assert!(wait_for(Duration::from_secs(5), || stats.num_refreshes() == 2).await);
    }

    #[tokio::test]
    async fn test_stop_is_idempotent() {
        let nodes = LiveNodes::with_discovery(
            ["10.0.0.1"],
            LiveNodesConfig::default(),
            StaticDiscovery::new(None),
        )
        .expect("Create directory");

        // Stopping before the first iteration completes.
        nodes.start().expect("Start directory");
        nodes.stop();
        nodes.stop();
        assert_eq!(nodes.state(), DirectoryState::Stopped);

        // A stopped directory stays stopped but keeps serving nodes.
        nodes.start().expect("Start is a no-op");
        assert_eq!(nodes.state(), DirectoryState::Stopped);
        assert_eq!(nodes.next().host(), "10.0.0.1");
    }

    #[test]
    fn test_start_requires_runtime() {
        let nodes = LiveNodes::with_discovery(
            ["10.0.0.1"],
            LiveNodesConfig::default(),
            StaticDiscovery::new(None),
        )
        .expect("Create directory");

        assert!(matches!(nodes.start(), Err(ConfigurationError::NoRuntime)));
        assert_eq!(nodes.state(), DirectoryState::Ready);
    }
}
