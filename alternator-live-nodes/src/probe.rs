use crate::config::{FilterConfig, LiveNodesConfig};
use crate::directory::LiveNodes;
use crate::error::{FilterSelectionError, ProbeError, ValidationError};

/// A rack name no cluster is expected to have.
pub const FAKE_RACK: &str = "fakeRack";

impl LiveNodes {
    /// Creates a new directory, relaxing the configured filter until the
    /// cluster returns nodes for it.
    ///
    /// - A cluster which ignores rack/datacenter filtering gets no filter.
    /// - An unknown rack is dropped and the datacenter alone is checked again.
    /// - An unknown datacenter drops the filter entirely.
    ///
    /// The returned directory is not started.
    pub async fn with_supported_filter<S>(
        seeds: impl IntoIterator<Item = S>,
        mut config: LiveNodesConfig,
    ) -> Result<Self, FilterSelectionError>
    where
        S: AsRef<str>,
    {
        let seeds = seeds
            .into_iter()
            .map(|seed| seed.as_ref().to_string())
            .collect::<Vec<_>>();

        loop {
            let nodes = Self::new(&seeds, config.clone())?;
            if nodes.filter().is_empty() {
                return Ok(nodes);
            }

            if !nodes.check_filter_supported().await? {
                warn!(
                    seed_nodes = ?seeds,
                    "Cluster does not support rack/datacenter filtering, falling back to no filter."
                );
                let config = config.with_filter(FilterConfig::default());
                return Ok(Self::new(&seeds, config)?);
            }

            match nodes.check_filter_configured().await {
                Ok(()) => return Ok(nodes),
                Err(ValidationError::Discovery(e)) => return Err(e.into()),
                Err(ValidationError::EmptyNodeList { .. }) if !config.filter.rack.is_empty() => {
                    warn!(
                        seed_nodes = ?seeds,
                        rack = %config.filter.rack,
                        datacenter = %config.filter.datacenter,
                        "Cluster does not know the rack, falling back to no rack."
                    );
                    config.filter.rack.clear();
                },
                Err(ValidationError::EmptyNodeList { .. }) => {
                    warn!(
                        seed_nodes = ?seeds,
                        datacenter = %config.filter.datacenter,
                        "Cluster does not know the datacenter, falling back to no filter."
                    );
                    let config = config.with_filter(FilterConfig::default());
                    return Ok(Self::new(&seeds, config)?);
                },
            }
        }
    }

    /// Checks the configured datacenter/rack is known to the cluster.
    ///
    /// Does nothing when no filter is configured. A filter the cluster
    /// returns no nodes for is rejected.
    pub async fn check_filter_configured(&self) -> Result<(), ValidationError> {
        let filter = self.filter();
        let query = match filter.query() {
            None => return Ok(()),
            Some(query) => query,
        };

        let target = self.next_node();
        let nodes = self.discovery().fetch(&target, filter).await?;

        if nodes.is_empty() {
            return Err(ValidationError::EmptyNodeList {
                target: target.to_string(),
                query,
            });
        }

        Ok(())
    }

    /// Checks whether the cluster honours rack/datacenter filtering.
    ///
    /// The same node is asked for its nodes with a rack which cannot exist
    /// and without any filter. A server which ignores the filter returns
    /// the same number of nodes for both.
    pub async fn check_filter_supported(&self) -> Result<bool, ProbeError> {
        let target = self.next_node();
        let discovery = self.discovery();

        let with_fake_rack = discovery
            .fetch(&target, &FilterConfig::rack(FAKE_RACK))
            .await?;
        let without_filter = discovery.fetch(&target, &FilterConfig::default()).await?;

        if without_filter.is_empty() {
            return Err(ProbeError::EmptyNodeList {
                target: target.to_string(),
            });
        }

        let supported = with_fake_rack.len() != without_filter.len();
        debug!(
            target_node = %target,
            supported = supported,
            "Checked rack/datacenter filtering support."
        );

        Ok(supported)
    }
}
