use async_trait::async_trait;
use reqwest::StatusCode;

use crate::address::{AddressTemplate, NodeAddress};
use crate::config::{FilterConfig, LiveNodesConfig};
use crate::error::{ConfigurationError, DiscoveryError};
use crate::LOCAL_NODES_PATH;

#[async_trait]
/// A source of the cluster's current node list.
pub trait Discovery: Send + Sync + 'static {
    /// Asks `target` for the nodes matching `filter`.
    ///
    /// An empty list means the node had nothing to offer and the caller
    /// should keep whatever it already knows.
    async fn fetch(
        &self,
        target: &NodeAddress,
        filter: &FilterConfig,
    ) -> Result<Vec<NodeAddress>, DiscoveryError>;
}

#[derive(Debug, Clone)]
/// Discovers nodes via Alternator's `/localnodes` HTTP endpoint.
pub struct HttpDiscovery {
    client: reqwest::Client,
    template: AddressTemplate,
}

impl HttpDiscovery {
    pub fn new(client: reqwest::Client, template: AddressTemplate) -> Self {
        Self { client, template }
    }

    /// Creates a new discovery client using the provided settings.
    pub fn from_config(cfg: &LiveNodesConfig) -> Result<Self, ConfigurationError> {
        let template = cfg.validate()?;
        let client = cfg.build_http_client()?;
        Ok(Self::new(client, template))
    }

    #[inline]
    pub fn template(&self) -> &AddressTemplate {
        &self.template
    }
}

#[async_trait]
impl Discovery for HttpDiscovery {
    async fn fetch(
        &self,
        target: &NodeAddress,
        filter: &FilterConfig,
    ) -> Result<Vec<NodeAddress>, DiscoveryError> {
        let url = target.url(LOCAL_NODES_PATH, filter.query().as_deref());

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|source| DiscoveryError::Request {
                target: url.clone(),
                source,
            })?;

        if response.status() != StatusCode::OK {
            debug!(
                target_url = %url,
                status = %response.status(),
                "Node did not return a node list."
            );
            return Ok(Vec::new());
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| DiscoveryError::Request {
                target: url.clone(),
                source,
            })?;

        parse_local_nodes(&body, &self.template).map_err(|source| {
            DiscoveryError::InvalidResponse {
                target: url,
                source,
            }
        })
    }
}

/// Parses a `/localnodes` response body.
///
/// The body is a JSON array of host names, e.g. `["127.0.0.2","127.0.0.3"]`.
/// Entries which are not strings or do not form a valid address are skipped.
pub fn parse_local_nodes(
    body: &[u8],
    template: &AddressTemplate,
) -> Result<Vec<NodeAddress>, serde_json::Error> {
    let entries: Vec<serde_json::Value> = serde_json::from_slice(body)?;

    let mut nodes = Vec::with_capacity(entries.len());
    for entry in entries {
        let host = match entry.as_str() {
            Some(host) => host,
            None => {
                warn!(entry = %entry, "Skipping non-string entry in node list.");
                continue;
            },
        };

        match template.address(host) {
            Ok(node) => nodes.push(node),
            Err(e) => warn!(error = %e, "Skipping invalid host in node list."),
        }
    }

    Ok(nodes)
}
