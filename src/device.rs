//! Access to the heating controller.
//!
//! The workflow only sees [`DeviceClient`]; [`HttpDevice`] is the adapter used
//! by the binary. It talks to a small JSON bridge in front of the controller:
//!
//! - `GET  {endpoint}/sections` returns `{section: group-shape, ...}`
//! - `POST {endpoint}/sections/{section}` with the shape returns the populated group

use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use reqwest::Url;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::tree::{ConfigTree, Group};

/// Source of live configuration values.
#[async_trait]
pub trait DeviceClient: Send + Sync {
    /// Every retrievable section with its (unpopulated) shape.
    async fn list_sections(&self) -> Result<IndexMap<String, Group>>;

    /// Fill in live values for one section. Potentially slow.
    async fn retrieve(&self, section: &str, shape: Group) -> Result<Group>;
}

/// Retrieve the whole live tree: list once, then fetch every section once, in
/// listing order.
pub async fn fetch_live_tree(device: &dyn DeviceClient) -> Result<ConfigTree> {
    let shapes = device.list_sections().await?;
    let mut tree = ConfigTree::new();
    for (section, shape) in shapes {
        info!(section = %section, "retrieving section");
        let group = device.retrieve(&section, shape).await?;
        tree.sections.insert(section, group);
    }
    debug!(entries = tree.entry_count(), "live tree retrieved");
    Ok(tree)
}

/// [`fetch_live_tree`] bounded by `limit`. Expiry counts as the device being
/// unavailable.
pub async fn fetch_live_tree_within(device: &dyn DeviceClient, limit: Duration) -> Result<ConfigTree> {
    match tokio::time::timeout(limit, fetch_live_tree(device)).await {
        Ok(result) => result,
        Err(_) => Err(Error::DeviceUnavailable(format!(
            "no complete answer within {limit:?}"
        ))),
    }
}

/// JSON-over-HTTP adapter.
pub struct HttpDevice {
    client: reqwest::Client,
    endpoint: Url,
    request_timeout: Duration,
}

impl HttpDevice {
    pub fn new(endpoint: &str, request_timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| Error::DeviceUnavailable(format!("invalid endpoint `{endpoint}`: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(Error::DeviceUnavailable(format!(
                "endpoint `{endpoint}` cannot carry a path"
            )));
        }
        Ok(Self {
            client: reqwest::Client::new(),
            endpoint,
            request_timeout,
        })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|_| Error::DeviceUnavailable(format!("endpoint `{}` cannot carry a path", self.endpoint)))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }
}

#[async_trait]
impl DeviceClient for HttpDevice {
    async fn list_sections(&self) -> Result<IndexMap<String, Group>> {
        let url = self.url(&["sections"])?;
        let shapes: IndexMap<String, Group> = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(shapes)
    }

    async fn retrieve(&self, section: &str, shape: Group) -> Result<Group> {
        let url = self.url(&["sections", section])?;
        let group: Group = self
            .client
            .post(url)
            .json(&shape)
            .timeout(self.request_timeout)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(group)
    }
}
