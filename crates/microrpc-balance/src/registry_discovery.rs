//! Discovery backed by the heartbeat registry's HTTP surface.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use microrpc_common::{Result, RpcError, SERVERS_HEADER};
use tokio::sync::RwLock;
use tracing::info;

use crate::discovery::{Discover, EndpointSet, SelectMode};

/// How long a fetched endpoint list stays fresh.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(10);

/// Discovery that refreshes its endpoint set from a registry URL.
///
/// Every `get`/`get_all` first refreshes iff the last fetch is older than
/// the update timeout. The staleness check and the fetch run under the same
/// write lock, so concurrent callers never stampede the registry: one
/// refreshes, the rest observe a fresh timestamp and bail out.
pub struct RegistryDiscovery {
    registry_url: String,
    update_timeout: Duration,
    state: RwLock<RegistryState>,
}

struct RegistryState {
    endpoints: EndpointSet,
    last_update: Option<Instant>,
}

impl RegistryDiscovery {
    pub fn new(registry_url: impl Into<String>, update_timeout: Option<Duration>) -> Self {
        Self {
            registry_url: registry_url.into(),
            update_timeout: update_timeout.unwrap_or(DEFAULT_UPDATE_TIMEOUT),
            state: RwLock::new(RegistryState {
                endpoints: EndpointSet::new(Vec::new()),
                last_update: None,
            }),
        }
    }

    async fn refresh_if_stale(&self) -> Result<()> {
        let mut state = self.state.write().await;
        if let Some(last_update) = state.last_update {
            if last_update.elapsed() < self.update_timeout {
                return Ok(());
            }
        }

        info!(url = %self.registry_url, "rpc registry: refresh servers from registry");
        let response = reqwest::get(&self.registry_url)
            .await
            .map_err(|err| RpcError::Registry(err.to_string()))?;
        let endpoints: Vec<String> = response
            .headers()
            .get(SERVERS_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("")
            .split(',')
            .map(str::trim)
            .filter(|endpoint| !endpoint.is_empty())
            .map(String::from)
            .collect();

        state.endpoints.replace(endpoints);
        state.last_update = Some(Instant::now());
        Ok(())
    }
}

#[async_trait]
impl Discover for RegistryDiscovery {
    async fn refresh(&self) -> Result<()> {
        self.refresh_if_stale().await
    }

    async fn update(&self, endpoints: Vec<String>) -> Result<()> {
        let mut state = self.state.write().await;
        state.endpoints.replace(endpoints);
        state.last_update = Some(Instant::now());
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.refresh_if_stale().await?;
        self.state.write().await.endpoints.select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        self.refresh_if_stale().await?;
        Ok(self.state.read().await.endpoints.all())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn manual_update_marks_the_set_fresh() {
        // Pointing at a dead URL: get must not try to refresh after a
        // manual update within the timeout window.
        let discovery = RegistryDiscovery::new("http://127.0.0.1:1/registry", None);
        discovery
            .update(vec!["tcp@127.0.0.1:9001".to_string()])
            .await
            .unwrap();
        assert_eq!(
            discovery.get(SelectMode::RoundRobin).await.unwrap(),
            "tcp@127.0.0.1:9001"
        );
    }

    #[tokio::test]
    async fn stale_set_propagates_refresh_errors() {
        let discovery =
            RegistryDiscovery::new("http://127.0.0.1:1/registry", Some(Duration::ZERO));
        let err = discovery.get(SelectMode::Random).await.unwrap_err();
        assert!(matches!(err, RpcError::Registry(_)));
    }
}
