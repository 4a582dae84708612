//! Endpoint discovery: a selectable, refreshable set of server endpoints.

use std::sync::RwLock;

use async_trait::async_trait;
use microrpc_common::{Result, RpcError};
use rand::Rng;

/// How [`Discover::get`] picks an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectMode {
    /// Uniform over the current endpoint set.
    Random,
    /// Monotonic index modulo the set size.
    RoundRobin,
}

/// An ordered set of `protocol@host:port` endpoints, optionally refreshed
/// from a remote registry.
#[async_trait]
pub trait Discover: Send + Sync {
    /// Re-fetch the endpoint set from its source, if it has one.
    async fn refresh(&self) -> Result<()>;

    /// Replace the endpoint set.
    async fn update(&self, endpoints: Vec<String>) -> Result<()>;

    /// Select one endpoint according to `mode`.
    async fn get(&self, mode: SelectMode) -> Result<String>;

    /// A copy of every known endpoint.
    async fn get_all(&self) -> Result<Vec<String>>;
}

/// Selection state shared by the discovery variants.
pub(crate) struct EndpointSet {
    endpoints: Vec<String>,
    index: usize,
}

impl EndpointSet {
    /// The round-robin index starts at a random position so many client
    /// instances spread their first picks across the set.
    pub(crate) fn new(endpoints: Vec<String>) -> Self {
        Self {
            endpoints,
            index: rand::thread_rng().gen_range(0..u32::MAX as usize),
        }
    }

    pub(crate) fn select(&mut self, mode: SelectMode) -> Result<String> {
        let n = self.endpoints.len();
        if n == 0 {
            return Err(RpcError::NoAvailableServices);
        }
        match mode {
            SelectMode::Random => Ok(self.endpoints[rand::thread_rng().gen_range(0..n)].clone()),
            SelectMode::RoundRobin => {
                let endpoint = self.endpoints[self.index % n].clone();
                self.index = (self.index + 1) % n;
                Ok(endpoint)
            }
        }
    }

    pub(crate) fn replace(&mut self, endpoints: Vec<String>) {
        self.endpoints = endpoints;
    }

    pub(crate) fn all(&self) -> Vec<String> {
        self.endpoints.clone()
    }
}

/// Discovery without a registry: the user supplies the endpoints.
pub struct StaticDiscovery {
    state: RwLock<EndpointSet>,
}

impl StaticDiscovery {
    pub fn new(endpoints: Vec<String>) -> Self {
        Self {
            state: RwLock::new(EndpointSet::new(endpoints)),
        }
    }
}

#[async_trait]
impl Discover for StaticDiscovery {
    async fn refresh(&self) -> Result<()> {
        Ok(())
    }

    async fn update(&self, endpoints: Vec<String>) -> Result<()> {
        self.state.write().unwrap().replace(endpoints);
        Ok(())
    }

    async fn get(&self, mode: SelectMode) -> Result<String> {
        self.state.write().unwrap().select(mode)
    }

    async fn get_all(&self) -> Result<Vec<String>> {
        Ok(self.state.read().unwrap().all())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn endpoints() -> Vec<String> {
        vec![
            "tcp@127.0.0.1:9001".to_string(),
            "tcp@127.0.0.1:9002".to_string(),
            "tcp@127.0.0.1:9003".to_string(),
        ]
    }

    #[tokio::test]
    async fn round_robin_cycles_through_all() {
        let discovery = StaticDiscovery::new(endpoints());
        let mut seen = Vec::new();
        for _ in 0..3 {
            seen.push(discovery.get(SelectMode::RoundRobin).await.unwrap());
        }
        // One full cycle visits every endpoint exactly once, starting
        // wherever the randomized index landed.
        let distinct: HashSet<_> = seen.iter().cloned().collect();
        assert_eq!(distinct.len(), 3);

        // The next cycle repeats the same order.
        for endpoint in &seen {
            assert_eq!(&discovery.get(SelectMode::RoundRobin).await.unwrap(), endpoint);
        }
    }

    #[tokio::test]
    async fn random_stays_within_the_set() {
        let discovery = StaticDiscovery::new(endpoints());
        let all: HashSet<_> = endpoints().into_iter().collect();
        for _ in 0..50 {
            let picked = discovery.get(SelectMode::Random).await.unwrap();
            assert!(all.contains(&picked));
        }
    }

    #[tokio::test]
    async fn empty_set_has_no_available_services() {
        let discovery = StaticDiscovery::new(Vec::new());
        for mode in [SelectMode::Random, SelectMode::RoundRobin] {
            let err = discovery.get(mode).await.unwrap_err();
            assert!(matches!(err, RpcError::NoAvailableServices));
        }
        assert!(discovery.get_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn update_replaces_the_set() {
        let discovery = StaticDiscovery::new(endpoints());
        discovery
            .update(vec!["tcp@127.0.0.1:9009".to_string()])
            .await
            .unwrap();
        assert_eq!(
            discovery.get(SelectMode::RoundRobin).await.unwrap(),
            "tcp@127.0.0.1:9009"
        );
        assert_eq!(discovery.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refresh_is_a_no_op() {
        let discovery = StaticDiscovery::new(endpoints());
        discovery.refresh().await.unwrap();
        assert_eq!(discovery.get_all().await.unwrap(), endpoints());
    }
}
