//! microrpc load balancing: endpoint discovery and the balanced client.
//!
//! A [`BalanceClient`] selects an endpoint per call through a [`Discover`]
//! implementation ([`StaticDiscovery`] over a fixed list, or
//! [`RegistryDiscovery`] refreshed from the heartbeat registry) and reuses
//! one connection per endpoint. [`BalanceClient::broadcast`] fans a call
//! out to every endpoint at once.

mod balance_client;
mod discovery;
mod registry_discovery;

pub use balance_client::BalanceClient;
pub use discovery::{Discover, SelectMode, StaticDiscovery};
pub use registry_discovery::{RegistryDiscovery, DEFAULT_UPDATE_TIMEOUT};
