//! microrpc: a small RPC framework.
//!
//! The pieces, leaves first:
//!
//! - [`common`]: the wire protocol, with the handshake [`Options`], the
//!   frame [`Header`] and the length-prefixed codec.
//! - [`server`]: named services with typed method tables and the
//!   per-connection request pipeline.
//! - [`client`]: one caller per connection, multiplexing concurrent calls
//!   by sequence number.
//! - [`balance`]: endpoint discovery (static or registry-backed) and the
//!   load-balanced client with broadcast.
//! - [`registry`]: the heartbeat HTTP registry servers announce
//!   themselves to.

pub use microrpc_balance as balance;
pub use microrpc_client as client;
pub use microrpc_common as common;
pub use microrpc_registry as registry;
pub use microrpc_server as server;

pub use microrpc_balance::{
    BalanceClient, Discover, RegistryDiscovery, SelectMode, StaticDiscovery,
};
pub use microrpc_client::{dial, dial_http, general_dial, Call, Client};
pub use microrpc_common::{Header, Options, Result, RpcError};
pub use microrpc_registry::{start_heartbeat, Registry};
pub use microrpc_server::{Server, Service, ServiceBuilder};
