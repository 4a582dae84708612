//! microrpc registry: server liveness tracked by heartbeats.
//!
//! The [`Registry`] is a small HTTP service. Servers POST their endpoint to
//! it periodically (see [`start_heartbeat`]); clients GET it and receive
//! the currently alive endpoints in the `micro-rpc-servers` response
//! header. An entry whose last heartbeat is older than the registry timeout
//! is evicted on the next GET.

mod heartbeat;

pub use heartbeat::start_heartbeat;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use microrpc_common::{Result, RpcError, SERVERS_HEADER, SERVER_HEADER};
use tracing::info;

/// Path the registry serves under by default.
pub const DEFAULT_REGISTRY_PATH: &str = "/micro-rpc/registry";

/// How long a heartbeat keeps a server alive.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// One registered server and the time of its last heartbeat.
#[derive(Debug, Clone)]
pub struct ServerStatus {
    pub address: String,
    start_time: Instant,
}

/// The register center: endpoint -> last heartbeat, with timeout-based
/// eviction. A timeout of zero disables eviction.
pub struct Registry {
    timeout: Duration,
    servers: Mutex<HashMap<String, ServerStatus>>,
}

impl Registry {
    pub fn new(timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            timeout,
            servers: Mutex::new(HashMap::new()),
        })
    }

    /// Upsert a server; a known address just gets its timestamp refreshed.
    fn add_server(&self, address: &str) {
        let mut servers = self.servers.lock().unwrap();
        match servers.get_mut(address) {
            Some(status) => status.start_time = Instant::now(),
            None => {
                servers.insert(
                    address.to_string(),
                    ServerStatus {
                        address: address.to_string(),
                        start_time: Instant::now(),
                    },
                );
            }
        }
    }

    /// The alive addresses, sorted; expired entries are evicted on the way.
    fn alive_servers(&self) -> Vec<String> {
        let mut servers = self.servers.lock().unwrap();
        if !self.timeout.is_zero() {
            let now = Instant::now();
            servers.retain(|_, status| now.duration_since(status.start_time) < self.timeout);
        }
        let mut alive: Vec<String> = servers.keys().cloned().collect();
        alive.sort();
        alive
    }

    /// Number of currently registered (not necessarily alive) servers.
    pub fn len(&self) -> usize {
        self.servers.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.servers.lock().unwrap().is_empty()
    }

    /// The registry as an axum router at [`DEFAULT_REGISTRY_PATH`].
    pub fn router(self: &Arc<Self>) -> Router {
        self.router_at(DEFAULT_REGISTRY_PATH)
    }

    /// The registry as an axum router at a custom path. Methods other than
    /// GET and POST are answered with 405 by the method router.
    pub fn router_at(self: &Arc<Self>, path: &str) -> Router {
        info!(%path, "rpc registry: serving");
        Router::new()
            .route(path, get(get_servers).post(post_server))
            .with_state(Arc::clone(self))
    }

    /// Serve the registry on `listener` until the server fails.
    pub async fn serve(self: Arc<Self>, listener: tokio::net::TcpListener) -> Result<()> {
        let app = self.router();
        axum::serve(listener, app)
            .await
            .map_err(|err| RpcError::Registry(err.to_string()))
    }
}

/// GET: the alive server list in the `micro-rpc-servers` header.
async fn get_servers(State(registry): State<Arc<Registry>>) -> impl IntoResponse {
    let alive = registry.alive_servers().join(",");
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&alive) {
        Ok(value) => {
            headers.insert(HeaderName::from_static(SERVERS_HEADER), value);
            (StatusCode::OK, headers)
        }
        Err(_) => (StatusCode::INTERNAL_SERVER_ERROR, headers),
    }
}

/// POST: upsert the server named in the `micro-rpc-server` header.
async fn post_server(State(registry): State<Arc<Registry>>, headers: HeaderMap) -> StatusCode {
    let address = headers
        .get(SERVER_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|address| !address.is_empty());
    match address {
        Some(address) => {
            registry.add_server(address);
            StatusCode::OK
        }
        None => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
