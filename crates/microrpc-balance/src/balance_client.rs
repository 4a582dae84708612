//! The load-balanced client: endpoint selection, connection reuse, fan-out.

use std::collections::HashMap;
use std::sync::Mutex as StdMutex;

use microrpc_client::{general_dial, Client};
use microrpc_common::{Options, Result, RpcError};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{watch, Mutex};

use crate::discovery::{Discover, SelectMode};

/// A client that multiplexes calls across the endpoints a [`Discover`]
/// yields, reusing one [`Client`] per endpoint.
pub struct BalanceClient<D: Discover> {
    mode: SelectMode,
    discover: D,
    options: Options,
    /// Endpoint -> connected client. One coarse lock covers lookup and
    /// dial; contention is low because dials are rare.
    clients: Mutex<HashMap<String, Client>>,
}

struct BroadcastState<R> {
    first_error: Option<RpcError>,
    reply: Option<R>,
}

impl<D: Discover> BalanceClient<D> {
    pub fn new(mode: SelectMode, discover: D, options: Option<Options>) -> Self {
        Self {
            mode,
            discover,
            options: options.unwrap_or_default(),
            clients: Mutex::new(HashMap::new()),
        }
    }

    /// The discovery backing this client, e.g. to push endpoint updates.
    pub fn discover(&self) -> &D {
        &self.discover
    }

    /// Fetch the cached client for `endpoint`, evicting it first if the
    /// connection went away, or dial a fresh one.
    async fn dial(&self, endpoint: &str) -> Result<Client> {
        let mut clients = self.clients.lock().await;
        if let Some(client) = clients.get(endpoint) {
            if client.is_available() {
                return Ok(client.clone());
            }
        }
        // Cached but no longer usable: close and evict before redialing.
        if let Some(stale) = clients.remove(endpoint) {
            let _ = stale.close().await;
        }
        let client = general_dial(endpoint, Some(self.options.clone())).await?;
        clients.insert(endpoint.to_string(), client.clone());
        Ok(client)
    }

    async fn call_endpoint<A, R>(&self, endpoint: &str, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let client = self.dial(endpoint).await?;
        client.call(service_method, args).await
    }

    /// Select an endpoint by the configured mode and invoke the method there.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + Sync,
        R: DeserializeOwned,
    {
        let endpoint = self.discover.get(self.mode).await?;
        self.call_endpoint(&endpoint, service_method, args).await
    }

    /// Invoke the method on every known endpoint concurrently.
    ///
    /// The first failure is returned and cancels the calls still in flight;
    /// the first success is written into `reply` and later successes are
    /// discarded. `Ok` means at least one endpoint succeeded and none
    /// failed. `reply` may be written even when an error is returned.
    pub async fn broadcast<A, R>(
        &self,
        service_method: &str,
        args: &A,
        reply: &mut R,
    ) -> Result<()>
    where
        A: Serialize + Sync,
        R: DeserializeOwned + Send,
    {
        let endpoints = self.discover.get_all().await?;
        let state = StdMutex::new(BroadcastState::<R> {
            first_error: None,
            reply: None,
        });
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let calls = endpoints.iter().map(|endpoint| {
            let mut cancelled = cancel_rx.clone();
            let state = &state;
            let cancel_tx = &cancel_tx;
            async move {
                let result = tokio::select! {
                    result = self.call_endpoint::<A, R>(endpoint, service_method, args) => result,
                    // Dropping the call future removes its in-flight entry;
                    // a reply already on the wire is consumed as an orphan.
                    _ = cancelled.changed() => return,
                };
                let mut state = state.lock().unwrap();
                match result {
                    Err(err) => {
                        if state.first_error.is_none() {
                            state.first_error = Some(err);
                            let _ = cancel_tx.send(true);
                        }
                    }
                    Ok(value) => {
                        // First writer wins.
                        if state.reply.is_none() {
                            state.reply = Some(value);
                        }
                    }
                }
            }
        });
        futures::future::join_all(calls).await;

        let state = state.into_inner().unwrap();
        if let Some(value) = state.reply {
            *reply = value;
        }
        match state.first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Close every cached client and clear the cache.
    pub async fn close(&self) {
        let mut clients = self.clients.lock().await;
        for (_, client) in clients.drain() {
            let _ = client.close().await;
        }
    }
}
