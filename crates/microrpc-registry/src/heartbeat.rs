//! Periodic server heartbeats against a registry.

use std::time::Duration;

use microrpc_common::{Result, RpcError, SERVER_HEADER};
use tracing::{debug, error};

/// Default heartbeat period: one minute inside the registry timeout.
pub const DEFAULT_HEARTBEAT_PERIOD: Duration = Duration::from_secs(4 * 60);

/// Spawn a task POSTing `server_addr` to `registry_url` once immediately
/// and then at every period tick. The first send error ends the task.
pub fn start_heartbeat(
    server_addr: impl Into<String>,
    registry_url: impl Into<String>,
    period: Option<Duration>,
) -> tokio::task::JoinHandle<()> {
    let server_addr = server_addr.into();
    let registry_url = registry_url.into();
    let period = period.unwrap_or(DEFAULT_HEARTBEAT_PERIOD);

    tokio::spawn(async move {
        let client = reqwest::Client::new();
        let mut ticker = tokio::time::interval(period);
        loop {
            // The first tick completes immediately.
            ticker.tick().await;
            if let Err(err) = send_heartbeat(&client, &server_addr, &registry_url).await {
                error!(error = %err, server = %server_addr, "rpc server: heart beat error");
                return;
            }
        }
    })
}

async fn send_heartbeat(
    client: &reqwest::Client,
    server_addr: &str,
    registry_url: &str,
) -> Result<()> {
    debug!(server = %server_addr, registry = %registry_url, "send heart beat to registry");
    client
        .post(registry_url)
        .header(SERVER_HEADER, server_addr)
        .send()
        .await
        .map_err(|err| RpcError::Registry(err.to_string()))?;
    Ok(())
}
