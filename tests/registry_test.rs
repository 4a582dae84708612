//! Tests for the heartbeat registry and registry-backed discovery.

use std::time::Duration;

use microrpc::registry::DEFAULT_REGISTRY_PATH;
use microrpc::{
    start_heartbeat, BalanceClient, Discover, Registry, RegistryDiscovery, SelectMode, Server,
    Service, ServiceBuilder,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Args {
    num1: i32,
    num2: i32,
}

struct Arith;

fn arith_service() -> Service {
    ServiceBuilder::new("Arith", Arith)
        .method("Sum", |_: &Arith, args: Args, reply: &mut i32| {
            *reply = args.num1 + args.num2;
            Ok(())
        })
        .build()
}

async fn start_registry(timeout: Duration) -> String {
    let registry = Registry::new(timeout);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!(
        "http://{}{}",
        listener.local_addr().unwrap(),
        DEFAULT_REGISTRY_PATH
    );
    tokio::spawn(registry.serve(listener));
    url
}

async fn start_rpc_server() -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Server::new();
    server.register(arith_service()).unwrap();
    tokio::spawn(server.accept(listener));
    addr
}

async fn servers_header(client: &reqwest::Client, url: &str) -> String {
    let response = client.get(url).send().await.unwrap();
    assert_eq!(response.status().as_u16(), 200);
    response
        .headers()
        .get("micro-rpc-servers")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("")
        .to_string()
}

#[tokio::test]
async fn get_returns_sorted_alive_servers() {
    let url = start_registry(Duration::from_secs(300)).await;
    let client = reqwest::Client::new();

    for endpoint in ["tcp@127.0.0.1:9002", "tcp@127.0.0.1:9001"] {
        let status = client
            .post(&url)
            .header("micro-rpc-server", endpoint)
            .send()
            .await
            .unwrap()
            .status();
        assert_eq!(status.as_u16(), 200);
    }

    assert_eq!(
        servers_header(&client, &url).await,
        "tcp@127.0.0.1:9001,tcp@127.0.0.1:9002"
    );
}

#[tokio::test]
async fn post_without_header_is_a_server_error() {
    let url = start_registry(Duration::from_secs(300)).await;
    let client = reqwest::Client::new();

    let status = client.post(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 500);
}

#[tokio::test]
async fn other_methods_are_not_allowed() {
    let url = start_registry(Duration::from_secs(300)).await;
    let client = reqwest::Client::new();

    let status = client.delete(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 405);
    let status = client.put(&url).send().await.unwrap().status();
    assert_eq!(status.as_u16(), 405);
}

#[tokio::test]
async fn entries_expire_without_heartbeats() {
    let url = start_registry(Duration::from_millis(150)).await;
    let client = reqwest::Client::new();

    client
        .post(&url)
        .header("micro-rpc-server", "tcp@127.0.0.1:9001")
        .send()
        .await
        .unwrap();
    assert_eq!(servers_header(&client, &url).await, "tcp@127.0.0.1:9001");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(servers_header(&client, &url).await, "");
}

#[tokio::test]
async fn heartbeat_keeps_an_entry_alive() {
    let url = start_registry(Duration::from_millis(300)).await;
    let client = reqwest::Client::new();

    start_heartbeat("tcp@127.0.0.1:9001", url.clone(), Some(Duration::from_millis(100)));

    // Well past the registry timeout, the heartbeats have kept it alive.
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(servers_header(&client, &url).await, "tcp@127.0.0.1:9001");
}

#[tokio::test]
async fn discovery_sees_heartbeating_servers_and_calls_them() {
    let url = start_registry(Duration::from_secs(300)).await;
    let addr_a = start_rpc_server().await;
    let addr_b = start_rpc_server().await;

    start_heartbeat(format!("tcp@{addr_a}"), url.clone(), Some(Duration::from_secs(60)));
    start_heartbeat(format!("tcp@{addr_b}"), url.clone(), Some(Duration::from_secs(60)));
    tokio::time::sleep(Duration::from_millis(300)).await;

    let discovery = RegistryDiscovery::new(url.clone(), None);
    let mut endpoints = discovery.get_all().await.unwrap();
    endpoints.sort();
    let mut expected = vec![format!("tcp@{addr_a}"), format!("tcp@{addr_b}")];
    expected.sort();
    assert_eq!(endpoints, expected);

    let balance = BalanceClient::new(SelectMode::RoundRobin, discovery, None);
    for i in 0..4i32 {
        let reply: i32 = balance
            .call("Arith.Sum", &Args { num1: i, num2: i * i })
            .await
            .unwrap();
        assert_eq!(reply, i + i * i);
    }
    balance.close().await;
}
