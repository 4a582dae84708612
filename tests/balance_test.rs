//! Tests for discovery and the load-balanced client.

use microrpc::{BalanceClient, RpcError, SelectMode, Server, Service, ServiceBuilder, StaticDiscovery};
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

fn failing_arith_service() -> Service {
    ServiceBuilder::new("Arith", Arith)
        .method("Sum", |_: &Arith, _: Args, _: &mut i32| Err("boom".into()))
        .build()
}

/// A service whose reply names the server it ran on.
fn tagged_service(tag: &str) -> Service {
    struct Tag(String);
    ServiceBuilder::new("Node", Tag(tag.to_string()))
        .method("Name", |tag: &Tag, _: (), reply: &mut String| {
            *reply = tag.0.clone();
            Ok(())
        })
        .build()
}

async fn start_server(service: Service) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let server = Server::new();
    server.register(service).unwrap();
    tokio::spawn(server.accept(listener));
    format!("tcp@{addr}")
}

#[tokio::test]
async fn call_balances_round_robin_across_servers() {
    let endpoint_a = start_server(tagged_service("a")).await;
    let endpoint_b = start_server(tagged_service("b")).await;

    let discovery = StaticDiscovery::new(vec![endpoint_a, endpoint_b]);
    let balance = BalanceClient::new(SelectMode::RoundRobin, discovery, None);

    let mut names = Vec::new();
    for _ in 0..4 {
        let name: String = balance.call("Node.Name", &()).await.unwrap();
        names.push(name);
    }
    // Strict alternation between the two servers, whichever came first.
    assert_ne!(names[0], names[1]);
    assert_eq!(names[0], names[2]);
    assert_eq!(names[1], names[3]);

    balance.close().await;
}

#[tokio::test]
async fn random_mode_calls_succeed() {
    let endpoint_a = start_server(arith_service()).await;
    let endpoint_b = start_server(arith_service()).await;

    let discovery = StaticDiscovery::new(vec![endpoint_a, endpoint_b]);
    let balance = BalanceClient::new(SelectMode::Random, discovery, None);

    for i in 0..6i32 {
        let reply: i32 = balance
            .call("Arith.Sum", &Args { num1: i, num2: i })
            .await
            .unwrap();
        assert_eq!(reply, 2 * i);
    }
}

#[tokio::test]
async fn empty_endpoint_set_reports_no_available_services() {
    let discovery = StaticDiscovery::new(Vec::new());
    let balance = BalanceClient::new(SelectMode::Random, discovery, None);

    let err = balance
        .call::<_, i32>("Arith.Sum", &Args { num1: 1, num2: 1 })
        .await
        .unwrap_err();
    assert!(matches!(err, RpcError::NoAvailableServices));
}

#[tokio::test]
async fn broadcast_returns_a_reply_from_some_server() {
    let endpoint_a = start_server(arith_service()).await;
    let endpoint_b = start_server(arith_service()).await;

    let discovery = StaticDiscovery::new(vec![endpoint_a, endpoint_b]);
    let balance = BalanceClient::new(SelectMode::Random, discovery, None);

    let mut reply = 0i32;
    balance
        .broadcast("Arith.Sum", &Args { num1: 3, num2: 4 }, &mut reply)
        .await
        .unwrap();
    assert_eq!(reply, 7);
}

#[tokio::test]
async fn broadcast_surfaces_the_first_failure() {
    let good = start_server(arith_service()).await;
    let bad = start_server(failing_arith_service()).await;

    let discovery = StaticDiscovery::new(vec![good, bad]);
    let balance = BalanceClient::new(SelectMode::Random, discovery, None);

    let mut reply = 0i32;
    let err = balance
        .broadcast("Arith.Sum", &Args { num1: 3, num2: 4 }, &mut reply)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"), "{err}");
}

#[tokio::test]
async fn broadcast_fails_when_every_server_fails() {
    let bad_a = start_server(failing_arith_service()).await;
    let bad_b = start_server(failing_arith_service()).await;

    let discovery = StaticDiscovery::new(vec![bad_a, bad_b]);
    let balance = BalanceClient::new(SelectMode::Random, discovery, None);

    let mut reply = -1i32;
    let err = balance
        .broadcast("Arith.Sum", &Args { num1: 1, num2: 1 }, &mut reply)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("boom"), "{err}");
    // No success, so the caller's reply is untouched.
    assert_eq!(reply, -1);
}

#[tokio::test]
async fn connections_are_reused_and_survive_close() {
    let endpoint = start_server(arith_service()).await;
    let discovery = StaticDiscovery::new(vec![endpoint]);
    let balance = BalanceClient::new(SelectMode::RoundRobin, discovery, None);

    for _ in 0..3 {
        let reply: i32 = balance
            .call("Arith.Sum", &Args { num1: 1, num2: 2 })
            .await
            .unwrap();
        assert_eq!(reply, 3);
    }

    // Close evicts the cached clients; the next call dials afresh.
    balance.close().await;
    let reply: i32 = balance
        .call("Arith.Sum", &Args { num1: 2, num2: 3 })
        .await
        .unwrap();
    assert_eq!(reply, 5);
}

#[tokio::test]
async fn discovery_update_redirects_calls() {
    let endpoint_a = start_server(tagged_service("a")).await;
    let endpoint_b = start_server(tagged_service("b")).await;

    let discovery = StaticDiscovery::new(vec![endpoint_a.clone()]);
    let balance = BalanceClient::new(SelectMode::RoundRobin, discovery, None);

    let name: String = balance.call("Node.Name", &()).await.unwrap();
    assert_eq!(name, "a");

    use microrpc::Discover;
    balance.discover().update(vec![endpoint_b]).await.unwrap();

    let name: String = balance.call("Node.Name", &()).await.unwrap();
    assert_eq!(name, "b");
}
