//! Transport selection and the HTTP transport over a real socket.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use mcp_runtime::config::{HttpConfig, Overrides, RuntimeConfig};
use mcp_runtime::lifecycle::{LifecycleState, Shutdown};
use mcp_runtime::rpc::{register_builtin, Router};
use mcp_runtime::{HttpTransport, Runtime, RuntimeError, SessionStore};

mod common;
use common::{wait_for, EventLog, RecordingBinding};

fn config_for(kind: &str) -> RuntimeConfig {
    let mut config = RuntimeConfig::default();
    config.transport.kind = kind.to_string();
    config
}

#[tokio::test]
async fn selected_transport_is_the_only_one_served() {
    let runtime = Runtime::build(config_for("http"), None, Overrides::default()).unwrap();
    let log = EventLog::default();
    runtime.registry.register("stdio", RecordingBinding::new("stdio", &log));
    runtime.registry.register("http", RecordingBinding::new("http", &log));

    let shutdown = Shutdown::new();
    let driver = async {
        wait_for(&log, "handled:http").await;
        assert!(runtime.coordinator.is_healthy());
        shutdown.trigger();
    };
    let (result, ()) = tokio::join!(runtime.run(&shutdown), driver);

    result.unwrap();
    assert_eq!(log.events(), vec!["serve:http", "handled:http"]);
    assert!(runtime
        .coordinator
        .status()
        .iter()
        .all(|s| s.state == LifecycleState::Stopped));
}

#[tokio::test]
async fn unsupported_transport_fails_startup_and_rolls_back() {
    let runtime = Runtime::build(config_for("carrier-pigeon"), None, Overrides::default()).unwrap();
    let log = EventLog::default();
    runtime.registry.register("stdio", RecordingBinding::new("stdio", &log));

    let err = runtime.run(&Shutdown::new()).await.unwrap_err();

    assert!(matches!(err, RuntimeError::Startup(_)));
    assert!(err.to_string().contains("unsupported transport: carrier-pigeon"));
    assert!(log.events().is_empty());

    let states: Vec<_> = runtime
        .coordinator
        .status()
        .into_iter()
        .map(|s| (s.name, s.state))
        .collect();
    assert_eq!(
        states,
        vec![
            ("sessions".to_string(), LifecycleState::Stopped),
            ("transport".to_string(), LifecycleState::Error),
        ]
    );
}

#[tokio::test]
async fn http_transport_serves_json_rpc_over_tcp() {
    let store = Arc::new(SessionStore::new(Default::default()));
    let mut router = Router::new();
    register_builtin(&mut router, store.clone(), None);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let ctx = CancellationToken::new();

    let server = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            HttpTransport::new(HttpConfig::default())
                .serve_listener(listener, ctx, Arc::new(router))
                .await
        })
    };

    let client = reqwest::Client::new();
    let reply: Value = client
        .post(format!("http://{addr}/rpc"))
        .json(&json!({
            "jsonrpc": "2.0",
            "id": 7,
            "method": "session/get_or_create",
            "params": { "id": "tcp-session" }
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(reply["id"], 7);
    assert_eq!(reply["result"]["id"], "tcp-session");
    assert!(store.get("tcp-session").is_ok());

    let health = client.get(format!("http://{addr}/health")).send().await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);

    ctx.cancel();
    server.await.unwrap().unwrap();
}
