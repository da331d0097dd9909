//! Gateways federated over real WebSocket links

use sensigate_access::RemoteRelay;
use sensigate_core::{BindMode, GatewayConfig, RelayCall, ResourcePath};
use sensigate_gateway::*;
use sensigate_remote::{BridgeOptions, LinkState};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

fn config(namespace: &str, token: Option<&str>) -> GatewayConfig {
    let mut config = GatewayConfig::default();
    config.namespace = namespace.into();
    config.peer.token = token.map(String::from);
    config
}

async fn gateway(namespace: &str, token: Option<&str>) -> Arc<GatewayState> {
    let config = config(namespace, token);
    let core = build_core(&config).unwrap();
    core.model().create_provider("p1", "test").await.unwrap();
    core.model()
        .push_value(
            &ResourcePath::attribute("p1", "admin", "friendlyName", "value"),
            json!(format!("{} hall", namespace)),
        )
        .await
        .unwrap();
    GatewayState::new(core, PeerAuth::from_config(&config.peer, None), BridgeOptions::default())
}

async fn listen(state: Arc<GatewayState>) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(serve(listener, state));
    format!("ws://{}/peer", addr)
}

#[tokio::test]
async fn relayed_read_over_websocket() {
    let a = gateway("gwA", None).await;
    let b = gateway("peerA", Some("s3cret")).await;
    let url = listen(b.clone()).await;

    let bridge = connect_peer(&url, Some("s3cret"), a.core.clone(), BridgeOptions::default())
        .await
        .unwrap();
    assert_eq!(bridge.state(), LinkState::Connected);
    assert_eq!(bridge.namespace(), "peerA");

    let read = a
        .core
        .get_anonymous_session()
        .execute(
            RelayCall::Get {
                path: ResourcePath::attribute("peerA:p1", "admin", "friendlyName", "value"),
            },
            None,
        )
        .await;
    assert!(read.is_success(), "{:?}", read);
    assert_eq!(read.payload.unwrap()["value"], json!("peerA hall"));

    // the accepting side binds the dialer under its namespace too
    tokio::time::timeout(Duration::from_secs(2), async {
        while b.core.dispatcher().remote("gwA").is_none() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    bridge.close().await;
    assert!(!bridge.is_connected());
}

#[tokio::test]
async fn wrong_peer_token_is_rejected() {
    let a = gateway("gwA", None).await;
    let b = gateway("peerA", Some("s3cret")).await;
    let url = listen(b.clone()).await;

    let err = connect_peer(&url, Some("guess"), a.core.clone(), BridgeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status(), 503);
    let err = connect_peer(&url, None, a.core.clone(), BridgeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.status(), 503);
    assert!(a.core.dispatcher().remote("peerA").is_none());
    assert!(b.core.dispatcher().remotes().is_empty());
}

#[tokio::test]
async fn health_reports_peers() {
    let a = gateway("gwA", None).await;
    let b = gateway("peerA", None).await;
    let url = listen(b).await;
    let _bridge = connect_peer(&url, None, a.core.clone(), BridgeOptions::default())
        .await
        .unwrap();

    let remotes = a.core.dispatcher().remotes();
    assert_eq!(remotes.len(), 1);
    assert_eq!(remotes[0].namespace(), "peerA");
    assert!(remotes[0].is_connected());
}

#[test]
fn config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sensigate.toml");
    let mut written = config("gwA", Some("s3cret"));
    written.server.port = 19000;
    written.server.bind = BindMode::Lan;
    written.peer.peers = vec!["ws://10.0.0.2:18790/peer".into()];
    std::fs::write(&path, written.to_toml()).unwrap();

    let loaded = GatewayConfig::load(&path);
    assert_eq!(loaded.namespace, "gwA");
    assert_eq!(loaded.bind_addr(), "0.0.0.0:19000");
    assert_eq!(loaded.peer.token.as_deref(), Some("s3cret"));
    assert_eq!(loaded.peer.peers, written.peer.peers);
}

#[test]
fn missing_config_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let loaded = GatewayConfig::load(&dir.path().join("absent.toml"));
    assert_eq!(loaded.server.port, 18790);
    assert!(loaded.namespace.starts_with("sna"));
    assert_eq!(loaded.peer.relay_timeout_ms, 5000);
}
