//! Two in-process gateways federated over a memory link

use sensigate_access::{AccessPolicy, RemoteRelay};
use sensigate_core::{
    AccountConfig, MessageCategory, MessageKind, Namespace, PeerMessage, PolicyTier, RelayCall, ResourcePath,
    SecurityConfig,
};
use sensigate_message::{ChannelCallback, Filter, NotificationEngine};
use sensigate_model::{DataType, Modifiable, ResourceBuilder, ResourceModel};
use sensigate_remote::*;
use sensigate_session::{Core, MemoryIdentityStore};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn gateway(namespace: &str) -> Arc<Core> {
    let engine = Arc::new(NotificationEngine::new(Some(namespace.into())));
    let model = Arc::new(ResourceModel::new(engine.clone()));
    let provider = model.create_provider("p1", "test").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    service
        .create_resource(
            ResourceBuilder::property("r1")
                .data_type(DataType::String)
                .modifiable(Modifiable::Modifiable),
        )
        .await
        .unwrap();
    service
        .create_resource(ResourceBuilder::sensor("temp").data_type(DataType::Float))
        .await
        .unwrap();
    model
        .push_value(&friendly_name("p1"), json!(format!("{} kitchen", namespace)))
        .await
        .unwrap();
    let accounts = [AccountConfig {
        login: "alice".into(),
        password: "secret".into(),
        policy: PolicyTier::default(),
    }];
    Arc::new(Core::new(
        Namespace::new(namespace),
        model,
        engine,
        AccessPolicy::from_config(&SecurityConfig::default()).unwrap(),
        Arc::new(MemoryIdentityStore::from_config(&accounts).unwrap()),
    ))
}

fn friendly_name(provider: &str) -> ResourcePath {
    ResourcePath::attribute(provider, "admin", "friendlyName", "value")
}

fn options() -> BridgeOptions {
    BridgeOptions {
        relay_timeout: Duration::from_millis(500),
        handshake_timeout: Duration::from_millis(500),
    }
}

async fn federate(a: &Arc<Core>, b: &Arc<Core>) -> (Arc<RemoteBridge>, Arc<RemoteBridge>) {
    let (ea, eb) = pair();
    let on_a = RemoteBridge::new(a.clone(), Arc::new(ea), options());
    let on_b = RemoteBridge::new(b.clone(), Arc::new(eb), options());
    let (ra, rb) = tokio::join!(on_a.start(), on_b.start());
    ra.unwrap();
    rb.unwrap();
    (on_a, on_b)
}

async fn next<T>(rx: &mut tokio::sync::mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for a notification")
        .expect("channel closed")
}

#[tokio::test]
async fn handshake_exchanges_namespaces_and_ids() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let (on_a, on_b) = federate(&a, &b).await;

    assert_eq!(on_a.state(), LinkState::Connected);
    assert_eq!(on_a.namespace(), "peerA");
    assert_eq!(on_b.namespace(), "gwA");
    assert_eq!(on_a.remote_id(), Some(on_b.local_id()));
    assert!(a.dispatcher().remote("peerA").is_some());
}

#[tokio::test]
async fn handshake_rejects_our_own_namespace() {
    let a = gateway("gwA").await;
    let twin = gateway("gwA").await;
    let (ea, eb) = pair();
    let on_a = RemoteBridge::new(a.clone(), Arc::new(ea), options());
    let on_twin = RemoteBridge::new(twin, Arc::new(eb), options());
    let (ra, rb) = tokio::join!(on_a.start(), on_twin.start());
    assert_eq!(ra.unwrap_err().status(), 502);
    assert!(rb.is_err());
    assert_eq!(on_a.state(), LinkState::Disconnected);
    assert!(a.dispatcher().remote("gwA").is_none());
}

#[tokio::test]
async fn relayed_read_fails_after_peer_loss() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let (on_a, on_b) = federate(&a, &b).await;
    let session = a.get_anonymous_session();

    let read = session
        .execute(RelayCall::Get { path: friendly_name("peerA:p1") }, None)
        .await;
    assert!(read.is_success(), "{:?}", read);
    assert_eq!(read.payload.unwrap()["value"], json!("peerA kitchen"));
    assert_eq!(read.uri, "/p1/admin/friendlyName/value");

    let served = b.sessions().find(|s| s.origin() == Some("gwA"));
    assert_eq!(served.len(), 1);

    on_b.close().await;
    on_a.closed().await;
    assert!(!on_a.is_connected());

    let again = session
        .execute(RelayCall::Get { path: friendly_name("peerA:p1") }, None)
        .await;
    assert_eq!(again.status, 503);
    assert_eq!(again.error_kind(), Some("BackendUnavailable"));

    assert!(served[0].is_closed());
    let closed = served[0]
        .execute(RelayCall::Get { path: friendly_name("p1") }, None)
        .await;
    assert_eq!(closed.error_kind(), Some("SessionClosed"));
}

#[tokio::test]
async fn peer_applies_its_own_access_rules() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let _link = federate(&a, &b).await;
    let path = ResourcePath::attribute("peerA:p1", "s1", "r1", "value");

    let anonymous = a.get_anonymous_session();
    let denied = anonymous
        .execute(RelayCall::Set { path: path.clone(), value: json!("hi") }, None)
        .await;
    assert_eq!(denied.status, 403);

    let alice = a.login("alice", "secret").unwrap();
    let written = alice.execute(RelayCall::Set { path, value: json!("hi") }, None).await;
    assert!(written.is_success(), "{:?}", written);
    let stored = b
        .model()
        .resolve_resource(&ResourcePath::resource("p1", "s1", "r1"))
        .await
        .unwrap()
        .get("value")
        .await
        .unwrap();
    assert_eq!(stored, json!("hi"));
}

#[tokio::test]
async fn provider_listing_merges_qualified_peer_providers() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let _link = federate(&a, &b).await;
    let session = a.get_anonymous_session();

    let providers = session.execute(RelayCall::GetProviders, None).await;
    assert_eq!(providers.payload, Some(json!(["p1", "peerA:p1"])));
    let all = session.execute(RelayCall::GetAll, None).await.payload.unwrap();
    assert_eq!(all[1]["name"], json!("peerA:p1"));
}

#[tokio::test]
async fn remote_subscription_dispatches_back_over_the_link() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let (on_a, _on_b) = federate(&a, &b).await;
    let session = a.login("alice", "secret").unwrap();
    let (callback, mut rx) = ChannelCallback::new();
    let temp = ResourcePath::resource("peerA:p1", "s1", "temp");

    let subscribed = session
        .execute(
            RelayCall::Subscribe {
                path: temp.clone(),
                conditions: Vec::new(),
                recipient_id: String::new(),
            },
            Some(Arc::new(callback)),
        )
        .await;
    assert!(subscribed.is_success(), "{:?}", subscribed);
    assert_eq!(on_a.recipient_count(), 1);
    assert_eq!(b.engine().len(), 1);

    b.model()
        .push_value(&ResourcePath::resource("p1", "s1", "temp"), json!(21.5))
        .await
        .unwrap();
    let notification = next(&mut rx).await;
    assert_eq!(notification.path.provider, "peerA:p1");
    assert_eq!(notification.value, json!(21.5));

    session.close().await;
    assert_eq!(on_a.recipient_count(), 0);
    assert_eq!(b.engine().len(), 0);
}

#[tokio::test]
async fn remote_agent_registration_and_removal() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let (on_a, _on_b) = federate(&a, &b).await;
    let session = a.login("alice", "secret").unwrap();
    let (callback, mut rx) = ChannelCallback::new();

    let id = session
        .register_remote_agent(
            "peerA",
            json!({"sender": "/p1/s1/.*", "pattern": true, "types": ["UPDATE"]}),
            Arc::new(callback),
        )
        .await
        .unwrap();
    assert_eq!(b.engine().len(), 1);

    b.model()
        .push_value(&ResourcePath::resource("p1", "s1", "temp"), json!(3.0))
        .await
        .unwrap();
    assert_eq!(next(&mut rx).await.uri(), "/peerA:p1/s1/temp/value");

    assert!(session.unregister_agent(&id).await.is_success());
    assert_eq!(b.engine().len(), 0);
    assert_eq!(on_a.recipient_count(), 0);
}

#[tokio::test]
async fn unanswered_call_times_out() {
    let a = gateway("gwA").await;
    let (ea, eb) = pair();
    let bridge = RemoteBridge::new(
        a.clone(),
        Arc::new(ea),
        BridgeOptions {
            relay_timeout: Duration::from_millis(50),
            handshake_timeout: Duration::from_millis(500),
        },
    );
    eb.send(PeerMessage::Hello {
        namespace: "silent".into(),
        local_id: 9,
    })
    .await
    .unwrap();
    bridge.start().await.unwrap();
    assert!(matches!(eb.recv().await, Some(Ok(PeerMessage::Hello { .. }))));

    let response = a
        .get_anonymous_session()
        .execute(RelayCall::Get { path: friendly_name("silent:p1") }, None)
        .await;
    assert_eq!(response.status, 503);
    assert_eq!(bridge.pending_calls(), 0);
    assert!(matches!(eb.recv().await, Some(Ok(PeerMessage::Call { .. }))));
}

#[tokio::test]
async fn link_events_reach_callbacks_and_agents() {
    let a = gateway("gwA").await;
    let b = gateway("peerA").await;
    let (callback, mut rx) = ChannelCallback::new();
    a.engine().register(
        Filter::pattern(".*").unwrap().types([MessageCategory::Remote]),
        Arc::new(callback),
        None,
    );

    let (ea, eb) = pair();
    let on_a = RemoteBridge::new(a.clone(), Arc::new(ea), options());
    let on_b = RemoteBridge::new(b.clone(), Arc::new(eb), options());
    let up = Arc::new(AtomicUsize::new(0));
    let down = Arc::new(AtomicUsize::new(0));
    let (u, d) = (up.clone(), down.clone());
    on_a.on_connected(move |_| {
        u.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    on_a.on_disconnected(move |ns| {
        assert_eq!(ns, "peerA");
        d.fetch_add(1, Ordering::SeqCst);
        Err(sensigate_core::Error::Internal("ignored".into()))
    });
    let (ra, rb) = tokio::join!(on_a.start(), on_b.start());
    ra.unwrap();
    rb.unwrap();
    assert_eq!(up.load(Ordering::SeqCst), 1);
    assert_eq!(next(&mut rx).await.kind, MessageKind::Connected);

    on_a.close().await;
    on_a.close().await;
    on_b.closed().await;
    assert_eq!(down.load(Ordering::SeqCst), 1);
    let gone = next(&mut rx).await;
    assert_eq!(gone.kind, MessageKind::Disconnected);
    assert_eq!(gone.value, json!("peerA"));
}
