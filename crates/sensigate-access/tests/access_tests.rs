//! Tests for dispatch tables, accessibility filtering and routing

use sensigate_access::*;
use sensigate_core::{IdentityKind, Namespace, PolicyTier, PublicKey, RelayCall, ResourcePath, Response, SecurityConfig};
use sensigate_message::{AgentCallback, ChannelCallback, NotificationEngine};
use sensigate_model::{
    DataType, FnAction, Modifiable, Parameter, ResourceBuilder, ResourceModel, Signature,
};
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

async fn dispatcher() -> Dispatcher {
    let engine = Arc::new(NotificationEngine::new(Some("gwA".into())));
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
    service
        .create_resource(
            ResourceBuilder::action(
                "sum",
                Arc::new(FnAction(|args: Vec<Value>| -> sensigate_core::Result<Value> {
                    let total: i64 = args.iter().filter_map(Value::as_i64).sum();
                    Ok(json!(total))
                })),
            )
            .signature(Signature::new(vec![
                Parameter::new("a", DataType::Integer),
                Parameter::new("b", DataType::Integer),
            ])),
        )
        .await
        .unwrap();
    Dispatcher::new(Namespace::new("gwA"), model, engine)
}

fn policy() -> AccessPolicy {
    AccessPolicy::from_config(&SecurityConfig::default()).unwrap()
}

fn r1() -> ResourcePath {
    ResourcePath::resource("p1", "s1", "r1")
}

fn call(args: Vec<Value>) -> Invocation {
    Invocation::new(PublicKey::new("alice"), args)
}

#[tokio::test]
async fn anonymous_write_is_forbidden_without_touching_the_model() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Anonymous, None).unwrap();
    let table = d.accessible_table(&r1(), &view).await.unwrap();

    let response = table.invoke("WRITE", call(vec![json!("value"), json!("hello")])).await;
    assert_eq!(response.status, 403);
    assert_eq!(response.error_kind(), Some("Forbidden"));
    let stored = d.model().resolve_resource(&r1()).await.unwrap().get("value").await.unwrap();
    assert_eq!(stored, Value::Null);

    let again = table.invoke("SET", call(vec![json!("hello")])).await;
    assert_eq!(again.status, 403);
    assert_eq!(table.invoke("READ", call(vec![])).await.status, 200);
}

#[tokio::test]
async fn typed_write_rejects_mismatch_and_keeps_value() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Authenticated, None).unwrap();
    let table = d.accessible_table(&r1(), &view).await.unwrap();

    let ok = table.invoke("WRITE", call(vec![json!("value"), json!("hello")])).await;
    assert!(ok.is_success());
    assert_eq!(ok.payload.unwrap()["new"], json!("hello"));

    let bad = table.invoke("WRITE", call(vec![json!("value"), json!(42)])).await;
    assert_eq!(bad.status, 400);
    assert_eq!(bad.error_kind(), Some("ConstraintViolation"));

    let read = table.invoke("READ", call(vec![json!("value")])).await;
    assert_eq!(read.payload.unwrap()["value"], json!("hello"));
}

#[tokio::test]
async fn sensor_values_are_not_writable_by_callers() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Authenticated, None).unwrap();
    let path = ResourcePath::resource("p1", "s1", "temp");
    let table = d.accessible_table(&path, &view).await.unwrap();
    let response = table.invoke("WRITE", call(vec![json!(21.5)])).await;
    assert_eq!(response.error_kind(), Some("NotModifiable"));
}

#[tokio::test]
async fn act_spreads_a_single_array_argument() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Application, None).unwrap();
    let table = d
        .accessible_table(&ResourcePath::resource("p1", "s1", "sum"), &view)
        .await
        .unwrap();
    let spread = table.invoke("ACT", call(vec![json!([2, 3])])).await;
    assert_eq!(spread.payload, Some(json!(5)));
    let listed = table.invoke("ACT", call(vec![json!(4), json!(5)])).await;
    assert_eq!(listed.payload, Some(json!(9)));
    let wrong = table.invoke("ACT", call(vec![json!("x")])).await;
    assert_eq!(wrong.status, 404);
    assert_eq!(table.invoke("READ", call(vec![])).await.status, 404);
}

#[tokio::test]
async fn subscribe_then_unsubscribe() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Anonymous, None).unwrap();
    let path = ResourcePath::resource("p1", "s1", "temp");
    let table = d.accessible_table(&path, &view).await.unwrap();
    let (callback, mut rx) = ChannelCallback::new();

    let missing = table.invoke("SUBSCRIBE", call(vec![])).await;
    assert_eq!(missing.status, 400);

    let response = table
        .invoke(
            "SUBSCRIBE",
            call(vec![json!({"operator": ">", "operand": 30})]).with_recipient(Arc::new(callback)),
        )
        .await;
    let id = response.payload.unwrap()["subscriptionId"].as_str().unwrap().to_string();

    d.model().push_value(&path, json!(25.0)).await.unwrap();
    d.model().push_value(&path, json!(35.0)).await.unwrap();
    assert_eq!(rx.recv().await.unwrap().value, json!(35.0));
    assert!(rx.try_recv().is_err());

    assert!(table.invoke("UNSUBSCRIBE", call(vec![json!(id.clone())])).await.is_success());
    assert_eq!(table.invoke("UNSUBSCRIBE", call(vec![json!(id)])).await.status, 404);
    d.model().push_value(&path, json!(40.0)).await.unwrap();
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn describe_lists_only_readable_elements() {
    let d = dispatcher().await;
    let overlay = PolicyTier {
        allow: Vec::new(),
        deny: vec!["READ:/p1/s1/temp".into()],
    };
    let view = policy().view(IdentityKind::Authenticated, Some(&overlay)).unwrap();
    let resources = d.describe_resources(&ResourcePath::service("p1", "s1"), &view).await.unwrap();
    assert_eq!(resources, json!(["r1", "sum"]));
    let denied = d
        .describe_resource(&ResourcePath::resource("p1", "s1", "temp"), &view)
        .await
        .unwrap_err();
    assert_eq!(denied.status(), 403);

    let services = d.describe_services(&ResourcePath::provider("p1"), &view).await.unwrap();
    assert_eq!(services, json!(["admin", "s1"]));
    let all = d.describe_all(&view).await;
    assert_eq!(all[0]["name"], json!("p1"));
}

#[tokio::test]
async fn describe_of_unknown_path_is_not_found() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Anonymous, None).unwrap();
    let err = d.describe_provider(&ResourcePath::provider("nope"), &view).await.unwrap_err();
    assert_eq!(err.status(), 404);
    assert!(d.table(&ResourcePath::resource("p1", "s1", "nope")).await.is_err());
}

struct FakeRelay {
    namespace: String,
    connected: AtomicBool,
    calls: Mutex<Vec<RelayCall>>,
}

#[async_trait::async_trait]
impl RemoteRelay for FakeRelay {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn relay(&self, _public_key: &PublicKey, call: RelayCall) -> Response {
        let uri = call.uri();
        let method = call.method();
        self.calls.lock().unwrap().push(call);
        Response::ok(method, uri, json!("relayed"))
    }

    fn attach_recipient(&self, _recipient: Arc<dyn AgentCallback>) -> String {
        "recipient_0".into()
    }

    fn detach_recipient(&self, _recipient_id: &str) -> bool {
        true
    }
}

#[tokio::test]
async fn routing_by_namespace() {
    let d = dispatcher().await;
    let relay = Arc::new(FakeRelay {
        namespace: "peerA".into(),
        connected: AtomicBool::new(true),
        calls: Mutex::new(Vec::new()),
    });
    d.bind_remote(relay.clone()).unwrap();

    assert!(matches!(d.route(&r1()).unwrap(), Route::Local(p) if p == r1()));
    let own = ResourcePath::resource("gwA:p1", "s1", "r1");
    assert!(matches!(d.route(&own).unwrap(), Route::Local(p) if p == r1()));

    let remote = ResourcePath::attribute("peerA:p1", "admin", "friendlyName", "value");
    match d.route(&remote).unwrap() {
        Route::Remote(relay, path) => {
            assert_eq!(relay.namespace(), "peerA");
            assert_eq!(path.to_string(), "/p1/admin/friendlyName/value");
        }
        Route::Local(_) => panic!("expected a remote route"),
    }

    let unknown = d.route(&ResourcePath::provider("peerB:p1")).err().unwrap();
    assert_eq!(unknown.status(), 503);
    let double = d.route(&ResourcePath::provider("peerA:x:p1")).err().unwrap();
    assert_eq!(double.status(), 502);

    assert!(d.bind_remote(Arc::new(FakeRelay {
        namespace: "gwA".into(),
        connected: AtomicBool::new(true),
        calls: Mutex::new(Vec::new()),
    }))
    .is_err());
    assert!(d.unbind_remote("peerA"));
    assert!(d.route(&remote).is_err());
}

#[tokio::test]
async fn subscriptions_can_only_be_cancelled_by_their_owner() {
    let d = dispatcher().await;
    let view = policy().view(IdentityKind::Authenticated, None).unwrap();
    let as_bob = |id: &str| Invocation::new(PublicKey::new("bob"), vec![json!(id)]);

    let temp = ResourcePath::resource("p1", "s1", "temp");
    let resource_table = d.accessible_table(&temp, &view).await.unwrap();
    let (callback, _rx) = ChannelCallback::new();
    let response = resource_table
        .invoke("SUBSCRIBE", call(vec![]).with_recipient(Arc::new(callback)))
        .await;
    let on_resource = response.payload.unwrap()["subscriptionId"].as_str().unwrap().to_string();

    let provider_table = d.accessible_table(&ResourcePath::provider("p1"), &view).await.unwrap();
    let (callback, _rx) = ChannelCallback::new();
    let response = provider_table
        .invoke("SUBSCRIBE", call(vec![]).with_recipient(Arc::new(callback)))
        .await;
    let on_provider = response.payload.unwrap()["subscriptionId"].as_str().unwrap().to_string();

    assert_eq!(provider_table.invoke("UNSUBSCRIBE", as_bob(&on_provider)).await.status, 404);
    assert_eq!(provider_table.invoke("UNSUBSCRIBE", as_bob(&on_resource)).await.status, 404);
    assert_eq!(resource_table.invoke("UNSUBSCRIBE", as_bob(&on_resource)).await.status, 404);
    assert!(d.engine().agent(&on_provider).is_some());
    assert!(d.engine().agent(&on_resource).is_some());
    let resource = d.model().resolve_resource(&temp).await.unwrap();
    assert_eq!(resource.subscriptions().await, vec![on_resource.clone()]);

    assert!(provider_table.invoke("UNSUBSCRIBE", call(vec![json!(on_provider)])).await.is_success());
    assert!(resource_table.invoke("UNSUBSCRIBE", call(vec![json!(on_resource)])).await.is_success());
    assert!(d.engine().is_empty());
    assert!(resource.subscriptions().await.is_empty());
}
