//! Tests for sensigate-model: tree construction, writes, links, actions, events

use sensigate_core::{Error, MessageKind, ResourcePath};
use sensigate_model::*;
use serde_json::json;
use std::sync::Arc;

fn recording_model() -> (ResourceModel, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    (ResourceModel::new(sink.clone()), sink)
}

// ===========================================================================
// Construction
// ===========================================================================

#[tokio::test]
async fn provider_gets_admin_service() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "test-bridge").await.unwrap();
    assert_eq!(provider.status().await, ProviderStatus::Active);
    assert_eq!(provider.friendly_name().await.as_deref(), Some("p1"));
    assert_eq!(provider.bridge().await.as_deref(), Some("test-bridge"));
    assert!(provider.location().await.is_none());
    let admin = provider.service(ADMIN).await.unwrap();
    let names: Vec<String> = admin.resources().await.iter().map(|r| r.name().to_string()).collect();
    assert_eq!(names, vec!["friendlyName", "lifecycleStatus", "bridge", "location"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn providers_are_visible_only_once_assembled() {
    let model = Arc::new(ResourceModel::default());
    let creator = {
        let model = model.clone();
        tokio::spawn(async move {
            for i in 0..50 {
                model.create_provider(&format!("p{}", i), "test").await.unwrap();
            }
        })
    };
    while !creator.is_finished() {
        for provider in model.providers().await {
            assert!(provider.service(ADMIN).await.is_some(), "{} published without admin", provider.name());
            assert_eq!(provider.status().await, ProviderStatus::Active);
        }
        tokio::task::yield_now().await;
    }
    creator.await.unwrap();
    assert_eq!(model.providers().await.len(), 50);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_creation_of_one_name_conflicts() {
    let model = Arc::new(ResourceModel::default());
    let attempts: Vec<_> = (0..8)
        .map(|_| {
            let model = model.clone();
            tokio::spawn(async move { model.create_provider("dup", "test").await })
        })
        .collect();
    let mut created = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => created += 1,
            Err(e) => assert!(matches!(e, Error::NameConflict { .. }), "{:?}", e),
        }
    }
    assert_eq!(created, 1);
    assert_eq!(model.providers().await.len(), 1);
}

#[tokio::test]
async fn duplicate_names_conflict() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    assert!(matches!(model.create_provider("p1", "b").await, Err(Error::NameConflict { .. })));
    let service = provider.create_service("s1").await.unwrap();
    assert!(matches!(provider.create_service("s1").await, Err(Error::NameConflict { .. })));
    service.create_resource(ResourceBuilder::property("r1")).await.unwrap();
    let err = service.create_resource(ResourceBuilder::sensor("r1")).await.unwrap_err();
    assert_eq!(err.status(), 409);
}

#[tokio::test]
async fn namespaced_names_are_rejected() {
    let model = ResourceModel::default();
    assert!(matches!(model.create_provider("peerA:p1", "b").await, Err(Error::InvalidValue(_))));
    assert!(model.create_provider("a/b", "b").await.is_err());
}

#[tokio::test]
async fn services_keep_discovery_order() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    for name in ["zeta", "alpha", "mid"] {
        provider.create_service(name).await.unwrap();
    }
    let names: Vec<String> = provider.services().await.iter().map(|s| s.name().to_string()).collect();
    assert_eq!(names, vec!["admin", "zeta", "alpha", "mid"]);
}

// ===========================================================================
// Writes
// ===========================================================================

#[tokio::test]
async fn typed_write_scenario() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    let r1 = service
        .create_resource(
            ResourceBuilder::property("r1")
                .data_type(DataType::String)
                .modifiable(Modifiable::Updatable),
        )
        .await
        .unwrap();

    let path = ResourcePath::attribute("p1", "s1", "r1", "value");
    model.push_value(&path, json!("hello")).await.unwrap();
    assert_eq!(r1.get(VALUE).await.unwrap(), json!("hello"));

    let err = model.push_value(&path, json!(42)).await.unwrap_err();
    assert!(matches!(err, Error::ConstraintViolation(_)));
    assert_eq!(r1.get(VALUE).await.unwrap(), json!("hello"));
}

#[tokio::test]
async fn bridge_is_fixed() {
    let model = ResourceModel::default();
    model.create_provider("p1", "b").await.unwrap();
    let path = ResourcePath::attribute("p1", ADMIN, "bridge", "value");
    let err = model.push_value(&path, json!("other")).await.unwrap_err();
    assert!(matches!(err, Error::NotModifiable(_)));
}

#[tokio::test]
async fn lifecycle_status_is_constrained() {
    let model = ResourceModel::default();
    model.create_provider("p1", "b").await.unwrap();
    let path = ResourcePath::attribute("p1", ADMIN, "lifecycleStatus", "value");
    assert!(model.push_value(&path, json!("ASLEEP")).await.is_err());
    model.deactivate_provider("p1").await.unwrap();
    let provider = model.provider("p1").await.unwrap();
    assert_eq!(provider.status().await, ProviderStatus::Inactive);
}

#[tokio::test]
async fn every_write_emits_even_without_change() {
    let (model, sink) = recording_model();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    service
        .create_resource(ResourceBuilder::sensor("temp").data_type(DataType::Float))
        .await
        .unwrap();
    let before = sink.notifications().len();
    let path = ResourcePath::attribute("p1", "s1", "temp", "value");
    model.push_value(&path, json!(20)).await.unwrap();
    model.push_value(&path, json!(20)).await.unwrap();
    let updates: Vec<_> = sink.notifications()[before..].to_vec();
    assert_eq!(updates.len(), 2);
    assert!(updates.iter().all(|n| n.kind == MessageKind::AttributeValueUpdated));
    assert!(updates[0].has_changed);
    assert!(!updates[1].has_changed);
    assert_eq!(updates[1].uri(), "/p1/s1/temp/value");
}

#[tokio::test]
async fn metadata_write_emits() {
    let (model, sink) = recording_model();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    let r = service
        .create_resource(ResourceBuilder::sensor("temp").unit("°C"))
        .await
        .unwrap();
    r.set_metadata(VALUE, "unit", json!("K"), Writer::External).await.unwrap();
    assert_eq!(r.get_metadata(VALUE, "unit").await.unwrap().value, json!("K"));
    let last = sink.notifications().pop().unwrap();
    assert_eq!(last.kind, MessageKind::MetadataValueUpdated);
    assert_eq!(last.metadata.as_deref(), Some("unit"));
}

// ===========================================================================
// Linked resources
// ===========================================================================

#[tokio::test]
async fn linked_resource_falls_back_one_level() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    let target = service
        .create_resource(
            ResourceBuilder::sensor("target")
                .value(json!(1))
                .attribute("extra", DataType::String, Modifiable::Updatable, json!("t")),
        )
        .await
        .unwrap();
    let link = service
        .create_resource(
            ResourceBuilder::linked("link", &target).attribute("extra", DataType::String, Modifiable::Updatable, json!("local")),
        )
        .await
        .unwrap();
    let chained = service.create_resource(ResourceBuilder::linked("chained", &link)).await.unwrap();

    assert_eq!(link.get(VALUE).await.unwrap(), json!(1));
    assert_eq!(link.get("extra").await.unwrap(), json!("local"));
    assert_eq!(chained.get("extra").await.unwrap(), json!("local"));
    assert!(matches!(chained.get(VALUE).await, Err(Error::NotFound(_))));
}

#[tokio::test]
async fn link_does_not_own_target() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    let target = service.create_resource(ResourceBuilder::sensor("target").value(json!(1))).await.unwrap();
    let link = service.create_resource(ResourceBuilder::linked("link", &target)).await.unwrap();
    drop(target);
    service.remove_resource("target").await.unwrap();
    assert!(link.link().is_none());
    assert!(link.get(VALUE).await.is_err());
}

// ===========================================================================
// Actions
// ===========================================================================

#[tokio::test]
async fn action_checks_signatures() {
    let (model, sink) = recording_model();
    let provider = model.create_provider("lamp", "b").await.unwrap();
    let service = provider.create_service("switch").await.unwrap();
    let handler = Arc::new(FnAction(|args: Vec<serde_json::Value>| -> sensigate_core::Result<serde_json::Value> {
        Ok(json!({ "dimmed": args[0] }))
    }));
    let action = service
        .create_resource(
            ResourceBuilder::action("dim", handler)
                .signature(Signature::new(vec![Parameter::new("level", DataType::Integer)])),
        )
        .await
        .unwrap();

    let result = action.act(vec![json!(40)]).await.unwrap();
    assert_eq!(result["dimmed"], 40);
    assert_eq!(sink.kinds().last(), Some(&MessageKind::Actuated));

    let err = action.act(vec![json!("bright")]).await.unwrap_err();
    assert!(err.to_string().contains("unknown signature"));
    assert!(action.get(VALUE).await.is_err());
}

#[tokio::test]
async fn property_cannot_act() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    let r = service.create_resource(ResourceBuilder::property("r")).await.unwrap();
    assert!(matches!(r.act(vec![]).await, Err(Error::NotFound(_))));
}

// ===========================================================================
// Lifecycle, catalogs, shape
// ===========================================================================

#[tokio::test]
async fn lifecycle_events_in_order() {
    let (model, sink) = recording_model();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    service
        .create_resource(ResourceBuilder::property("r1").value(json!("init")))
        .await
        .unwrap();
    let appearing = sink
        .notifications()
        .into_iter()
        .find(|n| n.kind == MessageKind::ResourceAppearing && n.path.resource.as_deref() == Some("r1"))
        .unwrap();
    assert_eq!(appearing.value, json!("init"));

    model.remove_provider("p1").await.unwrap();
    let kinds = sink.kinds();
    assert_eq!(kinds.first(), Some(&MessageKind::ProviderAppearing));
    assert_eq!(kinds.last(), Some(&MessageKind::ProviderDisappearing));
    assert!(kinds.contains(&MessageKind::ServiceDisappearing));
    assert!(model.provider("p1").await.is_none());
}

#[tokio::test]
async fn catalog_backed_creation() {
    let model = ResourceModel::default();
    model.catalogs().add(Arc::new(MapCatalog::new("defaults").with(
        "humidity",
        ResourceDefaults::new(ResourceKind::SensorData, DataType::Float)
            .constraint(Constraint::new(Operator::Range, json!([0, 100])).unwrap()),
    )));
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("env").await.unwrap();
    let r = service.create_resource_from_catalog("humidity").await.unwrap();
    assert_eq!(r.kind(), ResourceKind::SensorData);
    let path = ResourcePath::attribute("p1", "env", "humidity", "value");
    assert!(model.push_value(&path, json!(150)).await.is_err());
    assert!(matches!(
        service.create_resource_from_catalog("pressure").await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn shape_version_tracks_structure_only() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let v0 = model.shape_version();
    let service = provider.create_service("s1").await.unwrap();
    service.create_resource(ResourceBuilder::property("r")).await.unwrap();
    let v1 = model.shape_version();
    assert!(v1 > v0);
    model
        .push_value(&ResourcePath::attribute("p1", "s1", "r", "value"), json!(1))
        .await
        .unwrap();
    assert_eq!(model.shape_version(), v1);
}

#[tokio::test]
async fn resolve_reports_missing_levels() {
    let model = ResourceModel::default();
    model.create_provider("p1", "b").await.unwrap();
    let err = model.resolve_resource(&ResourcePath::resource("p1", "nope", "r")).await.unwrap_err();
    assert_eq!(err.to_string(), "not found: /p1/nope");
    assert!(model.resolve_provider(&ResourcePath::provider("p2")).await.is_err());
}

#[tokio::test]
async fn describe_hides_hidden_attributes() {
    let model = ResourceModel::default();
    let provider = model.create_provider("p1", "b").await.unwrap();
    let service = provider.create_service("s1").await.unwrap();
    let r = service
        .create_resource(
            ResourceBuilder::property("secret")
                .hidden(true)
                .attribute("visible", DataType::Integer, Modifiable::Updatable, json!(3)),
        )
        .await
        .unwrap();
    let description = r.describe().await;
    let attributes = description["attributes"].as_array().unwrap();
    assert_eq!(attributes.len(), 1);
    assert_eq!(attributes[0]["name"], "visible");
    assert_eq!(description["type"], "PROPERTY");
}
