//! Handlers binding the access methods to model elements.

use crate::dispatch::{DispatchTable, Invocation, MethodHandler};
use crate::method::MethodKind;
use sensigate_core::{Error, MessageCategory, Result};
use sensigate_message::{Filter, NotificationEngine};
use sensigate_model::{Constraint, Provider, Resource, ResourceKind, Service, Writer, VALUE};
use serde_json::{json, Value};
use std::sync::Arc;

/// Any element of the tree.
#[derive(Clone)]
pub enum Element {
    Provider(Arc<Provider>),
    Service(Arc<Service>),
    Resource(Arc<Resource>),
}

impl Element {
    pub async fn describe(&self) -> Value {
        match self {
            Element::Provider(p) => p.describe().await,
            Element::Service(s) => s.describe().await,
            Element::Resource(r) => r.describe().await,
        }
    }

    pub fn path(&self) -> &sensigate_core::ResourcePath {
        match self {
            Element::Provider(p) => p.path(),
            Element::Service(s) => s.path(),
            Element::Resource(r) => r.path(),
        }
    }
}

/// Build the dispatch table of an element.
pub fn element_table(element: Element, engine: Arc<NotificationEngine>) -> DispatchTable {
    match element {
        Element::Resource(resource) => resource_table(resource, engine),
        other => {
            let mut table = DispatchTable::new(other.path().clone());
            let sender = format!("{}/.*", regex::escape(&other.path().to_string()));
            table.bind(ReadElement(other));
            table.bind(Subscribe {
                engine: engine.clone(),
                target: SubscribeTarget::Pattern(sender),
            });
            table.bind(Unsubscribe { engine, resource: None });
            table
        }
    }
}

pub fn resource_table(resource: Arc<Resource>, engine: Arc<NotificationEngine>) -> DispatchTable {
    let mut table = DispatchTable::new(resource.path().clone());
    if resource.kind() == ResourceKind::Action {
        table.bind(Act(resource.clone()));
        table.bind(Subscribe {
            engine: engine.clone(),
            target: SubscribeTarget::Exact(resource.path().to_string(), resource.clone()),
        });
    } else {
        table.bind(ReadResource(resource.clone()));
        table.bind(WriteResource(resource.clone()));
        table.bind(Subscribe {
            engine: engine.clone(),
            target: SubscribeTarget::Exact(format!("{}/{}", resource.path(), VALUE), resource.clone()),
        });
    }
    table.bind(Unsubscribe {
        engine,
        resource: Some(resource),
    });
    table
}

struct ReadElement(Element);

#[async_trait::async_trait]
impl MethodHandler for ReadElement {
    fn kind(&self) -> MethodKind {
        MethodKind::Read
    }

    async fn invoke(&self, _invocation: Invocation) -> Result<Value> {
        Ok(self.0.describe().await)
    }
}

/// READ `[]` describes the resource, `[attribute]` one attribute,
/// `[attribute, metadata]` one metadata entry.
struct ReadResource(Arc<Resource>);

#[async_trait::async_trait]
impl MethodHandler for ReadResource {
    fn kind(&self) -> MethodKind {
        MethodKind::Read
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        let resource = &self.0;
        let Some(attribute) = invocation.str_arg(0) else {
            return Ok(resource.describe().await);
        };
        if let Some(metadata) = invocation.str_arg(1) {
            let entry = resource.get_metadata(attribute, metadata).await?;
            return Ok(serde_json::to_value(entry)?);
        }
        match resource.attribute(attribute).await {
            Some(attr) => Ok(attr.describe().await),
            None => Err(Error::not_found(format!("{}/{}", resource.path(), attribute))),
        }
    }
}

/// WRITE `[value]`, `[attribute, value]` or `[attribute, metadata, value]`.
struct WriteResource(Arc<Resource>);

#[async_trait::async_trait]
impl MethodHandler for WriteResource {
    fn kind(&self) -> MethodKind {
        MethodKind::Write
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        let resource = &self.0;
        let mut args = invocation.args.into_iter();
        let change = match (args.next(), args.next(), args.next()) {
            (Some(value), None, None) => resource.set_value(VALUE, value, None, Writer::External).await?,
            (Some(Value::String(attribute)), Some(value), None) => {
                resource.set_value(&attribute, value, None, Writer::External).await?
            }
            (Some(Value::String(attribute)), Some(Value::String(metadata)), Some(value)) => {
                resource
                    .set_metadata(&attribute, &metadata, value, Writer::External)
                    .await?
            }
            _ => {
                return Err(Error::InvalidValue(format!(
                    "WRITE on {} expects [value], [attribute, value] or [attribute, metadata, value]",
                    resource.path()
                )))
            }
        };
        Ok(change.to_json())
    }
}

struct Act(Arc<Resource>);

#[async_trait::async_trait]
impl MethodHandler for Act {
    fn kind(&self) -> MethodKind {
        MethodKind::Act
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        self.0.act(invocation.args).await
    }
}

enum SubscribeTarget {
    /// One resource, by exact notification uri.
    Exact(String, Arc<Resource>),
    /// Everything under a provider or service.
    Pattern(String),
}

/// SUBSCRIBE: every argument is a condition (or a list of them).
struct Subscribe {
    engine: Arc<NotificationEngine>,
    target: SubscribeTarget,
}

#[async_trait::async_trait]
impl MethodHandler for Subscribe {
    fn kind(&self) -> MethodKind {
        MethodKind::Subscribe
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        let recipient = invocation
            .recipient
            .clone()
            .ok_or_else(|| Error::InvalidValue("SUBSCRIBE requires a recipient".into()))?;
        let mut filter = match &self.target {
            SubscribeTarget::Exact(sender, _) => Filter::exact(sender.clone()),
            SubscribeTarget::Pattern(sender) => Filter::pattern(sender.clone())?,
        }
        .types([MessageCategory::Update]);
        for arg in &invocation.args {
            for condition in Constraint::list_from_json(arg)? {
                filter = filter.condition(condition);
            }
        }
        let id = self.engine.register(filter, recipient, Some(invocation.public_key.clone()));
        if let SubscribeTarget::Exact(_, resource) = &self.target {
            resource.add_subscription(id.clone()).await;
        }
        Ok(json!({ "subscriptionId": id }))
    }
}

/// UNSUBSCRIBE `[subscriptionId]`.
struct Unsubscribe {
    engine: Arc<NotificationEngine>,
    resource: Option<Arc<Resource>>,
}

#[async_trait::async_trait]
impl MethodHandler for Unsubscribe {
    fn kind(&self) -> MethodKind {
        MethodKind::Unsubscribe
    }

    async fn invoke(&self, invocation: Invocation) -> Result<Value> {
        let id = invocation
            .str_arg(0)
            .ok_or_else(|| Error::InvalidValue("UNSUBSCRIBE requires a subscription id".into()))?;
        let not_found = || Error::not_found(format!("subscription {}", id));
        if let Some(resource) = &self.resource {
            if !resource.subscriptions().await.iter().any(|s| s == id) {
                return Err(not_found());
            }
        }
        // Only the caller that subscribed may cancel it.
        if !self.engine.unregister_as(id, &invocation.public_key) {
            return Err(not_found());
        }
        if let Some(resource) = &self.resource {
            resource.remove_subscription(id).await;
        }
        Ok(json!({ "subscriptionId": id }))
    }
}
