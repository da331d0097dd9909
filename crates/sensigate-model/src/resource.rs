//! Resources: typed units of data or behavior under a service.

use crate::attribute::{Attribute, ValueChange};
use crate::constraint::Constraint;
use crate::metadata::Metadata;
use crate::model::ModelContext;
use crate::value::{DataType, Modifiable, Writer};
use async_trait::async_trait;
use sensigate_core::{Error, MessageKind, Notification, ResourcePath, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tracing::debug;

/// Name of the attribute holding a resource's main value.
pub const VALUE: &str = "value";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResourceKind {
    Property,
    SensorData,
    StateVariable,
    Action,
    Linked,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum UpdatePolicy {
    #[default]
    None,
    Periodic { period_ms: u64 },
    Conditional,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
}

impl Parameter {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self { name: name.into(), data_type }
    }
}

/// One accepted argument list of an ACTION resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Signature {
    pub parameters: Vec<Parameter>,
}

impl Signature {
    pub fn new(parameters: Vec<Parameter>) -> Self {
        Self { parameters }
    }

    pub fn matches(&self, args: &[Value]) -> bool {
        self.parameters.len() == args.len()
            && self.parameters.iter().zip(args).all(|(p, a)| p.data_type.accepts(a))
    }
}

/// Behavior behind an ACTION resource.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn act(&self, args: Vec<Value>) -> Result<Value>;
}

/// Adapts a plain closure into an [`ActionHandler`].
pub struct FnAction<F>(pub F);

#[async_trait]
impl<F> ActionHandler for FnAction<F>
where
    F: Fn(Vec<Value>) -> Result<Value> + Send + Sync,
{
    async fn act(&self, args: Vec<Value>) -> Result<Value> {
        (self.0)(args)
    }
}

struct ActionBinding {
    signatures: Vec<Signature>,
    handler: Arc<dyn ActionHandler>,
}

pub struct Resource {
    name: String,
    kind: ResourceKind,
    policy: UpdatePolicy,
    path: ResourcePath,
    attributes: RwLock<Vec<Arc<Attribute>>>,
    subscriptions: RwLock<Vec<String>>,
    link: Option<Weak<Resource>>,
    action: Option<ActionBinding>,
    ctx: Arc<ModelContext>,
}

impl std::fmt::Debug for Resource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Resource")
            .field("path", &self.path.to_string())
            .field("kind", &self.kind)
            .finish()
    }
}

impl Resource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn policy(&self) -> UpdatePolicy {
        self.policy
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// Target of a LINKED resource, if it is still alive.
    pub fn link(&self) -> Option<Arc<Resource>> {
        self.link.as_ref().and_then(Weak::upgrade)
    }

    pub async fn local_attribute(&self, name: &str) -> Option<Arc<Attribute>> {
        self.attributes.read().await.iter().find(|a| a.name() == name).cloned()
    }

    /// Local attributes win; a LINKED resource then looks one level into its target.
    pub async fn attribute(&self, name: &str) -> Option<Arc<Attribute>> {
        if let Some(local) = self.local_attribute(name).await {
            return Some(local);
        }
        match self.link() {
            Some(target) => target.local_attribute(name).await,
            None => None,
        }
    }

    pub async fn attributes(&self) -> Vec<Arc<Attribute>> {
        let mut all = self.attributes.read().await.clone();
        if let Some(target) = self.link() {
            for attr in target.attributes.read().await.iter() {
                if !all.iter().any(|a| a.name() == attr.name()) {
                    all.push(attr.clone());
                }
            }
        }
        all
    }

    pub async fn add_attribute(&self, attribute: Attribute) -> Result<Arc<Attribute>> {
        let mut attributes = self.attributes.write().await;
        if attributes.iter().any(|a| a.name() == attribute.name()) {
            return Err(Error::name_conflict("attribute", format!("{}/{}", self.path, attribute.name())));
        }
        let attribute = Arc::new(attribute);
        attributes.push(attribute.clone());
        Ok(attribute)
    }

    pub async fn get(&self, attribute: &str) -> Result<Value> {
        match self.attribute(attribute).await {
            Some(attr) => Ok(attr.value().await),
            None => Err(self.missing(attribute)),
        }
    }

    /// Write an attribute value and emit ATTRIBUTE_VALUE_UPDATED. The event is
    /// emitted for every successful write, changed or not.
    pub async fn set_value(
        &self,
        attribute: &str,
        value: Value,
        timestamp: Option<i64>,
        writer: Writer,
    ) -> Result<ValueChange> {
        if let Some(change) = self.write_local(attribute, value.clone(), timestamp, writer).await? {
            return Ok(change);
        }
        if let Some(target) = self.link() {
            if let Some(change) = target.write_local(attribute, value, timestamp, writer).await? {
                return Ok(change);
            }
        }
        Err(self.missing(attribute))
    }

    async fn write_local(
        &self,
        attribute: &str,
        value: Value,
        timestamp: Option<i64>,
        writer: Writer,
    ) -> Result<Option<ValueChange>> {
        let Some(attr) = self.local_attribute(attribute).await else {
            return Ok(None);
        };
        let change = attr.set_value(value, timestamp, writer).await?;
        self.ctx.emit(
            Notification::new(MessageKind::AttributeValueUpdated, self.attribute_path(attribute))
                .with_value(change.value.clone())
                .changed(change.has_changed)
                .at(change.timestamp),
        );
        Ok(Some(change))
    }

    /// Write a metadata entry of an attribute and emit METADATA_VALUE_UPDATED.
    pub async fn set_metadata(
        &self,
        attribute: &str,
        metadata: &str,
        value: Value,
        writer: Writer,
    ) -> Result<ValueChange> {
        let (owner, attr) = match self.local_attribute(attribute).await {
            Some(attr) => (self.path.clone(), attr),
            None => {
                let target = self.link().ok_or_else(|| self.missing(attribute))?;
                let attr = target.local_attribute(attribute).await.ok_or_else(|| self.missing(attribute))?;
                (target.path.clone(), attr)
            }
        };
        let change = attr.set_metadata(metadata, value, writer).await?;
        let mut path = owner;
        path.attribute = Some(attribute.to_string());
        self.ctx.emit(
            Notification::new(MessageKind::MetadataValueUpdated, path)
                .with_metadata(metadata)
                .with_value(change.value.clone())
                .changed(change.has_changed)
                .at(change.timestamp),
        );
        Ok(change)
    }

    pub async fn get_metadata(&self, attribute: &str, metadata: &str) -> Result<Metadata> {
        let attr = self.attribute(attribute).await.ok_or_else(|| self.missing(attribute))?;
        attr.metadata(metadata)
            .await
            .ok_or_else(|| Error::not_found(format!("{}/{}/{}", self.path, attribute, metadata)))
    }

    pub fn signatures(&self) -> &[Signature] {
        self.action.as_ref().map(|a| a.signatures.as_slice()).unwrap_or(&[])
    }

    /// Invoke an ACTION resource and emit ACTUATED with the handler's result.
    pub async fn act(&self, args: Vec<Value>) -> Result<Value> {
        let binding = self
            .action
            .as_ref()
            .ok_or_else(|| Error::not_found(format!("{} is not an action", self.path)))?;
        if !binding.signatures.is_empty() && !binding.signatures.iter().any(|s| s.matches(&args)) {
            return Err(Error::not_found(format!("unknown signature for {}", self.path)));
        }
        debug!("act {} with {} argument(s)", self.path, args.len());
        let result = binding.handler.act(args).await?;
        self.ctx.emit(Notification::new(MessageKind::Actuated, self.path.clone()).with_value(result.clone()));
        Ok(result)
    }

    pub async fn add_subscription(&self, id: impl Into<String>) {
        self.subscriptions.write().await.push(id.into());
    }

    /// Returns whether `id` was registered on this resource.
    pub async fn remove_subscription(&self, id: &str) -> bool {
        let mut subscriptions = self.subscriptions.write().await;
        let before = subscriptions.len();
        subscriptions.retain(|s| s != id);
        subscriptions.len() != before
    }

    pub async fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.read().await.clone()
    }

    pub async fn describe(&self) -> Value {
        let mut attributes = Vec::new();
        for attr in self.attributes().await {
            if !attr.is_hidden().await {
                attributes.push(attr.describe().await);
            }
        }
        let mut description = json!({
            "name": self.name,
            "type": self.kind,
            "policy": self.policy,
            "attributes": attributes,
        });
        if self.kind == ResourceKind::Action {
            description["signatures"] = json!(self.signatures());
        }
        description
    }

    fn attribute_path(&self, attribute: &str) -> ResourcePath {
        let mut path = self.path.clone();
        path.attribute = Some(attribute.to_string());
        path
    }

    fn missing(&self, attribute: &str) -> Error {
        Error::not_found(format!("{}/{}", self.path, attribute))
    }
}

/// Describes a resource before it is attached to a service.
pub struct ResourceBuilder {
    name: String,
    kind: ResourceKind,
    data_type: DataType,
    modifiable: Modifiable,
    value: Value,
    hidden: bool,
    policy: UpdatePolicy,
    constraints: Vec<Constraint>,
    metadata: Vec<Metadata>,
    extra: Vec<(String, DataType, Modifiable, Value)>,
    link: Option<Weak<Resource>>,
    handler: Option<Arc<dyn ActionHandler>>,
    signatures: Vec<Signature>,
}

impl ResourceBuilder {
    pub fn new(name: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            name: name.into(),
            kind,
            data_type: DataType::Any,
            modifiable: Modifiable::Updatable,
            value: Value::Null,
            hidden: false,
            policy: UpdatePolicy::None,
            constraints: Vec::new(),
            metadata: Vec::new(),
            extra: Vec::new(),
            link: None,
            handler: None,
            signatures: Vec::new(),
        }
    }

    pub fn property(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::Property)
    }

    pub fn sensor(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::SensorData)
    }

    pub fn state_variable(name: impl Into<String>) -> Self {
        Self::new(name, ResourceKind::StateVariable)
    }

    pub fn action(name: impl Into<String>, handler: Arc<dyn ActionHandler>) -> Self {
        let mut builder = Self::new(name, ResourceKind::Action);
        builder.handler = Some(handler);
        builder
    }

    /// A LINKED resource delegating missing attributes to `target`.
    pub fn linked(name: impl Into<String>, target: &Arc<Resource>) -> Self {
        let mut builder = Self::new(name, ResourceKind::Linked);
        builder.link = Some(Arc::downgrade(target));
        builder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn data_type(mut self, data_type: DataType) -> Self {
        self.data_type = data_type;
        self
    }

    pub fn modifiable(mut self, modifiable: Modifiable) -> Self {
        self.modifiable = modifiable;
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn policy(mut self, policy: UpdatePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }

    pub fn metadata(mut self, metadata: Metadata) -> Self {
        self.metadata.push(metadata);
        self
    }

    pub fn unit(self, unit: impl Into<String>) -> Self {
        self.metadata(Metadata::text(crate::metadata::UNIT, unit))
    }

    /// An additional attribute next to `value`.
    pub fn attribute(mut self, name: impl Into<String>, data_type: DataType, modifiable: Modifiable, value: Value) -> Self {
        self.extra.push((name.into(), data_type, modifiable, value));
        self
    }

    pub fn signature(mut self, signature: Signature) -> Self {
        self.signatures.push(signature);
        self
    }

    pub(crate) async fn build(self, path: ResourcePath, ctx: Arc<ModelContext>) -> Result<Resource> {
        let mut attributes = Vec::new();
        match self.kind {
            ResourceKind::Action => {
                if self.handler.is_none() {
                    return Err(Error::InvalidValue(format!("action {} has no handler", path)));
                }
            }
            ResourceKind::Linked => {
                if self.link.is_none() {
                    return Err(Error::InvalidValue(format!("linked resource {} has no target", path)));
                }
            }
            _ => {
                self.data_type.check(&self.value)?;
                let value = Attribute::with_value(VALUE, self.data_type, self.modifiable, self.value, self.hidden);
                for constraint in self.constraints {
                    value.add_constraint(constraint).await;
                }
                for metadata in self.metadata {
                    value.add_metadata(metadata).await?;
                }
                attributes.push(Arc::new(value));
            }
        }
        for (name, data_type, modifiable, value) in self.extra {
            if attributes.iter().any(|a: &Arc<Attribute>| a.name() == name) {
                return Err(Error::name_conflict("attribute", format!("{}/{}", path, name)));
            }
            data_type.check(&value)?;
            attributes.push(Arc::new(Attribute::with_value(name, data_type, modifiable, value, false)));
        }
        let action = self.handler.map(|handler| ActionBinding { signatures: self.signatures, handler });
        Ok(Resource {
            name: self.name,
            kind: self.kind,
            policy: self.policy,
            path,
            attributes: RwLock::new(attributes),
            subscriptions: RwLock::new(Vec::new()),
            link: self.link,
            action,
            ctx,
        })
    }
}
