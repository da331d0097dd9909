//! Services: named groups of resources under a provider.

use crate::model::{validate_name, ModelContext};
use crate::resource::{Resource, ResourceBuilder, VALUE};
use sensigate_core::{Error, MessageKind, Notification, ResourcePath, Result};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

pub struct Service {
    name: String,
    path: ResourcePath,
    resources: RwLock<Vec<Arc<Resource>>>,
    ctx: Arc<ModelContext>,
}

impl std::fmt::Debug for Service {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Service").field("path", &self.path.to_string()).finish()
    }
}

impl Service {
    pub(crate) fn new(provider: &str, name: &str, ctx: Arc<ModelContext>) -> Self {
        Self {
            name: name.to_string(),
            path: ResourcePath::service(provider, name),
            resources: RwLock::new(Vec::new()),
            ctx,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub async fn create_resource(&self, builder: ResourceBuilder) -> Result<Arc<Resource>> {
        validate_name("resource", builder.name())?;
        let path = ResourcePath::resource(&self.path.provider, &self.name, builder.name());
        let resource = {
            let mut resources = self.resources.write().await;
            if resources.iter().any(|r| r.name() == builder.name()) {
                return Err(Error::name_conflict("resource", path.to_string()));
            }
            let resource = Arc::new(builder.build(path.clone(), self.ctx.clone()).await?);
            resources.push(resource.clone());
            resource
        };
        self.ctx.bump_shape();
        let initial = resource.get(VALUE).await.unwrap_or(Value::Null);
        debug!("resource {} appearing", path);
        self.ctx.emit(Notification::new(MessageKind::ResourceAppearing, path).with_value(initial));
        Ok(resource)
    }

    /// Create a resource from the first registered catalog that knows `name`.
    pub async fn create_resource_from_catalog(&self, name: &str) -> Result<Arc<Resource>> {
        let defaults = self
            .ctx
            .catalogs
            .lookup(name)
            .ok_or_else(|| Error::not_found(format!("no catalog entry for resource '{}'", name)))?;
        let mut builder = ResourceBuilder::new(name, defaults.kind)
            .data_type(defaults.data_type)
            .modifiable(defaults.modifiable)
            .value(defaults.value);
        for constraint in defaults.constraints {
            builder = builder.constraint(constraint);
        }
        self.create_resource(builder).await
    }

    pub async fn remove_resource(&self, name: &str) -> Result<()> {
        let removed = {
            let mut resources = self.resources.write().await;
            let index = resources
                .iter()
                .position(|r| r.name() == name)
                .ok_or_else(|| Error::not_found(format!("{}/{}", self.path, name)))?;
            resources.remove(index)
        };
        self.ctx.bump_shape();
        self.ctx.emit(Notification::new(MessageKind::ResourceDisappearing, removed.path().clone()));
        Ok(())
    }

    pub async fn resource(&self, name: &str) -> Option<Arc<Resource>> {
        self.resources.read().await.iter().find(|r| r.name() == name).cloned()
    }

    pub async fn resources(&self) -> Vec<Arc<Resource>> {
        self.resources.read().await.clone()
    }

    /// Emit disappearing events for every resource; used when the service is dropped.
    pub(crate) async fn retire(&self) {
        for resource in self.resources.write().await.drain(..) {
            self.ctx.emit(Notification::new(MessageKind::ResourceDisappearing, resource.path().clone()));
        }
    }

    pub async fn describe(&self) -> Value {
        let names: Vec<String> = self.resources().await.iter().map(|r| r.name().to_string()).collect();
        json!({ "name": self.name, "resources": names })
    }
}
