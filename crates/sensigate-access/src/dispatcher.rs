//! Routing of addressed calls to local dispatch tables or peer relays, and
//! the access-filtered describe operations.

use crate::accessible::accessible;
use crate::dispatch::DispatchTable;
use crate::handlers::{element_table, Element};
use crate::method::MethodKind;
use crate::policy::AccessView;
use crate::relay::RemoteRelay;
use dashmap::DashMap;
use sensigate_core::{split_namespace, Error, Namespace, ResourcePath, Result};
use sensigate_message::NotificationEngine;
use sensigate_model::{Provider, ResourceModel, Service};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

/// Where an addressed path is served.
pub enum Route {
    /// The local tree, with the path in local identifiers.
    Local(ResourcePath),
    /// A peer, with the path stripped of the peer namespace.
    Remote(Arc<dyn RemoteRelay>, ResourcePath),
}

pub struct Dispatcher {
    namespace: Namespace,
    model: Arc<ResourceModel>,
    engine: Arc<NotificationEngine>,
    remotes: DashMap<String, Arc<dyn RemoteRelay>>,
}

impl Dispatcher {
    pub fn new(namespace: Namespace, model: Arc<ResourceModel>, engine: Arc<NotificationEngine>) -> Self {
        Self {
            namespace,
            model,
            engine,
            remotes: DashMap::new(),
        }
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    pub fn model(&self) -> &Arc<ResourceModel> {
        &self.model
    }

    pub fn engine(&self) -> &Arc<NotificationEngine> {
        &self.engine
    }

    // -- remote namespace bindings --

    /// Bind a peer namespace. A later bind for the same namespace replaces
    /// the earlier one.
    pub fn bind_remote(&self, relay: Arc<dyn RemoteRelay>) -> Result<()> {
        let ns = relay.namespace().to_string();
        if ns == self.namespace.as_str() {
            return Err(Error::ProtocolError(format!("peer claims our own namespace '{}'", ns)));
        }
        info!("Bound remote namespace {}", ns);
        self.remotes.insert(ns, relay);
        Ok(())
    }

    pub fn unbind_remote(&self, namespace: &str) -> bool {
        let removed = self.remotes.remove(namespace).is_some();
        if removed {
            info!("Unbound remote namespace {}", namespace);
        }
        removed
    }

    pub fn remote(&self, namespace: &str) -> Option<Arc<dyn RemoteRelay>> {
        self.remotes.get(namespace).map(|r| r.value().clone())
    }

    /// Bound peers ordered by namespace.
    pub fn remotes(&self) -> Vec<Arc<dyn RemoteRelay>> {
        let mut remotes: Vec<_> = self.remotes.iter().map(|r| r.value().clone()).collect();
        remotes.sort_by(|a, b| a.namespace().cmp(b.namespace()));
        remotes
    }

    /// Decide where `path` is served. Self-addressed paths are stripped and
    /// served locally; an unbound namespace is BackendUnavailable.
    pub fn route(&self, path: &ResourcePath) -> Result<Route> {
        match split_namespace(&path.provider) {
            (None, _) => Ok(Route::Local(path.clone())),
            (Some(ns), _) if ns == self.namespace.as_str() => Ok(Route::Local(self.namespace.strip_path(path)?)),
            (Some(ns), _) => {
                let relay = self
                    .remote(ns)
                    .ok_or_else(|| Error::unavailable(format!("no peer bound for namespace '{}'", ns)))?;
                let stripped = Namespace::new(ns).strip_path(path)?;
                debug!("{} routed to peer {} as {}", path, ns, stripped);
                Ok(Route::Remote(relay, stripped))
            }
        }
    }

    // -- local elements --

    pub async fn element(&self, path: &ResourcePath) -> Result<Element> {
        if path.resource.is_some() {
            Ok(Element::Resource(self.model.resolve_resource(path).await?))
        } else if path.service.is_some() {
            Ok(Element::Service(self.model.resolve_service(path).await?))
        } else {
            Ok(Element::Provider(self.model.resolve_provider(path).await?))
        }
    }

    /// The undecorated table of a local element.
    pub async fn table(&self, path: &ResourcePath) -> Result<DispatchTable> {
        Ok(element_table(self.element(path).await?, self.engine.clone()))
    }

    /// The table of a local element as seen through `view`.
    pub async fn accessible_table(&self, path: &ResourcePath, view: &AccessView) -> Result<DispatchTable> {
        Ok(accessible(&self.table(path).await?, view))
    }

    // -- describe, listing only READ-accessible elements --

    fn check_read(&self, path: &ResourcePath, view: &AccessView) -> Result<()> {
        if view.permits(MethodKind::Read, path) {
            Ok(())
        } else {
            Err(Error::forbidden(MethodKind::Read, path.to_string()))
        }
    }

    async fn visible_providers(&self, view: &AccessView) -> Vec<Arc<Provider>> {
        self.model
            .providers()
            .await
            .into_iter()
            .filter(|p| view.permits(MethodKind::Read, p.path()))
            .collect()
    }

    async fn visible_services(&self, provider: &Provider, view: &AccessView) -> Vec<Arc<Service>> {
        provider
            .services()
            .await
            .into_iter()
            .filter(|s| view.permits(MethodKind::Read, s.path()))
            .collect()
    }

    async fn visible_resource_names(&self, service: &Service, view: &AccessView) -> Vec<String> {
        service
            .resources()
            .await
            .iter()
            .filter(|r| view.permits(MethodKind::Read, r.path()))
            .map(|r| r.name().to_string())
            .collect()
    }

    pub async fn describe_providers(&self, view: &AccessView) -> Value {
        let names: Vec<String> = self
            .visible_providers(view)
            .await
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        json!(names)
    }

    /// The whole visible tree down to resource names and kinds.
    pub async fn describe_all(&self, view: &AccessView) -> Value {
        let mut providers = Vec::new();
        for provider in self.visible_providers(view).await {
            let mut services = Vec::new();
            for service in self.visible_services(&provider, view).await {
                let resources: Vec<Value> = service
                    .resources()
                    .await
                    .iter()
                    .filter(|r| view.permits(MethodKind::Read, r.path()))
                    .map(|r| json!({ "name": r.name(), "type": r.kind() }))
                    .collect();
                services.push(json!({ "name": service.name(), "resources": resources }));
            }
            providers.push(json!({
                "name": provider.name(),
                "status": provider.status().await,
                "services": services,
            }));
        }
        Value::Array(providers)
    }

    pub async fn describe_provider(&self, path: &ResourcePath, view: &AccessView) -> Result<Value> {
        let provider = self.model.resolve_provider(path).await?;
        self.check_read(provider.path(), view)?;
        let mut description = provider.describe().await;
        description["services"] = self.services_of(&provider, view).await;
        Ok(description)
    }

    pub async fn describe_services(&self, path: &ResourcePath, view: &AccessView) -> Result<Value> {
        let provider = self.model.resolve_provider(path).await?;
        self.check_read(provider.path(), view)?;
        Ok(self.services_of(&provider, view).await)
    }

    async fn services_of(&self, provider: &Provider, view: &AccessView) -> Value {
        let names: Vec<String> = self
            .visible_services(provider, view)
            .await
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        json!(names)
    }

    pub async fn describe_service(&self, path: &ResourcePath, view: &AccessView) -> Result<Value> {
        let service = self.model.resolve_service(path).await?;
        self.check_read(service.path(), view)?;
        Ok(json!({
            "name": service.name(),
            "resources": self.visible_resource_names(&service, view).await,
        }))
    }

    pub async fn describe_resources(&self, path: &ResourcePath, view: &AccessView) -> Result<Value> {
        let service = self.model.resolve_service(path).await?;
        self.check_read(service.path(), view)?;
        Ok(json!(self.visible_resource_names(&service, view).await))
    }

    pub async fn describe_resource(&self, path: &ResourcePath, view: &AccessView) -> Result<Value> {
        let resource = self.model.resolve_resource(path).await?;
        self.check_read(resource.path(), view)?;
        Ok(resource.describe().await)
    }
}
