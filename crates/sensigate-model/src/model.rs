//! The resource tree root.

use crate::attribute::ValueChange;
use crate::catalog::CatalogCollection;
use crate::event::{EventSink, NullSink};
use crate::provider::{Provider, ProviderStatus};
use crate::resource::Resource;
use crate::service::Service;
use crate::value::Writer;
use sensigate_core::{Error, MessageKind, Notification, ResourcePath, Result, NAMESPACE_SEPARATOR, PATH_SEPARATOR};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::info;

/// State shared by every element of one tree.
pub(crate) struct ModelContext {
    sink: Arc<dyn EventSink>,
    shape: AtomicU64,
    pub(crate) catalogs: CatalogCollection,
}

impl ModelContext {
    pub(crate) fn emit(&self, notification: Notification) {
        self.sink.publish(notification);
    }

    pub(crate) fn bump_shape(&self) {
        self.shape.fetch_add(1, Ordering::SeqCst);
    }
}

/// Local identifiers never carry a namespace or a path separator.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<()> {
    if name.is_empty() || name.contains(PATH_SEPARATOR) || name.contains(NAMESPACE_SEPARATOR) {
        return Err(Error::InvalidValue(format!("invalid {} name: '{}'", kind, name)));
    }
    Ok(())
}

pub struct ResourceModel {
    providers: RwLock<Vec<Arc<Provider>>>,
    /// Names reserved by providers still being assembled.
    pending: Mutex<HashSet<String>>,
    ctx: Arc<ModelContext>,
}

impl Default for ResourceModel {
    fn default() -> Self {
        Self::new(Arc::new(NullSink))
    }
}

impl ResourceModel {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            providers: RwLock::new(Vec::new()),
            pending: Mutex::new(HashSet::new()),
            ctx: Arc::new(ModelContext {
                sink,
                shape: AtomicU64::new(0),
                catalogs: CatalogCollection::new(),
            }),
        }
    }

    pub fn catalogs(&self) -> &CatalogCollection {
        &self.ctx.catalogs
    }

    /// Bumped on every element addition or removal.
    pub fn shape_version(&self) -> u64 {
        self.ctx.shape.load(Ordering::SeqCst)
    }

    /// Emit a notification through the tree's sink.
    pub fn publish(&self, notification: Notification) {
        self.ctx.emit(notification);
    }

    /// Register a provider with its `admin` service. It becomes ACTIVE once
    /// the administrative resources exist.
    pub async fn create_provider(&self, name: &str, bridge: &str) -> Result<Arc<Provider>> {
        validate_name("provider", name)?;
        {
            let providers = self.providers.read().await;
            if providers.iter().any(|p| p.name() == name) || !self.pending().insert(name.to_string()) {
                return Err(Error::name_conflict("provider", name));
            }
        }
        let provider = Arc::new(Provider::new(name, self.ctx.clone()));
        self.ctx.emit(Notification::new(MessageKind::ProviderAppearing, provider.path().clone()));
        let assembled = async {
            provider.install_admin(bridge).await?;
            provider.set_status(ProviderStatus::Active).await
        }
        .await;

        // Published only once its admin service exists.
        let mut providers = self.providers.write().await;
        self.pending().remove(name);
        assembled?;
        providers.push(provider.clone());
        drop(providers);
        self.ctx.bump_shape();
        info!("Provider {} registered by {}", name, bridge);
        Ok(provider)
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub async fn remove_provider(&self, name: &str) -> Result<()> {
        let provider = self.provider(name).await.ok_or_else(|| Error::not_found(format!("/{}", name)))?;
        provider.set_status(ProviderStatus::Leaving).await?;
        {
            let mut providers = self.providers.write().await;
            providers.retain(|p| !Arc::ptr_eq(p, &provider));
        }
        provider.retire().await;
        self.ctx.bump_shape();
        self.ctx.emit(Notification::new(MessageKind::ProviderDisappearing, provider.path().clone()));
        info!("Provider {} removed", name);
        Ok(())
    }

    /// Keep the provider in the tree but mark it INACTIVE.
    pub async fn deactivate_provider(&self, name: &str) -> Result<()> {
        let provider = self.provider(name).await.ok_or_else(|| Error::not_found(format!("/{}", name)))?;
        provider.set_status(ProviderStatus::Inactive).await
    }

    pub async fn provider(&self, name: &str) -> Option<Arc<Provider>> {
        self.providers.read().await.iter().find(|p| p.name() == name).cloned()
    }

    pub async fn providers(&self) -> Vec<Arc<Provider>> {
        self.providers.read().await.clone()
    }

    pub async fn resolve_provider(&self, path: &ResourcePath) -> Result<Arc<Provider>> {
        self.provider(&path.provider)
            .await
            .ok_or_else(|| Error::not_found(ResourcePath::provider(&path.provider).to_string()))
    }

    pub async fn resolve_service(&self, path: &ResourcePath) -> Result<Arc<Service>> {
        let service = path
            .service
            .as_deref()
            .ok_or_else(|| Error::InvalidValue(format!("{} does not name a service", path)))?;
        self.resolve_provider(path)
            .await?
            .service(service)
            .await
            .ok_or_else(|| Error::not_found(ResourcePath::service(&path.provider, service).to_string()))
    }

    pub async fn resolve_resource(&self, path: &ResourcePath) -> Result<Arc<Resource>> {
        let resource = path
            .resource
            .as_deref()
            .ok_or_else(|| Error::InvalidValue(format!("{} does not name a resource", path)))?;
        self.resolve_service(path)
            .await?
            .resource(resource)
            .await
            .ok_or_else(|| Error::not_found(path.element().to_string()))
    }

    /// Southbound update: write `value` as the gateway itself.
    pub async fn push_value(&self, path: &ResourcePath, value: Value) -> Result<ValueChange> {
        let attribute = path.attribute.as_deref().unwrap_or(crate::resource::VALUE);
        self.resolve_resource(path)
            .await?
            .set_value(attribute, value, None, Writer::Internal)
            .await
    }
}
