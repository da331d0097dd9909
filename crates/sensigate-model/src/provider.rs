//! Providers: top-level devices, each with an administrative service.

use crate::constraint::{Constraint, Operator};
use crate::model::{validate_name, ModelContext};
use crate::resource::{ResourceBuilder, VALUE};
use crate::service::Service;
use crate::value::{DataType, Modifiable, Writer};
use sensigate_core::{Error, MessageKind, Notification, ResourcePath, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tokio::sync::RwLock;

pub const ADMIN: &str = "admin";
pub const FRIENDLY_NAME: &str = "friendlyName";
pub const LIFECYCLE_STATUS: &str = "lifecycleStatus";
pub const BRIDGE: &str = "bridge";
pub const LOCATION: &str = "location";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProviderStatus {
    Joining,
    Active,
    Leaving,
    Inactive,
    Unknown,
}

impl ProviderStatus {
    pub fn all() -> &'static [ProviderStatus] {
        &[
            ProviderStatus::Joining,
            ProviderStatus::Active,
            ProviderStatus::Leaving,
            ProviderStatus::Inactive,
            ProviderStatus::Unknown,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            ProviderStatus::Joining => "JOINING",
            ProviderStatus::Active => "ACTIVE",
            ProviderStatus::Leaving => "LEAVING",
            ProviderStatus::Inactive => "INACTIVE",
            ProviderStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for ProviderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ProviderStatus {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> {
        ProviderStatus::all()
            .iter()
            .copied()
            .find(|status| status.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| Error::InvalidValue(format!("unknown provider status: {}", s)))
    }
}

/// Geographic position exposed by `admin/location`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lon: f64,
}

pub struct Provider {
    name: String,
    path: ResourcePath,
    services: RwLock<Vec<Arc<Service>>>,
    ctx: Arc<ModelContext>,
}

impl std::fmt::Debug for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provider").field("name", &self.name).finish()
    }
}

impl Provider {
    pub(crate) fn new(name: &str, ctx: Arc<ModelContext>) -> Self {
        Self {
            name: name.to_string(),
            path: ResourcePath::provider(name),
            services: RwLock::new(Vec::new()),
            ctx,
        }
    }

    /// Build the administrative service. Called once, right after creation.
    pub(crate) async fn install_admin(&self, bridge: &str) -> Result<()> {
        let admin = self.create_service(ADMIN).await?;
        let statuses: Vec<Value> = ProviderStatus::all().iter().map(|s| json!(s.name())).collect();
        admin
            .create_resource(
                ResourceBuilder::property(FRIENDLY_NAME)
                    .data_type(DataType::String)
                    .modifiable(Modifiable::Modifiable)
                    .value(json!(self.name)),
            )
            .await?;
        admin
            .create_resource(
                ResourceBuilder::state_variable(LIFECYCLE_STATUS)
                    .data_type(DataType::String)
                    .modifiable(Modifiable::Updatable)
                    .value(json!(ProviderStatus::Joining.name()))
                    .constraint(Constraint::new(Operator::In, Value::Array(statuses))?),
            )
            .await?;
        admin
            .create_resource(
                ResourceBuilder::property(BRIDGE)
                    .data_type(DataType::String)
                    .modifiable(Modifiable::Fixed)
                    .value(json!(bridge)),
            )
            .await?;
        admin
            .create_resource(
                ResourceBuilder::property(LOCATION)
                    .data_type(DataType::Object)
                    .modifiable(Modifiable::Modifiable),
            )
            .await?;
        Ok(())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub async fn create_service(&self, name: &str) -> Result<Arc<Service>> {
        validate_name("service", name)?;
        let service = {
            let mut services = self.services.write().await;
            if services.iter().any(|s| s.name() == name) {
                return Err(Error::name_conflict("service", format!("{}/{}", self.path, name)));
            }
            let service = Arc::new(Service::new(&self.name, name, self.ctx.clone()));
            services.push(service.clone());
            service
        };
        self.ctx.bump_shape();
        self.ctx.emit(Notification::new(MessageKind::ServiceAppearing, service.path().clone()));
        Ok(service)
    }

    pub async fn remove_service(&self, name: &str) -> Result<()> {
        if name == ADMIN {
            return Err(Error::NotModifiable(format!("{}/{} cannot be removed", self.path, ADMIN)));
        }
        let removed = {
            let mut services = self.services.write().await;
            let index = services
                .iter()
                .position(|s| s.name() == name)
                .ok_or_else(|| Error::not_found(format!("{}/{}", self.path, name)))?;
            services.remove(index)
        };
        removed.retire().await;
        self.ctx.bump_shape();
        self.ctx.emit(Notification::new(MessageKind::ServiceDisappearing, removed.path().clone()));
        Ok(())
    }

    pub async fn service(&self, name: &str) -> Option<Arc<Service>> {
        self.services.read().await.iter().find(|s| s.name() == name).cloned()
    }

    /// Services in discovery order.
    pub async fn services(&self) -> Vec<Arc<Service>> {
        self.services.read().await.clone()
    }

    pub(crate) async fn retire(&self) {
        for service in self.services.write().await.drain(..) {
            service.retire().await;
            self.ctx.emit(Notification::new(MessageKind::ServiceDisappearing, service.path().clone()));
        }
    }

    async fn admin_value(&self, resource: &str) -> Result<Value> {
        let admin = self.service(ADMIN).await.ok_or_else(|| Error::not_found(format!("{}/{}", self.path, ADMIN)))?;
        let resource = admin
            .resource(resource)
            .await
            .ok_or_else(|| Error::not_found(format!("{}/{}/{}", self.path, ADMIN, resource)))?;
        resource.get(VALUE).await
    }

    async fn set_admin_value(&self, resource: &str, value: Value) -> Result<()> {
        let admin = self.service(ADMIN).await.ok_or_else(|| Error::not_found(format!("{}/{}", self.path, ADMIN)))?;
        let resource = admin
            .resource(resource)
            .await
            .ok_or_else(|| Error::not_found(format!("{}/{}/{}", self.path, ADMIN, resource)))?;
        resource.set_value(VALUE, value, None, Writer::Internal).await?;
        Ok(())
    }

    pub async fn status(&self) -> ProviderStatus {
        self.admin_value(LIFECYCLE_STATUS)
            .await
            .ok()
            .and_then(|v| v.as_str().and_then(|s| s.parse().ok()))
            .unwrap_or(ProviderStatus::Unknown)
    }

    pub async fn set_status(&self, status: ProviderStatus) -> Result<()> {
        self.set_admin_value(LIFECYCLE_STATUS, json!(status.name())).await
    }

    pub async fn friendly_name(&self) -> Option<String> {
        self.admin_value(FRIENDLY_NAME).await.ok().and_then(|v| v.as_str().map(String::from))
    }

    pub async fn bridge(&self) -> Option<String> {
        self.admin_value(BRIDGE).await.ok().and_then(|v| v.as_str().map(String::from))
    }

    pub async fn location(&self) -> Option<Location> {
        self.admin_value(LOCATION).await.ok().and_then(|v| serde_json::from_value(v).ok())
    }

    pub async fn set_location(&self, location: Option<Location>) -> Result<()> {
        self.set_admin_value(LOCATION, serde_json::to_value(location)?).await
    }

    pub async fn describe(&self) -> Value {
        let services: Vec<String> = self.services().await.iter().map(|s| s.name().to_string()).collect();
        json!({
            "name": self.name,
            "status": self.status().await,
            "services": services,
        })
    }
}
