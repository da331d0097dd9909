//! Resource-config catalogs: named sources of defaults for resources that
//! integrations create by name only.

use crate::constraint::Constraint;
use crate::resource::ResourceKind;
use crate::value::{DataType, Modifiable};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

#[derive(Clone, Debug)]
pub struct ResourceDefaults {
    pub kind: ResourceKind,
    pub data_type: DataType,
    pub modifiable: Modifiable,
    pub value: Value,
    pub constraints: Vec<Constraint>,
}

impl ResourceDefaults {
    pub fn new(kind: ResourceKind, data_type: DataType) -> Self {
        Self {
            kind,
            data_type,
            modifiable: Modifiable::Updatable,
            value: Value::Null,
            constraints: Vec::new(),
        }
    }

    pub fn modifiable(mut self, modifiable: Modifiable) -> Self {
        self.modifiable = modifiable;
        self
    }

    pub fn value(mut self, value: Value) -> Self {
        self.value = value;
        self
    }

    pub fn constraint(mut self, constraint: Constraint) -> Self {
        self.constraints.push(constraint);
        self
    }
}

pub trait ResourceConfigCatalog: Send + Sync {
    fn name(&self) -> &str;
    fn defaults(&self, resource: &str) -> Option<ResourceDefaults>;
}

/// A catalog backed by a fixed map.
pub struct MapCatalog {
    name: String,
    entries: HashMap<String, ResourceDefaults>,
}

impl MapCatalog {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), entries: HashMap::new() }
    }

    pub fn with(mut self, resource: impl Into<String>, defaults: ResourceDefaults) -> Self {
        self.entries.insert(resource.into(), defaults);
        self
    }
}

impl ResourceConfigCatalog for MapCatalog {
    fn name(&self) -> &str {
        &self.name
    }

    fn defaults(&self, resource: &str) -> Option<ResourceDefaults> {
        self.entries.get(resource).cloned()
    }
}

type CatalogList = Arc<Vec<Arc<dyn ResourceConfigCatalog>>>;

/// Copy-on-write list of catalogs. Readers iterate a snapshot and never see a
/// registration or removal that happens mid-iteration.
#[derive(Default)]
pub struct CatalogCollection {
    catalogs: RwLock<CatalogList>,
}

impl CatalogCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CatalogList {
        match self.catalogs.read() {
            Ok(list) => list.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn update(&self, f: impl FnOnce(&mut Vec<Arc<dyn ResourceConfigCatalog>>)) {
        let mut guard = match self.catalogs.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut next: Vec<_> = guard.iter().cloned().collect();
        f(&mut next);
        *guard = Arc::new(next);
    }

    pub fn add(&self, catalog: Arc<dyn ResourceConfigCatalog>) {
        self.update(|list| list.push(catalog));
    }

    pub fn remove(&self, name: &str) {
        self.update(|list| list.retain(|c| c.name() != name));
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    /// Defaults from the first catalog, in registration order, that knows `resource`.
    pub fn lookup(&self, resource: &str) -> Option<ResourceDefaults> {
        self.snapshot().iter().find_map(|c| c.defaults(resource))
    }
}
