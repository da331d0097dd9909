//! Sensigate Model - the provider/service/resource/attribute tree.
//!
//! Elements are created top-down through [`ResourceModel`], each level
//! validating name uniqueness. Writes go through [`Attribute::set_value`] and
//! every committed change is published to the tree's [`EventSink`].

pub mod attribute;
pub mod catalog;
pub mod constraint;
pub mod event;
pub mod metadata;
pub mod model;
pub mod provider;
pub mod resource;
pub mod service;
pub mod value;

pub use attribute::{Attribute, ValueChange};
pub use catalog::{CatalogCollection, MapCatalog, ResourceConfigCatalog, ResourceDefaults};
pub use constraint::{Constraint, Operator};
pub use event::{EventSink, NullSink, RecordingSink};
pub use metadata::Metadata;
pub use model::ResourceModel;
pub use provider::{Location, Provider, ProviderStatus, ADMIN};
pub use resource::{
    ActionHandler, FnAction, Parameter, Resource, ResourceBuilder, ResourceKind, Signature, UpdatePolicy, VALUE,
};
pub use service::Service;
pub use value::{DataType, Modifiable, Writer};
