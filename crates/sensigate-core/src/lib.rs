//! Sensigate Core - error taxonomy, response envelopes, peer wire protocol,
//! resource paths and gateway configuration shared by every other crate.

pub mod config;
pub mod error;
pub mod event;
pub mod name;
pub mod path;
pub mod protocol;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use event::{MessageCategory, MessageKind, Notification};
pub use name::PatternName;
pub use path::{split_namespace, Namespace, ResourcePath, NAMESPACE_SEPARATOR, PATH_SEPARATOR};
pub use protocol::*;
pub use types::*;
