//! Sensigate Access - method dispatch and accessibility filtering
//!
//! Each model element is reached through a [`DispatchTable`] binding the
//! access methods it supports. A caller's [`AccessView`] decorates the table
//! once, replacing denied methods with forbidding handlers. Paths in a peer
//! namespace are routed to a [`RemoteRelay`] instead.

pub mod accessible;
pub mod dispatch;
pub mod dispatcher;
pub mod handlers;
pub mod method;
pub mod policy;
pub mod relay;

pub use accessible::accessible;
pub use dispatch::{spread_args, DispatchTable, Invocation, MethodHandler};
pub use dispatcher::{Dispatcher, Route};
pub use handlers::{element_table, resource_table, Element};
pub use method::MethodKind;
pub use policy::{glob_match, permission_key, AccessPolicy, AccessView, CompiledTier, Decision};
pub use relay::RemoteRelay;
