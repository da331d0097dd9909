//! Sensigate Session - identities, caller sessions and the gateway core

pub mod core;
pub mod identity;
pub mod registry;
pub mod session;

pub use crate::core::Core;
pub use identity::{account_key, application_key, Account, IdentityStore, MemoryIdentityStore};
pub use registry::SessionRegistry;
pub use session::{AnonymousSession, AuthenticatedSession, Session, SessionIdentity};
