//! Seam between local dispatch and a peer gateway.

use sensigate_core::{PublicKey, RelayCall, Response};
use sensigate_message::AgentCallback;
use std::sync::Arc;

/// Forwards calls addressed to a peer namespace. Implementations never fail
/// with a transport error: an unreachable peer yields a BackendUnavailable
/// response.
#[async_trait::async_trait]
pub trait RemoteRelay: Send + Sync {
    /// Namespace of the peer.
    fn namespace(&self) -> &str;

    fn is_connected(&self) -> bool;

    /// `call` carries paths already stripped of the peer namespace.
    async fn relay(&self, public_key: &PublicKey, call: RelayCall) -> Response;

    /// Register a local recipient for notifications the peer dispatches back
    /// over the link. The returned id names it in `subscribe` and
    /// `registerAgent` calls.
    fn attach_recipient(&self, recipient: Arc<dyn AgentCallback>) -> String;

    fn detach_recipient(&self, recipient_id: &str) -> bool;
}
