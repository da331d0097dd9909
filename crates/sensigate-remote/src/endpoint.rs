//! Transport seam of a peer link.

use sensigate_core::{PeerMessage, Result};

/// One side of a bidirectional, message-framed peer connection.
///
/// `send` may be called concurrently; `recv` is only ever driven by the
/// bridge's reader task.
#[async_trait::async_trait]
pub trait RemoteEndpoint: Send + Sync {
    async fn send(&self, message: PeerMessage) -> Result<()>;

    /// Next frame from the peer. `None` once the transport is closed;
    /// `Some(Err(_))` for a frame that could not be decoded.
    async fn recv(&self) -> Option<Result<PeerMessage>>;

    async fn close(&self);

    /// Short human-readable description, used in logs.
    fn describe(&self) -> String {
        "peer".to_string()
    }
}
