//! Sensigate Remote - federation of gateways over peer links

pub mod bridge;
pub mod endpoint;
pub mod link;

pub use bridge::{BridgeOptions, LinkCallback, LinkState, RemoteBridge};
pub use endpoint::RemoteEndpoint;
pub use link::{pair, MemoryEndpoint};
