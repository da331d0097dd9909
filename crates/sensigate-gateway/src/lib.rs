//! Sensigate Gateway - peer links over WebSocket and the server bootstrap

pub mod auth;
pub mod server;
pub mod ws;

pub use auth::PeerAuth;
pub use server::{build_core, dial_peers, router, serve, start_gateway, GatewayState};
pub use ws::{connect_peer, WsEndpoint};
