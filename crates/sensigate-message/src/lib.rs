//! Sensigate Message - subscription filters and notification fan-out

pub mod agent;
pub mod engine;
pub mod filter;

pub use agent::{Agent, AgentCallback, ChannelCallback, FnCallback};
pub use engine::NotificationEngine;
pub use filter::{DeliveryPolicy, Filter};
