//! Alert instance state management: cache, transitions and templating

pub mod cache;
pub mod manager;
pub mod template;

pub use cache::InstanceCache;
pub use manager::{StateManager, StateTransition, HEARTBEAT_MULTIPLIER};
pub use template::{expand, TemplateError};
