//! Agent supervision: startup ordering, task ownership and graceful shutdown

pub mod lifecycle;

pub use lifecycle::{AgentSupervisor, LifecycleError};
