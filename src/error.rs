//! Crate-level error types
//!
//! Component modules keep their own narrow error enums (`MqttError`,
//! `RouterError`, `ConfigError`); `AgentError` is what crosses component
//! boundaries, e.g. when the shadow reconciler reports a failed publish.

use thiserror::Error;

/// Main error type for shadow agent operations
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Transport error: {0}")]
    TransportError(#[from] Box<dyn std::error::Error + Send + Sync>),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

impl AgentError {
    /// Wrap any transport error
    pub fn transport<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::TransportError(Box::new(error))
    }

    /// Whether the error came from the transport layer
    pub fn is_transport(&self) -> bool {
        matches!(self, AgentError::TransportError(_))
    }
}

/// Result type for Agent operations
pub type AgentResult<T> = Result<T, AgentError>;
