//! Contract error types for the data-table engine
//!
//! These errors are transport-agnostic and used by the native client and the controller.

/// Engine errors surfaced to callers
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    /// Logical entity name has no registry entry
    #[error("entity not registered: {entity}")]
    EntityNotFound { entity: String },

    /// Registry entry is unusable (e.g. no resolvable scope path)
    #[error("configuration error for '{entity}': {reason}")]
    Configuration { entity: String, reason: String },

    /// Backend request failed
    #[error("backend error: {message}")]
    Backend { message: String },

    /// Client filter could not be interpreted
    #[error("invalid filter on '{column}': {reason}")]
    InvalidFilter { column: String, reason: String },

    /// Operation requires a caller profile
    #[error("no caller profile")]
    Unauthenticated,

    #[error("internal error")]
    Internal,
}

impl EngineError {
    pub fn not_found(entity: impl Into<String>) -> Self {
        Self::EntityNotFound {
            entity: entity.into(),
        }
    }

    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_entity() {
        let err = EngineError::not_found("tickets");
        assert_eq!(err.to_string(), "entity not registered: tickets");
    }

    #[test]
    fn backend_error_keeps_message() {
        let err = EngineError::backend(anyhow::anyhow!("connection reset"));
        assert_eq!(err.to_string(), "backend error: connection reset");
    }
}
