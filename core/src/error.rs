use std::fmt::Display;

use thiserror::Error;

/// Expected failures of domain operations.
///
/// Storage and pipeline functions return `anyhow::Result`; these variants are
/// raised through it so callers can `downcast_ref::<DomainError>()` and map
/// them to a response without string matching.
#[derive(Debug, Error)]
pub enum DomainError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    NotMember(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("Resource unavailable: {0}")]
    ResourceUnavailable(String),
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Display) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// Returns the `DomainError` carried by `err`, if any.
#[must_use]
pub fn domain_error(err: &anyhow::Error) -> Option<&DomainError> {
    err.downcast_ref::<DomainError>()
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn test_not_found_message() {
        let err = DomainError::not_found("Recipe", 42);
        assert_eq!(err.to_string(), "Recipe 42 not found");
    }

    #[test]
    fn test_downcast_through_context() {
        let err: anyhow::Result<()> =
            Err(DomainError::validation("bad amount")).context("creating recipe");
        let err = err.unwrap_err();
        assert!(matches!(
            domain_error(&err),
            Some(DomainError::Validation(msg)) if msg == "bad amount"
        ));
    }

    #[test]
    fn test_plain_anyhow_is_not_domain() {
        let err = anyhow::anyhow!("disk on fire");
        assert!(domain_error(&err).is_none());
    }
}
