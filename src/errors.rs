//! Typed error hierarchy for packflow.
//!
//! Two enums cover the two seams:
//! - `StoreError`: the remote document store (transport, status, decoding)
//! - `OmsError`: order operations as seen by the API and CLI

use packflow_common::LifecycleError;
use thiserror::Error;

/// Errors from a `DocumentStore` backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document store request failed: {0}")]
    Request(#[source] reqwest::Error),

    #[error("Document store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Failed to decode document store response: {0}")]
    Decode(String),

    #[error("Invalid store path '{0}'")]
    InvalidPath(String),
}

/// Errors from order operations.
#[derive(Debug, Error)]
pub enum OmsError {
    #[error("Order {key} not found")]
    OrderNotFound { key: String },

    #[error("Order {order_id} has no {label} uploaded")]
    FileMissing { order_id: String, label: String },

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error("Role '{role}' may not {action}")]
    Forbidden { role: String, action: String },

    #[error("Upload of {size} bytes exceeds the {limit} byte limit")]
    PayloadTooLarge { size: usize, limit: usize },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type OmsResult<T> = Result<T, OmsError>;

#[cfg(test)]
mod tests {
    use super::*;
    use packflow_common::Stage;

    #[test]
    fn order_not_found_carries_key() {
        let err = OmsError::OrderNotFound {
            key: "-Mabc".into(),
        };
        match &err {
            OmsError::OrderNotFound { key } => assert_eq!(key, "-Mabc"),
            _ => panic!("Expected OrderNotFound"),
        }
        assert!(err.to_string().contains("-Mabc"));
    }

    #[test]
    fn lifecycle_error_converts_and_keeps_message() {
        let inner = LifecycleError::TimerNotStarted {
            stage: Stage::Packing,
        };
        let err: OmsError = inner.into();
        assert!(matches!(
            err,
            OmsError::Lifecycle(LifecycleError::TimerNotStarted { .. })
        ));
        assert_eq!(err.to_string(), "Packing timer has not been started");
    }

    #[test]
    fn store_status_error_is_wrapped() {
        let err: OmsError = StoreError::Status {
            status: 401,
            body: "Permission denied".into(),
        }
        .into();
        match &err {
            OmsError::Store(StoreError::Status { status, .. }) => assert_eq!(*status, 401),
            _ => panic!("Expected Store(Status)"),
        }
    }

    #[test]
    fn forbidden_names_role_and_action() {
        let err = OmsError::Forbidden {
            role: "printing".into(),
            action: "delete orders".into(),
        };
        assert_eq!(err.to_string(), "Role 'printing' may not delete orders");
    }

    #[test]
    fn all_error_types_implement_std_error_trait() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&StoreError::InvalidPath("a/../b".into()));
        assert_std_error(&OmsError::Unauthorized);
    }
}
