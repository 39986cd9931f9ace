//! crates/ride_platform_core/src/error.rs
//!
//! The error taxonomy returned by every service operation. Messages are safe
//! to show to end users; infrastructure causes are logged where they are
//! converted, never embedded.

use tracing::error;

use crate::ports::{PaymentError, PortError};

/// The language of failure shared by services and the HTTP surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidInput,
    Unauthenticated,
    Forbidden,
    NotFound,
    Conflict,
    InvalidState,
    PaymentFailed,
    StorageFailure,
    DependencyUnavailable,
    Internal,
}

impl ErrorKind {
    /// The stable code clients see in the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::PaymentFailed => "payment_failed",
            ErrorKind::StorageFailure => "storage_failure",
            ErrorKind::DependencyUnavailable => "dependency_unavailable",
            ErrorKind::Internal => "internal",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("authentication required")]
    Unauthenticated,
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    InvalidState(String),
    #[error("{0}")]
    PaymentFailed(String),
    #[error("{0}")]
    StorageFailure(String),
    #[error("{0}")]
    DependencyUnavailable(String),
    #[error("{0}")]
    Internal(String),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::InvalidInput(_) => ErrorKind::InvalidInput,
            ServiceError::Unauthenticated => ErrorKind::Unauthenticated,
            ServiceError::Forbidden(_) => ErrorKind::Forbidden,
            ServiceError::NotFound(_) => ErrorKind::NotFound,
            ServiceError::Conflict(_) => ErrorKind::Conflict,
            ServiceError::InvalidState(_) => ErrorKind::InvalidState,
            ServiceError::PaymentFailed(_) => ErrorKind::PaymentFailed,
            ServiceError::StorageFailure(_) => ErrorKind::StorageFailure,
            ServiceError::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        ServiceError::InvalidInput(message.into())
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        ServiceError::InvalidState(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    /// Re-expresses a storage port failure as `message`; the cause goes to the log.
    pub fn storage(context: &str, message: &str, cause: PortError) -> Self {
        error!(error = %cause, "{}", context);
        ServiceError::StorageFailure(message.to_string())
    }
}

/// Infrastructure failures become taxonomy kinds at the service boundary.
/// `NotFound` and `Conflict` messages come from our own adapters and carry no
/// internals beyond what the caller already sent.
impl From<PortError> for ServiceError {
    fn from(err: PortError) -> Self {
        match err {
            PortError::NotFound(_) => ServiceError::NotFound("resource not found".to_string()),
            PortError::Conflict(_) => ServiceError::Conflict(
                "the resource was modified concurrently, please retry".to_string(),
            ),
            PortError::Unauthorized => ServiceError::Unauthenticated,
            PortError::Unavailable(cause) => {
                error!(error = %cause, "Dependency unavailable");
                ServiceError::DependencyUnavailable(
                    "a required service is temporarily unavailable".to_string(),
                )
            }
            PortError::Unexpected(cause) => {
                error!(error = %cause, "Unexpected port failure");
                ServiceError::Internal("an internal error occurred".to_string())
            }
        }
    }
}

impl From<PaymentError> for ServiceError {
    fn from(err: PaymentError) -> Self {
        match err {
            PaymentError::Declined(_) => {
                ServiceError::PaymentFailed("the payment was declined".to_string())
            }
            PaymentError::Transient(cause) => {
                error!(error = %cause, "Payment processor failure");
                ServiceError::PaymentFailed("the payment could not be processed".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_errors_do_not_leak_causes() {
        let err: ServiceError = PortError::Unexpected("relation \"x\" does not exist".into()).into();
        assert_eq!(err.kind(), ErrorKind::Internal);
        assert!(!err.to_string().contains("relation"));

        let err: ServiceError = PortError::Unavailable("pool timed out".into()).into();
        assert_eq!(err.kind().code(), "dependency_unavailable");
    }

    #[test]
    fn storage_failures_carry_the_given_message() {
        let err = ServiceError::storage(
            "Failed to presign download",
            "a download link could not be created",
            PortError::Unavailable("bucket unreachable".into()),
        );
        assert_eq!(err.kind(), ErrorKind::StorageFailure);
        assert_eq!(err.to_string(), "a download link could not be created");
    }

    #[test]
    fn declined_payment_maps_to_payment_failed() {
        let err: ServiceError = PaymentError::Declined("insufficient funds".into()).into();
        assert_eq!(err.kind(), ErrorKind::PaymentFailed);
    }
}
