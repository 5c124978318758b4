//! Entity use-case services.
//!
//! # Responsibility
//! - Orchestrate bootstrap, seeding and table calls into per-entity CRUD
//!   and list entry points.
//! - Turn every failure into a uniform failed envelope.
//!
//! # Invariants
//! - Service operations never return raw errors; callers always get a
//!   `Response`.
//! - Validation failures never reach the store.
//!
//! # See also
//! - `db::bootstrap` for the connect pipeline run before each operation.

use crate::db::ConnectError;
use crate::model::envelope::{ErrorKind, Response};
use crate::model::validation::ValidationErrors;
use crate::store::StoreError;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod entity_service;
mod seed;

pub use entity_service::{DeleteRequest, EntityService, ListParams, ReadRequest};

/// Entity operation name used in messages and logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Read,
    Update,
    Delete,
    List,
    Seed,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Read => "Read",
            Self::Update => "Update",
            Self::Delete => "Delete",
            Self::List => "List",
            Self::Seed => "Seed",
        }
    }

    /// Lowercase form for log event names.
    pub fn event(self) -> &'static str {
        match self {
            Self::Create => "entity_create",
            Self::Read => "entity_read",
            Self::Update => "entity_update",
            Self::Delete => "entity_delete",
            Self::List => "entity_list",
            Self::Seed => "entity_seed",
        }
    }
}

impl Display for Operation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

#[derive(Debug)]
pub enum ServiceError {
    Connection(ConnectError),
    Bootstrap(ConnectError),
    Validation(ValidationErrors),
    /// A table call failed after the binding was ready.
    Query {
        operation: Operation,
        source: StoreError,
    },
    NotFound {
        entity: &'static str,
        target: String,
    },
}

impl ServiceError {
    pub fn query(operation: Operation) -> impl FnOnce(StoreError) -> ServiceError {
        move |source| ServiceError::Query { operation, source }
    }

    /// Timeouts surface as connection failures regardless of phase.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Connection(_) => ErrorKind::Connection,
            Self::Bootstrap(_) => ErrorKind::Bootstrap,
            Self::Validation(_) => ErrorKind::Validation,
            Self::Query { source, .. } if source.is_timeout() => ErrorKind::Connection,
            Self::Query { .. } => ErrorKind::Query,
            Self::NotFound { .. } => ErrorKind::NotFound,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Connection(err) | Self::Bootstrap(err) => err.is_retryable(),
            Self::Query { source, .. } => source.is_timeout(),
            Self::Validation(_) | Self::NotFound { .. } => false,
        }
    }

    pub fn into_response<T>(self) -> Response<T> {
        Response::failure(self.kind(), self.to_string(), self.is_retryable())
    }
}

impl Display for ServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(err) => write!(
                f,
                "DB Connection Failure ({}): {}",
                err.phase(),
                err.store_error()
            ),
            Self::Bootstrap(err) => write!(
                f,
                "DB Bootstrap Failure ({}): {}",
                err.phase(),
                err.store_error()
            ),
            Self::Validation(errors) => write!(f, "Validation Failure: {errors}"),
            Self::Query { operation, source } if source.is_timeout() => {
                write!(f, "DB Connection Failure ({operation}): {source}")
            }
            Self::Query { operation, source } => write!(f, "DB {operation} Failure: {source}"),
            Self::NotFound { entity, target } => write!(f, "{entity} not found: {target}"),
        }
    }
}

impl Error for ServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Connection(err) | Self::Bootstrap(err) => Some(err),
            Self::Validation(errors) => Some(errors),
            Self::Query { source, .. } => Some(source),
            Self::NotFound { .. } => None,
        }
    }
}

impl From<ConnectError> for ServiceError {
    fn from(value: ConnectError) -> Self {
        match value {
            ConnectError::Connection { .. } => Self::Connection(value),
            ConnectError::Bootstrap { .. } => Self::Bootstrap(value),
        }
    }
}

impl From<ValidationErrors> for ServiceError {
    fn from(value: ValidationErrors) -> Self {
        Self::Validation(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::BootstrapPhase;
    use std::time::Duration;

    #[test]
    fn query_timeout_is_a_retryable_connection_failure() {
        let err = ServiceError::Query {
            operation: Operation::List,
            source: StoreError::Timeout {
                operation: "garage.find".to_string(),
                after: Duration::from_millis(20),
            },
        };
        assert_eq!(err.kind(), ErrorKind::Connection);
        assert!(err.is_retryable());

        let response = err.into_response::<()>();
        assert!(!response.success);
        assert!(response.retryable);
        assert!(response.message.starts_with("DB Connection Failure (List)"));
    }

    #[test]
    fn connect_errors_keep_their_category() {
        let err = ServiceError::from(ConnectError::Bootstrap {
            phase: BootstrapPhase::UdtLoad,
            source: StoreError::Injected("garage_rate".to_string()),
        });
        assert_eq!(err.kind(), ErrorKind::Bootstrap);
        assert!(err.to_string().contains("udtLoad"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn query_failure_names_operation() {
        let err = ServiceError::query(Operation::Delete)(StoreError::Closed);
        assert_eq!(err.kind(), ErrorKind::Query);
        assert_eq!(err.to_string(), "DB Delete Failure: store client is closed");
    }
}
