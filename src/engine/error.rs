use std::time::Duration;

use ulid::Ulid;

#[derive(Debug)]
pub enum EngineError {
    /// Caller-fixable input or state-gate failure, scoped to a request field.
    Validation {
        field: &'static str,
        message: String,
    },
    /// An active reservation already covers part of the requested stay.
    Conflict(Ulid),
    LockWaitTimeout {
        office_id: Ulid,
        waited: Duration,
    },
    Persistence(String),
    NotFound(Ulid),
    HasActiveReservations(Ulid),
    Storage {
        path: String,
        message: String,
    },
    LimitExceeded(&'static str),
}

impl EngineError {
    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        EngineError::Validation {
            field,
            message: message.into(),
        }
    }

    /// The request field an error is reported against, if any.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            EngineError::Validation { field, .. } => Some(*field),
            EngineError::Conflict(_) => Some("office_id"),
            _ => None,
        }
    }

    /// Whether resubmitting the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::LockWaitTimeout { .. })
    }

    /// Short label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation",
            EngineError::Conflict(_) => "conflict",
            EngineError::LockWaitTimeout { .. } => "lock_timeout",
            EngineError::Persistence(_) => "persistence",
            EngineError::NotFound(_) => "not_found",
            EngineError::HasActiveReservations(_) => "has_active_reservations",
            EngineError::Storage { .. } => "storage",
            EngineError::LimitExceeded(_) => "limit_exceeded",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation { field, message } => write!(f, "{field}: {message}"),
            EngineError::Conflict(id) => {
                write!(f, "You cannot make a reservation during this time (conflicts with {id})")
            }
            EngineError::LockWaitTimeout { office_id, waited } => write!(
                f,
                "office {office_id} is busy: lock not acquired within {}ms",
                waited.as_millis()
            ),
            EngineError::Persistence(e) => write!(f, "persistence error: {e}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::HasActiveReservations(id) => {
                write!(f, "cannot delete office {id}: it has active reservations")
            }
            EngineError::Storage { path, message } => {
                write!(f, "failed to release stored file {path}: {message}")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
        }
    }
}

impl std::error::Error for EngineError {}
