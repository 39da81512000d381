//! Error taxonomy for the store, with stable codes and retry classification.

use std::time::Duration;

use crate::filter::FilterOperator;

pub type Result<T, E = StoreError> = std::result::Result<T, E>;

/// Input problems the caller can fix. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("unknown filter field: {field}")]
    UnknownField { field: String },

    #[error("field {field} is not filterable")]
    NotFilterable { field: String },

    #[error("field {field} is not sortable")]
    NotSortable { field: String },

    #[error("operator {operator} is not valid for {kind} data on field {field}")]
    OperatorNotSupported {
        field: String,
        operator: FilterOperator,
        kind: &'static str,
    },

    #[error("field {field} holds {expected} data but the filter declared {declared} data")]
    KindMismatch {
        field: String,
        expected: &'static str,
        declared: &'static str,
    },

    #[error("invalid value {value:?} for field {field}: expected an integer")]
    InvalidNumber { field: String, value: String },

    #[error("malformed filter for {field}: {reason}")]
    MalformedFilter { field: String, reason: String },

    #[error("unknown filter operator: {0}")]
    UnknownOperator(String),

    #[error("{0} must not be empty")]
    Empty(&'static str),

    #[error("{name} must not be negative (got {value})")]
    Negative { name: &'static str, value: i64 },
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),
}

impl StoreError {
    pub(crate) fn not_found(entity: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            entity,
            id: id.to_string(),
        }
    }

    /// Maps a unique-constraint violation to [`StoreError::Conflict`], anything
    /// else to [`StoreError::Storage`].
    pub(crate) fn from_write(err: sqlx::Error, conflict: impl FnOnce() -> String) -> Self {
        match &err {
            sqlx::Error::Database(db) if db.is_unique_violation() => Self::Conflict(conflict()),
            _ => Self::Storage(err),
        }
    }

    pub fn error_code(&self) -> &str {
        match self {
            Self::Validation(_) => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict(_) => "conflict",
            Self::Timeout(_) => "timeout",
            Self::Storage(_) => "storage",
        }
    }

    /// Storage-class failures may succeed on a later attempt; everything else
    /// needs different input.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::Timeout(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }
}
