use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// SQLSTATE reported by Postgres for a unique-constraint violation.
pub const UNIQUE_VIOLATION: &str = "23505";

#[derive(Error, Debug)]
pub enum OrmError {
    #[error("{0}")]
    Validation(ValidationError),

    #[error("Conflict: {message}")]
    Conflict {
        constraint: Option<String>,
        message: String,
    },

    #[error("Entity '{0}' is not registered")]
    UnknownEntity(String),

    #[error("Field '{field}' not found on entity '{entity}'")]
    UnknownField { entity: String, field: String },

    #[error("Invalid relation '{entity}.{field}': {reason}")]
    InvalidRelation {
        entity: String,
        field: String,
        reason: String,
    },

    #[error("Invalid hook name '{0}'")]
    InvalidHook(String),

    #[error("Usage error: {0}")]
    Usage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] DriverError),
}

pub type Result<T> = std::result::Result<T, OrmError>;

impl OrmError {
    pub fn usage(message: impl Into<String>) -> Self {
        Self::Usage(message.into())
    }

    pub fn relation(entity: &str, field: &str, reason: impl Into<String>) -> Self {
        Self::InvalidRelation {
            entity: entity.to_string(),
            field: field.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Turns a unique violation reported by the driver into [`OrmError::Conflict`].
    pub fn into_conflict(self) -> Self {
        match self {
            Self::Database(err) if err.is_unique_violation() => Self::Conflict {
                constraint: err.constraint,
                message: err.message,
            },
            other => other,
        }
    }
}

/// Error surfaced by a [`crate::driver::Driver`].
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct DriverError {
    /// SQLSTATE code when the server reported one.
    pub code: Option<String>,
    pub constraint: Option<String>,
    pub message: String,
}

impl DriverError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            code: None,
            constraint: None,
            message: message.into(),
        }
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraint = Some(constraint.into());
        self
    }

    pub fn is_unique_violation(&self) -> bool {
        self.code.as_deref() == Some(UNIQUE_VIOLATION)
    }
}

/// One failed field check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationDetail {
    pub field: String,
    pub value: Option<serde_json::Value>,
    pub message: String,
}

/// Aggregate of every field failure found while validating a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationError {
    pub message: String,
    pub details: Vec<ValidationDetail>,
}

impl ValidationError {
    pub fn new(details: Vec<ValidationDetail>) -> Self {
        Self {
            message: "Validation Error".to_string(),
            details,
        }
    }

    pub fn has_field(&self, field: &str) -> bool {
        self.details.iter().any(|detail| detail.field == field)
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        for detail in &self.details {
            write!(f, "; {}", detail.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

impl From<ValidationError> for OrmError {
    fn from(err: ValidationError) -> Self {
        Self::Validation(err)
    }
}
