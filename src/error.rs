//! Error types for identity-mapping

use diesel::result::{DatabaseErrorKind, Error as DieselError};
use thiserror::Error;

use crate::mapping::MappingSnapshot;

#[derive(Error, Debug)]
pub enum MappingError {
    /// A different record already occupies the slot the incoming mapping wants.
    #[error("Duplicate mapping: {incoming} collides with existing {existing}")]
    DuplicateMapping {
        incoming: Box<MappingSnapshot>,
        existing: Box<MappingSnapshot>,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    /// Raw storage uniqueness failure that conflict resolution could not explain.
    #[error("Unique constraint violation: {0}")]
    UniqueViolation(String),

    #[error("Database error: {0}")]
    Database(DieselError),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl MappingError {
    pub fn duplicate(incoming: MappingSnapshot, existing: MappingSnapshot) -> Self {
        Self::DuplicateMapping {
            incoming: Box::new(incoming),
            existing: Box::new(existing),
        }
    }

    pub fn not_found(key: impl Into<String>) -> Self {
        Self::NotFound(key.into())
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation(reason.into())
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::DuplicateMapping { .. })
    }

    /// Status code the transport layer should answer with.
    ///
    /// Successful creates pick 201 or 200 from `CreateOutcome` instead.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::DuplicateMapping { .. } => 409,
            Self::NotFound(_) => 404,
            Self::Validation(_) => 400,
            Self::Connection(_) => 503,
            _ => 500,
        }
    }
}

impl From<DieselError> for MappingError {
    fn from(error: DieselError) -> Self {
        match error {
            DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                Self::UniqueViolation(info.message().to_string())
            }
            DieselError::NotFound => Self::NotFound("row".into()),
            other => Self::Database(other),
        }
    }
}
