//! Error types for entity population, persistence and the CRUD service.
//!
//! Mapping errors ([`SchemaMismatchError`], [`PopulationError`]) mean the
//! entity schema and the submitting form have drifted apart; they are fatal
//! for the request. [`NotRemovableError`] and the [`ErrorList`]-carrying
//! variants of [`ServiceError`] are user-facing rejections.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::Id;

/// Submitted data or a lookup does not fit the entity schema.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("schema mismatch on {entity_type}::{attribute}: {reason}")]
pub struct SchemaMismatchError {
    pub entity_type: String,
    pub attribute: String,
    pub reason: String,
}

impl SchemaMismatchError {
    pub fn new(
        entity_type: impl Into<String>,
        attribute: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            entity_type: entity_type.into(),
            attribute: attribute.into(),
            reason: reason.into(),
        }
    }

    pub fn unknown_type(entity_type: impl Into<String>) -> Self {
        Self::new(entity_type, "*", "entity type is not registered")
    }
}

/// An attribute rejected the value derived for it.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid value {value:?} for {entity_type}::{attribute}: {reason}")]
pub struct PopulationError {
    pub entity_type: String,
    pub attribute: String,
    pub value: String,
    pub reason: String,
}

/// Removal was attempted on an entity carrying the protected status.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{entity_type} #{id} is not removable")]
pub struct NotRemovableError {
    pub entity_type: String,
    pub id: Id,
}

/// Failures surfaced by the repository, mostly at commit time.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("unique constraint violated on {entity_type}.{attribute}")]
    UniqueViolation {
        entity_type: String,
        attribute: String,
    },

    #[error("{entity_type}.{attribute} must not be null")]
    NotNullViolation {
        entity_type: String,
        attribute: String,
    },

    #[error("entity type {0} is unknown to the repository")]
    UnknownEntity(String),

    #[error("{entity_type} #{id} does not exist")]
    MissingRow { entity_type: String, id: Id },

    #[error("{0} was not assigned an identifier by the commit")]
    NotPersisted(String),
}

/// Everything the population engine can fail with.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PopulateError {
    #[error(transparent)]
    SchemaMismatch(#[from] SchemaMismatchError),

    #[error(transparent)]
    Population(#[from] PopulationError),

    #[error(transparent)]
    NotRemovable(#[from] NotRemovableError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PopulateError {
    /// Mapping errors are programmer errors, never shown raw to end users.
    pub fn is_mapping_error(&self) -> bool {
        matches!(
            self,
            PopulateError::SchemaMismatch(_) | PopulateError::Population(_)
        )
    }
}

pub type PopulateResult<T> = Result<T, PopulateError>;

/// A single user-facing message accumulated by the service hooks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorItem {
    /// Category, e.g. "validation" or "verification".
    pub kind: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ErrorList(pub Vec<ErrorItem>);

impl ErrorList {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn add(&mut self, kind: impl Into<String>, message: impl Into<String>) {
        self.0.push(ErrorItem {
            kind: kind.into(),
            message: message.into(),
        });
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Messages joined with `|`, the format every rejection carries.
    pub fn joined(&self) -> String {
        self.0
            .iter()
            .map(|e| e.message.as_str())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl std::fmt::Display for ErrorList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.joined())
    }
}

/// Outcome of a failed CRUD service operation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ServiceError {
    #[error("entity type {0} is not registered")]
    UnknownType(String),

    #[error("{entity_type} #{id} not found")]
    NotFound { entity_type: String, id: Id },

    #[error("mapping error: {0}")]
    Mapping(PopulateError),

    #[error(transparent)]
    NotRemovable(#[from] NotRemovableError),

    #[error("{0}")]
    Unique(ErrorList),

    #[error("{0}")]
    Validation(ErrorList),

    #[error("{0}")]
    Verification(ErrorList),

    #[error("{0}")]
    Upload(ErrorList),

    #[error("{0}")]
    Entity(ErrorList),

    #[error("operation not permitted on {entity_type}")]
    Forbidden { entity_type: String },
}

impl ServiceError {
    /// The user-facing error list, if this is a business rejection.
    pub fn errors(&self) -> Option<&ErrorList> {
        match self {
            ServiceError::Unique(e)
            | ServiceError::Validation(e)
            | ServiceError::Verification(e)
            | ServiceError::Upload(e)
            | ServiceError::Entity(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PopulateError> for ServiceError {
    fn from(err: PopulateError) -> Self {
        match err {
            PopulateError::NotRemovable(e) => ServiceError::NotRemovable(e),
            PopulateError::Store(e) => {
                let mut errors = ErrorList::new();
                errors.add("entity", e.to_string());
                ServiceError::Entity(errors)
            }
            other => ServiceError::Mapping(other),
        }
    }
}

impl From<StoreError> for ServiceError {
    fn from(err: StoreError) -> Self {
        PopulateError::Store(err).into()
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
