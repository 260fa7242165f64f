//! Error types for the authorization shield

use crate::types::FieldLocator;
use thiserror::Error;

/// Shield construction and internal errors
///
/// Configuration variants are only ever produced while building a
/// [`PermissionMap`](crate::PermissionMap) or a rule, or while loading a
/// [`ShieldConfig`](crate::ShieldConfig); never at request time.
#[derive(Debug, Error)]
pub enum ShieldError {
    /// Two rules bound to the same field
    #[error("Duplicate binding for field {0}")]
    DuplicateBinding(FieldLocator),

    /// Two fallback rules bound to the same type
    #[error("Duplicate fallback rule for type {0}")]
    DuplicateTypeFallback(String),

    /// More than one global fallback rule
    #[error("Duplicate global fallback rule")]
    DuplicateDefault,

    /// Binding references a type the schema does not define
    #[error("Unknown type: {0}")]
    UnknownType(String),

    /// Binding references a field the schema does not define
    #[error("Unknown field: {0}")]
    UnknownField(FieldLocator),

    /// Distinct rules share a name and would alias in the request cache
    #[error("Rule name '{0}' is used by more than one rule")]
    ConflictingRuleName(String),

    /// Rule name is empty, reserved, or could collide with a composite id
    #[error("Invalid rule name '{0}'")]
    InvalidRuleName(String),

    /// Invalid input rule definition
    #[error("Invalid input rule: {0}")]
    InvalidInputRule(String),

    /// Shield configuration could not be loaded
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type for shield operations
pub type Result<T> = std::result::Result<T, ShieldError>;

/// Fault raised while evaluating a rule
///
/// Faults are distinct from denials: the rule could not reach a decision.
/// The shield treats them as a denial for the response and reports them to
/// the audit sink.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RuleError {
    /// Predicate returned an error
    #[error("Rule failed: {0}")]
    Failed(String),

    /// Predicate panicked
    #[error("Rule panicked: {0}")]
    Panicked(String),

    /// Data lookup collaborator failed
    #[error("Lookup failed: {0}")]
    Lookup(String),

    /// Evaluation exceeded the configured rule timeout
    #[error("Rule timed out after {0} ms")]
    Timeout(u64),

    /// Owning request was cancelled before the rule finished
    #[error("Request cancelled")]
    Cancelled,
}

impl RuleError {
    /// Create a generic rule failure
    pub fn failed(message: impl Into<String>) -> Self {
        RuleError::Failed(message.into())
    }

    /// Create a lookup failure
    pub fn lookup(message: impl Into<String>) -> Self {
        RuleError::Lookup(message.into())
    }
}

impl From<anyhow::Error> for RuleError {
    fn from(err: anyhow::Error) -> Self {
        RuleError::Failed(format!("{:#}", err))
    }
}
