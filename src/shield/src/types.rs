//! Core shield types: field addressing, rule outcomes and field errors

use crate::error::RuleError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Field arguments as supplied by the query engine
pub type Arguments = serde_json::Map<String, Value>;

/// (parent type, field) pair used as the permission map key
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldLocator {
    /// Parent type name (e.g., "Query", "User")
    pub type_name: String,

    /// Field name on the parent type
    pub field_name: String,
}

impl FieldLocator {
    /// Create a new locator
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            field_name: field_name.into(),
        }
    }
}

impl fmt::Display for FieldLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.type_name, self.field_name)
    }
}

/// Metadata about the field being resolved
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Where the field lives in the schema
    pub locator: FieldLocator,

    /// Response path to this field (e.g., ["users", "0", "email"])
    pub path: Vec<String>,

    /// Declared return type, if the engine provides it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub return_type: Option<String>,
}

impl FieldInfo {
    /// Create field info for a top-level field; the path is the field name
    pub fn new(type_name: impl Into<String>, field_name: impl Into<String>) -> Self {
        let locator = FieldLocator::new(type_name, field_name);
        let path = vec![locator.field_name.clone()];

        Self {
            locator,
            path,
            return_type: None,
        }
    }

    /// Replace the response path
    pub fn with_path<I, S>(mut self, path: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.path = path.into_iter().map(Into::into).collect();
        self
    }

    /// Set the declared return type
    pub fn with_return_type(mut self, return_type: impl Into<String>) -> Self {
        self.return_type = Some(return_type.into());
        self
    }

    pub fn type_name(&self) -> &str {
        &self.locator.type_name
    }

    pub fn field_name(&self) -> &str {
        &self.locator.field_name
    }
}

/// A single violated input constraint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Argument path (e.g., "input.email")
    pub path: String,

    /// Human-readable message
    pub message: String,
}

impl Violation {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

/// Why a rule refused access
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DenyReason {
    /// Authorization decision; the message is optional and replaced by the
    /// configured fallback when absent
    Forbidden { message: Option<String> },

    /// Input validation found one or more violations
    Validation { violations: Vec<Violation> },
}

impl DenyReason {
    /// Forbidden without a specific message
    pub fn forbidden() -> Self {
        DenyReason::Forbidden { message: None }
    }

    /// Forbidden with a message
    pub fn forbidden_with(message: impl Into<String>) -> Self {
        DenyReason::Forbidden {
            message: Some(message.into()),
        }
    }
}

/// Result of evaluating a rule
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleOutcome {
    /// Access granted
    Allow,

    /// Access refused by a clean evaluation
    Deny(DenyReason),

    /// The rule could not reach a decision
    Error(RuleError),
}

/// Outcome discriminant without payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    Allow,
    Deny,
    Error,
}

impl RuleOutcome {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RuleOutcome::Allow)
    }

    pub fn is_denied(&self) -> bool {
        matches!(self, RuleOutcome::Deny(_))
    }

    pub fn is_error(&self) -> bool {
        matches!(self, RuleOutcome::Error(_))
    }

    pub fn kind(&self) -> OutcomeKind {
        match self {
            RuleOutcome::Allow => OutcomeKind::Allow,
            RuleOutcome::Deny(_) => OutcomeKind::Deny,
            RuleOutcome::Error(_) => OutcomeKind::Error,
        }
    }

    /// Swap Allow and Deny; an Error passes through unchanged
    ///
    /// The deny reason is dropped, so an inverted Allow carries a generic
    /// forbidden reason.
    pub fn invert(self) -> Self {
        match self {
            RuleOutcome::Allow => RuleOutcome::Deny(DenyReason::forbidden()),
            RuleOutcome::Deny(_) => RuleOutcome::Allow,
            RuleOutcome::Error(err) => RuleOutcome::Error(err),
        }
    }
}

/// Error code attached to a rejected field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Authorization denied (or rule fault)
    Forbidden,

    /// Input rule found constraint violations
    ValidationFailed,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::ValidationFailed => "VALIDATION_FAILED",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured per-field authorization error surfaced to the caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    /// Field name that was rejected
    pub field: String,

    /// Response path of the rejected field
    pub path: Vec<String>,

    /// Error code
    pub code: ErrorCode,

    /// Human-readable message
    pub message: String,

    /// Individual input violations (validation failures only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

impl FieldError {
    /// Forbidden error for a field
    pub fn forbidden(info: &FieldInfo, message: impl Into<String>) -> Self {
        Self {
            field: info.locator.field_name.clone(),
            path: info.path.clone(),
            code: ErrorCode::Forbidden,
            message: message.into(),
            violations: Vec::new(),
        }
    }

    /// Validation error for a field; the message lists every violation
    pub fn validation(info: &FieldInfo, violations: Vec<Violation>) -> Self {
        let message = violations
            .iter()
            .map(|v| v.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");

        Self {
            field: info.locator.field_name.clone(),
            path: info.path.clone(),
            code: ErrorCode::ValidationFailed,
            message,
            violations,
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on field '{}': {}", self.code, self.field, self.message)
    }
}
