//! Declarative argument constraints

use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

use crate::error::{RuleError, ShieldError};
use crate::types::Violation;

/// Shape of email addresses accepted by [`FieldSpec::email`]
const EMAIL_PATTERN: &str = r"^[^\s@]+@[^\s@]+\.[^\s@]+$";

/// Data-lookup collaborator used by uniqueness constraints
///
/// Called at evaluation time, so the answer reflects current data.
#[async_trait]
pub trait ExistenceLookup: Send + Sync {
    /// Whether `value` already exists for the argument at `path`
    async fn exists(&self, path: &str, value: &Value) -> Result<bool, RuleError>;
}

/// JSON value kinds for type constraints
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Array,
}

impl ValueKind {
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueKind::String => value.is_string(),
            ValueKind::Number => value.is_number(),
            ValueKind::Integer => value.is_i64() || value.is_u64(),
            ValueKind::Boolean => value.is_boolean(),
            ValueKind::Object => value.is_object(),
            ValueKind::Array => value.is_array(),
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::String => "string",
            ValueKind::Number => "number",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Object => "object",
            ValueKind::Array => "array",
        };
        f.write_str(name)
    }
}

type CustomCheck = Arc<dyn Fn(&Value) -> bool + Send + Sync>;

enum Constraint {
    Email,
    Pattern { source: String, message: Option<String> },
    MinLength(usize),
    MaxLength(usize),
    NotOneOf { values: Vec<Value>, message: Option<String> },
    Unique { lookup: Arc<dyn ExistenceLookup>, message: Option<String> },
    Custom { name: String, check: CustomCheck, message: Option<String> },
}

/// Constraints for one argument path
///
/// ```rust
/// use cretoai_shield::FieldSpec;
///
/// let email = FieldSpec::string().required().email().max_length(254);
/// ```
pub struct FieldSpec {
    kind: Option<ValueKind>,
    required: bool,
    constraints: Vec<Constraint>,
}

impl FieldSpec {
    /// Any value kind
    pub fn any() -> Self {
        Self {
            kind: None,
            required: false,
            constraints: Vec::new(),
        }
    }

    fn of(kind: ValueKind) -> Self {
        Self {
            kind: Some(kind),
            ..Self::any()
        }
    }

    pub fn string() -> Self {
        Self::of(ValueKind::String)
    }

    pub fn number() -> Self {
        Self::of(ValueKind::Number)
    }

    pub fn integer() -> Self {
        Self::of(ValueKind::Integer)
    }

    pub fn boolean() -> Self {
        Self::of(ValueKind::Boolean)
    }

    pub fn object() -> Self {
        Self::of(ValueKind::Object)
    }

    pub fn array() -> Self {
        Self::of(ValueKind::Array)
    }

    /// Absent, null and empty-string values are violations
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Must look like an email address
    pub fn email(mut self) -> Self {
        self.constraints.push(Constraint::Email);
        self
    }

    /// Must match a regular expression (compiled when the rule is built)
    pub fn matches(mut self, pattern: impl Into<String>, message: Option<String>) -> Self {
        self.constraints.push(Constraint::Pattern {
            source: pattern.into(),
            message,
        });
        self
    }

    /// Minimum length of a string (chars) or array (items)
    pub fn min_length(mut self, min: usize) -> Self {
        self.constraints.push(Constraint::MinLength(min));
        self
    }

    /// Maximum length of a string (chars) or array (items)
    pub fn max_length(mut self, max: usize) -> Self {
        self.constraints.push(Constraint::MaxLength(max));
        self
    }

    /// Must not equal any of the given values
    pub fn not_one_of(mut self, values: Vec<Value>, message: Option<String>) -> Self {
        self.constraints
            .push(Constraint::NotOneOf { values, message });
        self
    }

    /// Must not already exist according to `lookup`
    pub fn unique(mut self, lookup: Arc<dyn ExistenceLookup>, message: impl Into<String>) -> Self {
        self.constraints.push(Constraint::Unique {
            lookup,
            message: Some(message.into()),
        });
        self
    }

    /// Must satisfy a named predicate
    pub fn custom<F>(mut self, name: impl Into<String>, check: F, message: Option<String>) -> Self
    where
        F: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.constraints.push(Constraint::Custom {
            name: name.into(),
            check: Arc::new(check),
            message,
        });
        self
    }

    pub(super) fn compile(self, path: &str) -> Result<CompiledField, ShieldError> {
        let mut checks = Vec::with_capacity(self.constraints.len());

        for constraint in self.constraints {
            let check = match constraint {
                Constraint::Email => Check::Pattern {
                    regex: compile_regex(path, EMAIL_PATTERN)?,
                    message: format!("{} must be a valid email", path),
                },
                Constraint::Pattern { source, message } => Check::Pattern {
                    message: message
                        .unwrap_or_else(|| format!("{} must match the following: \"{}\"", path, source)),
                    regex: compile_regex(path, &source)?,
                },
                Constraint::MinLength(min) => Check::MinLength(min),
                Constraint::MaxLength(max) => Check::MaxLength(max),
                Constraint::NotOneOf { values, message } => Check::NotOneOf {
                    message: message
                        .unwrap_or_else(|| format!("{} must not be one of the following values", path)),
                    values,
                },
                Constraint::Unique { lookup, message } => Check::Unique {
                    lookup,
                    message: message.unwrap_or_else(|| format!("{} already exists", path)),
                },
                Constraint::Custom { name, check, message } => Check::Custom {
                    message: message
                        .unwrap_or_else(|| format!("{} failed the '{}' check", path, name)),
                    check,
                },
            };
            checks.push(check);
        }

        Ok(CompiledField {
            path: path.to_string(),
            kind: self.kind,
            required: self.required,
            checks,
        })
    }
}

fn compile_regex(path: &str, source: &str) -> Result<Regex, ShieldError> {
    Regex::new(source).map_err(|e| {
        ShieldError::InvalidInputRule(format!("invalid pattern for '{}': {}", path, e))
    })
}

enum Check {
    Pattern { regex: Regex, message: String },
    MinLength(usize),
    MaxLength(usize),
    NotOneOf { values: Vec<Value>, message: String },
    Unique { lookup: Arc<dyn ExistenceLookup>, message: String },
    Custom { check: CustomCheck, message: String },
}

/// Constraints for one path, ready to evaluate
pub(super) struct CompiledField {
    pub(super) path: String,
    kind: Option<ValueKind>,
    required: bool,
    checks: Vec<Check>,
}

impl CompiledField {
    /// Whether any check consults an [`ExistenceLookup`]
    pub(super) fn reads_live_data(&self) -> bool {
        self.checks.iter().any(|check| matches!(check, Check::Unique { .. }))
    }

    /// Append every violation for `value` to `violations`
    ///
    /// A missing value reports only `required`; a wrong kind suppresses the
    /// remaining checks, which assume the declared kind.
    pub(super) async fn validate(
        &self,
        value: Option<&Value>,
        violations: &mut Vec<Violation>,
    ) -> Result<(), RuleError> {
        let value = match value {
            Some(value) if !is_blank(value) => value,
            _ => {
                if self.required {
                    violations.push(Violation::new(
                        &self.path,
                        format!("{} is a required field", self.path),
                    ));
                }
                return Ok(());
            }
        };

        if let Some(kind) = self.kind {
            if !kind.matches(value) {
                violations.push(Violation::new(
                    &self.path,
                    format!("{} must be a `{}` type", self.path, kind),
                ));
                return Ok(());
            }
        }

        for check in &self.checks {
            match check {
                Check::Pattern { regex, message } => {
                    let matched = value.as_str().map(|s| regex.is_match(s)).unwrap_or(false);
                    if !matched {
                        violations.push(Violation::new(&self.path, message.clone()));
                    }
                }
                Check::MinLength(min) => {
                    if let Some(len) = length(value) {
                        if len < *min {
                            violations.push(Violation::new(
                                &self.path,
                                format!("{} must be at least {} characters", self.path, min),
                            ));
                        }
                    }
                }
                Check::MaxLength(max) => {
                    if let Some(len) = length(value) {
                        if len > *max {
                            violations.push(Violation::new(
                                &self.path,
                                format!("{} must be at most {} characters", self.path, max),
                            ));
                        }
                    }
                }
                Check::NotOneOf { values, message } => {
                    if values.contains(value) {
                        violations.push(Violation::new(&self.path, message.clone()));
                    }
                }
                Check::Unique { lookup, message } => {
                    if lookup.exists(&self.path, value).await? {
                        violations.push(Violation::new(&self.path, message.clone()));
                    }
                }
                Check::Custom { check, message } => {
                    if !check(value) {
                        violations.push(Violation::new(&self.path, message.clone()));
                    }
                }
            }
        }

        Ok(())
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}

fn length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}
