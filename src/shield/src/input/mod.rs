//! Input rules: declarative argument validation
//!
//! An input rule checks a field's arguments before its resolver runs. Every
//! violated constraint is collected and reported together; the rule allows
//! only when there are none.
//!
//! Input rules are memoized per request with [`CacheMode::Strict`], except
//! rules with a uniqueness constraint: those default to
//! [`CacheMode::NoCache`] so each evaluation sees current data, including
//! writes made earlier in the same request.
//!
//! # Example
//!
//! ```rust
//! use cretoai_shield::{input_rule, FieldSpec};
//!
//! # fn example() -> cretoai_shield::Result<()> {
//! let create_user = input_rule("isValidUserInput")
//!     .field("input.name", FieldSpec::string().required())
//!     .field("input.email", FieldSpec::string().required().email())
//!     .build()?;
//! # Ok(())
//! # }
//! ```

mod constraint;

pub use constraint::{ExistenceLookup, FieldSpec, ValueKind};

use crate::context::FieldInput;
use crate::error::{Result, RuleError, ShieldError};
use crate::rule::atomic::guarded;
use crate::rule::{validate_rule_name, CacheMode, Rule, RuleId};
use crate::types::{Arguments, DenyReason, RuleOutcome, Violation};
use constraint::CompiledField;
use serde_json::Value;

/// Validates arguments against per-path constraints
pub struct InputRule {
    id: RuleId,
    mode: CacheMode,
    fields: Vec<CompiledField>,
}

impl InputRule {
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.mode
    }

    /// Validate `arguments`, returning every violation found
    pub async fn validate(&self, arguments: &Arguments) -> std::result::Result<Vec<Violation>, RuleError> {
        let mut violations = Vec::new();

        for field in &self.fields {
            let value = lookup_path(arguments, &field.path);
            field.validate(value, &mut violations).await?;
        }

        Ok(violations)
    }

    pub(crate) async fn evaluate(&self, input: &FieldInput) -> RuleOutcome {
        match guarded(&self.id, input, self.validate(&input.arguments)).await {
            Ok(violations) if violations.is_empty() => RuleOutcome::Allow,
            Ok(violations) => RuleOutcome::Deny(DenyReason::Validation { violations }),
            Err(err) => RuleOutcome::Error(err),
        }
    }
}

/// Start defining an input rule
pub fn input_rule(name: impl AsRef<str>) -> InputRuleBuilder {
    InputRuleBuilder {
        id: RuleId::new(name),
        mode: None,
        fields: Vec::new(),
    }
}

/// Builder returned by [`input_rule`]
pub struct InputRuleBuilder {
    id: RuleId,
    mode: Option<CacheMode>,
    fields: Vec<(String, FieldSpec)>,
}

impl InputRuleBuilder {
    /// Constrain the argument at a dotted path (e.g. `input.email`)
    pub fn field(mut self, path: impl Into<String>, spec: FieldSpec) -> Self {
        self.fields.push((path.into(), spec));
        self
    }

    /// Override the cache mode
    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Compile patterns and freeze the rule
    pub fn build(self) -> Result<Rule> {
        validate_rule_name(&self.id)?;

        let mut fields = Vec::with_capacity(self.fields.len());

        for (path, spec) in self.fields {
            if path.is_empty() || path.split('.').any(str::is_empty) {
                return Err(ShieldError::InvalidInputRule(format!(
                    "invalid argument path '{}' in rule '{}'",
                    path, self.id
                )));
            }
            fields.push(spec.compile(&path)?);
        }

        let mode = self.mode.unwrap_or_else(|| {
            if fields.iter().any(CompiledField::reads_live_data) {
                CacheMode::NoCache
            } else {
                CacheMode::Strict
            }
        });

        Ok(Rule::from(InputRule {
            id: self.id,
            mode,
            fields,
        }))
    }
}

/// Walk a dotted path through nested argument objects
fn lookup_path<'a>(arguments: &'a Arguments, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = arguments.get(segments.next()?)?;

    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }

    Some(current)
}
