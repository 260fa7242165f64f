//! Short-circuit evaluation of `and` / `or`

use super::Rule;
use crate::context::FieldInput;
use crate::types::{DenyReason, RuleOutcome};
use tracing::debug;

/// Left to right; the first non-Allow outcome wins
pub(super) async fn all(children: &[Rule], input: &FieldInput) -> RuleOutcome {
    for child in children {
        match child.evaluate(input).await {
            RuleOutcome::Allow => continue,
            outcome => return outcome,
        }
    }

    RuleOutcome::Allow
}

/// Left to right; the first Allow wins, otherwise Deny
pub(super) async fn any(children: &[Rule], input: &FieldInput) -> RuleOutcome {
    let mut denial = None;

    for child in children {
        match child.evaluate(input).await {
            RuleOutcome::Allow => return RuleOutcome::Allow,
            RuleOutcome::Deny(reason) => denial = Some(reason),
            // Already reported at the rule boundary
            RuleOutcome::Error(err) => debug!("Alternative '{}' faulted: {}", child.id(), err),
        }
    }

    RuleOutcome::Deny(denial.unwrap_or_else(DenyReason::forbidden))
}
