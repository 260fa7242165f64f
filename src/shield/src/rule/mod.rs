//! Rules and rule combinators
//!
//! A [`Rule`] is a closed set of variants: constants, atomic predicates,
//! input validation rules, and the `and` / `or` / `not` combinators over
//! other rules. Combinators are plain constructors, so a rule tree is data
//! that can be inspected, named and memoized.
//!
//! # Identity
//!
//! Every rule has a [`RuleId`]. Atomic and input rules are named by their
//! author; composite identities are derived from the operator and the
//! children (`and(isAuthenticated,isAdmin)`), so structurally identical
//! compositions share cache entries.
//!
//! # Example
//!
//! ```rust
//! use cretoai_shield::{and, not, or, rule, CacheMode};
//!
//! let is_authenticated = rule("isAuthenticated")
//!     .cache(CacheMode::Contextual)
//!     .check(|input| async move { Ok(input.context.header("user-id").is_some()) });
//!
//! let is_admin = rule("isAdmin")
//!     .cache(CacheMode::Contextual)
//!     .check(|input| async move { Ok(input.context.header("x-role") == Some("ADMIN")) });
//!
//! let guard = and([is_authenticated.clone(), or([is_admin, not(is_authenticated)])]);
//! assert_eq!(
//!     guard.id().as_str(),
//!     "and(isAuthenticated,or(isAdmin,not(isAuthenticated)))"
//! );
//! ```

pub mod atomic;
mod logic;

pub use atomic::{rule, AtomicRule, FnPredicate, Predicate, RuleBuilder};

use crate::cache::RequestCache;
use crate::context::FieldInput;
use crate::error::{Result, ShieldError};
use crate::input::InputRule;
use crate::types::{DenyReason, RuleOutcome};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Stable rule identity used for memoization and diagnostics
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RuleId(Arc<str>);

impl RuleId {
    pub fn new(id: impl AsRef<str>) -> Self {
        Self(Arc::from(id.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a rule's outcome is memoized within a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheMode {
    /// Keyed by rule, parent value and arguments
    #[default]
    Strict,

    /// Keyed by rule only; the outcome depends on the request context alone
    Contextual,

    /// Evaluated every time
    NoCache,
}

/// Authorization rule
#[derive(Clone)]
pub enum Rule {
    /// Always allows (`true`) or always denies (`false`)
    Constant(bool),

    /// Named asynchronous predicate
    Atomic(Arc<AtomicRule>),

    /// Declarative argument validation
    Input(Arc<InputRule>),

    /// All children must allow; stops at the first Deny or Error
    And(Arc<Composite>),

    /// Any child may allow; stops at the first Allow
    Or(Arc<Composite>),

    /// Inverts Allow and Deny; Error passes through
    Not(Arc<Negation>),
}

/// Ordered children of an `and` / `or` rule
pub struct Composite {
    id: RuleId,
    mode: CacheMode,
    children: Vec<Rule>,
}

impl Composite {
    pub fn children(&self) -> &[Rule] {
        &self.children
    }
}

/// Child of a `not` rule
pub struct Negation {
    id: RuleId,
    inner: Rule,
}

impl Negation {
    pub fn inner(&self) -> &Rule {
        &self.inner
    }
}

/// Rule that always allows
pub fn allow() -> Rule {
    Rule::Constant(true)
}

/// Rule that always denies
pub fn deny() -> Rule {
    Rule::Constant(false)
}

/// All rules must allow. Evaluated left to right, stopping at the first Deny
/// or Error, which becomes the result. An empty `and` allows.
pub fn and(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::And(Arc::new(Composite::new("and", rules.into_iter().collect())))
}

/// At least one rule must allow. Evaluated left to right, stopping at the
/// first Allow. When nothing allows the result is Deny, even if some
/// children errored. An empty `or` denies.
pub fn or(rules: impl IntoIterator<Item = Rule>) -> Rule {
    Rule::Or(Arc::new(Composite::new("or", rules.into_iter().collect())))
}

/// Invert a rule. Errors are not inverted.
///
/// A Deny inverted to Allow and back carries a generic forbidden reason, so
/// `not(not(rule))` collapses to `rule` and keeps its own deny reason.
pub fn not(rule: Rule) -> Rule {
    if let Rule::Not(negation) = &rule {
        return negation.inner.clone();
    }

    let id = RuleId::new(format!("not({})", rule.id()));
    Rule::Not(Arc::new(Negation { id, inner: rule }))
}

/// Sequence independent checks; identical to [`and`]
pub fn chain(rules: impl IntoIterator<Item = Rule>) -> Rule {
    and(rules)
}

impl Composite {
    fn new(operator: &str, children: Vec<Rule>) -> Self {
        let ids = children
            .iter()
            .map(|child| child.id().to_string())
            .collect::<Vec<_>>()
            .join(",");

        Self {
            id: RuleId::new(format!("{}({})", operator, ids)),
            mode: combined_mode(&children),
            children,
        }
    }
}

/// A composite is only as cacheable as its least cacheable child; constants
/// do not count
fn combined_mode(children: &[Rule]) -> CacheMode {
    let modes = children
        .iter()
        .filter(|child| !matches!(child, Rule::Constant(_)))
        .map(Rule::cache_mode);
    let mut combined = CacheMode::Contextual;

    for mode in modes {
        match mode {
            CacheMode::NoCache => return CacheMode::NoCache,
            CacheMode::Strict => combined = CacheMode::Strict,
            CacheMode::Contextual => {}
        }
    }

    combined
}

const ALLOW_ID: &str = "allow";
const DENY_ID: &str = "deny";

/// Check that an author-chosen name cannot collide with a derived id
///
/// Derived ids use `(`, `)` and `,` and the constants own `allow` / `deny`,
/// so names containing those characters or equal to those words are
/// rejected.
pub fn validate_rule_name(id: &RuleId) -> Result<()> {
    let name = id.as_str();
    let reserved = name.is_empty()
        || name == ALLOW_ID
        || name == DENY_ID
        || name.contains(|c| matches!(c, '(' | ')' | ','));

    if reserved {
        Err(ShieldError::InvalidRuleName(name.to_string()))
    } else {
        Ok(())
    }
}

impl Rule {
    /// Stable identity of this rule
    pub fn id(&self) -> RuleId {
        match self {
            Rule::Constant(true) => RuleId::new(ALLOW_ID),
            Rule::Constant(false) => RuleId::new(DENY_ID),
            Rule::Atomic(rule) => rule.id().clone(),
            Rule::Input(rule) => rule.id().clone(),
            Rule::And(composite) | Rule::Or(composite) => composite.id.clone(),
            Rule::Not(negation) => negation.id.clone(),
        }
    }

    /// How this rule's outcome is memoized
    pub fn cache_mode(&self) -> CacheMode {
        match self {
            Rule::Constant(_) => CacheMode::NoCache,
            Rule::Atomic(rule) => rule.cache_mode(),
            Rule::Input(rule) => rule.cache_mode(),
            Rule::And(composite) | Rule::Or(composite) => composite.mode,
            Rule::Not(negation) => negation.inner.cache_mode(),
        }
    }

    /// Visit every named (atomic or input) rule in this tree
    ///
    /// The second argument identifies the underlying allocation, so two
    /// distinct rules sharing a name can be told apart.
    pub fn visit_named(&self, visit: &mut dyn FnMut(&RuleId, usize)) {
        match self {
            Rule::Constant(_) => {}
            Rule::Atomic(rule) => visit(rule.id(), Arc::as_ptr(rule) as *const () as usize),
            Rule::Input(rule) => visit(rule.id(), Arc::as_ptr(rule) as *const () as usize),
            Rule::And(composite) | Rule::Or(composite) => {
                for child in &composite.children {
                    child.visit_named(visit);
                }
            }
            Rule::Not(negation) => negation.inner.visit_named(visit),
        }
    }

    /// Evaluate the rule, consulting the request cache
    ///
    /// Never fails: predicate errors and panics surface as
    /// [`RuleOutcome::Error`].
    pub fn evaluate<'a>(&'a self, input: &'a FieldInput) -> BoxFuture<'a, RuleOutcome> {
        async move {
            let mode = self.cache_mode();
            if mode == CacheMode::NoCache || !input.context.caching_enabled() {
                return self.evaluate_uncached(input).await;
            }

            let id = self.id();
            let key = RequestCache::compute_key(&id, mode, &input.parent, &input.arguments);
            let (outcome, lookup) = input
                .context
                .cache()
                .get_or_compute(key, input.context.cancellation(), || {
                    self.evaluate_uncached(input)
                })
                .await;

            debug!("Rule '{}' on {}: {:?} ({:?})", id, input.field.locator, outcome.kind(), lookup);
            input.context.record_lookup(lookup);
            outcome
        }
        .boxed()
    }

    fn evaluate_uncached<'a>(&'a self, input: &'a FieldInput) -> BoxFuture<'a, RuleOutcome> {
        match self {
            Rule::Constant(true) => futures::future::ready(RuleOutcome::Allow).boxed(),
            Rule::Constant(false) => {
                futures::future::ready(RuleOutcome::Deny(DenyReason::forbidden())).boxed()
            }
            Rule::Atomic(rule) => rule.evaluate(input).boxed(),
            Rule::Input(rule) => rule.evaluate(input).boxed(),
            Rule::And(composite) => logic::all(&composite.children, input).boxed(),
            Rule::Or(composite) => logic::any(&composite.children, input).boxed(),
            Rule::Not(negation) => {
                async move { negation.inner.evaluate(input).await.invert() }.boxed()
            }
        }
    }
}

impl fmt::Debug for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Rule").field(&self.id().as_str()).finish()
    }
}

impl From<AtomicRule> for Rule {
    fn from(rule: AtomicRule) -> Self {
        Rule::Atomic(Arc::new(rule))
    }
}

impl From<InputRule> for Rule {
    fn from(rule: InputRule) -> Self {
        Rule::Input(Arc::new(rule))
    }
}
