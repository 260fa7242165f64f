//! Atomic rules: named asynchronous predicates

use async_trait::async_trait;
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

use super::{CacheMode, Rule, RuleId};
use crate::context::FieldInput;
use crate::error::RuleError;
use crate::types::{DenyReason, RuleOutcome};

/// Predicate behind an atomic rule
///
/// Implementations may await external collaborators (user stores,
/// databases). They must be safe to call concurrently for distinct inputs.
#[async_trait]
pub trait Predicate: Send + Sync + 'static {
    /// `Ok(true)` allows, `Ok(false)` denies, `Err` is a rule fault
    async fn test(&self, input: &FieldInput) -> Result<bool, RuleError>;
}

/// Adapter turning an async closure into a [`Predicate`]
pub struct FnPredicate<F>(F);

#[async_trait]
impl<F, Fut> Predicate for FnPredicate<F>
where
    F: Fn(FieldInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<bool, RuleError>> + Send + 'static,
{
    async fn test(&self, input: &FieldInput) -> Result<bool, RuleError> {
        (self.0)(input.clone()).await
    }
}

/// Named predicate with a cache mode and an optional deny message
pub struct AtomicRule {
    id: RuleId,
    mode: CacheMode,
    message: Option<String>,
    predicate: Box<dyn Predicate>,
}

impl AtomicRule {
    pub fn id(&self) -> &RuleId {
        &self.id
    }

    pub fn cache_mode(&self) -> CacheMode {
        self.mode
    }

    /// Run the predicate behind the fault boundary
    pub(crate) async fn evaluate(&self, input: &FieldInput) -> RuleOutcome {
        match guarded(&self.id, input, self.predicate.test(input)).await {
            Ok(true) => RuleOutcome::Allow,
            Ok(false) => RuleOutcome::Deny(DenyReason::Forbidden {
                message: self.message.clone(),
            }),
            Err(err) => RuleOutcome::Error(err),
        }
    }
}

/// Start defining an atomic rule
///
/// The name must pass [`validate_rule_name`](super::validate_rule_name);
/// the permission map rejects it otherwise.
///
/// ```rust
/// use cretoai_shield::{rule, CacheMode};
///
/// let is_authenticated = rule("isAuthenticated")
///     .cache(CacheMode::Contextual)
///     .message("You must be signed in")
///     .check(|input| async move { Ok(input.context.header("user-id").is_some()) });
/// ```
pub fn rule(name: impl AsRef<str>) -> RuleBuilder {
    RuleBuilder {
        id: RuleId::new(name),
        mode: CacheMode::default(),
        message: None,
    }
}

/// Builder returned by [`rule`]
#[derive(Debug, Clone)]
pub struct RuleBuilder {
    id: RuleId,
    mode: CacheMode,
    message: Option<String>,
}

impl RuleBuilder {
    /// Set the cache mode (default [`CacheMode::Strict`])
    pub fn cache(mut self, mode: CacheMode) -> Self {
        self.mode = mode;
        self
    }

    /// Message reported when the predicate denies
    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Finish with an async closure
    pub fn check<F, Fut>(self, f: F) -> Rule
    where
        F: Fn(FieldInput) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<bool, RuleError>> + Send + 'static,
    {
        self.predicate(FnPredicate(f))
    }

    /// Finish with a [`Predicate`] implementation
    pub fn predicate(self, predicate: impl Predicate) -> Rule {
        Rule::from(AtomicRule {
            id: self.id,
            mode: self.mode,
            message: self.message,
            predicate: Box::new(predicate),
        })
    }
}

/// Rule boundary: converts panics and timeouts into faults and reports every
/// fault to the context
pub(crate) async fn guarded<T, Fut>(
    id: &RuleId,
    input: &FieldInput,
    fut: Fut,
) -> Result<T, RuleError>
where
    Fut: Future<Output = Result<T, RuleError>>,
{
    let fut = AssertUnwindSafe(fut).catch_unwind();

    let caught = match input.context.rule_timeout() {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(caught) => caught,
            Err(_) => Ok(Err(RuleError::Timeout(limit.as_millis() as u64))),
        },
        None => fut.await,
    };

    let result = caught.unwrap_or_else(|panic| Err(RuleError::Panicked(panic_message(&*panic))));

    if let Err(err) = &result {
        input.context.report_fault(id, &input.field, err);
    }

    result
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
