//! Enforcement middleware: applies permission decisions around resolvers
//!
//! Each field resolution moves through
//! `Pending → RuleLookup → Evaluating → Proceed | Rejected`, skipping
//! `Evaluating` when no rule is bound. A rejected field yields a
//! [`FieldError`]; its siblings are unaffected.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::debug;

use crate::audit::{AuditEvent, AuditSink, TracingAuditSink};
use crate::config::ShieldConfig;
use crate::context::{ContextBuilder, EvaluationContext, FieldInput};
use crate::metrics::{MetricsCollector, ShieldMetrics};
use crate::permissions::PermissionMap;
use crate::types::{Arguments, DenyReason, FieldError, FieldInfo, RuleOutcome};

/// Field resolver guarded by the shield
///
/// Receives parent, arguments, context and field metadata exactly as the
/// executor supplied them.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, input: FieldInput) -> anyhow::Result<Value>;
}

/// Adapter turning an async closure into a [`Resolver`]
pub struct FnResolver<F>(F);

#[async_trait]
impl<F, Fut> Resolver for FnResolver<F>
where
    F: Fn(FieldInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    async fn resolve(&self, input: FieldInput) -> anyhow::Result<Value> {
        (self.0)(input).await
    }
}

/// Wrap an async closure as a [`Resolver`]
pub fn resolver_fn<F, Fut>(f: F) -> FnResolver<F>
where
    F: Fn(FieldInput) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    FnResolver(f)
}

/// Lifecycle of one guarded field resolution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldState {
    Pending,
    RuleLookup,
    Evaluating,
    Proceed,
    Rejected,
}

impl fmt::Display for FieldState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldState::Pending => "pending",
            FieldState::RuleLookup => "rule_lookup",
            FieldState::Evaluating => "evaluating",
            FieldState::Proceed => "proceed",
            FieldState::Rejected => "rejected",
        };
        f.write_str(name)
    }
}

/// Why a guarded field produced no value
#[derive(Debug, Error)]
pub enum FieldFailure {
    /// The field's rule did not allow it
    #[error("{0}")]
    Unauthorized(FieldError),

    /// The resolver ran and failed; relayed unchanged
    #[error(transparent)]
    Resolver(#[from] anyhow::Error),
}

impl FieldFailure {
    pub fn field_error(&self) -> Option<&FieldError> {
        match self {
            FieldFailure::Unauthorized(error) => Some(error),
            FieldFailure::Resolver(_) => None,
        }
    }
}

/// Field-level authorization shield
///
/// Holds the frozen [`PermissionMap`] and the process-wide collaborators
/// (audit sink, metrics). Share it behind an `Arc`; per-request state lives
/// in the [`EvaluationContext`] built by [`context`](Self::context).
pub struct Shield {
    permissions: Arc<PermissionMap>,
    config: ShieldConfig,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Shield {
    pub fn new(permissions: PermissionMap, config: ShieldConfig) -> Self {
        let audit: Option<Arc<dyn AuditSink>> = if config.enable_audit {
            Some(Arc::new(TracingAuditSink))
        } else {
            None
        };

        let metrics = if config.enable_metrics {
            Some(Arc::new(MetricsCollector::new()))
        } else {
            None
        };

        Self {
            permissions: Arc::new(permissions),
            config,
            audit,
            metrics,
        }
    }

    /// Replace the audit sink
    pub fn with_audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub fn permissions(&self) -> &PermissionMap {
        &self.permissions
    }

    pub fn config(&self) -> &ShieldConfig {
        &self.config
    }

    /// Start a request context wired to this shield's collaborators
    pub fn context(&self) -> ContextBuilder {
        ContextBuilder::default()
            .audit(self.audit.clone())
            .metrics(self.metrics.clone())
            .rule_timeout(self.config.rule_timeout())
            .caching(self.config.enable_cache)
    }

    /// Metrics snapshot, when metrics are enabled
    pub fn metrics(&self) -> Option<ShieldMetrics> {
        self.metrics.as_ref().map(|m| m.get_metrics())
    }

    pub fn metrics_collector(&self) -> Option<&Arc<MetricsCollector>> {
        self.metrics.as_ref()
    }

    /// Decide whether a field may be resolved, without resolving it
    ///
    /// # Errors
    ///
    /// The field error to surface when the field is rejected.
    pub async fn authorize(&self, input: &FieldInput) -> Result<(), FieldError> {
        let locator = &input.field.locator;
        let mut state = FieldState::Pending;

        transition(input, &mut state, FieldState::RuleLookup);
        let Some(rule) = self.permissions.resolve_locator(locator) else {
            transition(input, &mut state, FieldState::Proceed);
            if let Some(metrics) = &self.metrics {
                metrics.record_unguarded();
            }
            return Ok(());
        };

        transition(input, &mut state, FieldState::Evaluating);
        let start = Instant::now();
        let outcome = rule.evaluate(input).await;

        if let Some(metrics) = &self.metrics {
            let validation = matches!(outcome, RuleOutcome::Deny(DenyReason::Validation { .. }));
            metrics.record_outcome(outcome.kind(), validation);
            metrics.record_latency(start.elapsed());
        }

        match outcome {
            RuleOutcome::Allow => {
                transition(input, &mut state, FieldState::Proceed);
                Ok(())
            }
            rejected => {
                transition(input, &mut state, FieldState::Rejected);
                let error = self.field_error(&input.field, rejected);

                if let Some(audit) = input.context.audit() {
                    audit.record(AuditEvent::rejected(
                        input.context.request_id(),
                        &input.field,
                        error.code,
                        &error.message,
                    ));
                }

                Err(error)
            }
        }
    }

    /// Authorize a field and, when allowed, run its resolver
    ///
    /// The resolver receives the original inputs and its value or fault is
    /// relayed verbatim. A rejected field never reaches the resolver.
    pub async fn resolve_field<R>(
        &self,
        resolver: &R,
        parent: Value,
        arguments: Arguments,
        context: &EvaluationContext,
        field: FieldInfo,
    ) -> Result<Value, FieldFailure>
    where
        R: Resolver + ?Sized,
    {
        let input = FieldInput::new(parent, arguments, context.clone(), field);
        self.resolve_input(resolver, input).await
    }

    /// [`resolve_field`](Self::resolve_field) for an already assembled input
    pub async fn resolve_input<R>(&self, resolver: &R, input: FieldInput) -> Result<Value, FieldFailure>
    where
        R: Resolver + ?Sized,
    {
        self.authorize(&input)
            .await
            .map_err(FieldFailure::Unauthorized)?;

        Ok(resolver.resolve(input).await?)
    }

    /// Map a non-allow outcome to the error surfaced to the caller
    fn field_error(&self, info: &FieldInfo, outcome: RuleOutcome) -> FieldError {
        match outcome {
            RuleOutcome::Deny(DenyReason::Validation { violations }) => {
                FieldError::validation(info, violations)
            }
            RuleOutcome::Deny(DenyReason::Forbidden { message }) => FieldError::forbidden(
                info,
                message.unwrap_or_else(|| self.config.fallback_error.clone()),
            ),
            RuleOutcome::Error(err) if self.config.debug => FieldError::forbidden(info, err.to_string()),
            RuleOutcome::Error(_) | RuleOutcome::Allow => {
                FieldError::forbidden(info, self.config.fallback_error.clone())
            }
        }
    }
}

impl fmt::Debug for Shield {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shield")
            .field("config", &self.config)
            .field("field_bindings", &self.permissions.field_bindings())
            .field("type_bindings", &self.permissions.type_bindings())
            .field("has_default", &self.permissions.has_default())
            .finish()
    }
}

fn transition(input: &FieldInput, state: &mut FieldState, next: FieldState) {
    debug!(
        "{} [{}]: {} -> {}",
        input.field.locator,
        input.context.request_id(),
        state,
        next
    );
    *state = next;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RuleError;
    use crate::rule::rule;
    use crate::types::{ErrorCode, Violation};

    fn shield(config: ShieldConfig) -> Shield {
        Shield::new(PermissionMap::builder().build_unchecked().unwrap(), config)
    }

    #[test]
    fn test_error_mapping() {
        let shield = shield(ShieldConfig::default());
        let info = FieldInfo::new("Query", "me").with_path(["me"]);

        let denied = shield.field_error(&info, RuleOutcome::Deny(DenyReason::forbidden()));
        assert_eq!(denied.code, ErrorCode::Forbidden);
        assert_eq!(denied.message, "Not Authorised!");
        assert_eq!(denied.path, vec!["me".to_string()]);

        let custom = shield.field_error(&info, RuleOutcome::Deny(DenyReason::forbidden_with("Sign in")));
        assert_eq!(custom.message, "Sign in");

        let invalid = shield.field_error(
            &info,
            RuleOutcome::Deny(DenyReason::Validation {
                violations: vec![Violation::new("input.name", "input.name is a required field")],
            }),
        );
        assert_eq!(invalid.code, ErrorCode::ValidationFailed);
        assert_eq!(invalid.violations.len(), 1);

        let fault = shield.field_error(&info, RuleOutcome::Error(RuleError::failed("db down")));
        assert_eq!(fault.code, ErrorCode::Forbidden);
        assert_eq!(fault.message, "Not Authorised!");
    }

    #[test]
    fn test_debug_mode_exposes_fault() {
        let shield = shield(ShieldConfig {
            debug: true,
            ..ShieldConfig::default()
        });
        let info = FieldInfo::new("Query", "me");

        let fault = shield.field_error(&info, RuleOutcome::Error(RuleError::failed("db down")));
        assert_eq!(fault.message, "Rule failed: db down");
    }

    #[tokio::test]
    async fn test_unguarded_field_proceeds() {
        let shield = shield(ShieldConfig::default());
        let ctx = shield.context().build();
        let echo = resolver_fn(|input: FieldInput| async move { Ok(Value::clone(&input.parent)) });

        let value = shield
            .resolve_field(&echo, Value::from(7), Arguments::new(), &ctx, FieldInfo::new("Query", "users"))
            .await
            .unwrap();

        assert_eq!(value, Value::from(7));
        assert_eq!(shield.metrics().unwrap().unguarded_fields, 1);
    }

    #[tokio::test]
    async fn test_rejected_field_skips_resolver() {
        let never = rule("never").check(|_| async { Ok(false) });
        let shield = Shield::new(
            PermissionMap::builder()
                .bind("Query", "me", never)
                .build_unchecked()
                .unwrap(),
            ShieldConfig::default(),
        );
        let ctx = shield.context().build();
        let unreachable = resolver_fn(|_| async { Err::<Value, _>(anyhow::anyhow!("resolver must not run")) });

        let failure = shield
            .resolve_field(&unreachable, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me"))
            .await
            .unwrap_err();

        assert_eq!(failure.field_error().unwrap().code, ErrorCode::Forbidden);
    }
}
