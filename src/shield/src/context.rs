//! Per-request evaluation context

use crate::audit::{AuditEvent, AuditSink};
use crate::cache::{CacheLookup, RequestCache};
use crate::error::RuleError;
use crate::metrics::MetricsCollector;
use crate::rule::RuleId;
use crate::types::{Arguments, FieldInfo};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use uuid::Uuid;

/// Context shared by every rule evaluated for one request
///
/// Carries the caller's transport metadata and claims, which the shield
/// passes through without interpreting, plus the request-scoped cache.
/// Cloning is cheap; all clones share the same cache. The cache is dropped
/// together with the last clone, so decisions never leak across requests.
#[derive(Clone)]
pub struct EvaluationContext {
    inner: Arc<ContextInner>,
}

struct ContextInner {
    request_id: String,
    headers: HashMap<String, String>,
    claims: Map<String, Value>,
    cache: RequestCache,
    cancellation: CancellationToken,
    caching: bool,
    rule_timeout: Option<Duration>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl EvaluationContext {
    /// Start building a standalone context (no audit sink, no metrics)
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Unique identifier of the owning request
    pub fn request_id(&self) -> &str {
        &self.inner.request_id
    }

    /// Look up a transport header (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// All transport headers, keys lowercased
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.inner.headers
    }

    /// Look up a caller claim
    pub fn claim(&self, name: &str) -> Option<&Value> {
        self.inner.claims.get(name)
    }

    /// All caller claims
    pub fn claims(&self) -> &Map<String, Value> {
        &self.inner.claims
    }

    /// Request-scoped rule outcome cache
    pub fn cache(&self) -> &RequestCache {
        &self.inner.cache
    }

    /// Whether rule outcomes are memoized for this request
    pub fn caching_enabled(&self) -> bool {
        self.inner.caching
    }

    /// Upper bound on a single rule evaluation
    pub fn rule_timeout(&self) -> Option<Duration> {
        self.inner.rule_timeout
    }

    /// Cancel the request: abandon in-flight rule evaluations and drop every
    /// memoized outcome
    pub fn cancel(&self) {
        self.inner.cancellation.cancel();
        self.inner.cache.clear();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancellation.is_cancelled()
    }

    /// Resolves once the request is cancelled
    pub async fn cancelled(&self) {
        self.inner.cancellation.cancelled().await
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.inner.cancellation
    }

    /// Report a rule fault to the log, the audit sink and the metrics
    pub(crate) fn report_fault(&self, rule: &RuleId, field: &FieldInfo, error: &RuleError) {
        warn!(
            "Rule '{}' faulted on {} (request {}): {}",
            rule, field.locator, self.inner.request_id, error
        );

        if let Some(metrics) = &self.inner.metrics {
            metrics.record_fault();
        }

        if let Some(audit) = &self.inner.audit {
            audit.record(AuditEvent::rule_fault(
                &self.inner.request_id,
                rule.as_str(),
                field,
                error,
            ));
        }
    }

    pub(crate) fn record_lookup(&self, lookup: CacheLookup) {
        if let Some(metrics) = &self.inner.metrics {
            metrics.record_cache_lookup(lookup);
        }
    }

    pub(crate) fn audit(&self) -> Option<&Arc<dyn AuditSink>> {
        self.inner.audit.as_ref()
    }
}

impl Default for EvaluationContext {
    fn default() -> Self {
        ContextBuilder::default().build()
    }
}

impl std::fmt::Debug for EvaluationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvaluationContext")
            .field("request_id", &self.inner.request_id)
            .field("headers", &self.inner.headers)
            .field("claims", &self.inner.claims)
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Builder for [`EvaluationContext`]
///
/// Obtain one from [`Shield::context`](crate::Shield::context) to inherit the
/// shield's audit sink, metrics and timeouts.
pub struct ContextBuilder {
    request_id: Option<String>,
    headers: HashMap<String, String>,
    claims: Map<String, Value>,
    cancellation: Option<CancellationToken>,
    caching: bool,
    rule_timeout: Option<Duration>,
    audit: Option<Arc<dyn AuditSink>>,
    metrics: Option<Arc<MetricsCollector>>,
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self {
            request_id: None,
            headers: HashMap::new(),
            claims: Map::new(),
            cancellation: None,
            caching: true,
            rule_timeout: None,
            audit: None,
            metrics: None,
        }
    }
}

impl ContextBuilder {
    /// Use a transport-supplied request id instead of a generated one
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    /// Add a transport header
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        self.headers
            .insert(name.as_ref().to_ascii_lowercase(), value.into());
        self
    }

    /// Add several transport headers
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (name, value) in headers {
            self = self.header(name, value);
        }
        self
    }

    /// Add a caller claim
    pub fn claim(mut self, name: impl Into<String>, value: Value) -> Self {
        self.claims.insert(name.into(), value);
        self
    }

    /// Tie the request to an external cancellation token (e.g. the
    /// connection's); a child token is derived so cancelling the context does
    /// not cancel the parent
    pub fn cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancellation = Some(parent.child_token());
        self
    }

    pub fn caching(mut self, enabled: bool) -> Self {
        self.caching = enabled;
        self
    }

    pub fn rule_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.rule_timeout = timeout;
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    pub(crate) fn metrics(mut self, metrics: Option<Arc<MetricsCollector>>) -> Self {
        self.metrics = metrics;
        self
    }

    pub(crate) fn audit(mut self, audit: Option<Arc<dyn AuditSink>>) -> Self {
        self.audit = audit;
        self
    }

    /// Build the context with a fresh, empty cache
    pub fn build(self) -> EvaluationContext {
        EvaluationContext {
            inner: Arc::new(ContextInner {
                request_id: self
                    .request_id
                    .unwrap_or_else(|| Uuid::new_v4().to_string()),
                headers: self.headers,
                claims: self.claims,
                cache: RequestCache::new(),
                cancellation: self.cancellation.unwrap_or_else(CancellationToken::new),
                caching: self.caching,
                rule_timeout: self.rule_timeout,
                audit: self.audit,
                metrics: self.metrics,
            }),
        }
    }
}

/// Everything a rule or resolver sees for one field resolution
///
/// Parent and arguments are reference counted so rule closures can take an
/// owned copy cheaply.
#[derive(Debug, Clone)]
pub struct FieldInput {
    /// Result of the parent field (`Value::Null` for root fields)
    pub parent: Arc<Value>,

    /// Field arguments
    pub arguments: Arc<Arguments>,

    /// Request context
    pub context: EvaluationContext,

    /// Field metadata
    pub field: Arc<FieldInfo>,
}

impl FieldInput {
    pub fn new(
        parent: Value,
        arguments: Arguments,
        context: EvaluationContext,
        field: FieldInfo,
    ) -> Self {
        Self {
            parent: Arc::new(parent),
            arguments: Arc::new(arguments),
            context,
            field: Arc::new(field),
        }
    }

    /// Look up a top-level argument
    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }
}
