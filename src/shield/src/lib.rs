//! # CretoAI Shield
//!
//! Field-level authorization engine for query executors.
//!
//! ## Features
//!
//! - **Composable rules**: atomic async predicates combined with
//!   [`and`], [`or`], [`not`] and [`chain`]
//! - **Input rules**: declarative argument validation with uniqueness checks
//!   against live data
//! - **Permission map**: exact, per-type and global fallback bindings,
//!   validated against the schema at construction time
//! - **Per-request memoization**: a rule guarding several fields of one
//!   request runs once, and concurrent callers join the in-flight evaluation
//! - **Safe failure**: rule faults and panics become denials, and are
//!   reported to the audit sink
//!
//! ## Default allow
//!
//! A field with no explicit binding, no type fallback and no global fallback
//! resolves to no rule and is **not** guarded. Install a global fallback with
//! [`PermissionMapBuilder::bind_default`] (usually [`deny`]) to make the
//! shield secure by default.
//!
//! ## Example
//!
//! ```rust
//! use cretoai_shield::{
//!     and, resolver_fn, rule, FieldInfo, PermissionMap, Schema, Shield, ShieldConfig,
//! };
//! use serde_json::{json, Map, Value};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let is_authenticated = rule("isAuthenticated")
//!     .check(|input| async move { Ok(input.context.header("user-id").is_some()) });
//!
//! let schema = Schema::new().with_type("Query", ["me"]);
//! let permissions = PermissionMap::builder()
//!     .bind("Query", "me", and([is_authenticated]))
//!     .build(&schema)?;
//!
//! let shield = Shield::new(permissions, ShieldConfig::default());
//! let ctx = shield.context().header("user-id", "1").build();
//!
//! let me = resolver_fn(|_input| async move { Ok(json!({ "id": "1" })) });
//! let value = shield
//!     .resolve_field(&me, Value::Null, Map::new(), &ctx, FieldInfo::new("Query", "me"))
//!     .await?;
//! assert_eq!(value["id"], "1");
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod cache;
pub mod config;
pub mod context;
pub mod error;
pub mod input;
pub mod metrics;
pub mod middleware;
pub mod permissions;
pub mod rule;
pub mod schema;
pub mod types;

// Re-export commonly used types
pub use audit::{AuditEvent, AuditSink, MemoryAuditSink, TracingAuditSink};
pub use cache::{CacheLookup, CacheStats, RequestCache};
pub use config::ShieldConfig;
pub use context::{ContextBuilder, EvaluationContext, FieldInput};
pub use error::{Result, RuleError, ShieldError};
pub use input::{input_rule, ExistenceLookup, FieldSpec, InputRule, InputRuleBuilder, ValueKind};
pub use metrics::{MetricsCollector, ShieldMetrics};
pub use middleware::{resolver_fn, FieldFailure, FieldState, FnResolver, Resolver, Shield};
pub use permissions::{PermissionMap, PermissionMapBuilder};
pub use rule::{allow, and, chain, deny, not, or, rule, CacheMode, Predicate, Rule, RuleBuilder, RuleId};
pub use schema::{Schema, SchemaCatalog};
pub use types::{
    Arguments, DenyReason, ErrorCode, FieldError, FieldInfo, FieldLocator, OutcomeKind,
    RuleOutcome, Violation,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
