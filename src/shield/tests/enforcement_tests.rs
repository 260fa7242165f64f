//! Enforcement middleware: decisions, error mapping, memoization and
//! cancellation across field resolutions

use cretoai_shield::{
    and, input_rule, resolver_fn, rule, Arguments, AuditEvent, CacheMode, ErrorCode, FieldFailure,
    FieldInfo, FieldInput, FieldSpec, MemoryAuditSink, PermissionMap, Rule, RuleError, Shield,
    ShieldConfig,
};
use futures::future::join_all;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Rule that sleeps before allowing, counting evaluations
fn slow_rule(name: &str, mode: CacheMode, delay: Duration) -> (Rule, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let rule = rule(name).cache(mode).check(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        async move {
            tokio::time::sleep(delay).await;
            Ok(true)
        }
    });
    (rule, calls)
}

fn shield_with(map: PermissionMap, config: ShieldConfig) -> Shield {
    Shield::new(map, config)
}

fn echo_field() -> impl cretoai_shield::Resolver {
    resolver_fn(|input: FieldInput| async move {
        Ok(json!({ "field": input.field.field_name(), "args": Value::Object((*input.arguments).clone()) }))
    })
}

fn args(value: Value) -> Arguments {
    serde_json::from_value(value).unwrap()
}

// ============================================================================
// DECISIONS
// ============================================================================

#[tokio::test]
async fn test_allowed_field_receives_original_inputs() {
    let map = PermissionMap::builder()
        .bind_default(rule("open").check(|_| async { Ok(true) }))
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let ctx = shield.context().header("user-id", "1").build();

    let seen = resolver_fn(|input: FieldInput| async move {
        Ok(json!({
            "parent": Value::clone(&input.parent),
            "args": Value::Object((*input.arguments).clone()),
            "user": input.context.header("user-id"),
            "path": input.field.path.clone(),
        }))
    });

    let value = shield
        .resolve_field(
            &seen,
            json!({ "id": "1" }),
            args(json!({ "first": 10 })),
            &ctx,
            FieldInfo::new("User", "friends").with_path(["me", "friends"]),
        )
        .await
        .unwrap();

    assert_eq!(value["parent"], json!({ "id": "1" }));
    assert_eq!(value["args"], json!({ "first": 10 }));
    assert_eq!(value["user"], "1");
    assert_eq!(value["path"], json!(["me", "friends"]));
}

#[tokio::test]
async fn test_denied_field_is_forbidden_and_siblings_resolve() {
    let map = PermissionMap::builder()
        .bind("Query", "users", rule("isAdmin").check(|_| async { Ok(false) }))
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let ctx = shield.context().build();
    let resolver = echo_field();

    let (users, me) = tokio::join!(
        shield.resolve_field(&resolver, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "users")),
        shield.resolve_field(&resolver, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me")),
    );

    let error = match users {
        Err(FieldFailure::Unauthorized(error)) => error,
        other => panic!("expected forbidden, got {:?}", other),
    };
    assert_eq!(error.code, ErrorCode::Forbidden);
    assert_eq!(error.field, "users");
    assert_eq!(error.message, "Not Authorised!");

    assert_eq!(me.unwrap()["field"], "me");
}

#[tokio::test]
async fn test_validation_failure_code() {
    let create_user = input_rule("isValidUser")
        .field("input.name", FieldSpec::string().required())
        .field("input.email", FieldSpec::string().required().email())
        .build()
        .unwrap();
    let map = PermissionMap::builder()
        .bind("Mutation", "createUser", create_user)
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let ctx = shield.context().build();

    let failure = shield
        .resolve_field(
            &echo_field(),
            Value::Null,
            args(json!({ "input": { "name": "", "email": "not-an-email" } })),
            &ctx,
            FieldInfo::new("Mutation", "createUser"),
        )
        .await
        .unwrap_err();

    let error = failure.field_error().unwrap();
    assert_eq!(error.code, ErrorCode::ValidationFailed);
    assert_eq!(error.violations.len(), 2);
    assert_eq!(
        error.message,
        "input.name is a required field; input.email must be a valid email"
    );

    let serialized = serde_json::to_value(error).unwrap();
    assert_eq!(serialized["code"], "VALIDATION_FAILED");
}

#[tokio::test]
async fn test_resolver_fault_is_relayed_verbatim() {
    let map = PermissionMap::builder().build_unchecked().unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let ctx = shield.context().build();

    let broken = resolver_fn(|_| async { Err::<Value, _>(anyhow::anyhow!("database exploded")) });

    let failure = shield
        .resolve_field(&broken, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me"))
        .await
        .unwrap_err();

    assert!(failure.field_error().is_none());
    assert_eq!(failure.to_string(), "database exploded");
}

// ============================================================================
// RULE FAULTS
// ============================================================================

#[tokio::test]
async fn test_rule_fault_is_forbidden_and_audited() {
    let sink = Arc::new(MemoryAuditSink::new());
    let broken = rule("isAdmin").check(|_| async { Err(RuleError::lookup("user store offline")) });
    let map = PermissionMap::builder()
        .bind("Query", "users", broken)
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default()).with_audit_sink(sink.clone());
    let ctx = shield.context().request_id("req-42").build();

    let failure = shield
        .resolve_field(&echo_field(), Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "users"))
        .await
        .unwrap_err();

    let error = failure.field_error().unwrap();
    assert_eq!(error.code, ErrorCode::Forbidden);
    assert_eq!(error.message, "Not Authorised!");

    let faults = sink.faults();
    assert_eq!(faults.len(), 1);
    match &faults[0] {
        AuditEvent::RuleFault { request_id, rule, field, error, .. } => {
            assert_eq!(request_id, "req-42");
            assert_eq!(rule, "isAdmin");
            assert_eq!(field, "Query.users");
            assert_eq!(error, "Lookup failed: user store offline");
        }
        other => panic!("unexpected event {:?}", other),
    }

    // The rejection itself is audited too
    assert_eq!(sink.len(), 2);
    assert_eq!(shield.metrics().unwrap().rule_faults, 1);
}

#[tokio::test]
async fn test_debug_mode_exposes_fault_cause() {
    let broken = rule("isAdmin").check(|_| async { Err(RuleError::failed("no such table")) });
    let map = PermissionMap::builder()
        .bind_default(broken)
        .build_unchecked()
        .unwrap();
    let config = ShieldConfig {
        debug: true,
        ..ShieldConfig::default()
    };
    let shield = shield_with(map, config);
    let ctx = shield.context().build();

    let failure = shield
        .resolve_field(&echo_field(), Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me"))
        .await
        .unwrap_err();

    assert_eq!(failure.field_error().unwrap().message, "Rule failed: no such table");
}

#[tokio::test]
async fn test_custom_fallback_error() {
    let map = PermissionMap::builder()
        .bind_default(cretoai_shield::deny())
        .build_unchecked()
        .unwrap();
    let config = ShieldConfig {
        fallback_error: "Access denied".to_string(),
        ..ShieldConfig::default()
    };
    let shield = shield_with(map, config);
    let ctx = shield.context().build();

    let failure = shield
        .resolve_field(&echo_field(), Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me"))
        .await
        .unwrap_err();

    assert_eq!(failure.field_error().unwrap().message, "Access denied");
}

#[tokio::test]
async fn test_slow_rule_times_out() {
    let (slow, _) = slow_rule("slow", CacheMode::Strict, Duration::from_secs(5));
    let map = PermissionMap::builder()
        .bind_default(slow)
        .build_unchecked()
        .unwrap();
    let config = ShieldConfig {
        debug: true,
        rule_timeout_ms: Some(25),
        ..ShieldConfig::default()
    };
    let shield = shield_with(map, config);
    let ctx = shield.context().build();

    let failure = shield
        .resolve_field(&echo_field(), Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me"))
        .await
        .unwrap_err();

    assert_eq!(failure.field_error().unwrap().message, "Rule timed out after 25 ms");
}

// ============================================================================
// MEMOIZATION
// ============================================================================

#[tokio::test]
async fn test_sibling_fields_evaluate_shared_rule_once() {
    let (is_authenticated, calls) =
        slow_rule("isAuthenticated", CacheMode::Contextual, Duration::from_millis(30));
    let map = PermissionMap::builder()
        .bind("Query", "me", is_authenticated.clone())
        .bind("Query", "users", and([is_authenticated.clone()]))
        .bind_type("User", is_authenticated)
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let ctx = shield.context().header("user-id", "1").build();
    let resolver = echo_field();

    let fields = [
        FieldInfo::new("Query", "me"),
        FieldInfo::new("Query", "users"),
        FieldInfo::new("User", "email"),
        FieldInfo::new("User", "name"),
    ];

    let results = join_all(fields.into_iter().map(|info| {
        shield.resolve_field(&resolver, Value::Null, Arguments::new(), &ctx, info)
    }))
    .await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(calls.load(Ordering::SeqCst), 1, "shared rule must run once per request");

    let stats = ctx.cache().stats();
    assert_eq!(stats.misses, 2, "isAuthenticated and and(isAuthenticated)");
    assert!(stats.joins + stats.hits >= 3);
}

#[tokio::test]
async fn test_strict_rule_keys_on_arguments() {
    let (owns_post, calls) = slow_rule("ownsPost", CacheMode::Strict, Duration::from_millis(1));
    let map = PermissionMap::builder()
        .bind_default(owns_post)
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let ctx = shield.context().build();
    let resolver = echo_field();

    for id in [1, 2, 1] {
        shield
            .resolve_field(&resolver, Value::Null, args(json!({ "id": id })), &ctx, FieldInfo::new("Query", "post"))
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_each_request_starts_with_an_empty_cache() {
    let (is_authenticated, calls) =
        slow_rule("isAuthenticated", CacheMode::Contextual, Duration::from_millis(1));
    let map = PermissionMap::builder()
        .bind_default(is_authenticated)
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let resolver = echo_field();

    for _ in 0..3 {
        let ctx = shield.context().build();
        shield
            .resolve_field(&resolver, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me"))
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_caching_can_be_disabled() {
    let (is_authenticated, calls) =
        slow_rule("isAuthenticated", CacheMode::Contextual, Duration::from_millis(1));
    let map = PermissionMap::builder()
        .bind_default(is_authenticated)
        .build_unchecked()
        .unwrap();
    let config = ShieldConfig {
        enable_cache: false,
        ..ShieldConfig::default()
    };
    let shield = shield_with(map, config);
    let ctx = shield.context().build();
    let resolver = echo_field();

    for field in ["me", "users"] {
        shield
            .resolve_field(&resolver, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", field))
            .await
            .unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert!(ctx.cache().is_empty());
}

// ============================================================================
// CANCELLATION
// ============================================================================

#[tokio::test]
async fn test_cancelled_evaluation_is_not_reused() {
    let (is_authenticated, calls) =
        slow_rule("isAuthenticated", CacheMode::Contextual, Duration::from_millis(200));
    let map = PermissionMap::builder()
        .bind_default(is_authenticated)
        .build_unchecked()
        .unwrap();
    let shield = shield_with(map, ShieldConfig::default());
    let resolver = echo_field();

    let ctx = shield.context().build();
    let (result, _) = tokio::join!(
        shield.resolve_field(&resolver, Value::Null, Arguments::new(), &ctx, FieldInfo::new("Query", "me")),
        async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.cancel();
        }
    );

    assert!(result.is_err(), "cancelled evaluation must not allow the field");
    assert!(ctx.is_cancelled());
    assert!(ctx.cache().is_empty());

    let fresh = shield.context().build();
    let value = shield
        .resolve_field(&resolver, Value::Null, Arguments::new(), &fresh, FieldInfo::new("Query", "me"))
        .await
        .unwrap();

    assert_eq!(value["field"], "me");
    assert_eq!(calls.load(Ordering::SeqCst), 2, "fresh request must re-evaluate");
}
