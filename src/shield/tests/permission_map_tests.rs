//! Permission map construction and lookup

use cretoai_shield::{allow, and, deny, not, rule, PermissionMap, Rule, Schema, ShieldError};

fn schema() -> Schema {
    Schema::new()
        .with_type("Query", ["me", "users"])
        .with_type("Mutation", ["createUser"])
        .with_type("User", ["id", "name", "email", "role"])
}

fn named(name: &str) -> Rule {
    rule(name).check(|_| async { Ok(true) })
}

// ============================================================================
// LOOKUP
// ============================================================================

#[test]
fn test_exact_binding_wins_over_fallbacks() {
    let map = PermissionMap::builder()
        .bind("Query", "users", named("isAdmin"))
        .bind_type("Query", named("isAuthenticated"))
        .bind_default(deny())
        .build(&schema())
        .unwrap();

    assert_eq!(map.resolve("Query", "users").unwrap().id().as_str(), "isAdmin");
    assert_eq!(map.resolve("Query", "me").unwrap().id().as_str(), "isAuthenticated");
    assert_eq!(map.resolve("Mutation", "createUser").unwrap().id().as_str(), "deny");
}

#[test]
fn test_unmapped_field_without_fallbacks_is_unguarded() {
    let map = PermissionMap::builder()
        .bind("Query", "me", named("isAuthenticated"))
        .build(&schema())
        .unwrap();

    assert!(map.resolve("Mutation", "createUser").is_none());
    assert!(!map.has_default());
}

#[test]
fn test_global_allow_fallback() {
    let map = PermissionMap::builder()
        .bind_default(allow())
        .build(&schema())
        .unwrap();

    assert_eq!(map.resolve("User", "email").unwrap().id().as_str(), "allow");
}

// ============================================================================
// CONSTRUCTION ERRORS
// ============================================================================

#[test]
fn test_duplicate_field_binding() {
    let result = PermissionMap::builder()
        .bind("Query", "me", named("a"))
        .bind("Query", "me", named("b"))
        .build(&schema());

    match result {
        Err(ShieldError::DuplicateBinding(locator)) => assert_eq!(locator.to_string(), "Query.me"),
        other => panic!("expected duplicate binding, got {:?}", other.err()),
    }
}

#[test]
fn test_duplicate_type_fallback() {
    let result = PermissionMap::builder()
        .bind_type("Query", allow())
        .bind_type("Query", deny())
        .build(&schema());

    assert!(matches!(result, Err(ShieldError::DuplicateTypeFallback(t)) if t == "Query"));
}

#[test]
fn test_unknown_type_and_field() {
    let unknown_type = PermissionMap::builder()
        .bind("Subscription", "events", allow())
        .build(&schema());
    assert!(matches!(unknown_type, Err(ShieldError::UnknownType(t)) if t == "Subscription"));

    let unknown_field = PermissionMap::builder()
        .bind("Query", "posts", allow())
        .build(&schema());
    assert!(matches!(unknown_field, Err(ShieldError::UnknownField(_))));

    let unknown_fallback = PermissionMap::builder()
        .bind_type("Post", deny())
        .build(&schema());
    assert!(matches!(unknown_fallback, Err(ShieldError::UnknownType(_))));
}

#[test]
fn test_distinct_rules_sharing_a_name_are_rejected() {
    let result = PermissionMap::builder()
        .bind("Query", "me", named("isAuthenticated"))
        .bind("Query", "users", named("isAuthenticated"))
        .build(&schema());

    assert!(matches!(result, Err(ShieldError::ConflictingRuleName(name)) if name == "isAuthenticated"));
}

#[test]
fn test_rule_named_like_a_composite_is_rejected() {
    let is_admin = rule("isAdmin").check(|_| async { Ok(false) });
    let lookalike = rule("and(isAdmin)").check(|_| async { Ok(true) });

    let result = PermissionMap::builder()
        .bind("Query", "me", lookalike)
        .bind("Query", "users", and([is_admin]))
        .build(&schema());

    assert!(matches!(result, Err(ShieldError::InvalidRuleName(name)) if name == "and(isAdmin)"));
}

#[test]
fn test_rule_named_like_a_constant_is_rejected() {
    let result = PermissionMap::builder()
        .bind("Query", "me", and([named("allow"), named("isAuthenticated")]))
        .build_unchecked();

    assert!(matches!(result, Err(ShieldError::InvalidRuleName(name)) if name == "allow"));
}

#[test]
fn test_reusing_one_rule_is_allowed() {
    let is_authenticated = named("isAuthenticated");

    let map = PermissionMap::builder()
        .bind("Query", "me", is_authenticated.clone())
        .bind("Query", "users", and([is_authenticated.clone(), named("isAdmin")]))
        .bind("Mutation", "createUser", not(is_authenticated))
        .build(&schema())
        .unwrap();

    assert_eq!(map.field_bindings(), 3);
}

#[test]
fn test_build_unchecked_skips_schema() {
    let map = PermissionMap::builder()
        .bind("Anything", "goes", deny())
        .build_unchecked()
        .unwrap();

    assert!(map.resolve("Anything", "goes").is_some());
}
