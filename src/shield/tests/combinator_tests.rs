//! Rule combinator semantics: ordering, short-circuiting and negation laws

use cretoai_shield::{
    and, chain, input_rule, not, or, rule, Arguments, CacheMode, DenyReason, EvaluationContext,
    FieldInfo, FieldInput, FieldSpec, OutcomeKind, Rule, RuleError, RuleOutcome,
};
use proptest::prelude::*;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn input() -> FieldInput {
    FieldInput::new(
        Value::Null,
        Arguments::new(),
        EvaluationContext::default(),
        FieldInfo::new("Query", "users"),
    )
}

/// Rule returning a fixed result and counting its evaluations
fn counting(name: &str, result: Result<bool, RuleError>) -> (Rule, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let rule = rule(name).cache(CacheMode::NoCache).check(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
        let result = result.clone();
        async move { result }
    });
    (rule, calls)
}

// ============================================================================
// SHORT-CIRCUITING
// ============================================================================

#[tokio::test]
async fn test_and_stops_at_first_deny() {
    let (first, first_calls) = counting("first", Ok(false));
    let (second, second_calls) = counting("second", Ok(true));

    let outcome = and([first, second]).evaluate(&input()).await;

    assert!(outcome.is_denied());
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0, "AND must not evaluate past a deny");
}

#[tokio::test]
async fn test_and_stops_at_first_error() {
    let (first, _) = counting("first", Err(RuleError::failed("store offline")));
    let (second, second_calls) = counting("second", Ok(true));

    let outcome = and([first, second]).evaluate(&input()).await;

    assert_eq!(outcome, RuleOutcome::Error(RuleError::failed("store offline")));
    assert_eq!(second_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_and_evaluates_in_declaration_order() {
    let order = Arc::new(parking_lot::Mutex::new(Vec::new()));

    let step = |name: &'static str| {
        let order = order.clone();
        rule(name).cache(CacheMode::NoCache).check(move |_| {
            order.lock().push(name);
            async { Ok(true) }
        })
    };

    let outcome = chain([step("a"), step("b"), step("c")]).evaluate(&input()).await;

    assert!(outcome.is_allowed());
    assert_eq!(*order.lock(), vec!["a", "b", "c"]);
}

#[tokio::test]
async fn test_or_stops_at_first_allow() {
    let (first, first_calls) = counting("first", Ok(true));
    let (second, second_calls) = counting("second", Ok(false));

    let outcome = or([first, second]).evaluate(&input()).await;

    assert!(outcome.is_allowed());
    assert_eq!(first_calls.load(Ordering::SeqCst), 1);
    assert_eq!(second_calls.load(Ordering::SeqCst), 0, "OR must not evaluate past an allow");
}

#[tokio::test]
async fn test_or_recovers_from_error() {
    let (broken, _) = counting("broken", Err(RuleError::lookup("timeout")));
    let (fallback, fallback_calls) = counting("fallback", Ok(true));

    let outcome = or([broken, fallback]).evaluate(&input()).await;

    assert!(outcome.is_allowed());
    assert_eq!(fallback_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_or_keeps_last_deny_reason() {
    let first = rule("first").message("first reason").check(|_| async { Ok(false) });
    let second = rule("second").message("second reason").check(|_| async { Ok(false) });

    let outcome = or([first, second]).evaluate(&input()).await;

    assert_eq!(outcome, RuleOutcome::Deny(DenyReason::forbidden_with("second reason")));
}

// ============================================================================
// NEGATION
// ============================================================================

#[tokio::test]
async fn test_not_inverts_allow_and_deny() {
    let (yes, _) = counting("yes", Ok(true));
    let (no, _) = counting("no", Ok(false));

    assert!(not(yes).evaluate(&input()).await.is_denied());
    assert!(not(no).evaluate(&input()).await.is_allowed());
}

#[tokio::test]
async fn test_not_does_not_turn_error_into_allow() {
    let (broken, _) = counting("broken", Err(RuleError::failed("db down")));

    let outcome = not(broken).evaluate(&input()).await;

    assert_eq!(outcome, RuleOutcome::Error(RuleError::failed("db down")));
}

#[tokio::test]
async fn test_double_negation_keeps_deny_reason() {
    let (plain, _) = counting("plain", Ok(false));
    let with_message = rule("withMessage").message("Members only").check(|_| async { Ok(false) });
    let valid_name = input_rule("hasName")
        .field("name", FieldSpec::string().required())
        .build()
        .unwrap();

    assert_eq!(not(not(plain.clone())).id(), plain.id());

    let outcome = not(not(with_message)).evaluate(&input()).await;
    assert_eq!(outcome, RuleOutcome::Deny(DenyReason::forbidden_with("Members only")));

    let outcome = not(not(valid_name)).evaluate(&input()).await;
    assert!(matches!(outcome, RuleOutcome::Deny(DenyReason::Validation { violations }) if violations.len() == 1));
}

fn leaf(choice: u8) -> (Rule, Result<bool, RuleError>) {
    let result = match choice % 3 {
        0 => Ok(true),
        1 => Ok(false),
        _ => Err(RuleError::failed("unavailable")),
    };
    (counting(&format!("leaf{}", choice), result.clone()).0, result)
}

fn wrap(rule: Rule, depth: usize) -> Rule {
    (0..depth).fold(rule, |rule, _| not(rule))
}

proptest! {
    #[test]
    fn test_double_negation_is_identity(choice in 0u8..30, depth in 0usize..4) {
        tokio_test::block_on(async {
            let (rule, _) = leaf(choice);
            let input = input();

            let plain = wrap(rule.clone(), depth).evaluate(&input).await;
            let doubled = wrap(rule, depth + 2).evaluate(&input).await;

            assert_eq!(plain, doubled);
        });
    }

    #[test]
    fn test_error_survives_any_number_of_negations(depth in 0usize..8) {
        tokio_test::block_on(async {
            let (rule, expected) = leaf(2);
            let outcome = wrap(rule, depth).evaluate(&input()).await;

            assert_eq!(outcome.kind(), OutcomeKind::Error);
            assert_eq!(outcome, RuleOutcome::Error(expected.unwrap_err()));
        });
    }
}
