//! Request-scoped rule outcome cache with in-flight de-duplication

use blake3::Hasher;
use dashmap::DashMap;
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::error::RuleError;
use crate::rule::{CacheMode, RuleId};
use crate::types::{Arguments, RuleOutcome};

/// Cache key type (BLAKE3 hash of rule identity and input fingerprints)
pub type CacheKey = [u8; 32];

/// How a cached lookup was satisfied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLookup {
    /// Outcome was already resolved
    Hit,

    /// Another caller was evaluating the same key; its result was shared
    Joined,

    /// This caller ran the evaluation
    Computed,
}

/// Per-request memo of rule outcomes
///
/// Provides:
/// - At most one concurrent evaluation per key (`OnceCell` per entry)
/// - Shared outcome for every concurrent caller of the same key
/// - No storage of outcomes whose evaluation was cancelled
///
/// Owned by a single [`EvaluationContext`](crate::EvaluationContext) and
/// dropped with it.
pub struct RequestCache {
    entries: DashMap<CacheKey, Arc<OnceCell<RuleOutcome>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
    joins: AtomicUsize,
}

impl RequestCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            joins: AtomicUsize::new(0),
        }
    }

    /// Compute the key for a rule evaluated on the given inputs
    ///
    /// `Contextual` rules ignore parent and arguments; `Strict` rules include
    /// both. `NoCache` rules are never looked up but hash like `Strict`.
    pub fn compute_key(
        rule: &RuleId,
        mode: CacheMode,
        parent: &Value,
        arguments: &Arguments,
    ) -> CacheKey {
        let mut hasher = Hasher::new();

        // Hash rule identity
        hasher.update(rule.as_str().as_bytes());
        hasher.update(&[0]);

        if mode != CacheMode::Contextual {
            // serde_json maps are ordered, so the rendering is canonical
            hasher.update(parent.to_string().as_bytes());
            hasher.update(&[0]);

            for (name, value) in arguments {
                hasher.update(name.as_bytes());
                hasher.update(&[1]);
                hasher.update(value.to_string().as_bytes());
                hasher.update(&[0]);
            }
        }

        *hasher.finalize().as_bytes()
    }

    /// Return the outcome for `key`, running `compute` only if no other
    /// caller has resolved or is resolving it
    ///
    /// If `cancel` fires before the evaluation finishes, the evaluation is
    /// dropped, nothing is stored and `Error(Cancelled)` is returned.
    pub async fn get_or_compute<F, Fut>(
        &self,
        key: CacheKey,
        cancel: &CancellationToken,
        compute: F,
    ) -> (RuleOutcome, CacheLookup)
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = RuleOutcome>,
    {
        if cancel.is_cancelled() {
            return (RuleOutcome::Error(RuleError::Cancelled), CacheLookup::Computed);
        }

        // Clone the cell out so no map shard lock is held across the await
        let cell = self
            .entries
            .entry(key)
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();

        if let Some(outcome) = cell.get() {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return (outcome.clone(), CacheLookup::Hit);
        }

        let computed = AtomicBool::new(false);
        let computed_ref = &computed;

        let result = cell
            .get_or_try_init(|| async move {
                computed_ref.store(true, Ordering::Relaxed);
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => Err(RuleError::Cancelled),
                    outcome = compute() => Ok(outcome),
                }
            })
            .await;

        match result {
            Ok(outcome) => {
                let lookup = if computed.load(Ordering::Relaxed) {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    CacheLookup::Computed
                } else {
                    self.joins.fetch_add(1, Ordering::Relaxed);
                    CacheLookup::Joined
                };
                (outcome.clone(), lookup)
            }
            Err(err) => {
                // Drop the empty cell unless someone else filled it meanwhile
                self.entries
                    .remove_if(&key, |_, cell| cell.get().is_none());
                (RuleOutcome::Error(err), CacheLookup::Computed)
            }
        }
    }

    /// Resolved outcome for `key`, if any
    pub fn get(&self, key: &CacheKey) -> Option<RuleOutcome> {
        self.entries.get(key).and_then(|cell| cell.get().cloned())
    }

    /// Number of resolved entries
    pub fn len(&self) -> usize {
        self.entries
            .iter()
            .filter(|entry| entry.value().initialized())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.entries.clear();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            joins: self.joins.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for RequestCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
    pub joins: usize,
    pub entries: usize,
}

impl CacheStats {
    /// Share of lookups that did not run an evaluation
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.joins + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits + self.joins) as f64 / total as f64
        }
    }
}
