//! Compiled-rule cache keyed by rule source text
//!
//! Read-mostly: lookups take a shared lock, and the exclusive lock is only
//! taken when a new rule text appears or a rule text disappears from the
//! registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::ParseError;
use crate::rule::CompiledRule;

/// Result of compiling one rule text; compile failures are cached too
pub type CompiledEntry = Arc<Result<CompiledRule, ParseError>>;

/// Shared cache of compiled selection rules
#[derive(Default)]
pub struct RuleCache {
    entries: RwLock<HashMap<String, CompiledEntry>>,
    compilations: AtomicU64,
}

impl RuleCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Compiled form of `source`, compiling it on first use
    pub fn get_or_compile(&self, source: &str) -> CompiledEntry {
        if let Some(entry) = self.entries.read().get(source) {
            return entry.clone();
        }

        let mut entries = self.entries.write();
        // Another caller may have compiled it while we waited for the lock
        if let Some(entry) = entries.get(source) {
            return entry.clone();
        }

        self.compilations.fetch_add(1, Ordering::Relaxed);
        let compiled = CompiledRule::compile(source);
        if let Err(e) = &compiled {
            warn!(rule = %source, error = %e, "Selection rule does not compile");
        }
        let entry = Arc::new(compiled);
        entries.insert(source.to_string(), entry.clone());
        entry
    }

    /// Drop every cached rule whose text is not in `live`.
    ///
    /// Called with the rule texts of the current registry snapshot, so a
    /// provider that changes its rules does not leave stale entries behind.
    pub fn retain_live<'a>(&self, live: impl IntoIterator<Item = &'a str>) {
        let live: HashSet<&str> = live.into_iter().collect();
        let stale = self
            .entries
            .read()
            .keys()
            .any(|k| !live.contains(k.as_str()));
        if !stale {
            return;
        }
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|k, _| live.contains(k.as_str()));
        debug!(evicted = before - entries.len(), "Evicted stale selection rules");
    }

    /// Number of cached rule texts
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache is empty
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Total compilations performed since creation
    pub fn compilations(&self) -> u64 {
        self.compilations.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compiles_each_text_once() {
        let cache = RuleCache::new();
        for _ in 0..5 {
            assert!(cache.get_or_compile("spec.engine.type == \"vllm\"").is_ok());
        }
        assert_eq!(cache.compilations(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn compile_failures_are_cached() {
        let cache = RuleCache::new();
        assert!(cache.get_or_compile("spec.engine.type ==").is_err());
        assert!(cache.get_or_compile("spec.engine.type ==").is_err());
        assert_eq!(cache.compilations(), 1);
    }

    /// Story: a provider upgrades and changes its rule text. The old text is
    /// evicted on the next pass; the unchanged rule stays compiled.
    #[test]
    fn story_rule_text_change_evicts_old_entry() {
        let cache = RuleCache::new();
        cache.get_or_compile("true");
        cache.get_or_compile("spec.serving.mode == \"aggregated\"");
        assert_eq!(cache.len(), 2);

        cache.retain_live(["true", "spec.serving.mode == \"disaggregated\""]);
        assert_eq!(cache.len(), 1);

        cache.get_or_compile("true");
        assert_eq!(cache.compilations(), 2);
    }

    #[test]
    fn concurrent_lookups_share_one_compilation() {
        let cache = Arc::new(RuleCache::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                std::thread::spawn(move || cache.get_or_compile("1 < 2").is_ok())
            })
            .collect();
        for h in handles {
            assert!(h.join().expect("thread"));
        }
        assert_eq!(cache.compilations(), 1);
    }
}
