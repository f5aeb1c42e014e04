//! In-memory memoization of orchestrator results with hash-based keys.
//!
//! A key is a BLAKE3 hash over everything that determines a result: the
//! return matrix, the benchmark matrix, the objective, the replicate or
//! dataset count, the seed and the engine settings. Differing inputs never
//! share a key. Entries live until `invalidate` or `clear`.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use portopt_core::{ObjectiveChoice, ReturnMatrix};

use crate::config::{EngineConfig, RunKey};
use crate::orchestrator::RunKind;

fn kind_tag(kind: RunKind) -> &'static str {
    match kind {
        RunKind::Single => "single",
        RunKind::Bootstrap => "bootstrap",
        RunKind::Imputed => "imputed",
    }
}

/// Inputs that identify one cached computation.
#[derive(Debug, Clone, Copy)]
pub struct CacheKeyInputs<'a> {
    pub kind: RunKind,
    pub objective: &'a ObjectiveChoice,
    pub returns: &'a ReturnMatrix,
    pub benchmark: Option<&'a ReturnMatrix>,
    /// Replicate or dataset count (ignored for single runs).
    pub count: usize,
    pub seed: Option<u64>,
    pub config: &'a EngineConfig,
}

impl CacheKeyInputs<'_> {
    /// Content hash of every input.
    pub fn key(&self) -> RunKey {
        let mut hasher = blake3::Hasher::new();
        hasher.update(kind_tag(self.kind).as_bytes());
        hasher.update(b"\0");
        hasher.update(serde_json::to_string(self.objective).unwrap_or_default().as_bytes());
        hasher.update(b"\0");
        hasher.update(self.returns.content_hash().as_bytes());
        hasher.update(b"\0");
        match self.benchmark {
            Some(b) => hasher.update(b.content_hash().as_bytes()),
            None => hasher.update(b"-"),
        };
        hasher.update(&(self.count as u64).to_le_bytes());
        match self.seed {
            Some(s) => hasher.update(&s.to_le_bytes()),
            None => hasher.update(b"entropy"),
        };
        hasher.update(self.config.content_hash().as_bytes());
        hasher.finalize().to_hex().to_string()
    }
}

/// Thread-safe memo cache. Never global: callers own an instance.
#[derive(Debug)]
pub struct MemoCache<V> {
    entries: Mutex<HashMap<RunKey, V>>,
}

impl<V: Clone> Default for MemoCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V: Clone> MemoCache<V> {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Checks if a result is cached for the given key.
    pub fn contains(&self, key: &str) -> bool {
        self.lock().contains_key(key)
    }

    /// Retrieves a cached result by key.
    pub fn get(&self, key: &str) -> Option<V> {
        self.lock().get(key).cloned()
    }

    /// Stores a result, replacing any previous entry.
    pub fn put(&self, key: RunKey, value: V) {
        self.lock().insert(key, value);
    }

    /// Cached value, or compute and return it, storing it only when `keep`
    /// accepts it.
    ///
    /// Errors are returned as-is and not cached.
    pub fn get_or_try_insert<E>(
        &self,
        key: RunKey,
        compute: impl FnOnce() -> Result<V, E>,
        keep: impl FnOnce(&V) -> bool,
    ) -> Result<V, E> {
        if let Some(hit) = self.get(&key) {
            tracing::debug!(%key, "memo cache hit");
            return Ok(hit);
        }
        let value = compute()?;
        if keep(&value) {
            self.put(key, value.clone());
        } else {
            tracing::debug!(%key, "result not cached");
        }
        Ok(value)
    }

    /// Removes one entry. Returns whether it existed.
    pub fn invalidate(&self, key: &str) -> bool {
        self.lock().remove(key).is_some()
    }

    /// Removes every entry.
    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<RunKey, V>> {
        // Poisoning is ignored; entries are inserted whole.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn matrix(values: &[f64]) -> ReturnMatrix {
        let start = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let dates = (0..values.len())
            .map(|i| start + chrono::Duration::days(i as i64))
            .collect();
        ReturnMatrix::from_columns(dates, vec![("a".into(), values.to_vec())]).unwrap()
    }

    fn key_for(returns: &ReturnMatrix, count: usize, seed: Option<u64>) -> RunKey {
        CacheKeyInputs {
            kind: RunKind::Bootstrap,
            objective: &ObjectiveChoice::MaxSharpe,
            returns,
            benchmark: None,
            count,
            seed,
            config: &EngineConfig::default(),
        }
        .key()
    }

    #[test]
    fn keys_cover_every_input() {
        let m = matrix(&[0.01, 0.02, -0.01]);
        let base = key_for(&m, 100, Some(1));
        assert_eq!(base, key_for(&m, 100, Some(1)));
        assert_ne!(base, key_for(&m, 101, Some(1)));
        assert_ne!(base, key_for(&m, 100, Some(2)));
        assert_ne!(base, key_for(&m, 100, None));
        assert_ne!(base, key_for(&matrix(&[0.01, 0.02, -0.02]), 100, Some(1)));
    }

    #[test]
    fn put_get_invalidate_clear() {
        let cache: MemoCache<Option<Vec<f64>>> = MemoCache::new();
        assert!(cache.is_empty());
        cache.put("k1".into(), Some(vec![0.5, 0.5]));
        cache.put("k2".into(), None);
        assert!(cache.contains("k1"));
        assert_eq!(cache.get("k2"), Some(None));

        assert!(cache.invalidate("k1"));
        assert!(!cache.invalidate("k1"));
        assert_eq!(cache.len(), 1);

        cache.clear();
        assert!(cache.is_empty());
    }

    #[test]
    fn get_or_try_insert_computes_once() {
        let cache: MemoCache<u32> = MemoCache::new();
        let mut calls = 0;
        let first: Result<u32, ()> = cache.get_or_try_insert(
            "k".into(),
            || {
                calls += 1;
                Ok(7)
            },
            |_| true,
        );
        assert_eq!(first, Ok(7));
        let second: Result<u32, ()> = cache.get_or_try_insert(
            "k".into(),
            || {
                calls += 1;
                Ok(8)
            },
            |_| true,
        );
        assert_eq!(second, Ok(7));
        assert_eq!(calls, 1);

        let failed: Result<u32, &str> = cache.get_or_try_insert("e".into(), || Err("boom"), |_| true);
        assert_eq!(failed, Err("boom"));
        assert!(!cache.contains("e"));
    }

    #[test]
    fn rejected_values_are_returned_but_not_stored() {
        let cache: MemoCache<u32> = MemoCache::new();
        let out: Result<u32, ()> = cache.get_or_try_insert("k".into(), || Ok(3), |v| *v > 5);
        assert_eq!(out, Ok(3));
        assert!(!cache.contains("k"));
        let out: Result<u32, ()> = cache.get_or_try_insert("k".into(), || Ok(9), |v| *v > 5);
        assert_eq!(out, Ok(9));
        assert_eq!(cache.get("k"), Some(9));
    }
}
