use std::collections::HashMap;
use std::sync::Arc;

use crate::core::similarity_metric::Metric;
use crate::core::trace::Trace;

/// Cache of per-width scan results, keyed by `(width, metric)`.
///
/// A cache is bound to one trace at a time. Any access with a different trace
/// (by [`Trace::id`]) drops every entry before proceeding, so stale profiles
/// can never leak across traces.
#[derive(Debug)]
pub struct ProfileCache<V> {
    trace_id: Option<u64>,
    entries: HashMap<(usize, Metric), Arc<V>>,
    hits: usize,
    misses: usize,
}

impl<V> Default for ProfileCache<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> ProfileCache<V> {
    pub fn new() -> Self {
        Self {
            trace_id: None,
            entries: HashMap::new(),
            hits: 0,
            misses: 0,
        }
    }

    /// Bind the cache to `trace`, clearing it if it held another trace.
    pub fn bind(&mut self, trace: &Trace) {
        if self.trace_id != Some(trace.id()) {
            if !self.entries.is_empty() {
                tracing::debug!(
                    entries = self.entries.len(),
                    "trace changed, invalidating profile cache"
                );
            }
            self.entries.clear();
            self.trace_id = Some(trace.id());
        }
    }

    /// Drop all entries.
    pub fn invalidate(&mut self) {
        self.entries.clear();
        self.trace_id = None;
    }

    /// Cached value for `(width, metric)` on `trace`, if any.
    pub fn get(&mut self, trace: &Trace, width: usize, metric: Metric) -> Option<Arc<V>> {
        let found = if self.trace_id == Some(trace.id()) {
            self.entries.get(&(width, metric)).cloned()
        } else {
            None
        };
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }

    /// Like [`get`](Self::get), but an entry failing `valid` counts as a miss
    /// and is not returned.
    pub fn get_valid<F>(
        &mut self,
        trace: &Trace,
        width: usize,
        metric: Metric,
        valid: F,
    ) -> Option<Arc<V>>
    where
        F: FnOnce(&V) -> bool,
    {
        let found = if self.trace_id == Some(trace.id()) {
            self.entries
                .get(&(width, metric))
                .filter(|v| valid(v.as_ref()))
                .cloned()
        } else {
            None
        };
        match found {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        found
    }

    /// Store `value` for `(width, metric)`, replacing any previous entry.
    pub fn insert(&mut self, trace: &Trace, width: usize, metric: Metric, value: V) -> Arc<V> {
        self.bind(trace);
        let value = Arc::new(value);
        self.entries.insert((width, metric), Arc::clone(&value));
        value
    }

    /// Return the cached value or compute and store it.
    ///
    /// `compute` returning `None` is passed through and not cached.
    pub fn get_or_insert_with<F>(
        &mut self,
        trace: &Trace,
        width: usize,
        metric: Metric,
        compute: F,
    ) -> Option<Arc<V>>
    where
        F: FnOnce() -> Option<V>,
    {
        self.bind(trace);
        if let Some(v) = self.entries.get(&(width, metric)) {
            self.hits += 1;
            return Some(Arc::clone(v));
        }
        self.misses += 1;
        let value = Arc::new(compute()?);
        self.entries.insert((width, metric), Arc::clone(&value));
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// `(hits, misses)` since construction.
    pub fn stats(&self) -> (usize, usize) {
        (self.hits, self.misses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_hit_and_miss() {
        let trace = Trace::new(vec![0.0; 8], 1.0).unwrap();
        let mut cache: ProfileCache<Vec<f32>> = ProfileCache::new();

        let mut calls = 0;
        let a = cache
            .get_or_insert_with(&trace, 4, Metric::Sad, || {
                calls += 1;
                Some(vec![1.0])
            })
            .unwrap();
        let b = cache
            .get_or_insert_with(&trace, 4, Metric::Sad, || {
                calls += 1;
                Some(vec![2.0])
            })
            .unwrap();
        assert_eq!(calls, 1);
        assert_eq!(a, b);
        assert_eq!(cache.stats(), (1, 1));

        // Different metric is a different key
        assert!(cache.get(&trace, 4, Metric::Correlation).is_none());
    }

    #[test]
    fn test_cache_invalidates_on_trace_change() {
        let t1 = Trace::new(vec![0.0; 8], 1.0).unwrap();
        let t2 = Trace::new(vec![0.0; 8], 1.0).unwrap();
        let mut cache: ProfileCache<u32> = ProfileCache::new();

        cache.get_or_insert_with(&t1, 4, Metric::Sad, || Some(1));
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&t2, 4, Metric::Sad).is_none());

        let v = cache.get_or_insert_with(&t2, 4, Metric::Sad, || Some(2)).unwrap();
        assert_eq!(*v, 2);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&t1, 4, Metric::Sad).is_none());
    }

    #[test]
    fn test_none_is_not_cached() {
        let trace = Trace::new(vec![0.0; 8], 1.0).unwrap();
        let mut cache: ProfileCache<u32> = ProfileCache::new();
        assert!(cache.get_or_insert_with(&trace, 4, Metric::Sad, || None).is_none());
        assert!(cache.is_empty());

        cache.get_or_insert_with(&trace, 4, Metric::Sad, || Some(3));
        cache.invalidate();
        assert!(cache.is_empty());
    }

    #[test]
    fn test_insert_replaces() {
        let trace = Trace::new(vec![0.0; 8], 1.0).unwrap();
        let mut cache: ProfileCache<u32> = ProfileCache::new();
        cache.insert(&trace, 8, Metric::Correlation, 1);
        cache.insert(&trace, 8, Metric::Correlation, 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get(&trace, 8, Metric::Correlation).as_deref(), Some(&2));
        assert_eq!(cache.stats(), (1, 0));
    }

    #[test]
    fn test_get_valid_rejects_stale_entry() {
        let trace = Trace::new(vec![0.0; 8], 1.0).unwrap();
        let mut cache: ProfileCache<u32> = ProfileCache::new();
        cache.insert(&trace, 8, Metric::Sad, 7);
        assert!(cache.get_valid(&trace, 8, Metric::Sad, |&v| v == 6).is_none());
        assert_eq!(cache.get_valid(&trace, 8, Metric::Sad, |&v| v == 7).as_deref(), Some(&7));
        assert_eq!(cache.stats(), (1, 1));
    }
}
