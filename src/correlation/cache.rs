//! Per-run memoisation of resolved correlations.

use super::{resolve, CorrelationError, Decider, Query};
use crate::document::StartDoc;
use std::collections::HashMap;

/// Resolves once at a run's start and reuses the answer until its stop.
///
/// "No auxiliary run" is cached too, so an empty query is not repeated for
/// every event of the run.
#[derive(Debug, Default)]
pub struct CorrelationCache {
    resolved: HashMap<String, Option<StartDoc>>,
}

impl CorrelationCache {
    /// Empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve for `start` unless already cached, returning the cached answer.
    pub fn resolve_at_start<Q, D>(
        &mut self,
        start: &StartDoc,
        query: &Q,
        decider: &D,
    ) -> Result<Option<&StartDoc>, CorrelationError>
    where
        Q: Query + ?Sized,
        D: Decider + ?Sized,
    {
        if !self.resolved.contains_key(&start.uid) {
            let chosen = resolve(start, query, decider)?;
            self.resolved.insert(start.uid.clone(), chosen);
        }
        Ok(self.get(&start.uid).flatten())
    }

    /// Outer `None`: never resolved. Inner `None`: resolved, nothing found.
    pub fn get(&self, run_uid: &str) -> Option<Option<&StartDoc>> {
        self.resolved.get(run_uid).map(Option::as_ref)
    }

    /// Drop the cached answer for a finished run.
    pub fn release(&mut self, run_uid: &str) -> bool {
        self.resolved.remove(run_uid).is_some()
    }

    /// Runs with a cached answer.
    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    /// True when nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::nearest_in_time;
    use std::cell::Cell;

    #[test]
    fn test_query_runs_once_per_run() {
        let calls = Cell::new(0);
        let query = |_start: &StartDoc| -> anyhow::Result<Vec<StartDoc>> {
            calls.set(calls.get() + 1);
            Ok(vec![StartDoc::new().with_uid("dark").with_time(5.0)])
        };
        let mut cache = CorrelationCache::new();
        let run = StartDoc::new().with_time(4.0);

        for _ in 0..3 {
            let found = cache.resolve_at_start(&run, &query, &nearest_in_time).unwrap();
            assert_eq!(found.map(|s| s.uid.as_str()), Some("dark"));
        }
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_empty_result_is_cached_and_released() {
        let query = |_start: &StartDoc| -> anyhow::Result<Vec<StartDoc>> { Ok(Vec::new()) };
        let mut cache = CorrelationCache::new();
        let run = StartDoc::new();

        assert!(cache.resolve_at_start(&run, &query, &nearest_in_time).unwrap().is_none());
        assert_eq!(cache.get(&run.uid), Some(None));
        assert!(cache.release(&run.uid));
        assert_eq!(cache.get(&run.uid), None);
        assert!(cache.is_empty());
    }
}
