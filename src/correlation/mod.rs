//! Correlation Resolver
//!
//! Associates a run with an auxiliary run (dark frame, background) seen
//! earlier in the stream. The resolver knows nothing about *how* candidates
//! are found; that is the job of an injected [`Query`]. It only knows how to
//! pick among them with a [`Decider`].
//!
//! ```text
//! StartDoc ──> Query ──> [candidates] ──> Decider ──> Option<StartDoc>
//! ```
//!
//! An empty candidate list is the normal "no auxiliary data available" case
//! and yields `Ok(None)`. Callers skip the dependent step instead of failing.
//!
//! The resolver performs no caching; see [`CorrelationCache`] for per-run
//! memoisation.

mod cache;
mod catalog;

pub use cache::CorrelationCache;
pub use catalog::{CatalogEntry, CatalogQuery, CatalogRecorder, MetadataQuery, RunCatalog, SharedCatalog};

use crate::config::CorrelationConfig;
use crate::document::StartDoc;
use thiserror::Error;
use tracing::debug;

/// Errors raised while resolving a correlation.
#[derive(Debug, Error)]
pub enum CorrelationError {
    /// The injected query failed
    #[error("query for run '{run_uid}' failed: {source:#}")]
    Query {
        /// Run being resolved
        run_uid: String,
        /// Query failure
        #[source]
        source: anyhow::Error,
    },
}

/// Finds candidate auxiliary runs for a run.
pub trait Query {
    /// Candidates for `start`, in preference order for ties.
    fn query(&self, start: &StartDoc) -> anyhow::Result<Vec<StartDoc>>;
}

impl<F> Query for F
where
    F: Fn(&StartDoc) -> anyhow::Result<Vec<StartDoc>>,
{
    fn query(&self, start: &StartDoc) -> anyhow::Result<Vec<StartDoc>> {
        self(start)
    }
}

/// Picks at most one candidate.
pub trait Decider {
    /// Choose one of `candidates` for `start`, or none.
    fn decide(&self, candidates: Vec<StartDoc>, start: &StartDoc) -> Option<StartDoc>;
}

impl<F> Decider for F
where
    F: Fn(Vec<StartDoc>, &StartDoc) -> Option<StartDoc>,
{
    fn decide(&self, candidates: Vec<StartDoc>, start: &StartDoc) -> Option<StartDoc> {
        self(candidates, start)
    }
}

/// Resolve the auxiliary run for `start`.
///
/// # Errors
///
/// Only a failing query is an error; "no candidate" is `Ok(None)`.
pub fn resolve<Q, D>(start: &StartDoc, query: &Q, decider: &D) -> Result<Option<StartDoc>, CorrelationError>
where
    Q: Query + ?Sized,
    D: Decider + ?Sized,
{
    let candidates = query.query(start).map_err(|source| CorrelationError::Query {
        run_uid: start.uid.clone(),
        source,
    })?;
    let count = candidates.len();
    let chosen = decider.decide(candidates, start);

    match &chosen {
        Some(aux) => debug!(
            run_uid = %start.uid,
            candidates = count,
            resolved = %aux.uid,
            delta_s = (aux.time - start.time).abs(),
            "Resolved auxiliary run"
        ),
        None => debug!(run_uid = %start.uid, candidates = count, "No auxiliary run available"),
    }
    Ok(chosen)
}

/// Pick the candidate whose start time is closest to the run's.
///
/// Ties go to the candidate that appears first in `candidates`. Candidates
/// with a non-finite time are ignored, and a run whose own time is non-finite
/// gets no match.
pub fn nearest_in_time(candidates: Vec<StartDoc>, start: &StartDoc) -> Option<StartDoc> {
    if !start.time.is_finite() {
        return None;
    }
    let mut best: Option<(f64, StartDoc)> = None;
    for candidate in candidates {
        if !candidate.time.is_finite() {
            continue;
        }
        let delta = (candidate.time - start.time).abs();
        match &best {
            Some((best_delta, _)) if delta >= *best_delta => {}
            _ => best = Some((delta, candidate)),
        }
    }
    best.map(|(_, candidate)| candidate)
}

/// [`nearest_in_time`], rejecting candidates further away than `max_delta_s`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NearestWithin {
    /// Largest accepted distance, in seconds
    pub max_delta_s: f64,
}

impl NearestWithin {
    /// Decider accepting matches within `max_delta_s` seconds.
    pub fn new(max_delta_s: f64) -> Self {
        Self { max_delta_s }
    }

    /// Bounded by `max_time_delta_s` when set, otherwise unbounded.
    pub fn from_config(config: &CorrelationConfig) -> Self {
        Self::new(config.max_time_delta_s.unwrap_or(f64::INFINITY))
    }
}

impl Decider for NearestWithin {
    fn decide(&self, candidates: Vec<StartDoc>, start: &StartDoc) -> Option<StartDoc> {
        nearest_in_time(candidates, start).filter(|c| (c.time - start.time).abs() <= self.max_delta_s)
    }
}
