//! In-memory catalog of runs seen so far, and the metadata queries run against it.

use super::Query;
use crate::config::CorrelationConfig;
use crate::document::{StartDoc, StopDoc};
use crate::handler::{CallbackFactory, DocumentHandler, HandlerResult};
use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

/// Catalog shared between the recorder that fills it and the queries reading it.
pub type SharedCatalog = Arc<RwLock<RunCatalog>>;

/// One historical run.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogEntry {
    /// Start of the run
    pub start: StartDoc,
    /// Stop, once seen
    pub stop: Option<StopDoc>,
}

impl CatalogEntry {
    /// True once the stop was recorded.
    pub fn is_complete(&self) -> bool {
        self.stop.is_some()
    }
}

/// Runs in the order their start documents were recorded.
#[derive(Debug, Default)]
pub struct RunCatalog {
    entries: Vec<CatalogEntry>,
    index: HashMap<String, usize>,
}

impl RunCatalog {
    /// Empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty catalog behind a lock, for sharing between factories.
    pub fn shared() -> SharedCatalog {
        Arc::new(RwLock::new(Self::new()))
    }

    /// Record a run. Returns `false` if the run was already known; the first
    /// start document is kept.
    pub fn insert_start(&mut self, start: StartDoc) -> bool {
        if self.index.contains_key(&start.uid) {
            return false;
        }
        self.index.insert(start.uid.clone(), self.entries.len());
        self.entries.push(CatalogEntry { start, stop: None });
        true
    }

    /// Mark a run complete. Returns `false` for unknown runs.
    pub fn record_stop(&mut self, stop: StopDoc) -> bool {
        match self.index.get(&stop.run_start) {
            Some(&i) => {
                self.entries[i].stop = Some(stop);
                true
            }
            None => false,
        }
    }

    /// Entry for run `uid`.
    pub fn get(&self, uid: &str) -> Option<&CatalogEntry> {
        self.index.get(uid).map(|&i| &self.entries[i])
    }

    /// Recorded runs.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no run was recorded.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in recording order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    /// Start documents of every entry matching `query` for the run `start`,
    /// in recording order.
    pub fn search(&self, query: &MetadataQuery, start: &StartDoc) -> Vec<StartDoc> {
        self.entries
            .iter()
            .filter(|entry| query.matches(entry, start))
            .map(|entry| entry.start.clone())
            .collect()
    }
}

/// Metadata predicate evaluated relative to the requesting run.
///
/// A candidate matches when:
/// - it is not the requesting run itself,
/// - it is complete (if `completed_only`),
/// - every `require` key holds exactly the given value,
/// - every `match_fields` key holds the same value as in the requesting run
///   (absent on both sides counts as equal).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataQuery {
    /// Metadata a candidate must carry with exactly these values
    pub require: Map<String, Value>,
    /// Fields that must equal the run's own value
    pub match_fields: Vec<String>,
    /// Skip runs without a stop
    pub completed_only: bool,
}

impl MetadataQuery {
    /// Query matching every run.
    pub fn new() -> Self {
        Self::default()
    }

    /// Dark-frame runs sharing the configured match fields.
    pub fn dark_frames(config: &CorrelationConfig) -> Self {
        Self::flagged(&config.dark_flag, config)
    }

    /// Background runs sharing the configured match fields.
    pub fn backgrounds(config: &CorrelationConfig) -> Self {
        Self::flagged(&config.background_flag, config)
    }

    fn flagged(flag: &str, config: &CorrelationConfig) -> Self {
        let mut query = Self::new().require(flag, true).completed_only(config.completed_only);
        for field in &config.match_fields {
            query = query.match_field(field);
        }
        query
    }

    /// Require `key` to equal `value`.
    pub fn require(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.require.insert(key.to_string(), value.into());
        self
    }

    /// Require `key` to equal the run's own value.
    pub fn match_field(mut self, key: &str) -> Self {
        self.match_fields.push(key.to_string());
        self
    }

    /// Only accept completed runs.
    pub fn completed_only(mut self, completed_only: bool) -> Self {
        self.completed_only = completed_only;
        self
    }

    /// Whether `entry` is a candidate for `start`.
    pub fn matches(&self, entry: &CatalogEntry, start: &StartDoc) -> bool {
        let candidate = &entry.start;
        if candidate.uid == start.uid {
            return false;
        }
        if self.completed_only && !entry.is_complete() {
            return false;
        }
        self.require
            .iter()
            .all(|(key, value)| candidate.get(key) == Some(value))
            && self
                .match_fields
                .iter()
                .all(|key| candidate.get(key) == start.get(key))
    }
}

/// A [`Query`] backed by a shared catalog.
#[derive(Debug, Clone)]
pub struct CatalogQuery {
    catalog: SharedCatalog,
    query: MetadataQuery,
}

impl CatalogQuery {
    /// Run `query` against `catalog` on every lookup.
    pub fn new(catalog: SharedCatalog, query: MetadataQuery) -> Self {
        Self { catalog, query }
    }
}

impl Query for CatalogQuery {
    fn query(&self, start: &StartDoc) -> anyhow::Result<Vec<StartDoc>> {
        Ok(self.catalog.read().search(&self.query, start))
    }
}

/// Records every run it is attached to into a shared catalog.
pub struct CatalogRecorder {
    catalog: SharedCatalog,
}

impl CatalogRecorder {
    /// Recorder writing into `catalog`.
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// Factory that attaches a recorder to every run.
    pub fn factory(catalog: SharedCatalog) -> impl CallbackFactory {
        move |_start: &StartDoc| -> anyhow::Result<Option<Box<dyn DocumentHandler>>> {
            Ok(Some(Box::new(CatalogRecorder::new(catalog.clone()))))
        }
    }
}

impl DocumentHandler for CatalogRecorder {
    fn name(&self) -> &str {
        "catalog_recorder"
    }

    fn start(&mut self, doc: &StartDoc) -> HandlerResult<StartDoc> {
        if self.catalog.write().insert_start(doc.clone()) {
            trace!(run_uid = %doc.uid, "Run recorded in catalog");
        }
        Ok(None)
    }

    fn stop(&mut self, doc: &StopDoc) -> HandlerResult<StopDoc> {
        self.catalog.write().record_stop(doc.clone());
        Ok(None)
    }
}
