mod common;

use anyhow::Result;
use daq_router::config::CorrelationConfig;
use daq_router::correlation::{
    nearest_in_time, CatalogQuery, CatalogRecorder, CorrelationCache, MetadataQuery, NearestWithin, RunCatalog,
    SharedCatalog,
};
use daq_router::dataflow::{Combinator, CombinatorExt, DataflowGraph, NodeId, ZipLatest};
use daq_router::document::{DescriptorDoc, Document, EventDoc, StartDoc, StopDoc};
use daq_router::handler::{DocumentHandler, HandlerResult};
use daq_router::router::RunRouter;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Corrected readings, keyed by the light run's uid.
type Results = Arc<Mutex<HashMap<String, Vec<f64>>>>;

/// Subtracts the resolved dark run's `dark_level` from every `det` reading
/// through a zip-latest graph. Without a dark run, readings pass unchanged.
struct DarkSubtract {
    run_uid: String,
    dark_level: Option<f64>,
    graph: DataflowGraph<f64>,
    output: NodeId,
    results: Results,
}

impl DarkSubtract {
    fn new(run_uid: &str, dark_level: Option<f64>, results: Results) -> Self {
        let mut graph = DataflowGraph::new();
        let node = ZipLatest::new("subtract", ["frame", "dark"], "frame")
            .unwrap()
            .map(|t: Vec<Option<f64>>| t[0].unwrap_or(0.0) - t[1].unwrap_or(0.0));
        let output = graph.add_node(node);
        graph.connect_source("frame", output, "frame").unwrap();
        graph.connect_source("dark", output, "dark").unwrap();
        Self {
            run_uid: run_uid.to_string(),
            dark_level,
            graph,
            output,
            results,
        }
    }
}

impl DocumentHandler for DarkSubtract {
    fn start(&mut self, _doc: &StartDoc) -> HandlerResult<StartDoc> {
        if let Some(level) = self.dark_level {
            self.graph.push("dark", level)?;
        }
        Ok(None)
    }

    fn event(&mut self, doc: &EventDoc) -> HandlerResult<EventDoc> {
        let Some(raw) = doc.data.get("det").and_then(Value::as_f64) else {
            return Ok(None);
        };
        let corrected = if self.dark_level.is_some() {
            let out = self.graph.push("frame", raw)?;
            out.into_iter().find(|(n, _)| *n == self.output).map_or(raw, |(_, v)| v)
        } else {
            raw
        };
        self.results.lock().unwrap().entry(self.run_uid.clone()).or_default().push(corrected);
        Ok(None)
    }
}

fn dark_run(uid: &str, time: f64, level: f64) -> StartDoc {
    StartDoc::new()
        .with_uid(uid)
        .with_time(time)
        .with_metadata("is_dark", true)
        .with_metadata("detectors", json!(["det"]))
        .with_metadata("dark_level", level)
}

fn light_run(uid: &str, time: f64) -> StartDoc {
    StartDoc::new()
        .with_uid(uid)
        .with_time(time)
        .with_metadata("detectors", json!(["det"]))
}

fn feed_run(router: &mut RunRouter, start: StartDoc, readings: &[f64]) {
    let descriptor = DescriptorDoc::new(&start.uid, "primary");
    router.route(&Document::Start(start.clone())).unwrap();
    router.route(&Document::Descriptor(descriptor.clone())).unwrap();
    for (i, r) in readings.iter().enumerate() {
        let event = EventDoc::new(&descriptor.uid, i as u64 + 1).with_datum("det", *r);
        router.route(&Document::Event(event)).unwrap();
    }
    router.route(&Document::Stop(StopDoc::success(&start.uid))).unwrap();
}

fn build_router(catalog: SharedCatalog, results: Results) -> RunRouter {
    let config = CorrelationConfig::default();
    let query = CatalogQuery::new(catalog.clone(), MetadataQuery::dark_frames(&config));
    let decider = NearestWithin::from_config(&config);
    let mut cache = CorrelationCache::new();

    let subtract_factory = move |start: &StartDoc| -> Result<Option<Box<dyn DocumentHandler>>> {
        if start.flag(&config.dark_flag) {
            return Ok(None);
        }
        let dark = cache.resolve_at_start(start, &query, &decider)?;
        let level = dark.and_then(|d| d.get("dark_level")).and_then(Value::as_f64);
        Ok(Some(Box::new(DarkSubtract::new(&start.uid, level, results.clone()))))
    };

    RunRouter::new()
        .with_factory("catalog", CatalogRecorder::factory(catalog))
        .with_factory("dark_subtract", subtract_factory)
}

#[test]
fn test_light_run_uses_nearest_completed_dark() {
    let catalog = RunCatalog::shared();
    let results: Results = Arc::default();
    let mut router = build_router(catalog.clone(), results.clone());

    feed_run(&mut router, dark_run("dark-1000", 1000.0, 5.0), &[5.0]);
    feed_run(&mut router, dark_run("dark-1300", 1300.0, 7.0), &[7.0]);
    feed_run(&mut router, light_run("light", 1180.0), &[10.0, 12.0]);

    assert_eq!(catalog.read().len(), 3);
    assert_eq!(results.lock().unwrap()["light"], vec![3.0, 5.0]);
    assert_eq!(router.registry_len(), 0);
}

#[test]
fn test_missing_dark_skips_subtraction() {
    let catalog = RunCatalog::shared();
    let results: Results = Arc::default();
    let mut router = build_router(catalog, results.clone());

    feed_run(&mut router, light_run("light", 50.0), &[10.0, 12.0]);

    assert_eq!(results.lock().unwrap()["light"], vec![10.0, 12.0]);
}

#[test]
fn test_unfinished_dark_is_not_a_candidate() {
    let catalog = RunCatalog::shared();
    let results: Results = Arc::default();
    let mut router = build_router(catalog.clone(), results.clone());

    // Dark run left open while the light run starts
    router.route(&Document::Start(dark_run("dark-open", 99.0, 4.0))).unwrap();
    feed_run(&mut router, light_run("light", 100.0), &[10.0]);

    assert!(!catalog.read().get("dark-open").unwrap().is_complete());
    assert_eq!(results.lock().unwrap()["light"], vec![10.0]);
}

#[test]
fn test_cache_is_released_explicitly() {
    let catalog = RunCatalog::shared();
    catalog.write().insert_start(dark_run("d", 1.0, 1.0));
    catalog.write().record_stop(StopDoc::success("d"));

    let query = CatalogQuery::new(catalog, MetadataQuery::dark_frames(&CorrelationConfig::default()));
    let mut cache = CorrelationCache::new();
    let light = light_run("l", 2.0);

    let resolved = cache.resolve_at_start(&light, &query, &nearest_in_time).unwrap();
    assert_eq!(resolved.map(|d| d.uid.as_str()), Some("d"));
    assert_eq!(cache.len(), 1);
    assert!(cache.release("l"));
    assert!(cache.is_empty());
}

#[test]
fn test_zip_latest_node_is_reusable_outside_a_graph() {
    let mut node = ZipLatest::new("subtract", ["frame", "dark"], "frame").unwrap();
    node.push_named("dark", 1.5).unwrap();
    assert_eq!(node.push_named("frame", 4.0).unwrap(), vec![vec![Some(4.0), Some(1.5)]]);
}
