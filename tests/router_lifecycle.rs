mod common;

use anyhow::{anyhow, Result};
use common::{accept_all, recording_factory, seen_for, RunDocs, SeenLog};
use daq_router::document::{
    DatumDoc, DescriptorDoc, Document, DocumentKind, EventDoc, EventPage, ResourceDoc, StartDoc, StopDoc,
};
use daq_router::handler::{DocumentHandler, HandlerResult};
use daq_router::router::{RouteOutcome, RunRouter};
use proptest::prelude::*;
use serde_json::json;
use tracing_test::traced_test;

fn route_all(router: &mut RunRouter, docs: &[Document]) -> Vec<RouteOutcome> {
    docs.iter().map(|d| router.route(d).unwrap()).collect()
}

#[test]
fn test_end_to_end_dark_run_is_never_delivered() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new()
        .with_factory("light_only", recording_factory(log.clone(), |s: &StartDoc| !s.flag("dark")));

    let r1 = StartDoc::new().with_uid("R1").with_metadata("dark", true);
    let r2 = RunDocs::new(StartDoc::new().with_uid("R2"), 5);

    let mut stream = vec![Document::Start(r1.clone())];
    stream.push(Document::Start(r2.start.clone()));
    stream.push(Document::Descriptor(r2.descriptor.clone()));
    stream.extend(r2.events.iter().cloned().map(Document::Event));
    stream.push(Document::Stop(r2.stop.clone()));
    stream.push(Document::Stop(StopDoc::success("R1")));

    let outcomes = route_all(&mut router, &stream);
    assert_eq!(outcomes[0], RouteOutcome::Unclaimed { run_uid: "R1".into() });
    assert_eq!(outcomes.last(), Some(&RouteOutcome::StopWithoutRun { run_uid: "R1".into() }));

    let r2_docs = seen_for(&log, "R2");
    let events = r2_docs.iter().filter(|d| d.kind() == DocumentKind::Event).count();
    assert_eq!(events, 5);
    assert!(seen_for(&log, "R1").is_empty());

    assert!(!router.references_run("R1"));
    assert!(!router.references_run("R2"));
    assert_eq!(router.registry_len(), 0);
}

#[test]
fn test_interleaved_runs_stay_isolated() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));

    let a = RunDocs::new(StartDoc::new().with_uid("A"), 3);
    let b = RunDocs::new(StartDoc::new().with_uid("B"), 2);
    let (da, db) = (a.documents(), b.documents());

    // A start, B start, A desc, B desc, A e1, B e1, ...
    let mut stream = Vec::new();
    for i in 0..da.len().max(db.len()) {
        stream.extend(da.get(i).cloned());
        stream.extend(db.get(i).cloned());
    }
    route_all(&mut router, &stream);

    assert_eq!(seen_for(&log, "A"), da);
    assert_eq!(seen_for(&log, "B"), db);
    assert_eq!(router.registry_len(), 0);
}

#[test]
fn test_teardown_removes_every_registry_entry() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));

    let start = StartDoc::new();
    let primary = DescriptorDoc::new(&start.uid, "primary");
    let baseline = DescriptorDoc::new(&start.uid, "baseline");
    let resource = ResourceDoc::new(&start.uid, "AD_TIFF", "scan/0001");

    router.route(&Document::Start(start.clone())).unwrap();
    router.route(&Document::Descriptor(primary.clone())).unwrap();
    router.route(&Document::Descriptor(baseline.clone())).unwrap();
    router.route(&Document::Resource(resource.clone())).unwrap();
    assert_eq!(router.descriptor_owner(&primary.uid), Some(start.uid.as_str()));
    assert_eq!(router.resource_owner(&resource.uid), Some(start.uid.as_str()));
    assert_eq!(router.registry_len(), 4);

    let outcome = router.route(&Document::Stop(StopDoc::abort(&start.uid, "user"))).unwrap();
    assert!(matches!(outcome, RouteOutcome::Closed { handlers: 1, .. }));
    assert_eq!(router.registry_len(), 0);
    assert!(!router.is_open(&start.uid));

    // Late documents of the closed run are orphans
    let late = router.route(&Document::Event(EventDoc::new(&primary.uid, 9))).unwrap();
    assert_eq!(late, RouteOutcome::Orphan { parent: primary.uid.clone() });
    let late_datum = router.route(&Document::Datum(DatumDoc::new(&resource.uid, 0))).unwrap();
    assert_eq!(late_datum, RouteOutcome::Orphan { parent: resource.uid.clone() });
    assert_eq!(seen_for(&log, &start.uid).last().map(Document::kind), Some(DocumentKind::Stop));
}

#[test]
fn test_orphans_are_dropped_without_state() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));

    let outcome = router.route(&Document::Event(EventDoc::new("never-seen", 1))).unwrap();
    assert_eq!(outcome, RouteOutcome::Orphan { parent: "never-seen".into() });
    let outcome = router.route(&Document::Datum(DatumDoc::new("no-resource", 3))).unwrap();
    assert!(matches!(outcome, RouteOutcome::Orphan { .. }));

    assert!(log.lock().unwrap().is_empty());
    assert_eq!(router.registry_len(), 0);
}

#[test]
fn test_resources_and_datums_follow_their_run() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));

    let start = StartDoc::new();
    let resource = ResourceDoc::new(&start.uid, "HDF5", "scan.h5");
    let datums: Vec<_> = (0..3).map(|i| DatumDoc::new(&resource.uid, i)).collect();

    router.route(&Document::Start(start.clone())).unwrap();
    router.route(&Document::Resource(resource.clone())).unwrap();
    for datum in &datums {
        let outcome = router.route(&Document::Datum(datum.clone())).unwrap();
        assert_eq!(outcome.delivered_to(), 1);
    }

    let kinds: Vec<_> = seen_for(&log, &start.uid).iter().map(Document::kind).collect();
    assert_eq!(
        kinds,
        vec![
            DocumentKind::Start,
            DocumentKind::Resource,
            DocumentKind::Datum,
            DocumentKind::Datum,
            DocumentKind::Datum
        ]
    );
}

#[test]
fn test_event_pages_route_by_descriptor() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));
    let run = RunDocs::new(StartDoc::new(), 4);

    router.route(&Document::Start(run.start.clone())).unwrap();
    router.route(&Document::Descriptor(run.descriptor.clone())).unwrap();
    let page = EventPage::from_events(&run.events).unwrap();
    let outcome = router.route(&Document::EventPage(page.clone())).unwrap();

    assert_eq!(outcome.delivered_to(), 1);
    assert_eq!(seen_for(&log, &run.start.uid).last(), Some(&Document::EventPage(page)));
}

#[test]
fn test_factories_decide_independently() {
    let logs: Vec<SeenLog> = (0..4).map(|_| SeenLog::default()).collect();
    let mut router = RunRouter::new()
        .with_factory("accepts", recording_factory(logs[0].clone(), accept_all))
        .with_factory("declines", recording_factory(logs[1].clone(), |_: &StartDoc| false))
        .with_factory(
            "broken",
            |_: &StartDoc| -> Result<Option<Box<dyn DocumentHandler>>> { Err(anyhow!("no calibration")) },
        )
        .with_factory("also_accepts", recording_factory(logs[3].clone(), accept_all));

    let run = RunDocs::new(StartDoc::new(), 2);
    let outcomes = route_all(&mut router, &run.documents());

    assert_eq!(outcomes[0].delivered_to(), 2);
    assert_eq!(router.handler_count(&run.start.uid), 0);
    assert_eq!(seen_for(&logs[0], &run.start.uid), run.documents());
    assert!(logs[1].lock().unwrap().is_empty());
    assert_eq!(seen_for(&logs[3], &run.start.uid), run.documents());
}

struct FailsOnEvent;

impl DocumentHandler for FailsOnEvent {
    fn name(&self) -> &str {
        "fails_on_event"
    }

    fn event(&mut self, doc: &EventDoc) -> HandlerResult<EventDoc> {
        Err(anyhow!("bad frame {}", doc.seq_num))
    }
}

#[test]
#[traced_test]
fn test_handler_failure_is_contained() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new()
        .with_factory(
            "flaky",
            |_: &StartDoc| -> Result<Option<Box<dyn DocumentHandler>>> { Ok(Some(Box::new(FailsOnEvent))) },
        )
        .with_factory("steady", recording_factory(log.clone(), accept_all));

    let run = RunDocs::new(StartDoc::new(), 2);
    let outcomes = route_all(&mut router, &run.documents());

    let event_outcome = &outcomes[2];
    assert_eq!(event_outcome.delivered_to(), 2);
    assert_eq!(event_outcome.failures().len(), 1);
    assert_eq!(event_outcome.failures()[0].factory, "flaky");
    assert_eq!(event_outcome.failures()[0].error, "bad frame 1");

    // Later handlers still saw everything and the run was torn down
    assert_eq!(seen_for(&log, &run.start.uid), run.documents());
    assert_eq!(router.registry_len(), 0);
    assert!(logs_contain("Handler failed"));
}

struct FailsOnStop;

impl DocumentHandler for FailsOnStop {
    fn name(&self) -> &str {
        "fails_on_stop"
    }

    fn stop(&mut self, _doc: &StopDoc) -> HandlerResult<StopDoc> {
        Err(anyhow!("could not flush output"))
    }
}

#[test]
#[traced_test]
fn test_failing_stop_handler_still_tears_down() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new()
        .with_factory(
            "flush",
            |_: &StartDoc| -> Result<Option<Box<dyn DocumentHandler>>> { Ok(Some(Box::new(FailsOnStop))) },
        )
        .with_factory("steady", recording_factory(log.clone(), accept_all));

    let run = RunDocs::new(StartDoc::new(), 1);
    let outcomes = route_all(&mut router, &run.documents());

    let stop_outcome = outcomes.last().unwrap();
    assert!(matches!(stop_outcome, RouteOutcome::Closed { handlers: 2, .. }));
    assert_eq!(stop_outcome.failures().len(), 1);
    assert_eq!(stop_outcome.failures()[0].handler, "fails_on_stop");

    assert_eq!(seen_for(&log, &run.start.uid).last(), Some(&Document::Stop(run.stop.clone())));
    assert!(!router.references_run(&run.start.uid));
    assert_eq!(router.registry_len(), 0);
    assert!(logs_contain("Handler failed"));
}

#[test]
fn test_minimal_wire_documents_route_and_tear_down() {
    let log: SeenLog = Default::default();
    let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));

    let stream = [
        ("start", json!({"uid": "R"})),
        ("descriptor", json!({"uid": "D", "run_start": "R"})),
        ("event", json!({"descriptor": "D"})),
        ("event_page", json!({"descriptor": "D"})),
        ("resource", json!({"uid": "RES", "run_start": "R"})),
        ("datum", json!({"datum_id": "RES/0", "resource": "RES"})),
        ("stop", json!({"run_start": "R"})),
    ];
    for (name, fields) in stream {
        let outcome = router.route_wire(name, fields).unwrap();
        assert_eq!(outcome.delivered_to(), 1, "{} was not delivered", name);
    }

    assert_eq!(seen_for(&log, "R").len(), 7);
    assert!(!router.is_open("R"));
    assert_eq!(router.registry_len(), 0);
}

#[test]
fn test_malformed_wire_document_is_rejected() {
    let mut router = RunRouter::new();
    let err = router.route_wire("event", serde_json::json!({"uid": "x"})).unwrap_err();
    assert!(err.to_string().contains("event"));
    assert!(router.route_wire("bulk_events", serde_json::json!({})).is_err());
}

proptest! {
    #[test]
    fn test_any_interleaving_preserves_per_run_order(
        sizes in prop::collection::vec(0u64..5, 1..4),
        picks in prop::collection::vec(0usize..8, 0..80),
    ) {
        let log: SeenLog = Default::default();
        let mut router = RunRouter::new().with_factory("all", recording_factory(log.clone(), accept_all));

        let runs: Vec<RunDocs> = sizes
            .iter()
            .enumerate()
            .map(|(i, n)| RunDocs::new(StartDoc::new().with_uid(&format!("run-{}", i)), *n))
            .collect();
        let streams: Vec<Vec<Document>> = runs.iter().map(RunDocs::documents).collect();
        let mut cursors = vec![0usize; runs.len()];

        // Random picks first, then drain whatever is left in run order
        let steps = picks
            .into_iter()
            .map(|p| p % runs.len())
            .chain((0..runs.len()).flat_map(|r| std::iter::repeat(r).take(8)));
        for r in steps {
            if let Some(doc) = streams[r].get(cursors[r]) {
                router.route(doc).unwrap();
                cursors[r] += 1;
            }
        }

        for (run, stream) in runs.iter().zip(&streams) {
            prop_assert_eq!(&seen_for(&log, &run.start.uid), stream);
        }
        prop_assert_eq!(router.registry_len(), 0);
    }
}
