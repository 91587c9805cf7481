#![allow(dead_code)]

use anyhow::Result;
use daq_router::document::{DescriptorDoc, Document, EventDoc, StartDoc, StopDoc};
use daq_router::handler::{CallbackFactory, DocumentHandler, HandlerResult};
use std::sync::{Arc, Mutex};

/// Documents seen by one handler, tagged with the run it was created for.
#[derive(Debug, Clone, PartialEq)]
pub struct Seen {
    pub run_uid: String,
    pub doc: Document,
}

pub type SeenLog = Arc<Mutex<Vec<Seen>>>;

pub struct RecordingHandler {
    run_uid: String,
    log: SeenLog,
}

impl DocumentHandler for RecordingHandler {
    fn name(&self) -> &str {
        "recording"
    }

    fn handle(&mut self, doc: &Document) -> HandlerResult<Document> {
        self.log.lock().unwrap().push(Seen {
            run_uid: self.run_uid.clone(),
            doc: doc.clone(),
        });
        Ok(None)
    }
}

/// Factory that accepts runs matching `accept` and records everything they see.
pub fn recording_factory<P>(log: SeenLog, accept: P) -> impl CallbackFactory
where
    P: Fn(&StartDoc) -> bool + Send + 'static,
{
    move |start: &StartDoc| -> Result<Option<Box<dyn DocumentHandler>>> {
        if !accept(start) {
            return Ok(None);
        }
        Ok(Some(Box::new(RecordingHandler {
            run_uid: start.uid.clone(),
            log: log.clone(),
        })))
    }
}

pub fn accept_all(_start: &StartDoc) -> bool {
    true
}

/// A complete run: start, one descriptor, `events` events, stop.
#[derive(Debug, Clone)]
pub struct RunDocs {
    pub start: StartDoc,
    pub descriptor: DescriptorDoc,
    pub events: Vec<EventDoc>,
    pub stop: StopDoc,
}

impl RunDocs {
    pub fn new(start: StartDoc, events: u64) -> Self {
        let descriptor = DescriptorDoc::new(&start.uid, "primary");
        let events = (1..=events)
            .map(|i| EventDoc::new(&descriptor.uid, i).with_datum("det", i as f64))
            .collect();
        let stop = StopDoc::success(&start.uid);
        Self {
            start,
            descriptor,
            events,
            stop,
        }
    }

    /// Documents in stream order.
    pub fn documents(&self) -> Vec<Document> {
        let mut docs = vec![
            Document::Start(self.start.clone()),
            Document::Descriptor(self.descriptor.clone()),
        ];
        docs.extend(self.events.iter().cloned().map(Document::Event));
        docs.push(Document::Stop(self.stop.clone()));
        docs
    }
}

/// Documents of `run_uid` in the order a log recorded them.
pub fn seen_for(log: &SeenLog, run_uid: &str) -> Vec<Document> {
    log.lock()
        .unwrap()
        .iter()
        .filter(|s| s.run_uid == run_uid)
        .map(|s| s.doc.clone())
        .collect()
}
