//! Per-run handler and factory traits.
//!
//! A [`CallbackFactory`] is asked once per run, at its `start` document, whether
//! it wants to process that run. When it does, it returns a boxed
//! [`DocumentHandler`] that receives every later document of that run.
//!
//! Handlers expose one method per document type. Each method may return a
//! modified copy of the document, which lets handlers be chained inside one
//! factory's pipeline with [`HandlerChain`]. The router itself ignores the
//! returned copy.

use crate::document::{
    DatumDoc, DescriptorDoc, Document, EventDoc, EventPage, ResourceDoc, StartDoc, StopDoc,
};
use anyhow::{Context, Result};
use std::borrow::Cow;

/// Result returned by handler methods: `None` passes the input through unchanged.
pub type HandlerResult<T> = Result<Option<T>>;

/// Receives the documents of one run.
///
/// All methods default to a pass-through no-op, so implementors override only
/// the document types they care about.
pub trait DocumentHandler: Send {
    /// Name used in log records.
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    /// Called once, right after the factory created the handler.
    fn start(&mut self, _doc: &StartDoc) -> HandlerResult<StartDoc> {
        Ok(None)
    }

    /// A new event stream of the run.
    fn descriptor(&mut self, _doc: &DescriptorDoc) -> HandlerResult<DescriptorDoc> {
        Ok(None)
    }

    /// One event of a stream owned by the run.
    fn event(&mut self, _doc: &EventDoc) -> HandlerResult<EventDoc> {
        Ok(None)
    }

    /// Defaults to delivering each row through [`DocumentHandler::event`].
    ///
    /// If any row is rewritten the page is repacked from the rewritten rows.
    fn event_page(&mut self, doc: &EventPage) -> HandlerResult<EventPage> {
        let mut rewritten = false;
        let mut rows = Vec::with_capacity(doc.len());
        for event in doc.events() {
            match self.event(&event)? {
                Some(changed) => {
                    rewritten = true;
                    rows.push(changed);
                }
                None => rows.push(event),
            }
        }
        if rewritten {
            Ok(Some(EventPage::from_events(&rows)?))
        } else {
            Ok(None)
        }
    }

    /// External storage declared by the run.
    fn resource(&mut self, _doc: &ResourceDoc) -> HandlerResult<ResourceDoc> {
        Ok(None)
    }

    /// A slice of one of the run's resources.
    fn datum(&mut self, _doc: &DatumDoc) -> HandlerResult<DatumDoc> {
        Ok(None)
    }

    /// Last document the handler receives; it is dropped afterwards.
    fn stop(&mut self, _doc: &StopDoc) -> HandlerResult<StopDoc> {
        Ok(None)
    }

    /// Dispatch a document to the method for its type.
    fn handle(&mut self, doc: &Document) -> HandlerResult<Document> {
        Ok(match doc {
            Document::Start(d) => self.start(d)?.map(Document::Start),
            Document::Descriptor(d) => self.descriptor(d)?.map(Document::Descriptor),
            Document::Event(d) => self.event(d)?.map(Document::Event),
            Document::EventPage(d) => self.event_page(d)?.map(Document::EventPage),
            Document::Resource(d) => self.resource(d)?.map(Document::Resource),
            Document::Datum(d) => self.datum(d)?.map(Document::Datum),
            Document::Stop(d) => self.stop(d)?.map(Document::Stop),
        })
    }
}

/// Decides, per run, whether to create a handler for it.
///
/// Returning `Ok(None)` declines the run. An `Err` is treated the same way by
/// the router, after logging it.
pub trait CallbackFactory: Send {
    /// Handler for the run opened by `start`, or `None` to decline it.
    fn create(&mut self, start: &StartDoc) -> Result<Option<Box<dyn DocumentHandler>>>;
}

impl<F> CallbackFactory for F
where
    F: FnMut(&StartDoc) -> Result<Option<Box<dyn DocumentHandler>>> + Send,
{
    fn create(&mut self, start: &StartDoc) -> Result<Option<Box<dyn DocumentHandler>>> {
        self(start)
    }
}

/// A pipeline of handlers where each stage sees the previous stage's output.
///
/// The chain only overrides [`DocumentHandler::handle`], which is the entry
/// point the router uses.
pub struct HandlerChain {
    name: String,
    stages: Vec<Box<dyn DocumentHandler>>,
}

impl HandlerChain {
    /// Empty chain; it passes documents through untouched.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    /// Append a stage.
    pub fn then(mut self, stage: impl DocumentHandler + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    /// Append an already boxed stage.
    pub fn then_boxed(mut self, stage: Box<dyn DocumentHandler>) -> Self {
        self.stages.push(stage);
        self
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// True for a chain without stages.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }
}

impl DocumentHandler for HandlerChain {
    fn name(&self) -> &str {
        &self.name
    }

    fn handle(&mut self, doc: &Document) -> HandlerResult<Document> {
        let mut current = Cow::Borrowed(doc);
        for stage in self.stages.iter_mut() {
            let output = stage
                .handle(&current)
                .with_context(|| format!("stage '{}' of chain '{}'", stage.name(), self.name))?;
            if let Some(next) = output {
                current = Cow::Owned(next);
            }
        }
        Ok(match current {
            Cow::Owned(doc) => Some(doc),
            Cow::Borrowed(_) => None,
        })
    }
}
