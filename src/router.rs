//! Run Router
//!
//! Fans a flat document stream out to per-run handler sets.
//!
//! # Lifecycle
//!
//! ```text
//! start ──> ask every factory ──> handlers[run] (registration order)
//! descriptor/resource ──> record owner (claimed runs, first owner wins) ──> deliver
//! event/event_page/datum ──> resolve owner ──> deliver | drop as orphan
//! stop ──> erase handlers[run] and every owner entry for run ──> deliver
//! ```
//!
//! Routing is synchronous: each call to [`RunRouter::route`] completes all
//! deliveries for one document before returning. Handler and factory
//! failures are logged and reported in the returned [`RouteOutcome`]; they
//! never disturb the router's own bookkeeping.

use crate::document::{Document, Parent, StartDoc, StopDoc};
use crate::error::{RouterError, RouterResult};
use crate::handler::{CallbackFactory, DocumentHandler};
use crate::transport::{Envelope, TopicFilter};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, trace, warn};

/// A handler failure observed while delivering one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerFailure {
    /// Name of the factory that produced the handler
    pub factory: String,
    /// Name reported by the handler
    pub handler: String,
    /// Error chain rendered as text
    pub error: String,
}

/// What happened to a routed document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    /// A `start` was accepted by at least one factory.
    Opened {
        /// Run the document belongs to
        run_uid: String,
        /// Handlers the document reached
        handlers: usize,
        /// Handlers that returned an error
        failures: Vec<HandlerFailure>,
    },
    /// Delivered to the handlers of an open run.
    Delivered {
        /// Run the document belongs to
        run_uid: String,
        /// Handlers the document reached
        handlers: usize,
        /// Handlers that returned an error
        failures: Vec<HandlerFailure>,
    },
    /// A `stop` was delivered and the run's state was released.
    Closed {
        /// Run the document belongs to
        run_uid: String,
        /// Handlers the document reached
        handlers: usize,
        /// Handlers that returned an error
        failures: Vec<HandlerFailure>,
    },
    /// No factory wanted the run, or the document belongs to such a run.
    Unclaimed {
        /// Run nobody claimed
        run_uid: String,
    },
    /// The document's parent UID is unknown; it was dropped.
    Orphan {
        /// Descriptor or resource UID that was not registered
        parent: String,
    },
    /// A `stop` for a run with no open state.
    StopWithoutRun {
        /// `run_start` of the stop
        run_uid: String,
    },
    /// The transport topic did not pass the prefix filter.
    Filtered,
}

impl RouteOutcome {
    /// Number of handlers the document reached.
    pub fn delivered_to(&self) -> usize {
        match self {
            RouteOutcome::Opened { handlers, .. }
            | RouteOutcome::Delivered { handlers, .. }
            | RouteOutcome::Closed { handlers, .. } => *handlers,
            _ => 0,
        }
    }

    /// Handler failures recorded during delivery.
    pub fn failures(&self) -> &[HandlerFailure] {
        match self {
            RouteOutcome::Opened { failures, .. }
            | RouteOutcome::Delivered { failures, .. }
            | RouteOutcome::Closed { failures, .. } => failures,
            _ => &[],
        }
    }
}

struct RegisteredFactory {
    name: String,
    factory: Box<dyn CallbackFactory>,
}

struct RunHandler {
    factory: String,
    handler: Box<dyn DocumentHandler>,
}

/// State held for one open run.
struct RunState {
    handlers: Vec<RunHandler>,
    descriptors: Vec<String>,
    resources: Vec<String>,
}

/// Dispatches documents to the handlers created for their run.
pub struct RunRouter {
    factories: Vec<RegisteredFactory>,
    runs: HashMap<String, RunState>,
    descriptor_owner: HashMap<String, String>,
    resource_owner: HashMap<String, String>,
}

impl fmt::Debug for RunRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunRouter")
            .field(
                "factories",
                &self.factories.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
            )
            .field("open_runs", &self.runs.len())
            .field("descriptors", &self.descriptor_owner.len())
            .field("resources", &self.resource_owner.len())
            .finish()
    }
}

impl Default for RunRouter {
    fn default() -> Self {
        Self::new()
    }
}

impl RunRouter {
    /// Router with no factories; every run is unclaimed until one is added.
    pub fn new() -> Self {
        Self {
            factories: Vec::new(),
            runs: HashMap::new(),
            descriptor_owner: HashMap::new(),
            resource_owner: HashMap::new(),
        }
    }

    /// Register a factory. Factories are consulted, and their handlers invoked,
    /// in registration order.
    pub fn add_factory(&mut self, name: impl Into<String>, factory: impl CallbackFactory + 'static) {
        self.factories.push(RegisteredFactory {
            name: name.into(),
            factory: Box::new(factory),
        });
    }

    /// Builder-style variant of [`RunRouter::add_factory`].
    pub fn with_factory(mut self, name: impl Into<String>, factory: impl CallbackFactory + 'static) -> Self {
        self.add_factory(name, factory);
        self
    }

    /// Route one document.
    ///
    /// # Errors
    ///
    /// Only malformed documents and a repeated `start` for an open run are
    /// rejected; router state is unchanged in both cases.
    pub fn route(&mut self, doc: &Document) -> RouterResult<RouteOutcome> {
        doc.validate()?;
        let outcome = match doc {
            Document::Start(start) => self.open_run(start, doc)?,
            Document::Descriptor(d) => self.register_child(&d.run_start, &d.uid, ChildKind::Descriptor, doc),
            Document::Resource(r) => self.register_child(&r.run_start, &r.uid, ChildKind::Resource, doc),
            Document::Event(_) | Document::EventPage(_) | Document::Datum(_) => self.deliver_child(doc),
            Document::Stop(stop) => self.close_run(stop, doc),
        };
        Ok(outcome)
    }

    /// Route a document given in its `(name, fields)` wire shape.
    pub fn route_wire(&mut self, name: &str, fields: Value) -> RouterResult<RouteOutcome> {
        let doc = Document::from_wire(name, fields)?;
        self.route(&doc)
    }

    /// Route a labelled transport message, honouring the topic prefix filter.
    pub fn route_message(&mut self, topic: &[u8], payload: &[u8], filter: &TopicFilter) -> RouterResult<RouteOutcome> {
        if !filter.accepts(topic) {
            trace!(topic = %String::from_utf8_lossy(topic), "Message filtered by topic prefix");
            return Ok(RouteOutcome::Filtered);
        }
        let doc = Envelope::decode(payload)?;
        self.route(&doc)
    }

    fn open_run(&mut self, start: &StartDoc, doc: &Document) -> RouterResult<RouteOutcome> {
        if self.runs.contains_key(&start.uid) {
            return Err(RouterError::DuplicateStart(start.uid.clone()));
        }

        let mut handlers = Vec::new();
        for registered in self.factories.iter_mut() {
            match registered.factory.create(start) {
                Ok(Some(handler)) => handlers.push(RunHandler {
                    factory: registered.name.clone(),
                    handler,
                }),
                Ok(None) => {
                    debug!(run_uid = %start.uid, factory = %registered.name, "Factory declined run");
                }
                Err(e) => {
                    let error = format!("{:#}", e);
                    warn!(
                        run_uid = %start.uid,
                        factory = %registered.name,
                        error = %error,
                        "Factory failed, treating run as declined"
                    );
                }
            }
        }

        if handlers.is_empty() {
            debug!(run_uid = %start.uid, "No factory accepted run");
            return Ok(RouteOutcome::Unclaimed {
                run_uid: start.uid.clone(),
            });
        }

        info!(run_uid = %start.uid, handlers = handlers.len(), "Run opened");
        let failures = deliver(&start.uid, &mut handlers, doc);
        let count = handlers.len();
        self.runs.insert(
            start.uid.clone(),
            RunState {
                handlers,
                descriptors: Vec::new(),
                resources: Vec::new(),
            },
        );
        Ok(RouteOutcome::Opened {
            run_uid: start.uid.clone(),
            handlers: count,
            failures,
        })
    }

    fn register_child(&mut self, run_uid: &str, uid: &str, kind: ChildKind, doc: &Document) -> RouteOutcome {
        let Some(state) = self.runs.get_mut(run_uid) else {
            debug!(run_uid = %run_uid, doc_type = %doc.kind(), "Dropping document of unclaimed run");
            return RouteOutcome::Unclaimed {
                run_uid: run_uid.to_string(),
            };
        };

        let (registry, owned) = match kind {
            ChildKind::Descriptor => (&mut self.descriptor_owner, &mut state.descriptors),
            ChildKind::Resource => (&mut self.resource_owner, &mut state.resources),
        };
        // The first open run to register a UID keeps it
        match registry.get(uid).cloned() {
            Some(owner) if owner != run_uid => {
                warn!(
                    run_uid = %run_uid,
                    owner = %owner,
                    uid = %uid,
                    doc_type = %doc.kind(),
                    "UID already owned by another open run, keeping first owner"
                );
            }
            Some(_) => {}
            None => {
                registry.insert(uid.to_string(), run_uid.to_string());
                owned.push(uid.to_string());
            }
        }

        let failures = deliver(run_uid, &mut state.handlers, doc);
        RouteOutcome::Delivered {
            run_uid: run_uid.to_string(),
            handlers: state.handlers.len(),
            failures,
        }
    }

    fn deliver_child(&mut self, doc: &Document) -> RouteOutcome {
        let (parent, owner) = match doc.parent() {
            Parent::Descriptor(uid) => (uid, self.descriptor_owner.get(uid)),
            Parent::Resource(uid) => (uid, self.resource_owner.get(uid)),
            Parent::Run(uid) => (uid, None),
        };
        let Some(state) = owner.and_then(|run_uid| self.runs.get_mut(run_uid).map(|s| (run_uid, s))) else {
            debug!(parent = %parent, doc_type = %doc.kind(), "Dropping orphan document");
            return RouteOutcome::Orphan {
                parent: parent.to_string(),
            };
        };
        let (run_uid, state) = state;

        let failures = deliver(run_uid, &mut state.handlers, doc);
        RouteOutcome::Delivered {
            run_uid: run_uid.clone(),
            handlers: state.handlers.len(),
            failures,
        }
    }

    fn close_run(&mut self, stop: &StopDoc, doc: &Document) -> RouteOutcome {
        let Some(mut state) = self.runs.remove(&stop.run_start) else {
            debug!(run_uid = %stop.run_start, "Stop for run with no open state");
            return RouteOutcome::StopWithoutRun {
                run_uid: stop.run_start.clone(),
            };
        };

        // Release owner entries before the stop reaches any handler
        release_owned(&mut self.descriptor_owner, &state.descriptors, &stop.run_start);
        release_owned(&mut self.resource_owner, &state.resources, &stop.run_start);
        let failures = deliver(&stop.run_start, &mut state.handlers, doc);

        info!(
            run_uid = %stop.run_start,
            exit_status = ?stop.exit_status,
            failures = failures.len(),
            "Run closed"
        );
        RouteOutcome::Closed {
            run_uid: stop.run_start.clone(),
            handlers: state.handlers.len(),
            failures,
        }
    }

    /// UIDs of runs currently open, in no particular order.
    pub fn open_runs(&self) -> Vec<&str> {
        self.runs.keys().map(String::as_str).collect()
    }

    /// True while the run has handlers attached.
    pub fn is_open(&self, run_uid: &str) -> bool {
        self.runs.contains_key(run_uid)
    }

    /// Number of handlers attached to a run (zero when not open).
    pub fn handler_count(&self, run_uid: &str) -> usize {
        self.runs.get(run_uid).map_or(0, |s| s.handlers.len())
    }

    /// Run owning a descriptor UID, if registered.
    pub fn descriptor_owner(&self, descriptor_uid: &str) -> Option<&str> {
        self.descriptor_owner.get(descriptor_uid).map(String::as_str)
    }

    /// Run owning a resource UID, if registered.
    pub fn resource_owner(&self, resource_uid: &str) -> Option<&str> {
        self.resource_owner.get(resource_uid).map(String::as_str)
    }

    /// True if any registry still references `run_uid`.
    pub fn references_run(&self, run_uid: &str) -> bool {
        self.runs.contains_key(run_uid)
            || self.descriptor_owner.values().any(|r| r == run_uid)
            || self.resource_owner.values().any(|r| r == run_uid)
    }

    /// Total number of registry entries: open runs, descriptors and resources.
    pub fn registry_len(&self) -> usize {
        self.runs.len() + self.descriptor_owner.len() + self.resource_owner.len()
    }
}

#[derive(Clone, Copy)]
enum ChildKind {
    Descriptor,
    Resource,
}

/// Remove `uids` from `registry` where `run_uid` is still the owner.
fn release_owned(registry: &mut HashMap<String, String>, uids: &[String], run_uid: &str) {
    for uid in uids {
        if registry.get(uid).map(String::as_str) == Some(run_uid) {
            registry.remove(uid);
        }
    }
}

/// Deliver `doc` to every handler in order, collecting failures.
fn deliver(run_uid: &str, handlers: &mut [RunHandler], doc: &Document) -> Vec<HandlerFailure> {
    let mut failures = Vec::new();
    for entry in handlers.iter_mut() {
        if let Err(e) = entry.handler.handle(doc) {
            let failure = HandlerFailure {
                factory: entry.factory.clone(),
                handler: entry.handler.name().to_string(),
                error: format!("{:#}", e),
            };
            warn!(
                run_uid = %run_uid,
                doc_type = %doc.kind(),
                factory = %failure.factory,
                handler = %failure.handler,
                error = %failure.error,
                "Handler failed"
            );
            failures.push(failure);
        }
    }
    failures
}
