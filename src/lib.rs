//! Document routing and stream combinators for data acquisition runs.
//!
//! An acquisition emits a stream of linked documents: one `start` per run,
//! `descriptor`s and `resource`s that belong to a run, `event`s and `datum`s
//! that belong to those, and a final `stop`. This crate turns that single
//! interleaved stream into isolated per-run handler sets:
//!
//! - [`router::RunRouter`] asks every registered [`handler::CallbackFactory`]
//!   for handlers when a run starts, routes children by their parent UID, and
//!   tears everything down at `stop`.
//! - [`correlation`] finds a related earlier run (a dark frame, a background)
//!   at start time through pluggable query and decision functions.
//! - [`dataflow`] provides the synchronous zip, latest-value and fold nodes
//!   used to combine values inside a handler.
//!
//! Configuration is loaded with figment ([`config::RouterConfig`]) and
//! logging goes through `tracing` ([`logging::init_from_config`]).

pub mod config;
pub mod correlation;
pub mod dataflow;
pub mod document;
pub mod error;
pub mod handler;
pub mod logging;
pub mod router;
pub mod transport;

pub use document::{Document, DocumentKind};
pub use error::{RouterError, RouterResult};
pub use handler::{CallbackFactory, DocumentHandler, HandlerChain};
pub use router::{RouteOutcome, RunRouter};
