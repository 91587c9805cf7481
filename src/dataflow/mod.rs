//! Dataflow Combinators
//!
//! Synchronous nodes that synchronise several value streams into one:
//!
//! - [`StrictZip`]: index-aligned; emits once every slot has a queued value.
//! - [`CombineLatest`]: caches the latest value per slot; trigger slots emit.
//! - [`ZipLatest`]: one principal slot drives emission, the others are cached.
//! - [`CachedFold`]: stateful accumulator with an invalidation slot.
//!
//! Every node owns its buffers; nothing is shared between nodes. A node that
//! lacks a required value simply does not emit and returns immediately.
//!
//! Nodes compose: [`CombinatorExt::map`] converts a node's output back into
//! the value type of a [`DataflowGraph`], where it can feed further nodes.
//!
//! ```rust,ignore
//! let mut graph = DataflowGraph::new();
//! let zip = graph.add_node(ZipLatest::new("subtract", ["fg", "dark"], "fg")?.map(subtract));
//! graph.connect_source("foreground", zip, "fg")?;
//! graph.connect_source("dark", zip, "dark")?;
//! let emitted = graph.push("foreground", frame)?;
//! ```

mod fold;
mod graph;
mod latest;
mod zip;
mod zip_latest;

pub use fold::{CachedFold, FOLD_INVALIDATE_SLOT, FOLD_VALUE_SLOT};
pub use graph::{DataflowGraph, NodeId};
pub use latest::CombineLatest;
pub use zip::StrictZip;
pub use zip_latest::ZipLatest;

use std::fmt;
use thiserror::Error;

/// Index of an input slot on a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub usize);

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wiring and input errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataflowError {
    /// A node was declared without input slots
    #[error("node '{node}' needs at least one input slot")]
    NoSlots {
        /// Node name
        node: String,
    },
    /// Two slots of one node share a name
    #[error("node '{node}' has duplicate slot '{slot}'")]
    DuplicateSlot {
        /// Node name
        node: String,
        /// Repeated slot name
        slot: String,
    },
    /// A slot name or index the node does not have
    #[error("node '{node}' has no slot {slot}")]
    UnknownSlot {
        /// Node name
        node: String,
        /// Requested slot
        slot: String,
    },
    /// Push to a graph source that was never connected
    #[error("unknown source '{0}'")]
    UnknownSource(String),
    /// A node id not issued by this graph
    #[error("unknown node {0}")]
    UnknownNode(usize),
    /// An edge that would make the graph cyclic
    #[error("edge {from} -> {to} must point to a later node")]
    BackwardEdge {
        /// Upstream node index
        from: usize,
        /// Downstream node index
        to: usize,
    },
}

/// A node with named input slots and one output stream.
pub trait Combinator {
    /// Value type accepted on every slot.
    type Input;
    /// Value type emitted.
    type Output;

    /// Node name used in logs and errors.
    fn name(&self) -> &str;

    /// Input slot names in slot order.
    fn slots(&self) -> &[String];

    /// Feed a value into a slot, returning any emissions it triggers in order.
    fn push(&mut self, slot: SlotId, value: Self::Input) -> Result<Vec<Self::Output>, DataflowError>;

    /// Discard all buffered state.
    fn reset(&mut self);

    /// Look up a slot by name.
    fn slot(&self, name: &str) -> Result<SlotId, DataflowError> {
        self.slots()
            .iter()
            .position(|s| s == name)
            .map(SlotId)
            .ok_or_else(|| DataflowError::UnknownSlot {
                node: self.name().to_string(),
                slot: name.to_string(),
            })
    }

    /// Feed a value into a slot addressed by name.
    fn push_named(&mut self, slot: &str, value: Self::Input) -> Result<Vec<Self::Output>, DataflowError> {
        let id = self.slot(slot)?;
        self.push(id, value)
    }
}

/// A combinator whose output is transformed by a function.
pub struct Mapped<C, F> {
    inner: C,
    f: F,
}

impl<C, F, U> Combinator for Mapped<C, F>
where
    C: Combinator,
    F: FnMut(C::Output) -> U,
{
    type Input = C::Input;
    type Output = U;

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn slots(&self) -> &[String] {
        self.inner.slots()
    }

    fn push(&mut self, slot: SlotId, value: Self::Input) -> Result<Vec<U>, DataflowError> {
        Ok(self.inner.push(slot, value)?.into_iter().map(&mut self.f).collect())
    }

    fn reset(&mut self) {
        self.inner.reset();
    }
}

/// Adapters available on every combinator.
pub trait CombinatorExt: Combinator + Sized {
    /// Apply `f` to every emission.
    fn map<F, U>(self, f: F) -> Mapped<Self, F>
    where
        F: FnMut(Self::Output) -> U,
    {
        Mapped { inner: self, f }
    }
}

impl<C: Combinator> CombinatorExt for C {}

/// Validate and own a list of slot names.
pub(crate) fn slot_names<I, S>(node: &str, slots: I) -> Result<Vec<String>, DataflowError>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    let names: Vec<String> = slots.into_iter().map(Into::into).collect();
    if names.is_empty() {
        return Err(DataflowError::NoSlots { node: node.to_string() });
    }
    for (i, name) in names.iter().enumerate() {
        if names[..i].contains(name) {
            return Err(DataflowError::DuplicateSlot {
                node: node.to_string(),
                slot: name.clone(),
            });
        }
    }
    Ok(names)
}

/// Bounds-check a slot against a node's slot list.
pub(crate) fn check_slot(node: &str, slots: &[String], slot: SlotId) -> Result<usize, DataflowError> {
    if slot.0 < slots.len() {
        Ok(slot.0)
    } else {
        Err(DataflowError::UnknownSlot {
            node: node.to_string(),
            slot: slot.to_string(),
        })
    }
}
