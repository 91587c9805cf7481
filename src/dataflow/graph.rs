//! Acyclic wiring of combinators over a single value type.

use super::{Combinator, DataflowError, SlotId};
use std::fmt;
use tracing::{debug, trace};

/// Handle of a node added to a [`DataflowGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Target {
    node: NodeId,
    slot: SlotId,
}

type BoxedNode<T> = Box<dyn Combinator<Input = T, Output = T> + Send>;

struct GraphNode<T> {
    node: BoxedNode<T>,
    downstream: Vec<Target>,
}

/// A set of combinators wired source -> node -> node.
///
/// Edges may only point from an earlier node to a later one, so the graph
/// cannot contain a cycle. Pushing a value runs synchronously: every emission
/// is forwarded depth-first, in the order the edges were connected.
pub struct DataflowGraph<T> {
    nodes: Vec<GraphNode<T>>,
    sources: Vec<(String, Vec<Target>)>,
}

impl<T> Default for DataflowGraph<T> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            sources: Vec::new(),
        }
    }
}

impl<T> fmt::Debug for DataflowGraph<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataflowGraph")
            .field("nodes", &self.nodes.iter().map(|n| n.node.name()).collect::<Vec<_>>())
            .field("sources", &self.sources.iter().map(|(s, _)| s.as_str()).collect::<Vec<_>>())
            .finish()
    }
}

impl<T: Clone> DataflowGraph<T> {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of `node`; connect it afterwards.
    pub fn add_node<C>(&mut self, node: C) -> NodeId
    where
        C: Combinator<Input = T, Output = T> + Send + 'static,
    {
        let id = NodeId(self.nodes.len());
        debug!(node = %node.name(), id = %id, "Added dataflow node");
        self.nodes.push(GraphNode {
            node: Box::new(node),
            downstream: Vec::new(),
        });
        id
    }

    /// Declare a named entry point with no targets yet.
    pub fn add_source(&mut self, name: &str) {
        if !self.sources.iter().any(|(s, _)| s == name) {
            self.sources.push((name.to_string(), Vec::new()));
        }
    }

    /// Feed a named source into `slot` of `node`, declaring the source if needed.
    pub fn connect_source(&mut self, source: &str, node: NodeId, slot: &str) -> Result<(), DataflowError> {
        let target = self.target(node, slot)?;
        self.add_source(source);
        if let Some((_, targets)) = self.sources.iter_mut().find(|(s, _)| s == source) {
            targets.push(target);
        }
        Ok(())
    }

    /// Feed every emission of `from` into `slot` of `to`.
    pub fn connect(&mut self, from: NodeId, to: NodeId, slot: &str) -> Result<(), DataflowError> {
        if from.0 >= self.nodes.len() {
            return Err(DataflowError::UnknownNode(from.0));
        }
        let target = self.target(to, slot)?;
        if from >= to {
            return Err(DataflowError::BackwardEdge { from: from.0, to: to.0 });
        }
        self.nodes[from.0].downstream.push(target);
        Ok(())
    }

    /// Push a value into a source and run it to completion.
    ///
    /// Returns every node emission as `(node, value)` in evaluation order.
    pub fn push(&mut self, source: &str, value: T) -> Result<Vec<(NodeId, T)>, DataflowError> {
        let targets = self
            .sources
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, t)| t.clone())
            .ok_or_else(|| DataflowError::UnknownSource(source.to_string()))?;

        let mut emitted = Vec::new();
        for target in targets {
            self.deliver(target, value.clone(), &mut emitted)?;
        }
        trace!(source, emitted = emitted.len(), "dataflow push complete");
        Ok(emitted)
    }

    /// Reset every node's buffered state.
    pub fn reset(&mut self) {
        self.nodes.iter_mut().for_each(|n| n.node.reset());
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether no node was added.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Name of the node behind `id`.
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.nodes.get(id.0).map(|n| n.node.name())
    }

    fn target(&self, node: NodeId, slot: &str) -> Result<Target, DataflowError> {
        let entry = self.nodes.get(node.0).ok_or(DataflowError::UnknownNode(node.0))?;
        let slot = entry.node.slot(slot)?;
        Ok(Target { node, slot })
    }

    fn deliver(&mut self, target: Target, value: T, emitted: &mut Vec<(NodeId, T)>) -> Result<(), DataflowError> {
        let entry = &mut self.nodes[target.node.0];
        let outputs = entry.node.push(target.slot, value)?;
        if outputs.is_empty() {
            return Ok(());
        }
        let downstream = entry.downstream.clone();

        for output in outputs {
            emitted.push((target.node, output.clone()));
            for next in &downstream {
                self.deliver(*next, output.clone(), emitted)?;
            }
        }
        Ok(())
    }
}
