//! Graph composition and resolution.
//!
//! Graphs are written by composing nodes:
//! - `a >> b` connects every port of `a` to `b`
//! - `a.port("yes") >> b` connects one port
//! - `Graph::union([..])` places graphs side by side
//! - `Graph::union([a, b]) >> c` connects both `a` and `b` to `c`
//!
//! A composed `Graph` is resolved into a `WorkflowGraph`: a petgraph
//! directed graph with de-duplicated nodes and edges in first-seen order.
//! Its entrypoints are the nodes without incoming edges, in first-seen
//! order. A component that is a pure cycle contributes the expression
//! heads no earlier entrypoint reaches. Resolution is deterministic and
//! idempotent.

use crate::edge::Edge;
use crate::error::GraphError;
use crate::node::{Node, NodeId, PortHandle};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::{Bfs, EdgeRef};
use std::collections::{HashMap, HashSet};
use std::ops::Shr;

/// A composable graph expression.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    nodes: Vec<Node>,
    edges: Vec<Edge>,
    entrypoints: Vec<NodeId>,
    terminals: Vec<(NodeId, String)>,
    conflicts: Vec<String>,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Places graphs side by side without connecting them.
    #[must_use]
    pub fn union<G: Into<Graph>>(graphs: impl IntoIterator<Item = G>) -> Self {
        let mut merged = Graph::new();
        for graph in graphs {
            let graph = graph.into();
            merged.absorb(&graph);
            push_unique(&mut merged.entrypoints, &graph.entrypoints);
            push_unique(&mut merged.terminals, &graph.terminals);
        }
        merged
    }

    /// Connects every terminal port of this graph to every entrypoint of `next`.
    #[must_use]
    pub fn then(self, next: impl Into<Graph>) -> Self {
        let next = next.into();
        if self.nodes.is_empty() {
            return next;
        }
        let mut merged = Graph::new();
        merged.absorb(&self);
        merged.absorb(&next);
        for (source, port) in &self.terminals {
            for target in &next.entrypoints {
                merged.add_edge(Edge::new(*source, port.clone(), *target));
            }
        }
        merged.entrypoints = self.entrypoints;
        merged.terminals = next.terminals;
        merged
    }

    /// Returns the nodes in first-seen order.
    #[must_use]
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Returns the edges in first-seen order.
    #[must_use]
    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    /// Returns the entrypoints of the expression.
    #[must_use]
    pub fn entrypoints(&self) -> &[NodeId] {
        &self.entrypoints
    }

    fn absorb(&mut self, other: &Graph) {
        for node in &other.nodes {
            self.add_node(node);
        }
        for edge in &other.edges {
            self.add_edge(edge.clone());
        }
        for name in &other.conflicts {
            if !self.conflicts.contains(name) {
                self.conflicts.push(name.clone());
            }
        }
    }

    fn add_node(&mut self, node: &Node) {
        match self.nodes.iter().find(|existing| existing.id() == node.id()) {
            Some(existing) if !existing.same_definition(node) => {
                if !self.conflicts.iter().any(|name| name == node.name()) {
                    self.conflicts.push(node.name().to_string());
                }
            }
            Some(_) => {}
            None => self.nodes.push(node.clone()),
        }
    }

    fn add_edge(&mut self, edge: Edge) {
        if !self.edges.iter().any(|existing| existing.id == edge.id) {
            self.edges.push(edge);
        }
    }
}

fn push_unique<T: PartialEq + Clone>(into: &mut Vec<T>, items: &[T]) {
    for item in items {
        if !into.contains(item) {
            into.push(item.clone());
        }
    }
}

impl From<&Node> for Graph {
    fn from(node: &Node) -> Self {
        Graph {
            nodes: vec![node.clone()],
            edges: Vec::new(),
            entrypoints: vec![node.id()],
            terminals: node
                .ports()
                .iter()
                .map(|port| (node.id(), port.name.clone()))
                .collect(),
            conflicts: Vec::new(),
        }
    }
}

impl From<Node> for Graph {
    fn from(node: Node) -> Self {
        Graph::from(&node)
    }
}

impl From<&PortHandle> for Graph {
    fn from(handle: &PortHandle) -> Self {
        Graph {
            nodes: vec![handle.node.clone()],
            edges: Vec::new(),
            entrypoints: vec![handle.node.id()],
            terminals: vec![(handle.node.id(), handle.port.clone())],
            conflicts: Vec::new(),
        }
    }
}

impl From<PortHandle> for Graph {
    fn from(handle: PortHandle) -> Self {
        Graph::from(&handle)
    }
}

impl<T: Into<Graph>> Shr<T> for Graph {
    type Output = Graph;

    fn shr(self, rhs: T) -> Graph {
        self.then(rhs)
    }
}

impl<T: Into<Graph>> Shr<T> for Node {
    type Output = Graph;

    fn shr(self, rhs: T) -> Graph {
        Graph::from(self).then(rhs)
    }
}

impl<T: Into<Graph>> Shr<T> for &Node {
    type Output = Graph;

    fn shr(self, rhs: T) -> Graph {
        Graph::from(self).then(rhs)
    }
}

impl<T: Into<Graph>> Shr<T> for PortHandle {
    type Output = Graph;

    fn shr(self, rhs: T) -> Graph {
        Graph::from(self).then(rhs)
    }
}

/// A resolved workflow graph using petgraph's directed graph.
#[derive(Debug, Clone, Default)]
pub struct WorkflowGraph {
    /// The underlying directed graph.
    graph: DiGraph<Node, Edge>,
    /// Map from NodeId to petgraph's NodeIndex for O(1) lookup.
    node_index_map: HashMap<NodeId, NodeIndex>,
    entrypoints: Vec<NodeId>,
}

impl WorkflowGraph {
    /// Resolves graph expressions into one graph.
    ///
    /// # Errors
    ///
    /// Returns `ConflictingNodeName` if two different node definitions
    /// share a name.
    pub fn resolve(graphs: &[Graph]) -> Result<Self, GraphError> {
        let merged = Graph::union(graphs.iter().cloned());
        if let Some(name) = merged.conflicts.first() {
            return Err(GraphError::ConflictingNodeName { name: name.clone() });
        }

        let mut resolved = WorkflowGraph::default();
        for node in &merged.nodes {
            let index = resolved.graph.add_node(node.clone());
            resolved.node_index_map.insert(node.id(), index);
        }
        for edge in &merged.edges {
            let source = resolved.node_index_map[&edge.source];
            let target = resolved.node_index_map[&edge.target];
            resolved.graph.add_edge(source, target, edge.clone());
        }
        resolved.entrypoints = resolved
            .graph
            .node_indices()
            .filter(|&index| {
                resolved
                    .graph
                    .edges_directed(index, Direction::Incoming)
                    .next()
                    .is_none()
            })
            .map(|index| resolved.graph[index].id())
            .collect();
        // Components that are pure cycles have no such node.
        for entry in merged.entrypoints {
            if !resolved
                .entrypoints
                .iter()
                .any(|kept| resolved.reaches(*kept, entry))
            {
                resolved.entrypoints.push(entry);
            }
        }
        Ok(resolved)
    }

    /// Returns a node by ID.
    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        let index = self.node_index_map.get(&node_id)?;
        self.graph.node_weight(*index)
    }

    /// Returns a node by name.
    #[must_use]
    pub fn node_by_name(&self, name: &str) -> Option<&Node> {
        self.node(NodeId::from_name(name))
    }

    /// Returns true if the node is part of the graph.
    #[must_use]
    pub fn contains(&self, node_id: NodeId) -> bool {
        self.node_index_map.contains_key(&node_id)
    }

    /// Returns all nodes in first-seen order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph.node_weights()
    }

    /// Returns all edges in first-seen order.
    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.graph.edge_weights()
    }

    /// Returns the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Returns the number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Returns the entrypoints.
    #[must_use]
    pub fn entrypoints(&self) -> &[NodeId] {
        &self.entrypoints
    }

    fn edges_directed(&self, node_id: NodeId, direction: Direction) -> Vec<&Edge> {
        let Some(&index) = self.node_index_map.get(&node_id) else {
            return Vec::new();
        };
        let mut edges: Vec<_> = self
            .graph
            .edges_directed(index, direction)
            .map(|edge| (edge.id(), edge.weight()))
            .collect();
        edges.sort_by_key(|(index, _)| *index);
        edges.into_iter().map(|(_, edge)| edge).collect()
    }

    /// Returns the edges entering a node, in first-seen order.
    #[must_use]
    pub fn incoming_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edges_directed(node_id, Direction::Incoming)
    }

    /// Returns the edges leaving a node, in first-seen order.
    #[must_use]
    pub fn outgoing_edges(&self, node_id: NodeId) -> Vec<&Edge> {
        self.edges_directed(node_id, Direction::Outgoing)
    }

    fn reaches(&self, from: NodeId, to: NodeId) -> bool {
        match (self.node_index_map.get(&from), self.node_index_map.get(&to)) {
            (Some(&from), Some(&to)) => has_path_connecting(&self.graph, from, to, None),
            _ => false,
        }
    }

    /// Returns true if the edge lies on a cycle: its target can reach its source.
    #[must_use]
    pub fn is_cyclic_edge(&self, edge: &Edge) -> bool {
        self.reaches(edge.target, edge.source)
    }

    /// Returns nodes no entrypoint can reach.
    #[must_use]
    pub fn unreachable_nodes(&self) -> Vec<NodeId> {
        let mut reached = HashSet::new();
        for entry in &self.entrypoints {
            let Some(&start) = self.node_index_map.get(entry) else {
                continue;
            };
            let mut bfs = Bfs::new(&self.graph, start);
            while let Some(index) = bfs.next(&self.graph) {
                reached.insert(index);
            }
        }
        self.graph
            .node_indices()
            .filter(|index| !reached.contains(index))
            .filter_map(|index| self.graph.node_weight(index))
            .map(Node::id)
            .collect()
    }
}
