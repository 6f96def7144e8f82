//! Trigger evaluation over fired and dead edges.
//!
//! Readiness bookkeeping lives in `NodeExecutionCache` so a persisted
//! state is enough to resume. The rules:
//! - A fired port marks its outgoing edges fired; every other port's edges
//!   become dead.
//! - A node whose incoming edges are all dead, and that nothing else has
//!   activated, is skipped; its outgoing edges die in turn.
//! - `AWAIT_ANY` is satisfied by any fired edge. `AWAIT_ALL` needs every
//!   incoming edge that is neither dead nor part of a cycle.
//! - A satisfied node whose attributes do not resolve yet is dropped until
//!   the next edge fires, except under `AWAIT_ATTRIBUTES`, where it waits
//!   and is re-checked after every state change.
//!
//! Nodes forced by the caller (entrypoints, restart nodes) are satisfied
//! regardless of edges.

use crate::edge::Edge;
use crate::error::ResolveError;
use crate::graph::WorkflowGraph;
use crate::node::{Node, NodeId};
use crate::state::{NodeExecutionCache, State};
use crate::trigger::MergeBehavior;

/// Outcome of evaluating one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Evaluation {
    /// The trigger is not satisfied.
    Pending,
    /// The node was queued for dispatch.
    Ready,
    /// The trigger was satisfied but attributes did not resolve.
    Unresolved,
}

pub(crate) struct Readiness<'a> {
    graph: &'a WorkflowGraph,
}

impl<'a> Readiness<'a> {
    pub(crate) fn new(graph: &'a WorkflowGraph) -> Self {
        Self { graph }
    }

    /// Forces nodes to run regardless of their incoming edges.
    pub(crate) fn force(&self, cache: &mut NodeExecutionCache, nodes: &[NodeId]) {
        for node in nodes {
            cache.forced.insert(*node);
            cache.skipped.remove(node);
        }
    }

    /// Applies a port selection of `source`: selected ports fire, the rest die.
    pub(crate) fn fire_ports(
        &self,
        cache: &mut NodeExecutionCache,
        source: NodeId,
        selected: &[String],
    ) {
        let outgoing = self.graph.outgoing_edges(source);
        for edge in outgoing.iter().filter(|edge| selected.contains(&edge.port)) {
            cache
                .fired_edges
                .entry(edge.target)
                .or_default()
                .insert(edge.id);
            cache.dead_edges.remove(&edge.id);
            cache.skipped.remove(&edge.target);
        }
        for edge in outgoing.iter().filter(|edge| !selected.contains(&edge.port)) {
            self.kill(cache, edge);
        }
    }

    fn kill(&self, cache: &mut NodeExecutionCache, edge: &Edge) {
        let fired = cache
            .fired_edges
            .get(&edge.target)
            .is_some_and(|fired| fired.contains(&edge.id));
        if fired || !cache.dead_edges.insert(edge.id) {
            return;
        }
        self.maybe_skip(cache, edge.target);
    }

    fn maybe_skip(&self, cache: &mut NodeExecutionCache, node: NodeId) {
        let activated = cache.forced.contains(&node)
            || cache.waiting.contains(&node)
            || cache.queued.contains(&node)
            || cache.skipped.contains(&node)
            || cache.fired_edges.get(&node).is_some_and(|fired| !fired.is_empty());
        if activated {
            return;
        }
        let incoming = self.graph.incoming_edges(node);
        if incoming.is_empty() || !incoming.iter().all(|e| cache.dead_edges.contains(&e.id)) {
            return;
        }
        cache.skipped.insert(node);
        for edge in self.graph.outgoing_edges(node) {
            self.kill(cache, edge);
        }
    }

    /// Returns true if the node's trigger is satisfied by the fired edges.
    pub(crate) fn trigger_satisfied(&self, node: &Node, cache: &NodeExecutionCache) -> bool {
        let id = node.id();
        if cache.forced.contains(&id) {
            return true;
        }
        let Some(fired) = cache.fired_edges.get(&id).filter(|fired| !fired.is_empty()) else {
            return false;
        };
        match node.trigger().merge_behavior {
            MergeBehavior::AwaitAny | MergeBehavior::AwaitAttributes => true,
            MergeBehavior::AwaitAll => self
                .graph
                .incoming_edges(id)
                .into_iter()
                .filter(|edge| !cache.dead_edges.contains(&edge.id))
                .filter(|edge| !self.graph.is_cyclic_edge(edge))
                .all(|edge| fired.contains(&edge.id)),
        }
    }

    /// Evaluates a node that is neither queued nor running.
    pub(crate) fn evaluate(
        &self,
        node: &Node,
        cache: &mut NodeExecutionCache,
        state: &State,
    ) -> Evaluation {
        let id = node.id();
        let waiting = cache.waiting.contains(&id);
        if !waiting && !self.trigger_satisfied(node, cache) {
            return Evaluation::Pending;
        }
        consume(cache, id);
        if attributes_resolvable(node, state) {
            cache.waiting.remove(&id);
            cache.enqueue(id);
            return Evaluation::Ready;
        }
        if node.trigger().merge_behavior == MergeBehavior::AwaitAttributes {
            cache.waiting.insert(id);
        }
        Evaluation::Unresolved
    }
}

/// Clears the activation of a node that is about to be queued.
fn consume(cache: &mut NodeExecutionCache, node: NodeId) {
    cache.forced.remove(&node);
    cache.fired_edges.remove(&node);
}

/// Returns true unless some attribute is still unresolved. Hard resolution
/// failures count as resolvable so dispatch can report them, and missing
/// external inputs count too because dispatch pauses on them.
pub(crate) fn attributes_resolvable(node: &Node, state: &State) -> bool {
    node.attributes()
        .iter()
        .all(|(_, reference)| match reference.resolve(state) {
            Ok(_) | Err(ResolveError::UnresolvedExternalInput { .. }) => true,
            Err(e) => !e.is_unresolved(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::Workflow;
    use crate::graph::Graph;
    use crate::node::ValueKind;
    use crate::port::{Port, Ports};
    use crate::reference::Reference;
    use serde_json::json;

    fn create_node(name: &str) -> Node {
        Node::builder(name).output("value", ValueKind::Any).build()
    }

    fn default_ports() -> Vec<String> {
        vec!["default".to_string()]
    }

    #[test]
    fn await_any_fires_on_first_edge() {
        let (a, b, c) = (create_node("A"), create_node("B"), create_node("C"));
        let workflow = Workflow::builder("w")
            .graph(Graph::union([&a, &b]) >> &c)
            .build()
            .expect("build");
        let readiness = Readiness::new(workflow.graph());
        let mut cache = NodeExecutionCache::default();

        readiness.fire_ports(&mut cache, a.id(), &default_ports());
        let state = State::default();
        assert_eq!(readiness.evaluate(&c, &mut cache, &state), Evaluation::Ready);
        assert_eq!(cache.queued, vec![c.id()]);
    }

    #[test]
    fn await_all_waits_for_every_live_edge() {
        let (a, b) = (create_node("A"), create_node("B"));
        let c = Node::builder("C").trigger(MergeBehavior::AwaitAll).build();
        let workflow = Workflow::builder("w")
            .graph(Graph::union([&a, &b]) >> &c)
            .build()
            .expect("build");
        let readiness = Readiness::new(workflow.graph());
        let mut cache = NodeExecutionCache::default();
        let state = State::default();

        readiness.fire_ports(&mut cache, a.id(), &default_ports());
        assert_eq!(readiness.evaluate(&c, &mut cache, &state), Evaluation::Pending);
        readiness.fire_ports(&mut cache, b.id(), &default_ports());
        assert_eq!(readiness.evaluate(&c, &mut cache, &state), Evaluation::Ready);
    }

    #[test]
    fn await_all_ignores_dead_paths() {
        let router = Node::builder("Router")
            .ports(Ports::new(vec![
                Port::if_("left", Reference::input("go_left")),
                Port::else_("right"),
            ]))
            .build();
        let (left, right) = (create_node("Left"), create_node("Right"));
        let join = Node::builder("Join").trigger(MergeBehavior::AwaitAll).build();
        let workflow = Workflow::builder("w")
            .graph(Graph::union([router.port("left") >> &left, router.port("right") >> &right]) >> &join)
            .build()
            .expect("build");
        let readiness = Readiness::new(workflow.graph());
        let mut cache = NodeExecutionCache::default();
        let state = State::default();

        readiness.fire_ports(&mut cache, router.id(), &["left".to_string()]);
        assert!(cache.skipped.contains(&right.id()));
        readiness.fire_ports(&mut cache, left.id(), &default_ports());
        assert_eq!(readiness.evaluate(&join, &mut cache, &state), Evaluation::Ready);
    }

    #[test]
    fn skipping_propagates_downstream() {
        let router = Node::builder("Router")
            .ports(Ports::new(vec![
                Port::if_("yes", Reference::input("flag")),
                Port::else_("no"),
            ]))
            .build();
        let (x, y) = (create_node("X"), create_node("Y"));
        let workflow = Workflow::builder("w")
            .graph(router.port("yes") >> &x >> &y)
            .build()
            .expect("build");
        let readiness = Readiness::new(workflow.graph());
        let mut cache = NodeExecutionCache::default();

        readiness.fire_ports(&mut cache, router.id(), &["no".to_string()]);
        assert!(cache.skipped.contains(&x.id()));
        assert!(cache.skipped.contains(&y.id()));
    }

    #[test]
    fn unresolved_attributes_wait_only_under_await_attributes() {
        let a = create_node("A");
        let eager = Node::builder("Eager")
            .attribute("other", Reference::lazy("Other", "value"))
            .build();
        let patient = Node::builder("Patient")
            .attribute("other", Reference::lazy("Other", "value"))
            .trigger(MergeBehavior::AwaitAttributes)
            .build();
        let other = create_node("Other");
        let workflow = Workflow::builder("w")
            .graph(Graph::union([&a >> Graph::union([&eager, &patient]), Graph::from(&other)]))
            .build()
            .expect("build");
        let readiness = Readiness::new(workflow.graph());
        let mut cache = NodeExecutionCache::default();
        let mut state = State::default();

        readiness.fire_ports(&mut cache, a.id(), &default_ports());
        assert_eq!(readiness.evaluate(&eager, &mut cache, &state), Evaluation::Unresolved);
        assert_eq!(readiness.evaluate(&patient, &mut cache, &state), Evaluation::Unresolved);
        assert!(!cache.waiting.contains(&eager.id()));
        assert!(cache.waiting.contains(&patient.id()));

        state.set_node_output(other.id(), "value", json!(1));
        assert_eq!(readiness.evaluate(&eager, &mut cache, &state), Evaluation::Pending);
        assert_eq!(readiness.evaluate(&patient, &mut cache, &state), Evaluation::Ready);
    }

    #[test]
    fn forced_nodes_are_satisfied() {
        let (a, b) = (create_node("A"), create_node("B"));
        let workflow = Workflow::builder("w").graph(&a >> &b).build().expect("build");
        let readiness = Readiness::new(workflow.graph());
        let mut cache = NodeExecutionCache::default();
        readiness.force(&mut cache, &[b.id()]);
        assert!(readiness.trigger_satisfied(&b, &cache));
        assert_eq!(readiness.evaluate(&b, &mut cache, &State::default()), Evaluation::Ready);
        assert!(cache.forced.is_empty());
    }
}
