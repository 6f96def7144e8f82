//! Conditional node mocks for deterministic tests.
//!
//! A mock replaces a node's `run` with fixed outputs whenever its `when`
//! condition holds against the state seen right before the node starts.
//! Mocks are handed down to nested executions, so nodes wrapped by
//! adornments can be mocked too.

use crate::node::{Node, NodeId, Outputs};
use crate::reference::{Reference, truthy};
use crate::state::State;
use serde_json::Value as JsonValue;

/// A conditional override of one node's execution.
#[derive(Debug, Clone, PartialEq)]
pub struct MockNodeExecution {
    /// The node being mocked.
    pub node_id: NodeId,
    /// Condition evaluated against the pre-execution state.
    pub when: Reference,
    /// Outputs returned instead of running the node.
    pub then_outputs: Outputs,
}

impl MockNodeExecution {
    /// Starts a mock for `node` that always applies and returns no outputs.
    #[must_use]
    pub fn for_node(node: &Node) -> Self {
        Self {
            node_id: node.id(),
            when: Reference::Constant(JsonValue::Bool(true)),
            then_outputs: Outputs::new(),
        }
    }

    /// Sets the condition.
    #[must_use]
    pub fn when(mut self, condition: impl Into<Reference>) -> Self {
        self.when = condition.into();
        self
    }

    /// Sets the outputs.
    #[must_use]
    pub fn then_outputs(mut self, outputs: Outputs) -> Self {
        self.then_outputs = outputs;
        self
    }

    /// Returns true if the mock applies. A condition that does not resolve
    /// does not apply.
    #[must_use]
    pub fn applies(&self, node_id: NodeId, state: &State) -> bool {
        self.node_id == node_id && self.when.resolve(state).is_ok_and(|value| truthy(&value))
    }
}

/// Returns the outputs of the first applicable mock.
pub(crate) fn find_mock<'a>(
    mocks: &'a [MockNodeExecution],
    node_id: NodeId,
    state: &State,
) -> Option<&'a Outputs> {
    mocks
        .iter()
        .find(|mock| mock.applies(node_id, state))
        .map(|mock| &mock.then_outputs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::{ValueKind, outputs};
    use serde_json::json;

    fn create_node() -> Node {
        Node::builder("Search")
            .output("hits", ValueKind::Integer)
            .build()
    }

    #[test]
    fn unconditional_mock_applies() {
        let node = create_node();
        let mock = MockNodeExecution::for_node(&node).then_outputs(outputs([("hits", json!(3))]));
        let mocks = [mock];
        let found = find_mock(&mocks, node.id(), &State::default());
        assert_eq!(found.and_then(|o| o.get("hits")), Some(&json!(3)));
    }

    #[test]
    fn condition_is_checked_against_state() {
        let node = create_node();
        let mocks = [
            MockNodeExecution::for_node(&node)
                .when(Reference::input("query").equals(json!("rust")))
                .then_outputs(outputs([("hits", json!(10))])),
            MockNodeExecution::for_node(&node).then_outputs(outputs([("hits", json!(0))])),
        ];

        let mut state = State::default();
        state.set_workflow_input("query", json!("rust"));
        assert_eq!(
            find_mock(&mocks, node.id(), &state).and_then(|o| o.get("hits")),
            Some(&json!(10))
        );

        let mut other = State::default();
        other.set_workflow_input("query", json!("go"));
        assert_eq!(
            find_mock(&mocks, node.id(), &other).and_then(|o| o.get("hits")),
            Some(&json!(0))
        );
    }

    #[test]
    fn unresolved_condition_does_not_apply() {
        let node = create_node();
        let mock = MockNodeExecution::for_node(&node).when(Reference::input("missing"));
        assert!(!mock.applies(node.id(), &State::default()));
        assert!(!mock.applies(NodeId::from_name("Other"), &State::default()));
    }
}
