//! Execution state machines.
//!
//! A node execution moves `Pending -> Ready -> Running -> Streaming* ->
//! {Fulfilled | Rejected | Paused}`. A workflow execution moves
//! `Initiated -> Running -> {Fulfilled | Rejected | Paused}`, and a paused
//! workflow re-enters `Running` through `Resumed`.

use crate::events::EventBody;
use serde::{Deserialize, Serialize};

/// The state of one workflow execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowExecutionState {
    /// The execution was accepted and inputs are being prepared.
    Initiated,
    /// Nodes are being scheduled.
    Running,
    /// A paused execution was re-entered with external inputs.
    Resumed,
    /// Every workflow output resolved.
    Fulfilled,
    /// A node failed, the execution was cancelled, or inputs were invalid.
    Rejected,
    /// The execution waits for external inputs.
    Paused,
}

impl WorkflowExecutionState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Rejected | Self::Paused)
    }

    /// Returns the state a workflow-level event moves the execution to.
    #[must_use]
    pub fn after(body: &EventBody) -> Option<Self> {
        match body {
            EventBody::WorkflowInitiated(_) => Some(Self::Initiated),
            EventBody::WorkflowStreaming { .. } => Some(Self::Running),
            EventBody::WorkflowResumed { .. } => Some(Self::Resumed),
            EventBody::WorkflowFulfilled { .. } => Some(Self::Fulfilled),
            EventBody::WorkflowRejected { .. } => Some(Self::Rejected),
            EventBody::WorkflowPaused { .. } => Some(Self::Paused),
            _ => None,
        }
    }
}

/// The state of one node execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeExecutionState {
    /// Waiting for its trigger.
    Pending,
    /// Trigger satisfied and attributes resolvable; waiting for a slot.
    Ready,
    /// Dispatched.
    Running,
    /// Produced at least one streamed output.
    Streaming,
    /// Completed with outputs.
    Fulfilled,
    /// Completed with an exception.
    Rejected,
    /// Blocked on external inputs.
    Paused,
}

impl NodeExecutionState {
    /// Returns true if this is a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Fulfilled | Self::Rejected | Self::Paused)
    }

    /// Returns the state a node-level event moves the execution to.
    #[must_use]
    pub fn after(body: &EventBody) -> Option<Self> {
        match body {
            EventBody::NodeInitiated { .. } | EventBody::NodeResumed { .. } => Some(Self::Running),
            EventBody::NodeStreaming { .. } => Some(Self::Streaming),
            EventBody::NodeFulfilled { .. } => Some(Self::Fulfilled),
            EventBody::NodeRejected { .. } => Some(Self::Rejected),
            EventBody::NodePaused { .. } => Some(Self::Paused),
            _ => None,
        }
    }

    /// Returns true if `next` may follow this state.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        match (self, next) {
            (Self::Pending, Self::Ready) | (Self::Ready, Self::Running) => true,
            (Self::Running | Self::Streaming, Self::Streaming) => true,
            (Self::Running | Self::Streaming, next) => next.is_terminal(),
            (Self::Paused, Self::Running) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::NodeRef;
    use crate::exception::NodeException;
    use crate::node::NodeId;

    #[test]
    fn terminal_states() {
        assert!(WorkflowExecutionState::Paused.is_terminal());
        assert!(!WorkflowExecutionState::Resumed.is_terminal());
        assert!(NodeExecutionState::Rejected.is_terminal());
        assert!(!NodeExecutionState::Streaming.is_terminal());
    }

    #[test]
    fn node_lifecycle_transitions() {
        use NodeExecutionState::*;
        assert!(Pending.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Running));
        assert!(Running.can_transition_to(Streaming));
        assert!(Streaming.can_transition_to(Fulfilled));
        assert!(Paused.can_transition_to(Running));
        assert!(!Fulfilled.can_transition_to(Streaming));
        assert!(!Pending.can_transition_to(Running));
    }

    #[test]
    fn events_map_to_states() {
        let node = NodeRef {
            node_id: NodeId::from_name("A"),
            node_name: "A".to_string(),
        };
        let rejected = EventBody::NodeRejected {
            node,
            error: NodeException::internal("boom"),
        };
        assert_eq!(
            NodeExecutionState::after(&rejected),
            Some(NodeExecutionState::Rejected)
        );
        assert_eq!(WorkflowExecutionState::after(&rejected), None);
    }
}
