//! Append-only event log and state snapshots of one workflow execution.
//!
//! The store is owned by the runner that created it; node code never
//! touches it. Each snapshot remembers how many events had been appended
//! when it was taken, which orders snapshots against events without
//! relying on clock resolution.

use crate::envelope::{Envelope, EnvelopeError};
use crate::error::RunnerError;
use crate::events::{EventBody, WorkflowEvent};
use crate::execution::NodeExecutionState;
use crate::node::NodeId;
use crate::state::State;
use serde::{Deserialize, Serialize};
use std::path::Path;
use trellis_core::SpanId;

/// A state copy positioned in the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Number of events appended before the snapshot was taken.
    pub event_cursor: usize,
    /// The copied state.
    pub state: State,
}

/// Events and snapshots of one workflow execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    span_id: SpanId,
    events: Vec<WorkflowEvent>,
    snapshots: Vec<Snapshot>,
}

impl Store {
    /// Creates an empty store for the workflow execution span.
    #[must_use]
    pub fn new(span_id: SpanId) -> Self {
        Self {
            span_id,
            events: Vec::new(),
            snapshots: Vec::new(),
        }
    }

    /// Returns the span of the owning workflow execution.
    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns all recorded events, nested ones included.
    #[must_use]
    pub fn events(&self) -> &[WorkflowEvent] {
        &self.events
    }

    /// Returns all snapshots in the order they were taken.
    #[must_use]
    pub fn snapshots(&self) -> &[Snapshot] {
        &self.snapshots
    }

    pub(crate) fn append_event(&mut self, event: WorkflowEvent) {
        self.events.push(event);
    }

    pub(crate) fn append_snapshot(&mut self, state: &State) {
        self.snapshots.push(Snapshot {
            event_cursor: self.events.len(),
            state: state.snapshot(),
        });
    }

    fn is_own_node_event(&self, event: &WorkflowEvent) -> bool {
        event
            .parent
            .as_ref()
            .is_some_and(|parent| parent.span_id == self.span_id)
    }

    /// Returns the events of this execution's own nodes for one node.
    pub fn node_events(&self, node_id: NodeId) -> impl Iterator<Item = &WorkflowEvent> {
        self.events
            .iter()
            .filter(move |event| event.node_id() == Some(node_id) && self.is_own_node_event(event))
    }

    /// Returns the lifecycle state of the node's latest execution.
    #[must_use]
    pub fn node_state(&self, node_id: NodeId) -> Option<NodeExecutionState> {
        self.node_events(node_id)
            .filter_map(|event| NodeExecutionState::after(&event.body))
            .last()
    }

    /// Returns the state as it was right before the node last started,
    /// through `node.execution.initiated` or `node.execution.resumed`.
    #[must_use]
    pub fn get_state_at_node(&self, node_id: NodeId) -> Option<State> {
        let position = self.events.iter().rposition(|event| {
            matches!(
                event.body,
                EventBody::NodeInitiated { .. } | EventBody::NodeResumed { .. }
            )
                && event.node_id() == Some(node_id)
                && self.is_own_node_event(event)
        })?;
        self.snapshots
            .iter()
            .rev()
            .find(|snapshot| snapshot.event_cursor <= position)
            .map(|snapshot| snapshot.state.snapshot())
    }

    /// Returns the latest snapshot by update time.
    #[must_use]
    pub fn get_most_recent_state(&self) -> Option<State> {
        self.snapshots
            .iter()
            .max_by_key(|snapshot| (snapshot.state.updated_at(), snapshot.state.version()))
            .map(|snapshot| snapshot.state.snapshot())
    }

    fn own_workflow_event(&self, predicate: impl Fn(&EventBody) -> bool) -> Option<&WorkflowEvent> {
        self.events
            .iter()
            .rev()
            .find(|event| event.span_id == self.span_id && predicate(&event.body))
    }

    /// Returns the terminal workflow event, if the execution ended.
    #[must_use]
    pub fn terminal_event(&self) -> Option<&WorkflowEvent> {
        self.own_workflow_event(EventBody::is_workflow_terminal)
    }

    /// Checks that the log has an initiated and a terminal workflow event.
    ///
    /// # Errors
    ///
    /// Returns `MissingInitiatedEvent` or `MissingTerminalEvent`.
    pub fn verify(&self) -> Result<&WorkflowEvent, RunnerError> {
        self.own_workflow_event(|body| matches!(body, EventBody::WorkflowInitiated(_)))
            .ok_or(RunnerError::MissingInitiatedEvent)?;
        self.terminal_event()
            .ok_or(RunnerError::MissingTerminalEvent)
    }

    /// Serializes the store in a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_envelope_bytes(&self) -> trellis_core::Result<Vec<u8>, EnvelopeError> {
        Envelope::new(self).to_json_bytes()
    }

    /// Restores a store persisted with `to_envelope_bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope or were
    /// written by a newer format version.
    pub fn from_envelope_bytes(bytes: &[u8]) -> trellis_core::Result<Self, EnvelopeError> {
        Envelope::<Store>::from_json_bytes(bytes).map(Envelope::into_payload)
    }

    /// Writes the store to a file in a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> trellis_core::Result<(), EnvelopeError> {
        Envelope::new(self).write_to(path)
    }

    /// Reads a store written by `save`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load(path: impl AsRef<Path>) -> trellis_core::Result<Self, EnvelopeError> {
        Envelope::<Store>::read_from(path).map(Envelope::into_payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{NodeRef, ParentContext, WorkflowInitiatedBody};
    use crate::exception::NodeException;
    use crate::node::Outputs;
    use serde_json::json;
    use std::collections::BTreeMap;
    use trellis_core::TraceId;

    struct Fixture {
        store: Store,
        trace: TraceId,
        context: ParentContext,
    }

    impl Fixture {
        fn new() -> Self {
            let span = SpanId::new();
            Self {
                store: Store::new(span),
                trace: TraceId::new(),
                context: ParentContext::workflow(span, "w", None),
            }
        }

        fn workflow(&mut self, body: EventBody) {
            let event = WorkflowEvent::new(self.trace, self.store.span_id(), None, body);
            self.store.append_event(event);
        }

        fn node(&mut self, name: &str, initiated: bool) {
            let node = NodeRef {
                node_id: NodeId::from_name(name),
                node_name: name.to_string(),
            };
            let body = if initiated {
                EventBody::NodeInitiated {
                    node,
                    inputs: BTreeMap::new(),
                }
            } else {
                EventBody::NodeFulfilled {
                    node,
                    outputs: Outputs::new(),
                    invoked_ports: Vec::new(),
                }
            };
            let event = WorkflowEvent::new(self.trace, SpanId::new(), Some(self.context.clone()), body);
            self.store.append_event(event);
        }
    }

    fn initiated() -> EventBody {
        EventBody::WorkflowInitiated(WorkflowInitiatedBody {
            workflow: "w".to_string(),
            inputs: BTreeMap::new(),
        })
    }

    #[test]
    fn state_at_node_is_snapshot_before_initiation() {
        let mut fx = Fixture::new();
        let mut live = State::default();
        fx.workflow(initiated());
        fx.store.append_snapshot(&live);
        fx.node("A", true);
        fx.node("A", false);
        live.set_node_output(NodeId::from_name("A"), "value", json!(1));
        fx.store.append_snapshot(&live);
        fx.node("B", true);

        let at_a = fx.store.get_state_at_node(NodeId::from_name("A")).expect("state");
        assert!(at_a.node_output(NodeId::from_name("A"), "value").is_none());

        let at_b = fx.store.get_state_at_node(NodeId::from_name("B")).expect("state");
        assert_eq!(at_b.node_output(NodeId::from_name("A"), "value"), Some(&json!(1)));

        assert!(fx.store.get_state_at_node(NodeId::from_name("C")).is_none());
        assert_eq!(
            fx.store.node_state(NodeId::from_name("A")),
            Some(NodeExecutionState::Fulfilled)
        );
        assert_eq!(
            fx.store.node_state(NodeId::from_name("B")),
            Some(NodeExecutionState::Running)
        );
    }

    #[test]
    fn most_recent_state_is_latest_snapshot() {
        let mut fx = Fixture::new();
        let mut live = State::default();
        fx.store.append_snapshot(&live);
        live.set_field("step", json!(2));
        fx.store.append_snapshot(&live);

        let recent = fx.store.get_most_recent_state().expect("state");
        assert_eq!(recent.field("step"), Some(&json!(2)));
    }

    #[test]
    fn returned_snapshots_are_detached() {
        let mut fx = Fixture::new();
        fx.store.append_snapshot(&State::default());
        let mut copy = fx.store.get_most_recent_state().expect("state");
        copy.set_field("x", json!(1));
        let again = fx.store.get_most_recent_state().expect("state");
        assert!(again.field("x").is_none());
    }

    #[test]
    fn verify_requires_initiated_and_terminal() {
        let mut fx = Fixture::new();
        assert_eq!(fx.store.verify().unwrap_err(), RunnerError::MissingInitiatedEvent);
        fx.workflow(initiated());
        assert_eq!(fx.store.verify().unwrap_err(), RunnerError::MissingTerminalEvent);
        fx.workflow(EventBody::WorkflowRejected {
            workflow: "w".to_string(),
            error: NodeException::internal("boom"),
        });
        assert_eq!(
            fx.store.verify().map(WorkflowEvent::name),
            Ok("workflow.execution.rejected")
        );
    }

    #[test]
    fn node_events_ignore_nested_executions() {
        let mut fx = Fixture::new();
        fx.node("A", true);
        let nested = ParentContext::workflow(SpanId::new(), "A.subworkflow", None);
        let event = WorkflowEvent::new(
            fx.trace,
            SpanId::new(),
            Some(nested),
            EventBody::NodeResumed {
                node: NodeRef {
                    node_id: NodeId::from_name("A"),
                    node_name: "A".to_string(),
                },
            },
        );
        fx.store.append_event(event);
        assert_eq!(fx.store.node_events(NodeId::from_name("A")).count(), 1);
    }

    #[test]
    fn envelope_round_trip() {
        let mut fx = Fixture::new();
        fx.workflow(initiated());
        fx.store.append_snapshot(&State::default());
        let bytes = fx.store.to_envelope_bytes().expect("serialize");
        let restored = Store::from_envelope_bytes(&bytes).expect("deserialize");
        assert_eq!(restored, fx.store);
    }

    #[test]
    fn saved_store_loads_back() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("store.json");
        let mut fx = Fixture::new();
        fx.workflow(initiated());
        fx.node("A", true);

        fx.store.save(&path).expect("save");
        let restored = Store::load(&path).expect("load");

        assert_eq!(restored.events().len(), fx.store.events().len());
        assert_eq!(
            restored.node_state(NodeId::from_name("A")),
            fx.store.node_state(NodeId::from_name("A"))
        );
    }
}
