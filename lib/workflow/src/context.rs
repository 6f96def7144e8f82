//! The per-execution handle given to a node's `run`.
//!
//! Node code never touches the live state or the store. Everything it
//! produces travels to the scheduler as a `NodeMessage`, and the scheduler
//! applies it in arrival order.

use crate::config::RunnerConfig;
use crate::definition::Workflow;
use crate::events::{OutputDelta, ParentContext, WorkflowEvent};
use crate::exception::NodeException;
use crate::mock::MockNodeExecution;
use crate::node::{Node, NodeId, Outputs};
use crate::state::State;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use trellis_core::{SpanId, TraceId};

/// What a running node reports back to its scheduler.
#[derive(Debug)]
pub(crate) enum NodeMessage {
    /// A streamed chunk or a per-output final value.
    Delta {
        node_id: NodeId,
        span_id: SpanId,
        delta: OutputDelta,
    },
    /// A write to a declared state field.
    StateUpdate {
        node_id: NodeId,
        span_id: SpanId,
        field: String,
        value: JsonValue,
    },
    /// An event of a nested execution, passed through unchanged.
    Forward(Box<WorkflowEvent>),
    /// The node's `run` returned.
    Finished {
        node_id: NodeId,
        span_id: SpanId,
        result: Result<Outputs, NodeException>,
    },
}

/// Everything a node execution can see and do.
pub struct NodeContext {
    node: Node,
    workflow: Arc<Workflow>,
    span_id: SpanId,
    trace_id: TraceId,
    attributes: BTreeMap<String, JsonValue>,
    state: Arc<State>,
    own_context: ParentContext,
    sender: mpsc::UnboundedSender<NodeMessage>,
    cancel: CancellationToken,
    mocks: Arc<[MockNodeExecution]>,
    config: RunnerConfig,
}

pub(crate) struct NodeContextParts {
    pub node: Node,
    pub workflow: Arc<Workflow>,
    pub span_id: SpanId,
    pub trace_id: TraceId,
    pub attributes: BTreeMap<String, JsonValue>,
    pub state: Arc<State>,
    pub workflow_context: ParentContext,
    pub sender: mpsc::UnboundedSender<NodeMessage>,
    pub cancel: CancellationToken,
    pub mocks: Arc<[MockNodeExecution]>,
    pub config: RunnerConfig,
}

impl NodeContext {
    pub(crate) fn new(parts: NodeContextParts) -> Self {
        let own_context = ParentContext::node(
            parts.span_id,
            parts.node.id(),
            parts.node.name(),
            Some(parts.workflow_context),
        );
        Self {
            node: parts.node,
            workflow: parts.workflow,
            span_id: parts.span_id,
            trace_id: parts.trace_id,
            attributes: parts.attributes,
            state: parts.state,
            own_context,
            sender: parts.sender,
            cancel: parts.cancel,
            mocks: parts.mocks,
            config: parts.config,
        }
    }

    /// Returns the node being executed.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Returns the span of this node execution.
    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.span_id
    }

    /// Returns the trace of the top-level execution.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.trace_id
    }

    /// Returns all resolved attributes.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, JsonValue> {
        &self.attributes
    }

    /// Returns one resolved attribute.
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&JsonValue> {
        self.attributes.get(name)
    }

    /// Deserializes one resolved attribute.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_INPUTS` if the attribute is missing or has the
    /// wrong shape.
    pub fn attribute_as<T: DeserializeOwned>(&self, name: &str) -> Result<T, NodeException> {
        let value = self.attribute(name).ok_or_else(|| {
            NodeException::invalid_inputs(format!(
                "node '{}' has no attribute '{name}'",
                self.node.name()
            ))
        })?;
        serde_json::from_value(value.clone()).map_err(|e| {
            NodeException::invalid_inputs(format!("attribute '{name}' is invalid: {e}"))
        })
    }

    /// Returns the state as it was when the node was dispatched.
    #[must_use]
    pub fn state(&self) -> &State {
        &self.state
    }

    /// Returns a shared handle to the dispatch-time state, for nested runs.
    #[must_use]
    pub fn state_arc(&self) -> Arc<State> {
        Arc::clone(&self.state)
    }

    /// Returns an external input supplied for this node.
    #[must_use]
    pub fn external_input(&self, name: &str) -> Option<&JsonValue> {
        self.state.external_input(self.node.id(), name)
    }

    /// Streams a partial chunk of an output. Chunks are not merged into state.
    ///
    /// # Errors
    ///
    /// Returns a cancellation exception if the execution was cancelled.
    pub fn stream(&self, name: impl Into<String>, chunk: JsonValue) -> Result<(), NodeException> {
        self.emit_delta(OutputDelta::chunk(name, chunk))
    }

    /// Emits the final value of one output before `run` returns. The value
    /// is merged into state at once, so downstream streamable ports can fire.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_OUTPUTS` for undeclared outputs or mistyped values,
    /// or a cancellation exception.
    pub fn emit_output(&self, name: impl Into<String>, value: JsonValue) -> Result<(), NodeException> {
        let name = name.into();
        let single = Outputs::from([(name.clone(), value.clone())]);
        self.node.validate_outputs(&single)?;
        self.emit_delta(OutputDelta::fulfilled(name, value))
    }

    /// Emits a prepared delta.
    ///
    /// # Errors
    ///
    /// Returns a cancellation exception if the execution was cancelled.
    pub fn emit_delta(&self, delta: OutputDelta) -> Result<(), NodeException> {
        self.ensure_active()?;
        self.send(NodeMessage::Delta {
            node_id: self.node.id(),
            span_id: self.span_id,
            delta,
        })
    }

    /// Writes a declared state field of the enclosing workflow.
    ///
    /// # Errors
    ///
    /// Returns `INVALID_OUTPUTS` if the field is not declared.
    pub fn update_state(&self, field: impl Into<String>, value: JsonValue) -> Result<(), NodeException> {
        let field = field.into();
        if !self.workflow.state_fields().contains_key(&field) {
            return Err(NodeException::invalid_outputs(format!(
                "workflow '{}' declares no state field '{field}'",
                self.workflow.name()
            )));
        }
        self.ensure_active()?;
        self.send(NodeMessage::StateUpdate {
            node_id: self.node.id(),
            span_id: self.span_id,
            field,
            value,
        })
    }

    /// Passes an event of a nested execution up to the scheduler.
    ///
    /// # Errors
    ///
    /// Returns a cancellation exception if the scheduler is gone.
    pub fn forward(&self, event: WorkflowEvent) -> Result<(), NodeException> {
        self.send(NodeMessage::Forward(Box::new(event)))
    }

    pub(crate) fn finish(&self, result: Result<Outputs, NodeException>) {
        let message = NodeMessage::Finished {
            node_id: self.node.id(),
            span_id: self.span_id,
            result,
        };
        if self.send(message).is_err() {
            tracing::debug!(node = %self.node.name(), "scheduler gone before node finished");
        }
    }

    /// Returns true once the execution has been cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when the execution is cancelled.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Returns the cancellation token of this node execution.
    #[must_use]
    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Returns the parent context for executions nested in this node.
    #[must_use]
    pub fn child_context(&self, iteration: Option<usize>) -> ParentContext {
        match iteration {
            Some(index) => self.own_context.clone().with_iteration(index),
            None => self.own_context.clone(),
        }
    }

    /// Returns the mocks handed to nested executions.
    #[must_use]
    pub fn mocks(&self) -> Arc<[MockNodeExecution]> {
        Arc::clone(&self.mocks)
    }

    /// Returns the runner configuration.
    #[must_use]
    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    fn ensure_active(&self) -> Result<(), NodeException> {
        if self.is_cancelled() {
            return Err(NodeException::cancelled());
        }
        Ok(())
    }

    fn send(&self, message: NodeMessage) -> Result<(), NodeException> {
        self.sender
            .send(message)
            .map_err(|_| NodeException::cancelled())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::events::DeltaState;
    use crate::exception::ErrorCode;
    use crate::node::ValueKind;
    use serde_json::json;

    pub(crate) fn create_context(
        node: Node,
        workflow: Workflow,
        attributes: BTreeMap<String, JsonValue>,
    ) -> (NodeContext, mpsc::UnboundedReceiver<NodeMessage>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let context = NodeContext::new(NodeContextParts {
            node,
            workflow: Arc::new(workflow),
            span_id: SpanId::new(),
            trace_id: TraceId::new(),
            attributes,
            state: Arc::new(State::default()),
            workflow_context: ParentContext::workflow(SpanId::new(), "w", None),
            sender,
            cancel: CancellationToken::new(),
            mocks: Arc::from(Vec::new()),
            config: RunnerConfig::default(),
        });
        (context, receiver)
    }

    fn create_fixture() -> (NodeContext, mpsc::UnboundedReceiver<NodeMessage>) {
        let node = Node::builder("Writer")
            .output("text", ValueKind::String)
            .build();
        let workflow = Workflow::builder("w")
            .state_field("count", json!(0))
            .graph(&node)
            .build()
            .expect("build");
        let attributes = BTreeMap::from([("limit".to_string(), json!(3))]);
        create_context(node, workflow, attributes)
    }

    #[test]
    fn attribute_as_deserializes() {
        let (ctx, _rx) = create_fixture();
        assert_eq!(ctx.attribute_as::<u32>("limit").expect("limit"), 3);
        let err = ctx.attribute_as::<String>("limit").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInputs);
        let err = ctx.attribute_as::<u32>("missing").unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidInputs);
    }

    #[test]
    fn stream_and_emit_send_deltas() {
        let (ctx, mut rx) = create_fixture();
        ctx.stream("text", json!("par")).expect("stream");
        ctx.emit_output("text", json!("partial")).expect("emit");
        let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
            .filter_map(|message| match message {
                NodeMessage::Delta { delta, .. } => Some(delta.state),
                _ => None,
            })
            .collect();
        assert_eq!(states, vec![DeltaState::Streaming, DeltaState::Fulfilled]);
    }

    #[test]
    fn emit_output_validates_schema() {
        let (ctx, _rx) = create_fixture();
        let err = ctx.emit_output("text", json!(5)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOutputs);
        let err = ctx.emit_output("other", json!("x")).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOutputs);
    }

    #[test]
    fn update_state_requires_declared_field() {
        let (ctx, mut rx) = create_fixture();
        ctx.update_state("count", json!(1)).expect("declared");
        assert!(matches!(rx.try_recv(), Ok(NodeMessage::StateUpdate { .. })));
        let err = ctx.update_state("undeclared", json!(1)).unwrap_err();
        assert_eq!(err.code, ErrorCode::InvalidOutputs);
    }

    #[test]
    fn cancelled_context_refuses_output() {
        let (ctx, _rx) = create_fixture();
        ctx.cancel_token().cancel();
        assert!(ctx.is_cancelled());
        let err = ctx.stream("text", json!("x")).unwrap_err();
        assert_eq!(err.code, ErrorCode::WorkflowCancelled);
    }

    #[test]
    fn child_context_carries_iteration() {
        let (ctx, _rx) = create_fixture();
        let child = ctx.child_context(Some(2));
        assert_eq!(child.iteration(), Some(2));
        assert_eq!(child.depth(), 2);
        assert_eq!(ctx.child_context(None).iteration(), None);
    }
}
