//! The execution event protocol.
//!
//! Every event carries:
//! - a trace id shared by the whole top-level execution
//! - a span id identifying one workflow or node execution
//! - the parent context chain for nested executions
//! - a typed body, tagged with names like `node.execution.fulfilled`
//!
//! Events of one node execution are strictly ordered: `initiated`, any
//! number of `streaming`, then exactly one terminal event.

use crate::exception::NodeException;
use crate::node::{NodeId, Outputs};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use trellis_core::{EventId, SpanId, TraceId};

/// What a parent context entry describes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ParentKind {
    /// A workflow execution.
    Workflow { name: String },
    /// A node execution; `iteration` is set for map iterations.
    Node {
        node_id: NodeId,
        name: String,
        iteration: Option<usize>,
    },
}

/// One link of the chain from an event up to the top-level execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentContext {
    /// Span of the enclosing execution.
    pub span_id: SpanId,
    /// What the enclosing execution is.
    #[serde(flatten)]
    pub kind: ParentKind,
    /// The next link up.
    pub parent: Option<Box<ParentContext>>,
}

impl ParentContext {
    /// Creates a workflow context.
    #[must_use]
    pub fn workflow(
        span_id: SpanId,
        name: impl Into<String>,
        parent: Option<ParentContext>,
    ) -> Self {
        Self {
            span_id,
            kind: ParentKind::Workflow { name: name.into() },
            parent: parent.map(Box::new),
        }
    }

    /// Creates a node context.
    #[must_use]
    pub fn node(
        span_id: SpanId,
        node_id: NodeId,
        name: impl Into<String>,
        parent: Option<ParentContext>,
    ) -> Self {
        Self {
            span_id,
            kind: ParentKind::Node {
                node_id,
                name: name.into(),
                iteration: None,
            },
            parent: parent.map(Box::new),
        }
    }

    /// Returns a copy tagged with a map iteration index.
    #[must_use]
    pub fn with_iteration(mut self, index: usize) -> Self {
        if let ParentKind::Node { iteration, .. } = &mut self.kind {
            *iteration = Some(index);
        }
        self
    }

    /// Returns the workflow name if this link is a workflow.
    #[must_use]
    pub fn workflow_name(&self) -> Option<&str> {
        match &self.kind {
            ParentKind::Workflow { name } => Some(name),
            ParentKind::Node { .. } => None,
        }
    }

    /// Returns the nearest map iteration index up the chain.
    #[must_use]
    pub fn iteration(&self) -> Option<usize> {
        match &self.kind {
            ParentKind::Node {
                iteration: Some(index),
                ..
            } => Some(*index),
            _ => self.parent.as_deref().and_then(ParentContext::iteration),
        }
    }

    /// Returns the number of links in the chain.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.parent.as_deref().map_or(0, ParentContext::depth)
    }
}

/// Progress of a streamed output value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaState {
    /// Output production started; no value yet.
    Initiated,
    /// A partial chunk; not merged into state.
    Streaming,
    /// The final value of the output; merged into state.
    Fulfilled,
}

/// A streamed change to one output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDelta {
    /// Output name.
    pub name: String,
    /// Chunk or final value.
    pub value: Option<JsonValue>,
    /// Map iteration that produced the delta.
    pub index: Option<usize>,
    /// Progress of the output.
    pub state: DeltaState,
}

impl OutputDelta {
    /// A partial chunk.
    #[must_use]
    pub fn chunk(name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            index: None,
            state: DeltaState::Streaming,
        }
    }

    /// A final value for one output.
    #[must_use]
    pub fn fulfilled(name: impl Into<String>, value: JsonValue) -> Self {
        Self {
            name: name.into(),
            value: Some(value),
            index: None,
            state: DeltaState::Fulfilled,
        }
    }

    /// Tags the delta with a map iteration index.
    #[must_use]
    pub fn at_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    /// Returns true if the delta is a final, un-indexed value.
    #[must_use]
    pub fn is_mergeable(&self) -> bool {
        self.state == DeltaState::Fulfilled && self.index.is_none() && self.value.is_some()
    }
}

/// An external input that blocks a paused execution.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExternalInputRef {
    /// The node declaring the input.
    pub node_id: NodeId,
    /// The node's name.
    pub node_name: String,
    /// The input name.
    pub name: String,
}

/// Body of a `workflow.execution.initiated` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowInitiatedBody {
    pub workflow: String,
    pub inputs: BTreeMap<String, JsonValue>,
}

/// Body of a node event that names its node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub node_id: NodeId,
    pub node_name: String,
}

/// Typed event bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "body")]
pub enum EventBody {
    #[serde(rename = "workflow.execution.initiated")]
    WorkflowInitiated(WorkflowInitiatedBody),
    #[serde(rename = "workflow.execution.streaming")]
    WorkflowStreaming { workflow: String, output: OutputDelta },
    #[serde(rename = "workflow.execution.fulfilled")]
    WorkflowFulfilled { workflow: String, outputs: Outputs },
    #[serde(rename = "workflow.execution.rejected")]
    WorkflowRejected {
        workflow: String,
        error: NodeException,
    },
    #[serde(rename = "workflow.execution.paused")]
    WorkflowPaused {
        workflow: String,
        external_inputs: Vec<ExternalInputRef>,
    },
    #[serde(rename = "workflow.execution.resumed")]
    WorkflowResumed { workflow: String },
    #[serde(rename = "node.execution.initiated")]
    NodeInitiated {
        #[serde(flatten)]
        node: NodeRef,
        inputs: BTreeMap<String, JsonValue>,
    },
    #[serde(rename = "node.execution.streaming")]
    NodeStreaming {
        #[serde(flatten)]
        node: NodeRef,
        output: OutputDelta,
    },
    #[serde(rename = "node.execution.fulfilled")]
    NodeFulfilled {
        #[serde(flatten)]
        node: NodeRef,
        outputs: Outputs,
        invoked_ports: Vec<String>,
    },
    #[serde(rename = "node.execution.rejected")]
    NodeRejected {
        #[serde(flatten)]
        node: NodeRef,
        error: NodeException,
    },
    #[serde(rename = "node.execution.paused")]
    NodePaused {
        #[serde(flatten)]
        node: NodeRef,
        external_inputs: Vec<ExternalInputRef>,
    },
    #[serde(rename = "node.execution.resumed")]
    NodeResumed {
        #[serde(flatten)]
        node: NodeRef,
    },
}

impl EventBody {
    /// Returns the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::WorkflowInitiated(_) => "workflow.execution.initiated",
            Self::WorkflowStreaming { .. } => "workflow.execution.streaming",
            Self::WorkflowFulfilled { .. } => "workflow.execution.fulfilled",
            Self::WorkflowRejected { .. } => "workflow.execution.rejected",
            Self::WorkflowPaused { .. } => "workflow.execution.paused",
            Self::WorkflowResumed { .. } => "workflow.execution.resumed",
            Self::NodeInitiated { .. } => "node.execution.initiated",
            Self::NodeStreaming { .. } => "node.execution.streaming",
            Self::NodeFulfilled { .. } => "node.execution.fulfilled",
            Self::NodeRejected { .. } => "node.execution.rejected",
            Self::NodePaused { .. } => "node.execution.paused",
            Self::NodeResumed { .. } => "node.execution.resumed",
        }
    }

    /// Returns true for workflow-level events.
    #[must_use]
    pub fn is_workflow_event(&self) -> bool {
        self.workflow_name().is_some()
    }

    /// Returns the workflow definition name of a workflow-level event.
    #[must_use]
    pub fn workflow_name(&self) -> Option<&str> {
        match self {
            Self::WorkflowInitiated(body) => Some(&body.workflow),
            Self::WorkflowStreaming { workflow, .. }
            | Self::WorkflowFulfilled { workflow, .. }
            | Self::WorkflowRejected { workflow, .. }
            | Self::WorkflowPaused { workflow, .. }
            | Self::WorkflowResumed { workflow } => Some(workflow),
            _ => None,
        }
    }

    /// Returns the node of a node-level event.
    #[must_use]
    pub fn node(&self) -> Option<&NodeRef> {
        match self {
            Self::NodeInitiated { node, .. }
            | Self::NodeStreaming { node, .. }
            | Self::NodeFulfilled { node, .. }
            | Self::NodeRejected { node, .. }
            | Self::NodePaused { node, .. }
            | Self::NodeResumed { node } => Some(node),
            _ => None,
        }
    }

    /// Returns true for events that end a workflow execution.
    #[must_use]
    pub fn is_workflow_terminal(&self) -> bool {
        matches!(
            self,
            Self::WorkflowFulfilled { .. } | Self::WorkflowRejected { .. } | Self::WorkflowPaused { .. }
        )
    }
}

/// An event emitted by an execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowEvent {
    /// Unique event identity.
    pub id: EventId,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Trace of the top-level execution.
    pub trace_id: TraceId,
    /// Span of the workflow or node execution the event belongs to.
    pub span_id: SpanId,
    /// Enclosing executions, innermost first.
    pub parent: Option<ParentContext>,
    /// The typed body.
    #[serde(flatten)]
    pub body: EventBody,
}

impl WorkflowEvent {
    /// Creates an event stamped with the current time.
    #[must_use]
    pub fn new(
        trace_id: TraceId,
        span_id: SpanId,
        parent: Option<ParentContext>,
        body: EventBody,
    ) -> Self {
        Self {
            id: EventId::new(),
            timestamp: Utc::now(),
            trace_id,
            span_id,
            parent,
            body,
        }
    }

    /// Returns the wire name of the event.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.body.name()
    }

    /// Returns the node id of a node-level event.
    #[must_use]
    pub fn node_id(&self) -> Option<NodeId> {
        self.body.node().map(|node| node.node_id)
    }

    /// Returns the map iteration index the event is nested under.
    #[must_use]
    pub fn iteration(&self) -> Option<usize> {
        self.parent.as_ref().and_then(ParentContext::iteration)
    }
}
