//! Mutable, versioned execution state.
//!
//! A `State` holds everything an execution has learned so far:
//! - workflow inputs
//! - node outputs, keyed by node then output name
//! - declared state fields
//! - external inputs supplied on resume
//! - scheduling bookkeeping, so a persisted state is enough to resume
//!
//! Every mutation bumps the version and the update timestamp. Nested
//! executions chain to the enclosing state through `parent`: reads fall
//! through to the parent, writes never reach it.

use crate::edge::EdgeId;
use crate::envelope::{Envelope, EnvelopeError};
use crate::node::{NodeId, Outputs};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use trellis_core::{SpanId, StateId, TraceId};

/// Scheduling bookkeeping persisted with the state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeExecutionCache {
    /// Completed executions per node.
    pub fulfilled: BTreeMap<NodeId, u32>,
    /// Nodes that became ready and have not finished, in activation order.
    pub queued: Vec<NodeId>,
    /// Activated nodes blocked on their trigger or on unresolved attributes.
    pub waiting: BTreeSet<NodeId>,
    /// Nodes activated without an incoming edge (entrypoints, restarts).
    pub forced: BTreeSet<NodeId>,
    /// Incoming edges that fired and have not been consumed, per target node.
    pub fired_edges: BTreeMap<NodeId, BTreeSet<EdgeId>>,
    /// Edges that can no longer fire in this execution.
    pub dead_edges: BTreeSet<EdgeId>,
    /// Nodes that can no longer run because every incoming edge is dead.
    pub skipped: BTreeSet<NodeId>,
    /// Paused nodes and the span of the execution that paused.
    pub paused: BTreeMap<NodeId, SpanId>,
}

impl NodeExecutionCache {
    /// Returns true if nothing has been scheduled yet.
    #[must_use]
    pub fn is_pristine(&self) -> bool {
        self.fulfilled.is_empty() && self.queued.is_empty() && self.skipped.is_empty()
    }

    /// Returns how many times the node has been fulfilled.
    #[must_use]
    pub fn fulfilled_count(&self, node: NodeId) -> u32 {
        self.fulfilled.get(&node).copied().unwrap_or(0)
    }

    pub(crate) fn enqueue(&mut self, node: NodeId) {
        if !self.queued.contains(&node) {
            self.queued.push(node);
        }
    }

    pub(crate) fn dequeue(&mut self, node: NodeId) {
        self.queued.retain(|queued| *queued != node);
    }
}

/// Metadata and execution-owned data of a state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateMeta {
    /// Identity of this state container.
    pub id: StateId,
    /// Trace of the execution that owns the state.
    pub trace_id: Option<TraceId>,
    /// Incremented on every mutation.
    pub version: u64,
    /// Time of the last mutation, strictly increasing.
    pub updated_at: DateTime<Utc>,
    /// Workflow inputs.
    pub workflow_inputs: BTreeMap<String, JsonValue>,
    /// Node outputs produced so far.
    pub node_outputs: BTreeMap<NodeId, BTreeMap<String, JsonValue>>,
    /// External inputs supplied so far.
    pub external_inputs: BTreeMap<NodeId, BTreeMap<String, JsonValue>>,
    /// Scheduling bookkeeping.
    pub node_execution: NodeExecutionCache,
}

/// The state of one workflow execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct State {
    meta: StateMeta,
    #[serde(default)]
    fields: BTreeMap<String, JsonValue>,
    #[serde(skip)]
    parent: Option<Arc<State>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            meta: StateMeta {
                id: StateId::new(),
                trace_id: None,
                version: 0,
                updated_at: Utc::now(),
                workflow_inputs: BTreeMap::new(),
                node_outputs: BTreeMap::new(),
                external_inputs: BTreeMap::new(),
                node_execution: NodeExecutionCache::default(),
            },
            fields: BTreeMap::new(),
            parent: None,
        }
    }
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.meta == other.meta && self.fields == other.fields
    }
}

impl State {
    /// Creates an empty state owned by the given trace.
    #[must_use]
    pub fn new(trace_id: TraceId) -> Self {
        let mut state = Self::default();
        state.meta.trace_id = Some(trace_id);
        state
    }

    /// Chains this state to the state of the enclosing execution.
    #[must_use]
    pub fn with_parent(mut self, parent: Arc<State>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Returns the parent state, if any.
    #[must_use]
    pub fn parent(&self) -> Option<&Arc<State>> {
        self.parent.as_ref()
    }

    /// Returns the metadata.
    #[must_use]
    pub fn meta(&self) -> &StateMeta {
        &self.meta
    }

    /// Returns the state version.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.meta.version
    }

    /// Returns the time of the last mutation.
    #[must_use]
    pub fn updated_at(&self) -> DateTime<Utc> {
        self.meta.updated_at
    }

    /// Returns the scheduling bookkeeping.
    #[must_use]
    pub fn node_execution(&self) -> &NodeExecutionCache {
        &self.meta.node_execution
    }

    pub(crate) fn node_execution_mut(&mut self) -> &mut NodeExecutionCache {
        self.touch();
        &mut self.meta.node_execution
    }

    /// Looks up a workflow input, falling back to the parent chain.
    #[must_use]
    pub fn workflow_input(&self, name: &str) -> Option<&JsonValue> {
        self.meta
            .workflow_inputs
            .get(name)
            .or_else(|| self.parent.as_deref()?.workflow_input(name))
    }

    /// Returns this state's own workflow inputs.
    #[must_use]
    pub fn workflow_inputs(&self) -> &BTreeMap<String, JsonValue> {
        &self.meta.workflow_inputs
    }

    /// Looks up a state field, falling back to the parent chain.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&JsonValue> {
        self.fields
            .get(name)
            .or_else(|| self.parent.as_deref()?.field(name))
    }

    /// Returns this state's own fields.
    #[must_use]
    pub fn fields(&self) -> &BTreeMap<String, JsonValue> {
        &self.fields
    }

    /// Looks up a node output, falling back to the parent chain.
    #[must_use]
    pub fn node_output(&self, node: NodeId, output: &str) -> Option<&JsonValue> {
        self.meta
            .node_outputs
            .get(&node)
            .and_then(|outputs| outputs.get(output))
            .or_else(|| self.parent.as_deref()?.node_output(node, output))
    }

    /// Returns the outputs this state holds for a node.
    #[must_use]
    pub fn node_outputs(&self, node: NodeId) -> Option<&BTreeMap<String, JsonValue>> {
        self.meta.node_outputs.get(&node)
    }

    /// Looks up an external input. External inputs are never inherited.
    #[must_use]
    pub fn external_input(&self, node: NodeId, name: &str) -> Option<&JsonValue> {
        self.meta
            .external_inputs
            .get(&node)
            .and_then(|inputs| inputs.get(name))
    }

    /// Sets a workflow input.
    pub fn set_workflow_input(&mut self, name: impl Into<String>, value: JsonValue) {
        self.meta.workflow_inputs.insert(name.into(), value);
        self.touch();
    }

    /// Sets a state field on this state only.
    pub fn set_field(&mut self, name: impl Into<String>, value: JsonValue) {
        self.fields.insert(name.into(), value);
        self.touch();
    }

    /// Sets one node output.
    pub fn set_node_output(&mut self, node: NodeId, output: impl Into<String>, value: JsonValue) {
        self.meta
            .node_outputs
            .entry(node)
            .or_default()
            .insert(output.into(), value);
        self.touch();
    }

    /// Merges a set of node outputs.
    pub fn merge_node_outputs(&mut self, node: NodeId, outputs: &Outputs) {
        let slot = self.meta.node_outputs.entry(node).or_default();
        for (name, value) in outputs {
            slot.insert(name.clone(), value.clone());
        }
        self.touch();
    }

    /// Records an externally supplied input.
    pub fn set_external_input(&mut self, node: NodeId, name: impl Into<String>, value: JsonValue) {
        self.meta
            .external_inputs
            .entry(node)
            .or_default()
            .insert(name.into(), value);
        self.touch();
    }

    /// Returns a detached copy of the state.
    #[must_use]
    pub fn snapshot(&self) -> State {
        self.clone()
    }

    /// Serializes the state in a versioned envelope.
    ///
    /// The parent chain is not persisted.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_envelope_bytes(&self) -> trellis_core::Result<Vec<u8>, EnvelopeError> {
        Envelope::new(self).to_json_bytes()
    }

    /// Restores a state persisted with `to_envelope_bytes`.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes are not a valid envelope or were
    /// written by a newer format version.
    pub fn from_envelope_bytes(bytes: &[u8]) -> trellis_core::Result<Self, EnvelopeError> {
        Envelope::<State>::from_json_bytes(bytes).map(Envelope::into_payload)
    }

    /// Writes the state to a file in a versioned envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if encoding or writing fails.
    pub fn save(&self, path: impl AsRef<Path>) -> trellis_core::Result<(), EnvelopeError> {
        Envelope::new(self).write_to(path)
    }

    /// Reads a state written by `save`.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or decoded.
    pub fn load(path: impl AsRef<Path>) -> trellis_core::Result<Self, EnvelopeError> {
        Envelope::<State>::read_from(path).map(Envelope::into_payload)
    }

    fn touch(&mut self) {
        self.meta.version += 1;
        let now = Utc::now();
        self.meta.updated_at = if now > self.meta.updated_at {
            now
        } else {
            self.meta.updated_at + Duration::microseconds(1)
        };
    }
}
