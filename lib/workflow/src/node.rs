//! Workflow node definitions.
//!
//! A node is a named unit of work. Each node has:
//! - A stable ID derived from its name
//! - Attributes, each bound to a `Reference` resolved at dispatch time
//! - A trigger policy deciding when multiple incoming edges make it ready
//! - Ports whose conditions select the outgoing edges that fire
//! - A declared output schema and optional external inputs
//! - A `NodeRun` behaviour invoked by the runner
//!
//! Nodes are cheap to clone; clones share one definition.

use crate::context::NodeContext;
use crate::exception::NodeException;
use crate::port::Ports;
use crate::reference::Reference;
use crate::trigger::{MergeBehavior, Trigger};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use ulid::Ulid;

const FNV_OFFSET_BASIS: u128 = 0x6c62_272e_07bb_0142_62b8_2175_6295_c58d;
const FNV_PRIME: u128 = 0x0000_0000_0100_0000_0000_0000_0000_013b;

/// FNV-1a over the given byte slices, yielding a stable 128-bit value.
pub(crate) fn stable_hash(parts: &[&[u8]]) -> u128 {
    let mut hash = FNV_OFFSET_BASIS;
    for part in parts {
        for byte in *part {
            hash ^= u128::from(*byte);
            hash = hash.wrapping_mul(FNV_PRIME);
        }
        // separator so ("ab", "c") and ("a", "bc") differ
        hash ^= 0xff;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// A unique identifier for a node, stable across processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Derives the node ID from a node name.
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self(Ulid::from(stable_hash(&[name.as_bytes()])))
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// The JSON shape a declared value must have.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    /// Any JSON value.
    #[default]
    Any,
    /// A JSON string.
    String,
    /// Any JSON number.
    Number,
    /// A JSON number without fractional part.
    Integer,
    /// A JSON boolean.
    Boolean,
    /// A JSON array.
    Array,
    /// A JSON object.
    Object,
}

impl ValueKind {
    /// Returns true if the value has this kind. `null` is accepted for every kind.
    #[must_use]
    pub fn accepts(&self, value: &JsonValue) -> bool {
        match (self, value) {
            (_, JsonValue::Null) | (Self::Any, _) => true,
            (Self::String, JsonValue::String(_)) => true,
            (Self::Number, JsonValue::Number(_)) => true,
            (Self::Integer, JsonValue::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Boolean, JsonValue::Bool(_)) => true,
            (Self::Array, JsonValue::Array(_)) => true,
            (Self::Object, JsonValue::Object(_)) => true,
            _ => false,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Any => "any",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        };
        f.write_str(name)
    }
}

/// Returns the JSON type name of a value, for error messages.
#[must_use]
pub fn json_kind_name(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "boolean",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

/// The values a node produces, keyed by output name.
pub type Outputs = BTreeMap<String, JsonValue>;

/// Builds an `Outputs` map from name/value pairs.
#[must_use]
pub fn outputs<'a>(pairs: impl IntoIterator<Item = (&'a str, JsonValue)>) -> Outputs {
    pairs
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect()
}

/// A declared output of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputField {
    /// Output name.
    pub name: String,
    /// Expected kind of the value.
    pub kind: ValueKind,
}

/// A named hole on a node that must be supplied from outside the execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalInputDecl {
    /// Input name, unique per node.
    pub name: String,
    /// Expected kind of the supplied value.
    pub kind: ValueKind,
}

/// The behaviour of a node.
///
/// `run` may call `NodeContext::stream` and `NodeContext::emit_output` any
/// number of times before returning its final outputs. Returning an error
/// rejects the node execution.
#[async_trait]
pub trait NodeRun: Send + Sync {
    /// Executes the node once.
    async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException>;

    /// Returns true if `run` watches `NodeContext::cancelled` itself and
    /// returns once cancelled. Such runs are awaited to completion instead
    /// of being dropped on cancellation.
    fn handles_cancellation(&self) -> bool {
        false
    }
}

/// Adapts a synchronous closure into a `NodeRun`.
pub struct FnNode<F>(F);

#[async_trait]
impl<F> NodeRun for FnNode<F>
where
    F: Fn(&NodeContext) -> Result<Outputs, NodeException> + Send + Sync,
{
    async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException> {
        (self.0)(ctx)
    }
}

struct NoopRun;

#[async_trait]
impl NodeRun for NoopRun {
    async fn run(&self, _ctx: &NodeContext) -> Result<Outputs, NodeException> {
        Ok(Outputs::new())
    }
}

struct NodeInner {
    id: NodeId,
    name: String,
    attributes: Vec<(String, Reference)>,
    trigger: Trigger,
    ports: Ports,
    outputs: Vec<OutputField>,
    external_inputs: Vec<ExternalInputDecl>,
    behavior: Arc<dyn NodeRun>,
}

/// A workflow node.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    /// Starts building a node with the given name.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> NodeBuilder {
        NodeBuilder::new(name)
    }

    /// Returns the node's ID.
    #[must_use]
    pub fn id(&self) -> NodeId {
        self.inner.id
    }

    /// Returns the node's name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the declared attributes in declaration order.
    #[must_use]
    pub fn attributes(&self) -> &[(String, Reference)] {
        &self.inner.attributes
    }

    /// Returns the node's trigger policy.
    #[must_use]
    pub fn trigger(&self) -> &Trigger {
        &self.inner.trigger
    }

    /// Returns the node's ports.
    #[must_use]
    pub fn ports(&self) -> &Ports {
        &self.inner.ports
    }

    /// Returns the declared outputs.
    #[must_use]
    pub fn outputs(&self) -> &[OutputField] {
        &self.inner.outputs
    }

    /// Returns true if the node declares the output.
    #[must_use]
    pub fn declares_output(&self, name: &str) -> bool {
        self.inner.outputs.iter().any(|field| field.name == name)
    }

    /// Returns the declared external inputs.
    #[must_use]
    pub fn external_inputs(&self) -> &[ExternalInputDecl] {
        &self.inner.external_inputs
    }

    pub(crate) fn behavior(&self) -> Arc<dyn NodeRun> {
        Arc::clone(&self.inner.behavior)
    }

    /// Returns a reference to one of this node's outputs.
    #[must_use]
    pub fn output(&self, name: &str) -> Reference {
        Reference::node_output(self.id(), name)
    }

    /// Returns a handle to one of this node's ports, for graph composition.
    #[must_use]
    pub fn port(&self, name: &str) -> PortHandle {
        PortHandle {
            node: self.clone(),
            port: name.to_string(),
        }
    }

    /// Returns a reference to one of this node's external inputs.
    #[must_use]
    pub fn external_input_ref(&self, name: &str) -> Reference {
        Reference::ExternalInput {
            node: self.id(),
            name: name.to_string(),
        }
    }

    /// Returns true if both handles share one definition.
    #[must_use]
    pub fn same_definition(&self, other: &Node) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Checks produced outputs against the declared schema.
    ///
    /// # Errors
    ///
    /// Returns an `INVALID_OUTPUTS` exception for undeclared names or values
    /// of the wrong kind.
    pub fn validate_outputs(&self, outputs: &Outputs) -> Result<(), NodeException> {
        for (name, value) in outputs {
            let field = self
                .inner
                .outputs
                .iter()
                .find(|field| &field.name == name)
                .ok_or_else(|| {
                    NodeException::invalid_outputs(format!(
                        "node '{}' produced undeclared output '{name}'",
                        self.name()
                    ))
                })?;
            if !field.kind.accepts(value) {
                return Err(NodeException::invalid_outputs(format!(
                    "output '{name}' of node '{}' expected {}, got {}",
                    self.name(),
                    field.kind,
                    json_kind_name(value)
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.inner.id)
            .field("name", &self.inner.name)
            .field("ports", &self.inner.ports)
            .field("outputs", &self.inner.outputs)
            .finish_non_exhaustive()
    }
}

/// A node paired with one of its port names.
#[derive(Debug, Clone)]
pub struct PortHandle {
    pub(crate) node: Node,
    pub(crate) port: String,
}

impl PortHandle {
    /// Returns the node owning the port.
    #[must_use]
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Returns the port name.
    #[must_use]
    pub fn port(&self) -> &str {
        &self.port
    }
}

/// Builder for `Node`.
pub struct NodeBuilder {
    name: String,
    attributes: Vec<(String, Reference)>,
    trigger: Trigger,
    ports: Ports,
    outputs: Vec<OutputField>,
    external_inputs: Vec<ExternalInputDecl>,
    behavior: Arc<dyn NodeRun>,
}

impl NodeBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            trigger: Trigger::default(),
            ports: Ports::default(),
            outputs: Vec::new(),
            external_inputs: Vec::new(),
            behavior: Arc::new(NoopRun),
        }
    }

    /// Binds an attribute. Re-binding a name replaces the earlier reference.
    #[must_use]
    pub fn attribute(mut self, name: impl Into<String>, value: impl Into<Reference>) -> Self {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(existing, _)| *existing == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
        self
    }

    /// Declares an output.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.outputs.push(OutputField {
            name: name.into(),
            kind,
        });
        self
    }

    /// Replaces the default ports.
    #[must_use]
    pub fn ports(mut self, ports: Ports) -> Self {
        self.ports = ports;
        self
    }

    /// Sets the merge behaviour of the node's trigger.
    #[must_use]
    pub fn trigger(mut self, merge_behavior: MergeBehavior) -> Self {
        self.trigger = Trigger::new(merge_behavior);
        self
    }

    /// Declares an external input the node needs before it can run.
    #[must_use]
    pub fn external_input(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.external_inputs.push(ExternalInputDecl {
            name: name.into(),
            kind,
        });
        self
    }

    /// Sets the node behaviour.
    #[must_use]
    pub fn run(mut self, behavior: impl NodeRun + 'static) -> Self {
        self.behavior = Arc::new(behavior);
        self
    }

    /// Sets the node behaviour from a synchronous closure.
    #[must_use]
    pub fn run_fn<F>(self, f: F) -> Self
    where
        F: Fn(&NodeContext) -> Result<Outputs, NodeException> + Send + Sync + 'static,
    {
        self.run(FnNode(f))
    }

    /// Builds the node.
    #[must_use]
    pub fn build(self) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                id: NodeId::from_name(&self.name),
                name: self.name,
                attributes: self.attributes,
                trigger: self.trigger,
                ports: self.ports,
                outputs: self.outputs,
                external_inputs: self.external_inputs,
                behavior: self.behavior,
            }),
        }
    }
}
