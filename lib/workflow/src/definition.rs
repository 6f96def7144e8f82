//! Workflow definition types.
//!
//! A workflow consists of:
//! - Metadata (name, description, version)
//! - Declared inputs with kinds and optional defaults
//! - Declared state fields with initial values
//! - The executed graph plus optional unused graphs
//! - Named outputs, each bound to a `Reference`
//!
//! Building a workflow resolves its graphs, validates ports and checks
//! every forward reference against the complete node registry.

use crate::edge::Edge;
use crate::error::{GraphError, WorkflowInitializationError};
use crate::graph::{Graph, WorkflowGraph};
use crate::node::{Node, NodeId, OutputField, ValueKind, json_kind_name};
use crate::port::Port;
use crate::reference::Reference;
use crate::state::State;
use crate::trigger::MergeBehavior;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;

/// Metadata for a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowMetadata {
    /// Human-readable name for this workflow.
    pub name: String,
    /// Description of what this workflow does.
    pub description: Option<String>,
    /// Semantic version of this workflow definition.
    pub version: String,
}

impl WorkflowMetadata {
    /// Creates new metadata with default values.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            version: "0.1.0".to_string(),
        }
    }
}

/// A declared workflow input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputField {
    /// Input name.
    pub name: String,
    /// Expected kind.
    pub kind: ValueKind,
    /// Value used when the caller supplies none.
    pub default: Option<JsonValue>,
}

/// A workflow definition.
#[derive(Debug, Clone)]
pub struct Workflow {
    metadata: WorkflowMetadata,
    graph: WorkflowGraph,
    unused: WorkflowGraph,
    inputs: Vec<InputField>,
    state_fields: BTreeMap<String, JsonValue>,
    outputs: Vec<(String, Reference)>,
}

impl Workflow {
    /// Starts building a workflow.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> WorkflowBuilder {
        WorkflowBuilder::new(name)
    }

    /// Wraps a single node into a subworkflow whose outputs are the node's
    /// declared outputs.
    ///
    /// # Errors
    ///
    /// Returns an error if the node's ports are malformed.
    pub fn from_node(node: &Node) -> trellis_core::Result<Self, GraphError> {
        let mut builder = Workflow::builder(format!("{}.subworkflow", node.name()))
            .graph(node)
            .allow_outer_references();
        for field in node.outputs() {
            builder = builder.output(field.name.clone(), node.output(&field.name));
        }
        builder.build()
    }

    /// Returns the workflow name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.metadata.name
    }

    /// Returns the metadata.
    #[must_use]
    pub fn metadata(&self) -> &WorkflowMetadata {
        &self.metadata
    }

    /// Returns the executed graph.
    #[must_use]
    pub fn graph(&self) -> &WorkflowGraph {
        &self.graph
    }

    /// Returns the graph of declared but unused nodes.
    #[must_use]
    pub fn unused_graph(&self) -> &WorkflowGraph {
        &self.unused
    }

    /// Returns the declared inputs.
    #[must_use]
    pub fn inputs(&self) -> &[InputField] {
        &self.inputs
    }

    /// Returns true if the workflow declares the input.
    #[must_use]
    pub fn declares_input(&self, name: &str) -> bool {
        self.inputs.iter().any(|field| field.name == name)
    }

    /// Returns the declared state fields and their initial values.
    #[must_use]
    pub fn state_fields(&self) -> &BTreeMap<String, JsonValue> {
        &self.state_fields
    }

    /// Returns the declared outputs.
    #[must_use]
    pub fn outputs(&self) -> &[(String, Reference)] {
        &self.outputs
    }

    /// Returns a node of the executed graph.
    #[must_use]
    pub fn node(&self, node_id: NodeId) -> Option<&Node> {
        self.graph.node(node_id)
    }

    /// Applies defaults and validates supplied inputs.
    ///
    /// Inputs missing here but visible through `parent` are left to be
    /// resolved from the parent state.
    ///
    /// # Errors
    ///
    /// Returns an error for undeclared, missing or mistyped inputs.
    pub fn prepare_inputs(
        &self,
        supplied: &BTreeMap<String, JsonValue>,
        parent: Option<&State>,
    ) -> Result<BTreeMap<String, JsonValue>, WorkflowInitializationError> {
        if let Some(name) = supplied.keys().find(|name| !self.declares_input(name)) {
            return Err(WorkflowInitializationError::UnexpectedInput { name: name.clone() });
        }
        let mut prepared = BTreeMap::new();
        for field in &self.inputs {
            match supplied.get(&field.name).or(field.default.as_ref()) {
                Some(value) if !field.kind.accepts(value) => {
                    return Err(WorkflowInitializationError::InvalidInput {
                        name: field.name.clone(),
                        expected: field.kind,
                        actual: json_kind_name(value).to_string(),
                    });
                }
                Some(value) => {
                    prepared.insert(field.name.clone(), value.clone());
                }
                None if parent.is_some_and(|p| p.workflow_input(&field.name).is_some()) => {}
                None => {
                    return Err(WorkflowInitializationError::MissingInput {
                        name: field.name.clone(),
                    });
                }
            }
        }
        Ok(prepared)
    }

    /// Returns a serializable summary of the topology, unused nodes included.
    #[must_use]
    pub fn topology(&self) -> Topology {
        Topology {
            name: self.metadata.name.clone(),
            nodes: self.graph.nodes().map(TopologyNode::from).collect(),
            edges: self.graph.edges().cloned().collect(),
            entrypoints: self.graph.entrypoints().to_vec(),
            unused_nodes: self.unused.nodes().map(TopologyNode::from).collect(),
            unused_edges: self.unused.edges().cloned().collect(),
            inputs: self.inputs.clone(),
            outputs: self.outputs.iter().map(|(name, _)| name.clone()).collect(),
        }
    }
}

/// A serializable node summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TopologyNode {
    pub id: NodeId,
    pub name: String,
    pub merge_behavior: MergeBehavior,
    pub ports: Vec<Port>,
    pub outputs: Vec<OutputField>,
}

impl From<&Node> for TopologyNode {
    fn from(node: &Node) -> Self {
        Self {
            id: node.id(),
            name: node.name().to_string(),
            merge_behavior: node.trigger().merge_behavior,
            ports: node.ports().iter().cloned().collect(),
            outputs: node.outputs().to_vec(),
        }
    }
}

/// A serializable summary of a workflow's graphs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topology {
    pub name: String,
    pub nodes: Vec<TopologyNode>,
    pub edges: Vec<Edge>,
    pub entrypoints: Vec<NodeId>,
    pub unused_nodes: Vec<TopologyNode>,
    pub unused_edges: Vec<Edge>,
    pub inputs: Vec<InputField>,
    pub outputs: Vec<String>,
}

/// Builder for `Workflow`.
pub struct WorkflowBuilder {
    metadata: WorkflowMetadata,
    inputs: Vec<InputField>,
    state_fields: BTreeMap<String, JsonValue>,
    graphs: Vec<Graph>,
    unused: Vec<Graph>,
    outputs: Vec<(String, Reference)>,
    allow_outer_references: bool,
}

impl WorkflowBuilder {
    fn new(name: impl Into<String>) -> Self {
        Self {
            metadata: WorkflowMetadata::new(name),
            inputs: Vec::new(),
            state_fields: BTreeMap::new(),
            graphs: Vec::new(),
            unused: Vec::new(),
            outputs: Vec::new(),
            allow_outer_references: false,
        }
    }

    /// Sets the description.
    #[must_use]
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.metadata.description = Some(description.into());
        self
    }

    /// Sets the version.
    #[must_use]
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.metadata.version = version.into();
        self
    }

    /// Declares a required input.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, kind: ValueKind) -> Self {
        self.inputs.push(InputField {
            name: name.into(),
            kind,
            default: None,
        });
        self
    }

    /// Declares an input with a default value.
    #[must_use]
    pub fn input_with_default(
        mut self,
        name: impl Into<String>,
        kind: ValueKind,
        default: JsonValue,
    ) -> Self {
        self.inputs.push(InputField {
            name: name.into(),
            kind,
            default: Some(default),
        });
        self
    }

    /// Declares a state field with its initial value.
    #[must_use]
    pub fn state_field(mut self, name: impl Into<String>, initial: JsonValue) -> Self {
        self.state_fields.insert(name.into(), initial);
        self
    }

    /// Adds a graph to execute.
    #[must_use]
    pub fn graph(mut self, graph: impl Into<Graph>) -> Self {
        self.graphs.push(graph.into());
        self
    }

    /// Adds a graph that is part of the definition but never executed.
    #[must_use]
    pub fn unused_graph(mut self, graph: impl Into<Graph>) -> Self {
        self.unused.push(graph.into());
        self
    }

    /// Declares a workflow output.
    #[must_use]
    pub fn output(mut self, name: impl Into<String>, reference: impl Into<Reference>) -> Self {
        self.outputs.push((name.into(), reference.into()));
        self
    }

    /// Lets references point at nodes outside this workflow, resolved
    /// through the parent state at run time. Used for subworkflows.
    #[must_use]
    pub fn allow_outer_references(mut self) -> Self {
        self.allow_outer_references = true;
        self
    }

    /// Builds the workflow.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - a node is declared in both the graph and an unused graph
    /// - two different nodes share a name
    /// - a node's ports are malformed
    /// - a forward reference names an unknown node
    /// - a reference names an undeclared output
    /// - a workflow output points at a node outside the executed graph
    pub fn build(self) -> trellis_core::Result<Workflow, GraphError> {
        let graph = WorkflowGraph::resolve(&self.graphs)?;
        let unused = WorkflowGraph::resolve(&self.unused)?;

        if let Some(node) = unused.nodes().find(|node| graph.contains(node.id())) {
            return Err(GraphError::DuplicateNode {
                node_id: node.id(),
                name: node.name().to_string(),
            }
            .into());
        }

        for node in graph.nodes().chain(unused.nodes()) {
            node.ports()
                .validate()
                .map_err(|reason| GraphError::MalformedPorts {
                    node: node.name().to_string(),
                    reason,
                })?;
        }

        let registry = Registry {
            graph: &graph,
            unused: &unused,
            allow_outer: self.allow_outer_references,
        };
        for node in graph.nodes().chain(unused.nodes()) {
            let referrer = format!("node '{}'", node.name());
            for (_, reference) in node.attributes() {
                registry.check(&referrer, reference)?;
            }
            for condition in node.ports().iter().filter_map(|port| port.condition.as_ref()) {
                registry.check(&referrer, condition)?;
            }
        }
        for (name, reference) in &self.outputs {
            registry.check(&format!("workflow output '{name}'"), reference)?;
            if !self.allow_outer_references {
                let target = match reference {
                    Reference::NodeOutput { node, .. } => Some(*node),
                    Reference::Lazy { node_name, .. } => Some(NodeId::from_name(node_name)),
                    _ => None,
                };
                if let Some(target) = target.filter(|id| !graph.contains(*id)) {
                    let node = unused
                        .node(target)
                        .map_or_else(|| target.to_string(), |n| n.name().to_string());
                    return Err(GraphError::UnreachableOutput {
                        output: name.clone(),
                        node,
                    }
                    .into());
                }
            }
        }

        Ok(Workflow {
            metadata: self.metadata,
            graph,
            unused,
            inputs: self.inputs,
            state_fields: self.state_fields,
            outputs: self.outputs,
        })
    }
}

/// The complete node registry used to bind forward references.
struct Registry<'a> {
    graph: &'a WorkflowGraph,
    unused: &'a WorkflowGraph,
    allow_outer: bool,
}

impl Registry<'_> {
    fn lookup(&self, node_id: NodeId) -> Option<&Node> {
        self.graph.node(node_id).or_else(|| self.unused.node(node_id))
    }

    fn check(&self, referrer: &str, reference: &Reference) -> Result<(), GraphError> {
        let mut leaves = Vec::new();
        reference.leaves(&mut leaves);
        for leaf in leaves {
            let (target, output) = match leaf {
                Reference::NodeOutput { node, output } => (self.lookup(*node), output),
                Reference::Lazy { node_name, output } => {
                    let target = self.lookup(NodeId::from_name(node_name));
                    if target.is_none() && !self.allow_outer {
                        return Err(GraphError::UnresolvedForwardReference {
                            referrer: referrer.to_string(),
                            node: node_name.clone(),
                            output: output.clone(),
                        });
                    }
                    (target, output)
                }
                _ => continue,
            };
            if let Some(target) = target.filter(|target| !target.declares_output(output)) {
                return Err(GraphError::UnknownOutput {
                    node: target.name().to_string(),
                    output: output.clone(),
                });
            }
        }
        Ok(())
    }
}
