//! Error types for the workflow crate.
//!
//! Errors are split by the layer that raises them:
//! - `GraphError`: construction-time problems with nodes, ports and references
//! - `ResolveError`: a reference could not be resolved against a state
//! - `WorkflowInitializationError`: inputs supplied to an execution are invalid
//! - `RunnerError`: scheduler-internal failures
//!
//! Failures raised by node bodies are not Rust errors; see `NodeException`.

use crate::node::{NodeId, ValueKind};
use std::fmt;

/// Errors detected while building a workflow definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    /// The same node appears in the executed graph and in an unused graph.
    DuplicateNode { node_id: NodeId, name: String },
    /// Two different node definitions share a name (and therefore an id).
    ConflictingNodeName { name: String },
    /// A node's ports violate the condition-kind rules.
    MalformedPorts { node: String, reason: String },
    /// A forward reference names a node that is not part of the workflow.
    UnresolvedForwardReference {
        referrer: String,
        node: String,
        output: String,
    },
    /// A reference names an output the target node does not declare.
    UnknownOutput { node: String, output: String },
    /// A workflow output references a node that is not part of the executed graph.
    UnreachableOutput { output: String, node: String },
    /// An adornment was built without what it wraps or with bad parameters.
    InvalidAdornment { node: String, reason: String },
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DuplicateNode { node_id, name } => {
                write!(
                    f,
                    "node '{name}' ({node_id}) is declared in both the graph and an unused graph"
                )
            }
            Self::ConflictingNodeName { name } => {
                write!(f, "two different nodes are named '{name}'")
            }
            Self::MalformedPorts { node, reason } => {
                write!(f, "malformed ports on node '{node}': {reason}")
            }
            Self::UnresolvedForwardReference {
                referrer,
                node,
                output,
            } => {
                write!(
                    f,
                    "{referrer} references '{node}.{output}' but no node named '{node}' exists"
                )
            }
            Self::UnknownOutput { node, output } => {
                write!(f, "node '{node}' does not declare an output named '{output}'")
            }
            Self::UnreachableOutput { output, node } => {
                write!(
                    f,
                    "workflow output '{output}' references node '{node}' which is not in the graph"
                )
            }
            Self::InvalidAdornment { node, reason } => {
                write!(f, "invalid adornment '{node}': {reason}")
            }
        }
    }
}

impl std::error::Error for GraphError {}

/// Errors from resolving a reference against a state.
///
/// The `Unresolved*` variants mean "not yet available"; the scheduler treats
/// them as a readiness signal. `InvalidOperand` is a hard failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// The workflow input is not present.
    UnresolvedInput { name: String },
    /// The state field is not present.
    UnresolvedStateField { name: String },
    /// The node output has not been produced yet.
    UnresolvedNodeOutput { node_id: NodeId, output: String },
    /// The external input has not been supplied.
    UnresolvedExternalInput { node_id: NodeId, name: String },
    /// An operator received a value it cannot work with.
    InvalidOperand {
        operator: &'static str,
        reason: String,
    },
}

impl ResolveError {
    /// Returns true if the value is merely not available yet.
    #[must_use]
    pub fn is_unresolved(&self) -> bool {
        !matches!(self, Self::InvalidOperand { .. })
    }
}

impl fmt::Display for ResolveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnresolvedInput { name } => write!(f, "workflow input '{name}' is not set"),
            Self::UnresolvedStateField { name } => write!(f, "state field '{name}' is not set"),
            Self::UnresolvedNodeOutput { node_id, output } => {
                write!(f, "output '{output}' of {node_id} has not been produced")
            }
            Self::UnresolvedExternalInput { node_id, name } => {
                write!(f, "external input '{name}' of {node_id} has not been supplied")
            }
            Self::InvalidOperand { operator, reason } => {
                write!(f, "invalid operand for '{operator}': {reason}")
            }
        }
    }
}

impl std::error::Error for ResolveError {}

/// Errors in the inputs supplied to a workflow execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkflowInitializationError {
    /// A required input without default was not supplied.
    MissingInput { name: String },
    /// An input value does not match its declared kind.
    InvalidInput {
        name: String,
        expected: ValueKind,
        actual: String,
    },
    /// An input was supplied that the workflow does not declare.
    UnexpectedInput { name: String },
}

impl fmt::Display for WorkflowInitializationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInput { name } => write!(f, "required input '{name}' was not provided"),
            Self::InvalidInput {
                name,
                expected,
                actual,
            } => {
                write!(f, "input '{name}' expected {expected}, got {actual}")
            }
            Self::UnexpectedInput { name } => {
                write!(f, "input '{name}' is not declared by the workflow")
            }
        }
    }
}

impl std::error::Error for WorkflowInitializationError {}

/// Scheduler-internal failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerError {
    /// The event log has no `workflow.execution.initiated` event.
    MissingInitiatedEvent,
    /// The execution ended without a terminal workflow event.
    MissingTerminalEvent,
    /// The scheduler task panicked or was aborted.
    SchedulerPanicked { reason: String },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingInitiatedEvent => write!(f, "workflow execution was never initiated"),
            Self::MissingTerminalEvent => {
                write!(f, "workflow execution ended without a terminal event")
            }
            Self::SchedulerPanicked { reason } => write!(f, "scheduler task failed: {reason}"),
        }
    }
}

impl std::error::Error for RunnerError {}
