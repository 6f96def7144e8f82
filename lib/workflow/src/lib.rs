//! Graph-based workflow execution engine.
//!
//! A workflow is a directed graph of nodes. Nodes declare attributes as
//! references into the execution state, typed outputs, conditional ports
//! and a trigger that decides when they become ready. The runner schedules
//! nodes concurrently as their triggers are satisfied and reports every
//! step as a `WorkflowEvent`.
//!
//! - **Definition**: `Node`, `Ports`, `Graph` composition with `>>`, and
//!   `Workflow::builder`
//! - **Execution**: `WorkflowRunner` produces an event stream and a
//!   `Store` holding the event log and state snapshots
//! - **Pause and resume**: nodes waiting for external inputs pause the
//!   execution; a persisted `State` plus the missing inputs resumes it
//! - **Adornments**: `RetryNode`, `TryNode` and `MapNode` wrap a node in a
//!   nested execution

pub mod adornments;
pub mod config;
pub mod context;
pub mod definition;
pub mod edge;
pub mod envelope;
pub mod error;
pub mod events;
pub mod exception;
pub mod execution;
pub mod filter;
pub mod graph;
pub mod mock;
pub mod node;
pub mod port;
mod readiness;
pub mod reference;
pub mod runner;
mod scheduler;
pub mod state;
pub mod store;
pub mod trigger;

pub use adornments::{MapNode, RetryNode, TryNode};
pub use crate::config::RunnerConfig;
pub use context::NodeContext;
pub use definition::{Topology, Workflow, WorkflowBuilder, WorkflowMetadata};
pub use edge::{Edge, EdgeId};
pub use envelope::{Envelope, EnvelopeError, RawEnvelope};
pub use error::{GraphError, ResolveError, RunnerError, WorkflowInitializationError};
pub use events::{
    DeltaState, EventBody, ExternalInputRef, OutputDelta, ParentContext, WorkflowEvent,
};
pub use exception::{ErrorCode, NodeException};
pub use execution::{NodeExecutionState, WorkflowExecutionState};
pub use filter::EventFilter;
pub use graph::{Graph, WorkflowGraph};
pub use mock::MockNodeExecution;
pub use node::{Node, NodeBuilder, NodeId, NodeRun, Outputs, ValueKind, outputs};
pub use port::{ConditionKind, Port, Ports};
pub use reference::Reference;
pub use runner::{RunOutcome, WorkflowRunner, WorkflowStream};
pub use state::State;
pub use store::Store;
pub use trigger::MergeBehavior;
