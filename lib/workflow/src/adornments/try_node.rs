//! Capturing a node's failure as data.

use super::{SubworkflowFailure, run_subworkflow};
use crate::context::NodeContext;
use crate::definition::Workflow;
use crate::error::GraphError;
use crate::exception::{ErrorCode, NodeException};
use crate::node::{Node, NodeRun, Outputs, ValueKind};
use crate::port::Ports;
use crate::trigger::MergeBehavior;
use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Name of the output carrying the captured exception.
pub const ERROR_OUTPUT: &str = "error";

/// Builder for a node that runs its wrapped node once and captures its
/// failure in an `error` output instead of rejecting.
///
/// On success the wrapped node's outputs pass through and `error` is null.
/// On a captured failure only `error` is set, as `{code, message}`.
#[derive(Debug, Clone)]
pub struct TryNode {
    name: String,
    on_error_code: Option<ErrorCode>,
    inner: Option<Node>,
    ports: Option<Ports>,
    trigger: Option<MergeBehavior>,
}

impl TryNode {
    /// Starts a try adornment that captures every error.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            on_error_code: None,
            inner: None,
            ports: None,
            trigger: None,
        }
    }

    /// Captures only errors with this code; others reject as usual.
    #[must_use]
    pub fn on_error_code(mut self, code: ErrorCode) -> Self {
        self.on_error_code = Some(code);
        self
    }

    /// Sets the wrapped node.
    #[must_use]
    pub fn node(mut self, inner: &Node) -> Self {
        self.inner = Some(inner.clone());
        self
    }

    /// Sets the adornment's ports.
    #[must_use]
    pub fn ports(mut self, ports: Ports) -> Self {
        self.ports = Some(ports);
        self
    }

    /// Sets the adornment's trigger.
    #[must_use]
    pub fn trigger(mut self, merge_behavior: MergeBehavior) -> Self {
        self.trigger = Some(merge_behavior);
        self
    }

    /// Builds the adornment node.
    ///
    /// # Errors
    ///
    /// Returns an error if no node is wrapped, the wrapped node already
    /// declares an `error` output, or the nested workflow cannot be built.
    pub fn build(self) -> trellis_core::Result<Node, GraphError> {
        let Some(inner) = self.inner else {
            return Err(GraphError::InvalidAdornment {
                node: self.name,
                reason: "no node to try".to_string(),
            }
            .into());
        };
        if inner.declares_output(ERROR_OUTPUT) {
            return Err(GraphError::InvalidAdornment {
                node: self.name,
                reason: format!("wrapped node '{}' already declares an 'error' output", inner.name()),
            }
            .into());
        }
        let subworkflow = Arc::new(Workflow::from_node(&inner)?);

        let mut builder = Node::builder(self.name);
        for (name, reference) in inner.attributes() {
            builder = builder.attribute(name.clone(), reference.clone());
        }
        for field in inner.outputs() {
            builder = builder.output(field.name.clone(), field.kind);
        }
        builder = builder.output(ERROR_OUTPUT, ValueKind::Object);
        if let Some(ports) = self.ports {
            builder = builder.ports(ports);
        }
        if let Some(trigger) = self.trigger {
            builder = builder.trigger(trigger);
        }
        Ok(builder
            .run(TryRun {
                subworkflow,
                on_error_code: self.on_error_code,
            })
            .build())
    }
}

struct TryRun {
    subworkflow: Arc<Workflow>,
    on_error_code: Option<ErrorCode>,
}

#[async_trait]
impl NodeRun for TryRun {
    async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException> {
        let name = ctx.node().name();
        let attempt = run_subworkflow(
            ctx,
            Arc::clone(&self.subworkflow),
            BTreeMap::new(),
            None,
            ctx.cancel_token().child_token(),
        );
        let result = attempt.await;
        if ctx.is_cancelled() {
            return Err(NodeException::cancelled());
        }
        match result {
            Ok(mut outputs) => {
                outputs.insert(ERROR_OUTPUT.to_string(), JsonValue::Null);
                Ok(outputs)
            }
            Err(SubworkflowFailure::Rejected(error))
                if error.code != ErrorCode::WorkflowCancelled
                    && self.on_error_code.is_none_or(|code| code == error.code) =>
            {
                tracing::info!(node = %name, code = %error.code, "captured nested failure");
                Ok(Outputs::from([(ERROR_OUTPUT.to_string(), error.to_json())]))
            }
            Err(failure) => Err(failure.into_exception(name)),
        }
    }

    fn handles_cancellation(&self) -> bool {
        true
    }
}
