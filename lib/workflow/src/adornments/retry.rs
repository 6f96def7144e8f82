//! Re-running a node until it succeeds.

use super::{SubworkflowFailure, run_subworkflow};
use crate::context::NodeContext;
use crate::definition::Workflow;
use crate::error::GraphError;
use crate::exception::{ErrorCode, NodeException};
use crate::node::{Node, NodeRun, Outputs};
use crate::port::Ports;
use crate::reference::{Reference, truthy};
use crate::state::State;
use crate::trigger::MergeBehavior;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Builder for a node that retries its wrapped node.
///
/// An attempt is one nested execution of the wrapped node. The first
/// fulfilled attempt wins. A rejected attempt is retried only while
/// attempts remain and the error passes the filters; otherwise its error
/// is raised.
#[derive(Debug, Clone)]
pub struct RetryNode {
    name: String,
    max_attempts: u32,
    delay: Option<Duration>,
    retry_on_error_code: Option<ErrorCode>,
    retry_on_condition: Option<Reference>,
    inner: Option<Node>,
    ports: Option<Ports>,
    trigger: Option<MergeBehavior>,
}

impl RetryNode {
    /// Starts a retry adornment with three attempts and no delay.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_attempts: 3,
            delay: None,
            retry_on_error_code: None,
            retry_on_condition: None,
            inner: None,
            ports: None,
            trigger: None,
        }
    }

    /// Sets the number of attempts, including the first.
    #[must_use]
    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Waits between attempts.
    #[must_use]
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Retries only errors with this code.
    #[must_use]
    pub fn retry_on_error_code(mut self, code: ErrorCode) -> Self {
        self.retry_on_error_code = Some(code);
        self
    }

    /// Retries only when the condition holds. The condition reads the
    /// rejected attempt's exception as the state field `error`.
    #[must_use]
    pub fn retry_on_condition(mut self, condition: impl Into<Reference>) -> Self {
        self.retry_on_condition = Some(condition.into());
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

    /// Builds the adornment node. It declares the wrapped node's outputs
    /// and attributes.
    ///
    /// # Errors
    ///
    /// Returns an error if no node is wrapped, `max_attempts` is zero, or
    /// the nested workflow cannot be built.
    pub fn build(self) -> trellis_core::Result<Node, GraphError> {
        let Some(inner) = self.inner else {
            return Err(GraphError::InvalidAdornment {
                node: self.name,
                reason: "no node to retry".to_string(),
            }
            .into());
        };
        if self.max_attempts == 0 {
            return Err(GraphError::InvalidAdornment {
                node: self.name,
                reason: "max_attempts must be at least 1".to_string(),
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
        if let Some(ports) = self.ports {
            builder = builder.ports(ports);
        }
        if let Some(trigger) = self.trigger {
            builder = builder.trigger(trigger);
        }
        Ok(builder
            .run(RetryRun {
                subworkflow,
                max_attempts: self.max_attempts,
                delay: self.delay,
                retry_on_error_code: self.retry_on_error_code,
                retry_on_condition: self.retry_on_condition,
            })
            .build())
    }
}

struct RetryRun {
    subworkflow: Arc<Workflow>,
    max_attempts: u32,
    delay: Option<Duration>,
    retry_on_error_code: Option<ErrorCode>,
    retry_on_condition: Option<Reference>,
}

impl RetryRun {
    fn should_retry(&self, ctx: &NodeContext, error: &NodeException) -> bool {
        if self
            .retry_on_error_code
            .is_some_and(|code| code != error.code)
        {
            return false;
        }
        let Some(condition) = &self.retry_on_condition else {
            return true;
        };
        let mut state = State::default().with_parent(ctx.state_arc());
        state.set_field("error", error.to_json());
        condition
            .resolve(&state)
            .is_ok_and(|value| truthy(&value))
    }
}

#[async_trait]
impl NodeRun for RetryRun {
    async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException> {
        let name = ctx.node().name().to_string();
        let mut attempt = 1;
        loop {
            tracing::debug!(node = %name, attempt, "retry attempt");
            let attempt_run = run_subworkflow(
                ctx,
                Arc::clone(&self.subworkflow),
                BTreeMap::new(),
                None,
                ctx.cancel_token().child_token(),
            );
            let error = match attempt_run.await {
                Ok(outputs) => return Ok(outputs),
                Err(SubworkflowFailure::Rejected(error)) => error,
                Err(paused) => return Err(paused.into_exception(&name)),
            };
            if ctx.is_cancelled() {
                return Err(NodeException::cancelled());
            }
            if error.code == ErrorCode::WorkflowCancelled
                || attempt >= self.max_attempts
                || !self.should_retry(ctx, &error)
            {
                return Err(error);
            }
            tracing::info!(node = %name, attempt, code = %error.code, "attempt failed; retrying");
            if let Some(delay) = self.delay {
                tokio::select! {
                    () = ctx.cancelled() => return Err(NodeException::cancelled()),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            attempt += 1;
        }
    }

    fn handles_cancellation(&self) -> bool {
        true
    }
}
