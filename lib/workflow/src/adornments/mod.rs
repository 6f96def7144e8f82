//! Higher-order nodes that wrap another node as a nested subworkflow.
//!
//! Each adornment builds an ordinary `Node` whose behaviour runs the
//! wrapped node through a nested `WorkflowRunner`:
//! - `RetryNode` re-runs it on failure
//! - `TryNode` turns its failure into an `error` output
//! - `MapNode` runs it once per item of a list
//!
//! Nested executions share the trace, read through to the enclosing
//! state, inherit mocks and configuration, and are cancelled with the
//! adornment. Their events are forwarded to the enclosing execution.

mod map;
mod retry;
mod try_node;

pub use map::MapNode;
pub use retry::RetryNode;
pub use try_node::TryNode;

use crate::context::NodeContext;
use crate::definition::Workflow;
use crate::events::{DeltaState, EventBody, ExternalInputRef};
use crate::exception::NodeException;
use crate::filter::EventFilter;
use crate::node::Outputs;
use crate::runner::WorkflowRunner;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// How a nested execution ended, when it did not fulfill.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SubworkflowFailure {
    Rejected(NodeException),
    Paused(Vec<ExternalInputRef>),
}

impl SubworkflowFailure {
    /// Converts the failure into the exception raised by the adornment.
    /// A nested pause cannot be resumed from inside an adornment.
    pub(crate) fn into_exception(self, adornment: &str) -> NodeException {
        match self {
            Self::Rejected(error) => error,
            Self::Paused(inputs) => {
                let names: Vec<String> = inputs
                    .iter()
                    .map(|input| format!("{}.{}", input.node_name, input.name))
                    .collect();
                NodeException::internal(format!(
                    "'{adornment}' cannot pause; nested execution waits for {}",
                    names.join(", ")
                ))
            }
        }
    }
}

/// Runs `workflow` nested under the node of `ctx`. `cancel` must be a
/// descendant of the node's own token.
///
/// Without an iteration, only streamed chunks of the nested workflow's
/// outputs are re-streamed by the adornment. With one, every output delta
/// is re-emitted tagged with the iteration index.
///
/// The nested stream is always drained to its end, so every event the
/// nested execution records, terminal ones included, reaches the
/// enclosing execution even when the adornment is cancelled.
pub(crate) async fn run_subworkflow(
    ctx: &NodeContext,
    workflow: Arc<Workflow>,
    inputs: BTreeMap<String, JsonValue>,
    iteration: Option<usize>,
    cancel: CancellationToken,
) -> Result<Outputs, SubworkflowFailure> {
    let mut stream = WorkflowRunner::new(workflow)
        .inputs(inputs)
        .parent_state(ctx.state_arc())
        .parent(ctx.child_context(iteration))
        .trace_id(ctx.trace_id())
        .cancel_token(cancel.clone())
        .mocks(ctx.mocks())
        .config(ctx.config().clone())
        .event_filter(EventFilter::all())
        .stream();
    let span_id = stream.span_id();

    let mut relay_error = None;
    while let Some(event) = stream.next().await {
        if relay_error.is_none()
            && event.span_id == span_id
            && let EventBody::WorkflowStreaming { output, .. } = &event.body
        {
            let relayed = match iteration {
                Some(index) => ctx.emit_delta(output.clone().at_index(index)),
                None if output.state == DeltaState::Streaming => match &output.value {
                    Some(chunk) => ctx.stream(output.name.clone(), chunk.clone()),
                    None => Ok(()),
                },
                None => Ok(()),
            };
            if let Err(error) = relayed {
                cancel.cancel();
                relay_error = Some(error);
            }
        }
        if let Err(error) = ctx.forward(event) {
            tracing::debug!(node = %ctx.node().name(), "enclosing execution gone; draining");
            cancel.cancel();
            relay_error.get_or_insert(error);
        }
    }

    let store = stream.finish().await.map_err(|report| {
        SubworkflowFailure::Rejected(NodeException::internal(
            report.current_context().to_string(),
        ))
    })?;
    if let Some(error) = relay_error {
        return Err(SubworkflowFailure::Rejected(error));
    }
    let Some(terminal) = store.terminal_event() else {
        return Err(SubworkflowFailure::Rejected(NodeException::internal(
            "nested execution ended without a terminal event",
        )));
    };
    match &terminal.body {
        EventBody::WorkflowFulfilled { outputs, .. } => Ok(outputs.clone()),
        EventBody::WorkflowPaused {
            external_inputs, ..
        } => Err(SubworkflowFailure::Paused(external_inputs.clone())),
        EventBody::WorkflowRejected { error, .. } => {
            Err(SubworkflowFailure::Rejected(error.clone()))
        }
        _ => Err(SubworkflowFailure::Rejected(NodeException::internal(
            "nested execution ended with a non-terminal event",
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;

    #[test]
    fn nested_pause_becomes_an_internal_error() {
        let failure = SubworkflowFailure::Paused(vec![ExternalInputRef {
            node_id: NodeId::from_name("Gate"),
            node_name: "Gate".to_string(),
            name: "approved".to_string(),
        }]);
        let error = failure.into_exception("Retry");
        assert_eq!(error.code, crate::exception::ErrorCode::InternalError);
        assert!(error.message.contains("Gate.approved"));
    }

    #[test]
    fn nested_rejection_passes_through() {
        let error = NodeException::provider("down");
        let failure = SubworkflowFailure::Rejected(error.clone());
        assert_eq!(failure.into_exception("Try"), error);
    }
}
