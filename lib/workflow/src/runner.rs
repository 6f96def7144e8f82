//! Running a workflow definition.
//!
//! A `WorkflowRunner` collects everything one execution needs, then either
//! streams the execution's events as they happen or runs it to completion:
//!
//! ```ignore
//! let outcome = WorkflowRunner::new(workflow)
//!     .input("query", json!("rust"))
//!     .run()
//!     .await;
//! if let Some(outputs) = outcome.outputs() { /* ... */ }
//! ```
//!
//! A paused execution is resumed by running the same definition again
//! with the paused state and the missing external inputs.

use crate::config::RunnerConfig;
use crate::definition::Workflow;
use crate::error::RunnerError;
use crate::events::{EventBody, ExternalInputRef, ParentContext, WorkflowEvent};
use crate::exception::NodeException;
use crate::execution::WorkflowExecutionState;
use crate::filter::EventFilter;
use crate::mock::MockNodeExecution;
use crate::node::{NodeId, Outputs};
use crate::scheduler::{Scheduler, SchedulerParts};
use crate::state::State;
use crate::store::Store;
use futures::Stream;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use trellis_core::{SpanId, TraceId};

/// Configures and starts one workflow execution.
#[derive(Debug, Clone)]
pub struct WorkflowRunner {
    workflow: Arc<Workflow>,
    inputs: BTreeMap<String, JsonValue>,
    state: Option<State>,
    parent_state: Option<Arc<State>>,
    external_inputs: Vec<(NodeId, String, JsonValue)>,
    entrypoints: Option<Vec<NodeId>>,
    cancel: CancellationToken,
    mocks: Arc<[MockNodeExecution]>,
    config: RunnerConfig,
    filter: EventFilter,
    parent: Option<ParentContext>,
    trace_id: Option<TraceId>,
}

impl WorkflowRunner {
    /// Creates a runner for a workflow definition.
    #[must_use]
    pub fn new(workflow: impl Into<Arc<Workflow>>) -> Self {
        Self {
            workflow: workflow.into(),
            inputs: BTreeMap::new(),
            state: None,
            parent_state: None,
            external_inputs: Vec::new(),
            entrypoints: None,
            cancel: CancellationToken::new(),
            mocks: Arc::from(Vec::new()),
            config: RunnerConfig::default(),
            filter: EventFilter::default(),
            parent: None,
            trace_id: None,
        }
    }

    /// Replaces all workflow inputs.
    #[must_use]
    pub fn inputs(mut self, inputs: BTreeMap<String, JsonValue>) -> Self {
        self.inputs = inputs;
        self
    }

    /// Sets one workflow input.
    #[must_use]
    pub fn input(mut self, name: impl Into<String>, value: JsonValue) -> Self {
        self.inputs.insert(name.into(), value);
        self
    }

    /// Starts from an existing state, typically one saved at a pause.
    #[must_use]
    pub fn state(mut self, state: State) -> Self {
        self.state = Some(state);
        self
    }

    /// Supplies an external input of a node.
    #[must_use]
    pub fn external_input(mut self, node_id: NodeId, name: impl Into<String>, value: JsonValue) -> Self {
        self.external_inputs.push((node_id, name.into(), value));
        self
    }

    /// Supplies several external inputs, as `(node, name, value)`.
    #[must_use]
    pub fn external_inputs(
        mut self,
        external_inputs: impl IntoIterator<Item = (NodeId, String, JsonValue)>,
    ) -> Self {
        self.external_inputs.extend(external_inputs);
        self
    }

    /// Overrides the nodes that start the execution.
    #[must_use]
    pub fn entrypoints(mut self, entrypoints: Vec<NodeId>) -> Self {
        self.entrypoints = Some(entrypoints);
        self
    }

    /// Uses a caller-owned cancellation token.
    #[must_use]
    pub fn cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Replaces the node mocks.
    #[must_use]
    pub fn mocks(mut self, mocks: impl Into<Arc<[MockNodeExecution]>>) -> Self {
        self.mocks = mocks.into();
        self
    }

    /// Adds one node mock.
    #[must_use]
    pub fn mock(mut self, mock: MockNodeExecution) -> Self {
        let mut mocks = self.mocks.to_vec();
        mocks.push(mock);
        self.mocks = mocks.into();
        self
    }

    /// Sets the runner configuration.
    #[must_use]
    pub fn config(mut self, config: RunnerConfig) -> Self {
        self.config = config;
        self
    }

    /// Selects which events the stream yields. The store keeps every event.
    #[must_use]
    pub fn event_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }

    /// Nests the execution under a node of an enclosing execution.
    #[must_use]
    pub fn parent(mut self, parent: ParentContext) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Lets references fall through to the enclosing execution's state.
    #[must_use]
    pub fn parent_state(mut self, parent_state: Arc<State>) -> Self {
        self.parent_state = Some(parent_state);
        self
    }

    /// Joins an existing trace.
    #[must_use]
    pub fn trace_id(mut self, trace_id: TraceId) -> Self {
        self.trace_id = Some(trace_id);
        self
    }

    /// Starts the execution on the current tokio runtime and returns its
    /// event stream.
    ///
    /// # Panics
    ///
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn stream(self) -> WorkflowStream {
        let (events_tx, events_rx) = mpsc::channel(self.config.channel_capacity());
        let trace_id = self
            .trace_id
            .or_else(|| self.state.as_ref().and_then(|state| state.meta().trace_id))
            .unwrap_or_default();
        let span_id = SpanId::new();
        let mut state = self.state.unwrap_or_else(|| State::new(trace_id));
        if let Some(parent_state) = self.parent_state {
            state = state.with_parent(parent_state);
        }
        let header = ExecutionHeader {
            trace_id,
            span_id,
            parent: self.parent.clone(),
            workflow: self.workflow.name().to_string(),
        };
        tracing::debug!(workflow = %header.workflow, %span_id, %trace_id, "starting workflow execution");

        let scheduler = Scheduler::new(SchedulerParts {
            workflow: self.workflow,
            inputs: self.inputs,
            state,
            external_inputs: self.external_inputs,
            entrypoints: self.entrypoints,
            trace_id,
            span_id,
            parent: self.parent,
            filter: self.filter,
            events: events_tx,
            cancel: self.cancel,
            mocks: self.mocks,
            config: self.config,
        });
        WorkflowStream {
            events: events_rx,
            handle: tokio::spawn(scheduler.run()),
            header,
        }
    }

    /// Runs the execution to its terminal event.
    ///
    /// Internal failures of the runner itself are reported as a
    /// `workflow.execution.rejected` event with `INTERNAL_ERROR`.
    pub async fn run(self) -> RunOutcome {
        let mut stream = self.stream();
        stream.drain().await;
        let WorkflowStream { handle, header, .. } = stream;
        let store = match handle.await {
            Ok(store) => store,
            Err(e) => {
                let error = RunnerError::SchedulerPanicked {
                    reason: e.to_string(),
                };
                let store = Store::new(header.span_id);
                return header.reject(store, &error);
            }
        };
        match store.verify().cloned() {
            Ok(terminal) => RunOutcome { terminal, store },
            Err(error) => header.reject(store, &error),
        }
    }
}

/// Identity of one execution, kept for synthesizing a terminal event.
#[derive(Debug, Clone)]
struct ExecutionHeader {
    trace_id: TraceId,
    span_id: SpanId,
    parent: Option<ParentContext>,
    workflow: String,
}

impl ExecutionHeader {
    fn reject(self, mut store: Store, error: &RunnerError) -> RunOutcome {
        tracing::error!(workflow = %self.workflow, %error, "workflow execution failed inside the runner");
        let terminal = WorkflowEvent::new(
            self.trace_id,
            self.span_id,
            self.parent,
            EventBody::WorkflowRejected {
                workflow: self.workflow,
                error: NodeException::internal(error.to_string()),
            },
        );
        store.append_event(terminal.clone());
        RunOutcome { terminal, store }
    }
}

/// The live event stream of a started execution.
///
/// Dropping the stream does not stop the execution; cancel it through
/// its token instead.
#[derive(Debug)]
pub struct WorkflowStream {
    events: mpsc::Receiver<WorkflowEvent>,
    handle: JoinHandle<Store>,
    header: ExecutionHeader,
}

impl WorkflowStream {
    /// Returns the span of the workflow execution.
    #[must_use]
    pub fn span_id(&self) -> SpanId {
        self.header.span_id
    }

    /// Returns the trace of the workflow execution.
    #[must_use]
    pub fn trace_id(&self) -> TraceId {
        self.header.trace_id
    }

    async fn drain(&mut self) {
        while self.events.recv().await.is_some() {}
    }

    /// Discards unread events, waits for the execution and returns its
    /// store.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheduler task failed or the event log is
    /// incomplete.
    pub async fn finish(mut self) -> trellis_core::Result<Store, RunnerError> {
        self.drain().await;
        let store = self.handle.await.map_err(|e| RunnerError::SchedulerPanicked {
            reason: e.to_string(),
        })?;
        store.verify()?;
        Ok(store)
    }
}

impl Stream for WorkflowStream {
    type Item = WorkflowEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.events.poll_recv(cx)
    }
}

/// A finished execution: its terminal event and everything it recorded.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// The `fulfilled`, `rejected` or `paused` workflow event.
    pub terminal: WorkflowEvent,
    /// The full event log and state snapshots.
    pub store: Store,
}

impl RunOutcome {
    /// Returns the final execution state.
    #[must_use]
    pub fn execution_state(&self) -> WorkflowExecutionState {
        WorkflowExecutionState::after(&self.terminal.body)
            .unwrap_or(WorkflowExecutionState::Rejected)
    }

    /// Returns true if the workflow was fulfilled.
    #[must_use]
    pub fn is_fulfilled(&self) -> bool {
        self.execution_state() == WorkflowExecutionState::Fulfilled
    }

    /// Returns true if the workflow paused on external inputs.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.execution_state() == WorkflowExecutionState::Paused
    }

    /// Returns the workflow outputs of a fulfilled execution.
    #[must_use]
    pub fn outputs(&self) -> Option<&Outputs> {
        match &self.terminal.body {
            EventBody::WorkflowFulfilled { outputs, .. } => Some(outputs),
            _ => None,
        }
    }

    /// Returns the exception of a rejected execution.
    #[must_use]
    pub fn error(&self) -> Option<&NodeException> {
        match &self.terminal.body {
            EventBody::WorkflowRejected { error, .. } => Some(error),
            _ => None,
        }
    }

    /// Returns the external inputs a paused execution waits for.
    #[must_use]
    pub fn paused_inputs(&self) -> Option<&[ExternalInputRef]> {
        match &self.terminal.body {
            EventBody::WorkflowPaused {
                external_inputs, ..
            } => Some(external_inputs),
            _ => None,
        }
    }

    /// Returns the most recent state snapshot, the one to resume from.
    #[must_use]
    pub fn final_state(&self) -> Option<State> {
        self.store.get_most_recent_state()
    }

    /// Returns every recorded event.
    #[must_use]
    pub fn events(&self) -> &[WorkflowEvent] {
        self.store.events()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::NodeContext;
    use crate::exception::ErrorCode;
    use crate::execution::NodeExecutionState;
    use crate::graph::Graph;
    use crate::node::{Node, NodeRun, ValueKind, outputs};
    use crate::port::{Port, Ports};
    use crate::reference::Reference;
    use crate::trigger::MergeBehavior;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    /// Sleeps, then returns `value = delay in ms`.
    struct Sleep(u64);

    #[async_trait]
    impl NodeRun for Sleep {
        async fn run(&self, _ctx: &NodeContext) -> Result<Outputs, NodeException> {
            tokio::time::sleep(Duration::from_millis(self.0)).await;
            Ok(outputs([("value", json!(self.0))]))
        }
    }

    /// Tracks the peak number of concurrent runs.
    struct Gauge {
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl NodeRun for Gauge {
        async fn run(&self, _ctx: &NodeContext) -> Result<Outputs, NodeException> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(Outputs::new())
        }
    }

    fn constant_node(name: &str, value: JsonValue) -> Node {
        Node::builder(name)
            .output("value", ValueKind::Any)
            .run_fn(move |_ctx| Ok(outputs([("value", value.clone())])))
            .build()
    }

    fn lifecycle(outcome: &RunOutcome) -> Vec<String> {
        outcome
            .events()
            .iter()
            .filter(|event| !matches!(event.body, EventBody::NodeStreaming { .. } | EventBody::WorkflowStreaming { .. }))
            .map(|event| match event.body.node() {
                Some(node) => format!("{}:{}", node.node_name, event.name()),
                None => event.name().to_string(),
            })
            .collect()
    }

    fn position(outcome: &RunOutcome, node: &str, name: &str) -> Option<usize> {
        let wanted = format!("{node}:{name}");
        lifecycle(outcome).iter().position(|entry| *entry == wanted)
    }

    #[tokio::test]
    async fn linear_chain_runs_in_order() {
        let a = constant_node("A", json!(1));
        let b = Node::builder("B")
            .attribute("x", a.output("value"))
            .output("value", ValueKind::Integer)
            .run_fn(|ctx| {
                let x: i64 = ctx.attribute_as("x")?;
                Ok(outputs([("value", json!(x + 1))]))
            })
            .build();
        let c = Node::builder("C")
            .attribute("x", b.output("value"))
            .output("value", ValueKind::Integer)
            .run_fn(|ctx| {
                let x: i64 = ctx.attribute_as("x")?;
                Ok(outputs([("value", json!(x * 10))]))
            })
            .build();
        let workflow = Workflow::builder("chain")
            .graph(&a >> &b >> &c)
            .output("result", c.output("value"))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        assert!(outcome.is_fulfilled());
        assert_eq!(outcome.outputs().and_then(|o| o.get("result")), Some(&json!(20)));
        assert_eq!(
            lifecycle(&outcome),
            vec![
                "workflow.execution.initiated",
                "A:node.execution.initiated",
                "A:node.execution.fulfilled",
                "B:node.execution.initiated",
                "B:node.execution.fulfilled",
                "C:node.execution.initiated",
                "C:node.execution.fulfilled",
                "workflow.execution.fulfilled",
            ]
        );
    }

    #[tokio::test]
    async fn inputs_flow_into_attributes() {
        let double = Node::builder("Double")
            .attribute("x", Reference::input("x"))
            .output("value", ValueKind::Integer)
            .run_fn(|ctx| {
                let x: i64 = ctx.attribute_as("x")?;
                Ok(outputs([("value", json!(x * 2))]))
            })
            .build();
        let workflow = Workflow::builder("double")
            .input("x", ValueKind::Integer)
            .graph(&double)
            .output("result", double.output("value"))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).input("x", json!(21)).run().await;
        assert_eq!(outcome.outputs().and_then(|o| o.get("result")), Some(&json!(42)));
    }

    #[tokio::test]
    async fn invalid_inputs_reject_before_any_node() {
        let a = constant_node("A", json!(1));
        let workflow = Workflow::builder("needs_input")
            .input("x", ValueKind::Integer)
            .graph(&a)
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;
        assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::InvalidInputs));
        assert_eq!(
            lifecycle(&outcome),
            vec!["workflow.execution.initiated", "workflow.execution.rejected"]
        );
    }

    #[tokio::test]
    async fn node_failure_cancels_siblings() {
        let failing = Node::builder("Failing")
            .run_fn(|_ctx| Err(NodeException::provider("upstream down")))
            .build();
        let slow = Node::builder("Slow")
            .output("value", ValueKind::Any)
            .run(Sleep(10_000))
            .build();
        let workflow = Workflow::builder("fail_fast")
            .graph(Graph::union([&failing, &slow]))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        let error = outcome.error().expect("rejected");
        assert_eq!(error.code, ErrorCode::ProviderError);
        assert_eq!(error.message, "upstream down");
        assert_eq!(
            outcome.store.node_state(slow.id()),
            Some(NodeExecutionState::Rejected)
        );
        assert_eq!(lifecycle(&outcome).last().map(String::as_str), Some("workflow.execution.rejected"));
    }

    #[tokio::test]
    async fn cancellation_rejects_with_cancelled_code() {
        let slow = Node::builder("Slow")
            .output("value", ValueKind::Any)
            .run(Sleep(10_000))
            .build();
        let workflow = Workflow::builder("cancel").graph(&slow).build().expect("build");
        let token = CancellationToken::new();
        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let outcome = WorkflowRunner::new(workflow).cancel_token(token).run().await;
        assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::WorkflowCancelled));
        assert_eq!(
            outcome.store.node_state(slow.id()),
            Some(NodeExecutionState::Rejected)
        );
    }

    #[tokio::test]
    async fn panicking_node_is_an_internal_error() {
        let broken = Node::builder("Broken")
            .run_fn(|_ctx| -> Result<Outputs, NodeException> { panic!("boom") })
            .build();
        let workflow = Workflow::builder("panic").graph(&broken).build().expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;
        let error = outcome.error().expect("rejected");
        assert_eq!(error.code, ErrorCode::InternalError);
        assert!(error.message.contains("boom"));
    }

    #[tokio::test]
    async fn undeclared_outputs_are_invalid() {
        let sloppy = Node::builder("Sloppy")
            .output("value", ValueKind::Integer)
            .run_fn(|_ctx| Ok(outputs([("other", json!(1))])))
            .build();
        let workflow = Workflow::builder("sloppy").graph(&sloppy).build().expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;
        assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::InvalidOutputs));
    }

    #[tokio::test]
    async fn ports_route_to_one_branch() {
        let router = Node::builder("Router")
            .ports(Ports::new(vec![
                Port::if_("left", Reference::input("go_left")),
                Port::else_("right"),
            ]))
            .build();
        let left = constant_node("Left", json!("L"));
        let right = constant_node("Right", json!("R"));
        let workflow = Workflow::builder("route")
            .input("go_left", ValueKind::Boolean)
            .graph(Graph::union([router.port("left") >> &left, router.port("right") >> &right]))
            .output("picked", Reference::lazy("Left", "value").coalesce(Reference::lazy("Right", "value")))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).input("go_left", json!(false)).run().await;

        assert_eq!(outcome.outputs().and_then(|o| o.get("picked")), Some(&json!("R")));
        assert_eq!(outcome.store.node_state(left.id()), None);
        let fulfilled = outcome.events().iter().find_map(|event| match &event.body {
            EventBody::NodeFulfilled { node, invoked_ports, .. } if node.node_name == "Router" => {
                Some(invoked_ports.clone())
            }
            _ => None,
        });
        assert_eq!(fulfilled, Some(vec!["right".to_string()]));
    }

    #[tokio::test]
    async fn await_all_joins_every_branch() {
        let fast = constant_node("Fast", json!(1));
        let slow = Node::builder("Slow")
            .output("value", ValueKind::Any)
            .run(Sleep(30))
            .build();
        let join = Node::builder("Join").trigger(MergeBehavior::AwaitAll).build();
        let workflow = Workflow::builder("join")
            .graph(Graph::union([&fast, &slow]) >> &join)
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        assert!(outcome.is_fulfilled());
        let starts = lifecycle(&outcome)
            .iter()
            .filter(|entry| *entry == "Join:node.execution.initiated")
            .count();
        assert_eq!(starts, 1);
        let slow_done = position(&outcome, "Slow", "node.execution.fulfilled").expect("slow");
        let join_start = position(&outcome, "Join", "node.execution.initiated").expect("join");
        assert!(slow_done < join_start);
    }

    #[tokio::test]
    async fn await_attributes_waits_where_await_any_gives_up() {
        let start = constant_node("Start", json!(0));
        let late = Node::builder("Late")
            .output("value", ValueKind::Any)
            .run(Sleep(30))
            .build();
        let eager = Node::builder("Eager")
            .attribute("late", Reference::lazy("Late", "value"))
            .build();
        let patient = Node::builder("Patient")
            .attribute("late", Reference::lazy("Late", "value"))
            .trigger(MergeBehavior::AwaitAttributes)
            .build();
        let workflow = Workflow::builder("attributes")
            .graph(Graph::union([&start >> Graph::union([&eager, &patient]), Graph::from(&late)]))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        assert!(outcome.is_fulfilled());
        assert_eq!(outcome.store.node_state(eager.id()), None);
        assert_eq!(
            outcome.store.node_state(patient.id()),
            Some(NodeExecutionState::Fulfilled)
        );
        let inputs = outcome.events().iter().find_map(|event| match &event.body {
            EventBody::NodeInitiated { node, inputs } if node.node_name == "Patient" => Some(inputs.clone()),
            _ => None,
        });
        assert_eq!(inputs.and_then(|i| i.get("late").cloned()), Some(json!(30)));
    }

    #[tokio::test]
    async fn loops_run_until_the_exit_port() {
        let start = constant_node("Start", json!(0));
        let counter = Node::builder("Counter")
            .attribute("previous", Reference::lazy("Counter", "n").coalesce(json!(0)))
            .output("n", ValueKind::Integer)
            .ports(Ports::new(vec![
                Port::if_("again", Reference::lazy("Counter", "n").less_than(json!(3))),
                Port::else_("done"),
            ]))
            .run_fn(|ctx| {
                let previous: i64 = ctx.attribute_as("previous")?;
                Ok(outputs([("n", json!(previous + 1))]))
            })
            .build();
        let end = Node::builder("End")
            .attribute("n", counter.output("n"))
            .output("n", ValueKind::Integer)
            .run_fn(|ctx| Ok(outputs([("n", ctx.attribute("n").cloned().unwrap_or_default())])))
            .build();
        let workflow = Workflow::builder("loop")
            .graph(Graph::union([
                &start >> &counter,
                counter.port("again") >> &counter,
                counter.port("done") >> &end,
            ]))
            .output("n", end.output("n"))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        assert_eq!(outcome.outputs().and_then(|o| o.get("n")), Some(&json!(3)));
        let state = outcome.final_state().expect("state");
        assert_eq!(state.node_execution().fulfilled_count(counter.id()), 3);
    }

    #[tokio::test]
    async fn pause_then_resume_matches_a_single_run() {
        let prep = constant_node("Prep", json!("draft"));
        let approve = Node::builder("Approve")
            .attribute("draft", prep.output("value"))
            .external_input("approved", ValueKind::Boolean)
            .output("decision", ValueKind::String)
            .run_fn(|ctx| {
                let approved = ctx.external_input("approved").and_then(JsonValue::as_bool);
                let decision = if approved == Some(true) { "ship" } else { "hold" };
                Ok(outputs([("decision", json!(decision))]))
            })
            .build();
        let finish = Node::builder("Finish")
            .attribute("decision", approve.output("decision"))
            .output("summary", ValueKind::String)
            .run_fn(|ctx| {
                let decision: String = ctx.attribute_as("decision")?;
                Ok(outputs([("summary", json!(format!("decided: {decision}")))]))
            })
            .build();
        let workflow = Arc::new(
            Workflow::builder("approval")
                .graph(&prep >> &approve >> &finish)
                .output("summary", finish.output("summary"))
                .build()
                .expect("build"),
        );

        let paused = WorkflowRunner::new(Arc::clone(&workflow)).run().await;
        assert!(paused.is_paused());
        let missing = paused.paused_inputs().expect("paused");
        assert_eq!(missing.len(), 1);
        assert_eq!(missing[0].node_id, approve.id());
        assert_eq!(missing[0].name, "approved");
        assert_eq!(paused.store.node_state(finish.id()), None);
        assert_eq!(
            paused.store.node_state(approve.id()),
            Some(NodeExecutionState::Paused)
        );

        let resumed = WorkflowRunner::new(Arc::clone(&workflow))
            .state(paused.final_state().expect("state"))
            .external_inputs([(approve.id(), "approved".to_string(), json!(true))])
            .run()
            .await;
        assert!(resumed.is_fulfilled());
        assert_eq!(
            lifecycle(&resumed)[..3],
            [
                "workflow.execution.initiated".to_string(),
                "workflow.execution.resumed".to_string(),
                "Approve:node.execution.resumed".to_string(),
            ]
        );
        assert_eq!(position(&resumed, "Prep", "node.execution.initiated"), None);

        let direct = WorkflowRunner::new(workflow)
            .external_input(approve.id(), "approved", json!(true))
            .run()
            .await;
        assert_eq!(resumed.outputs(), direct.outputs());
        assert_eq!(
            resumed.outputs().and_then(|o| o.get("summary")),
            Some(&json!("decided: ship"))
        );
    }

    #[tokio::test]
    async fn mistyped_external_input_is_rejected() {
        let gate = Node::builder("Gate")
            .external_input("approved", ValueKind::Boolean)
            .build();
        let workflow = Workflow::builder("gate").graph(&gate).build().expect("build");

        let outcome = WorkflowRunner::new(workflow)
            .external_input(gate.id(), "approved", json!("yes"))
            .run()
            .await;
        assert_eq!(outcome.error().map(|e| e.code), Some(ErrorCode::InvalidInputs));
    }

    #[tokio::test]
    async fn mocks_replace_node_runs() {
        let search = Node::builder("Search")
            .attribute("query", Reference::input("query"))
            .output("hits", ValueKind::Integer)
            .run_fn(|_ctx| -> Result<Outputs, NodeException> { panic!("network access in a test") })
            .build();
        let workflow = Workflow::builder("search")
            .input("query", ValueKind::String)
            .graph(&search)
            .output("hits", search.output("hits"))
            .build()
            .expect("build");
        let mock = MockNodeExecution::for_node(&search)
            .when(Reference::input("query").equals(json!("rust")))
            .then_outputs(outputs([("hits", json!(7))]));

        let outcome = WorkflowRunner::new(workflow)
            .input("query", json!("rust"))
            .mock(mock)
            .run()
            .await;
        assert_eq!(outcome.outputs().and_then(|o| o.get("hits")), Some(&json!(7)));
    }

    #[tokio::test]
    async fn state_at_node_precedes_its_execution() {
        let a = constant_node("A", json!("from a"));
        let b = constant_node("B", json!("from b"));
        let workflow = Workflow::builder("history").graph(&a >> &b).build().expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;
        let before_b = outcome.store.get_state_at_node(b.id()).expect("snapshot");
        assert_eq!(before_b.node_output(a.id(), "value"), Some(&json!("from a")));
        assert_eq!(before_b.node_output(b.id(), "value"), None);
    }

    #[tokio::test]
    async fn streamed_chunks_are_mirrored_to_the_workflow() {
        let writer = Node::builder("Writer")
            .output("text", ValueKind::String)
            .run_fn(|ctx| {
                ctx.stream("text", json!("hel"))?;
                ctx.stream("text", json!("lo"))?;
                Ok(outputs([("text", json!("hello"))]))
            })
            .build();
        let workflow = Workflow::builder("writer")
            .graph(&writer)
            .output("text", writer.output("text"))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        let mirrored: Vec<_> = outcome
            .events()
            .iter()
            .filter_map(|event| match &event.body {
                EventBody::WorkflowStreaming { output, .. } => Some(output.value.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(
            mirrored,
            vec![Some(json!("hel")), Some(json!("lo")), Some(json!("hello"))]
        );
        assert_eq!(outcome.outputs().and_then(|o| o.get("text")), Some(&json!("hello")));
    }

    #[tokio::test]
    async fn streamable_ports_fire_before_fulfillment() {
        let release = Arc::new(Notify::new());
        let waiter = Arc::clone(&release);

        struct Producer(Arc<Notify>);

        #[async_trait]
        impl NodeRun for Producer {
            async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException> {
                ctx.emit_output("ready", json!(true))?;
                let _ = tokio::time::timeout(Duration::from_secs(5), self.0.notified()).await;
                Ok(Outputs::new())
            }
        }

        let producer = Node::builder("Producer")
            .output("ready", ValueKind::Boolean)
            .ports(Ports::new(vec![
                Port::if_("go", Reference::lazy("Producer", "ready")).on_stream(),
            ]))
            .run(Producer(waiter))
            .build();
        let consumer = Node::builder("Consumer")
            .run_fn(move |_ctx| {
                release.notify_one();
                Ok(Outputs::new())
            })
            .build();
        let workflow = Workflow::builder("early")
            .graph(producer.port("go") >> &consumer)
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;

        assert!(outcome.is_fulfilled());
        let consumer_start =
            position(&outcome, "Consumer", "node.execution.initiated").expect("consumer");
        let producer_done =
            position(&outcome, "Producer", "node.execution.fulfilled").expect("producer");
        assert!(consumer_start < producer_done);
    }

    #[tokio::test]
    async fn state_fields_are_written_by_nodes() {
        let counter = Node::builder("Counter")
            .run_fn(|ctx| {
                ctx.update_state("count", json!(5))?;
                Ok(Outputs::new())
            })
            .build();
        let workflow = Workflow::builder("fields")
            .state_field("count", json!(0))
            .graph(&counter)
            .output("count", Reference::state("count"))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow).run().await;
        assert_eq!(outcome.outputs().and_then(|o| o.get("count")), Some(&json!(5)));
    }

    #[tokio::test]
    async fn concurrency_cap_is_respected() {
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let nodes: Vec<Node> = (0..4)
            .map(|i| {
                Node::builder(format!("N{i}"))
                    .run(Gauge {
                        current: Arc::clone(&current),
                        peak: Arc::clone(&peak),
                    })
                    .build()
            })
            .collect();
        let workflow = Workflow::builder("capped")
            .graph(Graph::union(nodes.iter()))
            .build()
            .expect("build");

        let outcome = WorkflowRunner::new(workflow)
            .config(RunnerConfig::default().with_max_concurrency(2))
            .run()
            .await;

        assert!(outcome.is_fulfilled());
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn stream_yields_what_the_store_records() {
        let a = constant_node("A", json!(1));
        let b = constant_node("B", json!(2));
        let workflow = Workflow::builder("streamed").graph(&a >> &b).build().expect("build");

        let mut stream = WorkflowRunner::new(workflow).stream();
        let span_id = stream.span_id();
        let mut seen = Vec::new();
        while let Some(event) = stream.next().await {
            seen.push(event);
        }
        let store = stream.finish().await.expect("store");

        assert_eq!(store.span_id(), span_id);
        assert_eq!(seen.as_slice(), store.events());
        assert!(seen.iter().all(|event| event.trace_id == seen[0].trace_id));
    }
}
