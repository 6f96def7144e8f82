//! The single-owner scheduling loop behind `WorkflowRunner`.
//!
//! The scheduler owns the state and the store of one execution. Node
//! tasks run concurrently and report back over one channel; the scheduler
//! applies their messages in arrival order, re-evaluates triggers and
//! dispatches whatever became ready.
//!
//! The first node failure or a cancellation stops further dispatch and
//! cancels the nodes still running. The execution then drains their
//! terminal events before emitting its own.

use crate::config::RunnerConfig;
use crate::context::{NodeContext, NodeContextParts, NodeMessage};
use crate::definition::Workflow;
use crate::error::ResolveError;
use crate::events::{
    EventBody, ExternalInputRef, NodeRef, OutputDelta, ParentContext, WorkflowEvent,
    WorkflowInitiatedBody,
};
use crate::exception::NodeException;
use crate::filter::EventFilter;
use crate::mock::{MockNodeExecution, find_mock};
use crate::node::{Node, NodeId, Outputs};
use crate::readiness::{Evaluation, Readiness};
use crate::reference::Reference;
use crate::state::State;
use crate::store::Store;
use crate::trigger::MergeBehavior;
use futures::FutureExt;
use serde_json::Value as JsonValue;
use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use trellis_core::{SpanId, TraceId};

/// Everything a scheduler is started with.
pub(crate) struct SchedulerParts {
    pub workflow: Arc<Workflow>,
    pub inputs: BTreeMap<String, JsonValue>,
    pub state: State,
    pub external_inputs: Vec<(NodeId, String, JsonValue)>,
    pub entrypoints: Option<Vec<NodeId>>,
    pub trace_id: TraceId,
    pub span_id: SpanId,
    pub parent: Option<ParentContext>,
    pub filter: EventFilter,
    pub events: mpsc::Sender<WorkflowEvent>,
    pub cancel: CancellationToken,
    pub mocks: Arc<[MockNodeExecution]>,
    pub config: RunnerConfig,
}

/// Book-keeping for a dispatched node.
struct RunningNode {
    span_id: SpanId,
    /// Per-output final values emitted before `run` returned.
    emitted: Outputs,
    /// Ports decided early by streamable ports.
    invoked_ports: Option<Vec<String>>,
    /// Outputs already mirrored as fulfilled workflow deltas.
    mirrored: BTreeSet<String>,
}

pub(crate) struct Scheduler {
    workflow: Arc<Workflow>,
    inputs: BTreeMap<String, JsonValue>,
    state: State,
    store: Store,
    external_inputs: Vec<(NodeId, String, JsonValue)>,
    entrypoints: Option<Vec<NodeId>>,
    trace_id: TraceId,
    span_id: SpanId,
    parent: Option<ParentContext>,
    context: ParentContext,
    filter: EventFilter,
    events: mpsc::Sender<WorkflowEvent>,
    cancel: CancellationToken,
    node_cancel: CancellationToken,
    mocks: Arc<[MockNodeExecution]>,
    config: RunnerConfig,
    sender: mpsc::UnboundedSender<NodeMessage>,
    messages: mpsc::UnboundedReceiver<NodeMessage>,
    running: BTreeMap<NodeId, RunningNode>,
    /// Spans of paused node executions re-entered by this run.
    resumed: BTreeMap<NodeId, SpanId>,
    failure: Option<NodeException>,
}

impl Scheduler {
    pub(crate) fn new(parts: SchedulerParts) -> Self {
        let (sender, messages) = mpsc::unbounded_channel();
        let context =
            ParentContext::workflow(parts.span_id, parts.workflow.name(), parts.parent.clone());
        let node_cancel = parts.cancel.child_token();
        Self {
            store: Store::new(parts.span_id),
            workflow: parts.workflow,
            inputs: parts.inputs,
            state: parts.state,
            external_inputs: parts.external_inputs,
            entrypoints: parts.entrypoints,
            trace_id: parts.trace_id,
            span_id: parts.span_id,
            parent: parts.parent,
            context,
            filter: parts.filter,
            events: parts.events,
            cancel: parts.cancel,
            node_cancel,
            mocks: parts.mocks,
            config: parts.config,
            sender,
            messages,
            running: BTreeMap::new(),
            resumed: BTreeMap::new(),
            failure: None,
        }
    }

    /// Runs the execution to its terminal event and hands back the store.
    #[tracing::instrument(
        name = "workflow_execution",
        skip_all,
        fields(workflow = %self.workflow.name(), span_id = %self.span_id, trace_id = %self.trace_id)
    )]
    pub(crate) async fn run(mut self) -> Store {
        if let Err(error) = self.start().await {
            tracing::warn!(code = %error.code, message = %error.message, "workflow rejected at start");
            let workflow = self.workflow.name().to_string();
            self.emit_workflow(EventBody::WorkflowRejected { workflow, error })
                .await;
            return self.store;
        }

        loop {
            if self.failure.is_none() && self.cancel.is_cancelled() {
                self.fail(NodeException::cancelled());
            }
            if self.failure.is_none() {
                self.refresh();
                self.dispatch_queued().await;
            }
            if self.running.is_empty() {
                break;
            }
            tokio::select! {
                Some(message) = self.messages.recv() => self.handle(message).await,
                () = self.cancel.cancelled(), if self.failure.is_none() => {
                    self.fail(NodeException::cancelled());
                }
                else => break,
            }
        }

        self.finish().await;
        self.store
    }

    async fn start(&mut self) -> Result<(), NodeException> {
        let workflow = self.workflow.name().to_string();
        let resuming = !self.state.node_execution().paused.is_empty();
        let restarting = !self.state.node_execution().is_pristine();

        if restarting {
            let inputs = self.state.workflow_inputs().clone();
            self.emit_workflow(EventBody::WorkflowInitiated(WorkflowInitiatedBody {
                workflow: workflow.clone(),
                inputs,
            }))
            .await;
        } else {
            let prepared = self
                .workflow
                .prepare_inputs(&self.inputs, self.state.parent().map(Arc::as_ref));
            let shown = prepared.as_ref().map_or_else(|_| self.inputs.clone(), Clone::clone);
            self.emit_workflow(EventBody::WorkflowInitiated(WorkflowInitiatedBody {
                workflow: workflow.clone(),
                inputs: shown,
            }))
            .await;
            let prepared = prepared.map_err(|e| NodeException::invalid_inputs(e.to_string()))?;
            for (name, value) in prepared {
                self.state.set_workflow_input(name, value);
            }
            let workflow_def = Arc::clone(&self.workflow);
            for (name, initial) in workflow_def.state_fields() {
                if self.state.field(name).is_none() {
                    self.state.set_field(name.clone(), initial.clone());
                }
            }
        }

        self.apply_external_inputs()?;

        if resuming {
            tracing::info!(paused = self.state.node_execution().paused.len(), "resuming workflow");
            self.emit_workflow(EventBody::WorkflowResumed { workflow })
                .await;
            let paused = std::mem::take(&mut self.state.node_execution_mut().paused);
            for (node_id, span_id) in paused {
                if let Some(node) = self.workflow.node(node_id) {
                    let node = node_ref(node);
                    self.emit_node(span_id, EventBody::NodeResumed { node }).await;
                    self.resumed.insert(node_id, span_id);
                }
            }
        }

        let entrypoints = match self.entrypoints.take() {
            Some(entrypoints) => entrypoints,
            None if restarting => Vec::new(),
            None => self.workflow.graph().entrypoints().to_vec(),
        };
        let workflow_def = Arc::clone(&self.workflow);
        Readiness::new(workflow_def.graph()).force(self.state.node_execution_mut(), &entrypoints);
        self.store.append_snapshot(&self.state);
        Ok(())
    }

    fn apply_external_inputs(&mut self) -> Result<(), NodeException> {
        for (node_id, name, value) in std::mem::take(&mut self.external_inputs) {
            let node = self.workflow.node(node_id).ok_or_else(|| {
                NodeException::invalid_inputs(format!(
                    "external input '{name}' targets {node_id}, which is not in the workflow"
                ))
            })?;
            if let Some(decl) = node.external_inputs().iter().find(|decl| decl.name == name)
                && !decl.kind.accepts(&value)
            {
                return Err(NodeException::invalid_inputs(format!(
                    "external input '{name}' of node '{}' expected {}, got {}",
                    node.name(),
                    decl.kind,
                    crate::node::json_kind_name(&value)
                )));
            }
            self.state.set_external_input(node_id, name, value);
        }
        Ok(())
    }

    /// Re-evaluates every node that is neither queued nor running.
    fn refresh(&mut self) {
        let workflow = Arc::clone(&self.workflow);
        let cache = self.state.node_execution();
        let candidates: Vec<&Node> = workflow
            .graph()
            .nodes()
            .filter(|node| {
                let id = node.id();
                !self.running.contains_key(&id)
                    && !cache.queued.contains(&id)
                    && (cache.forced.contains(&id)
                        || cache.waiting.contains(&id)
                        || cache.fired_edges.contains_key(&id))
            })
            .collect();
        if candidates.is_empty() {
            return;
        }

        let readiness = Readiness::new(workflow.graph());
        let mut cache = std::mem::take(self.state.node_execution_mut());
        for node in candidates {
            if readiness.evaluate(node, &mut cache, &self.state) == Evaluation::Unresolved {
                tracing::debug!(node = %node.name(), "trigger satisfied but attributes unresolved");
            }
        }
        *self.state.node_execution_mut() = cache;
    }

    async fn dispatch_queued(&mut self) {
        let queued = self.state.node_execution().queued.clone();
        for node_id in queued {
            if self.failure.is_some() {
                break;
            }
            if self.running.contains_key(&node_id)
                || self.state.node_execution().paused.contains_key(&node_id)
            {
                continue;
            }
            if self
                .config
                .max_concurrency
                .is_some_and(|cap| self.running.len() >= cap)
            {
                break;
            }
            self.dispatch(node_id).await;
        }
    }

    #[tracing::instrument(skip(self))]
    async fn dispatch(&mut self, node_id: NodeId) {
        let Some(node) = self.workflow.node(node_id).cloned() else {
            self.state.node_execution_mut().dequeue(node_id);
            return;
        };
        let mut missing = self.missing_external_inputs(&node);
        let mut attributes = BTreeMap::new();
        let mut invalid = None;
        for (name, reference) in node.attributes() {
            match reference.resolve(&self.state) {
                Ok(value) => {
                    attributes.insert(name.clone(), value);
                }
                Err(ResolveError::UnresolvedExternalInput { .. }) => {}
                Err(e) if e.is_unresolved() => {
                    self.state.node_execution_mut().dequeue(node_id);
                    if node.trigger().merge_behavior == MergeBehavior::AwaitAttributes {
                        self.state.node_execution_mut().waiting.insert(node_id);
                    }
                    tracing::debug!(node = %node.name(), attribute = %name, "attribute went unresolved before dispatch");
                    return;
                }
                Err(e) => {
                    invalid.get_or_insert_with(|| {
                        NodeException::invalid_inputs(format!(
                            "attribute '{name}' of node '{}' could not be resolved: {e}",
                            node.name()
                        ))
                    });
                }
            }
        }
        missing.sort();
        missing.dedup();

        let span_id = match self.resumed.remove(&node_id) {
            Some(span_id) => span_id,
            None => {
                let span_id = SpanId::new();
                self.emit_node(
                    span_id,
                    EventBody::NodeInitiated {
                        node: node_ref(&node),
                        inputs: attributes.clone(),
                    },
                )
                .await;
                span_id
            }
        };

        if let Some(error) = invalid {
            self.state.node_execution_mut().dequeue(node_id);
            self.reject_node(&node, span_id, error).await;
            return;
        }

        if !missing.is_empty() {
            tracing::info!(node = %node.name(), missing = missing.len(), "node paused on external inputs");
            self.state.node_execution_mut().paused.insert(node_id, span_id);
            self.emit_node(
                span_id,
                EventBody::NodePaused {
                    node: node_ref(&node),
                    external_inputs: missing,
                },
            )
            .await;
            return;
        }

        let ctx = NodeContext::new(NodeContextParts {
            node,
            workflow: Arc::clone(&self.workflow),
            span_id,
            trace_id: self.trace_id,
            attributes,
            state: Arc::new(self.state.snapshot()),
            workflow_context: self.context.clone(),
            sender: self.sender.clone(),
            cancel: self.node_cancel.child_token(),
            mocks: Arc::clone(&self.mocks),
            config: self.config.clone(),
        });
        tokio::spawn(execute_node(ctx));
        self.running.insert(
            node_id,
            RunningNode {
                span_id,
                emitted: Outputs::new(),
                invoked_ports: None,
                mirrored: BTreeSet::new(),
            },
        );
    }

    /// Lists the external inputs a node needs that have not been supplied:
    /// its own declarations plus any external input its attributes read.
    fn missing_external_inputs(&self, node: &Node) -> Vec<ExternalInputRef> {
        let mut missing: Vec<ExternalInputRef> = node
            .external_inputs()
            .iter()
            .filter(|decl| self.state.external_input(node.id(), &decl.name).is_none())
            .map(|decl| ExternalInputRef {
                node_id: node.id(),
                node_name: node.name().to_string(),
                name: decl.name.clone(),
            })
            .collect();
        for (_, reference) in node.attributes() {
            if let Err(ResolveError::UnresolvedExternalInput { node_id, name }) =
                reference.resolve(&self.state)
            {
                let node_name = self
                    .workflow
                    .node(node_id)
                    .map_or_else(|| node_id.to_string(), |n| n.name().to_string());
                missing.push(ExternalInputRef {
                    node_id,
                    node_name,
                    name,
                });
            }
        }
        missing
    }

    async fn handle(&mut self, message: NodeMessage) {
        match message {
            NodeMessage::Forward(event) => self.record(*event).await,
            NodeMessage::Delta {
                node_id,
                span_id,
                delta,
            } => self.on_delta(node_id, span_id, delta).await,
            NodeMessage::StateUpdate {
                node_id,
                span_id,
                field,
                value,
            } => {
                if self.is_current(node_id, span_id) {
                    self.state.set_field(field, value);
                    self.store.append_snapshot(&self.state);
                }
            }
            NodeMessage::Finished {
                node_id,
                span_id,
                result,
            } => self.on_finished(node_id, span_id, result).await,
        }
    }

    fn is_current(&self, node_id: NodeId, span_id: SpanId) -> bool {
        self.running
            .get(&node_id)
            .is_some_and(|running| running.span_id == span_id)
    }

    async fn on_delta(&mut self, node_id: NodeId, span_id: SpanId, delta: OutputDelta) {
        if !self.is_current(node_id, span_id) {
            return;
        }
        let Some(node) = self.workflow.node(node_id).cloned() else {
            return;
        };
        self.emit_node(
            span_id,
            EventBody::NodeStreaming {
                node: node_ref(&node),
                output: delta.clone(),
            },
        )
        .await;
        self.mirror(node_id, &delta).await;

        if !delta.is_mergeable() {
            return;
        }
        let Some(value) = delta.value else {
            return;
        };
        self.state
            .set_node_output(node_id, delta.name.clone(), value.clone());
        if let Some(running) = self.running.get_mut(&node_id) {
            running.emitted.insert(delta.name, value);
        }
        if self.config.snapshot_streamed_outputs {
            self.store.append_snapshot(&self.state);
        }
        if node.ports().has_streamable() {
            self.fire_streamable_ports(&node);
        }
    }

    /// Fires a running node's ports early once its selection is decidable
    /// and every selected port is streamable.
    fn fire_streamable_ports(&mut self, node: &Node) {
        let node_id = node.id();
        if self
            .running
            .get(&node_id)
            .is_none_or(|running| running.invoked_ports.is_some())
        {
            return;
        }
        let Ok(selected) = node.ports().select(&self.state) else {
            return;
        };
        if selected.is_empty() || !selected.iter().all(|port| port.streamable) {
            return;
        }
        let names: Vec<String> = selected.iter().map(|port| port.name.clone()).collect();
        tracing::debug!(node = %node.name(), ports = ?names, "streamable ports fired early");
        self.fire_ports(node_id, &names);
        if let Some(running) = self.running.get_mut(&node_id) {
            running.invoked_ports = Some(names);
        }
    }

    async fn on_finished(
        &mut self,
        node_id: NodeId,
        span_id: SpanId,
        result: Result<Outputs, NodeException>,
    ) {
        if !self.is_current(node_id, span_id) {
            return;
        }
        let Some(running) = self.running.remove(&node_id) else {
            return;
        };
        self.state.node_execution_mut().dequeue(node_id);
        let Some(node) = self.workflow.node(node_id).cloned() else {
            return;
        };

        let returned = match result.and_then(|outputs| {
            node.validate_outputs(&outputs)?;
            Ok(outputs)
        }) {
            Ok(outputs) => outputs,
            Err(error) => {
                self.reject_node(&node, span_id, error).await;
                return;
            }
        };

        let mut outputs = running.emitted;
        outputs.extend(returned);
        self.state.merge_node_outputs(node_id, &outputs);
        *self
            .state
            .node_execution_mut()
            .fulfilled
            .entry(node_id)
            .or_default() += 1;

        let early = running.invoked_ports.is_some();
        let invoked_ports = match running.invoked_ports {
            Some(ports) => ports,
            None => match node.ports().select(&self.state) {
                Ok(ports) => ports.iter().map(|port| port.name.clone()).collect(),
                Err(e) => {
                    let error = NodeException::internal(format!(
                        "port condition of node '{}' could not be evaluated: {e}",
                        node.name()
                    ));
                    self.reject_node(&node, span_id, error).await;
                    return;
                }
            },
        };

        tracing::debug!(node = %node.name(), ports = ?invoked_ports, "node fulfilled");
        self.emit_node(
            span_id,
            EventBody::NodeFulfilled {
                node: node_ref(&node),
                outputs: outputs.clone(),
                invoked_ports: invoked_ports.clone(),
            },
        )
        .await;
        self.store.append_snapshot(&self.state);

        for (name, value) in outputs {
            if !running.mirrored.contains(&name) {
                self.mirror(node_id, &OutputDelta::fulfilled(name, value))
                    .await;
            }
        }
        if !early {
            self.fire_ports(node_id, &invoked_ports);
        }
    }

    fn fire_ports(&mut self, node_id: NodeId, ports: &[String]) {
        let workflow = Arc::clone(&self.workflow);
        Readiness::new(workflow.graph()).fire_ports(self.state.node_execution_mut(), node_id, ports);
    }

    async fn reject_node(&mut self, node: &Node, span_id: SpanId, error: NodeException) {
        tracing::warn!(node = %node.name(), code = %error.code, message = %error.message, "node rejected");
        self.emit_node(
            span_id,
            EventBody::NodeRejected {
                node: node_ref(node),
                error: error.clone(),
            },
        )
        .await;
        self.fail(error);
    }

    /// Records the first failure and cancels every running node.
    fn fail(&mut self, error: NodeException) {
        if self.failure.is_some() {
            return;
        }
        tracing::debug!(running = self.running.len(), "stopping dispatch");
        self.failure = Some(error);
        self.node_cancel.cancel();
    }

    /// Mirrors a node delta as a workflow streaming event for every
    /// workflow output that reads that node output directly.
    async fn mirror(&mut self, node_id: NodeId, delta: &OutputDelta) {
        let names: Vec<String> = self
            .workflow
            .outputs()
            .iter()
            .filter(|(_, reference)| reads_output(reference, node_id, &delta.name))
            .map(|(name, _)| name.clone())
            .collect();
        if names.is_empty() {
            return;
        }
        if delta.is_mergeable()
            && let Some(running) = self.running.get_mut(&node_id)
        {
            running.mirrored.insert(delta.name.clone());
        }
        let workflow = self.workflow.name().to_string();
        for name in names {
            let output = OutputDelta {
                name,
                ..delta.clone()
            };
            self.emit_workflow(EventBody::WorkflowStreaming {
                workflow: workflow.clone(),
                output,
            })
            .await;
        }
    }

    async fn finish(&mut self) {
        let workflow = self.workflow.name().to_string();
        self.store.append_snapshot(&self.state);

        if let Some(error) = self.failure.take() {
            tracing::warn!(code = %error.code, message = %error.message, "workflow rejected");
            self.emit_workflow(EventBody::WorkflowRejected { workflow, error })
                .await;
            return;
        }

        let paused: Vec<NodeId> = self
            .state
            .node_execution()
            .paused
            .keys()
            .copied()
            .collect();
        if !paused.is_empty() {
            let mut external_inputs: Vec<ExternalInputRef> = paused
                .into_iter()
                .filter_map(|node_id| self.workflow.node(node_id))
                .flat_map(|node| self.missing_external_inputs(node))
                .collect();
            external_inputs.sort();
            external_inputs.dedup();
            tracing::info!(missing = external_inputs.len(), "workflow paused");
            self.emit_workflow(EventBody::WorkflowPaused {
                workflow,
                external_inputs,
            })
            .await;
            return;
        }

        match self.resolve_outputs() {
            Ok(outputs) => {
                tracing::info!("workflow fulfilled");
                self.emit_workflow(EventBody::WorkflowFulfilled { workflow, outputs })
                    .await;
            }
            Err(error) => {
                tracing::warn!(message = %error.message, "workflow outputs unresolved");
                self.emit_workflow(EventBody::WorkflowRejected { workflow, error })
                    .await;
            }
        }
    }

    fn resolve_outputs(&self) -> Result<Outputs, NodeException> {
        self.workflow
            .outputs()
            .iter()
            .map(|(name, reference)| {
                reference
                    .resolve(&self.state)
                    .map(|value| (name.clone(), value))
                    .map_err(|e| {
                        NodeException::invalid_outputs(format!(
                            "workflow output '{name}' could not be resolved: {e}"
                        ))
                    })
            })
            .collect()
    }

    async fn emit_workflow(&mut self, body: EventBody) {
        let event = WorkflowEvent::new(self.trace_id, self.span_id, self.parent.clone(), body);
        self.record(event).await;
    }

    async fn emit_node(&mut self, span_id: SpanId, body: EventBody) {
        let event = WorkflowEvent::new(self.trace_id, span_id, Some(self.context.clone()), body);
        self.record(event).await;
    }

    /// Appends to the store, then publishes if the filter admits the event.
    async fn record(&mut self, event: WorkflowEvent) {
        tracing::trace!(event = event.name(), span_id = %event.span_id);
        let publish = self.filter.matches(&self.workflow, &event);
        self.store.append_event(event.clone());
        if publish && self.events.send(event).await.is_err() {
            tracing::trace!("event stream dropped");
        }
    }
}

/// Body of a spawned node task. Always reports back with `Finished`.
async fn execute_node(ctx: NodeContext) {
    let mocks = ctx.mocks();
    let result = match find_mock(&mocks, ctx.node().id(), ctx.state()) {
        Some(outputs) => {
            tracing::debug!(node = %ctx.node().name(), "node mocked");
            Ok(outputs.clone())
        }
        None => {
            let behavior = ctx.node().behavior();
            let run = AssertUnwindSafe(behavior.run(&ctx)).catch_unwind();
            let result = if behavior.handles_cancellation() {
                run.await
            } else {
                tokio::select! {
                    biased;
                    () = ctx.cancelled() => Ok(Err(NodeException::cancelled())),
                    result = run => result,
                }
            };
            result.unwrap_or_else(|panic| {
                Err(NodeException::internal(panic_message(panic.as_ref())))
            })
        }
    };
    ctx.finish(result);
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|message| (*message).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .map_or_else(
            || "node panicked".to_string(),
            |message| format!("node panicked: {message}"),
        )
}

fn node_ref(node: &Node) -> NodeRef {
    NodeRef {
        node_id: node.id(),
        node_name: node.name().to_string(),
    }
}

fn reads_output(reference: &Reference, node_id: NodeId, output: &str) -> bool {
    match reference {
        Reference::NodeOutput { node, output: name } => *node == node_id && name == output,
        Reference::Lazy {
            node_name,
            output: name,
        } => NodeId::from_name(node_name) == node_id && name == output,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn panic_messages_are_extracted() {
        let boxed: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(boxed.as_ref()), "node panicked: boom");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("bad"));
        assert_eq!(panic_message(boxed.as_ref()), "node panicked: bad");
        let boxed: Box<dyn Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(boxed.as_ref()), "node panicked");
    }

    #[test]
    fn direct_output_references_are_mirrored() {
        let id = NodeId::from_name("A");
        assert!(reads_output(&Reference::node_output(id, "text"), id, "text"));
        assert!(reads_output(&Reference::lazy("A", "text"), id, "text"));
        assert!(!reads_output(&Reference::node_output(id, "other"), id, "text"));
        assert!(!reads_output(&Reference::input("text"), id, "text"));
    }
}
