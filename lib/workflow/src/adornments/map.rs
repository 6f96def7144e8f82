//! Running a node once per item of a list.

use super::run_subworkflow;
use crate::context::NodeContext;
use crate::definition::Workflow;
use crate::error::GraphError;
use crate::exception::NodeException;
use crate::node::{Node, NodeRun, Outputs, ValueKind};
use crate::port::Ports;
use crate::reference::Reference;
use crate::trigger::MergeBehavior;
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Input carrying the current item.
pub const ITEM_INPUT: &str = "item";
/// Input carrying the current item's position.
pub const INDEX_INPUT: &str = "index";
/// Input carrying the whole list.
pub const ALL_ITEMS_INPUT: &str = "all_items";

/// Builder for a node that runs a subworkflow once per item.
///
/// Each iteration receives the inputs `item`, `index` and `all_items`,
/// limited to the ones the subworkflow declares. Every output of the
/// subworkflow becomes an array output of the map node, ordered by item
/// position regardless of completion order.
#[derive(Debug, Clone)]
pub struct MapNode {
    name: String,
    items: Option<Reference>,
    max_concurrency: Option<usize>,
    body: Option<MapBody>,
    ports: Option<Ports>,
    trigger: Option<MergeBehavior>,
}

#[derive(Debug, Clone)]
enum MapBody {
    Node(Node),
    Workflow(Arc<Workflow>),
}

impl MapNode {
    /// Starts a map adornment with unbounded concurrency.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: None,
            max_concurrency: None,
            body: None,
            ports: None,
            trigger: None,
        }
    }

    /// Sets the list to iterate over.
    #[must_use]
    pub fn items(mut self, items: impl Into<Reference>) -> Self {
        self.items = Some(items.into());
        self
    }

    /// Caps the number of iterations running at once.
    #[must_use]
    pub fn max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency);
        self
    }

    /// Runs a single node per item. The node reads the item through
    /// `Reference::input("item")`.
    #[must_use]
    pub fn node(mut self, inner: &Node) -> Self {
        self.body = Some(MapBody::Node(inner.clone()));
        self
    }

    /// Runs a whole workflow per item. It must declare the `item` input.
    #[must_use]
    pub fn subworkflow(mut self, workflow: impl Into<Arc<Workflow>>) -> Self {
        self.body = Some(MapBody::Workflow(workflow.into()));
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
    /// Returns an error if `items` or the body is missing, the concurrency
    /// cap is zero, or the subworkflow does not take an `item` input.
    pub fn build(self) -> trellis_core::Result<Node, GraphError> {
        let invalid = |reason: &str| GraphError::InvalidAdornment {
            node: self.name.clone(),
            reason: reason.to_string(),
        };
        let Some(items) = self.items.clone() else {
            return Err(invalid("no items to map over").into());
        };
        if self.max_concurrency == Some(0) {
            return Err(invalid("max_concurrency must be at least 1").into());
        }
        let subworkflow = match &self.body {
            None => return Err(invalid("no node or subworkflow to map").into()),
            Some(MapBody::Node(inner)) => Arc::new(iteration_workflow(inner)?),
            Some(MapBody::Workflow(workflow)) => {
                if !workflow.declares_input(ITEM_INPUT) {
                    return Err(invalid("subworkflow does not declare an 'item' input").into());
                }
                Arc::clone(workflow)
            }
        };

        let mut builder = Node::builder(self.name).attribute("items", items);
        for (name, _) in subworkflow.outputs() {
            builder = builder.output(name.clone(), ValueKind::Array);
        }
        if let Some(ports) = self.ports {
            builder = builder.ports(ports);
        }
        if let Some(trigger) = self.trigger {
            builder = builder.trigger(trigger);
        }
        Ok(builder
            .run(MapRun {
                subworkflow,
                max_concurrency: self.max_concurrency,
            })
            .build())
    }
}

fn iteration_workflow(inner: &Node) -> trellis_core::Result<Workflow, GraphError> {
    let mut builder = Workflow::builder(format!("{}.subworkflow", inner.name()))
        .input(ITEM_INPUT, ValueKind::Any)
        .input(INDEX_INPUT, ValueKind::Integer)
        .input(ALL_ITEMS_INPUT, ValueKind::Array)
        .graph(inner)
        .allow_outer_references();
    for field in inner.outputs() {
        builder = builder.output(field.name.clone(), inner.output(&field.name));
    }
    builder.build()
}

struct MapRun {
    subworkflow: Arc<Workflow>,
    max_concurrency: Option<usize>,
}

impl MapRun {
    fn iteration_inputs(
        &self,
        item: JsonValue,
        index: usize,
        all_items: &JsonValue,
    ) -> BTreeMap<String, JsonValue> {
        [
            (ITEM_INPUT, item),
            (INDEX_INPUT, JsonValue::from(index)),
            (ALL_ITEMS_INPUT, all_items.clone()),
        ]
        .into_iter()
        .filter(|(name, _)| self.subworkflow.declares_input(name))
        .map(|(name, value)| (name.to_string(), value))
        .collect()
    }

    fn collect(&self, results: Vec<Outputs>) -> Outputs {
        self.subworkflow
            .outputs()
            .iter()
            .map(|(name, _)| {
                let column = results
                    .iter()
                    .map(|outputs| outputs.get(name).cloned().unwrap_or(JsonValue::Null))
                    .collect();
                (name.clone(), JsonValue::Array(column))
            })
            .collect()
    }
}

#[async_trait]
impl NodeRun for MapRun {
    async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException> {
        let name = ctx.node().name();
        let items: Vec<JsonValue> = ctx.attribute_as("items")?;
        if items.is_empty() {
            return Ok(self.collect(Vec::new()));
        }
        let count = items.len();
        let limit = self.max_concurrency.unwrap_or(count).max(1);
        tracing::debug!(node = %name, count, limit, "mapping items");

        // Cancels the iterations still running when the map stops early.
        let abort = ctx.cancel_token().child_token();
        let _abort_on_drop = abort.clone().drop_guard();

        let all_items = JsonValue::Array(items.clone());
        let stop = abort.clone();
        let iterations = futures::stream::iter(items.into_iter().enumerate())
            .take_until(async move { stop.cancelled().await })
            .map(|(index, item)| {
                let inputs = self.iteration_inputs(item, index, &all_items);
                let run = run_subworkflow(
                    ctx,
                    Arc::clone(&self.subworkflow),
                    inputs,
                    Some(index),
                    abort.child_token(),
                );
                async move { (index, run.await) }
            })
            .buffer_unordered(limit);
        let mut iterations = std::pin::pin!(iterations);

        // After the first failure no new iteration starts, and the running
        // ones are cancelled and drained before the map rejects.
        let mut results: Vec<Option<Outputs>> = vec![None; count];
        let mut first_failure = None;
        while let Some((index, result)) = iterations.next().await {
            match result {
                Ok(outputs) => results[index] = Some(outputs),
                Err(failure) if first_failure.is_none() => {
                    tracing::info!(node = %name, index, "iteration failed; aborting map");
                    abort.cancel();
                    first_failure = Some(failure);
                }
                Err(_) => {}
            }
        }
        if let Some(failure) = first_failure {
            return Err(failure.into_exception(name));
        }
        if ctx.is_cancelled() {
            return Err(NodeException::cancelled());
        }
        Ok(self.collect(results.into_iter().map(Option::unwrap_or_default).collect()))
    }

    fn handles_cancellation(&self) -> bool {
        true
    }
}
