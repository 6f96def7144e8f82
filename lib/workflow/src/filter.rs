//! Predicates selecting which events reach the caller's stream.
//!
//! The store always records every event; filters only shape what a
//! `WorkflowStream` yields.

use crate::definition::Workflow;
use crate::events::WorkflowEvent;
use std::fmt;
use std::sync::Arc;

/// Keeps only workflow-level events of the definition being run.
#[must_use]
pub fn workflow_event_filter(workflow: &Workflow, event: &WorkflowEvent) -> bool {
    event.body.workflow_name() == Some(workflow.name())
}

/// Keeps workflow-level events of the definition and events of its own nodes.
#[must_use]
pub fn root_workflow_event_filter(workflow: &Workflow, event: &WorkflowEvent) -> bool {
    if event.body.is_workflow_event() {
        return workflow_event_filter(workflow, event);
    }
    event
        .parent
        .as_ref()
        .and_then(|parent| parent.workflow_name())
        == Some(workflow.name())
}

/// Keeps every event, nested executions included.
#[must_use]
pub fn all_workflow_event_filter(_workflow: &Workflow, _event: &WorkflowEvent) -> bool {
    true
}

type Predicate = dyn Fn(&Workflow, &WorkflowEvent) -> bool + Send + Sync;

/// A shareable event predicate over `(definition, event)`.
#[derive(Clone)]
pub struct EventFilter(Arc<Predicate>);

impl EventFilter {
    /// Wraps a predicate.
    #[must_use]
    pub fn new(predicate: impl Fn(&Workflow, &WorkflowEvent) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(predicate))
    }

    /// A filter that keeps every event.
    #[must_use]
    pub fn all() -> Self {
        Self::new(all_workflow_event_filter)
    }

    /// Returns true if the event should be yielded.
    #[must_use]
    pub fn matches(&self, workflow: &Workflow, event: &WorkflowEvent) -> bool {
        (self.0)(workflow, event)
    }
}

impl Default for EventFilter {
    fn default() -> Self {
        Self::new(root_workflow_event_filter)
    }
}

impl fmt::Debug for EventFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EventFilter")
    }
}
