//! Trigger policies for nodes with several incoming edges.
//!
//! A trigger decides when a node becomes ready:
//! - `AwaitAny`: as soon as any incoming edge fires
//! - `AwaitAll`: once every incoming edge on an active path has fired
//! - `AwaitAttributes`: once every attribute reference resolves

use serde::{Deserialize, Serialize};

/// How incoming edge signals are merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MergeBehavior {
    /// Ready when any one incoming edge fired.
    #[default]
    AwaitAny,
    /// Ready when every incoming edge that can still fire has fired.
    AwaitAll,
    /// Ready when all attribute references are resolvable.
    AwaitAttributes,
}

/// The trigger policy of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Trigger {
    /// The merge behaviour.
    pub merge_behavior: MergeBehavior,
}

impl Trigger {
    /// Creates a trigger with the given merge behaviour.
    #[must_use]
    pub const fn new(merge_behavior: MergeBehavior) -> Self {
        Self { merge_behavior }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_await_any() {
        assert_eq!(Trigger::default().merge_behavior, MergeBehavior::AwaitAny);
    }

    #[test]
    fn merge_behavior_wire_names() {
        let json = serde_json::to_string(&MergeBehavior::AwaitAttributes).expect("serialize");
        assert_eq!(json, "\"AWAIT_ATTRIBUTES\"");
    }
}
