//! The sample workflow run by the binary.
//!
//! `SummarizeAll` maps `Summarize` over the `topics` input, at most two at
//! a time, streaming each summary word by word. `Join` then concatenates
//! the summaries into the `digest` output.

use async_trait::async_trait;
use serde_json::json;
use std::time::Duration;
use trellis_workflow::{
    GraphError, MapNode, Node, NodeContext, NodeException, NodeRun, Outputs, Reference,
    ValueKind, Workflow, outputs,
};

/// Builds the digest workflow.
///
/// # Errors
///
/// Returns an error if the graph is malformed.
pub fn digest_workflow() -> trellis_core::Result<Workflow, GraphError> {
    let summarize = Node::builder("Summarize")
        .attribute("topic", Reference::input("item"))
        .output("summary", ValueKind::String)
        .run(Summarize {
            pause: Duration::from_millis(25),
        })
        .build();
    let summarize_all = MapNode::builder("SummarizeAll")
        .items(Reference::input("topics"))
        .max_concurrency(2)
        .node(&summarize)
        .build()?;
    let join = Node::builder("Join")
        .attribute("summaries", summarize_all.output("summary"))
        .output("digest", ValueKind::String)
        .run_fn(|ctx| {
            let summaries: Vec<String> = ctx.attribute_as("summaries")?;
            Ok(outputs([("digest", json!(summaries.join("\n")))]))
        })
        .build();

    Workflow::builder("digest")
        .description("Summarizes each topic and joins the summaries")
        .input("topics", ValueKind::Array)
        .graph(&summarize_all >> &join)
        .output("digest", join.output("digest"))
        .build()
}

struct Summarize {
    pause: Duration,
}

#[async_trait]
impl NodeRun for Summarize {
    async fn run(&self, ctx: &NodeContext) -> Result<Outputs, NodeException> {
        let topic: String = ctx.attribute_as("topic")?;
        let words = ["notes", "on", topic.as_str()];
        for word in words {
            ctx.stream("summary", json!(word))?;
            tokio::select! {
                () = ctx.cancelled() => return Err(NodeException::cancelled()),
                () = tokio::time::sleep(self.pause) => {}
            }
        }
        Ok(outputs([("summary", json!(words.join(" ")))]))
    }
}
