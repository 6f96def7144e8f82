//! Runs the sample digest workflow and prints every event as a JSON line on
//! stdout. Logs go to stderr. Ctrl-C cancels the execution.

mod config;
mod sample;

use crate::config::AppConfig;
use futures::StreamExt;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use trellis_workflow::{EventFilter, WorkflowRunner};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = AppConfig::from_env().expect("failed to load configuration");
    let topics = config.topic_list();
    tracing::info!(topics = topics.len(), "Loaded configuration");

    let workflow = sample::digest_workflow().expect("failed to build sample workflow");

    let cancel = CancellationToken::new();
    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted; cancelling execution");
                cancel.cancel();
            }
        }
    });

    let mut stream = WorkflowRunner::new(workflow)
        .input("topics", json!(topics))
        .config(config.runner)
        .cancel_token(cancel)
        .event_filter(EventFilter::all())
        .stream();
    tracing::info!(trace_id = %stream.trace_id(), span_id = %stream.span_id(), "Started execution");

    while let Some(event) = stream.next().await {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{line}"),
            Err(e) => tracing::warn!(error = %e, event = event.name(), "Failed to encode event"),
        }
    }

    let store = stream.finish().await.expect("scheduler failed");
    match store.terminal_event() {
        Some(terminal) => tracing::info!(outcome = terminal.name(), "Execution finished"),
        None => tracing::warn!("Execution ended without a terminal event"),
    }

    if let Some(path) = &config.store_path {
        store.save(path).expect("failed to save store");
        tracing::info!(path = %path.display(), "Saved store");
    }
}
