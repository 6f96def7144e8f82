//! Runner configuration.

use serde::Deserialize;

fn default_snapshot_streamed_outputs() -> bool {
    true
}

fn default_event_buffer() -> usize {
    1024
}

/// Tuning knobs for a `WorkflowRunner`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunnerConfig {
    /// Maximum number of nodes of one execution running at once.
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    /// Take a state snapshot after each merged per-output value.
    #[serde(default = "default_snapshot_streamed_outputs")]
    pub snapshot_streamed_outputs: bool,
    /// Capacity of the channel between the scheduler and the event stream.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            max_concurrency: None,
            snapshot_streamed_outputs: default_snapshot_streamed_outputs(),
            event_buffer: default_event_buffer(),
        }
    }
}

impl RunnerConfig {
    /// Sets the concurrency cap.
    #[must_use]
    pub fn with_max_concurrency(mut self, max_concurrency: usize) -> Self {
        self.max_concurrency = Some(max_concurrency.max(1));
        self
    }

    pub(crate) fn channel_capacity(&self) -> usize {
        self.event_buffer.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = RunnerConfig::default();
        assert_eq!(config.max_concurrency, None);
        assert!(config.snapshot_streamed_outputs);
        assert_eq!(config.event_buffer, 1024);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: RunnerConfig =
            serde_json::from_str(r#"{"max_concurrency": 2}"#).expect("deserialize");
        assert_eq!(config.max_concurrency, Some(2));
        assert!(config.snapshot_streamed_outputs);
    }

    #[test]
    fn concurrency_cap_is_at_least_one() {
        assert_eq!(RunnerConfig::default().with_max_concurrency(0).max_concurrency, Some(1));
        let zero_buffer = RunnerConfig {
            event_buffer: 0,
            ..RunnerConfig::default()
        };
        assert_eq!(zero_buffer.channel_capacity(), 1);
    }
}
