//! Configuration for the sample runner, loaded via the `config` crate from
//! environment variables.

use serde::Deserialize;
use std::path::PathBuf;
use trellis_workflow::RunnerConfig;

/// Runner binary configuration.
#[derive(Debug, Deserialize)]
pub struct AppConfig {
    /// Scheduler tuning, e.g. `TRELLIS__RUNNER__MAX_CONCURRENCY=2`.
    #[serde(default)]
    pub runner: RunnerConfig,

    /// Comma-separated topics fed to the sample workflow.
    #[serde(default = "default_topics")]
    pub topics: String,

    /// Where to write the finished execution's store, if anywhere.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
}

fn default_topics() -> String {
    "graphs,streams,retries".to_string()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            runner: RunnerConfig::default(),
            topics: default_topics(),
            store_path: None,
        }
    }
}

impl AppConfig {
    /// Loads configuration from `TRELLIS__*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("TRELLIS")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()
    }

    /// Returns the configured topics, trimmed, without empty entries.
    #[must_use]
    pub fn topic_list(&self) -> Vec<String> {
        self.topics
            .split(',')
            .map(str::trim)
            .filter(|topic| !topic.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}
