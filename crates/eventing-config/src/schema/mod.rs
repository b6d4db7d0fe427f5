//! Configuration schema definitions.

use serde::{Deserialize, Serialize};

mod schema_jobs;

pub use schema_jobs::*;

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,

    #[serde(default)]
    pub jobs: JobsConfig,

    #[serde(default)]
    pub scheduled: ScheduledConfig,

    /// Named job queues. Topics not matched by any queue go through the
    /// default topic-exclusive dispatch.
    #[serde(default)]
    pub queues: Vec<QueueConfig>,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Identity of this cluster node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Application id written into every persisted job.
    #[serde(default = "default_application_id")]
    pub application_id: String,
}

fn default_application_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            application_id: default_application_id(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Directory for rolling log files.
    #[serde(default = "default_log_directory")]
    pub directory: String,

    #[serde(default = "default_log_file_prefix")]
    pub file_prefix: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_directory() -> String {
    "~/.eventing/logs".to_string()
}

fn default_log_file_prefix() -> String {
    "eventing".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            directory: default_log_directory(),
            file_prefix: default_log_file_prefix(),
        }
    }
}
