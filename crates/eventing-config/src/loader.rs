//! Configuration loader.

use std::fs;
use std::path::Path;

use crate::error::ConfigError;
use crate::schema::Config;

/// Configuration loader with environment variable substitution.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.display().to_string()));
        }
        let content = fs::read_to_string(path)?;
        Self::load_str(&content)
    }

    /// Load configuration from a string.
    pub fn load_str(content: &str) -> Result<Config, ConfigError> {
        let expanded = Self::expand_env_vars(content)?;
        let config: Config = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Expand environment variables in the format `${VAR}`.
    fn expand_env_vars(content: &str) -> Result<String, ConfigError> {
        let re = regex::Regex::new(r"\$\{([^}]+)\}")
            .map_err(|e| ConfigError::InvalidFormat(e.to_string()))?;

        let mut result = content.to_string();
        for cap in re.captures_iter(content) {
            let var_name = &cap[1];
            let var_value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotSet(var_name.to_string()))?;
            result = result.replace(&cap[0], &var_value);
        }

        Ok(result)
    }

    /// Expand shell-style paths (e.g., `~/.eventing/logs`).
    pub fn expand_path(path: &str) -> String {
        shellexpand::tilde(path).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::QueueType;
    use crate::validator::ConfigValidator;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_empty_config() {
        let config = ConfigLoader::load_str("").unwrap();
        assert_eq!(config.jobs.root_path, "/sling/jobs");
        assert_eq!(config.scheduled.root_path, "/sling/events");
        assert_eq!(config.jobs.max_workers, 35);
        assert!(config.queues.is_empty());
    }

    #[test]
    fn test_load_jobs_section() {
        let content = r#"
            [jobs]
            root_path = "/var/jobs"
            max_retries = 3
            busy_requeue_delay_ms = 5
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.jobs.root_path, "/var/jobs");
        assert_eq!(config.jobs.max_retries, 3);
        assert_eq!(config.jobs.busy_requeue_delay_ms, 5);
        // untouched fields keep their defaults
        assert_eq!(config.jobs.cleanup_period_mins, 10);
    }

    #[test]
    fn test_load_queues() {
        let content = r#"
            [[queues]]
            name = "orders"
            topics = ["shop/order/*"]
            queue_type = "ordered"

            [[queues]]
            name = "mail"
            topics = ["mail/*", "notify/*"]
            queue_type = "topic_round_robin"
            max_parallel = 4
            max_retries = 2
        "#;
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.queues[0].queue_type, QueueType::Ordered);
        assert_eq!(config.queues[0].max_parallel, 1);
        assert_eq!(config.queues[1].queue_type, QueueType::TopicRoundRobin);
        assert_eq!(config.queues[1].max_parallel, 4);
        assert_eq!(config.queues[1].max_retries, Some(2));
        assert!(config.queues[1].retry_delay_ms.is_none());
    }

    #[test]
    fn test_load_unknown_queue_type() {
        let content = r#"
            [[queues]]
            name = "x"
            topics = ["a"]
            queue_type = "lifo"
        "#;
        assert!(ConfigLoader::load_str(content).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[node]").unwrap();
        writeln!(file, "application_id = \"node-a\"").unwrap();

        let config = ConfigLoader::load(file.path()).unwrap();
        assert_eq!(config.node.application_id, "node-a");
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = ConfigLoader::load(Path::new("/nonexistent/path/eventing.toml"));
        assert!(matches!(result, Err(ConfigError::NotFound(_))));
    }

    #[test]
    fn test_load_invalid_toml() {
        let result = ConfigLoader::load_str("jobs = [unclosed");
        assert!(result.is_err());
    }

    #[test]
    fn test_expand_env_vars() {
        // SAFETY: unique test-only variable
        unsafe {
            std::env::set_var("EVENTING_TEST_NODE", "node-from-env");
        }
        let content = "[node]\napplication_id = \"${EVENTING_TEST_NODE}\"";
        let config = ConfigLoader::load_str(content).unwrap();
        assert_eq!(config.node.application_id, "node-from-env");
        unsafe {
            std::env::remove_var("EVENTING_TEST_NODE");
        }
    }

    #[test]
    fn test_expand_env_vars_not_set() {
        let content = "value = \"${EVENTING_NONEXISTENT_VAR_12345}\"";
        let result = ConfigLoader::expand_env_vars(content);
        assert!(matches!(result, Err(ConfigError::EnvVarNotSet(_))));
    }

    #[test]
    fn test_expand_path_with_tilde() {
        let expanded = ConfigLoader::expand_path("~/logs");
        assert!(!expanded.starts_with('~'));
        assert!(expanded.ends_with("/logs"));
    }

    #[test]
    fn test_shipped_default_config() {
        let config = ConfigLoader::load_str(include_str!("../../../config/default.toml")).unwrap();
        assert_eq!(config.jobs.root_path, "/sling/jobs");
        assert_eq!(config.queues.len(), 2);
        assert_eq!(config.logging.file_prefix, "eventing");

        let result = ConfigValidator::validate(&config).unwrap();
        assert!(result.is_valid(), "{:?}", result.errors);
        assert!(result.warnings.is_empty());
    }
}
