//! Configuration validation.

use std::collections::HashSet;
use std::fmt;

use crate::error::ConfigError;
use crate::schema::{Config, QueueType};

/// Validation result.
#[derive(Debug, Default)]
pub struct ValidationResult {
    pub errors: Vec<ValidationError>,
    pub warnings: Vec<ValidationWarning>,
}

impl ValidationResult {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn add_error(&mut self, error: ValidationError) {
        self.errors.push(error);
    }

    pub fn add_warning(&mut self, warning: ValidationWarning) {
        self.warnings.push(warning);
    }

    /// Turn the first error into a [`ConfigError::InvalidValue`], or hand
    /// back the warnings.
    pub fn ensure_valid(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(error.into()),
            None => Ok(self.warnings),
        }
    }
}

/// A validation error.
#[derive(Debug)]
pub struct ValidationError {
    pub path: String,
    pub message: String,
}

impl ValidationError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl From<ValidationError> for ConfigError {
    fn from(error: ValidationError) -> Self {
        ConfigError::InvalidValue {
            field: error.path,
            message: error.message,
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// A validation warning.
#[derive(Debug)]
pub struct ValidationWarning {
    pub path: String,
    pub message: String,
}

impl ValidationWarning {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_node(config, &mut result);
        Self::validate_jobs(config, &mut result);
        Self::validate_roots(config, &mut result);
        Self::validate_queues(config, &mut result);

        Ok(result)
    }

    fn validate_node(config: &Config, result: &mut ValidationResult) {
        if config.node.application_id.trim().is_empty() {
            result.add_error(ValidationError::new(
                "node.application_id",
                "application_id cannot be empty",
            ));
        }
    }

    fn validate_jobs(config: &Config, result: &mut ValidationResult) {
        let jobs = &config.jobs;

        if jobs.max_workers == 0 {
            result.add_error(ValidationError::new(
                "jobs.max_workers",
                "max_workers must be greater than 0",
            ));
        }

        if jobs.busy_requeue_delay_ms == 0 {
            result.add_warning(ValidationWarning::new(
                "jobs.busy_requeue_delay_ms",
                "busy_requeue_delay_ms is 0, busy topics will be requeued in a tight loop",
            ));
        }

        if jobs.maintenance_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "jobs.maintenance_interval_secs",
                "maintenance_interval_secs must be greater than 0",
            ));
        }

        if jobs.max_retries == 0 {
            result.add_warning(ValidationWarning::new(
                "jobs.max_retries",
                "max_retries is 0, failed jobs are never retried",
            ));
        }
    }

    fn validate_roots(config: &Config, result: &mut ValidationResult) {
        let roots = [
            ("jobs.root_path", &config.jobs.root_path),
            ("scheduled.root_path", &config.scheduled.root_path),
        ];

        for (path, root) in roots {
            if !root.starts_with('/') {
                result.add_error(ValidationError::new(
                    path,
                    format!("Root path must be absolute, got '{}'", root),
                ));
            } else if root.len() > 1 && root.ends_with('/') {
                result.add_error(ValidationError::new(
                    path,
                    format!("Root path must not end with '/', got '{}'", root),
                ));
            }
        }

        if config.jobs.root_path == config.scheduled.root_path {
            result.add_error(ValidationError::new(
                "scheduled.root_path",
                "Scheduled jobs and jobs cannot share a root path",
            ));
        }
    }

    fn validate_queues(config: &Config, result: &mut ValidationResult) {
        let mut names = HashSet::new();

        for (idx, queue) in config.queues.iter().enumerate() {
            let prefix = format!("queues[{}]", idx);

            if queue.name.trim().is_empty() {
                result.add_error(ValidationError::new(
                    format!("{}.name", prefix),
                    "Queue name cannot be empty",
                ));
            } else if !names.insert(queue.name.as_str()) {
                result.add_error(ValidationError::new(
                    format!("{}.name", prefix),
                    format!("Duplicate queue name '{}'", queue.name),
                ));
            }

            if queue.topics.is_empty() {
                result.add_warning(ValidationWarning::new(
                    format!("{}.topics", prefix),
                    format!("Queue '{}' has no topics and will never receive jobs", queue.name),
                ));
            }

            for topic in &queue.topics {
                if let Err(e) = glob::Pattern::new(topic) {
                    result.add_error(ValidationError::new(
                        format!("{}.topics", prefix),
                        format!("Invalid topic pattern '{}': {}", topic, e),
                    ));
                }
            }

            if queue.max_parallel == 0 {
                result.add_error(ValidationError::new(
                    format!("{}.max_parallel", prefix),
                    "max_parallel must be greater than 0",
                ));
            }

            match queue.queue_type {
                QueueType::Ordered if queue.max_parallel > 1 => {
                    result.add_warning(ValidationWarning::new(
                        format!("{}.max_parallel", prefix),
                        "max_parallel is ignored for ordered queues",
                    ));
                }
                QueueType::Drop if queue.max_retries.is_some() || queue.retry_delay_ms.is_some() => {
                    result.add_warning(ValidationWarning::new(
                        prefix.clone(),
                        "Retry settings have no effect on a drop queue",
                    ));
                }
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
