//! Configuration validation.

use crate::error::ConfigError;
use crate::schema::{Config, StateBackend};

/// Concurrency above which a warning is reported.
const HIGH_CONCURRENCY: usize = 256;

const LOG_LEVELS: [&str; 6] = ["trace", "debug", "info", "warn", "error", "off"];

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

    /// The first error as a [`ConfigError`], if any.
    pub fn into_result(self) -> Result<Vec<ValidationWarning>, ConfigError> {
        match self.errors.into_iter().next() {
            Some(error) => Err(ConfigError::InvalidValue {
                field: error.path,
                message: error.message,
            }),
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

/// Configuration validator.
pub struct ConfigValidator;

impl ConfigValidator {
    /// Validate the configuration.
    pub fn validate(config: &Config) -> Result<ValidationResult, ConfigError> {
        let mut result = ValidationResult::default();

        Self::validate_agent(config, &mut result);
        Self::validate_orchestrator(config, &mut result);
        Self::validate_broker(config, &mut result);
        Self::validate_state(config, &mut result);
        Self::validate_logging(config, &mut result);

        Ok(result)
    }

    fn validate_agent(config: &Config, result: &mut ValidationResult) {
        let agent = &config.agent;
        if agent.heartbeat_interval_secs == 0 {
            result.add_error(ValidationError::new(
                "agent.heartbeat_interval_secs",
                "heartbeat_interval_secs must be greater than 0",
            ));
        }

        if agent.max_concurrent_tasks == 0 {
            result.add_error(ValidationError::new(
                "agent.max_concurrent_tasks",
                "max_concurrent_tasks must be greater than 0",
            ));
        } else if agent.max_concurrent_tasks > HIGH_CONCURRENCY {
            result.add_warning(ValidationWarning::new(
                "agent.max_concurrent_tasks",
                format!("max_concurrent_tasks is very high (>{HIGH_CONCURRENCY})"),
            ));
        }

        if agent.task_timeout_secs == Some(0) {
            result.add_error(ValidationError::new(
                "agent.task_timeout_secs",
                "task_timeout_secs must be greater than 0 when set",
            ));
        }
    }

    fn validate_orchestrator(config: &Config, result: &mut ValidationResult) {
        let orchestrator = &config.orchestrator;
        if orchestrator.id.trim().is_empty() {
            result.add_error(ValidationError::new(
                "orchestrator.id",
                "Orchestrator id cannot be empty",
            ));
        }

        if orchestrator.max_concurrency == 0 {
            result.add_error(ValidationError::new(
                "orchestrator.max_concurrency",
                "max_concurrency must be greater than 0",
            ));
        } else if orchestrator.max_concurrency > HIGH_CONCURRENCY {
            result.add_warning(ValidationWarning::new(
                "orchestrator.max_concurrency",
                format!("max_concurrency is very high (>{HIGH_CONCURRENCY})"),
            ));
        }

        if orchestrator.default_step_timeout_secs == Some(0) {
            result.add_error(ValidationError::new(
                "orchestrator.default_step_timeout_secs",
                "default_step_timeout_secs must be greater than 0 when set",
            ));
        }

        if let Some(retry) = &orchestrator.default_retry {
            if retry.max_attempts == 0 {
                result.add_error(ValidationError::new(
                    "orchestrator.default_retry.max_attempts",
                    "max_attempts counts the first attempt and must be at least 1",
                ));
            }
            if retry.backoff_multiplier < 1.0 {
                result.add_warning(ValidationWarning::new(
                    "orchestrator.default_retry.backoff_multiplier",
                    "backoff_multiplier below 1.0 is treated as 1.0",
                ));
            }
        }
    }

    fn validate_broker(config: &Config, result: &mut ValidationResult) {
        if config.broker.queue_warn_threshold == 0 {
            result.add_warning(ValidationWarning::new(
                "broker.queue_warn_threshold",
                "queue_warn_threshold of 0 warns on every queued message",
            ));
        }
    }

    fn validate_state(config: &Config, result: &mut ValidationResult) {
        let state = &config.state;
        if state.event_capacity == 0 {
            result.add_error(ValidationError::new(
                "state.event_capacity",
                "event_capacity must be greater than 0",
            ));
        }

        match state.backend {
            StateBackend::Memory => {
                if state.path.is_some() {
                    result.add_warning(ValidationWarning::new(
                        "state.path",
                        "path is ignored by the memory backend",
                    ));
                }
            }
            StateBackend::File => {
                if state.resolved_path().is_none() {
                    result.add_error(ValidationError::new(
                        "state.path",
                        "file backend needs a path and no default data directory exists",
                    ));
                } else if state.path.is_none() {
                    result.add_warning(ValidationWarning::new(
                        "state.path",
                        "File backend path not set, will use default location",
                    ));
                }
            }
        }
    }

    fn validate_logging(config: &Config, result: &mut ValidationResult) {
        let level = config.logging.level.trim();
        // Full filter directives ("agentweave=debug,info") are accepted as-is.
        let is_directive = level.contains('=') || level.contains(',');
        if !is_directive && !LOG_LEVELS.contains(&level.to_ascii_lowercase().as_str()) {
            result.add_error(ValidationError::new(
                "logging.level",
                format!("Unknown log level '{}', valid values: {:?}", level, LOG_LEVELS),
            ));
        }

        if let Some(dir) = &config.logging.directory {
            if dir.exists() && !dir.is_dir() {
                result.add_error(ValidationError::new(
                    "logging.directory",
                    format!("{} is not a directory", dir.display()),
                ));
            }
        }
    }
}

#[cfg(test)]
#[path = "validator_tests.rs"]
mod tests;
