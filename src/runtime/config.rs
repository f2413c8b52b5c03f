//! Runtime configuration read from the process environment.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Handler locator, e.g. `index.handler`.
pub const ENV_HANDLER: &str = "_HANDLER";
/// Directory holding the function code.
pub const ENV_TASK_ROOT: &str = "LAMBDA_TASK_ROOT";
/// `host:port` of the control endpoint.
pub const ENV_RUNTIME_API: &str = "AWS_LAMBDA_RUNTIME_API";
pub const ENV_FUNCTION_NAME: &str = "AWS_LAMBDA_FUNCTION_NAME";
pub const ENV_FUNCTION_VERSION: &str = "AWS_LAMBDA_FUNCTION_VERSION";
pub const ENV_MEMORY_SIZE: &str = "AWS_LAMBDA_FUNCTION_MEMORY_SIZE";
pub const ENV_LOG_GROUP_NAME: &str = "AWS_LAMBDA_LOG_GROUP_NAME";
pub const ENV_LOG_STREAM_NAME: &str = "AWS_LAMBDA_LOG_STREAM_NAME";

/// Optional: default for the context's drain flag.
pub const ENV_WAIT_FOR_DRAIN: &str = "LAMBDA_LOOP_CALLBACK_WAITS_FOR_EMPTY_EVENT_LOOP";
/// Optional: timeout for report posts on the control channel, in milliseconds.
pub const ENV_REQUEST_TIMEOUT_MS: &str = "LAMBDA_LOOP_REQUEST_TIMEOUT_MS";

/// Errors raised while resolving the configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is not set.
    #[error("Environment variable {0} not set")]
    Missing(&'static str),

    /// A key is set but cannot be parsed.
    #[error("Environment variable {key} has invalid value {value:?}")]
    Invalid { key: &'static str, value: String },
}

/// Immutable runtime configuration.
///
/// Loaded once at startup and passed by reference to every component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Handler locator string (`<module>.<function>`).
    pub handler: String,
    /// Root directory of the function code.
    pub task_root: PathBuf,
    /// Control endpoint address as `host:port`.
    pub runtime_api: String,
    pub function_name: String,
    pub function_version: String,
    /// Memory limit in megabytes.
    pub memory_limit_mb: u32,
    pub log_group_name: String,
    pub log_stream_name: String,
    /// Initial value of the drain flag handed to every context.
    pub callback_waits_for_empty_event_loop: bool,
    /// Timeout for report posts, if any. The long-poll fetch never times out.
    pub request_timeout: Option<Duration>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            handler: "index.handler".to_string(),
            task_root: PathBuf::from("/var/task"),
            runtime_api: "127.0.0.1:9001".to_string(),
            function_name: String::new(),
            function_version: "$LATEST".to_string(),
            memory_limit_mb: 128,
            log_group_name: String::new(),
            log_stream_name: String::new(),
            callback_waits_for_empty_event_loop: false,
            request_timeout: None,
        }
    }
}

impl Config {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the configuration from the process environment.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load the configuration from an arbitrary key lookup.
    ///
    /// Required keys are checked in a fixed order and the first missing one
    /// is reported.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let require = |key: &'static str| lookup(key).ok_or(ConfigError::Missing(key));

        let handler = require(ENV_HANDLER)?;
        let task_root = PathBuf::from(require(ENV_TASK_ROOT)?);
        let runtime_api = require(ENV_RUNTIME_API)?;
        let function_name = require(ENV_FUNCTION_NAME)?;
        let function_version = require(ENV_FUNCTION_VERSION)?;
        let memory = require(ENV_MEMORY_SIZE)?;
        let log_group_name = require(ENV_LOG_GROUP_NAME)?;
        let log_stream_name = require(ENV_LOG_STREAM_NAME)?;

        let memory_limit_mb = memory.trim().parse().map_err(|_| ConfigError::Invalid {
            key: ENV_MEMORY_SIZE,
            value: memory.clone(),
        })?;

        let callback_waits_for_empty_event_loop = match lookup(ENV_WAIT_FOR_DRAIN) {
            None => false,
            Some(value) => parse_flag(&value).ok_or(ConfigError::Invalid {
                key: ENV_WAIT_FOR_DRAIN,
                value,
            })?,
        };

        let request_timeout = match lookup(ENV_REQUEST_TIMEOUT_MS) {
            None => None,
            Some(value) => {
                let ms: u64 = value.trim().parse().map_err(|_| ConfigError::Invalid {
                    key: ENV_REQUEST_TIMEOUT_MS,
                    value: value.clone(),
                })?;
                Some(Duration::from_millis(ms))
            }
        };

        Ok(Self {
            handler,
            task_root,
            runtime_api,
            function_name,
            function_version,
            memory_limit_mb,
            log_group_name,
            log_stream_name,
            callback_waits_for_empty_event_loop,
            request_timeout,
        })
    }

    /// Set the handler locator.
    pub fn handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = handler.into();
        self
    }

    /// Set the task root.
    pub fn task_root(mut self, task_root: impl Into<PathBuf>) -> Self {
        self.task_root = task_root.into();
        self
    }

    /// Set the control endpoint address.
    pub fn runtime_api(mut self, addr: impl Into<String>) -> Self {
        self.runtime_api = addr.into();
        self
    }

    /// Set the function name and version.
    pub fn function(mut self, name: impl Into<String>, version: impl Into<String>) -> Self {
        self.function_name = name.into();
        self.function_version = version.into();
        self
    }

    /// Set the memory limit in megabytes.
    pub fn memory_limit_mb(mut self, mb: u32) -> Self {
        self.memory_limit_mb = mb;
        self
    }

    /// Set the log group and stream names.
    pub fn log(mut self, group: impl Into<String>, stream: impl Into<String>) -> Self {
        self.log_group_name = group.into();
        self.log_stream_name = stream.into();
        self
    }

    /// Set the default drain flag.
    pub fn callback_waits_for_empty_event_loop(mut self, wait: bool) -> Self {
        self.callback_waits_for_empty_event_loop = wait;
        self
    }

    /// Set the report post timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn full_env() -> HashMap<&'static str, String> {
        [
            (ENV_HANDLER, "index.handler"),
            (ENV_TASK_ROOT, "/var/task"),
            (ENV_RUNTIME_API, "127.0.0.1:9001"),
            (ENV_FUNCTION_NAME, "echo"),
            (ENV_FUNCTION_VERSION, "$LATEST"),
            (ENV_MEMORY_SIZE, "256"),
            (ENV_LOG_GROUP_NAME, "/aws/lambda/echo"),
            (ENV_LOG_STREAM_NAME, "2024/01/01/[$LATEST]abc"),
        ]
        .into_iter()
        .map(|(k, v)| (k, v.to_string()))
        .collect()
    }

    fn load(env: &HashMap<&'static str, String>) -> Result<Config, ConfigError> {
        Config::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn loads_all_required_keys() {
        let config = load(&full_env()).unwrap();
        assert_eq!(config.handler, "index.handler");
        assert_eq!(config.task_root, PathBuf::from("/var/task"));
        assert_eq!(config.runtime_api, "127.0.0.1:9001");
        assert_eq!(config.memory_limit_mb, 256);
        assert!(!config.callback_waits_for_empty_event_loop);
        assert_eq!(config.request_timeout, None);
    }

    #[test]
    fn names_first_missing_key() {
        let mut env = full_env();
        env.remove(ENV_FUNCTION_VERSION);
        env.remove(ENV_LOG_STREAM_NAME);
        assert_eq!(load(&env), Err(ConfigError::Missing(ENV_FUNCTION_VERSION)));
    }

    #[test]
    fn rejects_non_integer_memory() {
        let mut env = full_env();
        env.insert(ENV_MEMORY_SIZE, "lots".to_string());
        assert!(matches!(
            load(&env),
            Err(ConfigError::Invalid { key: ENV_MEMORY_SIZE, .. })
        ));
    }

    #[test]
    fn reads_optional_keys() {
        let mut env = full_env();
        env.insert(ENV_WAIT_FOR_DRAIN, "true".to_string());
        env.insert(ENV_REQUEST_TIMEOUT_MS, "1500".to_string());
        let config = load(&env).unwrap();
        assert!(config.callback_waits_for_empty_event_loop);
        assert_eq!(config.request_timeout, Some(Duration::from_millis(1500)));
    }

    #[test]
    fn missing_key_message_names_variable() {
        let err = ConfigError::Missing(ENV_RUNTIME_API);
        assert_eq!(
            err.to_string(),
            "Environment variable AWS_LAMBDA_RUNTIME_API not set"
        );
    }
}
