//! Scheduler and pool settings.
//!
//! Both structs deserialize from JSON with every field optional and can be
//! overridden from `DISPATCH_*` environment variables.

use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::task::Priority;
use crate::traits::DispatchError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Queue wait after which a task moves one priority step up.
    pub starvation_threshold_ms: u64,
    /// Priority for tasks submitted without one.
    pub default_priority: Priority,
    /// Extra attempts on other backends after an execution failure. Only
    /// used when nothing has been streamed to the caller yet.
    pub retry_limit: usize,
    /// Capacity of each task's chunk channel.
    pub chunk_buffer: usize,
    /// Longest wait for the next chunk of a running task.
    pub execution_timeout_ms: Option<u64>,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            starvation_threshold_ms: 10_000,
            default_priority: Priority::DEFAULT,
            retry_limit: 0,
            chunk_buffer: 32,
            execution_timeout_ms: None,
        }
    }
}

impl SchedulerConfig {
    pub fn starvation_threshold(&self) -> Duration {
        Duration::from_millis(self.starvation_threshold_ms)
    }

    pub fn execution_timeout(&self) -> Option<Duration> {
        self.execution_timeout_ms.map(Duration::from_millis)
    }

    /// Defaults overridden by `DISPATCH_STARVATION_MS`,
    /// `DISPATCH_DEFAULT_PRIORITY`, `DISPATCH_RETRY_LIMIT`,
    /// `DISPATCH_CHUNK_BUFFER` and `DISPATCH_EXECUTION_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, DispatchError> {
        let mut config = Self::default();
        if let Some(ms) = env_parse("DISPATCH_STARVATION_MS")? {
            config.starvation_threshold_ms = ms;
        }
        if let Some(p) = env_parse::<u8>("DISPATCH_DEFAULT_PRIORITY")? {
            config.default_priority = Priority::new(p);
        }
        if let Some(n) = env_parse("DISPATCH_RETRY_LIMIT")? {
            config.retry_limit = n;
        }
        if let Some(n) = env_parse::<usize>("DISPATCH_CHUNK_BUFFER")? {
            config.chunk_buffer = n.max(1);
        }
        if let Some(ms) = env_parse("DISPATCH_EXECUTION_TIMEOUT_MS")? {
            config.execution_timeout_ms = Some(ms);
        }
        Ok(config)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Deadline for a backend to list its models.
    pub list_models_timeout_ms: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            list_models_timeout_ms: 5_000,
        }
    }
}

impl PoolConfig {
    pub fn list_models_timeout(&self) -> Duration {
        Duration::from_millis(self.list_models_timeout_ms)
    }

    /// Defaults overridden by `DISPATCH_LIST_TIMEOUT_MS`.
    pub fn from_env() -> Result<Self, DispatchError> {
        let mut config = Self::default();
        if let Some(ms) = env_parse("DISPATCH_LIST_TIMEOUT_MS")? {
            config.list_models_timeout_ms = ms;
        }
        Ok(config)
    }
}

fn env_parse<T>(key: &str) -> Result<Option<T>, DispatchError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| DispatchError::Config(format!("{key}={raw}: {e}"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{"retry_limit": 2, "execution_timeout_ms": 1500}"#).unwrap();
        assert_eq!(config.retry_limit, 2);
        assert_eq!(config.execution_timeout(), Some(Duration::from_millis(1500)));
        assert_eq!(config.starvation_threshold(), Duration::from_secs(10));
        assert_eq!(config.default_priority, Priority::DEFAULT);
    }

    #[test]
    fn out_of_range_priority_is_clamped() {
        let config: SchedulerConfig = serde_json::from_str(r#"{"default_priority": 42}"#).unwrap();
        assert_eq!(config.default_priority, Priority::LOWEST);
        let config: SchedulerConfig = serde_json::from_str(r#"{"default_priority": 1}"#).unwrap();
        assert_eq!(config.default_priority, Priority::new(1));
    }

    #[test]
    fn pool_defaults_to_five_seconds() {
        assert_eq!(
            PoolConfig::default().list_models_timeout(),
            Duration::from_secs(5)
        );
    }

    #[test]
    fn env_overrides_and_rejects_garbage() {
        std::env::set_var("DISPATCH_LIST_TIMEOUT_MS", "250");
        assert_eq!(
            PoolConfig::from_env().unwrap().list_models_timeout(),
            Duration::from_millis(250)
        );
        std::env::set_var("DISPATCH_LIST_TIMEOUT_MS", "soon");
        assert!(matches!(
            PoolConfig::from_env(),
            Err(DispatchError::Config(_))
        ));
        std::env::remove_var("DISPATCH_LIST_TIMEOUT_MS");
    }
}
