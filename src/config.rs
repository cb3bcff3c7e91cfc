use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::core::{PlatformError, Result};

pub const ENV_DATA_DIR: &str = "SCHEMAFLOW_DATA_DIR";
pub const ENV_ADDR: &str = "SCHEMAFLOW_ADDR";
pub const ENV_RETRY_BACKOFF_MS: &str = "SCHEMAFLOW_RETRY_BACKOFF_MS";
pub const ENV_MAX_WORKFLOW_DEPTH: &str = "SCHEMAFLOW_MAX_WORKFLOW_DEPTH";
pub const ENV_ALLOW_DESTRUCTIVE: &str = "SCHEMAFLOW_ALLOW_DESTRUCTIVE";

/// Platform configuration
#[derive(Debug, Clone)]
pub struct PlatformConfig {
    /// Directory for the model registry and history journals. `None` keeps
    /// everything in memory.
    pub data_dir: Option<PathBuf>,

    /// HTTP listen address
    pub bind_addr: SocketAddr,

    /// First delay between `Retry:N` attempts, doubled per retry
    pub retry_backoff: Duration,

    /// Upper bound for the retry delay
    pub max_retry_backoff: Duration,

    /// Sub-workflow nesting limit
    pub max_workflow_depth: usize,

    /// Whether regeneration may drop models or fields
    pub allow_destructive_migrations: bool,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3030)),
            retry_backoff: Duration::ZERO,
            max_retry_backoff: Duration::from_secs(5),
            max_workflow_depth: 8,
            allow_destructive_migrations: true,
        }
    }
}

impl PlatformConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist declarations and history under `dir`
    pub fn data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(dir.into());
        self
    }

    pub fn bind_addr(mut self, addr: SocketAddr) -> Self {
        self.bind_addr = addr;
        self
    }

    pub fn retry_backoff(mut self, backoff: Duration) -> Self {
        self.retry_backoff = backoff;
        self
    }

    pub fn max_retry_backoff(mut self, max: Duration) -> Self {
        self.max_retry_backoff = max;
        self
    }

    pub fn max_workflow_depth(mut self, depth: usize) -> Self {
        self.max_workflow_depth = depth;
        self
    }

    pub fn allow_destructive_migrations(mut self, allow: bool) -> Self {
        self.allow_destructive_migrations = allow;
        self
    }

    /// Defaults overridden by `SCHEMAFLOW_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`PlatformConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |name: &str| lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        if let Some(dir) = get(ENV_DATA_DIR) {
            config.data_dir = Some(PathBuf::from(dir));
        }
        if let Some(addr) = get(ENV_ADDR) {
            config.bind_addr = parse_var(ENV_ADDR, &addr)?;
        }
        if let Some(ms) = get(ENV_RETRY_BACKOFF_MS) {
            config.retry_backoff = Duration::from_millis(parse_var(ENV_RETRY_BACKOFF_MS, &ms)?);
        }
        if let Some(depth) = get(ENV_MAX_WORKFLOW_DEPTH) {
            config.max_workflow_depth = parse_var(ENV_MAX_WORKFLOW_DEPTH, &depth)?;
        }
        if let Some(flag) = get(ENV_ALLOW_DESTRUCTIVE) {
            config.allow_destructive_migrations = parse_flag(ENV_ALLOW_DESTRUCTIVE, &flag)?;
        }
        Ok(config)
    }
}

fn parse_var<T>(name: &str, raw: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.parse::<T>()
        .map_err(|err| PlatformError::Internal(format!("invalid {} '{}': {}", name, raw, err)))
}

fn parse_flag(name: &str, raw: &str) -> Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(PlatformError::Internal(format!(
            "invalid {} '{}': expected true or false",
            name, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults_without_variables() {
        let config = PlatformConfig::from_lookup(lookup(&[])).unwrap();
        assert!(config.data_dir.is_none());
        assert_eq!(config.bind_addr.port(), 3030);
        assert_eq!(config.max_workflow_depth, 8);
        assert!(config.allow_destructive_migrations);
    }

    #[test]
    fn test_variables_override_defaults() {
        let config = PlatformConfig::from_lookup(lookup(&[
            (ENV_DATA_DIR, "/tmp/flow"),
            (ENV_ADDR, "0.0.0.0:8080"),
            (ENV_RETRY_BACKOFF_MS, "25"),
            (ENV_ALLOW_DESTRUCTIVE, "off"),
        ]))
        .unwrap();
        assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/flow")));
        assert_eq!(config.bind_addr.port(), 8080);
        assert_eq!(config.retry_backoff, Duration::from_millis(25));
        assert!(!config.allow_destructive_migrations);
    }

    #[test]
    fn test_invalid_value_names_the_variable() {
        let err = PlatformConfig::from_lookup(lookup(&[(ENV_MAX_WORKFLOW_DEPTH, "deep")])).unwrap_err();
        assert_eq!(err.reason(), "internal_error");
        assert!(err.to_string().contains(ENV_MAX_WORKFLOW_DEPTH));
    }
}
