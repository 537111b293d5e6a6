//! Runtime configuration
//!
//! Defaults can be overridden from a TOML file and then from environment
//! variables:
//!
//! | Variable                      | Field                    |
//! |-------------------------------|--------------------------|
//! | `EVALCORE_SWITCH_INTERVAL_US` | `switch_interval_us`     |
//! | `EVALCORE_FORCE_SWITCHING`    | `force_switching`        |
//! | `EVALCORE_PENDING_CALLS`      | `pending_calls_capacity` |
//! | `EVALCORE_COMPILE_THRESHOLD`  | `compile_threshold`      |
//! | `EVALCORE_TRACE`              | `vm.trace`               |

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::bytecode::vm::VmConfig;

/// Errors loading a configuration file
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// How long a context waits for the lock before requesting a drop
    pub switch_interval_us: u64,
    /// A context yielding on request waits until another context took the lock
    pub force_switching: bool,
    /// Capacity of the pending call queue
    pub pending_calls_capacity: usize,
    /// Invocations that interpret before the first compile attempt
    pub compile_threshold: u32,
    /// Interpreter limits and tracing
    pub vm: VmConfig,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            switch_interval_us: 5000,
            force_switching: true,
            pending_calls_capacity: 32,
            compile_threshold: 0,
            vm: VmConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Parse a TOML document; missing keys keep their defaults
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(s)?)
    }

    /// Load a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Apply `EVALCORE_*` environment overrides
    ///
    /// Unset or unparsable variables leave the field unchanged.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = var("EVALCORE_SWITCH_INTERVAL_US").and_then(|s| s.parse().ok()) {
            self.switch_interval_us = v;
        }
        if let Some(v) = var("EVALCORE_FORCE_SWITCHING").and_then(|s| parse_bool(&s)) {
            self.force_switching = v;
        }
        if let Some(v) = var("EVALCORE_PENDING_CALLS").and_then(|s| s.parse().ok()) {
            self.pending_calls_capacity = v;
        }
        if let Some(v) = var("EVALCORE_COMPILE_THRESHOLD").and_then(|s| s.parse().ok()) {
            self.compile_threshold = v;
        }
        if let Some(v) = var("EVALCORE_TRACE").and_then(|s| parse_bool(&s)) {
            self.vm.trace = v;
        }
        self
    }

    /// Switch interval as a duration (at least one microsecond)
    pub fn switch_interval(&self) -> Duration {
        Duration::from_micros(self.switch_interval_us.max(1))
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.switch_interval(), Duration::from_millis(5));
        assert!(config.force_switching);
        assert_eq!(config.compile_threshold, 0);
        assert_eq!(config.vm.max_call_depth, 1024);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            switch_interval_us = 250
            [vm]
            trace = true
            "#,
        )
        .expect("valid toml");
        assert_eq!(config.switch_interval_us, 250);
        assert!(config.vm.trace);
        assert_eq!(config.vm.max_value_stack, 65536);
        assert_eq!(config.pending_calls_capacity, 32);
    }

    #[test]
    fn test_invalid_toml() {
        let err = RuntimeConfig::from_toml_str("switch_interval_us = \"soon\"")
            .expect_err("type mismatch");
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = RuntimeConfig::from_file("/nonexistent/evalcore.toml").expect_err("no file");
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("EVALCORE_SWITCH_INTERVAL_US", "100"),
            ("EVALCORE_FORCE_SWITCHING", "off"),
            ("EVALCORE_COMPILE_THRESHOLD", "not-a-number"),
            ("EVALCORE_TRACE", "1"),
        ]
        .into_iter()
        .collect();
        let config =
            RuntimeConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.switch_interval_us, 100);
        assert!(!config.force_switching);
        assert_eq!(config.compile_threshold, 0);
        assert!(config.vm.trace);
    }
}
