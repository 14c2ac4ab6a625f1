// Runner configuration
//
// Per-deployment policy for option presentation and event delivery.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RunnerError};

/// Largest accepted `event_capacity`.
pub const MAX_EVENT_CAPACITY: usize = 1 << 16;

/// Dialogue runner configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Drop unavailable options before they reach the views
    pub hide_unavailable_options: bool,
    /// Present the chosen option's text as a line before resuming
    pub run_selected_option_as_line: bool,
    /// Node used when no start node is given explicitly
    pub start_node: String,
    /// Capacity of the runner event broadcast channel
    pub event_capacity: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            hide_unavailable_options: false,
            run_selected_option_as_line: false,
            start_node: "Start".to_string(),
            event_capacity: 100,
        }
    }
}

impl RunnerConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Hide or show unavailable options
    #[must_use]
    pub fn with_hide_unavailable_options(mut self, hide: bool) -> Self {
        self.hide_unavailable_options = hide;
        self
    }

    /// Present chosen options as lines
    #[must_use]
    pub fn with_run_selected_option_as_line(mut self, run: bool) -> Self {
        self.run_selected_option_as_line = run;
        self
    }

    /// Set the default start node
    #[must_use]
    pub fn with_start_node(mut self, node: impl Into<String>) -> Self {
        self.start_node = node.into();
        self
    }

    /// Load configuration from a TOML file
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_from_toml(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| RunnerError::Config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml_str(&content)
    }

    /// Load configuration from TOML string
    ///
    /// Accepts either a bare table or one nested under `[runner]`.
    ///
    /// # Errors
    /// Returns error if TOML cannot be parsed or the values are invalid
    pub fn from_toml_str(toml_content: &str) -> Result<Self> {
        let toml: toml::Value = toml::from_str(toml_content)
            .map_err(|e| RunnerError::Config(format!("Failed to parse TOML: {}", e)))?;

        let config_value = toml.get("runner").cloned().unwrap_or(toml);

        let config: Self = config_value.try_into().map_err(|e: toml::de::Error| {
            RunnerError::Config(format!("Failed to deserialize runner config: {}", e))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Check value ranges
    ///
    /// # Errors
    /// Returns error for an empty start node or a zero event capacity
    pub fn validate(&self) -> Result<()> {
        if self.start_node.trim().is_empty() {
            return Err(RunnerError::Config("start_node must not be empty".to_string()));
        }
        if self.event_capacity == 0 {
            return Err(RunnerError::Config("event_capacity must be at least 1".to_string()));
        }
        if self.event_capacity > MAX_EVENT_CAPACITY {
            return Err(RunnerError::Config(format!(
                "event_capacity must be at most {MAX_EVENT_CAPACITY}, got {}",
                self.event_capacity
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = RunnerConfig::default();
        assert!(!config.hide_unavailable_options);
        assert!(!config.run_selected_option_as_line);
        assert_eq!(config.start_node, "Start");
        assert_eq!(config.event_capacity, 100);
    }

    #[test]
    fn test_from_toml_runner_section() {
        let toml = r#"
            [runner]
            hide_unavailable_options = true
            start_node = "Intro"
        "#;

        let config = RunnerConfig::from_toml_str(toml).unwrap();
        assert!(config.hide_unavailable_options);
        assert_eq!(config.start_node, "Intro");
        // Missing keys fall back to defaults
        assert_eq!(config.event_capacity, 100);
    }

    #[test]
    fn test_from_toml_bare_table() {
        let config = RunnerConfig::from_toml_str("run_selected_option_as_line = true").unwrap();
        assert!(config.run_selected_option_as_line);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let result = RunnerConfig::from_toml_str("event_capacity = 0");
        assert!(matches!(result, Err(RunnerError::Config(_))));

        let result = RunnerConfig::from_toml_str("start_node = \"  \"");
        assert!(matches!(result, Err(RunnerError::Config(_))));
    }

    #[test]
    fn test_oversized_event_capacity_rejected() {
        let result = RunnerConfig::from_toml_str("event_capacity = 9223372036854775807");
        assert!(matches!(result, Err(RunnerError::Config(message)) if message.contains("at most")));

        let config = RunnerConfig::from_toml_str(&format!("event_capacity = {MAX_EVENT_CAPACITY}")).unwrap();
        assert_eq!(config.event_capacity, MAX_EVENT_CAPACITY);
    }

    #[test]
    fn test_malformed_toml() {
        let result = RunnerConfig::from_toml_str("this is = = not toml");
        assert!(matches!(result, Err(RunnerError::Config(_))));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[runner]\nstart_node = \"Garden\"").unwrap();

        let config = RunnerConfig::load_from_toml(file.path()).unwrap();
        assert_eq!(config.start_node, "Garden");
    }

    #[test]
    fn test_builder_methods() {
        let config = RunnerConfig::new()
            .with_hide_unavailable_options(true)
            .with_run_selected_option_as_line(true)
            .with_start_node("Shop");
        assert!(config.hide_unavailable_options);
        assert!(config.run_selected_option_as_line);
        assert_eq!(config.start_node, "Shop");
    }
}
