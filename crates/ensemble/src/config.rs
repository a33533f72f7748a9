//! # Runtime Configuration
//!
//! TOML configuration for directors, receivers and logging. Every field has a
//! default, so an empty document is a valid configuration:
//!
//! ```toml
//! [director]
//! mode = "process"            # or "sequential"
//! max_iterations = 100
//! fire_timeout_ms = 10000
//! on_processing_error = "continue"   # or "exclude"
//! event_buffer = 256
//!
//! [receiver]
//! capacity = 16               # omit for unbounded
//! overflow = "block"          # or "reject"
//!
//! [logging]
//! level = "info"
//! output = "stdout"           # or "file"
//! file_path = "logs/ensemble.log"
//! ```

use crate::errors::ConfigError;
use crate::receiver::ReceiverPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    pub director: DirectorConfig,
    pub receiver: ReceiverPolicy,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DirectorMode {
    /// One task per actor.
    #[default]
    Process,
    /// Round robin on the calling task.
    Sequential,
}

impl FromStr for DirectorMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "process" => Ok(DirectorMode::Process),
            "sequential" => Ok(DirectorMode::Sequential),
            other => Err(ConfigError::Invalid(format!("unknown director mode '{}'", other))),
        }
    }
}

/// What the director does with an actor after a non-fatal processing error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorPolicy {
    /// Log it, abandon the iteration and keep scheduling the actor.
    #[default]
    Continue,
    /// Log it and stop scheduling the actor; siblings keep running.
    Exclude,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectorConfig {
    pub mode: DirectorMode,
    /// Firings per actor before it is considered complete.
    pub max_iterations: Option<u64>,
    /// Longest a single `fire` may stay blocked under the sequential director.
    pub fire_timeout_ms: u64,
    pub on_processing_error: ErrorPolicy,
    /// Capacity of the run event channel.
    pub event_buffer: usize,
}

impl Default for DirectorConfig {
    fn default() -> Self {
        Self {
            mode: DirectorMode::Process,
            max_iterations: None,
            fire_timeout_ms: 10_000,
            on_processing_error: ErrorPolicy::Continue,
            event_buffer: 256,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogOutput {
    #[default]
    Stdout,
    File,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub output: LogOutput,
    pub file_path: PathBuf,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: LogOutput::Stdout,
            file_path: PathBuf::from("logs/ensemble.log"),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receiver.capacity == Some(0) {
            return Err(ConfigError::Invalid(
                "receiver capacity must be greater than zero".to_string(),
            ));
        }
        if self.director.mode == DirectorMode::Sequential && self.receiver.suspends_producers() {
            return Err(ConfigError::Invalid(
                "the sequential director cannot block producers on bounded receivers; \
                 use overflow = \"reject\" or the process director"
                    .to_string(),
            ));
        }
        if self.director.event_buffer == 0 {
            return Err(ConfigError::Invalid(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        if self.director.fire_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fire_timeout_ms must be greater than zero".to_string(),
            ));
        }
        self.logging.level()?;
        Ok(())
    }
}

impl LoggingConfig {
    pub fn level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.level)
            .map_err(|_| ConfigError::Invalid(format!("unknown log level '{}'", self.level)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receiver::Overflow;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = RuntimeConfig::from_toml_str("").unwrap();
        assert_eq!(config, RuntimeConfig::default());
        assert_eq!(config.director.fire_timeout_ms, 10_000);
        assert_eq!(config.receiver.capacity, None);
    }

    #[test]
    fn test_full_document() {
        let config = RuntimeConfig::from_toml_str(
            r#"
            [director]
            mode = "sequential"
            max_iterations = 5
            on_processing_error = "exclude"

            [receiver]
            capacity = 4
            overflow = "reject"

            [logging]
            level = "debug"
            output = "file"
            file_path = "/tmp/run.log"
            "#,
        )
        .unwrap();

        assert_eq!(config.director.mode, DirectorMode::Sequential);
        assert_eq!(config.director.max_iterations, Some(5));
        assert_eq!(config.director.on_processing_error, ErrorPolicy::Exclude);
        assert_eq!(config.receiver.capacity, Some(4));
        assert_eq!(config.receiver.overflow, Overflow::Reject);
        assert_eq!(config.logging.output, LogOutput::File);
        assert_eq!(config.logging.level().unwrap(), tracing::Level::DEBUG);
    }

    #[test]
    fn test_validation_errors() {
        assert!(matches!(
            RuntimeConfig::from_toml_str("[receiver]\ncapacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("[logging]\nlevel = \"chatty\""),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            RuntimeConfig::from_toml_str("[director]\nmode = \"parallel\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_sequential_mode_rejects_blocking_bounded_receivers() {
        let blocking = "[director]\nmode = \"sequential\"\n\n[receiver]\ncapacity = 2";
        assert!(matches!(
            RuntimeConfig::from_toml_str(blocking),
            Err(ConfigError::Invalid(_))
        ));

        let rejecting = format!("{}\noverflow = \"reject\"", blocking);
        assert!(RuntimeConfig::from_toml_str(&rejecting).is_ok());
        assert!(RuntimeConfig::from_toml_str("[receiver]\ncapacity = 2").is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[director]\nevent_buffer = 8").unwrap();
        let config = RuntimeConfig::load(file.path()).unwrap();
        assert_eq!(config.director.event_buffer, 8);

        assert!(matches!(
            RuntimeConfig::load("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }

    #[test]
    fn test_mode_from_str() {
        assert_eq!("Sequential".parse::<DirectorMode>().unwrap(), DirectorMode::Sequential);
        assert!("x".parse::<DirectorMode>().is_err());
    }
}
