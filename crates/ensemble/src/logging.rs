use crate::config::{LogOutput, LoggingConfig};
use anyhow::Result;
use std::fs::{self, File};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber described by `config`.
///
/// Meant for binaries; the library itself never installs a subscriber.
pub fn setup_global_logging(config: &LoggingConfig) -> Result<()> {
    let level = config.level()?;
    let filter = format!("{},ensemble={}", level.as_str(), level.as_str());

    match config.output {
        LogOutput::Stdout => {
            let stdout_layer = fmt::layer()
                .with_writer(std::io::stdout)
                .with_target(true)
                .with_ansi(true)
                .with_filter(EnvFilter::builder().parse(&filter)?);

            tracing_subscriber::registry()
                .with(stdout_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        }
        LogOutput::File => {
            let log_path = &config.file_path;
            if let Some(parent) = log_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let file = File::create(log_path)?;

            let file_layer = fmt::layer()
                .with_writer(std::sync::Mutex::new(file))
                .with_thread_ids(true)
                .with_line_number(true)
                .with_file(true)
                .with_target(true)
                .with_ansi(false)
                .with_filter(EnvFilter::builder().parse(&filter)?);

            tracing_subscriber::registry()
                .with(file_layer)
                .try_init()
                .map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unknown_level() {
        let config = LoggingConfig {
            level: "loud".to_string(),
            ..LoggingConfig::default()
        };
        assert!(setup_global_logging(&config).is_err());
    }
}
