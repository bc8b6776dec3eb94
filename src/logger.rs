use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{EnvFilter, Layer, Registry, fmt, prelude::*};

/// Where and how much to log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// An `EnvFilter` directive, e.g. `"info"` or `"kevoree_nodered=debug"`.
    pub log_level: String,
    /// Directory for the daily rolling log file. Stdout only when `None`.
    pub log_dir: Option<PathBuf>,
    pub log_file: String,
    /// Emit newline-delimited JSON instead of text to the file.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".into(),
            log_dir: None,
            log_file: "kevoree-nodered.log".into(),
            json: false,
        }
    }
}

/// Install the global subscriber: stdout plus an optional rolling file.
///
/// Keep the returned guard alive for as long as file logging should flush.
pub fn init_tracing(config: &LogConfig) -> Result<Option<WorkerGuard>> {
    let env_filter = EnvFilter::try_new(&config.log_level)
        .with_context(|| format!("invalid log level {:?}", config.log_level))?;

    let stdout_layer = fmt::layer().with_thread_names(true).boxed();

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("could not create log dir {}", dir.display()))?;
            let appender = RollingFileAppender::new(Rotation::DAILY, dir, &config.log_file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = if config.json {
                fmt::layer().json().with_writer(writer).with_target(true).boxed()
            } else {
                fmt::layer().with_writer(writer).with_ansi(false).boxed()
            };
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    Registry::default()
        .with(env_filter)
        .with(stdout_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_garbage_level() {
        let config = LogConfig {
            log_level: "kevoree_nodered=loud".into(),
            ..Default::default()
        };
        assert!(init_tracing(&config).is_err());
    }
}
