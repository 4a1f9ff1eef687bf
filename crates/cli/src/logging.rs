//! Tracing setup: stdout (text or JSON) plus an optional log file.

use mcbridge_config::AppConfig;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

pub struct LogOptions {
    pub verbose: bool,
    pub file: Option<PathBuf>,
    pub json: bool,
}

impl LogOptions {
    /// Command-line flags win; otherwise the `[logging]` section of a
    /// readable config file applies.
    pub fn resolve(
        config_path: Option<&Path>,
        verbose: bool,
        file: Option<PathBuf>,
        json: bool,
    ) -> Self {
        let logging = AppConfig::read(config_path)
            .map(|c| c.logging)
            .unwrap_or_default();
        Self {
            verbose,
            file: file.or(logging.file),
            json: json || logging.json,
        }
    }
}

pub fn init(options: &LogOptions) -> anyhow::Result<()> {
    let level = if options.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let stdout = if options.json {
        fmt::layer().json().with_target(false).boxed()
    } else {
        fmt::layer().with_target(false).boxed()
    };

    let file = match &options.file {
        Some(path) => {
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)?;
            }
            let handle = OpenOptions::new().create(true).append(true).open(path)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(handle))
                    .boxed(),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout)
        .with(file)
        .try_init()?;
    Ok(())
}
