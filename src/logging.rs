use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// `RUST_LOG` when set, `info` otherwise.
pub fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Errors only, whatever `RUST_LOG` says.
pub fn quiet_filter() -> EnvFilter {
    EnvFilter::new("error")
}

/// Compact stderr logging, filtered by `RUST_LOG`.
pub fn init_stderr() {
    init_stderr_with(env_filter());
}

pub fn init_stderr_with(filter: EnvFilter) {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

/// Stderr logging plus an append-only copy in `{log_dir}/{service}.log`, so
/// the log survives container recreation when `log_dir` is a host mount.
pub fn init_with_file(log_dir: &Path, service: &str) -> Result<()> {
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    let path = log_dir.join(format!("{service}.log"));
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let stderr = fmt::layer()
        .with_target(false)
        .compact()
        .with_writer(std::io::stderr)
        .with_filter(env_filter());
    let file = fmt::layer()
        .with_target(false)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .with_filter(env_filter());

    tracing_subscriber::registry()
        .with(stderr)
        .with(file)
        .try_init()
        .context("failed to install tracing subscriber")?;
    Ok(())
}
