use std::path::PathBuf;

use directories::ProjectDirs;
use passgate_core::Error;
use tracing::subscriber::set_global_default;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Registry};

/// `RUST_LOG` when set and valid, otherwise `default_directive`.
pub fn build_filter(default_directive: &str) -> Result<EnvFilter, Error> {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directive))
        .map_err(|e| Error::Config(format!("invalid log filter {}: {}", default_directive, e)))
}

/// Install the global subscriber: human-readable stderr plus a daily JSON log file.
///
/// Keep the returned guard alive for the whole program or buffered file output is lost.
pub fn init_subscriber(name: &str, default_directive: &str) -> Result<WorkerGuard, Error> {
    let filter = build_filter(default_directive)?;

    let file_appender = tracing_appender::rolling::daily(log_dir(), format!("{}.log", name));
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let subscriber = Registry::default()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr)
                .pretty(),
        )
        .with(fmt::layer().json().with_writer(file_writer));

    set_global_default(subscriber)
        .map_err(|e| Error::Other(format!("tracing subscriber already installed: {}", e)))?;
    LogTracer::init().map_err(|e| Error::Other(format!("failed to bridge log records: {}", e)))?;

    Ok(guard)
}

/// Daily log files live here, next to the store's data directory.
pub fn log_dir() -> PathBuf {
    ProjectDirs::from("com", "passgate", "passgate")
        .map(|d| d.data_local_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("logs"))
}
