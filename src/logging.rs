use std::ffi::OsString;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::LoggingConfig;

/// Environment variable naming the log file; overrides `[logging] file`.
pub const LOG_ENV_VAR: &str = "TMCSH_LOG";

/// Initialize file-only tracing.
///
/// The console belongs to the instrument session, so nothing is logged unless `TMCSH_LOG` or
/// `[logging] file` names a path. `RUST_LOG` overrides the configured filter.
pub fn init_tracing(config: &LoggingConfig) {
    let from_env = std::env::var_os(LOG_ENV_VAR).map(PathBuf::from);
    let Some(base) = log_base_path(from_env, config.file.as_deref()) else {
        return;
    };

    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let path = unique_log_path(&base, timestamp, std::process::id());

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let Ok(file) = std::fs::File::create(&path) else {
        eprintln!("Warning: Failed to create log file: {}", path.display());
        return;
    };

    let file_layer = fmt::layer()
        .with_writer(file)
        .with_ansi(false)
        .with_target(true)
        .with_thread_names(true)
        .with_level(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();
}

/// Where to log, if anywhere. An empty environment value disables a configured file.
pub fn log_base_path(from_env: Option<PathBuf>, configured: Option<&Path>) -> Option<PathBuf> {
    match from_env {
        Some(path) if path.as_os_str().is_empty() => None,
        Some(path) => Some(path),
        None => configured.map(Path::to_path_buf),
    }
}

/// `{base}.{timestamp}.{pid}`, so concurrent shells never share a file.
pub fn unique_log_path(base: &Path, timestamp: u64, pid: u32) -> PathBuf {
    let mut name = OsString::from(base.as_os_str());
    name.push(format!(".{}.{}", timestamp, pid));
    PathBuf::from(name)
}
