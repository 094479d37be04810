use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::shell::FailurePolicy;

/// Root configuration container.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Defaults for every shell session; command-line flags take precedence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Per-call transport timeout in seconds (default: 5).
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,
    /// Number of dispatcher worker threads (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Animate the waiting indicator on a terminal (default: true).
    #[serde(default = "default_progress")]
    pub progress: bool,
    /// Which transport errors end the session.
    #[serde(default)]
    pub on_transport_error: FailurePolicy,
}

fn default_timeout_seconds() -> u32 {
    5
}

fn default_workers() -> usize {
    1
}

fn default_progress() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: default_timeout_seconds(),
            workers: default_workers(),
            progress: default_progress(),
            on_transport_error: FailurePolicy::default(),
        }
    }
}

/// Diagnostic log settings. Logging stays off unless a file is named.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Base path of the log file; `TMCSH_LOG` takes precedence.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// `EnvFilter` directives; `RUST_LOG` takes precedence (default: "info").
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file: None,
            filter: default_log_filter(),
        }
    }
}
