use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::Config;
use crate::session::SessionOptions;
use crate::shell::FailurePolicy;
use crate::transport::UsbId;

/// Interactive shell for USB Test & Measurement Class instruments.
#[derive(Debug, Parser)]
#[command(name = "tmcsh", version, about)]
pub struct Cli {
    /// Connect to the first device with this vendor:product id (hex, e.g. 0957:1796)
    #[arg(short, long, value_name = "VVVV:PPPP")]
    pub device: Option<UsbId>,

    /// Per-call transport timeout in seconds
    #[arg(short, long, value_name = "SECONDS", value_parser = clap::value_parser!(u32).range(1..))]
    pub timeout: Option<u32>,

    /// Number of dispatcher worker threads
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub workers: Option<u16>,

    /// Which transport errors end the session
    #[arg(long = "on-error", value_enum, value_name = "POLICY")]
    pub on_error: Option<FailurePolicy>,

    /// Don't animate the waiting indicator
    #[arg(long)]
    pub no_progress: bool,

    /// Read configuration from this file instead of the default location
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

impl Cli {
    /// Path of the config file to load.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(Config::config_path)
    }

    /// Merge flags over the loaded config. Flags win.
    ///
    /// The waiting indicator is only drawn when stdout is a terminal.
    pub fn session_options(&self, config: &Config, stdout_is_terminal: bool) -> SessionOptions {
        let session = &config.session;
        let timeout = self.timeout.unwrap_or(session.timeout_seconds);
        SessionOptions {
            timeout: Duration::from_secs(u64::from(timeout)),
            workers: self.workers.map(usize::from).unwrap_or(session.workers),
            policy: self.on_error.unwrap_or(session.on_transport_error),
            progress: stdout_is_terminal && session.progress && !self.no_progress,
            device: self.device,
        }
    }
}
