//! Maps transport failures to terminal statuses and console diagnostics.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::shell::exchange::ExchangeStatus;
use crate::transport::{ErrorScope, TransportError};

pub const TIMEOUT_MESSAGE: &str = "Response timed out. please check command syntax or connection.";

/// Whether a non-timeout transport failure ends the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Connection-level failures end the session, exchange-level ones do not.
    #[default]
    Auto,
    /// Every failure ends the session.
    Fatal,
    /// Keep prompting after any failure.
    Continue,
}

impl FailurePolicy {
    pub fn is_fatal(self, err: &TransportError) -> bool {
        match self {
            FailurePolicy::Auto => err.scope() == ErrorScope::Connection,
            FailurePolicy::Fatal => true,
            FailurePolicy::Continue => false,
        }
    }
}

/// What the console shows for a failed exchange, and whether the loop stops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnosis {
    pub message: String,
    pub fatal: bool,
}

/// Terminal status for a failure raised during an exchange.
pub fn classify(err: TransportError) -> ExchangeStatus {
    match err {
        TransportError::Timeout => ExchangeStatus::TimedOut,
        other => ExchangeStatus::Failed(other),
    }
}

/// Diagnostic line for a terminal status. `None` for successful or pending exchanges.
pub fn diagnose(status: &ExchangeStatus, policy: FailurePolicy) -> Option<Diagnosis> {
    match status {
        ExchangeStatus::Pending | ExchangeStatus::Succeeded(_) => None,
        ExchangeStatus::TimedOut => Some(Diagnosis {
            message: TIMEOUT_MESSAGE.to_string(),
            fatal: false,
        }),
        ExchangeStatus::Failed(err) => Some(Diagnosis {
            message: format!("Unexpected USB error: {}", err),
            fatal: policy.is_fatal(err),
        }),
    }
}

/// Diagnostic for a worker that vanished without settling its exchange.
pub fn worker_lost() -> Diagnosis {
    Diagnosis {
        message: "Unexpected USB error: worker terminated unexpectedly".to_string(),
        fatal: true,
    }
}
