use crate::shell::command::Command;
use crate::transport::TransportError;

/// Lifecycle of one command/response cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeStatus {
    Pending,
    /// Completed. `None` when the command was write-only.
    Succeeded(Option<Vec<u8>>),
    TimedOut,
    Failed(TransportError),
}

impl ExchangeStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExchangeStatus::Pending)
    }
}

/// One submitted command and its outcome.
#[derive(Debug, Clone)]
pub struct Exchange {
    id: u64,
    command: Command,
    status: ExchangeStatus,
}

impl Exchange {
    pub fn new(id: u64, command: Command) -> Self {
        Self {
            id,
            command,
            status: ExchangeStatus::Pending,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn status(&self) -> &ExchangeStatus {
        &self.status
    }

    pub fn into_status(self) -> ExchangeStatus {
        self.status
    }

    /// Move from Pending to a terminal status. Settling twice is a no-op.
    pub fn settle(&mut self, status: ExchangeStatus) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exchange() -> Exchange {
        Exchange::new(1, Command::parse("*IDN?").unwrap())
    }

    #[test]
    fn starts_pending() {
        assert_eq!(exchange().status(), &ExchangeStatus::Pending);
    }

    #[test]
    fn settles_exactly_once() {
        let mut ex = exchange();
        assert!(ex.settle(ExchangeStatus::TimedOut));
        assert!(!ex.settle(ExchangeStatus::Succeeded(None)));
        assert_eq!(ex.status(), &ExchangeStatus::TimedOut);
    }

    #[test]
    fn cannot_settle_back_to_pending() {
        let mut ex = exchange();
        assert!(!ex.settle(ExchangeStatus::Pending));
        assert!(!ex.status().is_terminal());
    }
}
