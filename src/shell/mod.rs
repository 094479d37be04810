//! Asynchronous command/response engine.

pub mod classifier;
pub mod command;
pub mod command_loop;
pub mod dispatcher;
pub mod exchange;
pub mod progress;
pub mod render;

pub use classifier::{Diagnosis, FailurePolicy};
pub use command::Command;
pub use command_loop::{CommandLoop, LoopExit, LoopOptions, PROMPT};
pub use dispatcher::{DispatchError, Dispatcher, PendingExchange};
pub use exchange::{Exchange, ExchangeStatus};
