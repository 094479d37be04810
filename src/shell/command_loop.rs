//! The console side of the shell: prompt, dispatch, wait, print, repeat.

use std::io::{self, Write};
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::console::{Line, LineSource};
use crate::shell::classifier::{diagnose, worker_lost, FailurePolicy};
use crate::shell::command::Command;
use crate::shell::dispatcher::{DispatchError, Dispatcher, PendingExchange};
use crate::shell::exchange::{Exchange, ExchangeStatus};
use crate::shell::progress::{ProgressIndicator, FRAME_INTERVAL};
use crate::shell::render::render;
use crate::shutdown::InterruptHandle;

pub const PROMPT: &str = ">>> ";

/// How often a pending exchange is polled while the indicator is animating.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopOptions {
    pub policy: FailurePolicy,
    /// Animate the waiting indicator while an exchange is pending.
    pub progress: bool,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopExit {
    /// Ctrl-C, Ctrl-D or end of input.
    UserAbort,
    /// A failure the policy treats as fatal.
    Fault,
}

pub struct CommandLoop<'a, L, W> {
    dispatcher: &'a Dispatcher,
    input: &'a mut L,
    out: &'a mut W,
    options: LoopOptions,
    interrupt: InterruptHandle,
}

impl<'a, L, W> CommandLoop<'a, L, W>
where
    L: LineSource,
    W: Write,
{
    pub fn new(
        dispatcher: &'a Dispatcher,
        input: &'a mut L,
        out: &'a mut W,
        options: LoopOptions,
        interrupt: InterruptHandle,
    ) -> Self {
        Self {
            dispatcher,
            input,
            out,
            options,
            interrupt,
        }
    }

    /// Run until the user aborts or a fatal failure occurs.
    ///
    /// Only one exchange is ever outstanding: the next prompt is shown after the previous
    /// exchange has settled and been printed.
    pub fn run(&mut self) -> io::Result<LoopExit> {
        loop {
            if self.interrupt.is_interrupted() {
                return self.abort();
            }

            let text = match self.input.read_line(PROMPT)? {
                Line::Text(text) => text,
                Line::Interrupted | Line::Eof => return self.abort(),
            };
            let Some(command) = Command::parse(&text) else {
                continue;
            };

            let pending = match self.dispatcher.submit(command) {
                Ok(pending) => pending,
                Err(err) => {
                    warn!(error = %err, "could not submit exchange");
                    writeln!(self.out, "Unexpected USB error: {}", err)?;
                    self.out.flush()?;
                    return Ok(LoopExit::Fault);
                }
            };

            let exchange = match self.await_exchange(pending)? {
                Ok(exchange) => exchange,
                Err(err) => {
                    warn!(error = %err, "exchange lost");
                    writeln!(self.out, "{}", worker_lost().message)?;
                    self.out.flush()?;
                    return Ok(LoopExit::Fault);
                }
            };

            if self.present(exchange)? {
                return Ok(LoopExit::Fault);
            }
        }
    }

    fn abort(&mut self) -> io::Result<LoopExit> {
        writeln!(self.out, "abort")?;
        self.out.flush()?;
        Ok(LoopExit::UserAbort)
    }

    fn await_exchange(
        &mut self,
        mut pending: PendingExchange,
    ) -> io::Result<Result<Exchange, DispatchError>> {
        if !self.options.progress {
            return Ok(pending.wait());
        }

        let mut indicator = ProgressIndicator::new();
        let mut last_frame = Instant::now();
        loop {
            match pending.try_complete() {
                Ok(None) => {}
                Ok(Some(exchange)) => {
                    indicator.clear(&mut *self.out)?;
                    return Ok(Ok(exchange));
                }
                Err(err) => {
                    indicator.clear(&mut *self.out)?;
                    return Ok(Err(err));
                }
            }
            if last_frame.elapsed() >= FRAME_INTERVAL {
                indicator.tick(&mut *self.out)?;
                last_frame = Instant::now();
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    /// Print the outcome. Returns `true` when the loop must stop.
    fn present(&mut self, exchange: Exchange) -> io::Result<bool> {
        debug!(exchange = exchange.id(), command = %exchange.command(), "presenting exchange");
        let status = exchange.into_status();

        if let Some(diagnosis) = diagnose(&status, self.options.policy) {
            writeln!(self.out, "{}", diagnosis.message)?;
            self.out.flush()?;
            return Ok(diagnosis.fatal);
        }

        if let ExchangeStatus::Succeeded(payload) = status {
            let text = render(payload.as_deref()).unwrap_or_default();
            self.out.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                self.out.write_all(b"\n")?;
            }
        }
        self.out.flush()?;
        Ok(false)
    }
}
