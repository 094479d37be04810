//! Session lifecycle: select, connect, run the command loop, close.

pub mod chooser;

use std::io::{self, Write};
use std::time::Duration;
use tracing::{info, warn};

use crate::console::LineSource;
use crate::shell::{CommandLoop, Dispatcher, FailurePolicy, LoopExit, LoopOptions};
use crate::shutdown::InterruptHandle;
use crate::transport::{DeviceCatalog, DeviceHandle, ErrorScope, TransportError, UsbId};

pub use chooser::choose_device;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NoDevice,
    Connecting,
    Open,
    Closing,
    Closed,
    Aborted,
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// The user ended the loop and the connection closed cleanly.
    Closed,
    /// The connection was closed after a fatal failure (in the loop or while closing).
    ClosedAfterFault,
    /// No device was selected or the connection could not be opened.
    Aborted,
}

impl SessionOutcome {
    pub fn exit_code(self) -> u8 {
        match self {
            SessionOutcome::Closed => 0,
            SessionOutcome::ClosedAfterFault | SessionOutcome::Aborted => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionOptions {
    /// Per-call transport timeout.
    pub timeout: Duration,
    /// Dispatcher pool size.
    pub workers: usize,
    pub policy: FailurePolicy,
    pub progress: bool,
    /// Skip the chooser and connect to the first device with this id.
    pub device: Option<UsbId>,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            workers: 1,
            policy: FailurePolicy::Auto,
            progress: false,
            device: None,
        }
    }
}

pub struct Session<'a, C: ?Sized, L, W> {
    catalog: &'a mut C,
    input: &'a mut L,
    out: &'a mut W,
    options: SessionOptions,
    interrupt: InterruptHandle,
    state: SessionState,
}

impl<'a, C, L, W> Session<'a, C, L, W>
where
    C: DeviceCatalog + ?Sized,
    L: LineSource,
    W: Write,
{
    pub fn new(
        catalog: &'a mut C,
        input: &'a mut L,
        out: &'a mut W,
        options: SessionOptions,
        interrupt: InterruptHandle,
    ) -> Self {
        Self {
            catalog,
            input,
            out,
            options,
            interrupt,
            state: SessionState::NoDevice,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn run(&mut self) -> io::Result<SessionOutcome> {
        let Some(device) = self.select_device()? else {
            return Ok(self.abort());
        };

        self.transition(SessionState::Connecting);
        writeln!(self.out, "Establish connection...")?;
        self.out.flush()?;
        let mut instrument = match self.catalog.open(&device, self.options.timeout) {
            Ok(instrument) => instrument,
            Err(err) => {
                warn!(device = %device, error = %err, "open failed");
                writeln!(
                    self.out,
                    "Failed to establish connection with TMC device: {}",
                    err
                )?;
                return Ok(self.abort());
            }
        };
        instrument.set_timeout(self.options.timeout);

        let mut dispatcher = match Dispatcher::start(instrument, self.options.workers) {
            Ok(dispatcher) => dispatcher,
            Err(err) => {
                writeln!(
                    self.out,
                    "Failed to establish connection with TMC device: {}",
                    err
                )?;
                return Ok(self.abort());
            }
        };
        self.transition(SessionState::Open);

        let loop_options = LoopOptions {
            policy: self.options.policy,
            progress: self.options.progress,
        };
        let exit = CommandLoop::new(
            &dispatcher,
            &mut *self.input,
            &mut *self.out,
            loop_options,
            self.interrupt.clone(),
        )
        .run();

        // Close even if the console failed; report the console error afterwards.
        self.transition(SessionState::Closing);
        let notice = writeln!(self.out, "Closing...").and_then(|()| self.out.flush());
        let closed = match dispatcher.shutdown() {
            Some(mut instrument) => instrument.close(),
            None => Err(TransportError::usb(
                "connection was not returned by the dispatcher",
                ErrorScope::Connection,
            )),
        };
        self.transition(SessionState::Closed);

        let exit = exit?;
        notice?;
        if let Err(err) = closed {
            warn!(error = %err, "close failed");
            writeln!(self.out, "Failed to close connection: {}", err)?;
            self.out.flush()?;
            return Ok(SessionOutcome::ClosedAfterFault);
        }

        Ok(match exit {
            LoopExit::UserAbort => SessionOutcome::Closed,
            LoopExit::Fault => SessionOutcome::ClosedAfterFault,
        })
    }

    fn select_device(&mut self) -> io::Result<Option<DeviceHandle>> {
        let Some(wanted) = self.options.device else {
            return choose_device(&mut *self.catalog, &mut *self.input, &mut *self.out);
        };

        let found = match self.catalog.devices() {
            Ok(devices) => devices.into_iter().find(|device| device.id == wanted),
            Err(err) => {
                writeln!(self.out, "Failed to enumerate USB-TMC devices: {}", err)?;
                None
            }
        };
        if found.is_none() {
            writeln!(self.out, "No USB-TMC device matches {}", wanted)?;
            self.out.flush()?;
        }
        Ok(found)
    }

    fn abort(&mut self) -> SessionOutcome {
        self.transition(SessionState::Aborted);
        SessionOutcome::Aborted
    }

    fn transition(&mut self, next: SessionState) {
        info!(from = ?self.state, to = ?next, "session state");
        self.state = next;
    }
}
