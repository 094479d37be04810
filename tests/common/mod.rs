//! Shared test utilities and mock infrastructure.

#![allow(dead_code, unused_imports)]

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tmcsh::console::{Line, LineSource};
use tmcsh::shutdown::InterruptHandle;
use tmcsh::transport::{
    DeviceCatalog, DeviceHandle, ErrorScope, Instrument, ProductLabel, TransportError, UsbId,
};

/// Everything a mock instrument was asked to do, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    Write(String),
    Read,
    SetTimeout(Duration),
    Close,
}

pub type OpLog = Arc<Mutex<Vec<Op>>>;

/// Scripted instrument. Unscripted writes succeed; unscripted reads time out.
#[derive(Default)]
pub struct MockInstrument {
    writes: VecDeque<Result<(), TransportError>>,
    reads: VecDeque<Result<Vec<u8>, TransportError>>,
    read_delay: Duration,
    panic_on: Option<String>,
    close_error: Option<TransportError>,
    log: OpLog,
}

impl MockInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(mut self, payload: &[u8]) -> Self {
        self.reads.push_back(Ok(payload.to_vec()));
        self
    }

    pub fn fail_read(mut self, err: TransportError) -> Self {
        self.reads.push_back(Err(err));
        self
    }

    pub fn then_write(mut self, result: Result<(), TransportError>) -> Self {
        self.writes.push_back(result);
        self
    }

    pub fn read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn panic_on(mut self, command: &str) -> Self {
        self.panic_on = Some(command.to_string());
        self
    }

    pub fn fail_close(mut self, err: TransportError) -> Self {
        self.close_error = Some(err);
        self
    }

    pub fn log(&self) -> OpLog {
        Arc::clone(&self.log)
    }

    pub fn boxed(self) -> Box<dyn Instrument> {
        Box::new(self)
    }
}

impl Instrument for MockInstrument {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        self.log.lock().push(Op::Write(command.to_string()));
        if self.panic_on.as_deref() == Some(command) {
            panic!("mock transport exploded on {}", command);
        }
        self.writes.pop_front().unwrap_or(Ok(()))
    }

    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        self.log.lock().push(Op::Read);
        if !self.read_delay.is_zero() {
            thread::sleep(self.read_delay);
        }
        self.reads.pop_front().unwrap_or(Err(TransportError::Timeout))
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.log.lock().push(Op::SetTimeout(timeout));
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.log.lock().push(Op::Close);
        match self.close_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Line source fed from a fixed script. Runs dry as end of input.
pub struct ScriptedLines {
    lines: VecDeque<Line>,
    prompts: Vec<String>,
    interrupt_after: Option<(usize, InterruptHandle)>,
    served: usize,
}

impl ScriptedLines {
    pub fn new(lines: &[&str]) -> Self {
        Self::from_lines(lines.iter().map(|l| Line::Text(l.to_string())).collect())
    }

    pub fn from_lines(lines: Vec<Line>) -> Self {
        Self {
            lines: lines.into(),
            prompts: Vec::new(),
            interrupt_after: None,
            served: 0,
        }
    }

    /// Raise the interrupt flag once `count` lines have been handed out.
    pub fn interrupt_after(mut self, count: usize, handle: InterruptHandle) -> Self {
        self.interrupt_after = Some((count, handle));
        self
    }

    pub fn prompts(&self) -> &[String] {
        &self.prompts
    }
}

impl LineSource for ScriptedLines {
    fn read_line(&mut self, prompt: &str) -> io::Result<Line> {
        self.prompts.push(prompt.to_string());
        let line = self.lines.pop_front().unwrap_or(Line::Eof);
        self.served += 1;
        if let Some((count, handle)) = &self.interrupt_after {
            if self.served >= *count {
                handle.trigger();
            }
        }
        Ok(line)
    }
}

pub fn device(bus: u8, address: u8, name: &str, vendor: u16, product: u16) -> DeviceHandle {
    DeviceHandle {
        bus,
        address,
        id: UsbId { vendor, product },
        product: ProductLabel::Known(name.to_string()),
    }
}

/// Catalog over a fixed device list. Each `open` consumes the next scripted instrument.
#[derive(Default)]
pub struct MockCatalog {
    pub devices: Vec<DeviceHandle>,
    instruments: VecDeque<Result<MockInstrument, TransportError>>,
    enumerate_error: Option<TransportError>,
    pub listings: usize,
    pub opened: Vec<(DeviceHandle, Duration)>,
}

impl MockCatalog {
    pub fn new(devices: Vec<DeviceHandle>) -> Self {
        Self {
            devices,
            ..Self::default()
        }
    }

    pub fn with_instrument(mut self, instrument: MockInstrument) -> Self {
        self.instruments.push_back(Ok(instrument));
        self
    }

    pub fn failing_open(mut self, err: TransportError) -> Self {
        self.instruments.push_back(Err(err));
        self
    }

    /// The first listing fails; later ones succeed.
    pub fn failing_enumeration(mut self, err: TransportError) -> Self {
        self.enumerate_error = Some(err);
        self
    }
}

impl DeviceCatalog for MockCatalog {
    fn devices(&mut self) -> Result<Vec<DeviceHandle>, TransportError> {
        self.listings += 1;
        if let Some(err) = self.enumerate_error.take() {
            return Err(err);
        }
        Ok(self.devices.clone())
    }

    fn open(
        &mut self,
        device: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Box<dyn Instrument>, TransportError> {
        self.opened.push((device.clone(), timeout));
        match self.instruments.pop_front() {
            Some(Ok(instrument)) => Ok(instrument.boxed()),
            Some(Err(err)) => Err(err),
            None => Err(TransportError::usb("No such device", ErrorScope::Connection)),
        }
    }
}

pub fn output(buffer: &[u8]) -> String {
    String::from_utf8_lossy(buffer).into_owned()
}
