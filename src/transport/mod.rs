//! Instrument transport: the seam between the shell and the USB stack.
//!
//! The shell only ever talks to a [`DeviceCatalog`] (to list and open instruments) and to the
//! boxed [`Instrument`] it hands back. The production implementation lives in [`usbtmc`];
//! tests substitute scripted doubles.

pub mod protocol;
pub mod usbtmc;

use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use usbtmc::UsbTmcCatalog;

/// How far a transport failure reaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorScope {
    /// The connection itself is unusable (device gone, I/O failure, access lost).
    Connection,
    /// Only the current transfer failed; the connection may still work.
    Exchange,
}

/// Errors raised by an instrument connection.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The transfer did not complete within the configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// USB-level failure reported by the host stack.
    #[error("{detail}")]
    Usb { detail: String, scope: ErrorScope },

    /// The instrument answered with a frame that does not follow USBTMC.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl TransportError {
    pub fn usb(detail: impl Into<String>, scope: ErrorScope) -> Self {
        TransportError::Usb {
            detail: detail.into(),
            scope,
        }
    }

    /// Scope of the failure. Timeouts and framing errors only affect one exchange.
    pub fn scope(&self) -> ErrorScope {
        match self {
            TransportError::Timeout => ErrorScope::Exchange,
            TransportError::Usb { scope, .. } => *scope,
            TransportError::Protocol(_) => ErrorScope::Exchange,
        }
    }
}

/// Product string of a listed device, or why it is missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProductLabel {
    Known(String),
    Missing,
    Unreadable,
}

impl fmt::Display for ProductLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProductLabel::Known(name) => write!(f, "{}", name),
            ProductLabel::Missing => write!(f, "<< No device info >>"),
            ProductLabel::Unreadable => write!(f, "<< Failed to fetch device info >>"),
        }
    }
}

/// Vendor/product identifier pair, rendered as `VVVV:PPPP`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UsbId {
    pub vendor: u16,
    pub product: u16,
}

impl fmt::Display for UsbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04X}:{:04X}", self.vendor, self.product)
    }
}

impl std::str::FromStr for UsbId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (vendor, product) = s
            .split_once(':')
            .ok_or_else(|| format!("expected VVVV:PPPP, got '{}'", s))?;
        let parse = |part: &str| {
            u16::from_str_radix(part, 16).map_err(|e| format!("invalid hex id '{}': {}", part, e))
        };
        Ok(UsbId {
            vendor: parse(vendor)?,
            product: parse(product)?,
        })
    }
}

/// Opaque handle for one attached instrument. Never mutated after listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHandle {
    pub bus: u8,
    pub address: u8,
    pub id: UsbId,
    pub product: ProductLabel,
}

impl fmt::Display for DeviceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.product, self.id)
    }
}

/// An open, exclusively owned command/response channel to an instrument.
pub trait Instrument: Send {
    fn write(&mut self, command: &str) -> Result<(), TransportError>;

    fn read(&mut self) -> Result<Vec<u8>, TransportError>;

    fn set_timeout(&mut self, timeout: Duration);

    fn close(&mut self) -> Result<(), TransportError>;
}

/// Source of attachable instruments.
pub trait DeviceCatalog {
    fn devices(&mut self) -> Result<Vec<DeviceHandle>, TransportError>;

    fn open(
        &mut self,
        device: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Box<dyn Instrument>, TransportError>;
}
