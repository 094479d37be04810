//! USBTMC instruments over libusb (`rusb`).

use rusb::{Direction, GlobalContext, Recipient, RequestType, TransferType};
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::transport::protocol::{
    self, AbortProgress, AbortStart, MsgInHeader, TagSequence, CHECK_ABORT_BULK_IN_STATUS,
    HEADER_SIZE, INITIATE_ABORT_BULK_IN, MAX_TRANSFER_SIZE, USBTMC_CLASS_CODE,
    USBTMC_SUBCLASS_CODE,
};
use crate::transport::{
    DeviceCatalog, DeviceHandle, ErrorScope, Instrument, ProductLabel, TransportError, UsbId,
};

/// Lists and opens every attached device that exposes a USBTMC interface.
#[derive(Debug, Default)]
pub struct UsbTmcCatalog;

impl UsbTmcCatalog {
    pub fn new() -> Self {
        Self
    }
}

/// Location of the TMC interface and its bulk endpoints.
#[derive(Debug, Clone, Copy)]
struct TmcInterface {
    number: u8,
    setting: u8,
    bulk_in: u8,
    bulk_out: u8,
    max_packet_size: u16,
}

fn find_tmc_interface(
    device: &rusb::Device<GlobalContext>,
) -> Result<Option<TmcInterface>, rusb::Error> {
    let config = device
        .active_config_descriptor()
        .or_else(|_| device.config_descriptor(0))?;

    for interface in config.interfaces() {
        for setting in interface.descriptors() {
            if setting.class_code() != USBTMC_CLASS_CODE
                || setting.sub_class_code() != USBTMC_SUBCLASS_CODE
            {
                continue;
            }

            let mut bulk_in = None;
            let mut bulk_out = None;
            for endpoint in setting.endpoint_descriptors() {
                if endpoint.transfer_type() != TransferType::Bulk {
                    continue;
                }
                match endpoint.direction() {
                    Direction::In => {
                        bulk_in = Some((endpoint.address(), endpoint.max_packet_size()))
                    }
                    Direction::Out => bulk_out = Some(endpoint.address()),
                }
            }

            if let (Some((bulk_in, max_packet_size)), Some(bulk_out)) = (bulk_in, bulk_out) {
                return Ok(Some(TmcInterface {
                    number: setting.interface_number(),
                    setting: setting.setting_number(),
                    bulk_in,
                    bulk_out,
                    max_packet_size,
                }));
            }
        }
    }

    Ok(None)
}

fn read_product_label(
    device: &rusb::Device<GlobalContext>,
    descriptor: &rusb::DeviceDescriptor,
) -> ProductLabel {
    if descriptor.product_string_index().is_none() {
        return ProductLabel::Missing;
    }
    match device
        .open()
        .and_then(|handle| handle.read_product_string_ascii(descriptor))
    {
        Ok(name) if name.is_empty() => ProductLabel::Missing,
        Ok(name) => ProductLabel::Known(name),
        Err(err) => {
            debug!(error = %err, "product string unavailable");
            ProductLabel::Unreadable
        }
    }
}

impl DeviceCatalog for UsbTmcCatalog {
    fn devices(&mut self) -> Result<Vec<DeviceHandle>, TransportError> {
        let list = rusb::devices().map_err(map_usb_error)?;
        let mut found = Vec::new();

        for device in list.iter() {
            let Ok(descriptor) = device.device_descriptor() else {
                continue;
            };
            match find_tmc_interface(&device) {
                Ok(Some(_)) => {}
                Ok(None) => continue,
                Err(err) => {
                    debug!(error = %err, "skipping device without readable configuration");
                    continue;
                }
            }

            found.push(DeviceHandle {
                bus: device.bus_number(),
                address: device.address(),
                id: UsbId {
                    vendor: descriptor.vendor_id(),
                    product: descriptor.product_id(),
                },
                product: read_product_label(&device, &descriptor),
            });
        }

        debug!(count = found.len(), "enumerated USB-TMC devices");
        Ok(found)
    }

    fn open(
        &mut self,
        device: &DeviceHandle,
        timeout: Duration,
    ) -> Result<Box<dyn Instrument>, TransportError> {
        let list = rusb::devices().map_err(map_usb_error)?;
        let usb_device = list
            .iter()
            .find(|d| d.bus_number() == device.bus && d.address() == device.address)
            .ok_or_else(|| {
                TransportError::usb("device is no longer attached", ErrorScope::Connection)
            })?;
        let interface = find_tmc_interface(&usb_device)
            .map_err(map_usb_error)?
            .ok_or_else(|| {
                TransportError::usb("device has no USBTMC interface", ErrorScope::Connection)
            })?;

        let handle = usb_device.open().map_err(map_usb_error)?;
        // Kernel driver detaching is unsupported on some platforms.
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle
            .claim_interface(interface.number)
            .map_err(map_usb_error)?;
        if interface.setting != 0 {
            handle
                .set_alternate_setting(interface.number, interface.setting)
                .map_err(map_usb_error)?;
        }

        info!(
            device = %device,
            bus = device.bus,
            address = device.address,
            interface = interface.number,
            "opened USB-TMC connection"
        );

        Ok(Box::new(UsbTmcInstrument::claimed(handle, interface, timeout)))
    }
}

/// Polls of `CHECK_ABORT_BULK_IN_STATUS` before giving up on an abort.
const ABORT_STATUS_POLLS: usize = 20;
const ABORT_STATUS_INTERVAL: Duration = Duration::from_millis(10);
/// Bulk-IN reads per drain pass; a drain normally ends on the first short packet.
const DRAIN_READS: usize = 64;

/// Device-handle operations the USBTMC layer needs.
pub trait UsbPipe: Send {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize>;

    fn read_bulk(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> rusb::Result<usize>;

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize>;

    fn clear_halt(&self, endpoint: u8) -> rusb::Result<()>;

    fn release_interface(&self, interface: u8) -> rusb::Result<()>;
}

impl UsbPipe for rusb::DeviceHandle<GlobalContext> {
    fn write_bulk(&self, endpoint: u8, data: &[u8], timeout: Duration) -> rusb::Result<usize> {
        rusb::DeviceHandle::write_bulk(self, endpoint, data, timeout)
    }

    fn read_bulk(&self, endpoint: u8, buffer: &mut [u8], timeout: Duration) -> rusb::Result<usize> {
        rusb::DeviceHandle::read_bulk(self, endpoint, buffer, timeout)
    }

    fn read_control(
        &self,
        request_type: u8,
        request: u8,
        value: u16,
        index: u16,
        buffer: &mut [u8],
        timeout: Duration,
    ) -> rusb::Result<usize> {
        rusb::DeviceHandle::read_control(self, request_type, request, value, index, buffer, timeout)
    }

    fn clear_halt(&self, endpoint: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::clear_halt(self, endpoint)
    }

    fn release_interface(&self, interface: u8) -> rusb::Result<()> {
        rusb::DeviceHandle::release_interface(self, interface)
    }
}

pub struct UsbTmcInstrument<P = rusb::DeviceHandle<GlobalContext>> {
    pipe: P,
    interface: TmcInterface,
    tags: TagSequence,
    timeout: Duration,
    claimed: bool,
}

impl<P: UsbPipe> UsbTmcInstrument<P> {
    /// Wrap a pipe whose TMC interface has already been claimed.
    fn claimed(pipe: P, interface: TmcInterface, timeout: Duration) -> Self {
        Self {
            pipe,
            interface,
            tags: TagSequence::new(),
            timeout,
            claimed: true,
        }
    }

    fn read_buffer_len(&self) -> usize {
        let packet = usize::from(self.interface.max_packet_size.max(1));
        let wanted = HEADER_SIZE + MAX_TRANSFER_SIZE as usize + 3;
        wanted.div_ceil(packet) * packet
    }

    /// Map a failed bulk transfer, clearing the endpoint halt after a stall so the next
    /// exchange starts on a working pipe.
    fn bulk_error(&self, endpoint: u8, err: rusb::Error) -> TransportError {
        if err == rusb::Error::Pipe {
            match self.pipe.clear_halt(endpoint) {
                Ok(()) => debug!(endpoint, "cleared halt after stall"),
                Err(clear_err) => warn!(endpoint, error = %clear_err, "clear halt failed"),
            }
        }
        map_usb_error(err)
    }

    fn bulk_out(&self, data: &[u8]) -> Result<usize, TransportError> {
        let endpoint = self.interface.bulk_out;
        self.pipe
            .write_bulk(endpoint, data, self.timeout)
            .map_err(|err| self.bulk_error(endpoint, err))
    }

    fn bulk_in(&self, buffer: &mut [u8]) -> Result<usize, TransportError> {
        let endpoint = self.interface.bulk_in;
        self.pipe
            .read_bulk(endpoint, buffer, self.timeout)
            .map_err(|err| self.bulk_error(endpoint, err))
    }

    /// Read one `DEV_DEP_MSG_IN` transfer, appending its payload to `message`.
    fn read_transfer(
        &self,
        tag: u8,
        buffer: &mut [u8],
        message: &mut Vec<u8>,
    ) -> Result<MsgInHeader, TransportError> {
        let received = self.bulk_in(buffer)?;
        let header = protocol::decode_dev_dep_msg_in(tag, &buffer[..received])?;

        let wanted = header.transfer_size as usize;
        let first = (received - HEADER_SIZE).min(wanted);
        message.extend_from_slice(&buffer[HEADER_SIZE..HEADER_SIZE + first]);

        let mut remaining = wanted - first;
        while remaining > 0 {
            let received = self.bulk_in(buffer)?;
            if received == 0 {
                return Err(TransportError::Protocol(format!(
                    "bulk-in ended {} bytes short of the announced transfer size",
                    remaining
                )));
            }
            let take = received.min(remaining);
            message.extend_from_slice(&buffer[..take]);
            remaining -= take;
        }

        Ok(header)
    }

    fn abort_request(&self, request: u8, value: u16, reply: &mut [u8]) -> rusb::Result<usize> {
        let request_type = rusb::request_type(Direction::In, RequestType::Class, Recipient::Endpoint);
        self.pipe.read_control(
            request_type,
            request,
            value,
            u16::from(self.interface.bulk_in),
            reply,
            self.timeout,
        )
    }

    /// Cancel the bulk-IN transfer for `tag` and discard whatever the device already queued,
    /// so a late answer cannot be mistaken for the reply to the next query.
    ///
    /// Best effort: failures are logged, the caller still reports the original timeout.
    fn abort_bulk_in(&self, tag: u8) {
        let mut reply = [0u8; 2];
        let start = match self.abort_request(INITIATE_ABORT_BULK_IN, u16::from(tag), &mut reply) {
            Ok(len) => protocol::decode_initiate_abort(&reply[..len]),
            Err(err) => {
                warn!(error = %err, "bulk-in abort request failed");
                return;
            }
        };
        debug!(tag, ?start, "initiated bulk-in abort");

        match start {
            AbortStart::Started => {}
            AbortStart::NotInProgress | AbortStart::Failed(_) => {
                // The answer may already sit in the endpoint.
                self.drain_bulk_in();
                return;
            }
        }

        self.drain_bulk_in();
        for _ in 0..ABORT_STATUS_POLLS {
            let mut reply = [0u8; 8];
            let progress = match self.abort_request(CHECK_ABORT_BULK_IN_STATUS, 0, &mut reply) {
                Ok(len) => protocol::decode_check_abort(&reply[..len]),
                Err(err) => {
                    warn!(error = %err, "bulk-in abort status request failed");
                    return;
                }
            };
            match progress {
                AbortProgress::Done => {
                    debug!(tag, "bulk-in abort complete");
                    return;
                }
                AbortProgress::Pending { queued } => {
                    if queued {
                        self.drain_bulk_in();
                    }
                    thread::sleep(ABORT_STATUS_INTERVAL);
                }
                AbortProgress::Failed(status) => {
                    warn!(status, "device reported failed bulk-in abort");
                    return;
                }
            }
        }
        warn!(tag, "bulk-in abort still pending");
    }

    /// Read and discard bulk-IN data until a short packet or an empty endpoint.
    fn drain_bulk_in(&self) {
        let packet = usize::from(self.interface.max_packet_size.max(1));
        let mut buffer = vec![0u8; self.read_buffer_len()];
        for _ in 0..DRAIN_READS {
            match self.pipe.read_bulk(self.interface.bulk_in, &mut buffer, self.timeout) {
                Ok(received) => {
                    debug!(received, "discarded stale bulk-in data");
                    if received % packet != 0 || received == 0 {
                        return;
                    }
                }
                Err(rusb::Error::Timeout) => return,
                Err(err) => {
                    let _ = self.bulk_error(self.interface.bulk_in, err);
                    return;
                }
            }
        }
    }
}

impl<P: UsbPipe> Instrument for UsbTmcInstrument<P> {
    fn write(&mut self, command: &str) -> Result<(), TransportError> {
        let tag = self.tags.next_tag();
        let frame = protocol::encode_dev_dep_msg_out(tag, command.as_bytes());
        let written = self.bulk_out(&frame)?;
        if written != frame.len() {
            return Err(TransportError::Protocol(format!(
                "short write ({} of {} bytes)",
                written,
                frame.len()
            )));
        }
        Ok(())
    }

    fn read(&mut self) -> Result<Vec<u8>, TransportError> {
        let mut buffer = vec![0u8; self.read_buffer_len()];
        let mut message = Vec::new();

        loop {
            let tag = self.tags.next_tag();
            let request = protocol::encode_request_dev_dep_msg_in(tag, MAX_TRANSFER_SIZE);
            self.bulk_out(&request)?;

            let header = match self.read_transfer(tag, &mut buffer, &mut message) {
                Ok(header) => header,
                Err(TransportError::Timeout) => {
                    self.abort_bulk_in(tag);
                    return Err(TransportError::Timeout);
                }
                Err(err) => return Err(err),
            };
            if header.end_of_message {
                return Ok(message);
            }
        }
    }

    fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.claimed {
            return Ok(());
        }
        self.claimed = false;
        self.pipe
            .release_interface(self.interface.number)
            .map_err(map_usb_error)?;
        info!("released USB-TMC interface");
        Ok(())
    }
}

/// Translate a libusb error into the shell's transport taxonomy.
pub fn map_usb_error(err: rusb::Error) -> TransportError {
    match err {
        rusb::Error::Timeout => TransportError::Timeout,
        rusb::Error::Pipe
        | rusb::Error::Overflow
        | rusb::Error::Interrupted
        | rusb::Error::InvalidParam => TransportError::usb(err.to_string(), ErrorScope::Exchange),
        _ => TransportError::usb(err.to_string(), ErrorScope::Connection),
    }
}
