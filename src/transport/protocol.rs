//! USBTMC bulk framing.
//!
//! Every bulk transfer starts with a 12-byte header:
//! `MsgID, bTag, !bTag, 0x00, TransferSize (u32 LE), bmTransferAttributes, 3 bytes`.
//! Outgoing payloads are padded to a 4-byte boundary.

use crate::transport::TransportError;

pub const USBTMC_CLASS_CODE: u8 = 0xFE;
pub const USBTMC_SUBCLASS_CODE: u8 = 0x03;

pub const HEADER_SIZE: usize = 12;
/// Largest payload requested per `REQUEST_DEV_DEP_MSG_IN`.
pub const MAX_TRANSFER_SIZE: u32 = 1024 * 8;

pub const DEV_DEP_MSG_OUT: u8 = 1;
pub const REQUEST_DEV_DEP_MSG_IN: u8 = 2;
pub const DEV_DEP_MSG_IN: u8 = 2;

pub const INITIATE_ABORT_BULK_IN: u8 = 3;
pub const CHECK_ABORT_BULK_IN_STATUS: u8 = 4;

pub const STATUS_SUCCESS: u8 = 0x01;
pub const STATUS_PENDING: u8 = 0x02;
pub const STATUS_FAILED: u8 = 0x80;
pub const STATUS_TRANSFER_NOT_IN_PROGRESS: u8 = 0x81;

const ATTR_EOM: u8 = 0x01;

/// bTag generator. Tags cycle through 1..=255; zero is reserved.
#[derive(Debug, Clone)]
pub struct TagSequence {
    last: u8,
}

impl TagSequence {
    pub fn new() -> Self {
        Self { last: 0 }
    }

    pub fn next_tag(&mut self) -> u8 {
        self.last = if self.last == u8::MAX { 1 } else { self.last + 1 };
        self.last
    }
}

impl Default for TagSequence {
    fn default() -> Self {
        Self::new()
    }
}

fn header(msg_id: u8, tag: u8, transfer_size: u32, attributes: u8) -> [u8; HEADER_SIZE] {
    let size = transfer_size.to_le_bytes();
    [
        msg_id, tag, !tag, 0x00, size[0], size[1], size[2], size[3], attributes, 0x00, 0x00, 0x00,
    ]
}

/// Frame a complete command as a single `DEV_DEP_MSG_OUT` transfer with EOM set.
pub fn encode_dev_dep_msg_out(tag: u8, data: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE + data.len() + 3);
    frame.extend_from_slice(&header(DEV_DEP_MSG_OUT, tag, data.len() as u32, ATTR_EOM));
    frame.extend_from_slice(data);
    while frame.len() % 4 != 0 {
        frame.push(0x00);
    }
    frame
}

/// Ask the instrument to send up to `max_size` bytes of its response.
pub fn encode_request_dev_dep_msg_in(tag: u8, max_size: u32) -> [u8; HEADER_SIZE] {
    header(REQUEST_DEV_DEP_MSG_IN, tag, max_size, 0x00)
}

/// Parsed header of a `DEV_DEP_MSG_IN` transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgInHeader {
    pub transfer_size: u32,
    pub end_of_message: bool,
}

/// Validate the header at the start of a bulk-IN transfer against the request tag.
pub fn decode_dev_dep_msg_in(tag: u8, transfer: &[u8]) -> Result<MsgInHeader, TransportError> {
    if transfer.len() < HEADER_SIZE {
        return Err(TransportError::Protocol(format!(
            "short bulk-in transfer ({} bytes)",
            transfer.len()
        )));
    }
    if transfer[0] != DEV_DEP_MSG_IN {
        return Err(TransportError::Protocol(format!(
            "unexpected MsgID {}",
            transfer[0]
        )));
    }
    if transfer[1] != tag || transfer[2] != !tag {
        return Err(TransportError::Protocol(format!(
            "bTag mismatch (expected {}, got {})",
            tag, transfer[1]
        )));
    }
    let transfer_size = u32::from_le_bytes([transfer[4], transfer[5], transfer[6], transfer[7]]);
    Ok(MsgInHeader {
        transfer_size,
        end_of_message: transfer[8] & ATTR_EOM != 0,
    })
}

/// Reply to `INITIATE_ABORT_BULK_IN`: `USBTMC_status, bTag`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortStart {
    /// The device is aborting the transfer; drain bulk-IN and poll for completion.
    Started,
    /// Nothing to abort for this tag.
    NotInProgress,
    Failed(u8),
}

pub fn decode_initiate_abort(reply: &[u8]) -> AbortStart {
    match reply.first().copied() {
        Some(STATUS_SUCCESS) => AbortStart::Started,
        Some(STATUS_TRANSFER_NOT_IN_PROGRESS) => AbortStart::NotInProgress,
        Some(status) => AbortStart::Failed(status),
        None => AbortStart::Failed(STATUS_FAILED),
    }
}

/// Reply to `CHECK_ABORT_BULK_IN_STATUS`: `USBTMC_status, bmAbortBulkIn, 2 reserved, NBYTES_RXD`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortProgress {
    Done,
    /// Still aborting. `queued` is set while the device still holds data for bulk-IN.
    Pending { queued: bool },
    Failed(u8),
}

pub fn decode_check_abort(reply: &[u8]) -> AbortProgress {
    match reply.first().copied() {
        Some(STATUS_SUCCESS) => AbortProgress::Done,
        Some(STATUS_PENDING) => AbortProgress::Pending {
            queued: reply.get(1).is_some_and(|bits| bits & 0x01 != 0),
        },
        Some(status) => AbortProgress::Failed(status),
        None => AbortProgress::Failed(STATUS_FAILED),
    }
}
