//! Event-channel packet format.
//!
//! # Frame Format
//!
//! ```text
//! +-------------------+
//! | sync (2 bytes)    |  0xAA 0xCC
//! +-------------------+
//! | event_code (1)    |
//! +-------------------+
//! | event_iter (1)    |
//! +-------------------+
//! | event_bits (1)    |  8, 16 or 32
//! +-------------------+
//! | data_size (2)     |  u16 little-endian, payload bytes
//! +-------------------+
//! | crc16 (2)         |  u16 little-endian
//! +-------------------+
//! | payload           |  data_size bytes, event_bits-wide unsigned elements
//! +-------------------+
//! ```
//!
//! The CRC covers the whole frame, header included, with the CRC field itself
//! set to zero.

use bci_types::{EventCode, Packet};

use crate::bits::Bits;
use crate::crc::crc16_zeroed;
use crate::error::{ProtocolError, Result};

pub const SYNC: [u8; 2] = [0xAA, 0xCC];
pub const HEADER_SIZE: usize = 9;

const CODE_OFFSET: usize = 2;
const ITER_OFFSET: usize = 3;
const BITS_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 5;
const CRC_OFFSET: usize = 7;

fn element_bytes(event_bits: u8) -> Option<usize> {
    match event_bits {
        8 | 16 | 32 => Some(event_bits as usize / 8),
        _ => None,
    }
}

/// Serializes one frame.
///
/// `payload` must hold at least `data_size / (event_bits / 8)` elements; any
/// extra elements are ignored and each element is truncated to `event_bits`.
pub fn encode(
    payload: &[u32],
    event_code: u8,
    event_iter: u8,
    event_bits: u8,
    data_size: u16,
) -> Result<Vec<u8>> {
    let width = element_bytes(event_bits).ok_or(ProtocolError::InvalidEventBits(event_bits))?;
    let data_size = data_size as usize;
    if data_size % width != 0 {
        return Err(ProtocolError::MisalignedDataSize {
            data_size,
            event_bits,
        });
    }
    let count = data_size / width;
    if payload.len() < count {
        return Err(ProtocolError::PayloadTooShort {
            needed: count,
            got: payload.len(),
        });
    }

    let mut frame = vec![0u8; HEADER_SIZE + data_size];
    frame[..2].copy_from_slice(&SYNC);
    frame[CODE_OFFSET] = event_code;
    frame[ITER_OFFSET] = event_iter;
    frame[BITS_OFFSET] = event_bits;
    frame[SIZE_OFFSET..CRC_OFFSET].copy_from_slice(&(data_size as u16).to_le_bytes());

    let bits = event_bits as usize;
    let mut view = Bits::new(&mut frame[..]);
    for (i, &value) in payload[..count].iter().enumerate() {
        view.set_bits(HEADER_SIZE * 8 + i * bits, value as u64, bits)?;
    }

    let crc = crc16_zeroed(&frame, CRC_OFFSET);
    frame[CRC_OFFSET..HEADER_SIZE].copy_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

/// The keepalive frame: `PING` with no payload.
pub fn ping_frame() -> Vec<u8> {
    let mut frame = vec![SYNC[0], SYNC[1], EventCode::Ping as u8, 0, 8, 0, 0, 0, 0];
    let crc = crc16_zeroed(&frame, CRC_OFFSET);
    frame[CRC_OFFSET..].copy_from_slice(&crc.to_le_bytes());
    frame
}

/// Outcome of decoding at the start of a buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// The buffer does not start with the sync marker.
    NotFound,
    /// A frame starts here but is not complete yet.
    AwaitingData(usize),
    /// A complete frame whose CRC does not match.
    BadCrc(usize),
    /// A CRC-valid frame with an unsupported element width or a data size
    /// that is not a multiple of it.
    Malformed(usize),
    Found(Packet, usize),
}

impl Decoded {
    /// Bytes a complete frame occupies, for the variants that have one.
    pub fn frame_len(&self) -> Option<usize> {
        match self {
            Decoded::BadCrc(size) | Decoded::Malformed(size) | Decoded::Found(_, size) => {
                Some(HEADER_SIZE + size)
            }
            Decoded::NotFound | Decoded::AwaitingData(_) => None,
        }
    }
}

/// Attempts to decode a frame starting at `buf[0]`.
pub fn try_decode(buf: &[u8]) -> Decoded {
    if buf.len() < SYNC.len() {
        // A lone 0xAA may still become a marker
        return if SYNC.starts_with(buf) && !buf.is_empty() {
            Decoded::AwaitingData(0)
        } else {
            Decoded::NotFound
        };
    }
    if buf[..2] != SYNC {
        return Decoded::NotFound;
    }
    if buf.len() < HEADER_SIZE {
        return Decoded::AwaitingData(0);
    }

    let data_size = u16::from_le_bytes([buf[SIZE_OFFSET], buf[SIZE_OFFSET + 1]]) as usize;
    let total = HEADER_SIZE + data_size;
    if buf.len() < total {
        return Decoded::AwaitingData(data_size);
    }

    let frame = &buf[..total];
    let stored = u16::from_le_bytes([frame[CRC_OFFSET], frame[CRC_OFFSET + 1]]);
    if crc16_zeroed(frame, CRC_OFFSET) != stored {
        return Decoded::BadCrc(data_size);
    }

    let event_bits = frame[BITS_OFFSET];
    let width = match element_bytes(event_bits) {
        Some(width) if data_size % width == 0 => width,
        _ => return Decoded::Malformed(data_size),
    };

    let bits = event_bits as usize;
    let view = Bits::new(frame);
    let mut payload = Vec::with_capacity(data_size / width);
    for i in 0..data_size / width {
        match view.get_unsigned(HEADER_SIZE * 8 + i * bits, bits) {
            Ok(value) => payload.push(value as u32),
            Err(_) => return Decoded::Malformed(data_size),
        }
    }

    let packet = Packet::new(frame[CODE_OFFSET], frame[ITER_OFFSET], event_bits, payload);
    Decoded::Found(packet, data_size)
}

/// A payload waiting in a peer's outbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundPayload {
    pub event_code: u8,
    pub event_iter: u8,
    pub event_bits: u8,
    pub data_size: u16,
    pub data: Vec<u32>,
}

impl OutboundPayload {
    /// Payload whose `data_size` covers every element of `data`.
    ///
    /// Fails for an `event_bits` other than 8, 16 or 32, and for payloads
    /// longer than the 16-bit `data_size` field can describe.
    pub fn new(event_code: u8, event_iter: u8, event_bits: u8, data: Vec<u32>) -> Result<Self> {
        let width = element_bytes(event_bits).ok_or(ProtocolError::InvalidEventBits(event_bits))?;
        let bytes = data.len() * width;
        let data_size =
            u16::try_from(bytes).map_err(|_| ProtocolError::PayloadTooLarge { bytes })?;
        Ok(Self {
            event_code,
            event_iter,
            event_bits,
            data_size,
            data,
        })
    }

    /// Payload with an explicit `data_size`, checked the same way `encode` does.
    pub fn with_data_size(
        event_code: u8,
        event_iter: u8,
        event_bits: u8,
        data_size: u16,
        data: Vec<u32>,
    ) -> Result<Self> {
        let payload = Self {
            event_code,
            event_iter,
            event_bits,
            data_size,
            data,
        };
        payload.encode()?;
        Ok(payload)
    }

    pub fn ping() -> Self {
        Self {
            event_code: EventCode::Ping as u8,
            event_iter: 0,
            event_bits: 8,
            data_size: 0,
            data: Vec::new(),
        }
    }

    /// Byte payload with 8-bit elements, e.g. an IP address as text.
    pub fn from_bytes(event_code: u8, event_iter: u8, bytes: &[u8]) -> Result<Self> {
        Self::new(event_code, event_iter, 8, bytes.iter().map(|&b| b as u32).collect())
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        encode(
            &self.data,
            self.event_code,
            self.event_iter,
            self.event_bits,
            self.data_size,
        )
    }
}
