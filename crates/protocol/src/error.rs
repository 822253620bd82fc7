//! Error types for the wire codecs.
//!
//! Stream-level failures (lost sync, CRC rejects) are not errors here: the
//! framer and the sample assembler recover from them locally and only count
//! them. These types cover misuse of the encoders and explicit parsing of a
//! single record.

use thiserror::Error;

/// Bit-addressed access failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BitsError {
    /// The requested bit range does not fit in the buffer
    #[error("bit range {offset}+{size} exceeds buffer of {len_bits} bits")]
    OutOfBounds {
        offset: usize,
        size: usize,
        len_bits: usize,
    },

    /// Field widths are limited to 1..=64 bits
    #[error("invalid field width: {0} bits")]
    InvalidWidth(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("event_bits must be 8, 16 or 32, got {0}")]
    InvalidEventBits(u8),

    #[error("payload holds {got} elements, data_size needs {needed}")]
    PayloadTooShort { needed: usize, got: usize },

    #[error("payload of {bytes} bytes does not fit the 16-bit data_size field")]
    PayloadTooLarge { bytes: usize },

    #[error("data_size {data_size} is not a multiple of {event_bits}-bit elements")]
    MisalignedDataSize { data_size: usize, event_bits: u8 },

    #[error("bit access failed: {0}")]
    Bits(#[from] BitsError),

    #[error("batch needs {expected} bytes, got {actual}")]
    BatchTooShort { expected: usize, actual: usize },

    #[error("batch does not start with the 0xAA 0xBB sync marker")]
    BadBatchSync,

    #[error("CRC mismatch: stored {expected:#06x}, computed {actual:#06x}")]
    ChecksumMismatch { expected: u16, actual: u16 },
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
