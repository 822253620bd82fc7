//! Wire formats of the lab link.
//!
//! Two framings share the same bit conventions and CRC-16:
//! - the event channel (TCP): [`packet`] frames with a 9-byte header,
//!   scanned out of a byte stream by [`framer::StreamFramer`];
//! - the sample channel (UDP): fixed-size amplifier records in [`batch`].
//!
//! Nothing here performs I/O.

pub mod batch;
pub mod bits;
pub mod crc;
pub mod error;
pub mod framer;
pub mod packet;

pub use batch::{AmplifierBatch, BatchLayout, BATCH_SYNC};
pub use bits::Bits;
pub use crc::{crc16, crc8};
pub use error::{BitsError, ProtocolError};
pub use framer::{FramerStats, StreamFramer};
pub use packet::{encode, ping_frame, try_decode, Decoded, OutboundPayload, HEADER_SIZE, SYNC};
