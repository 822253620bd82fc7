//! Per-peer resynchronizing frame scanner.
//!
//! Bytes are appended as they arrive and decoded from the front of the buffer
//! until it is too short for a header or a partial frame needs more data. A
//! buffer that does not start with a frame loses one byte at a time until it
//! does; a frame that fails its CRC is dropped whole, trusting its declared
//! length.

use bci_types::Packet;
use bytes::{Buf, BytesMut};
use log::{debug, trace};

use crate::packet::{try_decode, Decoded, HEADER_SIZE};

/// Counters of what the framer has seen so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    pub packets: u64,
    pub bad_crc: u64,
    pub malformed: u64,
    pub resync_bytes: u64,
}

#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
    awaiting: Option<usize>,
    stats: FramerStats,
}

impl StreamFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every packet that became complete, in
    /// stream order.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<Packet> {
        self.buf.extend_from_slice(bytes);
        self.awaiting = None;

        let mut packets = Vec::new();
        while self.buf.len() >= HEADER_SIZE {
            match try_decode(&self.buf) {
                Decoded::Found(packet, size) => {
                    self.buf.advance(HEADER_SIZE + size);
                    self.stats.packets += 1;
                    packets.push(packet);
                }
                Decoded::BadCrc(size) => {
                    debug!("Dropping {}-byte frame with bad CRC", HEADER_SIZE + size);
                    self.buf.advance(HEADER_SIZE + size);
                    self.stats.bad_crc += 1;
                }
                Decoded::Malformed(size) => {
                    debug!("Dropping malformed {}-byte frame", HEADER_SIZE + size);
                    self.buf.advance(HEADER_SIZE + size);
                    self.stats.malformed += 1;
                }
                Decoded::AwaitingData(size) => {
                    self.awaiting = Some(size);
                    break;
                }
                Decoded::NotFound => {
                    trace!("Resync: dropping byte {:#04x}", self.buf[0]);
                    self.buf.advance(1);
                    self.stats.resync_bytes += 1;
                }
            }
        }
        packets
    }

    /// `data_size` of the partial frame the last feed stopped on.
    pub fn awaiting(&self) -> Option<usize> {
        self.awaiting
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn clear(&mut self) {
        self.buf.clear();
        self.awaiting = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{encode, OutboundPayload};

    #[test]
    fn test_two_frames_in_one_read() {
        let mut stream = encode(&[42], 1, 0, 8, 1).unwrap();
        stream.extend(encode(&[7, 8], 2, 1, 16, 4).unwrap());

        let mut framer = StreamFramer::new();
        let packets = framer.feed(&stream);
        assert_eq!(packets.len(), 2);
        assert_eq!(packets[0].payload, vec![42]);
        assert_eq!(packets[1].event_code, 2);
        assert_eq!(packets[1].payload, vec![7, 8]);
        assert_eq!(framer.buffered(), 0);
        assert_eq!(framer.awaiting(), None);
    }

    #[test]
    fn test_bad_crc_frame_is_skipped_whole() {
        let mut corrupt = encode(&[1, 2, 3], 3, 0, 8, 3).unwrap();
        corrupt[HEADER_SIZE] ^= 0xFF;
        let good = OutboundPayload::ping().encode().unwrap();

        let mut framer = StreamFramer::new();
        let mut stream = corrupt.clone();
        stream.extend_from_slice(&good);
        let packets = framer.feed(&stream);

        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].event_code, 14);
        let stats = framer.stats();
        assert_eq!(stats.bad_crc, 1);
        assert_eq!(stats.resync_bytes, 0);
    }

    #[test]
    fn test_partial_frame_waits() {
        let frame = encode(&[1, 2, 3, 4], 1, 0, 32, 16).unwrap();
        let mut framer = StreamFramer::new();

        assert!(framer.feed(&frame[..12]).is_empty());
        assert_eq!(framer.awaiting(), Some(16));
        assert_eq!(framer.buffered(), 12);

        let packets = framer.feed(&frame[12..]);
        assert_eq!(packets.len(), 1);
        assert_eq!(packets[0].payload, vec![1, 2, 3, 4]);
        assert_eq!(framer.awaiting(), None);
    }

    #[test]
    fn test_short_garbage_is_kept_until_header_size() {
        let mut framer = StreamFramer::new();
        assert!(framer.feed(&[0x01, 0x02, 0x03]).is_empty());
        assert_eq!(framer.buffered(), 3);
        assert_eq!(framer.stats().resync_bytes, 0);

        framer.clear();
        assert_eq!(framer.buffered(), 0);
    }
}
