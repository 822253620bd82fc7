//! Amplifier batch record carried over UDP.
//!
//! ```text
//! +----------------------+
//! | sync (2 bytes)       |  0xAA 0xBB
//! +----------------------+
//! | counter (1)          |  rolling 8-bit sequence number
//! +----------------------+
//! | samples              |  samples x channels signed 16-bit codes,
//! |                      |  channel-interleaved per sample slot
//! +----------------------+
//! | crc16 (2)            |  u16 little-endian, zeroed for computation
//! +----------------------+
//! ```
//!
//! With the default 5 channels x 80 samples a record is 805 bytes.

use bci_types::AdcConfig;

use crate::bits::Bits;
use crate::crc::crc16_zeroed;
use crate::error::{ProtocolError, Result};

pub const BATCH_SYNC: [u8; 2] = [0xAA, 0xBB];
const SAMPLES_OFFSET: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchLayout {
    pub channels: usize,
    pub samples: usize,
}

impl BatchLayout {
    pub fn new(channels: usize, samples: usize) -> Self {
        Self { channels, samples }
    }

    /// Total record length in bytes.
    pub fn frame_len(&self) -> usize {
        SAMPLES_OFFSET + self.channels * self.samples * 2 + 2
    }

    pub fn crc_offset(&self) -> usize {
        self.frame_len() - 2
    }

    fn sample_bit_offset(&self, channel: usize, sample: usize) -> usize {
        (SAMPLES_OFFSET + sample * self.channels * 2) * 8 + channel * 16
    }
}

impl Default for BatchLayout {
    fn default() -> Self {
        Self::new(5, 80)
    }
}

/// A structurally valid, CRC-checked batch borrowed from a receive buffer.
#[derive(Debug, Clone, Copy)]
pub struct AmplifierBatch<'a> {
    frame: &'a [u8],
    layout: BatchLayout,
    counter: u8,
    crc: u16,
}

impl<'a> AmplifierBatch<'a> {
    /// Validates the record at the start of `buf`. Bytes past
    /// `layout.frame_len()` are ignored.
    pub fn parse(buf: &'a [u8], layout: BatchLayout) -> Result<Self> {
        let len = layout.frame_len();
        if buf.len() < len {
            return Err(ProtocolError::BatchTooShort {
                expected: len,
                actual: buf.len(),
            });
        }
        let frame = &buf[..len];
        if frame[..2] != BATCH_SYNC {
            return Err(ProtocolError::BadBatchSync);
        }

        let crc_at = layout.crc_offset();
        let stored = u16::from_le_bytes([frame[crc_at], frame[crc_at + 1]]);
        let actual = crc16_zeroed(frame, crc_at);
        if stored != actual {
            return Err(ProtocolError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        Ok(Self {
            frame,
            layout,
            counter: frame[2],
            crc: stored,
        })
    }

    pub fn counter(&self) -> u8 {
        self.counter
    }

    pub fn crc(&self) -> u16 {
        self.crc
    }

    /// Raw ADC code of one channel at one sample slot.
    pub fn code(&self, channel: usize, sample: usize) -> Option<i16> {
        if channel >= self.layout.channels || sample >= self.layout.samples {
            return None;
        }
        Bits::new(self.frame)
            .get_signed(self.layout.sample_bit_offset(channel, sample), 16)
            .ok()
            .map(|code| code as i16)
    }

    /// All samples as `[channel][sample]` volts.
    pub fn to_volts(&self, adc: &AdcConfig) -> Vec<Vec<f32>> {
        (0..self.layout.channels)
            .map(|ch| {
                (0..self.layout.samples)
                    .map(|s| adc.code_to_volts(self.code(ch, s).unwrap_or(0)))
                    .collect()
            })
            .collect()
    }

    /// Builds a record from sample-major interleaved codes,
    /// `codes[sample * channels + channel]`.
    pub fn encode(counter: u8, codes: &[i16], layout: BatchLayout) -> Result<Vec<u8>> {
        let needed = layout.channels * layout.samples;
        if codes.len() < needed {
            return Err(ProtocolError::PayloadTooShort {
                needed,
                got: codes.len(),
            });
        }

        let mut frame = vec![0u8; layout.frame_len()];
        frame[..2].copy_from_slice(&BATCH_SYNC);
        frame[2] = counter;

        let mut bits = Bits::new(&mut frame[..]);
        for sample in 0..layout.samples {
            for channel in 0..layout.channels {
                let code = codes[sample * layout.channels + channel];
                bits.set_bits(layout.sample_bit_offset(channel, sample), code as u16 as u64, 16)?;
            }
        }

        let crc_at = layout.crc_offset();
        let crc = crc16_zeroed(&frame, crc_at);
        frame[crc_at..].copy_from_slice(&crc.to_le_bytes());
        Ok(frame)
    }
}
