use crate::event::EventCode;

/// A decoded application message from the TCP event channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    /// Message kind, see [`EventCode`]. Unknown codes are kept as-is.
    pub event_code: u8,
    /// Sequence tag correlating related messages.
    pub event_iter: u8,
    /// Width of every payload element in bits (8, 16 or 32).
    pub event_bits: u8,
    /// Payload elements, each `event_bits` wide, unsigned.
    pub payload: Vec<u32>,
}

impl Packet {
    pub fn new(event_code: u8, event_iter: u8, event_bits: u8, payload: Vec<u32>) -> Self {
        Self {
            event_code,
            event_iter,
            event_bits,
            payload,
        }
    }

    /// The typed event code, if this is one of the known kinds.
    pub fn code(&self) -> Option<EventCode> {
        EventCode::try_from(self.event_code).ok()
    }

    /// Payload length in bytes as it appears on the wire.
    pub fn data_size(&self) -> usize {
        self.payload.len() * (self.event_bits as usize / 8)
    }

    /// The first payload element, which move events use for the game score.
    pub fn first(&self) -> Option<u32> {
        self.payload.first().copied()
    }
}

/// One accepted amplifier batch, converted to volts.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBatch {
    /// Rolling 8-bit sequence counter embedded by the amplifier.
    pub counter: u8,
    /// Batches lost between the previous accepted batch and this one.
    pub lost_packets: u32,
    /// `channels[channel][sample]` in volts.
    pub channels: Vec<Vec<f32>>,
}

impl SampleBatch {
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn samples_per_channel(&self) -> usize {
        self.channels.first().map(Vec::len).unwrap_or(0)
    }

    /// Samples of a single channel, `None` when the index is out of range.
    pub fn channel(&self, channel: usize) -> Option<&[f32]> {
        self.channels.get(channel).map(Vec::as_slice)
    }
}
