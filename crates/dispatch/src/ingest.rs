//! Amplifier sample ingest over UDP.
//!
//! [`SampleAssembler`] is the socket-free state machine: it accumulates
//! datagram bytes, scans for CRC-valid batch records, filters the duplicate
//! datagrams the amplifier's radio module is known to emit and accounts for
//! lost batches from the rolling 8-bit counter. [`UdpIngest`] drives it from a
//! non-blocking socket.

use std::io;
use std::net::{SocketAddr, SocketAddrV4, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bci_types::{AdcConfig, DispatchSink, SampleBatch};
use bytes::{Buf, BytesMut};
use log::{debug, error, info, trace};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use protocol::{AmplifierBatch, BatchLayout, ProtocolError};

use crate::error::DispatchError;
use crate::multiplexer::MAX_POLL_TIMEOUT;

/// Smallest receive buffer; grown to the batch frame when that is longer.
const DATAGRAM_SIZE: usize = 2048;

/// Batches lost between two accepted counters.
///
/// A counter that did not advance counts as a full wrap of 255.
pub fn lost_between(previous: u8, current: u8) -> u32 {
    if previous >= current {
        255 - previous as u32 + current as u32
    } else {
        current as u32 - previous as u32 - 1
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    pub accepted: u64,
    pub duplicates: u64,
    pub crc_rejects: u64,
    pub resync_bytes: u64,
    pub lost_packets: u64,
}

#[derive(Debug)]
pub struct SampleAssembler {
    layout: BatchLayout,
    adc: AdcConfig,
    buf: BytesMut,
    prev_crc: Option<u16>,
    prev_counter: u8,
    stats: IngestStats,
}

impl SampleAssembler {
    pub fn new(layout: BatchLayout, adc: AdcConfig) -> Self {
        Self {
            layout,
            adc,
            buf: BytesMut::with_capacity(layout.frame_len() * 2),
            prev_crc: None,
            prev_counter: 0,
            stats: IngestStats::default(),
        }
    }

    /// Layout taken from the ADC channel count and the batch size.
    pub fn from_config(adc: &AdcConfig, batch_samples: u32) -> Self {
        Self::new(
            BatchLayout::new(adc.channels, batch_samples as usize),
            adc.clone(),
        )
    }

    pub fn layout(&self) -> BatchLayout {
        self.layout
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Appends datagram bytes and returns every accepted, non-duplicate batch.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<SampleBatch> {
        self.buf.extend_from_slice(bytes);
        let frame_len = self.layout.frame_len();

        let mut batches = Vec::new();
        while self.buf.len() >= frame_len {
            let scan = match AmplifierBatch::parse(&self.buf, self.layout) {
                Ok(batch) if self.prev_crc == Some(batch.crc()) => Scan::Duplicate(batch.counter()),
                Ok(batch) => Scan::Accepted {
                    counter: batch.counter(),
                    crc: batch.crc(),
                    channels: batch.to_volts(&self.adc),
                },
                Err(ProtocolError::ChecksumMismatch { expected, actual }) => {
                    Scan::BadCrc { expected, actual }
                }
                Err(_) => Scan::NoSync,
            };

            match scan {
                Scan::Accepted {
                    counter,
                    crc,
                    channels,
                } => {
                    self.buf.advance(frame_len);
                    batches.push(self.accept(counter, crc, channels));
                }
                Scan::Duplicate(counter) => {
                    // Consumed whole, sequence state untouched
                    debug!("Dropping duplicate batch {}", counter);
                    self.buf.advance(frame_len);
                    self.stats.duplicates += 1;
                }
                Scan::BadCrc { expected, actual } => {
                    debug!(
                        "Batch CRC mismatch: stored {:#06x}, computed {:#06x}",
                        expected, actual
                    );
                    self.buf.advance(1);
                    self.stats.crc_rejects += 1;
                }
                Scan::NoSync => {
                    trace!("Resync: dropping byte {:#04x}", self.buf[0]);
                    self.buf.advance(1);
                    self.stats.resync_bytes += 1;
                }
            }
        }
        batches
    }

    fn accept(&mut self, counter: u8, crc: u16, channels: Vec<Vec<f32>>) -> SampleBatch {
        self.prev_crc = Some(crc);
        let lost = lost_between(self.prev_counter, counter);
        self.prev_counter = counter;
        if lost > 0 {
            debug!("Batch {} arrived after {} lost", counter, lost);
        }

        self.stats.accepted += 1;
        self.stats.lost_packets += lost as u64;
        SampleBatch {
            counter,
            lost_packets: lost,
            channels,
        }
    }
}

enum Scan {
    Accepted {
        counter: u8,
        crc: u16,
        channels: Vec<Vec<f32>>,
    },
    Duplicate(u8),
    BadCrc {
        expected: u16,
        actual: u16,
    },
    NoSync,
}

/// Non-blocking UDP receive loop feeding a [`SampleAssembler`].
#[derive(Debug)]
pub struct UdpIngest {
    socket: UdpSocket,
    assembler: SampleAssembler,
    poll_timeout: Duration,
    datagram: Box<[u8]>,
}

impl UdpIngest {
    pub fn bind(addr: SocketAddrV4, assembler: SampleAssembler) -> Result<Self, DispatchError> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;
        let datagram_size = DATAGRAM_SIZE.max(assembler.layout().frame_len());
        info!(
            "Listening for amplifier batches on {} ({}-byte reads)",
            socket.local_addr()?,
            datagram_size
        );
        Ok(Self {
            socket,
            assembler,
            poll_timeout: MAX_POLL_TIMEOUT,
            datagram: vec![0u8; datagram_size].into_boxed_slice(),
        })
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout.min(MAX_POLL_TIMEOUT);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn stats(&self) -> IngestStats {
        self.assembler.stats()
    }

    /// Waits up to the poll timeout, then drains every queued datagram.
    /// Returns the number of batches delivered.
    pub fn poll_once<S: DispatchSink + ?Sized>(&mut self, sink: &mut S) -> Result<usize, DispatchError> {
        let timeout = self.poll_timeout.as_millis() as i32;
        let mut fds = [PollFd::new(&self.socket, PollFlags::POLLIN)];
        match poll(&mut fds, timeout) {
            Ok(0) | Err(Errno::EINTR) => return Ok(0),
            Ok(_) => {}
            Err(e) => return Err(DispatchError::Poll(e)),
        }

        let mut delivered = 0;
        loop {
            match self.socket.recv(&mut self.datagram) {
                Ok(n) => {
                    for batch in self.assembler.push(&self.datagram[..n]) {
                        sink.on_sample_batch(batch);
                        delivered += 1;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(delivered)
    }

    pub fn run<S: DispatchSink + ?Sized>(&mut self, stop: &AtomicBool, sink: &mut S) {
        while !stop.load(Ordering::Relaxed) {
            if let Err(e) = self.poll_once(sink) {
                error!("Sample ingest iteration failed: {}", e);
                std::thread::sleep(self.poll_timeout);
            }
        }
        let stats = self.assembler.stats();
        info!(
            "Sample ingest stopped: {} accepted, {} duplicates, {} CRC rejects, {} lost",
            stats.accepted, stats.duplicates, stats.crc_rejects, stats.lost_packets
        );
    }
}
