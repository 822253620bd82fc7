//! One connected peer of the event channel.

use std::io::{self, Read, Write};
use std::net::{Ipv4Addr, TcpStream};
use std::time::Instant;

use bci_types::Packet;
use bytes::{Buf, BytesMut};
use protocol::{FramerStats, StreamFramer};

/// Result of draining a readable socket.
#[derive(Debug)]
pub enum ReadOutcome {
    /// Zero or more packets completed by the bytes read.
    Packets(Vec<Packet>),
    /// The peer closed its side.
    Closed,
}

/// A non-blocking stream plus the per-peer receive and transmit buffers.
#[derive(Debug)]
pub struct PeerConnection {
    ip: Ipv4Addr,
    stream: TcpStream,
    framer: StreamFramer,
    pending: BytesMut,
    connected_at: Instant,
}

impl PeerConnection {
    pub fn new(ip: Ipv4Addr, stream: TcpStream) -> io::Result<Self> {
        stream.set_nonblocking(true)?;
        // Small frames, send them as soon as they are queued
        stream.set_nodelay(true)?;
        Ok(Self {
            ip,
            stream,
            framer: StreamFramer::new(),
            pending: BytesMut::new(),
            connected_at: Instant::now(),
        })
    }

    pub fn ip(&self) -> Ipv4Addr {
        self.ip
    }

    pub fn stream(&self) -> &TcpStream {
        &self.stream
    }

    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// Reads once into `scratch` and feeds the bytes through the framer.
    pub fn receive(&mut self, scratch: &mut [u8]) -> io::Result<ReadOutcome> {
        match self.stream.read(scratch) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(n) => Ok(ReadOutcome::Packets(self.framer.feed(&scratch[..n]))),
            Err(e) if is_transient(&e) => Ok(ReadOutcome::Packets(Vec::new())),
            Err(e) => Err(e),
        }
    }

    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn queue_frame(&mut self, frame: &[u8]) {
        self.pending.extend_from_slice(frame);
    }

    /// Writes as much of the pending buffer as the socket accepts. Returns the
    /// number of bytes written.
    pub fn flush(&mut self) -> io::Result<usize> {
        let mut written = 0;
        while !self.pending.is_empty() {
            match self.stream.write(&self.pending) {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => {
                    self.pending.advance(n);
                    written += n;
                }
                Err(e) if is_transient(&e) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(written)
    }

    pub fn framer_stats(&self) -> FramerStats {
        self.framer.stats()
    }
}

fn is_transient(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::OutboundPayload;
    use std::net::TcpListener;
    use std::time::Duration;

    fn pair() -> (PeerConnection, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (PeerConnection::new(Ipv4Addr::LOCALHOST, server).unwrap(), client)
    }

    fn receive_until(peer: &mut PeerConnection, want: usize) -> Vec<Packet> {
        let mut scratch = [0u8; 64];
        let mut packets = Vec::new();
        for _ in 0..200 {
            match peer.receive(&mut scratch).unwrap() {
                ReadOutcome::Packets(p) => packets.extend(p),
                ReadOutcome::Closed => break,
            }
            if packets.len() >= want {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        packets
    }

    #[test]
    fn test_flush_writes_queued_frames() {
        let (mut peer, mut client) = pair();
        let frame = OutboundPayload::new(1, 0, 8, vec![42]).unwrap().encode().unwrap();

        peer.queue_frame(&frame);
        assert!(peer.has_pending());
        assert_eq!(peer.flush().unwrap(), 10);
        assert!(!peer.has_pending());

        let mut got = [0u8; 10];
        client.read_exact(&mut got).unwrap();
        assert_eq!(&got[..], &frame[..]);
    }

    #[test]
    fn test_receive_frames_and_close() {
        let (mut peer, mut client) = pair();
        let frame = OutboundPayload::ping().encode().unwrap();
        client.write_all(&frame).unwrap();
        client.write_all(&frame).unwrap();

        let packets = receive_until(&mut peer, 2);
        assert_eq!(packets.len(), 2);
        assert_eq!(peer.framer_stats().packets, 2);

        drop(client);
        let mut scratch = [0u8; 16];
        let mut closed = false;
        for _ in 0..200 {
            if let ReadOutcome::Closed = peer.receive(&mut scratch).unwrap() {
                closed = true;
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(closed);
    }

    #[test]
    fn test_partial_write_is_finished_later() {
        let (mut peer, mut client) = pair();
        // Far more than the loopback socket buffers hold
        let total = 32 * 1024 * 1024;
        let block: Vec<u8> = (0..total).map(|i| (i % 251) as u8).collect();

        // Step 1: nobody reads yet, so the socket accepts only part of it
        peer.queue_frame(&block);
        let first = peer.flush().unwrap();
        assert!(first > 0 && first < total);
        assert_eq!(peer.pending_len(), total - first);

        // Step 2: the client drains while later flushes send the rest
        let reader = std::thread::spawn(move || {
            let mut got = Vec::with_capacity(total);
            let mut buf = vec![0u8; 64 * 1024];
            while got.len() < total {
                let n = client.read(&mut buf).unwrap();
                assert!(n > 0, "stream closed early");
                got.extend_from_slice(&buf[..n]);
            }
            got
        });
        let mut written = first;
        for _ in 0..10_000 {
            if !peer.has_pending() {
                break;
            }
            written += peer.flush().unwrap();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(!peer.has_pending());
        assert_eq!(written, total);

        // Step 3: the bytes arrive complete and in order
        let got = reader.join().unwrap();
        assert!(got == block);
    }

    #[test]
    fn test_flush_to_closed_peer_fails() {
        let (mut peer, client) = pair();
        drop(client);

        let ping = OutboundPayload::ping().encode().unwrap();
        let mut failure = None;
        for _ in 0..200 {
            peer.queue_frame(&ping);
            if let Err(e) = peer.flush() {
                failure = Some(e);
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        let failure = failure.expect("writes to a closed peer kept succeeding");
        assert!(matches!(
            failure.kind(),
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset
        ));
    }
}
