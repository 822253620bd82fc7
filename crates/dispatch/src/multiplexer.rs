//! Event-channel socket multiplexer.
//!
//! One loop serves both roles. An acceptor owns a listening socket and any
//! number of peers; an initiator owns the single connection to its server.
//! Each iteration pings idle peers, polls every socket for readiness, feeds
//! readable bytes through the peer's framer and sends at most one queued
//! payload per writable peer.
//!
//! The only blocking call is the initiator's connect attempt, bounded by
//! [`CONNECT_TIMEOUT`]; everything else waits at most one poll timeout, so a
//! stop flag is observed promptly.

use std::collections::BTreeMap;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpListener, TcpStream};
use std::os::fd::AsRawFd;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use bci_types::{DispatchSink, TcpDispatcherConfig};
use log::{debug, error, info, warn};
use nix::errno::Errno;
use nix::poll::{poll, PollFd, PollFlags};
use nix::sys::socket::{self, AddressFamily, SockFlag, SockType, SockaddrIn};
use protocol::ping_frame;

use crate::error::DispatchError;
use crate::outbound::OutboundQueues;
use crate::peer::{PeerConnection, ReadOutcome};

pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(1);
pub const MAX_POLL_TIMEOUT: Duration = Duration::from_millis(100);
pub const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(1);

const READ_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Listen on `bind` and serve every peer that connects.
    Acceptor { bind: SocketAddrV4 },
    /// Connect to `remote`, optionally from a fixed local endpoint.
    Initiator {
        remote: SocketAddrV4,
        local: Option<SocketAddrV4>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Unconnected,
    Connecting,
    Established,
    Closed,
}

#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub role: Role,
    pub poll_timeout: Duration,
    pub reconnect_backoff: Duration,
    /// Minimum spacing of keepalive pings; zero pings every iteration.
    pub keepalive_interval: Duration,
}

impl LinkSettings {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            poll_timeout: Duration::from_millis(10),
            reconnect_backoff: MAX_RECONNECT_BACKOFF,
            keepalive_interval: Duration::ZERO,
        }
    }

    /// Server side of the configured event channel.
    pub fn acceptor(config: &TcpDispatcherConfig) -> Self {
        Self::new(Role::Acceptor {
            bind: config.server().socket_addr(),
        })
        .with_timing(config)
    }

    /// Client side, bound to the configured local `abonent` endpoint if any.
    pub fn initiator(config: &TcpDispatcherConfig) -> Self {
        Self::new(Role::Initiator {
            remote: config.server().socket_addr(),
            local: config.abonent.map(|a| a.socket_addr()),
        })
        .with_timing(config)
    }

    fn with_timing(mut self, config: &TcpDispatcherConfig) -> Self {
        self.poll_timeout = config.poll_timeout().min(MAX_POLL_TIMEOUT);
        self.reconnect_backoff = config.reconnect_backoff().min(MAX_RECONNECT_BACKOFF);
        self.keepalive_interval = config.keepalive_interval();
        self
    }
}

#[derive(Debug, Clone, Copy)]
enum Slot {
    Listener,
    Peer(Ipv4Addr),
}

pub struct SocketMultiplexer<S: DispatchSink> {
    settings: LinkSettings,
    state: LinkState,
    listener: Option<TcpListener>,
    peers: BTreeMap<Ipv4Addr, PeerConnection>,
    queues: OutboundQueues,
    sink: S,
    ping: Vec<u8>,
    last_ping: Option<Instant>,
    scratch: Box<[u8]>,
}

impl<S: DispatchSink> SocketMultiplexer<S> {
    pub fn new(settings: LinkSettings, queues: OutboundQueues, sink: S) -> Self {
        Self {
            settings,
            state: LinkState::Unconnected,
            listener: None,
            peers: BTreeMap::new(),
            queues,
            sink,
            ping: ping_frame(),
            last_ping: None,
            scratch: vec![0u8; READ_CHUNK].into_boxed_slice(),
        }
    }

    pub fn state(&self) -> LinkState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.settings.role
    }

    /// Address of the listening socket, acceptor role only.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    pub fn peers(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.peers.keys().copied()
    }

    pub fn is_connected(&self, ip: Ipv4Addr) -> bool {
        self.peers.contains_key(&ip)
    }

    /// Role-specific setup. The acceptor binds and listens; the initiator
    /// makes one bounded connect attempt and reports the peer on success.
    pub fn setup(&mut self) -> Result<(), DispatchError> {
        match self.settings.role {
            Role::Acceptor { bind } => {
                let listener = TcpListener::bind(bind)?;
                listener.set_nonblocking(true)?;
                info!("Accepting event-channel peers on {}", listener.local_addr()?);
                self.listener = Some(listener);
            }
            Role::Initiator { remote, local } => {
                self.state = LinkState::Connecting;
                let ip = *remote.ip();
                let peer = connect_stream(remote, local, CONNECT_TIMEOUT)
                    .and_then(|stream| PeerConnection::new(ip, stream));
                let peer = match peer {
                    Ok(peer) => peer,
                    Err(source) => {
                        self.state = LinkState::Unconnected;
                        return Err(DispatchError::Connect {
                            addr: remote,
                            source,
                        });
                    }
                };
                info!("Connected to event-channel server {}", remote);
                self.peers.insert(ip, peer);
                self.sink.on_new_client(ip);
            }
        }
        self.state = LinkState::Established;
        Ok(())
    }

    /// One loop iteration: keepalive, readiness poll, reads and writes.
    pub fn poll_once(&mut self) -> Result<(), DispatchError> {
        if self.state != LinkState::Established {
            return Ok(());
        }
        self.keepalive();

        let timeout = self.settings.poll_timeout.min(MAX_POLL_TIMEOUT).as_millis() as i32;
        let mut slots = Vec::with_capacity(self.peers.len() + 1);
        let ready: Vec<(Slot, PollFlags)> = {
            let mut fds = Vec::with_capacity(self.peers.len() + 1);
            if let Some(listener) = &self.listener {
                fds.push(PollFd::new(listener, PollFlags::POLLIN));
                slots.push(Slot::Listener);
            }
            for (ip, peer) in &self.peers {
                let mut events = PollFlags::POLLIN;
                if peer.has_pending() || self.queues.has_pending(*ip) {
                    events |= PollFlags::POLLOUT;
                }
                fds.push(PollFd::new(peer.stream(), events));
                slots.push(Slot::Peer(*ip));
            }

            match poll(&mut fds, timeout) {
                Ok(0) | Err(Errno::EINTR) => return Ok(()),
                Ok(_) => {}
                Err(e) => return Err(DispatchError::Poll(e)),
            }

            slots
                .iter()
                .zip(fds.iter())
                .filter_map(|(slot, fd)| match fd.revents() {
                    Some(revents) if !revents.is_empty() => Some((*slot, revents)),
                    _ => None,
                })
                .collect()
        };

        for (slot, revents) in ready {
            match slot {
                Slot::Listener => self.accept_pending(),
                Slot::Peer(ip) => self.service_peer(ip, revents),
            }
        }
        Ok(())
    }

    /// Runs until `stop` is set, reconnecting after the backoff whenever the
    /// link is down, then closes every socket.
    pub fn run(&mut self, stop: &AtomicBool) {
        while !stop.load(Ordering::Relaxed) {
            if self.state != LinkState::Established {
                if let Err(e) = self.setup() {
                    warn!("{}; retrying in {:?}", e, self.settings.reconnect_backoff);
                    idle(stop, self.settings.reconnect_backoff);
                }
                continue;
            }
            if let Err(e) = self.poll_once() {
                error!("Event loop iteration failed: {}", e);
                idle(stop, self.settings.poll_timeout);
            }
        }
        self.shutdown();
    }

    /// Closes every socket without emitting peer events.
    pub fn shutdown(&mut self) {
        let peers = self.peers.len();
        self.peers.clear();
        self.listener = None;
        self.state = LinkState::Closed;
        info!("Event channel closed ({} peers dropped)", peers);
    }

    fn keepalive(&mut self) {
        if self.peers.is_empty() {
            return;
        }
        if let Some(last) = self.last_ping {
            if last.elapsed() < self.settings.keepalive_interval {
                return;
            }
        }
        self.last_ping = Some(Instant::now());

        let mut failed = Vec::new();
        for (ip, peer) in self.peers.iter_mut() {
            // A backed-up peer already has bytes in flight
            if peer.has_pending() {
                continue;
            }
            peer.queue_frame(&self.ping);
            if let Err(e) = peer.flush() {
                failed.push((*ip, e));
            }
        }
        for (ip, e) in failed {
            self.drop_on_error(ip, e);
        }
    }

    fn accept_pending(&mut self) {
        loop {
            let accepted = match &self.listener {
                Some(listener) => listener.accept(),
                None => return,
            };
            match accepted {
                Ok((stream, SocketAddr::V4(addr))) => self.admit(*addr.ip(), stream),
                Ok((_, addr)) => warn!("Rejecting non-IPv4 peer {}", addr),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    return;
                }
            }
        }
    }

    fn admit(&mut self, ip: Ipv4Addr, stream: TcpStream) {
        if self.peers.contains_key(&ip) {
            info!("Peer {} reconnected, replacing the previous connection", ip);
            self.teardown(ip);
        }
        match PeerConnection::new(ip, stream) {
            Ok(peer) => {
                info!("Peer {} connected", ip);
                self.peers.insert(ip, peer);
                self.sink.on_new_client(ip);
            }
            Err(e) => warn!("Could not configure socket for {}: {}", ip, e),
        }
    }

    fn service_peer(&mut self, ip: Ipv4Addr, revents: PollFlags) {
        if revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
            let Some(peer) = self.peers.get_mut(&ip) else {
                return;
            };
            match peer.receive(&mut self.scratch) {
                Ok(ReadOutcome::Packets(packets)) => {
                    for packet in packets {
                        debug!("Event {} from {}", packet.event_code, ip);
                        self.sink.on_packet(ip, packet);
                    }
                }
                Ok(ReadOutcome::Closed) => {
                    self.teardown(ip);
                    return;
                }
                Err(e) => {
                    self.drop_on_error(ip, e);
                    return;
                }
            }
        }
        if revents.contains(PollFlags::POLLNVAL) {
            self.teardown(ip);
            return;
        }
        if revents.contains(PollFlags::POLLOUT) {
            if let Err(e) = self.send_next(ip) {
                self.drop_on_error(ip, e);
            }
        }
    }

    /// Moves at most one queued payload into the peer's transmit buffer and
    /// writes what the socket accepts.
    fn send_next(&mut self, ip: Ipv4Addr) -> io::Result<()> {
        let Some(peer) = self.peers.get_mut(&ip) else {
            return Ok(());
        };
        if !peer.has_pending() {
            if let Some(payload) = self.queues.try_next(ip) {
                match payload.encode() {
                    Ok(frame) => peer.queue_frame(&frame),
                    Err(e) => {
                        error!(
                            "Dropping outbound event {} for {}: {}",
                            payload.event_code, ip, e
                        );
                        return Ok(());
                    }
                }
            }
        }
        peer.flush().map(|_| ())
    }

    fn drop_on_error(&mut self, ip: Ipv4Addr, source: io::Error) {
        warn!("{}", DispatchError::Transport { peer: ip, source });
        self.teardown(ip);
    }

    fn teardown(&mut self, ip: Ipv4Addr) {
        if let Some(peer) = self.peers.remove(&ip) {
            let stats = peer.framer_stats();
            info!(
                "Peer {} disconnected after {:?} ({} packets, {} bad CRC)",
                ip,
                peer.connected_at().elapsed(),
                stats.packets,
                stats.bad_crc
            );
            drop(peer);
            self.sink.on_client_left(ip);
        }
        if self.peers.is_empty() {
            self.last_ping = None;
            if let Role::Initiator { .. } = self.settings.role {
                self.state = LinkState::Unconnected;
            }
        }
    }
}

/// Connects with a bounded wait, binding `local` first when given.
fn connect_stream(
    remote: SocketAddrV4,
    local: Option<SocketAddrV4>,
    timeout: Duration,
) -> io::Result<TcpStream> {
    let fd = socket::socket(
        AddressFamily::Inet,
        SockType::Stream,
        SockFlag::SOCK_NONBLOCK | SockFlag::SOCK_CLOEXEC,
        None,
    )?;
    if let Some(local) = local {
        socket::bind(fd.as_raw_fd(), &SockaddrIn::from(local))?;
    }
    match socket::connect(fd.as_raw_fd(), &SockaddrIn::from(remote)) {
        Ok(()) | Err(Errno::EINPROGRESS) => {}
        Err(e) => return Err(e.into()),
    }

    let stream = TcpStream::from(fd);
    let mut fds = [PollFd::new(&stream, PollFlags::POLLOUT)];
    if poll(&mut fds, timeout.as_millis() as i32)? == 0 {
        return Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out"));
    }
    if let Some(e) = stream.take_error()? {
        return Err(e);
    }
    stream.peer_addr()?;
    Ok(stream)
}

/// Sleeps for `duration` in short slices, returning early once `stop` is set.
fn idle(stop: &AtomicBool, duration: Duration) {
    let deadline = Instant::now() + duration;
    while !stop.load(Ordering::Relaxed) {
        let now = Instant::now();
        if now >= deadline {
            break;
        }
        thread::sleep((deadline - now).min(Duration::from_millis(20)));
    }
}
