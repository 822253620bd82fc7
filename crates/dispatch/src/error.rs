use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};

use protocol::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the dispatch loops and their control APIs.
///
/// Per-peer failures (`Transport`) and connect failures (`Connect`) are
/// recovered inside the loops; they are returned from the single-step APIs
/// so callers and tests can observe them.
#[derive(Error, Debug)]
pub enum DispatchError {
    /// The initiator could not reach its server
    #[error("Connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddrV4,
        #[source]
        source: io::Error,
    },
    /// A socket-level failure on one peer
    #[error("Transport error on peer {peer}: {source}")]
    Transport {
        peer: Ipv4Addr,
        #[source]
        source: io::Error,
    },
    /// Setup failures such as binding a listening socket
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("Unknown peer: {0}")]
    UnknownPeer(String),
    #[error("Outbound queue for {0} is closed")]
    QueueClosed(Ipv4Addr),
    #[error("Poll failed: {0}")]
    Poll(#[from] nix::Error),
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("Failed to spawn {name} thread: {source}")]
    ThreadSpawn {
        name: String,
        #[source]
        source: io::Error,
    },
}
