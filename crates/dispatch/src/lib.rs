//! Socket-side dispatch for the lab link.
//!
//! - [`multiplexer`]: the TCP event channel, acceptor or initiator role.
//! - [`ingest`]: the UDP amplifier sample stream.
//! - [`outbound`]: per-peer queues collaborators push payloads into.
//! - [`handle`]: worker threads and their stop handles.
//!
//! Decoded traffic leaves through a [`bci_types::DispatchSink`].

pub mod error;
pub mod handle;
pub mod ingest;
pub mod mock_amp;
pub mod multiplexer;
pub mod outbound;
pub mod peer;

pub use error::DispatchError;
pub use handle::{DispatcherHandle, TcpDispatcher, UdpDispatcher};
pub use ingest::{lost_between, IngestStats, SampleAssembler, UdpIngest};
pub use mock_amp::{BatchSource, EegGenerator};
pub use multiplexer::{LinkSettings, LinkState, Role, SocketMultiplexer};
pub use outbound::OutboundQueues;
pub use peer::PeerConnection;
