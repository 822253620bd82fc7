//! Event codes of the TCP channel and the events handed to collaborators.
//!
//! The dispatch loops never call into a GUI, game or recorder directly. They
//! produce [`DispatchEvent`]s through a [`DispatchSink`], which is implemented
//! for a `flume::Sender` so a consumer on any thread (or async runtime) can
//! bind to it.

use std::net::Ipv4Addr;

use log::debug;

use crate::data::{Packet, SampleBatch};

/// Message kinds carried in the `event_code` byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventCode {
    Up = 1,
    Down = 2,
    Left = 3,
    Right = 4,
    Start = 5,
    Stop = 6,
    GameOver = 7,
    NewClient = 12,
    DelClient = 13,
    Ping = 14,
}

impl EventCode {
    /// Game moves produced by the player.
    pub fn is_move(self) -> bool {
        matches!(
            self,
            EventCode::Up | EventCode::Down | EventCode::Left | EventCode::Right
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            EventCode::Up => "UP",
            EventCode::Down => "DOWN",
            EventCode::Left => "LEFT",
            EventCode::Right => "RIGHT",
            EventCode::Start => "START",
            EventCode::Stop => "STOP",
            EventCode::GameOver => "GAMEOVER",
            EventCode::NewClient => "NEW_CLIENT",
            EventCode::DelClient => "DEL_CLIENT",
            EventCode::Ping => "PING",
        }
    }
}

impl TryFrom<u8> for EventCode {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => EventCode::Up,
            2 => EventCode::Down,
            3 => EventCode::Left,
            4 => EventCode::Right,
            5 => EventCode::Start,
            6 => EventCode::Stop,
            7 => EventCode::GameOver,
            12 => EventCode::NewClient,
            13 => EventCode::DelClient,
            14 => EventCode::Ping,
            other => return Err(other),
        })
    }
}

impl From<EventCode> for u8 {
    fn from(code: EventCode) -> Self {
        code as u8
    }
}

/// Everything the core reports to collaborators.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    /// A peer connected (acceptor) or the server was reached (initiator).
    NewClient(Ipv4Addr),
    /// A peer disconnected or was torn down after a socket error.
    ClientLeft(Ipv4Addr),
    /// A CRC-valid packet decoded from a peer's byte stream.
    Packet { peer: Ipv4Addr, packet: Packet },
    /// An accepted, non-duplicate amplifier batch.
    SampleBatch(SampleBatch),
}

impl DispatchEvent {
    /// Event code this event corresponds to on the wire. Sample batches travel
    /// over UDP and have none.
    pub fn event_code(&self) -> Option<u8> {
        match self {
            DispatchEvent::NewClient(_) => Some(EventCode::NewClient as u8),
            DispatchEvent::ClientLeft(_) => Some(EventCode::DelClient as u8),
            DispatchEvent::Packet { packet, .. } => Some(packet.event_code),
            DispatchEvent::SampleBatch(_) => None,
        }
    }

    pub fn event_type_name(&self) -> &'static str {
        match self {
            DispatchEvent::NewClient(_) => "NewClient",
            DispatchEvent::ClientLeft(_) => "ClientLeft",
            DispatchEvent::Packet { .. } => "Packet",
            DispatchEvent::SampleBatch(_) => "SampleBatch",
        }
    }
}

/// Receiver side of the collaborator boundary.
///
/// Only [`DispatchSink::dispatch`] is required; the typed hooks default to
/// wrapping their arguments into a [`DispatchEvent`].
pub trait DispatchSink: Send {
    fn dispatch(&mut self, event: DispatchEvent);

    fn on_new_client(&mut self, ip: Ipv4Addr) {
        self.dispatch(DispatchEvent::NewClient(ip));
    }

    fn on_client_left(&mut self, ip: Ipv4Addr) {
        self.dispatch(DispatchEvent::ClientLeft(ip));
    }

    fn on_packet(&mut self, peer: Ipv4Addr, packet: Packet) {
        self.dispatch(DispatchEvent::Packet { peer, packet });
    }

    fn on_sample_batch(&mut self, batch: SampleBatch) {
        self.dispatch(DispatchEvent::SampleBatch(batch));
    }
}

impl DispatchSink for flume::Sender<DispatchEvent> {
    fn dispatch(&mut self, event: DispatchEvent) {
        let name = event.event_type_name();
        if self.send(event).is_err() {
            debug!("Event receiver dropped, discarding {} event", name);
        }
    }
}

impl<S: DispatchSink + ?Sized> DispatchSink for Box<S> {
    fn dispatch(&mut self, event: DispatchEvent) {
        (**self).dispatch(event)
    }
}
