//! Per-peer outbound FIFOs shared between collaborators and the multiplexer.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use bci_types::Abonent;
use log::trace;
use protocol::OutboundPayload;

use crate::error::DispatchError;

#[derive(Debug)]
struct Queue {
    name: String,
    tx: flume::Sender<OutboundPayload>,
    rx: flume::Receiver<OutboundPayload>,
}

/// Registry of outbound queues keyed by peer IP.
///
/// The peer set is fixed at construction. Cloning shares the queues, so the
/// multiplexer and any number of producers can hold one each.
#[derive(Debug, Clone, Default)]
pub struct OutboundQueues {
    queues: Arc<BTreeMap<Ipv4Addr, Queue>>,
}

impl OutboundQueues {
    pub fn new<I, S>(peers: I) -> Self
    where
        I: IntoIterator<Item = (S, Ipv4Addr)>,
        S: Into<String>,
    {
        let mut queues = BTreeMap::new();
        for (name, ip) in peers {
            let (tx, rx) = flume::unbounded();
            queues.insert(
                ip,
                Queue {
                    name: name.into(),
                    tx,
                    rx,
                },
            );
        }
        Self {
            queues: Arc::new(queues),
        }
    }

    /// One queue per configured abonent.
    pub fn from_abonents(abonents: &[Abonent]) -> Self {
        Self::new(abonents.iter().map(|a| (a.name.clone(), a.ip)))
    }

    /// The single queue of an initiator, addressed to its server.
    pub fn for_server(ip: Ipv4Addr) -> Self {
        Self::new([("server", ip)])
    }

    pub fn enqueue(&self, ip: Ipv4Addr, payload: OutboundPayload) -> Result<(), DispatchError> {
        let queue = self
            .queues
            .get(&ip)
            .ok_or_else(|| DispatchError::UnknownPeer(ip.to_string()))?;
        trace!("Queueing event {} for {}", payload.event_code, ip);
        queue
            .tx
            .send(payload)
            .map_err(|_| DispatchError::QueueClosed(ip))
    }

    /// Enqueues for the peer registered under `name`, ignoring ASCII case.
    pub fn enqueue_by_name(&self, name: &str, payload: OutboundPayload) -> Result<(), DispatchError> {
        let ip = self
            .ip_of(name)
            .ok_or_else(|| DispatchError::UnknownPeer(name.to_string()))?;
        self.enqueue(ip, payload)
    }

    /// Builds a payload sized to `data` and enqueues it for the peer named
    /// `name`. Payloads that cannot be framed are rejected here, before they
    /// reach the event loop.
    pub fn send_event(
        &self,
        name: &str,
        event_code: u8,
        event_iter: u8,
        event_bits: u8,
        data: Vec<u32>,
    ) -> Result<(), DispatchError> {
        let payload = OutboundPayload::new(event_code, event_iter, event_bits, data)?;
        self.enqueue_by_name(name, payload)
    }

    /// Non-blocking pop, `None` for an empty queue or an unknown peer.
    pub fn try_next(&self, ip: Ipv4Addr) -> Option<OutboundPayload> {
        self.queues.get(&ip)?.rx.try_recv().ok()
    }

    pub fn has_pending(&self, ip: Ipv4Addr) -> bool {
        self.queues.get(&ip).map_or(false, |q| !q.rx.is_empty())
    }

    pub fn pending(&self, ip: Ipv4Addr) -> usize {
        self.queues.get(&ip).map_or(0, |q| q.rx.len())
    }

    pub fn ip_of(&self, name: &str) -> Option<Ipv4Addr> {
        self.queues
            .iter()
            .find(|(_, q)| q.name.eq_ignore_ascii_case(name))
            .map(|(ip, _)| *ip)
    }

    pub fn name_of(&self, ip: Ipv4Addr) -> Option<&str> {
        self.queues.get(&ip).map(|q| q.name.as_str())
    }

    pub fn peers(&self) -> impl Iterator<Item = (&str, Ipv4Addr)> + '_ {
        self.queues.iter().map(|(ip, q)| (q.name.as_str(), *ip))
    }
}
