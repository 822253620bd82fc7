//! Worker threads for the two dispatch loops.

use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use bci_types::{DispatchSink, LinkConfig};
use log::{error, info};

use crate::error::DispatchError;
use crate::ingest::{SampleAssembler, UdpIngest};
use crate::multiplexer::{LinkSettings, Role, SocketMultiplexer};
use crate::outbound::OutboundQueues;

/// A running dispatch loop. Dropping the handle stops it.
#[derive(Debug)]
pub struct DispatcherHandle {
    name: &'static str,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
    local_addr: Option<SocketAddr>,
}

impl DispatcherHandle {
    fn spawn<F>(name: &'static str, local_addr: Option<SocketAddr>, body: F) -> Result<Self, DispatchError>
    where
        F: FnOnce(Arc<AtomicBool>) + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = stop.clone();
        let thread = thread::Builder::new()
            .name(name.into())
            .spawn(move || body(thread_stop))
            .map_err(|source| DispatchError::ThreadSpawn {
                name: name.to_string(),
                source,
            })?;
        info!("Started {} thread", name);
        Ok(Self {
            name,
            stop,
            thread: Some(thread),
            local_addr,
        })
    }

    /// Bound address of the listening socket, when the loop has one.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().map_or(false, |t| !t.is_finished())
    }

    /// Signals the loop and waits for its thread to exit.
    pub fn stop(mut self) {
        self.halt();
    }

    fn halt(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(thread) = self.thread.take() {
            info!("Waiting for {} thread to join...", self.name);
            if let Err(e) = thread.join() {
                error!("{} thread panicked: {:?}", self.name, e);
            }
            info!("{} thread joined.", self.name);
        }
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.halt();
    }
}

pub struct TcpDispatcher;

impl TcpDispatcher {
    /// Starts the event-channel loop. An acceptor binds before this returns so
    /// bind failures surface here; an initiator connects from its thread and
    /// keeps retrying until stopped.
    pub fn start<S>(
        settings: LinkSettings,
        queues: OutboundQueues,
        sink: S,
    ) -> Result<DispatcherHandle, DispatchError>
    where
        S: DispatchSink + 'static,
    {
        let mut mux = SocketMultiplexer::new(settings, queues, sink);
        let mut local_addr = None;
        if let Role::Acceptor { .. } = mux.role() {
            mux.setup()?;
            local_addr = mux.local_addr();
        }
        DispatcherHandle::spawn("tcp_dispatcher", local_addr, move |stop| mux.run(&stop))
    }
}

pub struct UdpDispatcher;

impl UdpDispatcher {
    pub fn start<S>(
        bind: SocketAddrV4,
        assembler: SampleAssembler,
        mut sink: S,
    ) -> Result<DispatcherHandle, DispatchError>
    where
        S: DispatchSink + 'static,
    {
        let mut ingest = UdpIngest::bind(bind, assembler)?;
        let local_addr = ingest.local_addr().ok();
        DispatcherHandle::spawn("udp_dispatcher", local_addr, move |stop| {
            ingest.run(&stop, &mut sink)
        })
    }

    /// Sample ingest on the configured endpoint with the configured scaling.
    pub fn from_config<S>(config: &LinkConfig, sink: S) -> Result<DispatcherHandle, DispatchError>
    where
        S: DispatchSink + 'static,
    {
        let assembler = SampleAssembler::from_config(&config.adc, config.dataset.batch_samples);
        Self::start(config.network.udp_dispatcher.socket_addr(), assembler, sink)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bci_types::DispatchEvent;
    use std::net::Ipv4Addr;
    use std::time::{Duration, Instant};

    #[test]
    fn test_stop_joins_worker() {
        let (tx, _rx) = flume::unbounded::<DispatchEvent>();
        let settings = LinkSettings::new(Role::Acceptor {
            bind: SocketAddrV4::new(Ipv4Addr::LOCALHOST, 0),
        });
        let handle = TcpDispatcher::start(settings, OutboundQueues::default(), tx).unwrap();
        assert!(handle.local_addr().is_some());
        assert!(handle.is_running());

        let started = Instant::now();
        handle.stop();
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_bind_conflict_is_reported() {
        let (tx, _rx) = flume::unbounded::<DispatchEvent>();
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let settings = LinkSettings::new(Role::Acceptor {
            bind: SocketAddrV4::new(Ipv4Addr::LOCALHOST, port),
        });
        assert!(matches!(
            TcpDispatcher::start(settings, OutboundQueues::default(), tx),
            Err(DispatchError::Io(_))
        ));
    }
}
