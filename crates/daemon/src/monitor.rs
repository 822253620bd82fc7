//! Headless link status: who is connected, the latest game score and the
//! lost-batch count over a rolling window.

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use bci_types::{Abonent, DispatchEvent, EventCode, LinkConfig, Packet, SampleBatch};
use log::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowReport {
    pub batches: u32,
    pub lost: u32,
}

#[derive(Debug)]
pub struct LinkMonitor {
    names: BTreeMap<Ipv4Addr, String>,
    connected: BTreeSet<Ipv4Addr>,
    last_move: Option<EventCode>,
    last_score: Option<u32>,
    game_over: bool,
    window_size: u32,
    window_batches: u32,
    window_lost: u32,
    last_window: Option<WindowReport>,
}

impl LinkMonitor {
    pub fn new(config: &LinkConfig) -> Self {
        Self::with_abonents(
            &config.network.tcp_dispatcher.abonents,
            config.batches_per_window(),
        )
    }

    pub fn with_abonents(abonents: &[Abonent], window_size: u32) -> Self {
        Self {
            names: abonents.iter().map(|a| (a.ip, a.name.clone())).collect(),
            connected: BTreeSet::new(),
            last_move: None,
            last_score: None,
            game_over: false,
            window_size: window_size.max(1),
            window_batches: 0,
            window_lost: 0,
            last_window: None,
        }
    }

    /// Name an IP is known by, or the address itself.
    pub fn display_name(&self, ip: Ipv4Addr) -> String {
        self.names
            .get(&ip)
            .cloned()
            .unwrap_or_else(|| ip.to_string())
    }

    pub fn is_connected(&self, name: &str) -> bool {
        self.names
            .iter()
            .any(|(ip, n)| n.eq_ignore_ascii_case(name) && self.connected.contains(ip))
    }

    pub fn connected(&self) -> Vec<String> {
        self.connected.iter().map(|ip| self.display_name(*ip)).collect()
    }

    pub fn last_move(&self) -> Option<EventCode> {
        self.last_move
    }

    pub fn last_score(&self) -> Option<u32> {
        self.last_score
    }

    pub fn game_over(&self) -> bool {
        self.game_over
    }

    /// Lost batches counted so far in the current window.
    pub fn window_lost(&self) -> u32 {
        self.window_lost
    }

    pub fn last_window(&self) -> Option<WindowReport> {
        self.last_window
    }

    pub fn observe(&mut self, event: &DispatchEvent) {
        match event {
            DispatchEvent::NewClient(ip) => {
                self.connected.insert(*ip);
                info!("{} connected", self.display_name(*ip));
            }
            DispatchEvent::ClientLeft(ip) => {
                if self.connected.remove(ip) {
                    info!("{} disconnected", self.display_name(*ip));
                }
            }
            DispatchEvent::Packet { peer, packet } => self.observe_packet(*peer, packet),
            DispatchEvent::SampleBatch(batch) => self.observe_batch(batch),
        }
    }

    fn observe_packet(&mut self, peer: Ipv4Addr, packet: &Packet) {
        match packet.code() {
            Some(code) if code.is_move() => {
                self.last_move = Some(code);
                if let Some(score) = packet.first() {
                    if self.last_score != Some(score) {
                        info!("Score: {}", score);
                    }
                    self.last_score = Some(score);
                }
            }
            Some(EventCode::Start) => {
                self.game_over = false;
                info!("{} started the game", self.display_name(peer));
            }
            Some(EventCode::GameOver) => {
                self.game_over = true;
                info!("Game over, final score {:?}", self.last_score);
            }
            Some(code) => debug!("{} from {}", code.name(), self.display_name(peer)),
            None => warn!(
                "Unknown event code {} from {}",
                packet.event_code,
                self.display_name(peer)
            ),
        }
    }

    /// The window opens on the first batch reporting a loss and closes
    /// `window_size` batches later. Lossless batches leave a closed window shut.
    fn observe_batch(&mut self, batch: &SampleBatch) {
        if self.window_lost == 0 {
            self.window_batches = 0;
        }
        self.window_lost = self.window_lost.saturating_add(batch.lost_packets);
        self.window_batches = (self.window_batches + 1) % self.window_size;
        if self.window_batches != 0 {
            return;
        }

        let report = WindowReport {
            batches: self.window_size,
            lost: self.window_lost,
        };
        if self.last_window.map(|w| w.lost) != Some(report.lost) {
            info!("Lost packets: {} in the last {} batches", report.lost, report.batches);
        }
        self.last_window = Some(report);
        self.window_lost = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abonents() -> Vec<Abonent> {
        vec![Abonent {
            name: "game".to_string(),
            ip: Ipv4Addr::new(10, 0, 0, 2),
            port: 45002,
        }]
    }

    fn batch(lost: u32) -> DispatchEvent {
        DispatchEvent::SampleBatch(SampleBatch {
            counter: 0,
            lost_packets: lost,
            channels: vec![vec![0.0; 4]],
        })
    }

    #[test]
    fn test_connection_tracking() {
        let game = Ipv4Addr::new(10, 0, 0, 2);
        let mut monitor = LinkMonitor::with_abonents(&abonents(), 10);

        monitor.observe(&DispatchEvent::NewClient(game));
        monitor.observe(&DispatchEvent::NewClient(Ipv4Addr::new(10, 0, 0, 9)));
        assert!(monitor.is_connected("GAME"));
        assert_eq!(monitor.connected(), vec!["game", "10.0.0.9"]);

        monitor.observe(&DispatchEvent::ClientLeft(game));
        assert!(!monitor.is_connected("game"));
    }

    #[test]
    fn test_score_follows_moves() {
        let game = Ipv4Addr::new(10, 0, 0, 2);
        let mut monitor = LinkMonitor::with_abonents(&abonents(), 10);

        monitor.observe(&DispatchEvent::Packet {
            peer: game,
            packet: Packet::new(EventCode::Left as u8, 0, 32, vec![128]),
        });
        assert_eq!(monitor.last_score(), Some(128));
        assert_eq!(monitor.last_move(), Some(EventCode::Left));

        // Pings carry no score
        monitor.observe(&DispatchEvent::Packet {
            peer: game,
            packet: Packet::new(EventCode::Ping as u8, 0, 8, vec![]),
        });
        assert_eq!(monitor.last_score(), Some(128));

        monitor.observe(&DispatchEvent::Packet {
            peer: game,
            packet: Packet::new(EventCode::GameOver as u8, 0, 8, vec![]),
        });
        assert!(monitor.game_over());
    }

    #[test]
    fn test_lost_window_opens_on_first_loss() {
        let mut monitor = LinkMonitor::with_abonents(&abonents(), 3);

        // Lossless batches do not start a window
        monitor.observe(&batch(0));
        monitor.observe(&batch(0));
        monitor.observe(&batch(0));
        assert_eq!(monitor.window_lost(), 0);
        assert!(monitor.last_window().is_none());

        monitor.observe(&batch(2));
        monitor.observe(&batch(0));
        assert_eq!(monitor.window_lost(), 2);
        assert!(monitor.last_window().is_none());

        monitor.observe(&batch(1));
        assert_eq!(monitor.window_lost(), 0);
        assert_eq!(
            monitor.last_window(),
            Some(WindowReport { batches: 3, lost: 3 })
        );

        // The next window opens with this loss and runs three batches from here
        monitor.observe(&batch(0));
        assert_eq!(monitor.window_lost(), 0);
        monitor.observe(&batch(4));
        monitor.observe(&batch(0));
        assert_eq!(monitor.window_lost(), 4);
        assert_eq!(monitor.last_window().map(|w| w.lost), Some(3));
        monitor.observe(&batch(0));
        assert_eq!(monitor.window_lost(), 0);
        assert_eq!(
            monitor.last_window(),
            Some(WindowReport { batches: 3, lost: 4 })
        );
    }
}
