//! Configuration types shared by the dispatch loops and the daemon.
//!
//! The layout mirrors the lab rig's `config.json`: an `adc` block describing
//! the amplifier, a `dataset` block describing the batch cadence and a
//! `network` block with both dispatcher endpoints.

use std::net::{Ipv4Addr, SocketAddrV4};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Top-level link configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct LinkConfig {
    #[serde(default)]
    pub adc: AdcConfig,
    #[serde(default)]
    pub dataset: DatasetConfig,
    #[serde(default)]
    pub network: NetworkConfig,
}

impl LinkConfig {
    /// Number of UDP batches in one `sampling_time` window.
    pub fn batches_per_window(&self) -> u32 {
        let samples = self.adc.sampling_rate.saturating_mul(self.dataset.sampling_time);
        (samples / self.dataset.batch_samples.max(1)).max(1)
    }
}

/// Amplifier description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdcConfig {
    /// Sample rate in Hz
    pub sampling_rate: u32,
    /// ADC resolution in bits
    pub resolution: u8,
    /// Number of interleaved channels in a batch
    pub channels: usize,
    /// Full-scale input range in volts
    pub range: f32,
    /// Reference voltage in volts
    pub vref: f32,
}

impl AdcConfig {
    /// Converts a signed 16-bit sample code to volts.
    pub fn code_to_volts(&self, code: i16) -> f32 {
        (self.range * code as f32) / ((32768.0 * self.vref) / 2.5)
    }
}

impl Default for AdcConfig {
    fn default() -> Self {
        Self {
            sampling_rate: 2000,
            resolution: 16,
            channels: 5,
            range: 5.0,
            vref: 2.5,
        }
    }
}

/// Batch cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetConfig {
    /// Samples per channel in one UDP batch
    pub batch_samples: u32,
    /// Seconds covered by one lost-packet accounting window
    #[serde(default = "default_sampling_time")]
    pub sampling_time: u32,
}

fn default_sampling_time() -> u32 { 1 }

impl Default for DatasetConfig {
    fn default() -> Self {
        Self {
            batch_samples: 80,
            sampling_time: default_sampling_time(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub ip: Ipv4Addr,
    pub port: u16,
}

impl Endpoint {
    pub fn new(ip: Ipv4Addr, port: u16) -> Self {
        Self { ip, port }
    }

    pub fn socket_addr(&self) -> SocketAddrV4 {
        SocketAddrV4::new(self.ip, self.port)
    }
}

/// A named peer the acceptor expects to hear from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Abonent {
    pub name: String,
    pub ip: Ipv4Addr,
    pub port: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TcpDispatcherConfig {
    pub server_ip: Ipv4Addr,
    pub server_port: u16,
    /// Peers of the acceptor role
    #[serde(default)]
    pub abonents: Vec<Abonent>,
    /// Local endpoint the initiator binds before connecting
    #[serde(default)]
    pub abonent: Option<Endpoint>,
    /// Readiness wait per loop iteration
    #[serde(default = "default_poll_timeout_ms")]
    pub poll_timeout_ms: u64,
    /// Delay between failed connection attempts
    #[serde(default = "default_reconnect_backoff_ms")]
    pub reconnect_backoff_ms: u64,
    /// Minimum spacing of keepalive pings, 0 pings every iteration
    #[serde(default)]
    pub keepalive_interval_ms: u64,
}

fn default_poll_timeout_ms() -> u64 { 10 }
fn default_reconnect_backoff_ms() -> u64 { 1000 }

impl TcpDispatcherConfig {
    pub fn server(&self) -> Endpoint {
        Endpoint::new(self.server_ip, self.server_port)
    }

    /// Abonent lookup by name, ignoring ASCII case.
    pub fn abonent_by_name(&self, name: &str) -> Option<&Abonent> {
        self.abonents
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }
}

impl Default for TcpDispatcherConfig {
    fn default() -> Self {
        Self {
            server_ip: Ipv4Addr::LOCALHOST,
            server_port: 45000,
            abonents: vec![Abonent {
                name: "game".to_string(),
                ip: Ipv4Addr::LOCALHOST,
                port: 45002,
            }],
            abonent: None,
            poll_timeout_ms: default_poll_timeout_ms(),
            reconnect_backoff_ms: default_reconnect_backoff_ms(),
            keepalive_interval_ms: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    pub udp_dispatcher: Endpoint,
    pub tcp_dispatcher: TcpDispatcherConfig,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            udp_dispatcher: Endpoint::new(Ipv4Addr::UNSPECIFIED, 45001),
            tcp_dispatcher: TcpDispatcherConfig::default(),
        }
    }
}
