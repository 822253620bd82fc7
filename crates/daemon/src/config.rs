use std::collections::HashSet;
use std::path::Path;

use bci_types::LinkConfig;
use dispatch::multiplexer::{MAX_POLL_TIMEOUT, MAX_RECONNECT_BACKOFF};
use log::info;
use thiserror::Error;

/// A configuration file the daemon cannot start with.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read configuration file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse configuration file '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Reads, parses and validates the link configuration at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<LinkConfig, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    let config: LinkConfig = serde_json::from_str(&contents).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })?;
    validate(&config)?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Largest batch whose record still fits a single IPv4 UDP datagram.
const MAX_BATCH_CODES: usize = (MAX_UDP_PAYLOAD - 5) / 2;
const MAX_UDP_PAYLOAD: usize = 65_507;

pub fn validate(config: &LinkConfig) -> Result<(), ConfigError> {
    let adc = &config.adc;
    if adc.sampling_rate == 0 {
        return Err(invalid("adc.sampling_rate must be positive"));
    }
    if adc.channels == 0 {
        return Err(invalid("adc.channels must be positive"));
    }
    if adc.range.is_nan() || adc.range <= 0.0 {
        return Err(invalid("adc.range must be positive"));
    }
    if adc.vref.is_nan() || adc.vref <= 0.0 {
        return Err(invalid("adc.vref must be positive"));
    }
    if config.dataset.batch_samples == 0 {
        return Err(invalid("dataset.batch_samples must be positive"));
    }
    let codes = adc.channels.checked_mul(config.dataset.batch_samples as usize);
    if codes.map_or(true, |n| n > MAX_BATCH_CODES) {
        return Err(ConfigError::Invalid(format!(
            "adc.channels x dataset.batch_samples must not exceed {} to fit one UDP datagram",
            MAX_BATCH_CODES
        )));
    }

    let tcp = &config.network.tcp_dispatcher;
    if tcp.poll_timeout() > MAX_POLL_TIMEOUT {
        return Err(ConfigError::Invalid(format!(
            "tcp_dispatcher.poll_timeout_ms must not exceed {} ms",
            MAX_POLL_TIMEOUT.as_millis()
        )));
    }
    if tcp.reconnect_backoff() > MAX_RECONNECT_BACKOFF {
        return Err(ConfigError::Invalid(format!(
            "tcp_dispatcher.reconnect_backoff_ms must not exceed {} ms",
            MAX_RECONNECT_BACKOFF.as_millis()
        )));
    }

    if tcp.abonents.is_empty() {
        return Err(invalid("tcp_dispatcher.abonents must list at least one peer"));
    }
    let mut names = HashSet::new();
    let mut ips = HashSet::new();
    for abonent in &tcp.abonents {
        if abonent.name.trim().is_empty() {
            return Err(invalid("abonent names must not be empty"));
        }
        if !names.insert(abonent.name.to_ascii_lowercase()) {
            return Err(ConfigError::Invalid(format!(
                "abonent name '{}' is listed twice",
                abonent.name
            )));
        }
        if !ips.insert(abonent.ip) {
            return Err(ConfigError::Invalid(format!(
                "abonent ip {} is listed twice",
                abonent.ip
            )));
        }
    }
    Ok(())
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
