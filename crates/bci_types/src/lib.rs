//! Shared types for the BCI link: decoded packets, amplifier sample batches,
//! the events handed to collaborators, and the link configuration.

pub mod config;
pub mod data;
pub mod event;

pub use config::*;
pub use data::{Packet, SampleBatch};
pub use event::{DispatchEvent, DispatchSink, EventCode};
