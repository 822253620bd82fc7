pub mod config;
pub mod game;
pub mod monitor;

pub use config::{load_config, ConfigError};
pub use game::{CommandError, MoveCommand};
pub use monitor::{LinkMonitor, WindowReport};
