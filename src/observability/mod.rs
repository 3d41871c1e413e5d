//! Observability: structured logging and operational HTTP endpoints

pub mod logging;
pub mod stats;

pub use logging::{init_default_logging, init_logging, LogFormat};
pub use stats::StatsServer;
