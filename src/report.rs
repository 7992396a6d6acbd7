//! Outcome reporting
//!
//! The engine reports every per-file and per-repository outcome through a
//! [`Reporter`] handed to it at construction, so callers decide where the
//! messages go. [`TracingReporter`] forwards them to `tracing`.

use tracing::Level;

/// Sink for leveled engine messages
pub trait Reporter: Send + Sync {
    fn report(&self, level: Level, message: &str);
}

/// Forwards messages to the global `tracing` subscriber
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn report(&self, level: Level, message: &str) {
        match level {
            Level::ERROR => tracing::error!("{}", message),
            Level::WARN => tracing::warn!("{}", message),
            Level::INFO => tracing::info!("{}", message),
            Level::DEBUG => tracing::debug!("{}", message),
            _ => tracing::trace!("{}", message),
        }
    }
}
