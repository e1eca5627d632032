//! Activation logging infrastructure.
//!
//! Provides traits and implementations for logging constraint activation
//! transitions as they are recorded.

use crate::registry::ActivationEvent;

/// Trait for activation loggers.
pub trait ActivationLogger: Send + Sync + std::fmt::Debug {
    /// Log one activation transition.
    fn log(&self, event: &ActivationEvent);
}

/// A logger that writes events to stdout as JSON lines.
///
/// Suitable for containerized environments where logs are scraped by an
/// external agent.
#[derive(Debug, Default)]
pub struct StdoutLogger;

impl StdoutLogger {
    pub fn new() -> Self {
        Self
    }
}

impl ActivationLogger for StdoutLogger {
    fn log(&self, event: &ActivationEvent) {
        if let Ok(json) = serde_json::to_string(event) {
            println!("{}", json);
        } else {
            eprintln!("Failed to serialize activation event: {:?}", event);
        }
    }
}

/// A logger that does nothing (for testing or when logging is disabled).
#[derive(Debug, Default)]
pub struct NoOpLogger;

impl ActivationLogger for NoOpLogger {
    fn log(&self, _event: &ActivationEvent) {}
}
