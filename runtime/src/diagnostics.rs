//! Built-in diagnostics sinks.
//!
//! - [`TracingSink`]: logs every entry as a structured `tracing` event
//! - [`ChannelSink`]: forwards entries to an async consumer
//!
//! Sinks are attached with [`Engine::add_sink`](crate::Engine::add_sink).
//! [`EngineConfig`](crate::EngineConfig) installs a [`TracingSink`] on each
//! stream by default.

use reactive_context_core::{Action, DiagnosticEntry, DiagnosticsSink, SinkError};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::Level;

type Predicate<S> = Arc<dyn Fn(&Action<S>) -> bool + Send + Sync>;

/// Emit a `tracing` event at a level chosen at runtime
macro_rules! event_at {
    ($level:expr, $($rest:tt)+) => {
        match $level {
            Level::ERROR => tracing::error!(target: "reactive_context::actions", $($rest)+),
            Level::WARN => tracing::warn!(target: "reactive_context::actions", $($rest)+),
            Level::INFO => tracing::info!(target: "reactive_context::actions", $($rest)+),
            Level::DEBUG => tracing::debug!(target: "reactive_context::actions", $($rest)+),
            _ => tracing::trace!(target: "reactive_context::actions", $($rest)+),
        }
    };
}

/// Logs diagnostic entries through `tracing`
///
/// Each entry becomes one event on the `reactive_context::actions` target with
/// the action type, payload, submit time, elapsed time, flags, and handler
/// error as fields. Filter it with `RUST_LOG=reactive_context::actions=debug`.
pub struct TracingSink<S> {
    level: Level,
    predicate: Option<Predicate<S>>,
}

impl<S> TracingSink<S> {
    /// Log every entry at `level`
    #[must_use]
    pub const fn new(level: Level) -> Self {
        Self {
            level,
            predicate: None,
        }
    }

    /// Only log actions for which `predicate` returns true
    #[must_use]
    pub fn with_predicate<F>(mut self, predicate: F) -> Self
    where
        F: Fn(&Action<S>) -> bool + Send + Sync + 'static,
    {
        self.predicate = Some(Arc::new(predicate));
        self
    }
}

impl<S> fmt::Debug for TracingSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TracingSink")
            .field("level", &self.level)
            .field("filtered", &self.predicate.is_some())
            .finish()
    }
}

impl<S> DiagnosticsSink<S> for TracingSink<S> {
    fn record(&self, entry: &DiagnosticEntry<S>) -> Result<(), SinkError> {
        if self.predicate.as_ref().is_some_and(|keep| !keep(&entry.action)) {
            return Ok(());
        }

        let flags: Vec<String> = entry.flags().iter().map(ToString::to_string).collect();
        let started_time = entry.started_time.map(|t| t.to_rfc3339());
        #[allow(clippy::cast_possible_truncation)]
        let took_us = entry.took.as_micros() as u64;

        match &entry.error {
            Some(error) => event_at!(
                self.level,
                stream = %entry.target,
                action_type = %entry.action.action_type(),
                payload = %entry.action.payload(),
                started_time = ?started_time,
                took_us,
                flags = ?flags,
                error = %error,
                "action failed"
            ),
            None => event_at!(
                self.level,
                stream = %entry.target,
                action_type = %entry.action.action_type(),
                payload = %entry.action.payload(),
                started_time = ?started_time,
                took_us,
                flags = ?flags,
                "action"
            ),
        }
        Ok(())
    }
}

/// Forwards diagnostic entries to an unbounded channel
///
/// Recording never blocks. Once the receiver is dropped every record
/// fails with [`SinkError::Closed`], which the engine counts and logs.
pub struct ChannelSink<S> {
    tx: mpsc::UnboundedSender<DiagnosticEntry<S>>,
}

impl<S> ChannelSink<S> {
    /// Create a sink and the receiving half
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DiagnosticEntry<S>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl<S> fmt::Debug for ChannelSink<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelSink")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl<S: Send + Sync> DiagnosticsSink<S> for ChannelSink<S> {
    fn record(&self, entry: &DiagnosticEntry<S>) -> Result<(), SinkError> {
        self.tx.send(entry.clone()).map_err(|_| SinkError::Closed)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use reactive_context_core::SinkTarget;
    use std::time::Instant;

    fn entry(action_type: &str) -> DiagnosticEntry<()> {
        DiagnosticEntry::observe(
            Arc::new(Action::of_type(action_type)),
            SinkTarget::Unhandled,
            Instant::now(),
        )
    }

    #[test]
    fn tracing_sink_never_fails() {
        let sink = TracingSink::new(Level::INFO).with_predicate(|a: &Action<()>| a.is("KEEP"));
        assert!(sink.record(&entry("KEEP")).is_ok());
        assert!(sink.record(&entry("DROP")).is_ok());
    }

    #[test]
    fn channel_sink_forwards_entries() {
        let (sink, mut rx) = ChannelSink::new();
        sink.record(&entry("PING")).unwrap();

        let received = rx.try_recv().unwrap();
        assert!(received.action.is("PING"));
        assert_eq!(received.target, SinkTarget::Unhandled);
    }

    #[test]
    fn channel_sink_reports_closed_receiver() {
        let (sink, rx) = ChannelSink::<()>::new();
        drop(rx);
        assert_eq!(sink.record(&entry("PING")), Err(SinkError::Closed));
    }
}
