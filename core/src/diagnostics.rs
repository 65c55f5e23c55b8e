//! Diagnostics sink contract.
//!
//! The engine reports every unhandled action and every finalized output
//! envelope to its sinks as a [`DiagnosticEntry`]. Sinks are passive: they
//! never touch state and a failing sink never stops dispatch. Errors returned
//! by [`DiagnosticsSink::record`] are reported by the engine and the sink
//! stays attached.

use crate::action::{Action, ActionFlag};
use crate::handler::HandlerError;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Which engine stream an entry comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkTarget {
    /// Actions whose type has no handler
    Unhandled,
    /// Envelopes published on the output stream
    Finalized,
    /// Both of the above (only meaningful when attaching a sink)
    Both,
}

impl SinkTarget {
    /// Whether a sink attached with `self` wants entries from `stream`
    #[must_use]
    pub const fn accepts(self, stream: Self) -> bool {
        matches!(
            (self, stream),
            (Self::Both, _)
                | (Self::Unhandled, Self::Unhandled)
                | (Self::Finalized, Self::Finalized)
        )
    }
}

impl fmt::Display for SinkTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unhandled => f.write_str("unhandled"),
            Self::Finalized => f.write_str("finalized"),
            Self::Both => f.write_str("both"),
        }
    }
}

/// One observation handed to a sink
#[derive(Debug)]
pub struct DiagnosticEntry<S> {
    /// Monotonic submit time of the action
    pub started: Option<Instant>,
    /// Wall-clock submit time of the action
    pub started_time: Option<DateTime<Utc>>,
    /// Time between submission and this observation
    pub took: Duration,
    /// The observed action
    pub action: Arc<Action<S>>,
    /// Handler failure, if handling failed
    pub error: Option<HandlerError>,
    /// Stream the entry comes from
    pub target: SinkTarget,
}

impl<S> Clone for DiagnosticEntry<S> {
    fn clone(&self) -> Self {
        Self {
            started: self.started,
            started_time: self.started_time,
            took: self.took,
            action: Arc::clone(&self.action),
            error: self.error.clone(),
            target: self.target,
        }
    }
}

impl<S> DiagnosticEntry<S> {
    /// Build an entry from an action's metadata, measured at `now`
    #[must_use]
    pub fn observe(action: Arc<Action<S>>, target: SinkTarget, now: Instant) -> Self {
        let metadata = action.metadata();
        let started = metadata.started;
        let took = started.map_or(Duration::ZERO, |s| now.saturating_duration_since(s));
        Self {
            started,
            started_time: metadata.started_time,
            took,
            error: metadata.error.clone(),
            target,
            action,
        }
    }

    /// Routing flags of the action
    #[must_use]
    pub fn flags(&self) -> &[ActionFlag] {
        &self.action.metadata().flags
    }
}

/// A sink could not record an entry
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SinkError {
    /// The sink's destination is gone (e.g. its receiver was dropped)
    #[error("diagnostics destination closed")]
    Closed,

    /// Any other failure
    #[error("diagnostics sink failed: {0}")]
    Failed(String),
}

/// Passive observer of the engine's unhandled and finalized streams
pub trait DiagnosticsSink<S>: Send + Sync {
    /// Record one entry
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] if the entry could not be recorded. The engine
    /// logs the failure and keeps delivering later entries.
    fn record(&self, entry: &DiagnosticEntry<S>) -> Result<(), SinkError>;
}
