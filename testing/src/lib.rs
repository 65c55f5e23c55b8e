//! # Reactive Context Testing
//!
//! Testing utilities and helpers for the Reactive Context action engine.
//!
//! This crate provides:
//! - Mock implementations of Environment traits and sinks
//! - A fluent Given-When-Then harness for handlers
//! - A manually resolved task for driving lifecycle invocations
//! - Property-based testing strategies
//!
//! ## Example
//!
//! ```ignore
//! use reactive_context_testing::{ManualTask, OutputRecorder};
//! use reactive_context_runtime::{invoke, Engine, LifecycleConfig};
//!
//! #[tokio::test]
//! async fn fetch_flow() {
//!     let engine = todo_engine();
//!     let recorder = OutputRecorder::attach(&engine);
//!     let task = ManualTask::new();
//!
//!     let handle = invoke(LifecycleConfig::new(engine.clone(), types, task.factory())).unwrap();
//!     task.resolve(json!({ "body": { "items": [] } }));
//!     handle.settled().await;
//!
//!     assert_eq!(recorder.action_types(), ["FETCH_ITEMS", "FETCH_ITEMS_PENDING", "FETCH_ITEMS_FULFILLED"]);
//! }
//! ```

use chrono::{DateTime, Utc};
use reactive_context_core::environment::Clock;

mod task;

pub use handler_test::HandlerTest;
pub use task::{ManualTask, TaskFactory};

/// Mock implementations of Environment traits and sinks
pub mod mocks {
    use super::{Clock, DateTime, Utc};
    use reactive_context_core::{DiagnosticEntry, DiagnosticsSink, SinkError};
    use std::sync::{Mutex, PoisonError};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use reactive_context_testing::mocks::FixedClock;
    /// use reactive_context_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// let time1 = clock.now();
    /// let time2 = clock.now();
    /// assert_eq!(time1, time2); // Always the same!
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// This function will panic if the hardcoded timestamp fails to parse,
    /// which should never happen in practice.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }

    /// Diagnostics sink that keeps every entry in memory
    ///
    /// Can be switched into a failing mode to exercise sink error handling.
    pub struct RecordingSink<S> {
        entries: Mutex<Vec<DiagnosticEntry<S>>>,
        failure: Mutex<Option<SinkError>>,
    }

    impl<S> RecordingSink<S> {
        /// Create an empty sink
        #[must_use]
        pub const fn new() -> Self {
            Self {
                entries: Mutex::new(Vec::new()),
                failure: Mutex::new(None),
            }
        }

        /// Fail every following record with `error` (or stop failing with `None`)
        pub fn fail_with(&self, error: Option<SinkError>) {
            *self.failure.lock().unwrap_or_else(PoisonError::into_inner) = error;
        }

        /// Copies of the recorded entries
        #[must_use]
        pub fn entries(&self) -> Vec<DiagnosticEntry<S>> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Types of the recorded actions, in order
        #[must_use]
        pub fn action_types(&self) -> Vec<String> {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .map(|entry| entry.action.action_type().to_string())
                .collect()
        }

        /// Number of recorded entries
        #[must_use]
        pub fn len(&self) -> usize {
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .len()
        }

        /// Whether nothing was recorded
        #[must_use]
        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    impl<S> Default for RecordingSink<S> {
        fn default() -> Self {
            Self::new()
        }
    }

    impl<S: Send + Sync> DiagnosticsSink<S> for RecordingSink<S> {
        fn record(&self, entry: &DiagnosticEntry<S>) -> Result<(), SinkError> {
            if let Some(error) = self
                .failure
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
            {
                return Err(error);
            }
            self.entries
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(entry.clone());
            Ok(())
        }
    }
}

/// Test helpers and utilities
pub mod helpers {
    use futures::Stream;
    use reactive_context_core::Envelope;
    use reactive_context_runtime::{Engine, Subscription};
    use std::sync::{Arc, Mutex, PoisonError};

    /// Records every envelope published on an engine's output stream
    ///
    /// The replayed envelope delivered on attach is recorded too, so the
    /// first entry is the state at attach time.
    pub struct OutputRecorder<S> {
        envelopes: Arc<Mutex<Vec<Envelope<S>>>>,
        _subscription: Subscription,
    }

    impl<S> OutputRecorder<S>
    where
        S: Send + Sync + 'static,
    {
        /// Subscribe to `engine`
        #[must_use]
        pub fn attach(engine: &Engine<S>) -> Self {
            let envelopes = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&envelopes);
            let subscription = engine.subscribe(move |envelope| {
                sink.lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(envelope.clone());
            });
            Self {
                envelopes,
                _subscription: subscription,
            }
        }

        /// Copies of the recorded envelopes
        #[must_use]
        pub fn envelopes(&self) -> Vec<Envelope<S>> {
            self.envelopes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }

        /// Types of the recorded actions, skipping the initial envelope
        #[must_use]
        pub fn action_types(&self) -> Vec<String> {
            self.envelopes
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .filter_map(|envelope| envelope.action_type().map(ToString::to_string))
                .collect()
        }
    }

    /// The engine's output as an async stream
    ///
    /// Starts with the latest envelope. Built on a watch channel, so a slow
    /// consumer only sees the most recent envelope of a burst.
    pub fn output_stream<S>(engine: &Engine<S>) -> impl Stream<Item = Envelope<S>> + use<S>
    where
        S: Send + Sync + 'static,
    {
        let mut rx = engine.watch();
        async_stream::stream! {
            let first = rx.borrow_and_update().clone();
            yield first;
            while rx.changed().await.is_ok() {
                let next = rx.borrow_and_update().clone();
                yield next;
            }
        }
    }

    /// Initialize a `tracing` subscriber for tests
    ///
    /// Honors `RUST_LOG`; safe to call from every test.
    pub fn init_test_tracing() {
        use tracing_subscriber::{EnvFilter, fmt};

        let _ = fmt()
            .with_env_filter(
                EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
            )
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use proptest::prelude::*;

    /// One of `count` action type names (`A0`, `A1`, ...)
    pub fn action_type(count: usize) -> impl Strategy<Value = String> {
        (0..count.max(1)).prop_map(|i| format!("A{i}"))
    }

    /// A sequence of small signed integers used as action payloads
    pub fn payloads(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
        proptest::collection::vec(-1_000_i64..1_000, 0..max_len)
    }
}

// Re-export commonly used items
pub use helpers::{OutputRecorder, init_test_tracing, output_stream};
pub use mocks::{FixedClock, RecordingSink, test_clock};
