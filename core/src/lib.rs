//! # Reactive Context Core
//!
//! Core types and contracts for the Reactive Context action engine.
//!
//! This crate holds the plain data threaded through the engine and the
//! traits at its seams. The engine itself and the lifecycle controller live
//! in `reactive-context-runtime`.
//!
//! ## Core Concepts
//!
//! - **Action**: A typed event record (`type` + JSON payload), enriched with
//!   engine-owned metadata at dispatch time
//! - **Envelope**: An action paired with the state valid for it
//! - **Handler**: Pure function `(envelope) → next state` for one or more types
//! - **Lifecycle types**: Five correlated action types describing one
//!   asynchronous operation (`init`, `pending`, `fulfilled`, `rejected`, `abort`)
//! - **Diagnostics sink**: Passive observer of unhandled and finalized actions
//! - **Environment**: Injected dependencies (the wall clock)
//!
//! ## Architecture Principles
//!
//! - State is immutable per envelope: handlers return new values
//! - Exactly one handler per action type, enforced at registration
//! - Engines are explicit values passed by the caller, never globals
//!
//! ## Example
//!
//! ```
//! use reactive_context_core::{Action, Envelope, HandlerError};
//! use serde::{Deserialize, Serialize};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
//! struct Item { id: u32, name: String }
//!
//! #[derive(Clone, Debug, Default, PartialEq)]
//! struct TodoState { items: Vec<Item> }
//!
//! fn add_item(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
//!     let action = envelope.action().ok_or_else(|| HandlerError::failed("no action"))?;
//!     let item: Item = action.payload_as()?;
//!     let mut items = envelope.state().items.clone();
//!     items.push(item);
//!     Ok(TodoState { items })
//! }
//!
//! let envelope = Envelope::new(
//!     Arc::new(Action::new("ADD_ITEM", json!({ "id": 1, "name": "a" }))),
//!     Arc::new(TodoState::default()),
//! );
//! let next = add_item(&envelope).unwrap();
//! assert_eq!(next.items.len(), 1);
//! ```

// Re-export commonly used types
pub use chrono::{DateTime, Utc};
pub use serde::{Deserialize, Serialize};
pub use serde_json::{Value, json};
pub use smallvec::{SmallVec, smallvec};

/// Actions, metadata, and envelopes
pub mod action;

/// State-transform handlers and their failures
pub mod handler;

/// Lifecycle vocabulary for promise-backed actions
pub mod lifecycle;

/// Diagnostics sink contract
pub mod diagnostics;

/// Named-source composition
pub mod composition;

/// Configuration errors
pub mod error;

/// Environment module - Dependency injection traits
///
/// All external dependencies of the engine are abstracted behind traits and
/// injected through its configuration. Today that is only the wall clock used
/// for `metadata.started_time`.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Clock trait - abstracts time operations for testability
    ///
    /// # Examples
    ///
    /// ```ignore
    /// // Production - uses system clock
    /// struct SystemClock;
    /// impl Clock for SystemClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         Utc::now()
    ///     }
    /// }
    ///
    /// // Test - fixed time for deterministic tests
    /// struct FixedClock { time: DateTime<Utc> }
    /// impl Clock for FixedClock {
    ///     fn now(&self) -> DateTime<Utc> {
    ///         self.time
    ///     }
    /// }
    /// ```
    pub trait Clock: Send + Sync {
        /// Get the current time
        fn now(&self) -> DateTime<Utc>;
    }

    /// The real wall clock
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

pub use action::{Action, ActionFlag, ActionType, Envelope, Metadata};
pub use composition::{Source, SourceComposer};
pub use diagnostics::{DiagnosticEntry, DiagnosticsSink, SinkError, SinkTarget};
pub use environment::{Clock, SystemClock};
pub use error::ConfigurationError;
pub use handler::{Handler, HandlerError};
pub use lifecycle::{
    InvocationId, LifecycleOutcome, LifecyclePhase, LifecycleTypes, embedded_error,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
