//! State-transform handlers.
//!
//! A handler folds one envelope into the next state:
//! `(action, current state) -> next state`. Handlers never mutate the state
//! they are given; they build and return a new value. A handler that fails
//! returns a [`HandlerError`], which the engine records on the action's
//! metadata while keeping the previous state.
//!
//! Any `Fn(&Envelope<S>) -> Result<S, HandlerError>` closure is a handler:
//!
//! ```
//! use reactive_context_core::action::{Action, Envelope};
//! use reactive_context_core::handler::{Handler, HandlerError};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! let add = |envelope: &Envelope<Vec<i64>>| -> Result<Vec<i64>, HandlerError> {
//!     let value: i64 = envelope
//!         .action()
//!         .ok_or_else(|| HandlerError::failed("missing action"))?
//!         .payload_as()?;
//!     let mut next = envelope.state().clone();
//!     next.push(value);
//!     Ok(next)
//! };
//!
//! let envelope = Envelope::new(Arc::new(Action::new("ADD", json!(3))), Arc::new(vec![1, 2]));
//! assert_eq!(add.handle(&envelope).ok(), Some(vec![1, 2, 3]));
//! ```

use crate::action::Envelope;
use thiserror::Error;

/// Failure raised while folding an action into state.
///
/// Recovered by the engine: attached to `metadata.error`, never returned to
/// the dispatcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    /// The handler rejected the action
    #[error("handler failed: {0}")]
    Failed(String),

    /// The payload did not have the shape the handler expected
    #[error("invalid payload for {action_type}: {reason}")]
    InvalidPayload {
        /// Type of the offending action
        action_type: String,
        /// Deserialization failure
        reason: String,
    },

    /// The handler panicked; the panic was contained by the engine
    #[error("handler panicked: {0}")]
    Panicked(String),
}

impl HandlerError {
    /// Shorthand for [`HandlerError::Failed`]
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }
}

/// A function that computes the next state for one or more action types.
pub trait Handler<S>: Send + Sync {
    /// Fold the envelope into the next state
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when the action cannot be applied; the
    /// engine keeps the previous state in that case.
    fn handle(&self, envelope: &Envelope<S>) -> Result<S, HandlerError>;
}

impl<S, F> Handler<S> for F
where
    F: Fn(&Envelope<S>) -> Result<S, HandlerError> + Send + Sync,
{
    fn handle(&self, envelope: &Envelope<S>) -> Result<S, HandlerError> {
        self(envelope)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Action;
    use std::sync::Arc;

    struct Doubler;

    impl Handler<i64> for Doubler {
        fn handle(&self, envelope: &Envelope<i64>) -> Result<i64, HandlerError> {
            Ok(envelope.state() * 2)
        }
    }

    #[test]
    fn struct_handlers_fold_state() {
        let envelope = Envelope::new(Arc::new(Action::of_type("DOUBLE")), Arc::new(21));
        assert_eq!(Doubler.handle(&envelope), Ok(42));
    }

    #[test]
    fn closures_are_handlers() {
        let reject = |_: &Envelope<i64>| -> Result<i64, HandlerError> {
            Err(HandlerError::failed("nope"))
        };
        let envelope = Envelope::new(Arc::new(Action::of_type("X")), Arc::new(1));
        assert_eq!(reject.handle(&envelope), Err(HandlerError::Failed("nope".into())));
    }

    #[test]
    fn error_messages_name_the_cause() {
        let err = HandlerError::InvalidPayload {
            action_type: "ADD_ITEM".into(),
            reason: "missing field `id`".into(),
        };
        assert_eq!(
            err.to_string(),
            "invalid payload for ADD_ITEM: missing field `id`"
        );
    }
}
