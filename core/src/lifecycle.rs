//! Lifecycle vocabulary for promise-backed actions.
//!
//! One asynchronous operation is described by five correlated action types.
//! Every invocation walks a small automaton:
//!
//! ```text
//! INIT ──► PENDING ──┬──► FULFILLED
//!                    ├──► REJECTED
//!                    └──► ABORTED
//! ```
//!
//! The three right-hand phases are terminal. The runtime drives the
//! automaton; this module only holds the data types and the success
//! reclassification rule.

use crate::action::ActionType;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Identifier of one lifecycle invocation.
///
/// Stored in `metadata.correlation` of the invocation's actions so that
/// overlapping invocations of the same operation can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(Uuid);

impl InvocationId {
    /// Generate a fresh random id
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Wrap an existing UUID
    #[must_use]
    pub const fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// The inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InvocationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The five action types of one asynchronous operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LifecycleTypes {
    /// Dispatched with the call arguments before any work starts
    pub init: ActionType,
    /// Dispatched once the task has been created
    pub pending: ActionType,
    /// Dispatched with the result of a successful task
    pub fulfilled: ActionType,
    /// Dispatched with the failure of a task
    pub rejected: ActionType,
    /// Observed (not dispatched) by the controller to cancel the task
    pub abort: ActionType,
}

impl LifecycleTypes {
    /// Build the type set from explicit names
    #[must_use]
    pub fn new(
        init: impl Into<ActionType>,
        pending: impl Into<ActionType>,
        fulfilled: impl Into<ActionType>,
        rejected: impl Into<ActionType>,
        abort: impl Into<ActionType>,
    ) -> Self {
        Self {
            init: init.into(),
            pending: pending.into(),
            fulfilled: fulfilled.into(),
            rejected: rejected.into(),
            abort: abort.into(),
        }
    }

    /// Derive the conventional names from a prefix.
    ///
    /// ```
    /// use reactive_context_core::lifecycle::LifecycleTypes;
    ///
    /// let types = LifecycleTypes::from_prefix("FETCH_ITEMS");
    /// assert_eq!(types.init, "FETCH_ITEMS");
    /// assert_eq!(types.pending, "FETCH_ITEMS_PENDING");
    /// assert_eq!(types.abort, "FETCH_ITEMS_ABORT");
    /// ```
    #[must_use]
    pub fn from_prefix(prefix: &str) -> Self {
        Self::new(
            prefix,
            format!("{prefix}_PENDING"),
            format!("{prefix}_FULFILLED"),
            format!("{prefix}_REJECTED"),
            format!("{prefix}_ABORT"),
        )
    }

    /// All five types, in lifecycle order
    #[must_use]
    pub fn all(&self) -> [&ActionType; 5] {
        [
            &self.init,
            &self.pending,
            &self.fulfilled,
            &self.rejected,
            &self.abort,
        ]
    }

    /// Check that every name is non-empty and the five names are distinct.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::BlankActionType`] or
    /// [`ConfigurationError::AmbiguousLifecycleTypes`].
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        let all = self.all();
        if all.iter().any(|t| t.is_blank()) {
            return Err(ConfigurationError::BlankActionType);
        }
        for (i, a) in all.iter().enumerate() {
            if all[i + 1..].contains(a) {
                return Err(ConfigurationError::AmbiguousLifecycleTypes {
                    action_type: a.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Where an invocation is in its automaton
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecyclePhase {
    /// `init` dispatched, task not yet created
    Init,
    /// `pending` dispatched, task running
    Pending,
    /// `fulfilled` dispatched
    Fulfilled,
    /// `rejected` dispatched
    Rejected,
    /// Abort observed before the task settled
    Aborted,
}

impl LifecyclePhase {
    /// Whether no further transition can happen
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Fulfilled | Self::Rejected | Self::Aborted)
    }

    /// Whether `next` is a legal successor of `self`
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Pending)
                | (Self::Pending, Self::Fulfilled | Self::Rejected | Self::Aborted)
        )
    }
}

impl fmt::Display for LifecyclePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Pending => "pending",
            Self::Fulfilled => "fulfilled",
            Self::Rejected => "rejected",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Final result of one invocation, shared with every holder of its handle
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleOutcome {
    /// The task succeeded; payload of the `fulfilled` action
    Fulfilled(Value),
    /// The task failed (transport or application level); payload of the
    /// `rejected` action
    Rejected(Value),
    /// An abort won the race; neither `fulfilled` nor `rejected` was dispatched
    Aborted,
}

impl LifecycleOutcome {
    /// The terminal phase matching this outcome
    #[must_use]
    pub const fn phase(&self) -> LifecyclePhase {
        match self {
            Self::Fulfilled(_) => LifecyclePhase::Fulfilled,
            Self::Rejected(_) => LifecyclePhase::Rejected,
            Self::Aborted => LifecyclePhase::Aborted,
        }
    }
}

/// Fields of a response body that mark an application-level failure
pub const ERROR_INDICATORS: [&str; 2] = ["errorCode", "errorType"];

/// Find an application-level error embedded in a successful outcome.
///
/// A task can complete without a transport failure while its response body
/// still reports an error, e.g. `{"body": {"errorCode": "X"}}`. Such an
/// outcome must be treated as rejected. Returns the indicator value when
/// `body.errorCode` or `body.errorType` is present and truthy.
///
/// ```
/// use reactive_context_core::lifecycle::embedded_error;
/// use serde_json::json;
///
/// assert!(embedded_error(&json!({ "body": { "errorCode": "X" } })).is_some());
/// assert!(embedded_error(&json!({ "body": { "items": [] } })).is_none());
/// ```
#[must_use]
pub fn embedded_error(outcome: &Value) -> Option<&Value> {
    let body = outcome.get("body")?;
    ERROR_INDICATORS
        .iter()
        .filter_map(|key| body.get(*key))
        .find(|value| is_truthy(value))
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn from_prefix_builds_distinct_names() {
        let types = LifecycleTypes::from_prefix("FETCH_ITEMS");
        assert_eq!(types.fulfilled, "FETCH_ITEMS_FULFILLED");
        assert_eq!(types.rejected, "FETCH_ITEMS_REJECTED");
        assert!(types.validate().is_ok());
    }

    #[test]
    fn validate_rejects_shared_names() {
        let types = LifecycleTypes::new("A", "B", "C", "C", "D");
        assert_eq!(
            types.validate(),
            Err(ConfigurationError::AmbiguousLifecycleTypes {
                action_type: "C".into()
            })
        );
    }

    #[test]
    fn validate_rejects_blank_names() {
        let types = LifecycleTypes::new("A", "", "C", "D", "E");
        assert_eq!(types.validate(), Err(ConfigurationError::BlankActionType));
    }

    #[test]
    fn terminal_phases_have_no_successors() {
        for terminal in [
            LifecyclePhase::Fulfilled,
            LifecyclePhase::Rejected,
            LifecyclePhase::Aborted,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                LifecyclePhase::Init,
                LifecyclePhase::Pending,
                LifecyclePhase::Fulfilled,
                LifecyclePhase::Rejected,
                LifecyclePhase::Aborted,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
        assert!(LifecyclePhase::Init.can_transition_to(LifecyclePhase::Pending));
        assert!(!LifecyclePhase::Init.can_transition_to(LifecyclePhase::Fulfilled));
    }

    #[test]
    fn error_code_and_error_type_are_indicators() {
        assert_eq!(
            embedded_error(&json!({ "body": { "errorCode": "X" } })),
            Some(&json!("X"))
        );
        assert_eq!(
            embedded_error(&json!({ "body": { "errorType": "Timeout" } })),
            Some(&json!("Timeout"))
        );
    }

    #[test]
    fn falsy_indicators_are_ignored() {
        assert!(embedded_error(&json!({ "body": { "errorCode": "" } })).is_none());
        assert!(embedded_error(&json!({ "body": { "errorCode": null } })).is_none());
        assert!(embedded_error(&json!({ "body": { "errorCode": 0 } })).is_none());
        assert!(embedded_error(&json!({ "errorCode": "X" })).is_none());
        assert!(embedded_error(&json!([1, 2])).is_none());
    }
}
