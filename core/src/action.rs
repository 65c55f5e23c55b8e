//! Actions, metadata, and envelopes.
//!
//! An [`Action`] is the unit of input to the engine: a type identifier plus an
//! opaque JSON payload. Callers only ever supply those two fields. The engine
//! enriches every action with [`Metadata`] at dispatch time and pairs it with
//! the state valid at that point of the sequence, producing an [`Envelope`].
//!
//! # Example
//!
//! ```
//! use reactive_context_core::action::Action;
//! use serde_json::json;
//!
//! let add = Action::<()>::new("ADD_ITEM", json!({ "id": 1, "name": "a" }));
//! assert_eq!(add.action_type(), "ADD_ITEM");
//! assert!(add.metadata().started.is_none());
//!
//! let reset = Action::<()>::of_type("RESET");
//! assert!(reset.payload().is_null());
//! ```

use crate::handler::HandlerError;
use crate::lifecycle::InvocationId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use smallvec::SmallVec;
use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Identifier of an action type.
///
/// Cheap to clone: the name is shared behind an `Arc<str>`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionType(Arc<str>);

impl ActionType {
    /// Create a new action type from any string-like value
    #[must_use]
    pub fn new(name: impl AsRef<str>) -> Self {
        Self(Arc::from(name.as_ref()))
    }

    /// The type name
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the name is empty (or whitespace only)
    #[must_use]
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Debug for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ActionType({})", self.0)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ActionType {
    fn from(value: String) -> Self {
        Self(Arc::from(value))
    }
}

impl From<&String> for ActionType {
    fn from(value: &String) -> Self {
        Self::new(value)
    }
}

impl From<&ActionType> for ActionType {
    fn from(value: &ActionType) -> Self {
        value.clone()
    }
}

impl Borrow<str> for ActionType {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for ActionType {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ActionType {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ActionType {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

/// Routing flags attached by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionFlag {
    /// No handler was registered (or marked) for the action's type
    NoHandler,
}

impl fmt::Display for ActionFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoHandler => f.write_str("No Handler"),
        }
    }
}

/// Engine-owned metadata attached to an action at dispatch time.
///
/// Every field starts empty. The engine overwrites all of them on dispatch
/// except `correlation`, the one caller-settable field (through
/// [`Action::correlated`]), which targets a lifecycle invocation.
#[derive(Debug)]
pub struct Metadata<S> {
    /// Monotonic timestamp taken when the action was submitted
    pub started: Option<Instant>,
    /// Wall-clock time taken when the action was submitted
    pub started_time: Option<DateTime<Utc>>,
    /// State snapshot the action was folded against
    pub prev_state: Option<Arc<S>>,
    /// State produced by the handler, when handling succeeded
    pub next_state: Option<Arc<S>>,
    /// Failure recorded when the handler returned an error or panicked
    pub error: Option<HandlerError>,
    /// Routing flags (e.g. [`ActionFlag::NoHandler`])
    pub flags: SmallVec<[ActionFlag; 2]>,
    /// Lifecycle invocation this action belongs to, if any
    pub correlation: Option<InvocationId>,
}

impl<S> Default for Metadata<S> {
    fn default() -> Self {
        Self {
            started: None,
            started_time: None,
            prev_state: None,
            next_state: None,
            error: None,
            flags: SmallVec::new(),
            correlation: None,
        }
    }
}

impl<S> Clone for Metadata<S> {
    fn clone(&self) -> Self {
        Self {
            started: self.started,
            started_time: self.started_time,
            prev_state: self.prev_state.clone(),
            next_state: self.next_state.clone(),
            error: self.error.clone(),
            flags: self.flags.clone(),
            correlation: self.correlation,
        }
    }
}

impl<S> Metadata<S> {
    /// Whether the given flag was attached
    #[must_use]
    pub fn has_flag(&self, flag: ActionFlag) -> bool {
        self.flags.contains(&flag)
    }
}

/// A typed event record dispatched to the engine.
///
/// The state parameter `S` only appears in the metadata snapshots
/// (`prev_state`/`next_state`).
#[derive(Debug)]
pub struct Action<S> {
    action_type: ActionType,
    payload: Value,
    metadata: Metadata<S>,
}

impl<S> Clone for Action<S> {
    fn clone(&self) -> Self {
        Self {
            action_type: self.action_type.clone(),
            payload: self.payload.clone(),
            metadata: self.metadata.clone(),
        }
    }
}

impl<S> Action<S> {
    /// Create an action with a payload
    #[must_use]
    pub fn new(action_type: impl Into<ActionType>, payload: Value) -> Self {
        Self {
            action_type: action_type.into(),
            payload,
            metadata: Metadata::default(),
        }
    }

    /// Create an action that carries no payload (`null`)
    #[must_use]
    pub fn of_type(action_type: impl Into<ActionType>) -> Self {
        Self::new(action_type, Value::Null)
    }

    /// Tag the action with a lifecycle invocation id.
    ///
    /// Used by the lifecycle controller to correlate the actions of one
    /// invocation, and by targeted aborts.
    #[must_use]
    pub fn correlated(mut self, id: InvocationId) -> Self {
        self.metadata.correlation = Some(id);
        self
    }

    /// The action type
    #[must_use]
    pub const fn action_type(&self) -> &ActionType {
        &self.action_type
    }

    /// The raw payload
    #[must_use]
    pub const fn payload(&self) -> &Value {
        &self.payload
    }

    /// Deserialize the payload into a concrete type.
    ///
    /// # Errors
    ///
    /// Returns [`HandlerError::InvalidPayload`] if the payload does not match
    /// the shape of `T`.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<T, HandlerError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| HandlerError::InvalidPayload {
            action_type: self.action_type.to_string(),
            reason: e.to_string(),
        })
    }

    /// Engine-assigned metadata
    #[must_use]
    pub const fn metadata(&self) -> &Metadata<S> {
        &self.metadata
    }

    /// Mutable metadata access for the engine.
    ///
    /// Hidden from the docs: callers are not meant to stamp metadata. Anything
    /// written here before dispatch is discarded by the engine, apart from
    /// `correlation`.
    #[doc(hidden)]
    pub const fn metadata_mut(&mut self) -> &mut Metadata<S> {
        &mut self.metadata
    }

    /// Whether this action is of the given type
    #[must_use]
    pub fn is(&self, action_type: &str) -> bool {
        self.action_type == *action_type
    }
}

/// An action paired with the state value valid for it.
///
/// The engine's output stream carries envelopes: `state` is the state after
/// the action was handled (or the unchanged previous state when handling
/// failed). The very first envelope has no action.
#[derive(Debug)]
pub struct Envelope<S> {
    /// The action, absent only for the initial envelope
    pub action: Option<Arc<Action<S>>>,
    /// The state valid for this point of the sequence
    pub state: Arc<S>,
}

impl<S> Envelope<S> {
    /// The envelope emitted before any action was dispatched
    #[must_use]
    pub const fn initial(state: Arc<S>) -> Self {
        Self {
            action: None,
            state,
        }
    }

    /// Pair an action with a state
    #[must_use]
    pub const fn new(action: Arc<Action<S>>, state: Arc<S>) -> Self {
        Self {
            action: Some(action),
            state,
        }
    }

    /// The action, if any
    #[must_use]
    pub fn action(&self) -> Option<&Action<S>> {
        self.action.as_deref()
    }

    /// The action type, if any
    #[must_use]
    pub fn action_type(&self) -> Option<&ActionType> {
        self.action.as_deref().map(Action::action_type)
    }

    /// The state
    #[must_use]
    pub fn state(&self) -> &S {
        &self.state
    }
}

// Manual impl: deriving would require `S: Clone`, but both fields are `Arc`s.
impl<S> Clone for Envelope<S> {
    fn clone(&self) -> Self {
        Self {
            action: self.action.clone(),
            state: Arc::clone(&self.state),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Item {
        id: u32,
        name: String,
    }

    #[test]
    fn action_type_compares_with_str() {
        let t = ActionType::from("ADD_ITEM");
        assert_eq!(t, "ADD_ITEM");
        assert_eq!(t.to_string(), "ADD_ITEM");
        assert!(!t.is_blank());
        assert!(ActionType::from("  ").is_blank());
    }

    #[test]
    fn new_actions_carry_no_metadata() {
        let action = Action::<()>::new("ADD_ITEM", json!({ "id": 1 }));
        let meta = action.metadata();
        assert!(meta.started.is_none());
        assert!(meta.started_time.is_none());
        assert!(meta.prev_state.is_none());
        assert!(meta.next_state.is_none());
        assert!(meta.error.is_none());
        assert!(meta.flags.is_empty());
        assert!(meta.correlation.is_none());
    }

    #[test]
    fn payload_as_deserializes() {
        let action = Action::<()>::new("ADD_ITEM", json!({ "id": 1, "name": "a" }));
        let item: Item = action.payload_as().unwrap();
        assert_eq!(
            item,
            Item {
                id: 1,
                name: "a".to_string()
            }
        );
    }

    #[test]
    fn payload_as_reports_shape_mismatch() {
        let action = Action::<()>::new("ADD_ITEM", json!("not an item"));
        let err = action.payload_as::<Item>();
        assert!(matches!(err, Err(HandlerError::InvalidPayload { .. })));
    }

    #[test]
    fn envelope_clone_shares_state() {
        let state = Arc::new(vec![1, 2, 3]);
        let envelope = Envelope::initial(Arc::clone(&state));
        let copy = envelope.clone();
        assert!(Arc::ptr_eq(&copy.state, &state));
        assert!(copy.action.is_none());
    }
}
