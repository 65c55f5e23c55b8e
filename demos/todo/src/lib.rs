//! # To-do Demo
//!
//! A to-do list demonstrating the Reactive Context engine.
//!
//! This demo showcases:
//! - Plain handlers (`ADD_ITEM`) and one handler shared by two types
//!   (`RESET` and `CLEAR`)
//! - A promise-backed fetch with the full `FETCH_ITEMS` lifecycle, including
//!   abort
//! - Composing the engine's state with static settings for a view
//!
//! ## Example
//!
//! ```no_run
//! use todo::{add_item, todo_engine};
//! use reactive_context_runtime::EngineConfig;
//!
//! let engine = todo_engine(EngineConfig::default()).unwrap();
//! engine.next_action(add_item(1, "buy milk"));
//! assert_eq!(engine.state().items.len(), 1);
//! ```

use futures::future::BoxFuture;
use reactive_context_core::{
    Action, ConfigurationError, Envelope, HandlerError, LifecycleTypes, SourceComposer, Value,
    json,
};
use reactive_context_runtime::{
    Engine, EngineConfig, LifecycleConfig, LifecycleError, LifecycleHandle, invoke, trigger_abort,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Action type names
pub mod constants {
    /// Append one item
    pub const ADD_ITEM: &str = "ADD_ITEM";
    /// Back to the default state
    pub const RESET: &str = "RESET";
    /// Same effect as `RESET`
    pub const CLEAR: &str = "CLEAR";
    /// Prefix of the fetch lifecycle types
    pub const FETCH_ITEMS: &str = "FETCH_ITEMS";
    /// Cancels in-flight fetches
    pub const FETCH_ITEMS_ABORT: &str = "FETCH_ITEMS_ABORT";
}

use constants::{ADD_ITEM, CLEAR, FETCH_ITEMS, FETCH_ITEMS_ABORT, RESET};

/// One to-do entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    /// Identifier
    pub id: u32,
    /// Display text
    pub name: String,
}

/// To-do state
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TodoState {
    /// Items in insertion order
    pub items: Vec<Item>,
    /// A fetch is in flight
    pub loading: bool,
    /// Arguments of the last fetch
    pub last_query: Option<Value>,
    /// Payload of the last rejected fetch
    pub last_error: Option<Value>,
}

/// The five fetch lifecycle types
#[must_use]
pub fn fetch_types() -> LifecycleTypes {
    LifecycleTypes::from_prefix(FETCH_ITEMS)
}

// ============================================================================
// Handlers
// ============================================================================

fn action_of<'a>(envelope: &'a Envelope<TodoState>) -> Result<&'a Action<TodoState>, HandlerError> {
    envelope
        .action()
        .ok_or_else(|| HandlerError::failed("envelope without action"))
}

/// Append the item carried by the action
///
/// # Errors
///
/// Returns [`HandlerError::InvalidPayload`] if the payload is not an [`Item`].
pub fn handle_add_item(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    let item: Item = action_of(envelope)?.payload_as()?;
    let mut next = envelope.state().clone();
    next.items.push(item);
    Ok(next)
}

/// Back to the default state
///
/// # Errors
///
/// Never fails.
pub fn handle_reset(_: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    Ok(TodoState::default())
}

fn handle_fetch_started(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    Ok(TodoState {
        last_query: Some(action_of(envelope)?.payload().clone()),
        last_error: None,
        ..envelope.state().clone()
    })
}

fn handle_fetch_pending(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    Ok(TodoState {
        loading: true,
        ..envelope.state().clone()
    })
}

fn handle_fetch_fulfilled(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    let action = action_of(envelope)?;
    let items = action
        .payload()
        .pointer("/body/items")
        .cloned()
        .unwrap_or(Value::Null);
    let items: Vec<Item> =
        serde_json::from_value(items).map_err(|e| HandlerError::InvalidPayload {
            action_type: action.action_type().to_string(),
            reason: e.to_string(),
        })?;
    Ok(TodoState {
        items,
        loading: false,
        ..envelope.state().clone()
    })
}

fn handle_fetch_rejected(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    Ok(TodoState {
        loading: false,
        last_error: Some(action_of(envelope)?.payload().clone()),
        ..envelope.state().clone()
    })
}

fn handle_fetch_aborted(envelope: &Envelope<TodoState>) -> Result<TodoState, HandlerError> {
    Ok(TodoState {
        loading: false,
        ..envelope.state().clone()
    })
}

/// Register every to-do handler on `engine`
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if any of the types already has a handler.
pub fn register_handlers(engine: &Engine<TodoState>) -> Result<(), ConfigurationError> {
    let types = fetch_types();
    engine.on_action(ADD_ITEM, handle_add_item)?;
    engine.on_action([RESET, CLEAR], handle_reset)?;
    engine.on_action(types.init, handle_fetch_started)?;
    engine.on_action(types.pending, handle_fetch_pending)?;
    engine.on_action(types.fulfilled, handle_fetch_fulfilled)?;
    engine.on_action(types.rejected, handle_fetch_rejected)?;
    // Also observed by the lifecycle controller
    engine.on_action(types.abort, handle_fetch_aborted)?;
    Ok(())
}

/// Create an engine with the to-do handlers registered
///
/// # Errors
///
/// Returns a [`ConfigurationError`] if registration fails.
pub fn todo_engine(config: EngineConfig) -> Result<Engine<TodoState>, ConfigurationError> {
    let engine = Engine::with_config(TodoState::default(), config);
    register_handlers(&engine)?;
    Ok(engine)
}

// ============================================================================
// Action creators
// ============================================================================

/// `ADD_ITEM` with the given item
#[must_use]
pub fn add_item(id: u32, name: &str) -> Action<TodoState> {
    Action::new(ADD_ITEM, json!({ "id": id, "name": name }))
}

/// `RESET`
#[must_use]
pub fn reset() -> Action<TodoState> {
    Action::of_type(RESET)
}

/// `CLEAR`
#[must_use]
pub fn clear() -> Action<TodoState> {
    Action::of_type(CLEAR)
}

// ============================================================================
// Fetching
// ============================================================================

/// Query of one fetch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FetchRequest {
    /// Endpoint
    pub url: String,
    /// Item kind filter
    pub kind: String,
}

/// Where items are fetched from
///
/// Implementations should stop work once `token` is cancelled.
pub trait ItemSource: Send + Sync {
    /// Fetch items; a successful response looks like
    /// `{"body": {"items": [...]}}`
    fn fetch(
        &self,
        request: FetchRequest,
        token: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<Value>>;
}

/// In-memory item source with an artificial delay
#[derive(Debug, Clone)]
pub struct StaticItemSource {
    response: Value,
    delay: Duration,
}

impl StaticItemSource {
    /// Respond with `items` after `delay`
    #[must_use]
    pub fn new(items: &[Item], delay: Duration) -> Self {
        Self {
            response: json!({ "body": { "items": items } }),
            delay,
        }
    }

    /// Respond with an application-level error after `delay`
    #[must_use]
    pub fn failing(error_code: &str, delay: Duration) -> Self {
        Self {
            response: json!({ "body": { "errorCode": error_code } }),
            delay,
        }
    }
}

impl ItemSource for StaticItemSource {
    fn fetch(
        &self,
        request: FetchRequest,
        token: CancellationToken,
    ) -> BoxFuture<'static, anyhow::Result<Value>> {
        let response = self.response.clone();
        let delay = self.delay;
        Box::pin(async move {
            tracing::debug!(url = %request.url, kind = %request.kind, "Fetching items");
            tokio::select! {
                () = token.cancelled() => Err(anyhow::anyhow!("fetch of {} cancelled", request.url)),
                () = tokio::time::sleep(delay) => Ok(response),
            }
        })
    }
}

/// Start a `FETCH_ITEMS` lifecycle
///
/// # Errors
///
/// Returns [`LifecycleError::NoRuntime`] outside a Tokio runtime.
pub fn fetch_items(
    engine: &Engine<TodoState>,
    source: Arc<dyn ItemSource>,
    request: FetchRequest,
) -> Result<LifecycleHandle<TodoState>, LifecycleError> {
    let logging_args = json!({ "url": request.url, "kind": request.kind });
    invoke(
        LifecycleConfig::new(engine.clone(), fetch_types(), move |token: CancellationToken| {
            source.fetch(request, token)
        })
        .with_logging_args(logging_args),
    )
}

/// Abort every in-flight fetch
pub fn fetch_items_abort(engine: &Engine<TodoState>) {
    trigger_abort(engine, FETCH_ITEMS_ABORT);
}

// ============================================================================
// Composition
// ============================================================================

/// View settings merged into the list's properties
#[derive(Debug, Clone, Serialize)]
pub struct ListSettings {
    /// Heading of the list
    pub title: String,
    /// Show completed items
    pub show_done: bool,
}

/// Composer for the list view: engine state, then settings
///
/// # Errors
///
/// Never fails in practice; both sources are always present.
pub fn list_props(
    engine: &Engine<TodoState>,
    settings: ListSettings,
) -> Result<SourceComposer, ConfigurationError> {
    SourceComposer::builder("TodoList")
        .with_source(engine.source("todos"))
        .source("settings", move || {
            serde_json::to_value(&settings).unwrap_or(Value::Null)
        })
        .build()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn envelope(state: TodoState, action: Action<TodoState>) -> Envelope<TodoState> {
        Envelope::new(Arc::new(action), Arc::new(state))
    }

    #[test]
    fn test_add_item_appends() {
        let next = handle_add_item(&envelope(TodoState::default(), add_item(1, "a"))).unwrap();
        assert_eq!(
            next.items,
            vec![Item {
                id: 1,
                name: "a".into()
            }]
        );
    }

    #[test]
    fn test_add_item_rejects_bad_payload() {
        let result = handle_add_item(&envelope(
            TodoState::default(),
            Action::new(ADD_ITEM, json!({ "id": "one" })),
        ));
        assert!(matches!(result, Err(HandlerError::InvalidPayload { .. })));
    }

    #[test]
    fn test_fulfilled_replaces_items() {
        let state = TodoState {
            loading: true,
            ..TodoState::default()
        };
        let action = Action::new(
            "FETCH_ITEMS_FULFILLED",
            json!({ "body": { "items": [{ "id": 3, "name": "c" }] } }),
        );
        let next = handle_fetch_fulfilled(&envelope(state, action)).unwrap();
        assert!(!next.loading);
        assert_eq!(next.items.len(), 1);
    }

    #[test]
    fn test_registration_twice_fails() {
        let engine = todo_engine(EngineConfig::default()).unwrap();
        assert!(matches!(
            register_handlers(&engine),
            Err(ConfigurationError::DuplicateHandler { .. })
        ));
    }
}
