//! # Reactive Context Runtime
//!
//! Runtime implementation for the Reactive Context action engine.
//!
//! ## Core Components
//!
//! - **Engine**: Owns the current state, routes each dispatched action to its
//!   handler, and publishes the resulting envelope on a live output stream
//! - **Lifecycle controller**: Turns one asynchronous task into the
//!   `init → pending → fulfilled | rejected | aborted` sequence of actions
//! - **Diagnostics sinks**: Passive observers of unhandled and finalized actions
//!
//! ## Example
//!
//! ```
//! use reactive_context_core::{Action, Envelope, HandlerError, json};
//! use reactive_context_runtime::Engine;
//!
//! let engine = Engine::new(0_i64);
//! engine
//!     .on_action("INCREMENT", |envelope: &Envelope<i64>| -> Result<i64, HandlerError> {
//!         Ok(envelope.state() + 1)
//!     })
//!     .unwrap();
//!
//! engine.next_action(Action::of_type("INCREMENT"));
//! engine.next_action(Action::of_type("INCREMENT"));
//!
//! assert_eq!(*engine.get_value().state, 2);
//! ```

use reactive_context_core::{
    Action, ActionFlag, ActionType, Clock, ConfigurationError, DiagnosticEntry, DiagnosticsSink,
    Envelope, Handler, HandlerError, SinkTarget, SystemClock,
};
use std::sync::Arc;

/// Lifecycle controller for promise-backed actions
pub mod lifecycle;

/// Built-in diagnostics sinks
pub mod diagnostics;

/// Prometheus metrics for observability
pub mod metrics;

/// Error types for the runtime
pub mod error {
    use reactive_context_core::ConfigurationError;
    use thiserror::Error;

    /// Errors that can occur when starting a lifecycle invocation
    ///
    /// Once an invocation has started, failures are reported as `rejected`
    /// actions instead of errors.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum LifecycleError {
        /// The invocation was misconfigured
        #[error(transparent)]
        Configuration(#[from] ConfigurationError),

        /// `invoke` was called outside a Tokio runtime
        ///
        /// The completion path runs as a spawned task, so a runtime is required.
        #[error("lifecycle invocations require a Tokio runtime")]
        NoRuntime,
    }
}

pub use error::LifecycleError;

use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Mutex, MutexGuard, PoisonError, Weak};
use std::thread::ThreadId;
use std::time::Instant;
use tokio::sync::{broadcast, watch};

/// Configuration for Engine instances
///
/// # Example
///
/// ```ignore
/// let config = EngineConfig::default()
///     .with_clock(Arc::new(test_clock()))
///     .with_broadcast_capacity(256)
///     .with_unhandled_logging(false);
///
/// let engine = Engine::with_config(initial_state, config);
/// ```
#[derive(Clone)]
pub struct EngineConfig {
    /// Wall clock used for `metadata.started_time`
    pub clock: Arc<dyn Clock>,
    /// Capacity of the async action broadcast channel
    pub broadcast_capacity: usize,
    /// Install a [`diagnostics::TracingSink`] on the unhandled stream
    pub log_unhandled: bool,
    /// Install a [`diagnostics::TracingSink`] on the finalized stream
    pub log_finalized: bool,
    /// Level used by the default tracing sinks
    pub sink_level: tracing::Level,
}

impl EngineConfig {
    /// Set the wall clock
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Set the action broadcast capacity
    #[must_use]
    pub const fn with_broadcast_capacity(mut self, capacity: usize) -> Self {
        self.broadcast_capacity = capacity;
        self
    }

    /// Enable or disable the default sink for unhandled actions
    #[must_use]
    pub const fn with_unhandled_logging(mut self, enabled: bool) -> Self {
        self.log_unhandled = enabled;
        self
    }

    /// Enable or disable the default sink for finalized envelopes
    #[must_use]
    pub const fn with_finalized_logging(mut self, enabled: bool) -> Self {
        self.log_finalized = enabled;
        self
    }

    /// Set the level of the default sinks
    #[must_use]
    pub const fn with_sink_level(mut self, level: tracing::Level) -> Self {
        self.sink_level = level;
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            broadcast_capacity: 64,
            log_unhandled: true,
            log_finalized: true,
            sink_level: tracing::Level::DEBUG,
        }
    }
}

impl fmt::Debug for EngineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineConfig")
            .field("broadcast_capacity", &self.broadcast_capacity)
            .field("log_unhandled", &self.log_unhandled)
            .field("log_finalized", &self.log_finalized)
            .field("sink_level", &self.sink_level)
            .finish_non_exhaustive()
    }
}

/// Result of looking an action type up in the handler registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    /// The type has a handler, or was marked as handled
    Handled,
    /// Nothing is registered; the action only reaches diagnostics
    Unhandled,
}

/// Types accepted by [`Engine::on_action`]: one type or a list of types
pub trait IntoActionTypes {
    /// Convert into a list of action types
    fn into_action_types(self) -> Vec<ActionType>;
}

impl IntoActionTypes for &str {
    fn into_action_types(self) -> Vec<ActionType> {
        vec![ActionType::from(self)]
    }
}

impl IntoActionTypes for String {
    fn into_action_types(self) -> Vec<ActionType> {
        vec![ActionType::from(self)]
    }
}

impl IntoActionTypes for ActionType {
    fn into_action_types(self) -> Vec<ActionType> {
        vec![self]
    }
}

impl IntoActionTypes for &ActionType {
    fn into_action_types(self) -> Vec<ActionType> {
        vec![self.clone()]
    }
}

impl<T: Into<ActionType>> IntoActionTypes for Vec<T> {
    fn into_action_types(self) -> Vec<ActionType> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<ActionType> + Clone> IntoActionTypes for &[T] {
    fn into_action_types(self) -> Vec<ActionType> {
        self.iter().cloned().map(Into::into).collect()
    }
}

impl<T: Into<ActionType>, const N: usize> IntoActionTypes for [T; N] {
    fn into_action_types(self) -> Vec<ActionType> {
        self.into_iter().map(Into::into).collect()
    }
}

/// An action as seen on the action stream, together with how it was routed
#[derive(Debug)]
pub struct RoutedAction<S> {
    /// The fully processed action (metadata included)
    pub action: Arc<Action<S>>,
    /// How the registry routed it
    pub route: Route,
}

impl<S> Clone for RoutedAction<S> {
    fn clone(&self) -> Self {
        Self {
            action: Arc::clone(&self.action),
            route: self.route,
        }
    }
}

/// Handle returned by [`Engine::subscribe`] and [`Engine::tap_actions`]
///
/// The listener stays attached until [`Subscription::unsubscribe`] is called
/// or the subscription is dropped.
#[must_use = "dropping a Subscription detaches its listener"]
pub struct Subscription {
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl Subscription {
    fn new(detach: impl FnOnce() + Send + Sync + 'static) -> Self {
        Self {
            detach: Some(Box::new(detach)),
        }
    }

    /// Detach the listener
    pub fn unsubscribe(mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("attached", &self.detach.is_some())
            .finish()
    }
}

/// Lock a mutex, recovering the guard if a previous holder panicked
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Render a panic payload for logging
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "non-string panic payload".to_string())
}

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Ordered listener list with stable ids for detaching
struct Listeners<T> {
    next_id: u64,
    entries: Vec<(u64, Listener<T>)>,
}

impl<T> Listeners<T> {
    const fn new() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }

    fn add(&mut self, listener: Listener<T>) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.entries.push((id, listener));
        id
    }

    /// Detach a listener; the caller drops it once the lock is released
    fn remove(&mut self, id: u64) -> Option<Listener<T>> {
        let index = self.entries.iter().position(|(entry_id, _)| *entry_id == id)?;
        Some(self.entries.remove(index).1)
    }

    fn snapshot(&self) -> Vec<Listener<T>> {
        self.entries.iter().map(|(_, l)| Arc::clone(l)).collect()
    }
}

/// Registry entry for one action type
enum Registration<S> {
    /// Folded by a handler
    Handler(Arc<dyn Handler<S>>),
    /// Handled elsewhere (observed by another component), no state change
    Marked,
}

impl<S> Clone for Registration<S> {
    fn clone(&self) -> Self {
        match self {
            Self::Handler(h) => Self::Handler(Arc::clone(h)),
            Self::Marked => Self::Marked,
        }
    }
}

type SinkList<S> = Vec<(SinkTarget, Arc<dyn DiagnosticsSink<S>>)>;

/// Shared engine internals
struct Inner<S> {
    clock: Arc<dyn Clock>,
    registry: Mutex<HashMap<ActionType, Registration<S>>>,
    current: Mutex<Envelope<S>>,
    listeners: Mutex<Listeners<Envelope<S>>>,
    taps: Mutex<Listeners<RoutedAction<S>>>,
    sinks: Mutex<SinkList<S>>,
    output: watch::Sender<Envelope<S>>,
    action_broadcast: broadcast::Sender<RoutedAction<S>>,
    /// Actions waiting for the current dispatch chain
    queue: Mutex<VecDeque<Action<S>>>,
    /// Held for the duration of one dispatch chain
    turn: Mutex<()>,
    /// Thread currently draining the queue, if any
    draining_on: Mutex<Option<ThreadId>>,
}

/// Clears `draining_on` when a dispatch chain ends, even by unwinding
struct DrainGuard<'a>(&'a Mutex<Option<ThreadId>>);

impl<'a> DrainGuard<'a> {
    fn enter(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *lock(slot) = Some(std::thread::current().id());
        Self(slot)
    }
}

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

/// Engine module - The action-dispatch engine
///
/// Owns the current state, routes each dispatched action to at most one
/// handler, and publishes every finalized envelope.
pub mod engine {
    use super::{
        Action, ActionFlag, ActionType, Arc, AssertUnwindSafe, ConfigurationError, DiagnosticEntry,
        DiagnosticsSink, DrainGuard, EngineConfig, Envelope, Handler, HandlerError, Inner,
        Instant, IntoActionTypes, Listener, Listeners, Mutex, Registration, Route, RoutedAction,
        SinkTarget, Subscription, VecDeque, Weak, broadcast, catch_unwind, fmt, lock,
        panic_message, watch,
    };
    use crate::diagnostics::TracingSink;
    use crate::metrics::EngineMetrics;
    use reactive_context_core::composition::Source;
    use std::collections::HashMap;

    /// The Engine - reactive state container
    ///
    /// The Engine manages:
    /// 1. The current state (replaced, never mutated, by handler results)
    /// 2. The handler registry (exactly one handler per action type)
    /// 3. The output stream (latest envelope plus ordered listeners)
    /// 4. The action stream and diagnostics sinks
    ///
    /// Cloning an `Engine` is cheap and yields another handle to the same
    /// engine. Engines are created and passed explicitly; there is no global
    /// instance.
    ///
    /// # Dispatch Guarantees
    ///
    /// - `next_action` is synchronous: when it returns, the action has been
    ///   routed, folded, and published
    /// - Actions are processed strictly in submission order, one at a time
    /// - A dispatch issued while an action is being processed on the same
    ///   thread (from a handler, listener, tap, or sink) is queued and
    ///   processed right after the current one; dispatches from other threads
    ///   wait for the in-flight chain
    /// - Handler failures never escape: they are recorded on
    ///   `metadata.error` and the previous state is re-emitted
    ///
    /// # Example
    ///
    /// ```ignore
    /// let engine = Engine::new(TodoState::default());
    /// engine.on_action("ADD_ITEM", add_item)?;
    /// engine.on_action(["RESET", "CLEAR"], reset_state)?;
    ///
    /// engine.next_action(Action::new("ADD_ITEM", json!({ "id": 1, "name": "a" })));
    /// ```
    pub struct Engine<S> {
        inner: Arc<Inner<S>>,
    }

    impl<S> Engine<S>
    where
        S: Send + Sync + 'static,
    {
        /// Create an engine with the default configuration
        ///
        /// # Arguments
        ///
        /// - `initial_state`: The state before any action
        #[must_use]
        pub fn new(initial_state: S) -> Self {
            Self::with_config(initial_state, EngineConfig::default())
        }

        /// Create an engine with a custom configuration
        ///
        /// # Arguments
        ///
        /// - `initial_state`: The state before any action
        /// - `config`: Clock, broadcast capacity, and default sink settings
        #[must_use]
        pub fn with_config(initial_state: S, config: EngineConfig) -> Self {
            let initial = Envelope::initial(Arc::new(initial_state));
            let (output, _) = watch::channel(initial.clone());
            let (action_broadcast, _) = broadcast::channel(config.broadcast_capacity.max(1));

            let mut sinks: Vec<(SinkTarget, Arc<dyn DiagnosticsSink<S>>)> = Vec::new();
            if config.log_unhandled {
                sinks.push((
                    SinkTarget::Unhandled,
                    Arc::new(TracingSink::new(config.sink_level)),
                ));
            }
            if config.log_finalized {
                sinks.push((
                    SinkTarget::Finalized,
                    Arc::new(TracingSink::new(config.sink_level)),
                ));
            }

            Self {
                inner: Arc::new(Inner {
                    clock: config.clock,
                    registry: Mutex::new(HashMap::new()),
                    current: Mutex::new(initial),
                    listeners: Mutex::new(Listeners::new()),
                    taps: Mutex::new(Listeners::new()),
                    sinks: Mutex::new(sinks),
                    output,
                    action_broadcast,
                    queue: Mutex::new(VecDeque::new()),
                    turn: Mutex::new(()),
                    draining_on: Mutex::new(None),
                }),
            }
        }

        /// Dispatch an action
        ///
        /// Stamps `metadata.started` and `metadata.started_time`, then routes
        /// the action:
        ///
        /// - **Handled by a handler**: the handler folds the envelope; the
        ///   result (or, on failure, the unchanged previous state) is
        ///   published on the output stream
        /// - **Marked as handled**: visible on the action stream only
        /// - **Unhandled**: flagged [`ActionFlag::NoHandler`] and reported to
        ///   the unhandled diagnostics stream; state is untouched
        ///
        /// `metadata.prev_state` is stamped when processing begins, so it is
        /// exactly the state the action is folded against. Metadata set by the
        /// caller is discarded, except `correlation`.
        #[tracing::instrument(skip(self, action), fields(action_type = %action.action_type()), name = "engine_next_action")]
        pub fn next_action(&self, mut action: Action<S>) {
            {
                let metadata = action.metadata_mut();
                metadata.started = Some(Instant::now());
                metadata.started_time = Some(self.inner.clock.now());
                metadata.prev_state = None;
                metadata.next_state = None;
                metadata.error = None;
                metadata.flags.clear();
            }
            EngineMetrics::record_submitted();

            if self.is_draining_here() {
                tracing::trace!("Dispatch issued during processing, queued");
            }
            self.with_turn(|| lock(&self.inner.queue).push_back(action));
        }

        /// Register a handler for one or more action types
        ///
        /// The types become permanently handled. Registration is atomic: if
        /// any listed type is invalid or already has a handler, nothing is
        /// registered.
        ///
        /// # Errors
        ///
        /// - [`ConfigurationError::NoActionTypes`]: the list is empty
        /// - [`ConfigurationError::BlankActionType`]: a type name is empty
        /// - [`ConfigurationError::RepeatedActionType`]: a type is listed twice
        /// - [`ConfigurationError::DuplicateHandler`]: a type already has a handler
        pub fn on_action<T, H>(&self, types: T, handler: H) -> Result<(), ConfigurationError>
        where
            T: IntoActionTypes,
            H: Handler<S> + 'static,
        {
            let types = types.into_action_types();
            if types.is_empty() {
                return Err(ConfigurationError::NoActionTypes);
            }

            let mut registry = lock(&self.inner.registry);
            for (i, action_type) in types.iter().enumerate() {
                if action_type.is_blank() {
                    return Err(ConfigurationError::BlankActionType);
                }
                if types[..i].contains(action_type) {
                    return Err(ConfigurationError::RepeatedActionType {
                        action_type: action_type.to_string(),
                    });
                }
                if matches!(registry.get(action_type), Some(Registration::Handler(_))) {
                    tracing::error!(action_type = %action_type, "Rejected duplicate handler registration");
                    return Err(ConfigurationError::DuplicateHandler {
                        action_type: action_type.to_string(),
                    });
                }
            }

            let handler: Arc<dyn Handler<S>> = Arc::new(handler);
            for action_type in types {
                tracing::debug!(action_type = %action_type, "Registered handler");
                registry.insert(action_type, Registration::Handler(Arc::clone(&handler)));
            }
            Ok(())
        }

        /// Mark a type as handled without a state-transform function
        ///
        /// For types that only exist to be observed by another component,
        /// such as a lifecycle abort signal. Marking is idempotent and does
        /// not prevent a handler from being registered later.
        pub fn mark_action_to_have_handler(&self, action_type: impl Into<ActionType>) {
            let action_type = action_type.into();
            let mut registry = lock(&self.inner.registry);
            if !registry.contains_key(&action_type) {
                tracing::debug!(action_type = %action_type, "Marked action type as handled");
                registry.insert(action_type, Registration::Marked);
            }
        }

        /// Look an action type up in the registry
        #[must_use]
        pub fn route(&self, action_type: &str) -> Route {
            if lock(&self.inner.registry).contains_key(action_type) {
                Route::Handled
            } else {
                Route::Unhandled
            }
        }

        /// The latest envelope
        ///
        /// Never blocks on handler execution from the calling thread's own
        /// dispatch chain; returns the last published envelope.
        #[must_use]
        pub fn get_value(&self) -> Envelope<S> {
            lock(&self.inner.current).clone()
        }

        /// The current state
        #[must_use]
        pub fn state(&self) -> Arc<S> {
            Arc::clone(&lock(&self.inner.current).state)
        }

        /// Subscribe to the output stream
        ///
        /// The listener is called immediately with the latest envelope, then
        /// with every newly published envelope, in order, on the dispatching
        /// thread. Actions dispatched by the listener during that first call
        /// are processed before `subscribe` returns.
        pub fn subscribe<F>(&self, listener: F) -> Subscription
        where
            F: Fn(&Envelope<S>) + Send + Sync + 'static,
        {
            let listener: Listener<Envelope<S>> = Arc::new(listener);
            self.with_turn(|| {
                let id = lock(&self.inner.listeners).add(Arc::clone(&listener));
                let latest = self.get_value();
                Self::contain("output listener", || listener(&latest));
                let weak = Arc::downgrade(&self.inner);
                Subscription::new(move || {
                    if let Some(inner) = Weak::upgrade(&weak) {
                        let removed = lock(&inner.listeners).remove(id);
                        drop(removed);
                    }
                })
            })
        }

        /// Async view of the output stream
        ///
        /// The receiver always holds the latest envelope.
        #[must_use]
        pub fn watch(&self) -> watch::Receiver<Envelope<S>> {
            self.inner.output.subscribe()
        }

        /// Subscribe to the action stream asynchronously
        ///
        /// Every processed action (handled or not) is broadcast once its
        /// routing is complete. Slow receivers may observe
        /// [`broadcast::error::RecvError::Lagged`].
        #[must_use]
        pub fn subscribe_actions(&self) -> broadcast::Receiver<RoutedAction<S>> {
            self.inner.action_broadcast.subscribe()
        }

        /// Register a synchronous tap on the action stream
        ///
        /// Unlike [`Engine::subscribe_actions`] a tap can never lag: it runs
        /// on the dispatching thread right after each action is processed.
        pub fn tap_actions<F>(&self, tap: F) -> Subscription
        where
            F: Fn(&RoutedAction<S>) + Send + Sync + 'static,
        {
            let id = lock(&self.inner.taps).add(Arc::new(tap));
            let weak = Arc::downgrade(&self.inner);
            Subscription::new(move || {
                if let Some(inner) = Weak::upgrade(&weak) {
                    let removed = lock(&inner.taps).remove(id);
                    drop(removed);
                }
            })
        }

        /// Attach a diagnostics sink to one or both diagnostic streams
        pub fn add_sink(&self, target: SinkTarget, sink: Arc<dyn DiagnosticsSink<S>>) {
            lock(&self.inner.sinks).push((target, sink));
        }

        /// A named composition source snapshotting this engine's state as JSON
        #[must_use]
        pub fn source(&self, name: impl Into<String>) -> Source
        where
            S: serde::Serialize,
        {
            let engine = self.clone();
            Source::new(name, move || {
                serde_json::to_value(&*engine.state()).unwrap_or_else(|e| {
                    tracing::warn!(error = %e, "State could not be serialized for a source");
                    serde_json::Value::Null
                })
            })
        }

        fn is_draining_here(&self) -> bool {
            *lock(&self.inner.draining_on) == Some(std::thread::current().id())
        }

        /// Run `f` as part of a dispatch chain
        ///
        /// Outside a chain, takes the turn, runs `f`, then drains every
        /// action queued meanwhile (including dispatches issued by `f`
        /// itself) before releasing the turn. Inside a chain, `f` runs
        /// directly and the outer chain drains.
        fn with_turn<R>(&self, f: impl FnOnce() -> R) -> R {
            if self.is_draining_here() {
                return f();
            }
            let _turn = lock(&self.inner.turn);
            let _draining = DrainGuard::enter(&self.inner.draining_on);
            let result = f();
            self.drain();
            result
        }

        /// Process queued actions until the queue is empty
        fn drain(&self) {
            loop {
                // Pop in its own statement so the queue lock is released
                // before processing.
                let next = lock(&self.inner.queue).pop_front();
                match next {
                    Some(action) => self.process(action),
                    None => break,
                }
            }
        }

        /// Run user code, containing panics
        fn contain<R>(what: &str, f: impl FnOnce() -> R) -> Option<R> {
            match catch_unwind(AssertUnwindSafe(f)) {
                Ok(value) => Some(value),
                Err(payload) => {
                    tracing::error!(
                        component = what,
                        panic = %panic_message(payload.as_ref()),
                        "Observer panicked; continuing dispatch"
                    );
                    None
                }
            }
        }

        /// Process one action: route, fold, publish
        fn process(&self, mut action: Action<S>) {
            let prev_state = self.state();
            action.metadata_mut().prev_state = Some(Arc::clone(&prev_state));

            let registration = lock(&self.inner.registry)
                .get(action.action_type())
                .cloned();

            match registration {
                None => {
                    tracing::debug!(action_type = %action.action_type(), "No handler registered");
                    EngineMetrics::record_unhandled();
                    action.metadata_mut().flags.push(ActionFlag::NoHandler);
                    let action = Arc::new(action);
                    self.report(&action, SinkTarget::Unhandled);
                    self.emit_action(&action, Route::Unhandled);
                }
                Some(Registration::Marked) => {
                    tracing::trace!(action_type = %action.action_type(), "Action observed without handler");
                    let action = Arc::new(action);
                    self.emit_action(&action, Route::Handled);
                }
                Some(Registration::Handler(handler)) => {
                    let action = Self::fold(handler.as_ref(), action, &prev_state);
                    let state = action
                        .metadata()
                        .next_state
                        .clone()
                        .unwrap_or(prev_state);
                    let action = Arc::new(action);
                    self.publish(Envelope::new(Arc::clone(&action), state));
                    self.report(&action, SinkTarget::Finalized);
                    self.emit_action(&action, Route::Handled);
                }
            }
        }

        /// Run the handler and record its result on the action's metadata
        fn fold(handler: &dyn Handler<S>, action: Action<S>, prev_state: &Arc<S>) -> Action<S> {
            let shared = Arc::new(action);
            let start = Instant::now();
            let result = {
                let input = Envelope::new(Arc::clone(&shared), Arc::clone(prev_state));
                catch_unwind(AssertUnwindSafe(|| handler.handle(&input))).unwrap_or_else(
                    |payload| Err(HandlerError::Panicked(panic_message(payload.as_ref()))),
                )
            };
            EngineMetrics::record_handler(start.elapsed());

            let mut action = Arc::unwrap_or_clone(shared);
            match result {
                Ok(next_state) => {
                    tracing::trace!(action_type = %action.action_type(), "Handler produced next state");
                    action.metadata_mut().next_state = Some(Arc::new(next_state));
                }
                Err(error) => {
                    tracing::warn!(
                        action_type = %action.action_type(),
                        error = %error,
                        "Handler failed; keeping previous state"
                    );
                    EngineMetrics::record_handler_failure();
                    action.metadata_mut().error = Some(error);
                }
            }
            action
        }

        /// Update the last-value cache and notify output listeners
        fn publish(&self, envelope: Envelope<S>) {
            *lock(&self.inner.current) = envelope.clone();
            self.inner.output.send_replace(envelope.clone());

            let listeners = lock(&self.inner.listeners).snapshot();
            for listener in listeners {
                Self::contain("output listener", || listener(&envelope));
            }
        }

        /// Hand an entry to every sink attached to `stream`
        fn report(&self, action: &Arc<Action<S>>, stream: SinkTarget) {
            let sinks: Vec<_> = lock(&self.inner.sinks)
                .iter()
                .filter(|(target, _)| target.accepts(stream))
                .map(|(_, sink)| Arc::clone(sink))
                .collect();
            if sinks.is_empty() {
                return;
            }

            let entry = DiagnosticEntry::observe(Arc::clone(action), stream, Instant::now());
            for sink in sinks {
                match Self::contain("diagnostics sink", || sink.record(&entry)) {
                    Some(Ok(())) => {}
                    Some(Err(error)) => {
                        EngineMetrics::record_sink_failure();
                        tracing::warn!(
                            stream = %stream,
                            error = %error,
                            "Diagnostics sink failed to record entry"
                        );
                    }
                    None => {
                        EngineMetrics::record_sink_failure();
                    }
                }
            }
        }

        /// Notify taps and async observers of a processed action
        fn emit_action(&self, action: &Arc<Action<S>>, route: Route) {
            let routed = RoutedAction {
                action: Arc::clone(action),
                route,
            };
            let taps = lock(&self.inner.taps).snapshot();
            for tap in taps {
                Self::contain("action tap", || tap(&routed));
            }
            // No receivers is fine
            let _ = self.inner.action_broadcast.send(routed);
        }
    }

    impl<S> Clone for Engine<S> {
        fn clone(&self) -> Self {
            Self {
                inner: Arc::clone(&self.inner),
            }
        }
    }

    impl<S> fmt::Debug for Engine<S> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Engine")
                .field("handled_types", &lock(&self.inner.registry).len())
                .field("listeners", &lock(&self.inner.listeners).entries.len())
                .finish_non_exhaustive()
        }
    }
}

// Re-export for convenience
pub use engine::Engine;
pub use lifecycle::{LifecycleConfig, LifecycleHandle, invoke, trigger_abort};
