//! Promise-backed lifecycle controller.
//!
//! [`invoke`] turns one asynchronous task into a sequence of actions on an
//! [`Engine`]:
//!
//! 1. `init` is dispatched with the caller's logging arguments
//! 2. the task is created through its factory
//! 3. `pending` is dispatched
//! 4. exactly one of `fulfilled`, `rejected`, or (by observing the abort
//!    type) nothing is produced
//!
//! Cancellation is cooperative. The factory receives a [`CancellationToken`]
//! that is cancelled when an abort is observed; the controller also stops
//! polling the task so a late result is never dispatched.
//!
//! All actions of one invocation carry the same [`InvocationId`] in
//! `metadata.correlation`. An abort action without a correlation aborts every
//! in-flight invocation using that abort type; a correlated abort only
//! aborts its own invocation.

use crate::engine::Engine;
use crate::error::LifecycleError;
use crate::metrics::LifecycleMetrics;
use reactive_context_core::{
    Action, ActionType, InvocationId, LifecycleOutcome, LifecyclePhase, LifecycleTypes,
    embedded_error, json,
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Inputs of one invocation
pub struct LifecycleConfig<S, F> {
    /// The engine the lifecycle actions are dispatched to
    pub engine: Engine<S>,
    /// The five action types
    pub types: LifecycleTypes,
    /// Creates the task; receives the invocation's cancellation token
    pub task_factory: F,
    /// Payload of the `init` action
    pub logging_args: Value,
}

impl<S, F> LifecycleConfig<S, F> {
    /// Create a config with `null` logging arguments
    #[must_use]
    pub const fn new(engine: Engine<S>, types: LifecycleTypes, task_factory: F) -> Self {
        Self {
            engine,
            types,
            task_factory,
            logging_args: Value::Null,
        }
    }

    /// Set the payload of the `init` action
    #[must_use]
    pub fn with_logging_args(mut self, logging_args: Value) -> Self {
        self.logging_args = logging_args;
        self
    }
}

/// Shared progress of one invocation
#[derive(Debug, Clone)]
struct Progress {
    /// Phase claimed by the controller; decides the abort race
    phase: LifecyclePhase,
    /// Phase of the latest action the engine has processed
    observed: LifecyclePhase,
    /// Set once every action of the invocation has been dispatched
    outcome: Option<LifecycleOutcome>,
}

impl Progress {
    const fn new(phase: LifecyclePhase) -> Self {
        Self {
            phase,
            observed: phase,
            outcome: None,
        }
    }
}

/// Handle to a running invocation
///
/// Cloning is cheap; all clones observe the same invocation.
pub struct LifecycleHandle<S> {
    id: InvocationId,
    abort_type: ActionType,
    engine: Engine<S>,
    progress: watch::Receiver<Progress>,
}

impl<S> Clone for LifecycleHandle<S> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            abort_type: self.abort_type.clone(),
            engine: self.engine.clone(),
            progress: self.progress.clone(),
        }
    }
}

impl<S> std::fmt::Debug for LifecycleHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleHandle")
            .field("id", &self.id)
            .field("phase", &self.progress.borrow().observed)
            .finish_non_exhaustive()
    }
}

impl<S> LifecycleHandle<S>
where
    S: Send + Sync + 'static,
{
    /// Correlation id of this invocation
    #[must_use]
    pub const fn id(&self) -> InvocationId {
        self.id
    }

    /// Phase of the latest lifecycle action the engine has processed
    ///
    /// Stays `Init` while `init` and `pending` are still queued behind the
    /// action being processed (as when `invoke` runs inside a listener).
    /// Becomes `Aborted` as soon as an abort is accepted.
    #[must_use]
    pub fn phase(&self) -> LifecyclePhase {
        self.progress.borrow().observed
    }

    /// The outcome, if the invocation has settled
    #[must_use]
    pub fn outcome(&self) -> Option<LifecycleOutcome> {
        self.progress.borrow().outcome.clone()
    }

    /// Wait until the invocation settles
    ///
    /// For `fulfilled` and `rejected` this resolves after the terminal action
    /// has been dispatched, so the engine state already reflects it. If the
    /// runtime shuts down before the task completes, the invocation is
    /// reported as aborted.
    pub async fn settled(&self) -> LifecycleOutcome {
        let mut progress = self.progress.clone();
        match progress.wait_for(|p| p.outcome.is_some()).await {
            Ok(p) => p.outcome.clone().unwrap_or(LifecycleOutcome::Aborted),
            Err(_) => {
                tracing::warn!(invocation = %self.id, "Lifecycle controller stopped before settling");
                LifecycleOutcome::Aborted
            }
        }
    }

    /// Abort this invocation only
    ///
    /// Dispatches the abort type correlated with this invocation's id. Has no
    /// effect once the invocation has settled.
    pub fn abort(&self) {
        self.engine
            .next_action(Action::of_type(self.abort_type.clone()).correlated(self.id));
    }
}

/// Start a lifecycle invocation
///
/// Dispatches `init` and `pending` synchronously before returning; the
/// terminal action is dispatched from a spawned Tokio task.
///
/// The task outcome is classified as:
///
/// - `Err(e)` → `rejected` with `{"error": "<e and its causes>"}`
/// - `Ok(v)` where `v.body.errorCode` or `v.body.errorType` is truthy →
///   `rejected` with `v`
/// - any other `Ok(v)` → `fulfilled` with `v`
///
/// # Errors
///
/// - [`LifecycleError::Configuration`] if the five types are not distinct
///   non-empty names
/// - [`LifecycleError::NoRuntime`] if called outside a Tokio runtime
///
/// Nothing is dispatched when an error is returned.
#[tracing::instrument(skip_all, fields(init = %config.types.init))]
pub fn invoke<S, F, Fut>(
    config: LifecycleConfig<S, F>,
) -> Result<LifecycleHandle<S>, LifecycleError>
where
    S: Send + Sync + 'static,
    F: FnOnce(CancellationToken) -> Fut,
    Fut: Future<Output = anyhow::Result<Value>> + Send + 'static,
{
    let LifecycleConfig {
        engine,
        types,
        task_factory,
        logging_args,
    } = config;

    types.validate()?;
    let runtime = tokio::runtime::Handle::try_current().map_err(|_| LifecycleError::NoRuntime)?;

    let id = InvocationId::new();
    LifecycleMetrics::record_invocation();
    tracing::debug!(invocation = %id, "Starting lifecycle invocation");

    engine.mark_action_to_have_handler(types.abort.clone());

    let token = CancellationToken::new();
    let (progress_tx, progress_rx) = watch::channel(Progress::new(LifecyclePhase::Init));
    let progress_tx = Arc::new(progress_tx);

    // Armed before anything is dispatched so an abort reacting to `init` or
    // `pending` is not missed.
    let tap = {
        let types = types.clone();
        let progress = Arc::clone(&progress_tx);
        let token = token.clone();
        engine.tap_actions(move |routed| {
            let action = &routed.action;
            let correlation = action.metadata().correlation;
            if *action.action_type() == types.abort {
                if correlation.is_none_or(|target| target == id) {
                    request_abort(id, &progress, &token);
                }
                return;
            }
            if correlation != Some(id) {
                return;
            }
            let processed = if *action.action_type() == types.pending {
                LifecyclePhase::Pending
            } else if *action.action_type() == types.fulfilled {
                LifecyclePhase::Fulfilled
            } else if *action.action_type() == types.rejected {
                LifecyclePhase::Rejected
            } else {
                return;
            };
            progress.send_if_modified(|p| {
                if p.observed.is_terminal() {
                    return false;
                }
                p.observed = processed;
                true
            });
        })
    };

    engine.next_action(Action::new(types.init.clone(), logging_args).correlated(id));

    let task = task_factory(token.clone());

    progress_tx.send_modify(|p| p.phase = LifecyclePhase::Pending);
    engine.next_action(
        Action::new(types.pending.clone(), json!({ "invocation": id })).correlated(id),
    );

    // An abort that arrived before `pending` only cancelled the token
    if token.is_cancelled() {
        request_abort(id, &progress_tx, &token);
    }

    let handle = LifecycleHandle {
        id,
        abort_type: types.abort.clone(),
        engine: engine.clone(),
        progress: progress_rx,
    };

    runtime.spawn(async move {
        let _tap = tap;
        let result = tokio::select! {
            biased;
            () = token.cancelled() => None,
            result = task => Some(result),
        };
        let Some(result) = result else {
            tracing::trace!(invocation = %id, "Task dropped after abort");
            return;
        };

        let outcome = classify(result);
        let phase = outcome.phase();
        let won = progress_tx.send_if_modified(|p| {
            if p.phase == LifecyclePhase::Pending {
                p.phase = phase;
                true
            } else {
                false
            }
        });
        if !won {
            tracing::trace!(invocation = %id, "Result arrived after abort; discarded");
            return;
        }

        let (action_type, payload) = match &outcome {
            LifecycleOutcome::Fulfilled(value) => (types.fulfilled.clone(), value.clone()),
            LifecycleOutcome::Rejected(value) => (types.rejected.clone(), value.clone()),
            LifecycleOutcome::Aborted => return,
        };
        LifecycleMetrics::record_outcome(phase);
        tracing::debug!(invocation = %id, outcome = %phase, "Lifecycle invocation settled");

        engine.next_action(Action::new(action_type, payload).correlated(id));
        progress_tx.send_modify(|p| p.outcome = Some(outcome));
    });

    Ok(handle)
}

/// Dispatch an uncorrelated abort
///
/// Marks `abort_type` as handled (so it never reaches the unhandled
/// diagnostics stream) and dispatches it. Every in-flight invocation using
/// this abort type is aborted.
pub fn trigger_abort<S>(engine: &Engine<S>, abort_type: impl Into<ActionType>)
where
    S: Send + Sync + 'static,
{
    let abort_type = abort_type.into();
    engine.mark_action_to_have_handler(abort_type.clone());
    engine.next_action(Action::of_type(abort_type));
}

/// Move the invocation to `Aborted` if it has not settled
///
/// Before `pending` only the token is cancelled; the controller finishes the
/// transition once `pending` has been dispatched.
fn request_abort(id: InvocationId, progress: &watch::Sender<Progress>, token: &CancellationToken) {
    let mut settled = false;
    progress.send_if_modified(|p| match p.phase {
        LifecyclePhase::Init => {
            token.cancel();
            false
        }
        LifecyclePhase::Pending => {
            p.phase = LifecyclePhase::Aborted;
            p.observed = LifecyclePhase::Aborted;
            p.outcome = Some(LifecycleOutcome::Aborted);
            settled = true;
            true
        }
        _ => false,
    });

    if settled {
        token.cancel();
        LifecycleMetrics::record_outcome(LifecyclePhase::Aborted);
        tracing::debug!(invocation = %id, "Lifecycle invocation aborted");
    }
}

/// Map a task result onto the terminal outcome
fn classify(result: anyhow::Result<Value>) -> LifecycleOutcome {
    match result {
        Err(error) => LifecycleOutcome::Rejected(json!({ "error": format!("{error:#}") })),
        Ok(value) if embedded_error(&value).is_some() => LifecycleOutcome::Rejected(value),
        Ok(value) => LifecycleOutcome::Fulfilled(value),
    }
}
