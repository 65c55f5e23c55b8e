//! Integration tests for the lifecycle controller
//!
//! Drives invocations with `ManualTask` so every ordering (result first,
//! abort first, abort after settling) can be forced deterministically.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)] // Test code can use unwrap/expect/panic

use reactive_context_core::{
    Action, ConfigurationError, Envelope, HandlerError, LifecycleOutcome, LifecyclePhase,
    LifecycleTypes, SinkTarget, Value, json,
};
use reactive_context_runtime::{
    Engine, EngineConfig, LifecycleConfig, LifecycleError, LifecycleHandle, Route, invoke,
    trigger_abort,
};
use reactive_context_testing::{ManualTask, OutputRecorder, RecordingSink, init_test_tracing};
use std::sync::Arc;
use std::time::Duration;

// ============================================================================
// Test Fixtures
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
struct FetchState {
    loading: bool,
    items: Vec<Value>,
    error: Option<Value>,
}

fn started(_: &Envelope<FetchState>) -> Result<FetchState, HandlerError> {
    Ok(FetchState {
        loading: true,
        ..FetchState::default()
    })
}

fn pending(envelope: &Envelope<FetchState>) -> Result<FetchState, HandlerError> {
    Ok(envelope.state().clone())
}

fn fulfilled(envelope: &Envelope<FetchState>) -> Result<FetchState, HandlerError> {
    let payload = envelope
        .action()
        .ok_or_else(|| HandlerError::failed("missing action"))?
        .payload();
    let items = payload["body"]["items"].as_array().cloned().unwrap_or_default();
    Ok(FetchState {
        loading: false,
        items,
        error: None,
    })
}

fn rejected(envelope: &Envelope<FetchState>) -> Result<FetchState, HandlerError> {
    let payload = envelope
        .action()
        .ok_or_else(|| HandlerError::failed("missing action"))?
        .payload()
        .clone();
    Ok(FetchState {
        loading: false,
        items: Vec::new(),
        error: Some(payload),
    })
}

fn types() -> LifecycleTypes {
    LifecycleTypes::from_prefix("FETCH_ITEMS")
}

fn fetch_engine() -> Engine<FetchState> {
    init_test_tracing();
    let config = EngineConfig::default()
        .with_unhandled_logging(false)
        .with_finalized_logging(false);
    let engine = Engine::with_config(FetchState::default(), config);
    let types = types();
    engine.on_action(types.init, started).unwrap();
    engine.on_action(types.pending, pending).unwrap();
    engine.on_action(types.fulfilled, fulfilled).unwrap();
    engine.on_action(types.rejected, rejected).unwrap();
    engine
}

fn start(engine: &Engine<FetchState>, task: &ManualTask) -> LifecycleHandle<FetchState> {
    invoke(
        LifecycleConfig::new(engine.clone(), types(), task.factory())
            .with_logging_args(json!({ "page": 1 })),
    )
    .unwrap()
}

async fn settled(handle: &LifecycleHandle<FetchState>) -> LifecycleOutcome {
    tokio::time::timeout(Duration::from_secs(1), handle.settled())
        .await
        .expect("invocation did not settle")
}

/// Let spawned tasks run
async fn yield_a_few() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Ordering
// ============================================================================

#[tokio::test]
async fn test_init_and_pending_are_dispatched_before_invoke_returns() {
    let engine = fetch_engine();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();

    let handle = start(&engine, &task);

    assert!(task.was_created());
    assert_eq!(handle.phase(), LifecyclePhase::Pending);
    assert_eq!(
        recorder.action_types(),
        vec!["FETCH_ITEMS", "FETCH_ITEMS_PENDING"]
    );

    let envelopes = recorder.envelopes();
    let init = envelopes[1].action().unwrap();
    assert_eq!(init.payload(), &json!({ "page": 1 }));
    assert_eq!(init.metadata().correlation, Some(handle.id()));
    let pending = envelopes[2].action().unwrap();
    assert_eq!(pending.metadata().correlation, Some(handle.id()));
}

#[tokio::test]
async fn test_success_dispatches_fulfilled() {
    let engine = fetch_engine();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();
    let handle = start(&engine, &task);

    let body = json!({ "body": { "items": [1, 2] } });
    assert!(task.resolve(body.clone()));

    assert_eq!(settled(&handle).await, LifecycleOutcome::Fulfilled(body));
    assert_eq!(handle.phase(), LifecyclePhase::Fulfilled);
    assert_eq!(
        recorder.action_types(),
        vec!["FETCH_ITEMS", "FETCH_ITEMS_PENDING", "FETCH_ITEMS_FULFILLED"]
    );
    assert_eq!(engine.state().items, vec![json!(1), json!(2)]);
    assert!(!engine.state().loading);
}

#[tokio::test]
async fn test_embedded_error_code_is_rejected() {
    let engine = fetch_engine();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();
    let handle = start(&engine, &task);

    let body = json!({ "body": { "errorCode": "X" } });
    task.resolve(body.clone());

    assert_eq!(settled(&handle).await, LifecycleOutcome::Rejected(body.clone()));
    assert_eq!(
        recorder.action_types(),
        vec!["FETCH_ITEMS", "FETCH_ITEMS_PENDING", "FETCH_ITEMS_REJECTED"]
    );
    assert_eq!(engine.state().error, Some(body));
}

#[tokio::test]
async fn test_embedded_error_type_is_rejected() {
    let engine = fetch_engine();
    let task = ManualTask::new();
    let handle = start(&engine, &task);

    task.resolve(json!({ "body": { "errorType": "Timeout" } }));

    assert!(matches!(
        settled(&handle).await,
        LifecycleOutcome::Rejected(_)
    ));
}

#[tokio::test]
async fn test_transport_failure_is_rejected_with_message() {
    let engine = fetch_engine();
    let task = ManualTask::new();
    let handle = start(&engine, &task);

    task.fail(anyhow::anyhow!("connection refused"));

    assert_eq!(
        settled(&handle).await,
        LifecycleOutcome::Rejected(json!({ "error": "connection refused" }))
    );
    assert_eq!(
        engine.state().error,
        Some(json!({ "error": "connection refused" }))
    );
}

// ============================================================================
// Abort
// ============================================================================

#[tokio::test]
async fn test_abort_suppresses_late_result() {
    let engine = fetch_engine();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();
    let handle = start(&engine, &task);

    trigger_abort(&engine, "FETCH_ITEMS_ABORT");

    assert_eq!(handle.phase(), LifecyclePhase::Aborted);
    assert!(task.was_cancelled());
    assert_eq!(settled(&handle).await, LifecycleOutcome::Aborted);

    // The result arrives after the abort and is discarded
    task.resolve(json!({ "body": { "items": [1] } }));
    yield_a_few().await;

    assert_eq!(
        recorder.action_types(),
        vec!["FETCH_ITEMS", "FETCH_ITEMS_PENDING"]
    );
    assert!(engine.state().items.is_empty());
}

#[tokio::test]
async fn test_abort_after_settling_is_a_no_op() {
    let engine = fetch_engine();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();
    let handle = start(&engine, &task);

    task.resolve(json!({ "body": { "items": [] } }));
    settled(&handle).await;

    handle.abort();

    assert_eq!(handle.phase(), LifecyclePhase::Fulfilled);
    assert!(!task.was_cancelled());
    assert_eq!(recorder.action_types().len(), 3);
}

#[tokio::test]
async fn test_abort_type_is_marked_as_handled() {
    let engine = fetch_engine();
    let unhandled = Arc::new(RecordingSink::<FetchState>::new());
    engine.add_sink(SinkTarget::Unhandled, unhandled.clone());
    assert_eq!(engine.route("FETCH_ITEMS_ABORT"), Route::Unhandled);

    let task = ManualTask::new();
    let handle = start(&engine, &task);
    assert_eq!(engine.route("FETCH_ITEMS_ABORT"), Route::Handled);

    handle.abort();
    assert!(unhandled.is_empty());
}

#[tokio::test]
async fn test_correlated_abort_targets_one_invocation() {
    let engine = fetch_engine();
    let first_task = ManualTask::new();
    let second_task = ManualTask::new();
    let first = start(&engine, &first_task);
    let second = start(&engine, &second_task);
    assert_ne!(first.id(), second.id());

    first.abort();

    assert_eq!(first.phase(), LifecyclePhase::Aborted);
    assert_eq!(second.phase(), LifecyclePhase::Pending);
    assert!(first_task.was_cancelled());
    assert!(!second_task.was_cancelled());

    second_task.resolve(json!({ "body": { "items": [3] } }));
    assert!(matches!(
        settled(&second).await,
        LifecycleOutcome::Fulfilled(_)
    ));
}

#[tokio::test]
async fn test_uncorrelated_abort_targets_every_invocation() {
    let engine = fetch_engine();
    let tasks = [ManualTask::new(), ManualTask::new()];
    let handles: Vec<_> = tasks.iter().map(|task| start(&engine, task)).collect();

    trigger_abort(&engine, "FETCH_ITEMS_ABORT");

    for (task, handle) in tasks.iter().zip(&handles) {
        assert!(task.was_cancelled());
        assert_eq!(settled(handle).await, LifecycleOutcome::Aborted);
    }
}

#[tokio::test]
async fn test_abort_dispatched_in_reaction_to_pending() {
    let engine = fetch_engine();
    let reactor = engine.clone();
    let _sub = engine.subscribe(move |envelope| {
        if envelope.action_type().is_some_and(|t| t == "FETCH_ITEMS_PENDING") {
            reactor.next_action(Action::of_type("FETCH_ITEMS_ABORT"));
        }
    });

    let task = ManualTask::new();
    let handle = start(&engine, &task);

    assert_eq!(handle.phase(), LifecyclePhase::Aborted);
    assert!(task.was_cancelled());
}

#[tokio::test]
async fn test_abort_dispatched_in_reaction_to_init() {
    let engine = fetch_engine();
    let reactor = engine.clone();
    let _sub = engine.subscribe(move |envelope| {
        if envelope.action_type().is_some_and(|t| t == "FETCH_ITEMS") {
            reactor.next_action(Action::of_type("FETCH_ITEMS_ABORT"));
        }
    });

    let task = ManualTask::new();
    let handle = start(&engine, &task);

    // The task is still created and `pending` still dispatched
    assert!(task.was_created());
    assert!(task.was_cancelled());
    assert_eq!(handle.phase(), LifecyclePhase::Aborted);
    assert_eq!(settled(&handle).await, LifecycleOutcome::Aborted);
}

#[tokio::test]
async fn test_phase_follows_processed_actions_when_invoked_from_a_listener() {
    let engine = fetch_engine();
    engine.on_action("LOAD", pending).unwrap();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();

    let slot: Arc<std::sync::Mutex<Option<(LifecycleHandle<FetchState>, LifecyclePhase)>>> =
        Arc::new(std::sync::Mutex::new(None));
    let factory = std::sync::Mutex::new(Some(task.factory()));
    let reactor = engine.clone();
    let store = Arc::clone(&slot);
    let _sub = engine.subscribe(move |envelope| {
        if !envelope.action_type().is_some_and(|t| t == "LOAD") {
            return;
        }
        let Some(factory) = factory.lock().unwrap().take() else {
            return;
        };
        let handle = invoke(LifecycleConfig::new(reactor.clone(), types(), factory)).unwrap();
        // `init` and `pending` are queued behind LOAD
        let phase = handle.phase();
        *store.lock().unwrap() = Some((handle, phase));
    });

    engine.next_action(Action::of_type("LOAD"));

    let (handle, phase_inside) = slot.lock().unwrap().take().unwrap();
    assert_eq!(phase_inside, LifecyclePhase::Init);
    assert_eq!(handle.phase(), LifecyclePhase::Pending);
    assert_eq!(
        recorder.action_types(),
        vec!["LOAD", "FETCH_ITEMS", "FETCH_ITEMS_PENDING"]
    );

    task.resolve(json!({ "body": { "items": [1] } }));
    settled(&handle).await;
    assert_eq!(handle.phase(), LifecyclePhase::Fulfilled);
}

#[tokio::test]
async fn test_token_is_visible_to_cooperative_tasks() {
    let engine = fetch_engine();
    let (observed_tx, observed_rx) = tokio::sync::oneshot::channel();

    let handle = invoke(LifecycleConfig::new(
        engine.clone(),
        types(),
        move |token: tokio_util::sync::CancellationToken| {
            tokio::spawn(async move {
                token.cancelled().await;
                let _ = observed_tx.send(());
            });
            std::future::pending::<anyhow::Result<Value>>()
        },
    ))
    .unwrap();

    handle.abort();

    tokio::time::timeout(Duration::from_secs(1), observed_rx)
        .await
        .expect("task never observed cancellation")
        .unwrap();
}

// ============================================================================
// Configuration
// ============================================================================

#[tokio::test]
async fn test_ambiguous_types_fail_before_dispatch() {
    let engine = fetch_engine();
    let recorder = OutputRecorder::attach(&engine);
    let task = ManualTask::new();

    let result = invoke(LifecycleConfig::new(
        engine.clone(),
        LifecycleTypes::new("A", "B", "B", "C", "D"),
        task.factory(),
    ));

    assert_eq!(
        result.unwrap_err(),
        LifecycleError::Configuration(ConfigurationError::AmbiguousLifecycleTypes {
            action_type: "B".into()
        })
    );
    assert!(!task.was_created());
    assert!(recorder.action_types().is_empty());
}
