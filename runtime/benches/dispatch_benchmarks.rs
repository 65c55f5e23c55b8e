//! Dispatch Performance Benchmarks
//!
//! These benchmarks track the cost of the synchronous dispatch path:
//! - Handler execution in isolation (no engine overhead)
//! - Engine throughput for handled, marked, and unhandled actions
//! - Listener fan-out on the output stream
//!
//! Run with: `cargo bench`

#![allow(missing_docs)] // Benchmarks don't need extensive docs
#![allow(clippy::unwrap_used)] // Benchmarks can unwrap during setup

use criterion::{Criterion, Throughput, black_box, criterion_group, criterion_main};
use reactive_context_core::{Action, Envelope, Handler, HandlerError, json};
use reactive_context_runtime::{Engine, EngineConfig};
use std::sync::Arc;

// Bench state
#[derive(Clone, Debug)]
struct BenchState {
    counter: i64,
    data: Arc<Vec<u8>>, // Shared so handlers do not copy it
}

impl Default for BenchState {
    fn default() -> Self {
        Self {
            counter: 0,
            data: Arc::new(vec![0; 1024]),
        }
    }
}

fn increment(envelope: &Envelope<BenchState>) -> Result<BenchState, HandlerError> {
    let state = envelope.state();
    Ok(BenchState {
        counter: state.counter + 1,
        data: Arc::clone(&state.data),
    })
}

fn set_value(envelope: &Envelope<BenchState>) -> Result<BenchState, HandlerError> {
    let value: i64 = envelope
        .action()
        .ok_or_else(|| HandlerError::failed("missing action"))?
        .payload_as()?;
    Ok(BenchState {
        counter: value,
        data: Arc::clone(&envelope.state().data),
    })
}

fn bench_engine() -> Engine<BenchState> {
    let config = EngineConfig::default()
        .with_unhandled_logging(false)
        .with_finalized_logging(false);
    let engine = Engine::with_config(BenchState::default(), config);
    engine.on_action("INCREMENT", increment).unwrap();
    engine.on_action("SET_VALUE", set_value).unwrap();
    engine.mark_action_to_have_handler("OBSERVED");
    engine
}

/// Benchmark handler execution in isolation (no engine overhead)
fn benchmark_handler_execution(c: &mut Criterion) {
    let mut group = c.benchmark_group("handler");
    group.throughput(Throughput::Elements(1));

    let envelope = Envelope::new(
        Arc::new(Action::new("SET_VALUE", json!(42))),
        Arc::new(BenchState::default()),
    );

    group.bench_function("increment", |b| {
        b.iter(|| {
            let _next = increment.handle(black_box(&envelope));
        });
    });

    group.bench_function("set_value", |b| {
        b.iter(|| {
            let _next = set_value.handle(black_box(&envelope));
        });
    });

    group.finish();
}

/// Benchmark engine throughput (actions/sec)
fn benchmark_engine_throughput(c: &mut Criterion) {
    let mut group = c.benchmark_group("engine_throughput");
    group.throughput(Throughput::Elements(1));

    group.bench_function("handled", |b| {
        let engine = bench_engine();
        b.iter(|| engine.next_action(black_box(Action::of_type("INCREMENT"))));
    });

    group.bench_function("handled_with_payload", |b| {
        let engine = bench_engine();
        b.iter(|| engine.next_action(black_box(Action::new("SET_VALUE", json!(7)))));
    });

    group.bench_function("marked", |b| {
        let engine = bench_engine();
        b.iter(|| engine.next_action(black_box(Action::of_type("OBSERVED"))));
    });

    group.bench_function("unhandled", |b| {
        let engine = bench_engine();
        b.iter(|| engine.next_action(black_box(Action::of_type("UNKNOWN"))));
    });

    group.bench_function("dispatch_and_read_state", |b| {
        let engine = bench_engine();
        b.iter(|| {
            engine.next_action(black_box(Action::of_type("INCREMENT")));
            black_box(engine.state().counter)
        });
    });

    group.finish();
}

/// Benchmark output listener fan-out
fn benchmark_listener_fanout(c: &mut Criterion) {
    let mut group = c.benchmark_group("listener_fanout");
    group.throughput(Throughput::Elements(1));

    for listeners in [1_usize, 10, 100] {
        group.bench_function(format!("{listeners}_listeners"), |b| {
            let engine = bench_engine();
            let _subscriptions: Vec<_> = (0..listeners)
                .map(|_| {
                    engine.subscribe(|envelope| {
                        black_box(envelope.state.counter);
                    })
                })
                .collect();
            b.iter(|| engine.next_action(black_box(Action::of_type("INCREMENT"))));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    benchmark_handler_execution,
    benchmark_engine_throughput,
    benchmark_listener_fanout,
);
criterion_main!(benches);
