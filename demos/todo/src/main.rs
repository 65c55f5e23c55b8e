//! To-do demo binary
//!
//! Walks through plain handlers, a fetch that completes, a fetch that is
//! aborted, and view composition.

use reactive_context_core::json;
use reactive_context_runtime::EngineConfig;
use std::sync::Arc;
use std::time::Duration;
use todo::{
    FetchRequest, Item, ListSettings, StaticItemSource, add_item, clear, fetch_items,
    fetch_items_abort, list_props, reset, todo_engine,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "todo=debug,reactive_context_runtime=debug,reactive_context::actions=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    println!("=== To-do Demo: Reactive Context ===\n");

    let engine = todo_engine(EngineConfig::default().with_sink_level(tracing::Level::INFO))?;
    let _printer = engine.subscribe(|envelope| {
        let action = envelope
            .action_type()
            .map_or_else(|| "<initial>".to_string(), ToString::to_string);
        println!(
            "  [{action}] items={} loading={}",
            envelope.state.items.len(),
            envelope.state.loading
        );
    });

    println!("\n>>> Adding items");
    engine.next_action(add_item(1, "buy milk"));
    engine.next_action(add_item(2, "walk the dog"));

    println!("\n>>> Reset, add, clear");
    engine.next_action(reset());
    engine.next_action(add_item(3, "water plants"));
    engine.next_action(clear());

    println!("\n>>> Dispatching a type nobody handles");
    engine.next_action(reactive_context_core::Action::new("UNKNOWN", json!({ "x": 1 })));

    println!("\n>>> Fetching items");
    let source = Arc::new(StaticItemSource::new(
        &[
            Item {
                id: 10,
                name: "from server".into(),
            },
            Item {
                id: 11,
                name: "also from server".into(),
            },
        ],
        Duration::from_millis(50),
    ));
    let request = FetchRequest {
        url: "https://example.invalid/items".into(),
        kind: "open".into(),
    };
    let handle = fetch_items(&engine, source.clone(), request.clone())?;
    let outcome = handle.settled().await;
    println!("  outcome: {:?}", outcome.phase());

    println!("\n>>> Fetching again, then aborting");
    let handle = fetch_items(&engine, source, request)?;
    fetch_items_abort(&engine);
    let outcome = handle.settled().await;
    println!("  outcome: {:?}", outcome.phase());

    println!("\n>>> Composing view properties");
    let composer = list_props(
        &engine,
        ListSettings {
            title: "Groceries".into(),
            show_done: false,
        },
    )?;
    let props = composer.compose(&json!({ "title": "My list" }))?;
    println!("  {props}");

    println!("\n=== Demo Complete ===");
    Ok(())
}
