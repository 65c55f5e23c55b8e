//! Prometheus metrics for observability and monitoring.
//!
//! This module provides metric collection for the runtime:
//! - Action dispatch and routing
//! - Handler execution
//! - Lifecycle invocations and their outcomes
//! - Diagnostics sink failures
//!
//! Metrics are recorded through the `metrics` facade, so they cost nothing
//! until a recorder is installed. [`MetricsExporter`] installs a Prometheus
//! recorder and renders the scrape text; serving it is left to the host
//! application.
//!
//! # Example
//!
//! ```rust,no_run
//! use reactive_context_runtime::metrics::MetricsExporter;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut exporter = MetricsExporter::new();
//! exporter.install()?;
//!
//! // ... dispatch actions ...
//!
//! if let Some(text) = exporter.render() {
//!     println!("{text}");
//! }
//! # Ok(())
//! # }
//! ```

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use reactive_context_core::LifecyclePhase;
use std::time::Duration;
use thiserror::Error;

// Re-export metrics macros for use in other modules
pub use metrics::{counter, histogram};

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus recorder for the runtime's metrics.
#[derive(Default)]
pub struct MetricsExporter {
    handle: Option<PrometheusHandle>,
}

impl MetricsExporter {
    /// Create an exporter that has not been installed yet.
    #[must_use]
    pub const fn new() -> Self {
        Self { handle: None }
    }

    /// Describe all metrics and install the Prometheus recorder.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or installed.
    ///
    /// # Note
    ///
    /// If a metrics recorder is already installed (e.g., in tests), this logs a
    /// warning and succeeds without a handle; [`MetricsExporter::render`] then
    /// returns `None`.
    pub fn install(&mut self) -> Result<(), MetricsError> {
        register_metrics();

        let builder = PrometheusBuilder::new()
            // Handler execution is usually sub-millisecond
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[
                    0.000_01, 0.000_05, 0.000_1, 0.000_5, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0,
                ],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        match builder.install_recorder() {
            Ok(handle) => {
                self.handle = Some(handle);
                tracing::info!("Metrics recorder installed");
                Ok(())
            }
            Err(e) => {
                let err_msg = e.to_string();
                if err_msg.contains("already initialized") {
                    tracing::warn!("Metrics recorder already initialized, skipping re-initialization");
                    Ok(())
                } else {
                    Err(MetricsError::Install(err_msg))
                }
            }
        }
    }

    /// Get the metrics handle for rendering.
    #[must_use]
    pub const fn handle(&self) -> Option<&PrometheusHandle> {
        self.handle.as_ref()
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if this exporter did not install the recorder.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn register_metrics() {
    // Engine Metrics
    describe_counter!(
        "engine.actions.total",
        "Total number of actions submitted to engines"
    );
    describe_counter!(
        "engine.actions.unhandled",
        "Total number of actions with no registered handler"
    );
    describe_counter!(
        "engine.handler.failures",
        "Total number of handler failures (errors and panics)"
    );
    describe_histogram!(
        "engine.handler.duration_seconds",
        "Time taken to execute handlers"
    );

    // Lifecycle Metrics
    describe_counter!(
        "lifecycle.invocations",
        "Total number of lifecycle invocations started"
    );
    describe_counter!(
        "lifecycle.outcomes",
        "Settled lifecycle invocations by outcome"
    );

    // Diagnostics Metrics
    describe_counter!(
        "diagnostics.sink.failures",
        "Total number of entries a diagnostics sink failed to record"
    );
}

/// Engine metrics recorder.
pub struct EngineMetrics;

impl EngineMetrics {
    /// Record a submitted action.
    pub fn record_submitted() {
        counter!("engine.actions.total").increment(1);
    }

    /// Record an action without a handler.
    pub fn record_unhandled() {
        counter!("engine.actions.unhandled").increment(1);
    }

    /// Record one handler execution.
    pub fn record_handler(duration: Duration) {
        histogram!("engine.handler.duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a handler failure.
    pub fn record_handler_failure() {
        counter!("engine.handler.failures").increment(1);
    }

    /// Record a diagnostics sink failure.
    pub fn record_sink_failure() {
        counter!("diagnostics.sink.failures").increment(1);
    }
}

/// Lifecycle metrics recorder.
pub struct LifecycleMetrics;

impl LifecycleMetrics {
    /// Record a started invocation.
    pub fn record_invocation() {
        counter!("lifecycle.invocations").increment(1);
    }

    /// Record a settled invocation.
    pub fn record_outcome(phase: LifecyclePhase) {
        counter!("lifecycle.outcomes", "outcome" => phase.to_string()).increment(1);
    }
}
