//! Observability infrastructure for Switchyard.
//!
//! Structured logging with consistent spans. This module provides the
//! initialization helper and span constructors used across all Switchyard
//! components.

use tracing::Span;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

/// Log output format.
#[derive(Debug, Clone, Copy, Default)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Installs the global logging subscriber.
///
/// Call once at application startup. Safe to call multiple times: once a
/// global subscriber is installed, later calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `switchyard_experiment=debug`)
///
/// # Example
///
/// ```rust
/// use switchyard_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();

    let sink = match format {
        LogFormat::Json => fmt::layer().json().boxed(),
        LogFormat::Pretty => fmt::layer().pretty().boxed(),
    };

    // try_init refuses to replace an already-installed subscriber, which
    // makes repeated calls harmless.
    let _ = tracing_subscriber::registry().with(filter).with(sink).try_init();
}

/// Creates a span for experiment operations with standard fields.
///
/// # Example
///
/// ```rust
/// use switchyard_core::observability::experiment_span;
///
/// let span = experiment_span("update", "shop");
/// let _guard = span.enter();
/// // ... do experiment operation
/// ```
#[must_use]
pub fn experiment_span(operation: &str, application: &str) -> Span {
    tracing::info_span!(
        "experiment",
        op = operation,
        application = application,
    )
}
