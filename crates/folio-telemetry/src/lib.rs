//! Tracing setup for folio.
//!
//! [`init_tracing`] installs an `EnvFilter` (default `info`) and a stderr fmt
//! layer. Built with the `telemetry` feature, it also adds an OTLP export
//! layer when the standard OTel environment variables ask for one:
//!
//! ```bash
//! OTEL_EXPORTER_OTLP_ENDPOINT=http://localhost:4317 folio tree doc_…
//! ```
//!
//! Set `OTEL_SDK_DISABLED=true` to explicitly disable even when the endpoint is set.
//!
//! Engine spans are named by category, and export sampling follows the
//! category (see [`sample_rate`]).

#[cfg(feature = "telemetry")]
mod otel;

#[cfg(feature = "telemetry")]
pub use otel::{OtelGuard, TelemetryError, otel_layer};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Span name prefixes used by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanCategory {
    /// `mutation.*`: block and document writes.
    Mutation,
    /// `revision.*`: commits, snapshots, reverts, resolution.
    Revision,
    /// `tree.*`: reconstruction and diffs.
    Tree,
    /// `store.*`: plain reads.
    Store,
    Other,
}

impl SpanCategory {
    pub fn of(name: &str) -> Self {
        match name.split('.').next() {
            Some("mutation") => SpanCategory::Mutation,
            Some("revision") => SpanCategory::Revision,
            Some("tree") => SpanCategory::Tree,
            Some("store") => SpanCategory::Store,
            _ => SpanCategory::Other,
        }
    }
}

/// Export sampling rate for a span name.
///
/// | Prefix        | Rate |
/// |---------------|------|
/// | `mutation.*`  | 100% |
/// | `revision.*`  | 100% |
/// | `tree.*`      | 10%  |
/// | `store.*`     | 1%   |
/// | other         | 10%  |
///
/// Errors are always sampled regardless of name.
pub fn sample_rate(name: &str) -> f64 {
    match SpanCategory::of(name) {
        SpanCategory::Mutation | SpanCategory::Revision => 1.0,
        SpanCategory::Tree => 0.1,
        SpanCategory::Store => 0.01,
        SpanCategory::Other => 0.1,
    }
}

/// Check whether OTel export should be enabled.
///
/// Returns `true` when standard OTel env vars indicate export is desired:
/// - `OTEL_SDK_DISABLED` is NOT set to `"true"`
/// - AND at least one of:
///   - `OTEL_EXPORTER_OTLP_ENDPOINT` is set
///   - `OTEL_TRACES_EXPORTER` is set (and not `"none"`)
pub fn otel_enabled() -> bool {
    if std::env::var("OTEL_SDK_DISABLED")
        .map(|v| v.eq_ignore_ascii_case("true"))
        .unwrap_or(false)
    {
        return false;
    }

    if std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok() {
        return true;
    }

    if let Ok(exporter) = std::env::var("OTEL_TRACES_EXPORTER") {
        return !exporter.eq_ignore_ascii_case("none");
    }

    false
}

/// Keeps exporters alive until dropped. Hold it for the life of `main`.
#[derive(Default)]
pub struct TracingGuard {
    #[cfg(feature = "telemetry")]
    _otel: Option<OtelGuard>,
}

/// Install the global subscriber. `default_filter` applies when `RUST_LOG`
/// is unset.
pub fn init_tracing(service_name: &str, default_filter: &str) -> TracingGuard {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr));

    #[cfg(feature = "telemetry")]
    if otel_enabled() {
        match otel_layer(service_name) {
            Ok((layer, guard)) => {
                registry.with(layer).init();
                return TracingGuard { _otel: Some(guard) };
            }
            Err(e) => {
                registry.init();
                tracing::warn!(error = %e, "OTLP export disabled");
                return TracingGuard::default();
            }
        }
    }

    registry.init();
    tracing::debug!(service = service_name, "tracing initialized");
    TracingGuard::default()
}
