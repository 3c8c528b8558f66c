//! OTel internals: export layer and sampling.

use opentelemetry::trace::{
    Link, SamplingDecision, SamplingResult, SpanKind, TraceContextExt, TraceId, TraceState,
    TracerProvider as _,
};
use opentelemetry::{Context, KeyValue, global};
use opentelemetry_otlp::SpanExporter;
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::trace::{Sampler, SdkTracerProvider, ShouldSample, SpanLimits};
use tracing_opentelemetry::OpenTelemetryLayer;

use crate::sample_rate;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("OTLP exporter: {0}")]
    Exporter(#[from] opentelemetry_otlp::ExporterBuildError),
    #[error("OTel runtime: {0}")]
    Runtime(#[from] std::io::Error),
}

/// Shuts down the tracer provider on drop, flushing pending spans. Also
/// keeps alive the runtime created when the caller had none.
pub struct OtelGuard {
    provider: SdkTracerProvider,
    // Enter guard must drop before the runtime.
    _runtime_enter: Option<tokio::runtime::EnterGuard<'static>>,
    _runtime: Option<&'static tokio::runtime::Runtime>,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if let Err(e) = self.provider.shutdown() {
            eprintln!("OTel shutdown error: {e}");
        }
    }
}

/// Build an OpenTelemetry tracing layer and its guard.
pub fn otel_layer<S>(
    service_name: &str,
) -> Result<(OpenTelemetryLayer<S, opentelemetry_sdk::trace::SdkTracer>, OtelGuard), TelemetryError>
where
    S: tracing::Subscriber + for<'span> tracing_subscriber::registry::LookupSpan<'span>,
{
    // Tonic needs a runtime for channel setup. The CLI is synchronous, so
    // create one, leak it for the process lifetime, and enter it.
    let (exporter, runtime_ref, enter_guard) = match tokio::runtime::Handle::try_current() {
        Ok(_handle) => (SpanExporter::builder().with_tonic().build()?, None, None),
        Err(_) => {
            let rt: &'static tokio::runtime::Runtime = Box::leak(Box::new(tokio::runtime::Runtime::new()?));
            let guard = rt.enter();
            let exp = rt.block_on(async { SpanExporter::builder().with_tonic().build() })?;
            (exp, Some(rt), Some(guard))
        }
    };

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    let provider = SdkTracerProvider::builder()
        .with_batch_exporter(exporter)
        .with_sampler(FolioSampler)
        .with_resource(resource)
        .with_span_limits(SpanLimits::default())
        .build();

    global::set_tracer_provider(provider.clone());

    let tracer = provider.tracer("folio");
    let layer = tracing_opentelemetry::layer().with_tracer(tracer);

    Ok((
        layer,
        OtelGuard {
            provider,
            _runtime_enter: enter_guard,
            _runtime: runtime_ref,
        },
    ))
}

/// Sampler keyed on span category, see [`crate::sample_rate`].
#[derive(Debug, Clone)]
struct FolioSampler;

impl ShouldSample for FolioSampler {
    fn should_sample(
        &self,
        parent_context: Option<&Context>,
        trace_id: TraceId,
        name: &str,
        span_kind: &SpanKind,
        attributes: &[KeyValue],
        links: &[Link],
    ) -> SamplingResult {
        // Keep traces whole once the parent is sampled.
        if let Some(cx) = parent_context {
            let parent_span = cx.span();
            let parent_ctx = parent_span.span_context();
            if parent_ctx.is_sampled() {
                return SamplingResult {
                    decision: SamplingDecision::RecordAndSample,
                    attributes: vec![],
                    trace_state: parent_ctx.trace_state().clone(),
                };
            }
        }

        let is_error = attributes.iter().any(|kv| {
            (kv.key.as_str() == "otel.status_code" && kv.value.as_str() == "ERROR")
                || (kv.key.as_str() == "error" && kv.value.as_str() == "true")
        });
        if is_error {
            return SamplingResult {
                decision: SamplingDecision::RecordAndSample,
                attributes: vec![],
                trace_state: TraceState::default(),
            };
        }

        Sampler::TraceIdRatioBased(sample_rate(name)).should_sample(
            parent_context,
            trace_id,
            name,
            span_kind,
            attributes,
            links,
        )
    }
}
