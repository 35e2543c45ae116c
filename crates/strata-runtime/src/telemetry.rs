//! Log and span output for the Strata binaries.
//!
//! Everything in `strata-memory` reports through `tracing`: Micro creation,
//! Mini and Macro consolidation, demotions, archive writes and retries, and
//! summarizer or embedder fallbacks.  [`init_tracing`] decides where those
//! events go.
//!
//! Logs are written to stderr, compact by default or one JSON object per
//! line when `STRATA_LOG_FORMAT=json`.  `RUST_LOG` narrows them, e.g.
//! `RUST_LOG=strata_memory=debug` to watch tier transitions.  Setting
//! `OTEL_EXPORTER_OTLP_ENDPOINT` additionally ships spans to that collector
//! over OTLP/HTTP.
//!
//! ```rust,no_run
//! let _telemetry = strata_runtime::telemetry::init_tracing("strata");
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use tracing_subscriber::{EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FORMAT_ENV: &str = "STRATA_LOG_FORMAT";

const DEFAULT_FILTER: &str = "info";

/// Shape of each log line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

impl LogFormat {
    /// Read a `STRATA_LOG_FORMAT` value.  Anything but `json` (any case)
    /// means compact.
    pub fn parse(value: Option<&str>) -> Self {
        match value {
            Some(v) if v.trim().eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Compact,
        }
    }
}

/// Install the global subscriber.  Call once, before the store is opened.
///
/// Keep the returned guard alive until exit: spans still buffered in the
/// OTLP exporter are flushed when it drops.
pub fn init_tracing(service_name: &str) -> TracerProviderGuard {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let format = LogFormat::parse(std::env::var(LOG_FORMAT_ENV).ok().as_deref());

    let provider = build_provider(service_name);
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("strata")));
    let fmt_layer: Box<dyn Layer<Registry> + Send + Sync> = match format {
        LogFormat::Json => tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr).boxed(),
        LogFormat::Compact => tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr).boxed(),
    };

    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(env_filter)
        .with(otel_layer)
        .init();

    TracerProviderGuard(provider)
}

/// Shuts the span exporter down when dropped.
pub struct TracerProviderGuard(Option<SdkTracerProvider>);

impl TracerProviderGuard {
    pub fn is_exporting(&self) -> bool {
        self.0.is_some()
    }
}

impl Drop for TracerProviderGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.0.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("[strata] span exporter did not shut down cleanly: {e}");
        }
    }
}

/// `None` without `OTEL_EXPORTER_OTLP_ENDPOINT`, or when the exporter
/// cannot be built.  The subscriber is not installed yet, so that failure
/// goes to stderr.
fn build_provider(service_name: &str) -> Option<SdkTracerProvider> {
    let endpoint = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok()?;

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_endpoint(endpoint)
        .build()
        .map_err(|e| eprintln!("[strata] cannot export spans to the collector: {e}"))
        .ok()?;

    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .build();

    Some(
        SdkTracerProvider::builder()
            .with_resource(resource)
            // No Tokio runtime exists yet when this runs.
            .with_simple_exporter(exporter)
            .build(),
    )
}
