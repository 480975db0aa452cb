//! Logging and OpenTelemetry Tracing
//!
//! Installs the global `tracing` subscriber: an env filter, a text or JSON
//! formatter, and an OTLP span exporter when an endpoint is configured.
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: filter directives (default: `price_relay=info`)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint; tracing export is off when unset
//! - `OTEL_SERVICE_NAME`: service name for traces (default: `price-relay`)
//!
//! # Usage
//!
//! ```ignore
//! use price_relay::infrastructure::{config::LogFormat, telemetry};
//!
//! // Keep the guard alive for the lifetime of the process.
//! let _guard = telemetry::init(LogFormat::Text);
//! ```

use opentelemetry::trace::TracerProvider as _;
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::trace::SdkTracerProvider;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::infrastructure::config::LogFormat;

/// Service name for OpenTelemetry traces.
const DEFAULT_SERVICE_NAME: &str = "price-relay";

/// Filter used when `RUST_LOG` is unset or invalid.
const DEFAULT_FILTER: &str = "price_relay=info,tower_http=info,hyper=warn";

/// Guard that shuts down OpenTelemetry when dropped.
pub struct TelemetryGuard {
    tracer_provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    /// Whether spans are exported over OTLP.
    #[must_use]
    pub const fn is_exporting(&self) -> bool {
        self.tracer_provider.is_some()
    }
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if let Some(provider) = self.tracer_provider.take()
            && let Err(e) = provider.shutdown()
        {
            eprintln!("Failed to shutdown OpenTelemetry tracer provider: {e}");
        }
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelemetryConfig {
    /// OTLP exporter endpoint; `None` disables span export.
    pub otlp_endpoint: Option<String>,
    /// Service name for traces.
    pub service_name: String,
    /// Log line format.
    pub log_format: LogFormat,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            otlp_endpoint: None,
            service_name: DEFAULT_SERVICE_NAME.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    #[must_use]
    pub fn from_env(log_format: LogFormat) -> Self {
        Self::from_lookup(log_format, |key| std::env::var(key).ok())
    }

    fn from_lookup<F>(log_format: LogFormat, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let otlp_endpoint = lookup("OTEL_EXPORTER_OTLP_ENDPOINT").filter(|v| !v.trim().is_empty());
        let service_name = lookup("OTEL_SERVICE_NAME")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_SERVICE_NAME.to_string());

        Self {
            otlp_endpoint,
            service_name,
            log_format,
        }
    }
}

/// Initialize telemetry from the environment.
///
/// Returns a guard that must be kept alive for the duration of the program.
#[must_use]
pub fn init(log_format: LogFormat) -> TelemetryGuard {
    init_with_config(TelemetryConfig::from_env(log_format))
}

/// Initialize telemetry with custom configuration.
///
/// A second call leaves the first subscriber in place.
#[must_use]
pub fn init_with_config(config: TelemetryConfig) -> TelemetryGuard {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let (json_layer, text_layer) = match config.log_format {
        LogFormat::Json => (
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true),
            ),
            None,
        ),
        LogFormat::Text => (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
        ),
    };

    let tracer_provider = config
        .otlp_endpoint
        .as_deref()
        .and_then(|endpoint| build_tracer_provider(endpoint, &config.service_name));
    let otel_layer = tracer_provider.as_ref().map(|provider| {
        tracing_opentelemetry::layer().with_tracer(provider.tracer(config.service_name.clone()))
    });

    let installed = tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .with(otel_layer)
        .try_init();
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {e}");
    }

    TelemetryGuard { tracer_provider }
}

fn build_tracer_provider(endpoint: &str, service_name: &str) -> Option<SdkTracerProvider> {
    let exporter = match opentelemetry_otlp::SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .build()
    {
        Ok(exporter) => exporter,
        Err(e) => {
            eprintln!("Failed to create OTLP exporter for {endpoint}: {e}");
            return None;
        }
    };

    Some(
        SdkTracerProvider::builder()
            .with_batch_exporter(exporter)
            .with_resource(
                opentelemetry_sdk::Resource::builder()
                    .with_service_name(service_name.to_string())
                    .build(),
            )
            .build(),
    )
}

// =============================================================================
// Tests
// =============================================================================
