//! Telemetry initialization for applications embedding Troupe
//!
//! TigerStyle: Opt-in, explicit, never installed behind the caller's back.
//!
//! The runtime only emits `tracing` events. Hosts that want to see them call
//! [`init_telemetry`] once at startup. With the `otel` feature the subscriber
//! also exports spans over OTLP and registers a Prometheus meter provider so
//! the counters in [`crate::metrics`] become observable.

use crate::error::{Error, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Log filter used when neither `RUST_LOG` nor the config sets one
const LOG_LEVEL_DEFAULT: &str = "info";

/// Service name reported to exporters
const SERVICE_NAME_DEFAULT: &str = "troupe";

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name for exported traces and metrics
    pub service_name: String,
    /// Log filter directive, e.g. "troupe_runtime=debug"
    pub log_level: String,
    /// Whether to print events to stdout
    pub stdout_enabled: bool,
    /// OTLP endpoint (e.g., "http://localhost:4317"), `otel` feature only
    pub otlp_endpoint: Option<String>,
    /// Whether to register a Prometheus meter provider, `otel` feature only
    pub metrics_enabled: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: SERVICE_NAME_DEFAULT.to_string(),
            log_level: LOG_LEVEL_DEFAULT.to_string(),
            stdout_enabled: true,
            otlp_endpoint: None,
            metrics_enabled: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Set the log filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Export spans to an OTLP collector
    pub fn with_otlp_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.otlp_endpoint = Some(endpoint.into());
        self
    }

    /// Register the Prometheus meter provider
    pub fn with_metrics(mut self) -> Self {
        self.metrics_enabled = true;
        self
    }

    /// Create from environment variables
    ///
    /// Reads `OTEL_SERVICE_NAME`, `OTEL_EXPORTER_OTLP_ENDPOINT`, `RUST_LOG`
    /// and `TROUPE_METRICS_ENABLED`.
    pub fn from_env() -> Self {
        let metrics_enabled = std::env::var("TROUPE_METRICS_ENABLED")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(false);

        Self {
            service_name: std::env::var("OTEL_SERVICE_NAME")
                .unwrap_or_else(|_| SERVICE_NAME_DEFAULT.to_string()),
            log_level: std::env::var("RUST_LOG").unwrap_or_else(|_| LOG_LEVEL_DEFAULT.to_string()),
            stdout_enabled: true,
            otlp_endpoint: std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT").ok(),
            metrics_enabled,
        }
    }

    fn env_filter(&self) -> EnvFilter {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.log_level))
    }
}

fn subscriber_error(e: impl std::fmt::Display) -> Error {
    Error::Internal {
        reason: format!("failed to initialize tracing subscriber: {}", e),
    }
}

/// Install the global tracing subscriber
///
/// # Errors
/// Returns `Error::Internal` if a global subscriber is already installed or an
/// exporter cannot be built.
///
/// # Example
///
/// ```rust,ignore
/// use troupe_core::telemetry::{init_telemetry, TelemetryConfig};
///
/// let _guard = init_telemetry(TelemetryConfig::new("orders").with_log_level("debug"))?;
/// ```
#[cfg(not(feature = "otel"))]
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    let fmt_layer = config
        .stdout_enabled
        .then(tracing_subscriber::fmt::layer);

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .try_init()
        .map_err(subscriber_error)?;

    if config.otlp_endpoint.is_some() || config.metrics_enabled {
        tracing::warn!(
            service = %config.service_name,
            "OTLP export and metrics require the `otel` feature; ignoring"
        );
    }

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(TelemetryGuard {})
}

/// Install the global tracing subscriber with OpenTelemetry export
#[cfg(feature = "otel")]
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard> {
    use opentelemetry_otlp::WithExportConfig;
    use opentelemetry_sdk::runtime::Tokio;
    use opentelemetry_sdk::trace::Config;

    let fmt_layer = config
        .stdout_enabled
        .then(tracing_subscriber::fmt::layer);

    let has_otel = config.otlp_endpoint.is_some();
    let otel_layer = match config.otlp_endpoint {
        Some(ref endpoint) => {
            let exporter = opentelemetry_otlp::new_exporter()
                .tonic()
                .with_endpoint(endpoint);
            let trace_config =
                Config::default().with_resource(opentelemetry_sdk::Resource::new(vec![
                    opentelemetry::KeyValue::new("service.name", config.service_name.clone()),
                ]));
            let tracer = opentelemetry_otlp::new_pipeline()
                .tracing()
                .with_exporter(exporter)
                .with_trace_config(trace_config)
                .install_batch(Tokio)
                .map_err(|e| Error::Internal {
                    reason: format!("failed to initialize OpenTelemetry: {}", e),
                })?;
            Some(tracing_opentelemetry::layer().with_tracer(tracer))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(config.env_filter())
        .with(fmt_layer)
        .with(otel_layer)
        .try_init()
        .map_err(subscriber_error)?;

    let metrics_registry = init_metrics(&config)?;

    tracing::info!(
        service = %config.service_name,
        otlp_endpoint = ?config.otlp_endpoint,
        metrics = config.metrics_enabled,
        "Telemetry initialized"
    );

    Ok(TelemetryGuard {
        has_otel,
        metrics_registry,
    })
}

/// Register a Prometheus-backed global meter provider
///
/// The returned registry is what a host serves on its scrape endpoint.
#[cfg(feature = "otel")]
pub fn init_metrics(config: &TelemetryConfig) -> Result<Option<prometheus::Registry>> {
    use opentelemetry_sdk::metrics::MeterProviderBuilder;
    use opentelemetry_sdk::Resource;

    if !config.metrics_enabled {
        return Ok(None);
    }

    let registry = prometheus::Registry::new();
    let exporter = opentelemetry_prometheus::exporter()
        .with_registry(registry.clone())
        .build()
        .map_err(|e| Error::Internal {
            reason: format!("failed to create Prometheus exporter: {}", e),
        })?;

    let provider = MeterProviderBuilder::default()
        .with_resource(Resource::new(vec![opentelemetry::KeyValue::new(
            "service.name",
            config.service_name.clone(),
        )]))
        .with_reader(exporter)
        .build();
    opentelemetry::global::set_meter_provider(provider);

    Ok(Some(registry))
}

/// Guard that flushes exporters when dropped
#[cfg(feature = "otel")]
pub struct TelemetryGuard {
    has_otel: bool,
    metrics_registry: Option<prometheus::Registry>,
}

#[cfg(feature = "otel")]
impl TelemetryGuard {
    /// Prometheus registry, if metrics were enabled
    pub fn metrics_registry(&self) -> Option<&prometheus::Registry> {
        self.metrics_registry.as_ref()
    }
}

#[cfg(feature = "otel")]
impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        if self.has_otel {
            opentelemetry::global::shutdown_tracer_provider();
        }
    }
}

/// Guard returned by [`init_telemetry`]
#[cfg(not(feature = "otel"))]
pub struct TelemetryGuard {}
