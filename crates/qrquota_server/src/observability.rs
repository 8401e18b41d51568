//! Tracing and OpenTelemetry bootstrap for the enforcement service.
//!
//! Decisions are logged through `tracing` by the engine crates; this module
//! installs the subscriber that renders them and bridges spans to an
//! OpenTelemetry stdout exporter.

use opentelemetry::{KeyValue, global, trace::TracerProvider};
use opentelemetry_sdk::{Resource, trace::SdkTracerProvider};
use opentelemetry_stdout::SpanExporter;
use qrquota_error::{QrQuotaResult, ServerError, ServerErrorKind};
use qrquota_rate_limit::ServerConfig;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

const SERVICE_NAME: &str = "qrquota-server";

/// Log and trace settings for the service process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservabilityConfig {
    /// Name reported on every exported span
    pub service_name: String,
    /// Fallback filter when `RUST_LOG` is unset, e.g. `qrquota_rate_limit=debug`
    pub log_level: String,
    /// One JSON object per log line
    pub json_logs: bool,
}

impl ObservabilityConfig {
    /// Settings for `service_name` at `info` with text logs.
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }

    /// Take log level and format from the `[server]` section.
    pub fn from_server_config(config: &ServerConfig) -> Self {
        Self::new(SERVICE_NAME)
            .with_log_level(config.log_level.clone())
            .with_json_logs(config.json_logs)
    }

    /// Override the fallback filter.
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }

    /// Switch between text and JSON log lines.
    pub fn with_json_logs(mut self, enabled: bool) -> Self {
        self.json_logs = enabled;
        self
    }

    fn filter(&self) -> QrQuotaResult<EnvFilter> {
        EnvFilter::try_from_default_env()
            .or_else(|_| EnvFilter::try_new(&self.log_level))
            .map_err(|e| {
                ServerError::new(ServerErrorKind::Observability(format!(
                    "invalid log filter '{}': {}",
                    self.log_level, e
                )))
                .into()
            })
    }

    fn log_layer(&self) -> Box<dyn Layer<Registry> + Send + Sync> {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        if self.json_logs {
            layer.json().boxed()
        } else {
            layer.boxed()
        }
    }
}

fn tracer_provider(service_name: &str) -> SdkTracerProvider {
    let resource = Resource::builder()
        .with_service_name(service_name.to_string())
        .with_attributes(vec![KeyValue::new(
            "service.version",
            env!("CARGO_PKG_VERSION"),
        )])
        .build();

    SdkTracerProvider::builder()
        .with_simple_exporter(SpanExporter::default())
        .with_resource(resource)
        .build()
}

/// Install the global subscriber and tracer provider.
///
/// `RUST_LOG` wins over the configured level when set.
///
/// # Errors
///
/// Returns a server error if the filter is invalid or a global subscriber is
/// already installed.
pub fn init_observability(config: ObservabilityConfig) -> QrQuotaResult<SdkTracerProvider> {
    let filter = config.filter()?;
    let provider = tracer_provider(&config.service_name);
    let tracer = provider.tracer(config.service_name.clone());

    tracing_subscriber::registry()
        .with(config.log_layer())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(filter)
        .try_init()
        .map_err(|e| ServerError::new(ServerErrorKind::Observability(e.to_string())))?;

    global::set_tracer_provider(provider.clone());
    tracing::debug!(service = %config.service_name, json = config.json_logs, "Observability installed");
    Ok(provider)
}

/// Flush and stop the tracer provider.
pub fn shutdown_observability(provider: SdkTracerProvider) {
    if let Err(e) = provider.shutdown() {
        tracing::warn!(error = %e, "Tracer provider did not shut down cleanly");
    }
}
