//! copilot-telemetry: 構造化ログ・分散トレース・Prometheus メトリクスの初期化ライブラリ。

pub mod logger;
pub mod metrics;
pub mod middleware;

#[cfg(any(feature = "messaging", test))]
pub mod messaging;

#[cfg(any(feature = "axum-layer", test))]
pub use middleware::MetricsLayer;
pub use metrics::Metrics;

#[cfg(any(feature = "messaging", test))]
pub use messaging::MeteredPublisher;


use opentelemetry::global;
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::{trace as sdktrace, Resource};
use serde::Deserialize;
use tracing_subscriber::{fmt, fmt::format::FmtSpan, layer::SubscriberExt, util::SubscriberInitExt};

/// TelemetryError は telemetry 初期化時のエラーを表す。
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("OTLP エクスポータの構築に失敗しました: {0}")]
    Exporter(String),
    #[error("tracing subscriber の初期化に失敗しました: {0}")]
    Subscriber(String),
    #[error("メトリクスの登録に失敗しました: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// TelemetryConfig は telemetry ライブラリの初期化設定を保持する。
/// 各サーバーの config.yaml の `observability` セクションに対応する。
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub service_name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
    #[serde(default)]
    pub trace_endpoint: Option<String>,
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// ログ出力フォーマット。"text" の場合はプレーンテキスト、それ以外は JSON。
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

fn default_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

fn default_sample_rate() -> f64 {
    1.0
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

impl TelemetryConfig {
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            version: default_version(),
            environment: default_environment(),
            trace_endpoint: None,
            sample_rate: default_sample_rate(),
            log_level: default_log_level(),
            log_format: default_log_format(),
        }
    }
}

/// init_telemetry は OpenTelemetry TracerProvider と tracing-subscriber を初期化する。
/// trace_endpoint が指定されている場合、OTLP gRPC エクスポータを設定する。
pub fn init_telemetry(cfg: &TelemetryConfig) -> Result<(), TelemetryError> {
    let tracer = if let Some(ref endpoint) = cfg.trace_endpoint {
        let exporter = SpanExporter::builder()
            .with_tonic()
            .with_endpoint(endpoint)
            .build()
            .map_err(|e| TelemetryError::Exporter(e.to_string()))?;
        let provider = sdktrace::TracerProvider::builder()
            .with_batch_exporter(exporter, opentelemetry_sdk::runtime::Tokio)
            .with_sampler(sdktrace::Sampler::TraceIdRatioBased(cfg.sample_rate))
            .with_resource(Resource::new(vec![
                KeyValue::new("service.name", cfg.service_name.clone()),
                KeyValue::new("service.version", cfg.version.clone()),
                KeyValue::new("environment", cfg.environment.clone()),
            ]))
            .build();
        let tracer = provider.tracer("copilot");
        global::set_tracer_provider(provider);
        Some(tracer)
    } else {
        None
    };

    let registry = tracing_subscriber::registry().with(logger::env_filter(&cfg.log_level));

    // OTLP レイヤーの型はフォーマットごとのサブスクライバー型に依存するため、分岐内で構築する
    let result = if cfg.log_format == "text" {
        let fmt_layer = fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let subscriber = registry.with(fmt_layer);
        let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
        subscriber.with(telemetry_layer).try_init()
    } else {
        let fmt_layer = fmt::layer()
            .json()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE);
        let subscriber = registry.with(fmt_layer);
        let telemetry_layer = tracer.map(|t| tracing_opentelemetry::layer().with_tracer(t));
        subscriber.with(telemetry_layer).try_init()
    };
    result.map_err(|e| TelemetryError::Subscriber(e.to_string()))?;

    tracing::info!(
        service = %cfg.service_name,
        environment = %cfg.environment,
        otlp = cfg.trace_endpoint.is_some(),
        "telemetry initialized"
    );
    Ok(())
}

/// shutdown は OpenTelemetry TracerProvider をシャットダウンする。
pub fn shutdown() {
    global::shutdown_tracer_provider();
}
