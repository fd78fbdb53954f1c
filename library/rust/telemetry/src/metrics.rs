use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Metrics は Prometheus メトリクスのヘルパー構造体である。
/// イベントの発行・消費、冪等書き込みの重複検出、HTTP エンドポイントのメトリクスを提供する。
pub struct Metrics {
    pub events_published_total: IntCounterVec,
    pub events_publish_failures_total: IntCounterVec,
    pub events_consumed_total: IntCounterVec,
    pub duplicate_writes_total: IntCounterVec,
    pub http_requests_total: CounterVec,
    pub http_request_duration: HistogramVec,
    registry: Registry,
}

/// デフォルトのヒストグラムバケット。
const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

impl Metrics {
    /// new は Prometheus メトリクスを初期化して返す。
    /// service_name はメトリクスの service ラベルに使用される。
    pub fn new(service_name: &str) -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let events_published_total = IntCounterVec::new(
            Opts::new("events_published_total", "Total number of events published")
                .const_label("service", service_name),
            &["routing_key"],
        )?;

        let events_publish_failures_total = IntCounterVec::new(
            Opts::new(
                "events_publish_failures_total",
                "Total number of events that failed to publish",
            )
            .const_label("service", service_name),
            &["routing_key"],
        )?;

        let events_consumed_total = IntCounterVec::new(
            Opts::new(
                "events_consumed_total",
                "Total number of deliveries settled by the consumer",
            )
            .const_label("service", service_name),
            &["routing_key", "outcome"],
        )?;

        let duplicate_writes_total = IntCounterVec::new(
            Opts::new(
                "duplicate_writes_total",
                "Total number of idempotent writes that found an existing document",
            )
            .const_label("service", service_name),
            &["collection"],
        )?;

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests")
                .const_label("service", service_name),
            &["method", "path", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Histogram of HTTP request latency",
            )
            .const_label("service", service_name)
            .buckets(DEFAULT_BUCKETS.to_vec()),
            &["method", "path"],
        )?;

        registry.register(Box::new(events_published_total.clone()))?;
        registry.register(Box::new(events_publish_failures_total.clone()))?;
        registry.register(Box::new(events_consumed_total.clone()))?;
        registry.register(Box::new(duplicate_writes_total.clone()))?;
        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;

        Ok(Self {
            events_published_total,
            events_publish_failures_total,
            events_consumed_total,
            duplicate_writes_total,
            http_requests_total,
            http_request_duration,
            registry,
        })
    }

    /// record_event_published はイベント発行カウンタをインクリメントする。
    pub fn record_event_published(&self, routing_key: &str) {
        self.events_published_total
            .with_label_values(&[routing_key])
            .inc();
    }

    pub fn record_publish_failure(&self, routing_key: &str) {
        self.events_publish_failures_total
            .with_label_values(&[routing_key])
            .inc();
    }

    /// record_event_consumed は配信の決着（acked / requeued / rejected）を記録する。
    pub fn record_event_consumed(&self, routing_key: &str, outcome: &str) {
        self.events_consumed_total
            .with_label_values(&[routing_key, outcome])
            .inc();
    }

    /// record_duplicate_write は重複キーで成功扱いになった書き込みを記録する。
    pub fn record_duplicate_write(&self, collection: &str) {
        self.duplicate_writes_total
            .with_label_values(&[collection])
            .inc();
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: &str) {
        self.http_requests_total
            .with_label_values(&[method, path, status])
            .inc();
    }

    pub fn record_http_duration(&self, method: &str, path: &str, duration_secs: f64) {
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// gather_metrics は Prometheus テキストフォーマットでメトリクスを返す。
    /// /metrics エンドポイントのハンドラで使用する。
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}
