use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use http::{Request, Response, StatusCode};
use pin_project_lite::pin_project;
use tower::{Layer, Service};

use crate::metrics::Metrics;

/// ルートに一致しなかったリクエストの path ラベル。
pub const UNMATCHED_PATH_LABEL: &str = "unmatched";

const DEFAULT_QUIET_PATHS: [&str; 2] = ["/healthz", "/metrics"];

/// RequestRecorder はレスポンス完了時のメトリクス記録とアクセスログを担う。
#[derive(Clone)]
struct RequestRecorder {
    metrics: Arc<Metrics>,
    quiet_paths: Arc<[String]>,
}

impl RequestRecorder {
    /// 404 の path はラベルにせず、任意パスによる系列の増加を防ぐ。
    fn path_label<'a>(path: &'a str, status: StatusCode) -> &'a str {
        if status == StatusCode::NOT_FOUND {
            UNMATCHED_PATH_LABEL
        } else {
            path
        }
    }

    fn is_quiet(&self, path: &str) -> bool {
        self.quiet_paths.iter().any(|p| p == path)
    }

    fn record(&self, method: &str, path: &str, status: StatusCode, duration_secs: f64) {
        let label = Self::path_label(path, status);
        self.metrics
            .record_http_request(method, label, status.as_str());
        self.metrics.record_http_duration(method, label, duration_secs);

        // ヘルスチェックとスクレイプは debug に落とす
        if self.is_quiet(path) {
            tracing::debug!(
                http.method = method,
                http.path = path,
                http.status_code = status.as_u16(),
                duration_secs,
                "request completed"
            );
        } else {
            tracing::info!(
                http.method = method,
                http.path = path,
                http.status_code = status.as_u16(),
                duration_secs,
                "request completed"
            );
        }
    }
}

/// MetricsLayer は運用エンドポイントの Router に適用する Tower Layer。
///
/// リクエスト数とレイテンシを記録し、アクセスログを出力する。
/// `quiet_paths` に含まれるパスのログは debug レベルになる。
///
/// ```ignore
/// let app = Router::new()
///     .route("/healthz", get(healthz))
///     .route("/metrics", get(metrics_handler))
///     .layer(MetricsLayer::new(metrics.clone()));
/// ```
#[derive(Clone)]
pub struct MetricsLayer {
    recorder: RequestRecorder,
}

impl MetricsLayer {
    pub fn new(metrics: Arc<Metrics>) -> Self {
        Self {
            recorder: RequestRecorder {
                metrics,
                quiet_paths: DEFAULT_QUIET_PATHS.iter().map(ToString::to_string).collect(),
            },
        }
    }

    /// debug レベルでログを出すパスを置き換える。
    #[must_use]
    pub fn with_quiet_paths<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<String>,
    {
        self.recorder.quiet_paths = paths.into_iter().map(Into::into).collect();
        self
    }
}

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService {
            inner,
            recorder: self.recorder.clone(),
        }
    }
}

/// MetricsService は MetricsLayer が生成する Service。
#[derive(Clone)]
pub struct MetricsService<S> {
    inner: S,
    recorder: RequestRecorder,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for MetricsService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = MetricsResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let method = req.method().as_str().to_string();
        let path = req.uri().path().to_string();
        MetricsResponseFuture {
            inner: self.inner.call(req),
            method,
            path,
            start: Instant::now(),
            recorder: self.recorder.clone(),
        }
    }
}

pin_project! {
    /// MetricsResponseFuture はレスポンス確定時に一度だけ記録する。
    pub struct MetricsResponseFuture<F> {
        #[pin]
        inner: F,
        method: String,
        path: String,
        start: Instant,
        recorder: RequestRecorder,
    }
}

impl<F, ResBody, E> std::future::Future for MetricsResponseFuture<F>
where
    F: std::future::Future<Output = Result<Response<ResBody>, E>>,
{
    type Output = Result<Response<ResBody>, E>;

    fn poll(self: std::pin::Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();
        let result = std::task::ready!(this.inner.poll(cx));
        if let Ok(ref response) = result {
            this.recorder.record(
                this.method,
                this.path,
                response.status(),
                this.start.elapsed().as_secs_f64(),
            );
        }
        Poll::Ready(result)
    }
}
