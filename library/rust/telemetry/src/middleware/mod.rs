//! HTTP 計装用の Tower Layer。

#[cfg(any(feature = "axum-layer", test))]
mod http_layer;

#[cfg(any(feature = "axum-layer", test))]
pub use http_layer::MetricsLayer;
