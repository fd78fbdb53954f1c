//! 構造化ログユーティリティ。
//!
//! ```ignore
//! tracing::info!(archive_id = %id, message_count = 3, "archive parsed");
//! tracing::warn!(error = %e, "best-effort document update failed");
//! ```

use tracing_subscriber::EnvFilter;

/// env_filter はログフィルタを構築する。
/// RUST_LOG が設定されていればそれを優先し、無ければ設定値のレベルを使う。
pub fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_log_level(level).as_str().to_lowercase()))
}

/// parse_log_level はログレベル文字列を tracing の Level に変換する。
pub fn parse_log_level(level: &str) -> tracing::Level {
    match level.to_ascii_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
