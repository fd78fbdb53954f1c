use copilot_document_store::DatabaseConfig;
use copilot_messaging::{ConsumerConfig, MessagingConfig};
use copilot_telemetry::TelemetryConfig;
use serde::Deserialize;

use crate::domain::service::ChunkerConfig;

/// Config はアプリケーション全体の設定。
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: Option<DatabaseConfig>,
    #[serde(default)]
    pub messaging: MessagingConfig,
    #[serde(default)]
    pub observability: Option<TelemetryConfig>,
    #[serde(default = "default_consumer")]
    pub consumer: ConsumerConfig,
    #[serde(default)]
    pub chunking: ChunkerConfig,
}

/// 既定の購読設定: JSONParsed を永続キュー chunking.json-parsed で受信する。
pub fn default_consumer() -> ConsumerConfig {
    ConsumerConfig::new("chunking.json-parsed", vec!["json.parsed".to_string()])
}

/// AppConfig はアプリケーション設定。
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub name: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_environment")]
    pub environment: String,
}

fn default_version() -> String {
    "0.1.0".to_string()
}

fn default_environment() -> String {
    "dev".to_string()
}

/// ServerConfig はサーバー設定。
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

impl Config {
    /// CONFIG_PATH（既定 config/config.yaml）から設定を読み込む。
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config/config.yaml".to_string());
        let content = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("failed to read config {}: {}", config_path, e))?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> anyhow::Result<Self> {
        let cfg: Config = serde_yaml::from_str(content)?;
        cfg.messaging.validate()?;
        cfg.consumer.validate()?;
        cfg.chunking.validate()?;
        Ok(cfg)
    }

    /// observability セクションが無ければ app 設定から既定値を組み立てる。
    pub fn telemetry(&self) -> TelemetryConfig {
        let mut telemetry = self
            .observability
            .clone()
            .unwrap_or_else(|| TelemetryConfig::new(self.app.name.clone()));
        if telemetry.service_name.is_empty() {
            telemetry.service_name = self.app.name.clone();
        }
        telemetry.version = self.app.version.clone();
        telemetry.environment = self.app.environment.clone();
        telemetry
    }
}
