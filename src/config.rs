use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the photo catalog service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Catalog database configuration
    pub catalog: CatalogConfig,
    /// Object storage configuration
    pub storage: StorageConfig,
    /// Notification email configuration
    pub email: EmailConfig,
    /// Buffered queue configuration
    pub queue: QueueConfig,
    /// Ingest API configuration
    pub api: ApiConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// Catalog database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_run_migrations")]
    pub run_migrations: bool,
}

/// Object storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Notification email configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EmailConfig {
    /// Verified sender address
    pub sender: String,
    /// Uploader address receiving confirmations and rejections
    pub recipient: String,
    /// AWS region for the email service
    #[serde(default = "default_region")]
    pub region: String,
}

/// Buffered queue configuration
///
/// Batch size and window shape throughput only; retry semantics come from
/// `max_attempts` and the visibility timeout.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Channel capacity for pending messages
    #[serde(default = "default_queue_capacity")]
    pub capacity: usize,
    /// Maximum messages delivered per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Maximum wait for a partially-filled batch, in milliseconds
    #[serde(default = "default_batch_window_ms")]
    pub batch_window_ms: u64,
    /// Time a consumer has to acknowledge a message, in milliseconds
    #[serde(default = "default_visibility_timeout_ms")]
    pub visibility_timeout_ms: u64,
    /// Failed delivery attempts before a message is dead-lettered
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

/// Ingest API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

// Default value functions
fn default_service_name() -> String {
    "photo-catalog".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_run_migrations() -> bool {
    true
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    5
}

fn default_batch_window_ms() -> u64 {
    5000
}

fn default_visibility_timeout_ms() -> u64 {
    30000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            // Start with default values
            .set_default("service.name", "photo-catalog")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            // Add config file if present
            .add_source(config::File::with_name("config/photo-catalog").required(false))
            .add_source(config::File::with_name("/etc/photo-catalog/config").required(false))
            // Override with environment variables
            // PHOTO__CATALOG__URL -> catalog.url
            .add_source(
                config::Environment::with_prefix("PHOTO")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }
}

impl QueueConfig {
    /// Batching window as a Duration
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }

    /// Visibility timeout as a Duration
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_millis(self.visibility_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: default_queue_capacity(),
            batch_size: default_batch_size(),
            batch_window_ms: default_batch_window_ms(),
            visibility_timeout_ms: default_visibility_timeout_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let queue = QueueConfig::default();
        assert_eq!(queue.batch_size, 5);
        assert_eq!(queue.batch_window(), Duration::from_secs(5));
        assert_eq!(queue.max_attempts, 3);
    }
}
