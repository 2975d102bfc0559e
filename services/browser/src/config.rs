use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Main configuration for the browser service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    pub service: ServiceConfig,
    /// Catalog database configuration
    pub database: DatabaseConfig,
    /// Search backend configuration
    pub backend: BackendConfig,
    /// CDN bucket configuration
    pub cdn: CdnConfig,
    /// Image serving configuration
    pub images: ImageConfig,
    /// API configuration
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

/// Which catalog store implementation to run against
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Postgres,
    Memory,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// Store implementation
    #[serde(default)]
    pub backend: StoreBackend,
    /// PostgreSQL connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
    /// JSON snapshot of file records, used by the memory backend
    pub snapshot_path: Option<PathBuf>,
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
    /// Time budget for aggregation queries in milliseconds
    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,
    /// Run migrations on startup
    #[serde(default)]
    pub run_migrations: bool,
}

/// External search backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the search backend
    #[serde(default = "default_backend_url")]
    pub base_url: String,
    /// Request timeout in milliseconds
    #[serde(default = "default_backend_timeout_ms")]
    pub timeout_ms: u64,
}

/// CDN (S3-compatible bucket) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CdnConfig {
    /// Fetch missing images from the bucket
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Bucket holding the frame objects
    #[serde(default = "default_bucket")]
    pub bucket: String,
    /// Bucket region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (DigitalOcean Spaces, MinIO, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Local image serving configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ImageConfig {
    /// Root directory for locally mirrored frames
    #[serde(default = "default_image_root")]
    pub root: PathBuf,
    /// Cache lifetime for placeholder images in seconds
    #[serde(default = "default_placeholder_max_age_secs")]
    pub placeholder_max_age_secs: u64,
}

/// API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

// Default value functions
fn default_service_name() -> String {
    "browser-service".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_database_url() -> String {
    "postgres://localhost:5432/vbs".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    1
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_query_timeout_ms() -> u64 {
    5000
}

fn default_backend_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_backend_timeout_ms() -> u64 {
    10_000
}

fn default_bucket() -> String {
    "vbs".to_string()
}

fn default_region() -> String {
    "sgp1".to_string()
}

fn default_image_root() -> PathBuf {
    PathBuf::from("public/images")
}

fn default_placeholder_max_age_secs() -> u64 {
    60
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    3000
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", default_service_name())?
            .set_default("service.log_level", default_log_level())?
            .set_default("service.metrics_port", i64::from(default_metrics_port()))?
            .set_default("database.url", default_database_url())?
            .set_default("backend.base_url", default_backend_url())?
            .set_default("cdn.bucket", default_bucket())?
            .set_default("images.root", "public/images")?
            .set_default("api.port", i64::from(default_api_port()))?
            .add_source(config::File::with_name("config/browser").required(false))
            .add_source(config::File::with_name("/etc/vbs/browser").required(false))
            // BROWSER__DATABASE__URL -> database.url
            .add_source(
                config::Environment::with_prefix("BROWSER")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("database.url", std::env::var("DATABASE_URL").ok())?
            .set_override_option("backend.base_url", std::env::var("BACKEND_URL").ok())?
            .build()?;

        config.try_deserialize().map_err(Into::into)
    }

    /// Get the aggregation time budget as Duration
    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.database.query_timeout_ms)
    }
}

impl DatabaseConfig {
    /// Get pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get idle connection timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

impl BackendConfig {
    /// Get the request timeout as Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
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

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_database_url(),
            snapshot_path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
            query_timeout_ms: default_query_timeout_ms(),
            run_migrations: false,
        }
    }
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_backend_url(),
            timeout_ms: default_backend_timeout_ms(),
        }
    }
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            root: default_image_root(),
            placeholder_max_age_secs: default_placeholder_max_age_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        assert_eq!(default_query_timeout_ms(), 5000);
        assert_eq!(default_placeholder_max_age_secs(), 60);
        assert_eq!(DatabaseConfig::default().backend, StoreBackend::Postgres);
    }

    #[test]
    fn test_store_backend_deserialize() {
        let backend: StoreBackend = serde_json::from_str("\"memory\"").unwrap();
        assert_eq!(backend, StoreBackend::Memory);
    }

    #[test]
    fn test_sections_fill_defaults() {
        let config: Config = serde_json::from_value(serde_json::json!({
            "service": {},
            "database": { "backend": "memory" },
            "backend": { "base_url": "http://search:8000" },
            "cdn": {},
            "images": {},
            "api": {}
        }))
        .unwrap();

        assert_eq!(config.database.backend, StoreBackend::Memory);
        assert_eq!(config.backend.base_url, "http://search:8000");
        assert_eq!(config.query_timeout(), Duration::from_secs(5));
        assert_eq!(config.api.port, 3000);
        assert!(config.cdn.enabled);

        let service = ServiceConfig::default();
        assert_eq!(config.service.name, service.name);
        assert_eq!(config.service.log_level, service.log_level);
        assert_eq!(config.service.metrics_port, service.metrics_port);

        let images = ImageConfig::default();
        assert_eq!(config.images.root, images.root);
        assert_eq!(config.images.placeholder_max_age_secs, images.placeholder_max_age_secs);

        let database = DatabaseConfig::default();
        assert_eq!(config.database.max_connections, database.max_connections);
        assert_eq!(config.database.query_timeout_ms, database.query_timeout_ms);
    }
}
