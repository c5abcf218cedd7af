//! Configuration structures and loading

use std::path::PathBuf;
use anyhow::{Context, Result};
use serde::Deserialize;

/// Main daemon configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Configuration {
    /// Enable debug mode
    #[serde(default)]
    pub debug: bool,

    /// System paths
    #[serde(default)]
    pub system: SystemConfiguration,

    /// HTTP gateway configuration
    #[serde(default)]
    pub ingress: IngressConfiguration,

    /// Auth gate configuration
    #[serde(default)]
    pub auth: AuthConfiguration,

    /// Rate limiter configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfiguration,

    /// Event bus configuration
    #[serde(default)]
    pub events: EventBusConfiguration,

    /// Container runtime configuration
    #[serde(default)]
    pub runtime: RuntimeConfiguration,

    /// Engine catalog configuration
    #[serde(default)]
    pub catalog: CatalogConfiguration,
}

impl Configuration {
    /// Load configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let config_path = std::path::Path::new(path);
        let content = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let mut config: Configuration = toml::from_str(&content)
            .with_context(|| "Failed to parse configuration")?;

        let base_dir = config_path
            .parent()
            .and_then(|p| if p.as_os_str().is_empty() { None } else { Some(p) })
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        config.system.resolve_paths(&base_dir);
        std::fs::create_dir_all(&config.system.data_directory)?;

        Ok(config)
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            debug: false,
            system: SystemConfiguration::default(),
            ingress: IngressConfiguration::default(),
            auth: AuthConfiguration::default(),
            rate_limit: RateLimitConfiguration::default(),
            events: EventBusConfiguration::default(),
            runtime: RuntimeConfiguration::default(),
            catalog: CatalogConfiguration::default(),
        }
    }
}

/// System paths and settings
#[derive(Debug, Clone, Deserialize)]
pub struct SystemConfiguration {
    /// Directory for daemon state (sqlite files, etc.)
    #[serde(default = "default_data_directory")]
    pub data_directory: PathBuf,
}

impl Default for SystemConfiguration {
    fn default() -> Self {
        Self {
            data_directory: default_data_directory(),
        }
    }
}

impl SystemConfiguration {
    /// Resolve relative paths against the config file's directory.
    pub fn resolve_paths(&mut self, base_dir: &std::path::Path) {
        self.data_directory = Self::resolve_path(&self.data_directory, base_dir);
    }

    fn resolve_path(path: &std::path::Path, base_dir: &std::path::Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            let resolved = base_dir.join(path);
            resolved
                .canonicalize()
                .unwrap_or_else(|_| Self::normalize_path(&resolved))
        }
    }

    fn normalize_path(path: &std::path::Path) -> PathBuf {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                std::path::Component::ParentDir => {
                    components.pop();
                }
                std::path::Component::CurDir => {}
                c => components.push(c),
            }
        }
        components.iter().collect()
    }
}

fn default_data_directory() -> PathBuf {
    PathBuf::from(".inferno")
}

/// HTTP gateway (ingress) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfiguration {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// TLS configuration
    #[serde(default)]
    pub ssl: SslConfiguration,

    /// CORS allowed origins: exact origins, "*", or "*.domain.tld" wildcards
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,

    /// Send Access-Control-Allow-Credentials: true
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// Access-Control-Max-Age, in seconds
    #[serde(default = "default_cors_max_age")]
    pub cors_max_age: u64,
}

impl Default for IngressConfiguration {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            ssl: SslConfiguration::default(),
            cors_allowed_origins: Vec::new(),
            cors_allow_credentials: false,
            cors_max_age: default_cors_max_age(),
        }
    }
}

fn default_host() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8070
}

fn default_cors_max_age() -> u64 {
    3600
}

/// TLS configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SslConfiguration {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub cert: String,
    #[serde(default)]
    pub key: String,
}

/// Auth gate configuration
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfiguration {
    /// Global auth enable flag; Recommended operations require a token only when this is set
    #[serde(default)]
    pub enabled: bool,

    /// Valid bearer tokens
    #[serde(default)]
    pub tokens: Vec<String>,

    /// Per-operation auth level overrides, keyed by `<domain>.<action>`
    #[serde(default)]
    pub operation_levels: std::collections::HashMap<String, String>,

    /// Realm advertised in WWW-Authenticate
    #[serde(default = "default_realm")]
    pub realm: String,
}

impl Default for AuthConfiguration {
    fn default() -> Self {
        Self {
            enabled: false,
            tokens: Vec::new(),
            operation_levels: std::collections::HashMap::new(),
            realm: default_realm(),
        }
    }
}

fn default_realm() -> String {
    "inferno".into()
}

/// Rate limiter configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfiguration {
    /// Tokens per second refilled per key
    #[serde(default = "default_rate")]
    pub rate: f64,

    /// Bucket capacity
    #[serde(default = "default_capacity")]
    pub capacity: u32,
}

impl Default for RateLimitConfiguration {
    fn default() -> Self {
        Self {
            rate: default_rate(),
            capacity: default_capacity(),
        }
    }
}

fn default_rate() -> f64 {
    1.0
}

fn default_capacity() -> u32 {
    60
}

/// Event bus configuration
#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfiguration {
    /// Publish channel buffer size
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,

    /// Worker pool size
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Whether to wrap the bus in the durable (SQLite-backed) persistent bus
    #[serde(default)]
    pub persistent: bool,

    /// Max events batched before a forced flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max time between flushes, in milliseconds
    #[serde(default = "default_flush_period_ms")]
    pub flush_period_ms: u64,
}

impl Default for EventBusConfiguration {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            worker_count: default_worker_count(),
            persistent: false,
            batch_size: default_batch_size(),
            flush_period_ms: default_flush_period_ms(),
        }
    }
}

fn default_buffer_size() -> usize {
    1000
}

fn default_worker_count() -> usize {
    4
}

fn default_batch_size() -> usize {
    100
}

fn default_flush_period_ms() -> u64 {
    1000
}

/// Container runtime configuration
#[derive(Debug, Clone, Deserialize)]
pub struct RuntimeConfiguration {
    /// Container engine socket/endpoint; empty means use the platform default
    #[serde(default)]
    pub socket: String,

    /// Environment-variable override prefix (`<PREFIX>_<ENGINE>_MEMORY|CPU|GPU`)
    #[serde(default = "default_env_prefix")]
    pub env_prefix: String,

    /// Network the started containers join
    #[serde(default = "default_network")]
    pub network: String,
}

impl Default for RuntimeConfiguration {
    fn default() -> Self {
        Self {
            socket: String::new(),
            env_prefix: default_env_prefix(),
            network: default_network(),
        }
    }
}

fn default_env_prefix() -> String {
    "INFERNO".into()
}

fn default_network() -> String {
    "bridge".into()
}

/// Engine catalog configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogConfiguration {
    /// Path to the YAML engine-asset catalog; empty means use builtin defaults only
    #[serde(default)]
    pub path: String,
}

impl Default for CatalogConfiguration {
    fn default() -> Self {
        Self { path: String::new() }
    }
}
