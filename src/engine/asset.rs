//! Engine catalog: read-only per-engine-type assets loaded from a YAML file.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("failed to read catalog file {0}: {1}")]
    Io(String, std::io::Error),

    #[error("failed to parse catalog yaml: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Read-only catalog entry for one engine type, e.g. `vllm`, `whisper`, `asr`, `tts`.
#[derive(Debug, Clone, Deserialize)]
pub struct EngineAsset {
    pub image: String,
    #[serde(default)]
    pub alternative_images: Vec<String>,
    pub default_port: u16,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

impl EngineAsset {
    /// Image candidates in preference order: catalog image, alternatives,
    /// then hardcoded fallbacks keyed by engine type.
    pub fn image_candidates(&self, engine_type: &str) -> Vec<String> {
        let mut candidates = vec![self.image.clone()];
        candidates.extend(self.alternative_images.iter().cloned());
        candidates.extend(hardcoded_fallback_images(engine_type));
        candidates
    }
}

fn hardcoded_fallback_images(engine_type: &str) -> Vec<String> {
    match engine_type {
        "vllm" => vec!["vllm/vllm-openai:latest".to_string()],
        "whisper" => vec!["onerahmet/openai-whisper-asr-webservice:latest".to_string()],
        "tts" => vec!["ghcr.io/coqui-ai/tts:latest".to_string()],
        _ => vec![],
    }
}

/// Per-engine-type resource limits, with environment-variable override support.
#[derive(Debug, Clone, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_memory")]
    pub memory: String,
    #[serde(default = "default_cpu")]
    pub cpu: f64,
    #[serde(default)]
    pub gpu_required: bool,
    #[serde(default)]
    pub gpu_memory_mb: Option<u64>,
}

fn default_memory() -> String {
    "4Gi".to_string()
}

fn default_cpu() -> f64 {
    2.0
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory: default_memory(),
            cpu: default_cpu(),
            gpu_required: false,
            gpu_memory_mb: None,
        }
    }
}

impl ResourceLimits {
    /// Apply `<PREFIX>_<ENGINE>_MEMORY|CPU|GPU` overrides, engine uppercased.
    pub fn with_env_overrides(mut self, prefix: &str, engine_type: &str) -> Self {
        let engine_upper = engine_type.to_ascii_uppercase();

        if let Ok(v) = std::env::var(format!("{}_{}_MEMORY", prefix, engine_upper)) {
            self.memory = v;
        }
        if let Ok(v) = std::env::var(format!("{}_{}_CPU", prefix, engine_upper)) {
            if let Ok(parsed) = v.parse() {
                self.cpu = parsed;
            }
        }
        if let Ok(v) = std::env::var(format!("{}_{}_GPU", prefix, engine_upper)) {
            self.gpu_required = matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes");
        }
        self
    }

    /// Parse the `memory` size+unit string (e.g. `4Gi`, `512Mi`) into megabytes.
    pub fn memory_mb(&self) -> Option<u64> {
        parse_memory_to_mb(&self.memory)
    }
}

fn parse_memory_to_mb(spec: &str) -> Option<u64> {
    let spec = spec.trim();
    let split_at = spec.find(|c: char| !c.is_ascii_digit() && c != '.')?;
    let (number, unit) = spec.split_at(split_at);
    let value: f64 = number.parse().ok()?;
    let mb = match unit.to_ascii_lowercase().as_str() {
        "gi" | "gb" | "g" => value * 1024.0,
        "mi" | "mb" | "m" => value,
        "ki" | "kb" | "k" => value / 1024.0,
        _ => return None,
    };
    Some(mb.round() as u64)
}

/// Per-engine-type startup policy.
#[derive(Debug, Clone, Deserialize)]
pub struct StartupConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_interval_secs")]
    pub retry_interval_secs: u64,
    #[serde(default = "default_startup_timeout_secs")]
    pub startup_timeout_secs: u64,
    #[serde(default = "default_health_path")]
    pub health_path: String,
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_interval_secs() -> u64 {
    5
}
fn default_startup_timeout_secs() -> u64 {
    120
}
fn default_health_path() -> String {
    "/health".to_string()
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_interval_secs: default_retry_interval_secs(),
            startup_timeout_secs: default_startup_timeout_secs(),
            health_path: default_health_path(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct CatalogEntry {
    asset: EngineAsset,
    #[serde(default)]
    resources: ResourceLimits,
    #[serde(default)]
    startup: StartupConfig,
}

impl Default for EngineAsset {
    fn default() -> Self {
        Self {
            image: String::new(),
            alternative_images: Vec::new(),
            default_port: 8000,
            command: Vec::new(),
            args: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
struct CatalogFile {
    #[serde(default)]
    engines: HashMap<String, CatalogEntry>,
}

/// Catalog of engine assets, keyed by engine type, loaded once at startup.
#[derive(Debug, Clone, Default)]
pub struct EngineCatalog {
    assets: HashMap<String, EngineAsset>,
    resources: HashMap<String, ResourceLimits>,
    startup: HashMap<String, StartupConfig>,
}

impl EngineCatalog {
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|e| CatalogError::Io(path.display().to_string(), e))?;
        let file: CatalogFile = serde_yaml::from_str(&raw)?;

        let mut assets = HashMap::new();
        let mut resources = HashMap::new();
        let mut startup = HashMap::new();
        for (engine_type, entry) in file.engines {
            assets.insert(engine_type.clone(), entry.asset);
            resources.insert(engine_type.clone(), entry.resources);
            startup.insert(engine_type, entry.startup);
        }

        Ok(Self {
            assets,
            resources,
            startup,
        })
    }

    pub fn asset(&self, engine_type: &str) -> Option<&EngineAsset> {
        self.assets.get(engine_type)
    }

    pub fn resource_limits(&self, engine_type: &str) -> ResourceLimits {
        self.resources.get(engine_type).cloned().unwrap_or_default()
    }

    pub fn startup_config(&self, engine_type: &str) -> StartupConfig {
        self.startup.get(engine_type).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_catalog_file_yields_empty_catalog() {
        let catalog = EngineCatalog::load(Path::new("/nonexistent/catalog.yaml")).unwrap();
        assert!(catalog.asset("vllm").is_none());
    }

    #[test]
    fn memory_parsing_handles_common_units() {
        assert_eq!(parse_memory_to_mb("4Gi"), Some(4096));
        assert_eq!(parse_memory_to_mb("512Mi"), Some(512));
        assert_eq!(parse_memory_to_mb("bogus"), None);
    }

    #[test]
    fn resource_limits_env_override_applies() {
        std::env::set_var("INFERNO_VLLM_CPU", "8");
        let limits = ResourceLimits::default().with_env_overrides("INFERNO", "vllm");
        assert_eq!(limits.cpu, 8.0);
        std::env::remove_var("INFERNO_VLLM_CPU");
    }

    #[test]
    fn image_candidates_includes_hardcoded_fallback() {
        let asset = EngineAsset {
            image: "custom/vllm:tag".to_string(),
            ..Default::default()
        };
        let candidates = asset.image_candidates("vllm");
        assert_eq!(candidates[0], "custom/vllm:tag");
        assert!(candidates.contains(&"vllm/vllm-openai:latest".to_string()));
    }
}
