//! ModelService: the persisted record for one inference service.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Creating,
    Running,
    Stopped,
    Failed,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Creating => "creating",
            ServiceStatus::Running => "running",
            ServiceStatus::Stopped => "stopped",
            ServiceStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "creating" => Some(ServiceStatus::Creating),
            "running" => Some(ServiceStatus::Running),
            "stopped" => Some(ServiceStatus::Stopped),
            "failed" => Some(ServiceStatus::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceClass {
    Small,
    Medium,
    Large,
}

/// A dynamic config value as it round-trips through JSON: numbers always
/// arrive as 64-bit floats, so accessors coerce across int/int64/float64.
#[derive(Debug, Clone)]
pub struct ConfigMap(pub HashMap<String, Value>);

impl ConfigMap {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        self.0.get(key).and_then(|v| v.as_str().map(str::to_string))
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.0.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.0.get(key).and_then(|v| {
            v.as_i64()
                .or_else(|| v.as_f64().map(|f| f as i64))
        })
    }

    pub fn get_u16(&self, key: &str) -> Option<u16> {
        self.get_i64(key).and_then(|v| u16::try_from(v).ok())
    }

    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(|v| v.as_f64())
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }
}

impl Default for ConfigMap {
    fn default() -> Self {
        Self::new()
    }
}

/// A persisted inference service record.
#[derive(Debug, Clone)]
pub struct ModelService {
    pub id: String,
    pub name: String,
    pub model_id: String,
    pub status: ServiceStatus,
    pub replicas: u32,
    pub replicas_ready: u32,
    pub resource_class: ResourceClass,
    pub endpoints: Vec<String>,
    pub config: ConfigMap,
    pub metrics: Option<Value>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ModelService {
    pub fn new(id: impl Into<String>, name: impl Into<String>, model_id: impl Into<String>, now: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model_id: model_id.into(),
            status: ServiceStatus::Creating,
            replicas: 1,
            replicas_ready: 0,
            resource_class: ResourceClass::Small,
            endpoints: Vec::new(),
            config: ConfigMap::new(),
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ServiceStatus::Running
    }

    pub fn port(&self) -> Option<u16> {
        self.config.get_u16("port")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn config_map_coerces_float_to_i64() {
        let mut cfg = ConfigMap::new();
        cfg.set("port", json!(8080.0));
        assert_eq!(cfg.get_i64("port"), Some(8080));
        assert_eq!(cfg.get_u16("port"), Some(8080));
    }

    #[test]
    fn config_map_reads_plain_int() {
        let mut cfg = ConfigMap::new();
        cfg.set("port", json!(9000));
        assert_eq!(cfg.get_u16("port"), Some(9000));
    }

    #[test]
    fn service_status_round_trips_through_str() {
        for status in [
            ServiceStatus::Creating,
            ServiceStatus::Running,
            ServiceStatus::Stopped,
            ServiceStatus::Failed,
        ] {
            assert_eq!(ServiceStatus::parse(status.as_str()), Some(status));
        }
    }
}
