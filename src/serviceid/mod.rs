//! Service ID codec: `svc-<engineType>-<modelId>`.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServiceIdError {
    #[error("service id missing required 'svc-' prefix: {0}")]
    MissingPrefix(String),

    #[error("service id missing engine type separator: {0}")]
    MissingEngineType(String),
}

const PREFIX: &str = "svc-";

/// A parsed service identifier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceId {
    pub engine_type: String,
    pub model_id: String,
}

impl ServiceId {
    pub fn new(engine_type: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            engine_type: engine_type.into(),
            model_id: model_id.into(),
        }
    }

    /// Parse `svc-<engineType>-<modelId>`. `engineType` is the token up to the
    /// first `-` after the prefix; `modelId` is everything after, and may
    /// itself contain `-`.
    pub fn parse(s: &str) -> Result<Self, ServiceIdError> {
        let rest = s
            .strip_prefix(PREFIX)
            .ok_or_else(|| ServiceIdError::MissingPrefix(s.to_string()))?;

        let (engine_type, model_id) = rest
            .split_once('-')
            .ok_or_else(|| ServiceIdError::MissingEngineType(s.to_string()))?;

        Ok(Self {
            engine_type: engine_type.to_string(),
            model_id: model_id.to_string(),
        })
    }

    pub fn format(&self) -> String {
        format!("{}{}-{}", PREFIX, self.engine_type, self.model_id)
    }
}

impl std::fmt::Display for ServiceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.format())
    }
}

impl std::str::FromStr for ServiceId {
    type Err = ServiceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_simple_id() {
        let id = ServiceId::parse("svc-vllm-llama3").unwrap();
        assert_eq!(id.engine_type, "vllm");
        assert_eq!(id.model_id, "llama3");
    }

    #[test]
    fn model_id_may_contain_hyphens() {
        let id = ServiceId::parse("svc-whisper-base-en-v2").unwrap();
        assert_eq!(id.engine_type, "whisper");
        assert_eq!(id.model_id, "base-en-v2");
    }

    #[test]
    fn missing_prefix_is_rejected() {
        assert!(matches!(
            ServiceId::parse("vllm-llama3"),
            Err(ServiceIdError::MissingPrefix(_))
        ));
    }

    #[test]
    fn missing_engine_type_separator_is_rejected() {
        assert!(matches!(
            ServiceId::parse("svc-onlyoneword"),
            Err(ServiceIdError::MissingEngineType(_))
        ));
    }

    #[test]
    fn round_trip_parse_format_is_idempotent() {
        for raw in ["svc-vllm-llama3", "svc-asr-model-with-many-hyphens", "svc-tts-x"] {
            let parsed = ServiceId::parse(raw).unwrap();
            assert_eq!(parsed.format(), raw);
            let reparsed = ServiceId::parse(&parsed.format()).unwrap();
            assert_eq!(reparsed, parsed);
        }
    }

    #[test]
    fn display_matches_format() {
        let id = ServiceId::new("vllm", "llama3");
        assert_eq!(id.to_string(), "svc-vllm-llama3");
    }
}
