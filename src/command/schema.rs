//! Schema-described operation catalog for the Command/Query surface.

use serde_json::{json, Value};

/// Declared shape of one `<domain>.<action>` operation: named, typed input and
/// output schemas plus at least one worked example.
#[derive(Debug, Clone)]
pub struct OperationSchema {
    pub name: &'static str,
    pub input_schema: Value,
    pub output_schema: Value,
    pub examples: Vec<(Value, Value)>,
}

fn service_output_schema() -> Value {
    json!({
        "type": "object",
        "required": ["id", "name", "model_id", "status"],
        "properties": {
            "id": {"type": "string"},
            "name": {"type": "string"},
            "model_id": {"type": "string"},
            "status": {"type": "string", "enum": ["creating", "running", "stopped", "failed"]},
            "endpoints": {"type": "array", "items": {"type": "string"}},
        }
    })
}

fn example_service(id: &str, status: &str) -> Value {
    json!({
        "id": id,
        "name": "llama3",
        "model_id": "llama-3-8b-instruct",
        "status": status,
        "endpoints": if status == "running" { vec!["http://localhost:8000"] } else { vec![] },
    })
}

/// All operations this surface exposes, named `service.<action>`.
pub fn catalog() -> Vec<OperationSchema> {
    vec![
        OperationSchema {
            name: "service.create",
            input_schema: json!({
                "type": "object",
                "required": ["engine_type", "model_id", "name", "model_path"],
                "properties": {
                    "engine_type": {"type": "string"},
                    "model_id": {"type": "string"},
                    "name": {"type": "string"},
                    "model_path": {"type": "string"},
                    "gpu": {"type": "boolean"},
                }
            }),
            output_schema: service_output_schema(),
            examples: vec![(
                json!({"engine_type": "vllm", "model_id": "llama-3-8b-instruct", "name": "llama3", "model_path": "/models/llama3", "gpu": true}),
                example_service("svc-vllm-llama-3-8b-instruct", "creating"),
            )],
        },
        OperationSchema {
            name: "service.delete",
            input_schema: json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}),
            output_schema: json!({"type": "object", "properties": {"deleted": {"type": "boolean"}}}),
            examples: vec![(
                json!({"id": "svc-vllm-llama-3-8b-instruct"}),
                json!({"deleted": true}),
            )],
        },
        OperationSchema {
            name: "service.scale",
            input_schema: json!({
                "type": "object",
                "required": ["id", "replicas"],
                "properties": {"id": {"type": "string"}, "replicas": {"type": "integer"}}
            }),
            output_schema: service_output_schema(),
            examples: vec![(
                json!({"id": "svc-vllm-llama-3-8b-instruct", "replicas": 2}),
                example_service("svc-vllm-llama-3-8b-instruct", "running"),
            )],
        },
        OperationSchema {
            name: "service.start",
            input_schema: json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}, "timeout_secs": {"type": "integer"}}}),
            output_schema: service_output_schema(),
            examples: vec![(
                json!({"id": "svc-vllm-llama-3-8b-instruct"}),
                example_service("svc-vllm-llama-3-8b-instruct", "running"),
            )],
        },
        OperationSchema {
            name: "service.stop",
            input_schema: json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}, "timeout_secs": {"type": "integer"}}}),
            output_schema: service_output_schema(),
            examples: vec![(
                json!({"id": "svc-vllm-llama-3-8b-instruct"}),
                example_service("svc-vllm-llama-3-8b-instruct", "stopped"),
            )],
        },
        OperationSchema {
            name: "service.get",
            input_schema: json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}),
            output_schema: service_output_schema(),
            examples: vec![(
                json!({"id": "svc-vllm-llama-3-8b-instruct"}),
                example_service("svc-vllm-llama-3-8b-instruct", "running"),
            )],
        },
        OperationSchema {
            name: "service.list",
            input_schema: json!({"type": "object", "properties": {}}),
            output_schema: json!({"type": "array", "items": service_output_schema()}),
            examples: vec![(json!({}), json!([example_service("svc-vllm-llama-3-8b-instruct", "running")]))],
        },
        OperationSchema {
            name: "service.recommend",
            input_schema: json!({"type": "object", "required": ["model_id"], "properties": {"model_id": {"type": "string"}}}),
            output_schema: json!({"type": "object", "properties": {"engine_type": {"type": "string"}, "resource_class": {"type": "string"}}}),
            examples: vec![(
                json!({"model_id": "llama-3-8b-instruct"}),
                json!({"engine_type": "vllm", "resource_class": "medium"}),
            )],
        },
        OperationSchema {
            name: "service.status",
            input_schema: json!({"type": "object", "required": ["id"], "properties": {"id": {"type": "string"}}}),
            output_schema: json!({"type": "object", "properties": {"status": {"type": "string"}}}),
            examples: vec![(
                json!({"id": "svc-vllm-llama-3-8b-instruct"}),
                json!({"status": "running"}),
            )],
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_has_at_least_one_example() {
        for op in catalog() {
            assert!(!op.examples.is_empty(), "{} has no example", op.name);
        }
    }

    #[test]
    fn operation_names_follow_domain_dot_action() {
        for op in catalog() {
            assert!(op.name.contains('.'), "{} is missing a domain separator", op.name);
        }
    }
}
