//! Inferno Daemon Library
//!
//! Control plane for local AI inference engines: Engine Provider (container
//! and native process lifecycle), Service Provider (persisted service
//! records), Command/Query surface, Inference Dispatcher, and the HTTP
//! gateway that fronts them.

pub mod auth;
pub mod command;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod events;
pub mod ratelimit;
pub mod router;
pub mod runtime;
pub mod service;
pub mod serviceid;

// Re-export commonly used types
pub use auth::AuthGate;
pub use command::CommandExecutor;
pub use config::Configuration;
pub use dispatch::InferenceDispatcher;
pub use engine::EngineProvider;
pub use events::EventBus;
pub use ratelimit::RateLimiter;
pub use runtime::{DockerRuntimeAdapter, RuntimeAdapter};
pub use service::ServiceProvider;
