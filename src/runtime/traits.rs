//! Container Runtime Adapter contract.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Errors surfaced by a `RuntimeAdapter`.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("container not found: {0}")]
    NotFound(String),

    #[error("port or resource busy: {0}")]
    Busy(String),

    #[error("invalid container spec: {0}")]
    Invalid(String),

    #[error("container runtime unreachable: {0}")]
    Transport(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

impl From<bollard::errors::Error> for RuntimeError {
    fn from(err: bollard::errors::Error) -> Self {
        match &err {
            bollard::errors::Error::DockerResponseServerError { status_code: 404, .. } => {
                RuntimeError::NotFound(err.to_string())
            }
            bollard::errors::Error::DockerResponseServerError { status_code: 409, .. } => {
                RuntimeError::Busy(err.to_string())
            }
            _ => RuntimeError::Transport(err.to_string()),
        }
    }
}

/// A bind mount from the host into the container.
#[derive(Debug, Clone)]
pub struct MountSpec {
    pub source: String,
    pub target: String,
    pub read_only: bool,
}

/// Options for `create_and_start`.
#[derive(Debug, Clone, Default)]
pub struct ContainerOptions {
    /// Host port published, identical to the container port.
    pub port: Option<u16>,
    pub env: HashMap<String, String>,
    /// Labels applied to the container; callers should always include
    /// `managed=true` and `engine=<type>` so orphans can be found later.
    pub labels: HashMap<String, String>,
    pub mounts: Vec<MountSpec>,
    pub gpu: bool,
    pub memory_mb: Option<u64>,
    pub cpu_cores: Option<f64>,
    pub command: Option<Vec<String>>,
    pub working_dir: Option<String>,
    pub network: Option<String>,
}

/// Summary of a container discovered via `find_by_published_port` or `list_by_labels`.
#[derive(Debug, Clone)]
pub struct ContainerSummary {
    pub id: String,
    pub name: String,
    pub image: String,
    pub managed: bool,
}

/// Filter for the `events` stream.
#[derive(Debug, Clone, Default)]
pub struct RuntimeEventFilter {
    pub labels: HashMap<String, String>,
}

/// A single lifecycle event observed on the runtime.
#[derive(Debug, Clone)]
pub struct RuntimeEvent {
    pub container_id: String,
    pub action: String,
}

/// Uniform interface to the host container runtime.
///
/// Every operation accepts a `CancellationToken`; an implementation must stop
/// waiting on the underlying runtime call as soon as it fires and surface
/// `RuntimeError::Transport` rather than block past cancellation.
#[async_trait]
pub trait RuntimeAdapter: Send + Sync {
    async fn pull_image(&self, ctx: CancellationToken, image_ref: &str) -> RuntimeResult<()>;

    async fn create_and_start(
        &self,
        ctx: CancellationToken,
        name: &str,
        image: &str,
        options: &ContainerOptions,
    ) -> RuntimeResult<String>;

    async fn stop_and_remove(
        &self,
        ctx: CancellationToken,
        id: &str,
        timeout_secs: u64,
    ) -> RuntimeResult<()>;

    async fn status(&self, ctx: CancellationToken, id: &str) -> RuntimeResult<String>;

    async fn logs(&self, ctx: CancellationToken, id: &str, tail: u32) -> RuntimeResult<String>;

    async fn stream_logs(
        &self,
        ctx: CancellationToken,
        id: &str,
        since: i64,
    ) -> RuntimeResult<mpsc::Receiver<String>>;

    async fn list_by_labels(
        &self,
        ctx: CancellationToken,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<Vec<String>>;

    async fn find_by_published_port(
        &self,
        ctx: CancellationToken,
        port: u16,
    ) -> RuntimeResult<Vec<ContainerSummary>>;

    async fn events(
        &self,
        ctx: CancellationToken,
        filter: RuntimeEventFilter,
    ) -> RuntimeResult<mpsc::Receiver<RuntimeEvent>>;
}
