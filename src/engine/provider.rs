//! Engine Provider: installs images/binaries and runs the container/native-process
//! lifecycle for one engine type at a time.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde_json::json;
use tokio::process::{Child, Command};
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::events::{Event, EventBus};
use crate::runtime::{self, ContainerOptions, RuntimeAdapter};

use super::asset::EngineCatalog;
use super::error::{EngineError, EngineResult};

const FRESH_CONTEXT_CAP: Duration = Duration::from_secs(30);
const PORT_RELEASE_WAIT: Duration = Duration::from_secs(2);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(2);
const PULL_TIMEOUT: Duration = Duration::from_secs(300);

/// Effective parameters resolved for one Start attempt.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub engine_type: String,
    pub model_id: String,
    pub model_path: String,
    pub port: Option<u16>,
    pub gpu: bool,
    pub device: Option<String>,
    pub async_start: bool,
    pub gpu_memory_utilization: Option<f64>,
    pub env_prefix: String,
    pub network: Option<String>,
}

/// Outcome of a successful Start.
#[derive(Debug, Clone)]
pub struct StartOutcome {
    pub endpoint: String,
    pub port: u16,
    pub container_id: Option<String>,
    pub native_pid: Option<u32>,
}

struct NativeHandle {
    child: Child,
}

/// Holds per-engine-type state and drives Install/Start/Stop.
pub struct EngineProvider {
    runtime: Option<Arc<dyn RuntimeAdapter>>,
    catalog: EngineCatalog,
    events: EventBus,
    containers: RwLock<HashMap<String, String>>,
    native: RwLock<HashMap<String, Arc<tokio::sync::Mutex<NativeHandle>>>>,
}

impl EngineProvider {
    pub fn new(
        runtime: Option<Arc<dyn RuntimeAdapter>>,
        catalog: EngineCatalog,
        events: EventBus,
    ) -> Self {
        Self {
            runtime,
            catalog,
            events,
            containers: RwLock::new(HashMap::new()),
            native: RwLock::new(HashMap::new()),
        }
    }

    fn publish(&self, event_type: &str, domain: &str, correlation_id: &str, payload: serde_json::Value) {
        self.events
            .publish_nowait(Event::new(event_type, domain, payload, correlation_id));
    }

    /// Resolve an image or native binary for `engine_type`. Never fails: on
    /// every kind of failure it still returns a best-effort candidate and lets
    /// Start decide whether it actually works.
    pub async fn install(&self, engine_type: &str, correlation_id: &str) -> String {
        let asset = self.catalog.asset(engine_type);
        let candidates = asset
            .map(|a| a.image_candidates(engine_type))
            .unwrap_or_default();

        if let Some(runtime) = &self.runtime {
            let ctx = CancellationToken::new();
            for candidate in &candidates {
                if runtime.list_by_labels(ctx.clone(), &HashMap::new()).await.is_ok() {
                    // Runtime reachable; attempt to pull the first candidate only.
                    break;
                }
            }
            if let Some(first) = candidates.first() {
                let pull_ctx = CancellationToken::new();
                let pull = tokio::time::timeout(
                    PULL_TIMEOUT,
                    runtime.pull_image(pull_ctx, first),
                )
                .await;
                match pull {
                    Ok(Ok(())) => {
                        self.publish("pulling", "engine", correlation_id, json!({"image": first, "progress": 100}));
                        return first.clone();
                    }
                    _ => {
                        warn!(engine_type, "image pull failed or timed out, falling back");
                    }
                }
            }
        }

        // Native-binary probe.
        if which(engine_type).is_some() {
            return engine_type.to_string();
        }

        candidates
            .into_iter()
            .next()
            .unwrap_or_else(|| engine_type.to_string())
    }

    /// Run the full Start algorithm for one engine type.
    pub async fn start(
        &self,
        ctx: CancellationToken,
        req: StartRequest,
        correlation_id: &str,
    ) -> EngineResult<StartOutcome> {
        let startup = self.catalog.startup_config(&req.engine_type);
        let resources = self
            .catalog
            .resource_limits(&req.engine_type)
            .with_env_overrides(&req.env_prefix, &req.engine_type);

        let asset = self.catalog.asset(&req.engine_type).cloned();
        let default_port = asset.as_ref().map(|a| a.default_port).unwrap_or(8000);
        let port = req.port.unwrap_or(default_port);

        validate_model_path(&req.model_path)?;

        let runtime = match &self.runtime {
            Some(r) => r.clone(),
            None => return self.native_start(&req, correlation_id).await,
        };

        let mut last_err: Option<EngineError> = None;

        for attempt in 0..startup.max_retries.max(1) {
            if attempt > 0 {
                sleep(Duration::from_secs(startup.retry_interval_secs)).await;
            }

            match self
                .start_attempt(
                    ctx.clone(),
                    runtime.as_ref(),
                    &req,
                    port,
                    &resources,
                    asset.as_ref(),
                    &startup,
                    correlation_id,
                )
                .await
            {
                Ok(outcome) => return Ok(outcome),
                Err(e) => {
                    let fatal = e.is_fatal();
                    self.publish(
                        "failed",
                        "engine",
                        correlation_id,
                        json!({"engine_type": req.engine_type, "error": e.to_string()}),
                    );
                    last_err = Some(e);
                    if fatal {
                        break;
                    }
                }
            }
        }

        if matches!(&last_err, Some(e) if e.is_fatal()) {
            return Err(last_err.unwrap());
        }

        // Retries exhausted (or runtime never available for this attempt chain):
        // fall through to native start.
        self.native_start(&req, correlation_id)
            .await
            .map_err(|native_err| last_err.unwrap_or(native_err))
    }

    #[allow(clippy::too_many_arguments)]
    async fn start_attempt(
        &self,
        ctx: CancellationToken,
        runtime: &dyn RuntimeAdapter,
        req: &StartRequest,
        port: u16,
        resources: &super::asset::ResourceLimits,
        asset: Option<&super::asset::EngineAsset>,
        startup: &super::asset::StartupConfig,
        correlation_id: &str,
    ) -> EngineResult<StartOutcome> {
        // Phase 1: port-based reclamation.
        let mut reclaimed_any = false;
        let by_port = runtime.find_by_published_port(ctx.clone(), port).await?;
        for container in &by_port {
            if !container.managed {
                return Err(EngineError::PortOccupied(format!(
                    "container {} (id {}, image {}) is holding port {} and is not managed by this daemon; remove it with `docker rm -f {}`",
                    container.name, container.id, container.image, port, container.id
                )));
            }
            runtime
                .stop_and_remove(ctx.clone(), &container.id, 10)
                .await?;
            reclaimed_any = true;
        }

        // Phase 2: label-based reclamation (catches `created`-state containers).
        let (label_key, label_val) = runtime::engine_label(&req.engine_type);
        let mut labels = HashMap::new();
        labels.insert(label_key, label_val.clone());
        let by_label = runtime.list_by_labels(ctx.clone(), &labels).await?;
        for id in &by_label {
            runtime.stop_and_remove(ctx.clone(), id, 10).await?;
            reclaimed_any = true;
        }

        if reclaimed_any {
            sleep(PORT_RELEASE_WAIT).await;
        }

        self.publish(
            "pulling",
            "engine",
            correlation_id,
            json!({"engine_type": req.engine_type, "progress": 0}),
        );

        let mut env = HashMap::new();
        env.insert("PORT".to_string(), port.to_string());
        if let Some(util) = req.gpu_memory_utilization {
            env.insert("GPU_MEMORY_UTILIZATION".to_string(), util.to_string());
        }

        let mut command = asset.map(|a| a.command.clone()).unwrap_or_default();
        command.extend(asset.map(|a| a.args.clone()).unwrap_or_default());
        if !command.iter().any(|a| a == "--port") {
            command.push("--port".to_string());
            command.push(port.to_string());
        }

        let mount_target = mount_path_for_image(asset.map(|a| a.image.as_str()).unwrap_or(""));

        let mut container_labels = HashMap::new();
        container_labels.insert("managed".to_string(), "true".to_string());
        container_labels.insert("engine".to_string(), req.engine_type.clone());

        let options = ContainerOptions {
            port: Some(port),
            env,
            labels: container_labels,
            mounts: vec![crate::runtime::MountSpec {
                source: req.model_path.clone(),
                target: mount_target,
                read_only: true,
            }],
            gpu: req.gpu,
            memory_mb: resources.memory_mb(),
            cpu_cores: Some(resources.cpu),
            command: Some(command),
            working_dir: None,
            network: req.network.clone(),
        };

        let image = asset.map(|a| a.image.clone()).unwrap_or_else(|| req.engine_type.clone());
        let name = format!("inferno-{}-{}", req.engine_type, &req.model_id);

        self.publish(
            "starting",
            "engine",
            correlation_id,
            json!({"engine_type": req.engine_type, "progress": 70}),
        );

        let container_id = runtime
            .create_and_start(ctx.clone(), &name, &image, &options)
            .await?;

        self.containers
            .write()
            .insert(req.engine_type.clone(), container_id.clone());

        if req.async_start {
            return Ok(StartOutcome {
                endpoint: format!("http://localhost:{}", port),
                port,
                container_id: Some(container_id),
                native_pid: None,
            });
        }

        self.publish(
            "loading",
            "engine",
            correlation_id,
            json!({"engine_type": req.engine_type, "progress": 75}),
        );

        match self
            .wait_for_health(ctx.clone(), runtime, &container_id, port, startup)
            .await
        {
            HealthOutcome::Ready => {
                self.publish(
                    "ready",
                    "engine",
                    correlation_id,
                    json!({"engine_type": req.engine_type, "progress": 100}),
                );
                Ok(StartOutcome {
                    endpoint: format!("http://localhost:{}", port),
                    port,
                    container_id: Some(container_id),
                    native_pid: None,
                })
            }
            HealthOutcome::Cancelled => {
                let fresh = CancellationToken::new();
                let cleanup = tokio::time::timeout(
                    FRESH_CONTEXT_CAP,
                    runtime.stop_and_remove(fresh, &container_id, 10),
                )
                .await;
                if let Err(_) | Ok(Err(_)) = cleanup {
                    warn!("cleanup after cancellation failed for {}", container_id);
                }
                self.containers.write().remove(&req.engine_type);
                Err(EngineError::Cancelled(format!(
                    "start cancelled while waiting for {} to become healthy",
                    req.engine_type
                )))
            }
            HealthOutcome::StillRunningAfterTimeout => {
                // Large models can load past the nominal timeout; treat as success.
                self.publish(
                    "ready",
                    "engine",
                    correlation_id,
                    json!({"engine_type": req.engine_type, "progress": 100, "note": "health timeout but still running"}),
                );
                Ok(StartOutcome {
                    endpoint: format!("http://localhost:{}", port),
                    port,
                    container_id: Some(container_id),
                    native_pid: None,
                })
            }
            HealthOutcome::NotRunning(logs) => {
                debug!("last log lines for {}: {}", container_id, logs);
                let fresh = CancellationToken::new();
                let _ = runtime.stop_and_remove(fresh, &container_id, 10).await;
                self.containers.write().remove(&req.engine_type);
                sleep(PORT_RELEASE_WAIT).await;
                Err(EngineError::Internal(format!(
                    "container for {} exited before becoming healthy",
                    req.engine_type
                )))
            }
        }
    }

    async fn wait_for_health(
        &self,
        ctx: CancellationToken,
        runtime: &dyn RuntimeAdapter,
        container_id: &str,
        port: u16,
        startup: &super::asset::StartupConfig,
    ) -> HealthOutcome {
        let deadline = Instant::now() + Duration::from_secs(startup.startup_timeout_secs);
        let url = format!("http://localhost:{}{}", port, startup.health_path);
        let client = reqwest::Client::new();

        loop {
            if ctx.is_cancelled() {
                return HealthOutcome::Cancelled;
            }
            if Instant::now() >= deadline {
                break;
            }

            if let Ok(resp) = client.get(&url).send().await {
                if resp.status().is_success() {
                    return HealthOutcome::Ready;
                }
            }

            match runtime.status(ctx.clone(), container_id).await {
                Ok(status) if status != "running" => {
                    let logs = runtime
                        .logs(ctx.clone(), container_id, 10)
                        .await
                        .unwrap_or_default();
                    return HealthOutcome::NotRunning(logs);
                }
                Err(_) => {
                    let logs = runtime
                        .logs(ctx.clone(), container_id, 10)
                        .await
                        .unwrap_or_default();
                    return HealthOutcome::NotRunning(logs);
                }
                _ => {}
            }

            tokio::select! {
                _ = sleep(HEALTH_POLL_INTERVAL) => {}
                _ = ctx.cancelled() => return HealthOutcome::Cancelled,
            }
        }

        match runtime.status(ctx.clone(), container_id).await {
            Ok(status) if status == "running" => HealthOutcome::StillRunningAfterTimeout,
            _ => {
                let logs = runtime
                    .logs(ctx, container_id, 10)
                    .await
                    .unwrap_or_default();
                HealthOutcome::NotRunning(logs)
            }
        }
    }

    async fn native_start(&self, req: &StartRequest, correlation_id: &str) -> EngineResult<StartOutcome> {
        let binary = which(&req.engine_type).ok_or_else(|| {
            EngineError::Unavailable(format!("no container runtime and no `{}` binary in PATH", req.engine_type))
        })?;

        let port = req.port.unwrap_or(8000);
        let child = Command::new(&binary)
            .arg("--port")
            .arg(port.to_string())
            .arg("--model")
            .arg(&req.model_path)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Internal(format!("failed to spawn native engine: {}", e)))?;

        let pid = child.id();
        let engine_type = req.engine_type.clone();
        let handle = Arc::new(tokio::sync::Mutex::new(NativeHandle { child }));
        self.native.write().insert(engine_type.clone(), handle.clone());

        tokio::spawn(async move {
            let mut guard = handle.lock().await;
            let _ = guard.child.wait().await;
        });

        self.publish(
            "ready",
            "engine",
            correlation_id,
            json!({"engine_type": req.engine_type, "progress": 100, "native": true}),
        );

        Ok(StartOutcome {
            endpoint: format!("http://localhost:{}", port),
            port,
            container_id: None,
            native_pid: pid,
        })
    }

    /// Whether the resource tracked for `engine_type` (container or native
    /// process) is actually alive right now. Used to detect drift between a
    /// persisted `Running` record and reality.
    pub async fn is_running(&self, engine_type: &str) -> bool {
        if let Some(container_id) = self.containers.read().get(engine_type).cloned() {
            return match &self.runtime {
                Some(runtime) => {
                    let ctx = CancellationToken::new();
                    matches!(runtime.status(ctx, &container_id).await, Ok(status) if status == "running")
                }
                None => false,
            };
        }

        if let Some(handle) = self.native.read().get(engine_type).cloned() {
            let mut guard = handle.lock().await;
            return matches!(guard.child.try_wait(), Ok(None));
        }

        false
    }

    /// Stop the engine's tracked resource, falling back to orphan cleanup by
    /// label then by port. Always succeeds when nothing remains to stop.
    pub async fn stop(
        &self,
        engine_type: &str,
        timeout_secs: u64,
        fallback_port: Option<u16>,
    ) -> EngineResult<()> {
        if let Some(container_id) = self.containers.write().remove(engine_type) {
            if let Some(runtime) = &self.runtime {
                let ctx = CancellationToken::new();
                runtime
                    .stop_and_remove(ctx, &container_id, timeout_secs)
                    .await?;
            }
            return Ok(());
        }

        if let Some(handle) = self.native.write().remove(engine_type) {
            let mut guard = handle.lock().await;
            #[cfg(unix)]
            if let Some(pid) = guard.child.id() {
                unsafe {
                    libc_kill(pid as i32, 15);
                }
            }
            let _ = tokio::time::timeout(Duration::from_secs(timeout_secs), guard.child.wait()).await;
            let _ = guard.child.start_kill();
            return Ok(());
        }

        // Orphan cleanup: nothing tracked locally.
        if let Some(runtime) = &self.runtime {
            let ctx = CancellationToken::new();
            let (label_key, label_val) = runtime::engine_label(engine_type);
            let mut labels = HashMap::new();
            labels.insert(label_key, label_val);
            let by_label = runtime.list_by_labels(ctx.clone(), &labels).await?;
            if !by_label.is_empty() {
                for id in by_label {
                    let _ = runtime.stop_and_remove(ctx.clone(), &id, timeout_secs).await;
                }
                return Ok(());
            }

            let default_port = fallback_port
                .or_else(|| self.catalog.asset(engine_type).map(|a| a.default_port));
            if let Some(port) = default_port {
                let by_port = runtime.find_by_published_port(ctx.clone(), port).await?;
                for container in by_port {
                    if container.managed {
                        let _ = runtime
                            .stop_and_remove(ctx.clone(), &container.id, timeout_secs)
                            .await;
                    }
                }
            }
        }

        Ok(())
    }
}

enum HealthOutcome {
    Ready,
    Cancelled,
    StillRunningAfterTimeout,
    NotRunning(String),
}

#[cfg(unix)]
unsafe fn libc_kill(pid: i32, sig: i32) {
    extern "C" {
        fn kill(pid: i32, sig: i32) -> i32;
    }
    kill(pid, sig);
}

fn which(binary: &str) -> Option<String> {
    let path_var = std::env::var_os("PATH")?;
    for dir in std::env::split_paths(&path_var) {
        let candidate = dir.join(binary);
        if candidate.is_file() {
            return Some(candidate.display().to_string());
        }
    }
    None
}

/// Reject paths that could escape into shell interpretation once the
/// container command line is built.
fn validate_model_path(path: &str) -> EngineResult<()> {
    if !path.starts_with('/') {
        return Err(EngineError::InvalidInput(format!(
            "model path must be absolute: {}",
            path
        )));
    }
    if path.contains("..") {
        return Err(EngineError::InvalidInput(format!(
            "model path must not contain '..': {}",
            path
        )));
    }
    const FORBIDDEN: &[char] = &[';', '&', '|', '`', '$', '(', ')', '<', '>', '\\', '\'', '"', '\n', '\r'];
    if path.chars().any(|c| FORBIDDEN.contains(&c)) {
        return Err(EngineError::InvalidInput(format!(
            "model path contains forbidden characters: {}",
            path
        )));
    }
    Ok(())
}

fn mount_path_for_image(image: &str) -> String {
    if image.contains("whisper") {
        "/app/model".to_string()
    } else if image.contains("tts") {
        "/root/.local/share/tts".to_string()
    } else {
        "/models".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_relative_model_path() {
        assert!(validate_model_path("models/llama").is_err());
    }

    #[test]
    fn rejects_dotdot_traversal() {
        assert!(validate_model_path("/models/../etc/passwd").is_err());
    }

    #[test]
    fn rejects_shell_metacharacters() {
        assert!(validate_model_path("/models/llama; rm -rf /").is_err());
    }

    #[test]
    fn accepts_clean_absolute_path() {
        assert!(validate_model_path("/models/llama-3-8b").is_ok());
    }

    #[test]
    fn mount_path_depends_on_image_family() {
        assert_eq!(mount_path_for_image("onerahmet/openai-whisper-asr-webservice"), "/app/model");
        assert_eq!(mount_path_for_image("vllm/vllm-openai"), "/models");
    }
}

#[cfg(test)]
mod fake_adapter_tests {
    use super::*;
    use crate::runtime::{ContainerSummary, MountSpec, RuntimeError, RuntimeEvent, RuntimeEventFilter, RuntimeResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// In-process fake standing in for a container runtime, so Engine Provider
    /// logic (port reclamation, fatal shortcut, cancellation cleanup) can be
    /// exercised without a real container engine.
    struct FakeRuntimeAdapter {
        by_port: parking_lot::Mutex<Vec<ContainerSummary>>,
        stopped: parking_lot::Mutex<Vec<String>>,
        created: AtomicBool,
        next_id: parking_lot::Mutex<u32>,
        status: parking_lot::Mutex<String>,
        last_labels: parking_lot::Mutex<HashMap<String, String>>,
    }

    impl FakeRuntimeAdapter {
        fn new() -> Self {
            Self {
                by_port: parking_lot::Mutex::new(Vec::new()),
                stopped: parking_lot::Mutex::new(Vec::new()),
                created: AtomicBool::new(false),
                next_id: parking_lot::Mutex::new(0),
                status: parking_lot::Mutex::new("running".to_string()),
                last_labels: parking_lot::Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl RuntimeAdapter for FakeRuntimeAdapter {
        async fn pull_image(&self, _ctx: CancellationToken, _image_ref: &str) -> RuntimeResult<()> {
            Ok(())
        }

        async fn create_and_start(
            &self,
            _ctx: CancellationToken,
            _name: &str,
            _image: &str,
            options: &ContainerOptions,
        ) -> RuntimeResult<String> {
            self.created.store(true, Ordering::SeqCst);
            *self.last_labels.lock() = options.labels.clone();
            let mut id = self.next_id.lock();
            *id += 1;
            Ok(format!("fake-container-{}", id))
        }

        async fn stop_and_remove(&self, _ctx: CancellationToken, id: &str, _timeout_secs: u64) -> RuntimeResult<()> {
            self.stopped.lock().push(id.to_string());
            self.by_port.lock().retain(|c| c.id != id);
            Ok(())
        }

        async fn status(&self, _ctx: CancellationToken, _id: &str) -> RuntimeResult<String> {
            Ok(self.status.lock().clone())
        }

        async fn logs(&self, _ctx: CancellationToken, _id: &str, _tail: u32) -> RuntimeResult<String> {
            Ok(String::new())
        }

        async fn stream_logs(
            &self,
            _ctx: CancellationToken,
            _id: &str,
            _since: i64,
        ) -> RuntimeResult<tokio::sync::mpsc::Receiver<String>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }

        async fn list_by_labels(
            &self,
            _ctx: CancellationToken,
            _labels: &HashMap<String, String>,
        ) -> RuntimeResult<Vec<String>> {
            Ok(Vec::new())
        }

        async fn find_by_published_port(&self, _ctx: CancellationToken, port: u16) -> RuntimeResult<Vec<ContainerSummary>> {
            let _ = port;
            Ok(self.by_port.lock().clone())
        }

        async fn events(
            &self,
            _ctx: CancellationToken,
            _filter: RuntimeEventFilter,
        ) -> RuntimeResult<tokio::sync::mpsc::Receiver<RuntimeEvent>> {
            let (_tx, rx) = tokio::sync::mpsc::channel(1);
            Ok(rx)
        }
    }

    fn base_req() -> StartRequest {
        StartRequest {
            engine_type: "vllm".to_string(),
            model_id: "llama3".to_string(),
            model_path: "/models/llama3".to_string(),
            port: Some(8000),
            gpu: false,
            device: None,
            async_start: true,
            gpu_memory_utilization: None,
            env_prefix: "INFERNO".to_string(),
            network: None,
        }
    }

    #[tokio::test]
    async fn foreign_port_conflict_is_fatal_and_not_retried() {
        let fake = Arc::new(FakeRuntimeAdapter::new());
        fake.by_port.lock().push(ContainerSummary {
            id: "nginx-id".to_string(),
            name: "nginx".to_string(),
            image: "nginx:latest".to_string(),
            managed: false,
        });

        let provider = EngineProvider::new(
            Some(fake.clone() as Arc<dyn RuntimeAdapter>),
            EngineCatalog::default(),
            EventBus::new(),
        );

        let result = provider.start(CancellationToken::new(), base_req(), "corr-1").await;
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("nginx-id"));
        assert!(!fake.created.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn managed_port_conflict_is_reclaimed_then_start_succeeds() {
        let fake = Arc::new(FakeRuntimeAdapter::new());
        fake.by_port.lock().push(ContainerSummary {
            id: "ctr-a".to_string(),
            name: "old".to_string(),
            image: "vllm/vllm-openai:latest".to_string(),
            managed: true,
        });

        let provider = EngineProvider::new(
            Some(fake.clone() as Arc<dyn RuntimeAdapter>),
            EngineCatalog::default(),
            EventBus::new(),
        );

        let result = provider.start(CancellationToken::new(), base_req(), "corr-2").await;
        assert!(result.is_ok());
        assert!(fake.stopped.lock().contains(&"ctr-a".to_string()));
        assert!(fake.created.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancellation_during_health_wait_cleans_up_container() {
        let fake = Arc::new(FakeRuntimeAdapter::new());
        let provider = EngineProvider::new(
            Some(fake.clone() as Arc<dyn RuntimeAdapter>),
            EngineCatalog::default(),
            EventBus::new(),
        );

        let ctx = CancellationToken::new();
        ctx.cancel();

        let mut req = base_req();
        req.async_start = false;

        let result = provider.start(ctx, req, "corr-3").await;
        assert!(matches!(result, Err(EngineError::Cancelled(_))));
        assert!(!fake.stopped.lock().is_empty());
    }

    #[tokio::test]
    async fn is_running_true_while_tracked_container_reports_running() {
        let fake = Arc::new(FakeRuntimeAdapter::new());
        let provider = EngineProvider::new(
            Some(fake.clone() as Arc<dyn RuntimeAdapter>),
            EngineCatalog::default(),
            EventBus::new(),
        );

        provider.start(CancellationToken::new(), base_req(), "corr-4").await.unwrap();
        assert!(provider.is_running("vllm").await);
    }

    #[tokio::test]
    async fn is_running_false_once_tracked_container_stops() {
        let fake = Arc::new(FakeRuntimeAdapter::new());
        let provider = EngineProvider::new(
            Some(fake.clone() as Arc<dyn RuntimeAdapter>),
            EngineCatalog::default(),
            EventBus::new(),
        );

        provider.start(CancellationToken::new(), base_req(), "corr-5").await.unwrap();
        *fake.status.lock() = "exited".to_string();
        assert!(!provider.is_running("vllm").await);
    }

    #[tokio::test]
    async fn is_running_false_for_untracked_engine_type() {
        let provider = EngineProvider::new(None, EngineCatalog::default(), EventBus::new());
        assert!(!provider.is_running("vllm").await);
    }

    #[tokio::test]
    async fn container_labels_have_no_spurious_engine_type_value_key() {
        let fake = Arc::new(FakeRuntimeAdapter::new());
        let provider = EngineProvider::new(
            Some(fake.clone() as Arc<dyn RuntimeAdapter>),
            EngineCatalog::default(),
            EventBus::new(),
        );

        provider.start(CancellationToken::new(), base_req(), "corr-6").await.unwrap();

        let labels = fake.last_labels.lock().clone();
        assert_eq!(labels.get("engine"), Some(&"vllm".to_string()));
        assert_eq!(labels.get("managed"), Some(&"true".to_string()));
        assert!(!labels.contains_key("vllm"), "label map must not carry a spurious <engine_type>=<engine_type> entry");
        assert_eq!(labels.len(), 2);
    }
}
