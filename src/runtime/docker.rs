//! Container-runtime-backed implementation of `RuntimeAdapter`.

use std::collections::HashMap;

use async_trait::async_trait;
use bollard::container::{
    Config, CreateContainerOptions, ListContainersOptions, LogsOptions, RemoveContainerOptions,
    StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum, PortBinding};
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::traits::{
    ContainerOptions, ContainerSummary, RuntimeAdapter, RuntimeError, RuntimeEvent,
    RuntimeEventFilter, RuntimeResult,
};

/// Labels used to recognize containers this daemon owns.
const LABEL_MANAGED: &str = "managed";
const LABEL_ENGINE: &str = "engine";

pub struct DockerRuntimeAdapter {
    client: Docker,
}

impl DockerRuntimeAdapter {
    pub fn connect(socket: &str) -> RuntimeResult<Self> {
        let client = if socket.is_empty() {
            Docker::connect_with_local_defaults()
        } else {
            Docker::connect_with_socket(socket, 120, bollard::API_DEFAULT_VERSION)
        }
        .map_err(|e| RuntimeError::Transport(e.to_string()))?;

        Ok(Self { client })
    }

    fn dropped_capabilities() -> Vec<String> {
        vec![
            "SETPCAP", "MKNOD", "AUDIT_WRITE", "NET_RAW", "DAC_OVERRIDE", "FOWNER", "FSETID",
            "NET_BIND_SERVICE", "SYS_CHROOT", "SETFCAP", "AUDIT_CONTROL", "AUDIT_READ",
            "BLOCK_SUSPEND", "DAC_READ_SEARCH", "IPC_LOCK", "IPC_OWNER", "LEASE",
            "LINUX_IMMUTABLE", "MAC_ADMIN", "MAC_OVERRIDE", "NET_ADMIN", "NET_BROADCAST",
            "SYSLOG", "SYS_ADMIN", "SYS_BOOT", "SYS_MODULE", "SYS_NICE", "SYS_PACCT",
            "SYS_PTRACE", "SYS_RAWIO", "SYS_RESOURCE", "SYS_TIME", "SYS_TTY_CONFIG",
            "WAKE_ALARM",
        ]
        .into_iter()
        .map(String::from)
        .collect()
    }

    async fn inner_create_and_start(
        &self,
        name: &str,
        image: &str,
        options: &ContainerOptions,
    ) -> RuntimeResult<String> {
        self.ensure_image_exists(image).await?;

        let env_vars: Vec<String> = options
            .env
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();

        let mut exposed_ports = HashMap::new();
        let mut port_bindings: HashMap<String, Option<Vec<PortBinding>>> = HashMap::new();
        if let Some(port) = options.port {
            let tcp_key = format!("{}/tcp", port);
            exposed_ports.insert(tcp_key.clone(), HashMap::new());
            port_bindings.insert(
                tcp_key,
                Some(vec![PortBinding {
                    host_ip: Some("0.0.0.0".to_string()),
                    host_port: Some(port.to_string()),
                }]),
            );
        }

        let mounts: Vec<Mount> = options
            .mounts
            .iter()
            .map(|m| Mount {
                source: Some(m.source.clone()),
                target: Some(m.target.clone()),
                typ: Some(MountTypeEnum::BIND),
                read_only: Some(m.read_only),
                ..Default::default()
            })
            .collect();

        let mut labels = options.labels.clone();
        labels.insert(LABEL_MANAGED.to_string(), "true".to_string());

        let device_requests = if options.gpu {
            Some(vec![bollard::models::DeviceRequest {
                driver: Some("nvidia".to_string()),
                count: Some(-1),
                capabilities: Some(vec![vec!["gpu".to_string()]]),
                ..Default::default()
            }])
        } else {
            None
        };

        let host_config = HostConfig {
            port_bindings: Some(port_bindings),
            mounts: Some(mounts),
            memory: options.memory_mb.map(|m| (m as i64) * 1024 * 1024),
            nano_cpus: options.cpu_cores.map(|c| (c * 1_000_000_000.0) as i64),
            device_requests,
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            cap_drop: Some(Self::dropped_capabilities()),
            network_mode: options.network.clone(),
            log_config: Some(bollard::models::HostConfigLogConfig {
                typ: Some("local".to_string()),
                config: Some({
                    let mut cfg = HashMap::new();
                    cfg.insert("max-size".to_string(), "5m".to_string());
                    cfg.insert("max-file".to_string(), "1".to_string());
                    cfg
                }),
            }),
            ..Default::default()
        };

        let container_config = Config {
            env: Some(env_vars),
            image: Some(image.to_string()),
            cmd: options.command.clone(),
            exposed_ports: Some(exposed_ports),
            labels: Some(labels),
            working_dir: options.working_dir.clone(),
            host_config: Some(host_config),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name,
            platform: None,
        };

        let created = self
            .client
            .create_container(Some(create_options), container_config)
            .await?;

        if let Err(e) = self.client.start_container::<String>(&created.id, None).await {
            // Adapter contract: remove the partially-created container on start
            // failure so the port is freed for the next attempt.
            warn!("start failed for {}, removing partial container: {}", name, e);
            let _ = self
                .client
                .remove_container(
                    &created.id,
                    Some(RemoveContainerOptions {
                        force: true,
                        ..Default::default()
                    }),
                )
                .await;
            return Err(e.into());
        }

        info!("created and started container {} ({})", name, created.id);
        Ok(created.id)
    }

    async fn ensure_image_exists(&self, image: &str) -> RuntimeResult<()> {
        match self.client.inspect_image(image).await {
            Ok(_) => return Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                debug!("image {} not present locally, pulling", image);
            }
            Err(e) => {
                warn!("error inspecting image {}: {}", image, e);
            }
        }
        self.pull(image).await
    }

    async fn pull(&self, image: &str) -> RuntimeResult<()> {
        let options = CreateImageOptions {
            from_image: image,
            ..Default::default()
        };

        let mut stream = self.client.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            result.map_err(|e| RuntimeError::Transport(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl RuntimeAdapter for DockerRuntimeAdapter {
    async fn pull_image(&self, ctx: CancellationToken, image_ref: &str) -> RuntimeResult<()> {
        tokio::select! {
            result = self.pull(image_ref) => result,
            _ = ctx.cancelled() => Err(RuntimeError::Transport("pull cancelled".into())),
        }
    }

    async fn create_and_start(
        &self,
        ctx: CancellationToken,
        name: &str,
        image: &str,
        options: &ContainerOptions,
    ) -> RuntimeResult<String> {
        tokio::select! {
            result = self.inner_create_and_start(name, image, options) => result,
            _ = ctx.cancelled() => Err(RuntimeError::Transport("create_and_start cancelled".into())),
        }
    }

    async fn stop_and_remove(
        &self,
        _ctx: CancellationToken,
        id: &str,
        timeout_secs: u64,
    ) -> RuntimeResult<()> {
        match self
            .client
            .stop_container(
                id,
                Some(StopContainerOptions {
                    t: timeout_secs as i64,
                }),
            )
            .await
        {
            Ok(_) | Err(bollard::errors::Error::DockerResponseServerError { status_code: 304, .. }) => {}
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => {
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        match self
            .client
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(bollard::errors::Error::DockerResponseServerError { status_code: 404, .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn status(&self, _ctx: CancellationToken, id: &str) -> RuntimeResult<String> {
        let info = self.client.inspect_container(id, None).await?;
        Ok(info
            .state
            .and_then(|s| s.status)
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".to_string()))
    }

    async fn logs(&self, _ctx: CancellationToken, id: &str, tail: u32) -> RuntimeResult<String> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            tail: tail.to_string(),
            ..Default::default()
        };

        let mut stream = self.client.logs(id, Some(options));
        let mut out = String::new();
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(output) => out.push_str(&output.to_string()),
                Err(e) => return Err(e.into()),
            }
        }
        Ok(out)
    }

    async fn stream_logs(
        &self,
        ctx: CancellationToken,
        id: &str,
        since: i64,
    ) -> RuntimeResult<mpsc::Receiver<String>> {
        let options = LogsOptions::<String> {
            stdout: true,
            stderr: true,
            follow: true,
            since: since as i32,
            ..Default::default()
        };

        let mut stream = self.client.logs(id, Some(options));
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    chunk = stream.next() => {
                        match chunk {
                            Some(Ok(output)) => {
                                if tx.send(output.to_string()).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("log stream error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(rx)
    }

    async fn list_by_labels(
        &self,
        _ctx: CancellationToken,
        labels: &HashMap<String, String>,
    ) -> RuntimeResult<Vec<String>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        let label_filters: Vec<String> = labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        filters.insert("label".to_string(), label_filters);

        let options = ListContainersOptions {
            all: true,
            filters,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        Ok(containers.into_iter().filter_map(|c| c.id).collect())
    }

    async fn find_by_published_port(
        &self,
        _ctx: CancellationToken,
        port: u16,
    ) -> RuntimeResult<Vec<ContainerSummary>> {
        let options = ListContainersOptions::<String> {
            all: true,
            ..Default::default()
        };

        let containers = self.client.list_containers(Some(options)).await?;
        let mut matches = Vec::new();

        for c in containers {
            let publishes_port = c
                .ports
                .as_ref()
                .map(|ports| ports.iter().any(|p| p.public_port == Some(port)))
                .unwrap_or(false);

            if !publishes_port {
                continue;
            }

            let labels = c.labels.clone().unwrap_or_default();
            let managed = labels
                .get(LABEL_MANAGED)
                .map(|v| v == "true")
                .unwrap_or(false);

            matches.push(ContainerSummary {
                id: c.id.clone().unwrap_or_default(),
                name: c
                    .names
                    .and_then(|names| names.into_iter().next())
                    .unwrap_or_default()
                    .trim_start_matches('/')
                    .to_string(),
                image: c.image.unwrap_or_default(),
                managed,
            });
        }

        Ok(matches)
    }

    async fn events(
        &self,
        ctx: CancellationToken,
        filter: RuntimeEventFilter,
    ) -> RuntimeResult<mpsc::Receiver<RuntimeEvent>> {
        let mut filters: HashMap<String, Vec<String>> = HashMap::new();
        if !filter.labels.is_empty() {
            filters.insert(
                "label".to_string(),
                filter
                    .labels
                    .iter()
                    .map(|(k, v)| format!("{}={}", k, v))
                    .collect(),
            );
        }

        let options = EventsOptions::<String> {
            filters,
            ..Default::default()
        };

        let mut stream = self.client.events(Some(options));
        let (tx, rx) = mpsc::channel(256);

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ctx.cancelled() => break,
                    ev = stream.next() => {
                        match ev {
                            Some(Ok(msg)) => {
                                let container_id = msg
                                    .actor
                                    .and_then(|a| a.id)
                                    .unwrap_or_default();
                                let action = msg.action.unwrap_or_default();
                                if tx.send(RuntimeEvent { container_id, action }).await.is_err() {
                                    break;
                                }
                            }
                            Some(Err(e)) => {
                                warn!("runtime event stream error: {}", e);
                                break;
                            }
                            None => break,
                        }
                    }
                }
            }
        });

        Ok(rx)
    }
}

/// Per-engine label used to scope reclamation to one engine type.
pub fn engine_label(engine_type: &str) -> (String, String) {
    (LABEL_ENGINE.to_string(), engine_type.to_string())
}
