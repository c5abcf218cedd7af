//! Service Provider: translates service commands over the Engine Provider and
//! owns monotone port allocation recovered from the persisted store.

use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::engine::{EngineProvider, StartRequest};
use crate::serviceid::ServiceId;

use super::error::{ServiceError, ServiceResult};
use super::model::{ModelService, ServiceStatus};
use super::store::ServiceStore;

const DEFAULT_PORT_BASE: u16 = 8000;

/// Parameters accepted by `create`.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub engine_type: String,
    pub model_id: String,
    pub name: String,
    pub gpu: bool,
    pub model_path: String,
}

/// Owns the port counter and wraps the Engine Provider with store-backed
/// bookkeeping. Port allocation and service creation are serialized under a
/// single mutex for the whole operation so concurrent creates cannot collide
/// on the same port.
pub struct ServiceProvider {
    store: Arc<dyn ServiceStore>,
    engine: Arc<EngineProvider>,
    next_port: AsyncMutex<u16>,
    env_prefix: String,
}

impl ServiceProvider {
    pub async fn new(
        store: Arc<dyn ServiceStore>,
        engine: Arc<EngineProvider>,
        env_prefix: impl Into<String>,
    ) -> ServiceResult<Self> {
        let max_port = store.max_port().await?;
        let next_port = max_port.map(|p| p.saturating_add(1)).unwrap_or(DEFAULT_PORT_BASE);

        Ok(Self {
            store,
            engine,
            next_port: AsyncMutex::new(next_port),
            env_prefix: env_prefix.into(),
        })
    }

    /// Allocate a service record and a port under a single mutex for the
    /// whole operation, so a second concurrent create cannot observe the
    /// same counter value.
    pub async fn create(&self, req: CreateRequest, now: i64) -> ServiceResult<ModelService> {
        let id = ServiceId::new(&req.engine_type, &req.model_id).format();

        let mut port_guard = self.next_port.lock().await;

        if self.store.get(&id).await?.is_some() {
            return Err(ServiceError::Conflict(format!("service {} already exists", id)));
        }

        let port = *port_guard;
        *port_guard += 1;

        let mut service = ModelService::new(id, req.name, req.model_id, now);
        service.config.set("engine_type", serde_json::json!(req.engine_type));
        service.config.set("port", serde_json::json!(port));
        service.config.set("model_path", serde_json::json!(req.model_path));
        service.config.set("gpu", serde_json::json!(req.gpu));

        self.store.save(&service).await?;
        drop(port_guard);

        info!(service = %service.id, port, "service created");
        Ok(service)
    }

    pub async fn get(&self, id: &str) -> ServiceResult<ModelService> {
        self.store
            .get(id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> ServiceResult<Vec<ModelService>> {
        Ok(self.store.list().await?)
    }

    pub async fn delete(&self, id: &str) -> ServiceResult<()> {
        Ok(self.store.delete(id).await?)
    }

    /// Start the service: verify a Running record actually has a live
    /// container, heal drift to Stopped if not, then drive the Engine
    /// Provider using the persisted port.
    pub async fn start(
        &self,
        ctx: CancellationToken,
        id: &str,
        correlation_id: &str,
        now: i64,
    ) -> ServiceResult<ModelService> {
        let mut service = self.get(id).await?;

        if service.status == ServiceStatus::Running && !self.is_running(&service).await {
            service.status = ServiceStatus::Stopped;
            service.updated_at = now;
            self.store.save(&service).await?;
        }

        let engine_type = service
            .config
            .get_string("engine_type")
            .ok_or_else(|| ServiceError::InvalidInput("service missing engine_type".to_string()))?;
        let model_path = service
            .config
            .get_string("model_path")
            .ok_or_else(|| ServiceError::InvalidInput("service missing model_path".to_string()))?;
        let port = service.port();
        let gpu = service.config.get_bool("gpu").unwrap_or(false);

        let req = StartRequest {
            engine_type,
            model_id: service.model_id.clone(),
            model_path,
            port,
            gpu,
            device: None,
            async_start: false,
            gpu_memory_utilization: None,
            env_prefix: self.env_prefix.clone(),
            network: None,
        };

        match self.engine.start(ctx, req, correlation_id).await {
            Ok(outcome) => {
                service.status = ServiceStatus::Running;
                service.replicas_ready = service.replicas.max(1);
                service.endpoints = vec![outcome.endpoint];
                service.config.set("port", serde_json::json!(outcome.port));
                service.updated_at = now;
                self.store.save(&service).await?;
                Ok(service)
            }
            Err(e) => {
                service.status = ServiceStatus::Failed;
                service.updated_at = now;
                let _ = self.store.save(&service).await;
                Err(ServiceError::Engine(e))
            }
        }
    }

    /// Stop is tolerant of provider errors on Creating/Failed services so
    /// orphaned resources are always recoverable, and always persists Stopped.
    pub async fn stop(&self, id: &str, timeout_secs: u64, now: i64) -> ServiceResult<ModelService> {
        let mut service = self.get(id).await?;

        let engine_type = service.config.get_string("engine_type");
        let fallback_port = service.port();

        if let Some(engine_type) = engine_type {
            let _ = self.engine.stop(&engine_type, timeout_secs, fallback_port).await;
        }

        service.status = ServiceStatus::Stopped;
        service.endpoints.clear();
        service.updated_at = now;
        self.store.save(&service).await?;
        Ok(service)
    }

    /// Update the desired replica count for a service and persist it.
    /// `replicas_ready` is left as-is; reconciling it to the new target is
    /// the Engine Provider's job once multi-replica scheduling exists.
    pub async fn scale(&self, id: &str, replicas: u32, now: i64) -> ServiceResult<ModelService> {
        let mut service = self.get(id).await?;
        service.replicas = replicas;
        service.updated_at = now;
        self.store.save(&service).await?;
        Ok(service)
    }

    async fn is_running(&self, service: &ModelService) -> bool {
        match service.config.get_string("engine_type") {
            Some(engine_type) => self.engine.is_running(&engine_type).await,
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineCatalog;
    use crate::events::EventBus;

    fn make_provider_sync() -> (Arc<dyn ServiceStore>, Arc<EngineProvider>) {
        let store: Arc<dyn ServiceStore> =
            Arc::new(super::super::store::SqliteServiceStore::open_in_memory().unwrap());
        let engine = Arc::new(EngineProvider::new(None, EngineCatalog::default(), EventBus::new()));
        (store, engine)
    }

    #[tokio::test]
    async fn port_counter_recovers_from_persisted_max() {
        let store: Arc<dyn ServiceStore> =
            Arc::new(super::super::store::SqliteServiceStore::open_in_memory().unwrap());
        let mut existing = ModelService::new("svc-vllm-old", "old", "old", 1);
        existing.config.set("port", serde_json::json!(8050));
        store.save(&existing).await.unwrap();

        let engine = Arc::new(EngineProvider::new(None, EngineCatalog::default(), EventBus::new()));
        let provider = ServiceProvider::new(store, engine, "INFERNO").await.unwrap();

        let created = provider
            .create(
                CreateRequest {
                    engine_type: "vllm".to_string(),
                    model_id: "new-model".to_string(),
                    name: "new".to_string(),
                    gpu: false,
                    model_path: "/models/new".to_string(),
                },
                2,
            )
            .await
            .unwrap();

        assert_eq!(created.port(), Some(8051));
    }

    #[tokio::test]
    async fn port_counter_defaults_to_8000_when_store_empty() {
        let (store, engine) = make_provider_sync();
        let provider = ServiceProvider::new(store, engine, "INFERNO").await.unwrap();

        let created = provider
            .create(
                CreateRequest {
                    engine_type: "vllm".to_string(),
                    model_id: "m".to_string(),
                    name: "n".to_string(),
                    gpu: false,
                    model_path: "/models/m".to_string(),
                },
                1,
            )
            .await
            .unwrap();

        assert_eq!(created.port(), Some(8000));
    }

    #[tokio::test]
    async fn duplicate_create_is_rejected() {
        let (store, engine) = make_provider_sync();
        let provider = ServiceProvider::new(store, engine, "INFERNO").await.unwrap();

        let req = CreateRequest {
            engine_type: "vllm".to_string(),
            model_id: "m".to_string(),
            name: "n".to_string(),
            gpu: false,
            model_path: "/models/m".to_string(),
        };

        provider.create(req.clone(), 1).await.unwrap();
        let result = provider.create(req, 2).await;
        assert!(matches!(result, Err(ServiceError::Conflict(_))));
    }

    #[tokio::test]
    async fn stop_always_persists_stopped_even_without_engine_type() {
        let (store, engine) = make_provider_sync();
        let provider = ServiceProvider::new(store.clone(), engine, "INFERNO").await.unwrap();

        let svc = ModelService::new("svc-vllm-x", "x", "x", 1);
        store.save(&svc).await.unwrap();

        let stopped = provider.stop("svc-vllm-x", 5, 2).await.unwrap();
        assert_eq!(stopped.status, ServiceStatus::Stopped);
    }
}
