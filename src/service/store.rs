//! SQLite-backed persistence for `ModelService` records.

use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;

use super::model::{ConfigMap, ModelService, ResourceClass, ServiceStatus};

#[derive(Debug, Error)]
pub enum ServiceStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("service not found: {0}")]
    NotFound(String),
}

pub type ServiceStoreResult<T> = Result<T, ServiceStoreError>;

/// Narrow persistence interface the Service Provider depends on, so it is not
/// coupled to the concrete SQLite connection.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn get(&self, id: &str) -> ServiceStoreResult<Option<ModelService>>;
    async fn get_by_name(&self, name: &str) -> ServiceStoreResult<Option<ModelService>>;
    async fn list(&self) -> ServiceStoreResult<Vec<ModelService>>;
    async fn save(&self, service: &ModelService) -> ServiceStoreResult<()>;
    async fn delete(&self, id: &str) -> ServiceStoreResult<()>;
    async fn max_port(&self) -> ServiceStoreResult<Option<u16>>;
}

pub struct SqliteServiceStore {
    conn: Mutex<Connection>,
}

impl SqliteServiceStore {
    pub fn open(path: &str) -> ServiceStoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> ServiceStoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> ServiceStoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS services (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                model_id TEXT NOT NULL,
                status TEXT NOT NULL,
                replicas INTEGER NOT NULL,
                replicas_ready INTEGER NOT NULL,
                resource_class TEXT NOT NULL,
                endpoints TEXT NOT NULL,
                config TEXT NOT NULL,
                metrics TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_services_name ON services(name);
            "#,
        )?;
        Ok(())
    }

    fn row_to_service(row: &rusqlite::Row) -> rusqlite::Result<ModelServiceRow> {
        Ok(ModelServiceRow {
            id: row.get(0)?,
            name: row.get(1)?,
            model_id: row.get(2)?,
            status: row.get(3)?,
            replicas: row.get(4)?,
            replicas_ready: row.get(5)?,
            resource_class: row.get(6)?,
            endpoints: row.get(7)?,
            config: row.get(8)?,
            metrics: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

struct ModelServiceRow {
    id: String,
    name: String,
    model_id: String,
    status: String,
    replicas: i64,
    replicas_ready: i64,
    resource_class: String,
    endpoints: String,
    config: String,
    metrics: Option<String>,
    created_at: i64,
    updated_at: i64,
}

impl ModelServiceRow {
    fn into_service(self) -> ServiceStoreResult<ModelService> {
        let endpoints: Vec<String> = serde_json::from_str(&self.endpoints)?;
        let config_map: std::collections::HashMap<String, serde_json::Value> =
            serde_json::from_str(&self.config)?;
        let metrics = match self.metrics {
            Some(m) => Some(serde_json::from_str(&m)?),
            None => None,
        };

        Ok(ModelService {
            id: self.id,
            name: self.name,
            model_id: self.model_id,
            status: ServiceStatus::parse(&self.status).unwrap_or(ServiceStatus::Failed),
            replicas: self.replicas as u32,
            replicas_ready: self.replicas_ready as u32,
            resource_class: match self.resource_class.as_str() {
                "medium" => ResourceClass::Medium,
                "large" => ResourceClass::Large,
                _ => ResourceClass::Small,
            },
            endpoints,
            config: ConfigMap(config_map),
            metrics,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

#[async_trait]
impl ServiceStore for SqliteServiceStore {
    async fn get(&self, id: &str) -> ServiceStoreResult<Option<ModelService>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, name, model_id, status, replicas, replicas_ready, resource_class,
                        endpoints, config, metrics, created_at, updated_at
                 FROM services WHERE id = ?1",
                [id],
                Self::row_to_service,
            )
            .optional()?;
        match row {
            Some(r) => Ok(Some(r.into_service()?)),
            None => Ok(None),
        }
    }

    async fn get_by_name(&self, name: &str) -> ServiceStoreResult<Option<ModelService>> {
        let conn = self.conn.lock().await;
        let row = conn
            .query_row(
                "SELECT id, name, model_id, status, replicas, replicas_ready, resource_class,
                        endpoints, config, metrics, created_at, updated_at
                 FROM services WHERE name = ?1",
                [name],
                Self::row_to_service,
            )
            .optional()?;
        match row {
            Some(r) => Ok(Some(r.into_service()?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> ServiceStoreResult<Vec<ModelService>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare(
            "SELECT id, name, model_id, status, replicas, replicas_ready, resource_class,
                    endpoints, config, metrics, created_at, updated_at
             FROM services ORDER BY created_at ASC",
        )?;
        let rows = stmt
            .query_map([], Self::row_to_service)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        rows.into_iter().map(|r| r.into_service()).collect()
    }

    async fn save(&self, service: &ModelService) -> ServiceStoreResult<()> {
        let conn = self.conn.lock().await;
        let endpoints = serde_json::to_string(&service.endpoints)?;
        let config = serde_json::to_string(&service.config.0)?;
        let metrics = service
            .metrics
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let resource_class = match service.resource_class {
            ResourceClass::Small => "small",
            ResourceClass::Medium => "medium",
            ResourceClass::Large => "large",
        };

        conn.execute(
            r#"
            INSERT INTO services
                (id, name, model_id, status, replicas, replicas_ready, resource_class,
                 endpoints, config, metrics, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                model_id = excluded.model_id,
                status = excluded.status,
                replicas = excluded.replicas,
                replicas_ready = excluded.replicas_ready,
                resource_class = excluded.resource_class,
                endpoints = excluded.endpoints,
                config = excluded.config,
                metrics = excluded.metrics,
                updated_at = excluded.updated_at
            "#,
            params![
                service.id,
                service.name,
                service.model_id,
                service.status.as_str(),
                service.replicas as i64,
                service.replicas_ready as i64,
                resource_class,
                endpoints,
                config,
                metrics,
                service.created_at,
                service.updated_at,
            ],
        )?;
        Ok(())
    }

    async fn delete(&self, id: &str) -> ServiceStoreResult<()> {
        let conn = self.conn.lock().await;
        conn.execute("DELETE FROM services WHERE id = ?1", [id])?;
        Ok(())
    }

    async fn max_port(&self) -> ServiceStoreResult<Option<u16>> {
        let conn = self.conn.lock().await;
        let mut stmt = conn.prepare("SELECT config FROM services")?;
        let configs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let mut max: Option<u16> = None;
        for raw in configs {
            let map: std::collections::HashMap<String, serde_json::Value> =
                serde_json::from_str(&raw)?;
            if let Some(port) = map.get("port").and_then(|v| {
                v.as_u64()
                    .or_else(|| v.as_f64().map(|f| f as u64))
            }) {
                let port = port as u16;
                max = Some(max.map_or(port, |m| m.max(port)));
            }
        }
        Ok(max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn service(id: &str, port: u16) -> ModelService {
        let mut s = ModelService::new(id, format!("name-{}", id), "model-x", 1000);
        s.config.set("port", json!(port));
        s
    }

    #[tokio::test]
    async fn save_and_get_round_trips() {
        let store = SqliteServiceStore::open_in_memory().unwrap();
        let svc = service("svc-vllm-a", 8001);
        store.save(&svc).await.unwrap();

        let loaded = store.get("svc-vllm-a").await.unwrap().unwrap();
        assert_eq!(loaded.name, svc.name);
        assert_eq!(loaded.port(), Some(8001));
    }

    #[tokio::test]
    async fn save_is_upsert() {
        let store = SqliteServiceStore::open_in_memory().unwrap();
        let mut svc = service("svc-vllm-a", 8001);
        store.save(&svc).await.unwrap();

        svc.status = ServiceStatus::Running;
        store.save(&svc).await.unwrap();

        let loaded = store.get("svc-vllm-a").await.unwrap().unwrap();
        assert_eq!(loaded.status, ServiceStatus::Running);
    }

    #[tokio::test]
    async fn max_port_reflects_persisted_services() {
        let store = SqliteServiceStore::open_in_memory().unwrap();
        store.save(&service("svc-a-a", 8005)).await.unwrap();
        store.save(&service("svc-b-b", 8012)).await.unwrap();
        assert_eq!(store.max_port().await.unwrap(), Some(8012));
    }

    #[tokio::test]
    async fn max_port_is_none_when_store_empty() {
        let store = SqliteServiceStore::open_in_memory().unwrap();
        assert_eq!(store.max_port().await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_removes_service() {
        let store = SqliteServiceStore::open_in_memory().unwrap();
        store.save(&service("svc-a-a", 8005)).await.unwrap();
        store.delete("svc-a-a").await.unwrap();
        assert!(store.get("svc-a-a").await.unwrap().is_none());
    }
}
