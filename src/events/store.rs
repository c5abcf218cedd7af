//! SQLite-backed event store used by the persistent event bus.

use rusqlite::{params, Connection, OptionalExtension};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::info;
use uuid::Uuid;

use super::types::Event;

#[derive(Debug, Error)]
pub enum EventStoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type EventStoreResult<T> = Result<T, EventStoreError>;

/// Query used by `SqliteEventStore::query` and `replay`.
#[derive(Debug, Clone, Default)]
pub struct EventQuery {
    pub domain: Option<String>,
    pub type_: Option<String>,
    pub correlation_id: Option<String>,
    pub since_ms: Option<i64>,
    pub until_ms: Option<i64>,
    pub limit: Option<u32>,
}

/// Durable append-only log of events, queryable by domain, type, correlation id
/// and time window.
pub struct SqliteEventStore {
    conn: Mutex<Connection>,
}

impl SqliteEventStore {
    pub fn open(path: &str) -> EventStoreResult<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::init(&conn)?;
        info!("event store opened at {}", path);
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open_in_memory() -> EventStoreResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn init(conn: &Connection) -> EventStoreResult<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS events (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                domain TEXT NOT NULL,
                correlation_id TEXT NOT NULL,
                payload BLOB NOT NULL,
                timestamp INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_events_domain ON events(domain);
            CREATE INDEX IF NOT EXISTS idx_events_type ON events(type);
            CREATE INDEX IF NOT EXISTS idx_events_correlation ON events(correlation_id);
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            "#,
        )?;
        Ok(())
    }

    /// Append a batch of events in a single transaction.
    pub async fn append_batch(&self, events: &[Event]) -> EventStoreResult<()> {
        if events.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.lock().await;
        let tx = conn.transaction()?;
        for event in events {
            let payload = serde_json::to_vec(&event.payload)?;
            tx.execute(
                "INSERT OR REPLACE INTO events (id, type, domain, correlation_id, payload, timestamp)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    event.id.to_string(),
                    event.type_,
                    event.domain,
                    event.correlation_id,
                    payload,
                    event.timestamp,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub async fn append(&self, event: &Event) -> EventStoreResult<()> {
        self.append_batch(std::slice::from_ref(event)).await
    }

    /// Query stored events, newest first, matching every supplied filter.
    pub async fn query(&self, q: &EventQuery) -> EventStoreResult<Vec<Event>> {
        let conn = self.conn.lock().await;

        let mut sql = String::from(
            "SELECT id, type, domain, correlation_id, payload, timestamp FROM events WHERE 1=1",
        );
        if q.domain.is_some() {
            sql.push_str(" AND domain = ?");
        }
        if q.type_.is_some() {
            sql.push_str(" AND type = ?");
        }
        if q.correlation_id.is_some() {
            sql.push_str(" AND correlation_id = ?");
        }
        if q.since_ms.is_some() {
            sql.push_str(" AND timestamp >= ?");
        }
        if q.until_ms.is_some() {
            sql.push_str(" AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp DESC");
        if q.limit.is_some() {
            sql.push_str(" LIMIT ?");
        }

        let mut stmt = conn.prepare(&sql)?;

        let mut idx = 1;
        if let Some(ref v) = q.domain {
            stmt.raw_bind_parameter(idx, v)?;
            idx += 1;
        }
        if let Some(ref v) = q.type_ {
            stmt.raw_bind_parameter(idx, v)?;
            idx += 1;
        }
        if let Some(ref v) = q.correlation_id {
            stmt.raw_bind_parameter(idx, v)?;
            idx += 1;
        }
        if let Some(v) = q.since_ms {
            stmt.raw_bind_parameter(idx, v)?;
            idx += 1;
        }
        if let Some(v) = q.until_ms {
            stmt.raw_bind_parameter(idx, v)?;
            idx += 1;
        }
        if let Some(v) = q.limit {
            stmt.raw_bind_parameter(idx, v)?;
        }

        let mut rows = stmt.raw_query();
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let type_: String = row.get(1)?;
            let domain: String = row.get(2)?;
            let correlation_id: String = row.get(3)?;
            let payload: Vec<u8> = row.get(4)?;
            let timestamp: i64 = row.get(5)?;
            out.push(Event {
                id: Uuid::parse_str(&id).unwrap_or_else(|_| Uuid::nil()),
                type_,
                domain,
                payload: serde_json::from_slice(&payload)?,
                timestamp,
                correlation_id,
            });
        }
        Ok(out)
    }

    /// Fetch all events sharing `correlation_id`, ordered oldest first for replay.
    pub async fn replay(&self, correlation_id: &str) -> EventStoreResult<Vec<Event>> {
        let mut events = self
            .query(&EventQuery {
                correlation_id: Some(correlation_id.to_string()),
                ..Default::default()
            })
            .await?;
        events.reverse();
        Ok(events)
    }

    pub async fn count(&self) -> EventStoreResult<i64> {
        let conn = self.conn.lock().await;
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .optional()?
            .unwrap_or(0);
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event(type_: &str, domain: &str, corr: &str, ts: i64) -> Event {
        let mut e = Event::new(type_, domain, json!({"k": "v"}), corr);
        e.timestamp = ts;
        e
    }

    #[tokio::test]
    async fn append_and_query_by_domain() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append(&event("started", "service", "c1", 1)).await.unwrap();
        store.append(&event("started", "engine", "c2", 2)).await.unwrap();

        let results = store
            .query(&EventQuery {
                domain: Some("service".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].domain, "service");
    }

    #[tokio::test]
    async fn replay_returns_oldest_first() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        store.append(&event("started", "service", "c1", 10)).await.unwrap();
        store.append(&event("completed", "service", "c1", 20)).await.unwrap();
        store.append(&event("started", "service", "other", 5)).await.unwrap();

        let replayed = store.replay("c1").await.unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].type_, "started");
        assert_eq!(replayed[1].type_, "completed");
    }

    #[tokio::test]
    async fn limit_is_honored() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        for i in 0..5 {
            store
                .append(&event("tick", "service", "c", i))
                .await
                .unwrap();
        }
        let results = store
            .query(&EventQuery {
                limit: Some(2),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
    }

    #[tokio::test]
    async fn count_reflects_appended_events() {
        let store = SqliteEventStore::open_in_memory().unwrap();
        assert_eq!(store.count().await.unwrap(), 0);
        store.append(&event("started", "service", "c", 1)).await.unwrap();
        assert_eq!(store.count().await.unwrap(), 1);
    }
}
