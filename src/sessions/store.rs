// live-sessions-service/src/sessions/store.rs

use std::sync::Arc;

use async_trait::async_trait;
use redis::AsyncCommands;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info};

use crate::error::Result;
use crate::sessions::state::{Session, SessionMatch, SessionTable};

/// Durable home of the session table snapshot.
///
/// The whole table lives under one key and is rewritten on every mutation.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self) -> Result<Option<Vec<Session>>>;
    async fn save(&self, sessions: &[Session]) -> Result<()>;
}

/// Redis-backed snapshot.
///
/// Writes are delete-then-set; a crash between the two loses the snapshot.
pub struct RedisSnapshotStore {
    redis: Mutex<redis::aio::MultiplexedConnection>,
    key: String,
}

impl RedisSnapshotStore {
    pub async fn new(redis_url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        let key = key.into();
        info!(event = "REDIS_CONNECTED", snapshot.key = %key, "💾 Snapshot store connected");
        Ok(Self {
            redis: Mutex::new(conn),
            key,
        })
    }
}

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn load(&self) -> Result<Option<Vec<Session>>> {
        let mut conn = self.redis.lock().await;
        let raw: Option<String> = conn.get(&self.key).await?;
        match raw {
            Some(json) => {
                let sessions: Vec<Session> = serde_json::from_str(&json)?;
                debug!(count = sessions.len(), "Snapshot found in Redis");
                Ok(Some(sessions))
            }
            None => {
                debug!("No snapshot in Redis");
                Ok(None)
            }
        }
    }

    async fn save(&self, sessions: &[Session]) -> Result<()> {
        let json = serde_json::to_string(sessions)?;
        let mut conn = self.redis.lock().await;
        conn.del::<_, ()>(&self.key).await?;
        conn.set::<_, _, ()>(&self.key, json).await?;
        Ok(())
    }
}

/// Snapshot kept in process memory as its serialized JSON form.
#[derive(Default)]
pub struct MemorySnapshotStore {
    value: Mutex<Option<String>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn with_sessions(sessions: &[Session]) -> Result<Self> {
        let store = Self::new();
        store.save(sessions).await?;
        Ok(store)
    }

    pub async fn raw(&self) -> Option<String> {
        self.value.lock().await.clone()
    }
}

#[async_trait]
impl SnapshotStore for MemorySnapshotStore {
    async fn load(&self) -> Result<Option<Vec<Session>>> {
        match self.value.lock().await.as_deref() {
            Some(json) => Ok(Some(serde_json::from_str(json)?)),
            None => Ok(None),
        }
    }

    async fn save(&self, sessions: &[Session]) -> Result<()> {
        let json = serde_json::to_string(sessions)?;
        *self.value.lock().await = Some(json);
        Ok(())
    }
}

/// The session table behind one process-wide exclusive lock.
///
/// Every handler and every remote query takes the lock for its whole
/// lookup → mutate → persist sequence. There is no read/write split.
#[derive(Clone)]
pub struct SessionStore {
    table: Arc<Mutex<SessionTable>>,
    snapshots: Arc<dyn SnapshotStore>,
}

impl SessionStore {
    pub fn new(snapshots: Arc<dyn SnapshotStore>) -> Self {
        Self {
            table: Arc::new(Mutex::new(SessionTable::new())),
            snapshots,
        }
    }

    pub async fn lock(&self) -> SessionGuard<'_> {
        SessionGuard {
            table: self.table.lock().await,
            snapshots: self.snapshots.as_ref(),
        }
    }

    /// The persisted table, if any. Does not touch the in-memory table.
    pub async fn load_snapshot(&self) -> Result<Option<Vec<Session>>> {
        self.snapshots.load().await
    }
}

/// Exclusive access to the table. Dropping the guard releases the lock,
/// which also covers early returns and `?` paths.
pub struct SessionGuard<'a> {
    table: MutexGuard<'a, SessionTable>,
    snapshots: &'a dyn SnapshotStore,
}

impl<'a> SessionGuard<'a> {
    pub fn lookup(&self, id_a: &str, id_b: &str, exact: bool, single_id_ok: bool) -> Option<SessionMatch> {
        self.table.lookup(id_a, id_b, exact, single_id_ok)
    }

    pub fn snapshot_all(&self) -> Vec<Session> {
        self.table.snapshot_all()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub async fn replace(&mut self, index: usize, session: Session) -> Result<()> {
        self.table.replace(index, session);
        self.persist().await
    }

    pub async fn append(&mut self, session: Session) -> Result<()> {
        self.table.append(session);
        self.persist().await
    }

    /// Remove the first structural match for the leg pair.
    pub async fn remove(&mut self, id_a: &str, id_b: &str) -> Result<Option<Session>> {
        let removed = self.table.remove(id_a, id_b);
        if removed.is_some() {
            self.persist().await?;
        }
        Ok(removed)
    }

    /// Mirror the whole table to the snapshot store.
    pub async fn persist(&self) -> Result<()> {
        self.snapshots.save(self.table.as_slice()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn session(caller: &str, callee: &str) -> Session {
        Session {
            caller_uid: caller.to_string(),
            callee_uid: callee.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn snapshot_round_trip_preserves_sessions() {
        let mut full = session("x", "y");
        full.caller_num = "1001".to_string();
        full.call_state = "ACTIVE".to_string();
        full.date_start = Utc.timestamp_opt(1_700_000_000, 0).single();
        full.is_recorded = true;
        full.overrides.caller_type = "2".to_string();
        let sessions = vec![full, session("p", "")];

        let store = MemorySnapshotStore::new();
        store.save(&sessions).await.unwrap();
        let loaded = store.load().await.unwrap().expect("snapshot");

        assert_eq!(loaded.len(), sessions.len());
        for s in &sessions {
            assert!(loaded.contains(s));
        }
    }

    #[tokio::test]
    async fn empty_store_loads_nothing() {
        let store = MemorySnapshotStore::new();
        assert!(store.load().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn every_mutation_is_persisted() {
        let snapshots = Arc::new(MemorySnapshotStore::new());
        let store = SessionStore::new(snapshots.clone());

        {
            let mut guard = store.lock().await;
            guard.append(session("a", "")).await.unwrap();
        }
        assert_eq!(snapshots.load().await.unwrap(), Some(vec![session("a", "")]));

        {
            let mut guard = store.lock().await;
            let hit = guard.lookup("a", "b", false, false).expect("pending");
            guard.replace(hit.index, session("a", "b")).await.unwrap();
        }
        assert_eq!(snapshots.load().await.unwrap(), Some(vec![session("a", "b")]));

        {
            let mut guard = store.lock().await;
            assert!(guard.remove("b", "a").await.unwrap().is_some());
            assert!(guard.remove("b", "a").await.unwrap().is_none());
        }
        assert_eq!(snapshots.load().await.unwrap(), Some(vec![]));
    }

    #[tokio::test]
    async fn snapshot_json_uses_flat_fields() {
        let store = MemorySnapshotStore::with_sessions(&[session("a", "b")]).await.unwrap();
        let raw = store.raw().await.expect("raw json");
        assert!(raw.contains("\"caller_uid\":\"a\""));
        assert!(raw.contains("\"caller_type\":\"\""));
    }
}
