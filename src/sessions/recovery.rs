// live-sessions-service/src/sessions/recovery.rs

use tracing::{debug, info, warn};

use crate::error::{Result, ServiceError};
use crate::sessions::state::Session;
use crate::sessions::store::SessionStore;
use crate::switch::SwitchGateway;

/// Re-admit persisted sessions that the switches still report as live.
///
/// Live-call tables are fetched before the table lock is taken. A switch
/// whose table cannot be fetched is skipped; its sessions are only kept if
/// another switch confirms them. The table is persisted afterwards so the
/// snapshot no longer carries the dropped sessions.
///
/// An undecodable snapshot counts as absent and is overwritten with the
/// current (empty) table; store failures still abort.
pub async fn restore_live_sessions(store: &SessionStore, switches: &dyn SwitchGateway) -> Result<usize> {
    let persisted = match store.load_snapshot().await {
        Ok(Some(sessions)) if !sessions.is_empty() => sessions,
        Ok(_) => {
            info!(event = "SESSIONS_RESTORE_SKIPPED", "No persisted sessions to restore");
            return Ok(0);
        }
        Err(ServiceError::Serialization(e)) => {
            warn!(event = "SESSIONS_SNAPSHOT_UNREADABLE", error = %e, "Persisted snapshot is corrupt, starting empty");
            store.lock().await.persist().await?;
            return Ok(0);
        }
        Err(e) => return Err(e),
    };
    info!(
        event = "SESSIONS_SNAPSHOT_FOUND",
        count = persisted.len(),
        "♻️ Persisted sessions found after restart"
    );

    let mut confirmed: Vec<Session> = Vec::new();
    for (pole, live) in switches.live_calls().await {
        let calls = match live {
            Ok(calls) => calls,
            Err(e) => {
                warn!(event = "LIVE_CALLS_UNAVAILABLE", pole = %pole, error = %e, "Live-call table unavailable, switch skipped");
                continue;
            }
        };
        debug!(pole = %pole, rows = calls.rows.len(), "Live-call table fetched");
        for session in &persisted {
            if calls.contains_pair(&session.caller_uid, &session.callee_uid)
                && !confirmed.iter().any(|s| s.same_legs(session))
            {
                confirmed.push(session.clone());
            }
        }
    }

    let mut guard = store.lock().await;
    let mut restored = 0;
    for session in confirmed {
        if guard
            .lookup(&session.caller_uid, &session.callee_uid, true, false)
            .is_some()
        {
            continue;
        }
        info!(
            event = "SESSION_RESTORED",
            uid = %session.caller_uid,
            other_uid = %session.callee_uid,
            pole = %session.pole,
            "Session restored"
        );
        guard.append(session).await?;
        restored += 1;
    }
    guard.persist().await?;

    info!(
        event = "SESSIONS_RESTORED",
        restored,
        dropped = persisted.len() - restored,
        "♻️ Session recovery complete"
    );
    Ok(restored)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::sessions::store::{MemorySnapshotStore, SnapshotStore};
    use crate::switch::{DispatchReport, LiveCall, LiveCalls};

    struct FixedCalls(Vec<(String, Option<Vec<(&'static str, &'static str)>>)>);

    #[async_trait]
    impl SwitchGateway for FixedCalls {
        async fn broadcast_bgapi(&self, _command: &str) -> DispatchReport {
            DispatchReport::default()
        }

        async fn live_calls(&self) -> Vec<(String, Result<LiveCalls>)> {
            self.0
                .iter()
                .map(|(pole, rows)| {
                    let result = match rows {
                        Some(rows) => Ok(LiveCalls {
                            row_count: rows.len() as i64,
                            rows: rows
                                .iter()
                                .map(|(a, b)| LiveCall {
                                    uuid: a.to_string(),
                                    b_uuid: b.to_string(),
                                    ..Default::default()
                                })
                                .collect(),
                        }),
                        None => Err(ServiceError::SwitchUnavailable(pole.clone())),
                    };
                    (pole.clone(), result)
                })
                .collect()
        }
    }

    fn session(caller: &str, callee: &str) -> Session {
        Session {
            caller_uid: caller.to_string(),
            callee_uid: callee.to_string(),
            ..Default::default()
        }
    }

    async fn store_with(sessions: &[Session]) -> (SessionStore, Arc<MemorySnapshotStore>) {
        let snapshots = Arc::new(MemorySnapshotStore::with_sessions(sessions).await.unwrap());
        (SessionStore::new(snapshots.clone()), snapshots)
    }

    #[tokio::test]
    async fn confirmed_pair_is_restored_in_either_order() {
        let (store, _) = store_with(&[session("X", "Y")]).await;
        let switches = FixedCalls(vec![("paris".into(), Some(vec![("Y", "X")]))]);

        let restored = restore_live_sessions(&store, &switches).await.unwrap();

        assert_eq!(restored, 1);
        assert_eq!(store.lock().await.snapshot_all(), vec![session("X", "Y")]);
    }

    #[tokio::test]
    async fn unconfirmed_sessions_are_dropped_from_the_snapshot() {
        let (store, snapshots) = store_with(&[session("X", "Y"), session("P", "Q")]).await;
        let switches = FixedCalls(vec![("paris".into(), Some(vec![("P", "Q")]))]);

        restore_live_sessions(&store, &switches).await.unwrap();

        assert_eq!(store.lock().await.snapshot_all(), vec![session("P", "Q")]);
        assert_eq!(snapshots.load().await.unwrap(), Some(vec![session("P", "Q")]));
    }

    #[tokio::test]
    async fn failing_switch_is_skipped() {
        let (store, _) = store_with(&[session("X", "Y")]).await;
        let switches = FixedCalls(vec![
            ("lyon".into(), None),
            ("paris".into(), Some(vec![("X", "Y")])),
        ]);

        assert_eq!(restore_live_sessions(&store, &switches).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn pair_seen_on_two_switches_is_restored_once() {
        let (store, _) = store_with(&[session("X", "Y")]).await;
        let switches = FixedCalls(vec![
            ("lyon".into(), Some(vec![("X", "Y")])),
            ("paris".into(), Some(vec![("X", "Y")])),
        ]);

        assert_eq!(restore_live_sessions(&store, &switches).await.unwrap(), 1);
        assert_eq!(store.lock().await.len(), 1);
    }

    /// Snapshot whose stored form no longer decodes.
    #[derive(Default)]
    struct CorruptSnapshot {
        saved: tokio::sync::Mutex<Option<Vec<Session>>>,
        unreachable: bool,
    }

    #[async_trait]
    impl SnapshotStore for CorruptSnapshot {
        async fn load(&self) -> Result<Option<Vec<Session>>> {
            if self.unreachable {
                return Err(ServiceError::Io(std::io::ErrorKind::ConnectionRefused.into()));
            }
            let garbage = serde_json::from_str::<Vec<Session>>("{garbage").unwrap_err();
            Err(ServiceError::Serialization(garbage))
        }

        async fn save(&self, sessions: &[Session]) -> Result<()> {
            *self.saved.lock().await = Some(sessions.to_vec());
            Ok(())
        }
    }

    #[tokio::test]
    async fn corrupt_snapshot_is_replaced_by_an_empty_table() {
        let snapshots = Arc::new(CorruptSnapshot::default());
        let store = SessionStore::new(snapshots.clone());
        let switches = FixedCalls(vec![("paris".into(), Some(vec![("X", "Y")]))]);

        assert_eq!(restore_live_sessions(&store, &switches).await.unwrap(), 0);
        assert!(store.lock().await.is_empty());
        assert_eq!(*snapshots.saved.lock().await, Some(Vec::new()));
    }

    #[tokio::test]
    async fn unreachable_snapshot_store_aborts_recovery() {
        let snapshots = Arc::new(CorruptSnapshot {
            unreachable: true,
            ..Default::default()
        });
        let store = SessionStore::new(snapshots.clone());
        let switches = FixedCalls(vec![]);

        assert!(restore_live_sessions(&store, &switches).await.is_err());
        assert!(snapshots.saved.lock().await.is_none());
    }

    #[tokio::test]
    async fn missing_snapshot_restores_nothing() {
        let store = SessionStore::new(Arc::new(MemorySnapshotStore::new()));
        let switches = FixedCalls(vec![("paris".into(), Some(vec![("X", "Y")]))]);

        assert_eq!(restore_live_sessions(&store, &switches).await.unwrap(), 0);
        assert!(store.lock().await.is_empty());
    }
}
