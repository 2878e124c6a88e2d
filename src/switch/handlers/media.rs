// live-sessions-service/src/switch/handlers/media.rs

use tracing::info;

use super::{log_after, log_before, log_session};
use crate::error::Result;
use crate::event::Event;
use crate::sessions::{Session, SessionMatch};
use crate::switch::engine::SessionEngine;

const RECORDING_MARKER: &str = "/RECORDING/";

/// Recording id: the file stem following the recording directory marker.
///
/// `/var/lib/RECORDING/2024/abc-123.oga` → `2024/abc-123`. Paths without
/// the marker yield an empty id.
pub fn extract_record_id(path: &str) -> String {
    let Some((_, tail)) = path.split_once(RECORDING_MARKER) else {
        return String::new();
    };
    let stem = match tail.rfind('.') {
        Some(dot) if !tail[dot..].contains('/') => &tail[..dot],
        _ => tail,
    };
    stem.to_string()
}

impl SessionEngine {
    pub(crate) async fn on_record_start(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        let Some(SessionMatch { index, mut session }) =
            table.lookup(&event.unique_id, &event.other_id, false, false)
        else {
            log_session(event, None, "SESSION_NOT_FOUND");
            return Ok(());
        };

        log_session(event, Some(&session), "SESSION_FOUND");
        log_before(event, Some(&session));
        session.record_id = extract_record_id(&event.record_file_path);
        session.recording_name = event.record_file_path.clone();
        session.is_recorded = true;
        session.fix_uids(event);
        log_after(&session);
        table.replace(index, session.clone()).await?;

        // A session keyed by the other leg alone with a different pair is a
        // duplicate left by two racing creates for the same call.
        if let Some(clone) = table.lookup(&event.other_id, "", false, false) {
            if !clone.session.same_legs(&session) {
                log_session(event, Some(&clone.session), "SESSION_CLONE_FOUND");
                if let Some(removed) = table
                    .remove(&clone.session.caller_uid, &clone.session.callee_uid)
                    .await?
                {
                    info!(
                        event = "SESSION_CLONE_REMOVED",
                        uid = %removed.caller_uid,
                        other_uid = %removed.callee_uid,
                        kept.caller_uid = %session.caller_uid,
                        kept.callee_uid = %session.callee_uid,
                        "🧹 Duplicate session removed"
                    );
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn on_playback_start(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        match table.lookup(&event.unique_id, &event.other_id, true, false) {
            Some(SessionMatch { index, mut session }) => {
                log_session(event, Some(&session), "SESSION_FOUND");
                log_before(event, Some(&session));
                session.apply_overrides(event);
                session.date_ring = event.progress_at;
                if session.date_con.is_none() {
                    session.date_con = session.date_start;
                }
                session.pole = event.pole.clone();
                log_after(&session);
                table.replace(index, session).await
            }
            None => {
                log_session(event, None, "SESSION_CREATE");
                log_before(event, None);
                let session = Session {
                    caller_num: event.caller_number.clone(),
                    callee_num: event.effective_callee_number.clone(),
                    date_start: event.created_at,
                    date_ring: event.created_at,
                    date_con: event.created_at,
                    ..Session::from_event(event)
                };
                log_after(&session);
                table.append(session).await
            }
        }
    }
}
