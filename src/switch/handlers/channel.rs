// live-sessions-service/src/switch/handlers/channel.rs

use tracing::{info, warn};

use super::{log_after, log_before, log_session};
use crate::error::Result;
use crate::event::Event;
use crate::sessions::{Session, SessionGuard, SessionMatch};
use crate::switch::engine::SessionEngine;

const RINGING: &str = "RINGING";
const ACTIVE: &str = "ACTIVE";

/// Extension-length numbers (exactly four digits) are trusted over what
/// the session already holds during ringing.
fn is_extension_number(number: &str) -> bool {
    number.len() == 4 && number.bytes().all(|b| b.is_ascii_digit())
}

/// Short numbers are internal extensions; anything longer is replaced by
/// the effective callee number when one is known.
fn bridged_callee_number(event: &Event) -> String {
    if !event.callee_number.is_empty() && event.callee_number.len() < 5 {
        event.callee_number.clone()
    } else {
        event.effective_callee_number.clone()
    }
}

impl SessionEngine {
    pub(crate) async fn on_channel_create(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        match table.lookup(&event.unique_id, &event.other_id, false, false) {
            Some(SessionMatch { index, mut session }) => {
                log_session(event, Some(&session), "SESSION_FOUND");
                log_before(event, Some(&session));
                session.apply_overrides(event);
                session.call_state = event.call_state.clone();
                if event.created_at.is_some() {
                    session.date_start = event.created_at;
                }
                session.fix_uids(event);
                session.pole = event.pole.clone();
                log_after(&session);
                table.replace(index, session).await
            }
            None => {
                log_session(event, None, "SESSION_CREATE");
                log_before(event, None);
                let session = Session {
                    caller_num: event.caller_number.clone(),
                    callee_num: event.callee_number.clone(),
                    call_state: event.call_state.clone(),
                    date_start: event.created_at,
                    ..Session::from_event(event)
                };
                log_after(&session);
                table.append(session).await
            }
        }
    }

    pub(crate) async fn on_channel_progress(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        let Some(SessionMatch { index, mut session }) =
            table.lookup(&event.unique_id, &event.other_id, false, false)
        else {
            log_session(event, None, "SESSION_NOT_FOUND");
            return Ok(());
        };

        log_session(event, Some(&session), "SESSION_FOUND");
        log_before(event, Some(&session));
        session.apply_overrides(event);
        session.date_ring = event.progress_at;
        if is_extension_number(&event.caller_number) {
            session.caller_num = event.caller_number.clone();
        }
        if is_extension_number(&event.callee_number) {
            session.callee_num = event.callee_number.clone();
        }
        session.call_state = RINGING.to_string();
        session.pole = event.pole.clone();
        log_after(&session);
        table.replace(index, session).await
    }

    pub(crate) async fn on_channel_bridge(&self, event: &Event) -> Result<()> {
        let (caller_uid, callee_uid) = {
            let mut table = self.store().lock().await;
            let session = match table.lookup(&event.unique_id, &event.other_id, false, false) {
                Some(SessionMatch { index, mut session }) => {
                    log_session(event, Some(&session), "SESSION_FOUND");
                    log_before(event, Some(&session));
                    session.apply_overrides(event);
                    session.call_state = event.call_state.clone();
                    session.pole = event.pole.clone();
                    session.fix_uids(event);
                    session.date_con = event.event_date;
                    table.replace(index, session.clone()).await?;
                    session
                }
                None => {
                    log_session(event, None, "SESSION_CREATE");
                    log_before(event, None);
                    let session = Session {
                        caller_num: event.caller_number.clone(),
                        callee_num: bridged_callee_number(event),
                        call_state: event.call_state.clone(),
                        date_start: event.event_date,
                        date_ring: event.event_date,
                        date_con: event.event_date,
                        ..Session::from_event(event)
                    };
                    table.append(session.clone()).await?;
                    session
                }
            };
            log_after(&session);
            (session.caller_uid, session.callee_uid)
        };

        // Enrichment sends commands to the switches; the lock is released first.
        if self.has_directory() {
            if let Some(report) = self.enrich_session(&caller_uid, &callee_uid).await {
                if report.failed > 0 {
                    warn!(
                        event = "SESSION_ENRICH_PARTIAL",
                        uid = %caller_uid,
                        other_uid = %callee_uid,
                        dispatched = report.dispatched,
                        failed = report.failed,
                        "Number types not pushed to every switch"
                    );
                }
            }
        }
        Ok(())
    }

    pub(crate) async fn on_channel_unbridge(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        match table.lookup(&event.unique_id, &event.other_id, false, false) {
            Some(hit) => {
                log_session(event, Some(&hit.session), "SESSION_FOUND");
                self.remove_locked(&mut table, event).await
            }
            None => {
                log_session(event, None, "SESSION_NOT_FOUND");
                Ok(())
            }
        }
    }

    pub(crate) async fn on_channel_destroy(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        if let Some(hit) = table.lookup(&event.unique_id, &event.other_id, true, false) {
            log_session(event, Some(&hit.session), "SESSION_FOUND");
            return self.remove_locked(&mut table, event).await;
        }

        log_session(event, None, "SESSION_NOT_FOUND");
        if let Some(hit) = table.lookup(&event.unique_id, &event.other_id, false, false) {
            log_session(event, Some(&hit.session), "SESSION_FOUND_LOOSE");
            return self.remove_locked(&mut table, event).await;
        }
        Ok(())
    }

    pub(crate) async fn on_channel_park(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        if let Some(hit) = table.lookup(&event.unique_id, &event.other_id, false, false) {
            log_session(event, Some(&hit.session), "SESSION_FOUND");
            return Ok(());
        }

        log_session(event, None, "SESSION_CREATE");
        log_before(event, None);
        let session = Session {
            caller_num: event.callee_number.clone(),
            callee_num: event.callee_number.clone(),
            call_state: event.call_state.clone(),
            date_start: event.event_date,
            date_ring: event.event_date,
            date_con: event.event_date,
            ..Session::from_event(event)
        };
        log_after(&session);
        table.append(session).await
    }

    pub(crate) async fn on_channel_unpark(&self, event: &Event) -> Result<()> {
        let mut table = self.store().lock().await;
        match table.lookup(&event.unique_id, &event.other_id, true, false) {
            Some(hit) => {
                log_session(event, Some(&hit.session), "SESSION_FOUND");
                self.remove_locked(&mut table, event).await
            }
            None => {
                log_session(event, None, "SESSION_NOT_FOUND");
                Ok(())
            }
        }
    }

    pub(crate) async fn on_channel_hold(&self, event: &Event) -> Result<()> {
        self.update_call_state(event, event.call_state.clone()).await
    }

    pub(crate) async fn on_channel_unhold(&self, event: &Event) -> Result<()> {
        self.update_call_state(event, ACTIVE.to_string()).await
    }

    async fn update_call_state(&self, event: &Event, call_state: String) -> Result<()> {
        let mut table = self.store().lock().await;
        let Some(SessionMatch { index, mut session }) =
            table.lookup(&event.unique_id, &event.other_id, false, false)
        else {
            log_session(event, None, "SESSION_NOT_FOUND");
            return Ok(());
        };

        log_session(event, Some(&session), "SESSION_FOUND");
        log_before(event, Some(&session));
        session.apply_overrides(event);
        session.call_state = call_state;
        log_after(&session);
        table.replace(index, session).await
    }

    async fn remove_locked(&self, table: &mut SessionGuard<'_>, event: &Event) -> Result<()> {
        match table.remove(&event.unique_id, &event.other_id).await? {
            Some(removed) => info!(
                event = "SESSION_REMOVED",
                uid = %removed.caller_uid,
                other_uid = %removed.callee_uid,
                remaining = table.len(),
                "🗑️ Session removed"
            ),
            None => warn!(
                event = "SESSION_REMOVE_MISSED",
                uid = %event.unique_id,
                other_uid = %event.other_id,
                "Matched session could not be removed by leg ids"
            ),
        }
        Ok(())
    }
}
