// live-sessions-service/src/switch/handlers/mod.rs
//! Transition handlers, one per event kind, as `SessionEngine` methods.
//!
//! Each handler holds the table lock from lookup to write-back.

pub mod api;
pub mod channel;
pub mod media;

use tracing::{debug, info};

use crate::event::Event;
use crate::sessions::Session;

/// Lifecycle log line shared by every handler.
pub(crate) fn log_session(event: &Event, session: Option<&Session>, verdict: &'static str) {
    info!(
        event = verdict,
        kind = %event.kind,
        pole = %event.pole,
        uid = %event.unique_id,
        other_uid = %event.other_id,
        caller_num = %event.caller_number,
        callee_num = %event.callee_number,
        call_state = %event.call_state,
        session.caller_uid = session.map(|s| s.caller_uid.as_str()).unwrap_or_default(),
        session.callee_uid = session.map(|s| s.callee_uid.as_str()).unwrap_or_default(),
        "{}",
        verdict
    );
}

pub(crate) fn log_before(event: &Event, session: Option<&Session>) {
    debug!(?event, ?session, "Before transition");
}

pub(crate) fn log_after(session: &Session) {
    debug!(?session, "After transition");
}
