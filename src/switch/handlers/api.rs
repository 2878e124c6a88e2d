// live-sessions-service/src/switch/handlers/api.rs

use std::collections::HashMap;

use tracing::debug;

use super::{log_after, log_before, log_session};
use crate::error::Result;
use crate::event::Event;
use crate::sessions::{Session, SessionMatch};
use crate::switch::engine::SessionEngine;

/// Copy the known variables onto the session. Empty values never
/// overwrite. Returns how many fields changed hands.
pub fn merge_api_vars(session: &mut Session, vars: &HashMap<String, String>) -> usize {
    let mut merged = 0;
    for (key, value) in vars {
        if value.is_empty() {
            continue;
        }
        let slot = match key.as_str() {
            "Record-File-Path" => &mut session.recording_name,
            "original_caller" => &mut session.overrides.original_caller_num,
            "original_callee" => &mut session.overrides.original_callee_num,
            "CALLER_TYPE" => &mut session.overrides.caller_type,
            "CALLEE_TYPE" => &mut session.overrides.callee_type,
            "CALL_DIRECTION" => &mut session.overrides.call_direction,
            "CALL_TYPE" => &mut session.overrides.call_type,
            "origination_caller_id_name" => &mut session.overrides.origination_caller_id_name,
            "origination_callee_id_name" => &mut session.overrides.origination_callee_id_name,
            "effective_caller_id_name" => &mut session.overrides.effective_caller_id_name,
            "effective_callee_id_name" => &mut session.overrides.effective_callee_id_name,
            "sip_callee_id_name" => &mut session.overrides.other_leg_callee_id_name,
            _ => continue,
        };
        *slot = value.clone();
        merged += 1;
    }
    merged
}

impl SessionEngine {
    /// `uuid_setvar` / `uuid_setvar_multi` executed on a switch, by anyone,
    /// including this service's own enrichment.
    pub(crate) async fn on_api_command(&self, event: &Event) -> Result<()> {
        if !event.is_setvar() {
            return Ok(());
        }

        let mut table = self.store().lock().await;
        let Some(SessionMatch { index, mut session }) =
            table.lookup(&event.api_target, "", false, true)
        else {
            debug!(
                event = "SESSION_NOT_FOUND",
                command = %event.api_command,
                target = %event.api_target,
                "Variable set on an untracked leg"
            );
            return Ok(());
        };

        log_session(event, Some(&session), "SESSION_FOUND");
        log_before(event, Some(&session));
        let merged = merge_api_vars(&mut session, &event.api_vars);
        debug!(merged, target = %event.api_target, "Variables merged");
        log_after(&session);
        table.replace(index, session).await
    }
}
