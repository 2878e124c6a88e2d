// live-sessions-service/src/switch/engine.rs

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::directory::{self, NumberDirectory};
use crate::error::Result;
use crate::event::{Event, EventKind};
use crate::sessions::recovery;
use crate::sessions::{Session, SessionStore};
use crate::switch::{DispatchReport, SwitchGateway};

/// Routes switch events to their transition handler and serves the
/// remote facade. Cheap to share behind an `Arc`.
pub struct SessionEngine {
    store: SessionStore,
    switches: Arc<dyn SwitchGateway>,
    directory: Option<Arc<dyn NumberDirectory>>,
}

impl SessionEngine {
    pub fn new(store: SessionStore, switches: Arc<dyn SwitchGateway>) -> Self {
        Self {
            store,
            switches,
            directory: None,
        }
    }

    pub fn with_directory(mut self, directory: Arc<dyn NumberDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn has_directory(&self) -> bool {
        self.directory.is_some()
    }

    pub async fn handle_event(&self, event: Event) -> Result<()> {
        match event.kind {
            EventKind::ChannelCreate => self.on_channel_create(&event).await,
            EventKind::ChannelProgress => self.on_channel_progress(&event).await,
            EventKind::ChannelBridge => self.on_channel_bridge(&event).await,
            EventKind::ChannelUnbridge => self.on_channel_unbridge(&event).await,
            EventKind::ChannelDestroy => self.on_channel_destroy(&event).await,
            EventKind::ChannelPark => self.on_channel_park(&event).await,
            EventKind::ChannelUnpark => self.on_channel_unpark(&event).await,
            EventKind::ChannelHold => self.on_channel_hold(&event).await,
            EventKind::ChannelUnhold => self.on_channel_unhold(&event).await,
            EventKind::RecordStart => self.on_record_start(&event).await,
            EventKind::PlaybackStart => self.on_playback_start(&event).await,
            EventKind::Api => self.on_api_command(&event).await,
            EventKind::Other(ref name) => {
                debug!(event_name = %name, "Event ignored");
                Ok(())
            }
        }
    }

    /// Re-admit the persisted sessions still live on a switch.
    pub async fn restore(&self) -> Result<usize> {
        recovery::restore_live_sessions(&self.store, self.switches.as_ref()).await
    }

    pub async fn get_session(
        &self,
        caller_uid: &str,
        callee_uid: &str,
        exact: bool,
        single_id: bool,
    ) -> Option<Session> {
        let table = self.store.lock().await;
        table
            .lookup(caller_uid, callee_uid, exact, single_id)
            .map(|hit| hit.session)
    }

    pub async fn get_sessions(&self) -> Vec<Session> {
        self.store.lock().await.snapshot_all()
    }

    /// `uuid_setvar` on both legs, on every switch.
    pub async fn set_var(&self, caller_uid: &str, callee_uid: &str, key: &str, value: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        for leg in legs(caller_uid, callee_uid) {
            let command = format!("uuid_setvar {} {} {}", leg, key, value);
            report.merge(self.switches.broadcast_bgapi(&command).await);
        }
        info!(
            event = "SESSION_SET_VAR",
            caller_uid,
            callee_uid,
            key,
            dispatched = report.dispatched,
            failed = report.failed,
            "Variable dispatched"
        );
        report
    }

    /// `uuid_setvar_multi` on both legs, on every switch. Keys go out in
    /// sorted order.
    pub async fn set_var_multiple(
        &self,
        caller_uid: &str,
        callee_uid: &str,
        vars: &HashMap<String, String>,
    ) -> DispatchReport {
        let mut report = DispatchReport::default();
        if vars.is_empty() {
            return report;
        }
        let argument = setvar_multi_argument(vars);
        for leg in legs(caller_uid, callee_uid) {
            let command = format!("uuid_setvar_multi {} {}", leg, argument);
            report.merge(self.switches.broadcast_bgapi(&command).await);
        }
        info!(
            event = "SESSION_SET_VARS",
            caller_uid,
            callee_uid,
            count = vars.len(),
            dispatched = report.dispatched,
            failed = report.failed,
            "Variables dispatched"
        );
        report
    }

    /// Classify the session's numbers and push `CALLER_TYPE`/`CALLEE_TYPE`
    /// to both legs. `None` without a directory or a matching session.
    pub async fn enrich_session(&self, caller_uid: &str, callee_uid: &str) -> Option<DispatchReport> {
        let directory = self.directory.as_ref()?;
        let session = self.get_session(caller_uid, callee_uid, true, false).await?;
        let types = directory::caller_callee_types(directory.as_ref(), &session.caller_num, &session.callee_num);
        debug!(
            uid = %session.caller_uid,
            other_uid = %session.callee_uid,
            ?types,
            "Number types resolved"
        );
        Some(
            self.set_var_multiple(&session.caller_uid, &session.callee_uid, &types)
                .await,
        )
    }
}

fn legs<'a>(caller_uid: &'a str, callee_uid: &'a str) -> impl Iterator<Item = &'a str> {
    [caller_uid, callee_uid].into_iter().filter(|leg| !leg.is_empty())
}

/// `k=v;k2=v2`, keys sorted.
pub fn setvar_multi_argument(vars: &HashMap<String, String>) -> String {
    vars.iter()
        .collect::<BTreeMap<_, _>>()
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join(";")
}
