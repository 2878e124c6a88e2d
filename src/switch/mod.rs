// live-sessions-service/src/switch/mod.rs
//! Everything that talks to the FreeSWITCH side: the event socket, the
//! per-switch listeners, and the engine that turns events into session
//! transitions.

pub mod backoff;
pub mod engine;
pub mod esl;
pub mod handlers;
pub mod server;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use freeswitch_esl_tokio::{EslClient, EslConnectOptions, EventFormat};
use serde::Deserialize;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};

use crate::config::SwitchConfig;
use crate::error::{Result, ServiceError};
use crate::event::Event;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One row of `show calls as json`: a bridged A/B leg pair.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveCall {
    pub uuid: String,
    pub b_uuid: String,
    pub direction: String,
    pub created_epoch: String,
    pub cid_num: String,
    pub dest: String,
    pub callstate: String,
    pub b_callstate: String,
    pub call_uuid: String,
    pub hostname: String,
}

/// The switch's live-call table.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LiveCalls {
    pub row_count: i64,
    pub rows: Vec<LiveCall>,
}

impl LiveCalls {
    pub fn parse(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// True when `{a, b}` are the two ends of one live call, either order.
    pub fn contains_pair(&self, a: &str, b: &str) -> bool {
        self.rows
            .iter()
            .any(|row| (row.uuid == a && row.b_uuid == b) || (row.uuid == b && row.b_uuid == a))
    }
}

/// Outcome of a fire-and-forget broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub dispatched: u32,
    pub failed: u32,
}

impl DispatchReport {
    pub fn record(&mut self, result: &Result<String>) {
        match result {
            Ok(_) => self.dispatched += 1,
            Err(_) => self.failed += 1,
        }
    }

    pub fn merge(&mut self, other: DispatchReport) {
        self.dispatched += other.dispatched;
        self.failed += other.failed;
    }
}

/// Commands the engine sends toward the switches.
#[async_trait]
pub trait SwitchGateway: Send + Sync {
    /// Send `command` as a background job to every connected switch.
    async fn broadcast_bgapi(&self, command: &str) -> DispatchReport;

    /// Fetch each switch's live-call table, tagged with the switch pole.
    async fn live_calls(&self) -> Vec<(String, Result<LiveCalls>)>;
}

/// One configured switch and its current connection, if any.
pub struct SwitchHandle {
    config: SwitchConfig,
    event_queue: usize,
    client: RwLock<Option<EslClient>>,
}

impl SwitchHandle {
    /// `event_queue` bounds the client's own queue; events beyond it are
    /// dropped if the drain task falls behind.
    pub fn new(config: SwitchConfig, event_queue: usize) -> Self {
        Self {
            config,
            event_queue,
            client: RwLock::new(None),
        }
    }

    pub fn pole(&self) -> &str {
        &self.config.pole
    }

    pub fn addr(&self) -> String {
        self.config.addr()
    }

    /// Open the event socket, subscribe, and keep the client for commands.
    pub async fn connect(&self) -> Result<mpsc::UnboundedReceiver<Event>> {
        let options = EslConnectOptions::new()
            .with_connect_timeout(CONNECT_TIMEOUT)
            .with_event_queue_size(self.event_queue);
        let (client, events) =
            EslClient::connect_with_options(&self.config.host, self.config.port, &self.config.password, options)
                .await?;
        let events = esl::drain_events(events, self.config.pole.clone());
        if let Err(e) = client
            .subscribe_events(EventFormat::Plain, esl::SUBSCRIBED_EVENTS)
            .await
        {
            let _ = client.disconnect().await;
            return Err(e.into());
        }
        info!(
            event = "SWITCH_CONNECTED",
            pole = %self.config.pole,
            addr = %self.config.addr(),
            "🔌 Switch connected and subscribed"
        );
        *self.client.write().await = Some(client);
        Ok(events)
    }

    pub async fn client(&self) -> Option<EslClient> {
        self.client.read().await.clone()
    }

    pub async fn clear_client(&self) {
        self.client.write().await.take();
    }

    pub async fn disconnect(&self) {
        if let Some(client) = self.client.write().await.take() {
            if let Err(e) = client.disconnect().await {
                debug!(pole = %self.config.pole, error = %e, "Switch disconnect failed");
            }
        }
    }

    async fn require_client(&self) -> Result<EslClient> {
        self.client()
            .await
            .ok_or_else(|| ServiceError::SwitchUnavailable(self.config.pole.clone()))
    }
}

/// Every configured switch, in configuration order.
#[derive(Clone, Default)]
pub struct SwitchPool {
    switches: Vec<Arc<SwitchHandle>>,
}

impl SwitchPool {
    pub fn new(configs: Vec<SwitchConfig>, event_queue: usize) -> Self {
        Self {
            switches: configs
                .into_iter()
                .map(|c| Arc::new(SwitchHandle::new(c, event_queue)))
                .collect(),
        }
    }

    pub fn handles(&self) -> &[Arc<SwitchHandle>] {
        &self.switches
    }
}

#[async_trait]
impl SwitchGateway for SwitchPool {
    async fn broadcast_bgapi(&self, command: &str) -> DispatchReport {
        let mut report = DispatchReport::default();
        for switch in &self.switches {
            let result = match switch.require_client().await {
                Ok(client) => esl::bgapi(&client, command).await,
                Err(e) => Err(e),
            };
            if let Err(e) = &result {
                warn!(pole = %switch.pole(), command, error = %e, "bgapi dispatch failed");
            } else {
                debug!(pole = %switch.pole(), command, "bgapi dispatched");
            }
            report.record(&result);
        }
        report
    }

    async fn live_calls(&self) -> Vec<(String, Result<LiveCalls>)> {
        let mut tables = Vec::with_capacity(self.switches.len());
        for switch in &self.switches {
            let result = match switch.require_client().await {
                Ok(client) => esl::api(&client, "show calls as json")
                    .await
                    .and_then(|body| LiveCalls::parse(&body)),
                Err(e) => Err(e),
            };
            tables.push((switch.pole().to_string(), result));
        }
        tables
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn live_calls_pair_matching() {
        let calls = LiveCalls::parse(
            r#"{"row_count":1,"rows":[{"uuid":"X","b_uuid":"Y","direction":"inbound","b_direction":"outbound"}]}"#,
        )
        .unwrap();
        assert_eq!(calls.row_count, 1);
        assert!(calls.contains_pair("X", "Y"));
        assert!(calls.contains_pair("Y", "X"));
        assert!(!calls.contains_pair("X", "Z"));
    }

    #[test]
    fn empty_live_call_table_has_no_rows() {
        let calls = LiveCalls::parse(r#"{"row_count":0}"#).unwrap();
        assert!(calls.rows.is_empty());
        assert!(!calls.contains_pair("X", "Y"));
    }

    #[tokio::test]
    async fn pool_without_connections_reports_failures() {
        let pool = SwitchPool::new(
            vec![SwitchConfig {
                pole: "paris".to_string(),
                host: "127.0.0.1".to_string(),
                port: 1,
                password: "ClueCon".to_string(),
            }],
            16,
        );
        let report = pool.broadcast_bgapi("uuid_setvar a k v").await;
        assert_eq!(report, DispatchReport { dispatched: 0, failed: 1 });

        let tables = pool.live_calls().await;
        assert_eq!(tables.len(), 1);
        assert!(matches!(tables[0].1, Err(ServiceError::SwitchUnavailable(_))));
    }
}
