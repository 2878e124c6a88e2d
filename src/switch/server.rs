// live-sessions-service/src/switch/server.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::event::Event;
use crate::switch::backoff::FibBackoff;
use crate::switch::engine::SessionEngine;
use crate::switch::SwitchHandle;

const BACKOFF_UNIT: Duration = Duration::from_secs(1);

/// Reconnect policy for one switch.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Attempts per outage; `0` retries forever.
    pub limit: u32,
    pub max_delay: Duration,
}

/// Event loop for one switch: one task per event, reconnect on loss.
pub struct SwitchListener {
    switch: Arc<SwitchHandle>,
    engine: Arc<SessionEngine>,
    fatal_tx: mpsc::UnboundedSender<ServiceError>,
    retry: RetryPolicy,
}

impl SwitchListener {
    pub fn new(
        switch: Arc<SwitchHandle>,
        engine: Arc<SessionEngine>,
        fatal_tx: mpsc::UnboundedSender<ServiceError>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            switch,
            engine,
            fatal_tx,
            retry,
        }
    }

    /// `events` is the stream of an already established connection, if any.
    pub async fn run(self, mut events: Option<mpsc::UnboundedReceiver<Event>>, mut shutdown_rx: watch::Receiver<bool>) {
        info!(
            event = "SWITCH_LISTENER_ACTIVE",
            pole = %self.switch.pole(),
            addr = %self.switch.addr(),
            "📡 Switch event listener active"
        );

        loop {
            let mut rx = match events.take() {
                Some(rx) => rx,
                None => match self.reconnect(&mut shutdown_rx).await {
                    Some(rx) => rx,
                    None => break,
                },
            };

            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => {
                        info!(event = "SWITCH_SHUTDOWN", pole = %self.switch.pole(), "Switch listener stopping...");
                        self.switch.disconnect().await;
                        return;
                    }
                    next = rx.recv() => match next {
                        Some(event) => self.dispatch(event),
                        None => {
                            warn!(event = "SWITCH_DISCONNECTED", pole = %self.switch.pole(), "🔌 Switch connection lost");
                            self.switch.clear_client().await;
                            break;
                        }
                    }
                }
            }
        }

        error!(
            event = "SWITCH_ABANDONED",
            pole = %self.switch.pole(),
            "Switch listener stopped; no more events from this switch"
        );
    }

    fn dispatch(&self, event: Event) {
        debug!(
            event = "SWITCH_EVENT_RECEIVED",
            kind = %event.kind,
            uid = %event.unique_id,
            pole = %event.pole,
            "📥 Switch event received"
        );

        let engine = self.engine.clone();
        let fatal_tx = self.fatal_tx.clone();
        tokio::spawn(async move {
            let kind = event.kind.clone();
            if let Err(e) = engine.handle_event(event).await {
                if e.is_fatal() {
                    error!(event = "SESSION_STORE_FAILURE", kind = %kind, error = %e, "💥 Snapshot store failed");
                    let _ = fatal_tx.send(e);
                } else {
                    warn!(event = "EVENT_HANDLER_ERROR", kind = %kind, error = %e, "Event handling failed");
                }
            }
        });
    }

    /// `None` on shutdown or when the retry limit is exhausted.
    async fn reconnect(&self, shutdown_rx: &mut watch::Receiver<bool>) -> Option<mpsc::UnboundedReceiver<Event>> {
        let mut backoff = FibBackoff::new(BACKOFF_UNIT, self.retry.max_delay);
        let mut attempt: u32 = 0;
        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                _ = shutdown_rx.changed() => return None,
                _ = tokio::time::sleep(delay) => {}
            }

            attempt += 1;
            match self.switch.connect().await {
                Ok(rx) => {
                    info!(event = "SWITCH_RECONNECTED", pole = %self.switch.pole(), attempt, "🔌 Switch reconnected");
                    return Some(rx);
                }
                Err(e) => {
                    warn!(
                        event = "SWITCH_RECONNECT_FAILED",
                        pole = %self.switch.pole(),
                        attempt,
                        retry_in = ?backoff.clone().next_delay(),
                        error = %e,
                        "Switch reconnect failed"
                    );
                    if self.retry.limit > 0 && attempt >= self.retry.limit {
                        return None;
                    }
                }
            }
        }
    }
}
