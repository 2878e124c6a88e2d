// live-sessions-service/src/switch/esl.rs
//! Event-socket plumbing on top of `freeswitch_esl_tokio`.
//!
//! The client's own reader task hands events to a bounded queue. We drain that
//! queue into an unbounded channel right away so command replies are never
//! stuck behind events nobody consumes yet (recovery runs before the
//! listeners start).

use freeswitch_esl_tokio::{parse_api_body, EslClient, EslError, EslEventStream, EslEventType};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::Event;

pub use freeswitch_esl_tokio::DEFAULT_ESL_PORT;

/// Events the listener subscribes to.
pub const SUBSCRIBED_EVENTS: &[EslEventType] = &[
    EslEventType::ChannelCreate,
    EslEventType::ChannelProgress,
    EslEventType::ChannelBridge,
    EslEventType::ChannelUnbridge,
    EslEventType::ChannelDestroy,
    EslEventType::ChannelHold,
    EslEventType::ChannelUnhold,
    EslEventType::ChannelPark,
    EslEventType::ChannelUnpark,
    EslEventType::RecordStart,
    EslEventType::PlaybackStart,
    EslEventType::Api,
];

/// Move events off the client queue as they arrive, normalized and tagged
/// with `pole`. The returned channel closes when the connection does.
pub fn drain_events(mut events: EslEventStream, pole: String) -> mpsc::UnboundedReceiver<Event> {
    let (tx, rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        while let Some(next) = events.recv().await {
            match next {
                Ok(event) => {
                    let event = Event::from_headers(event.headers()).with_pole(pole.as_str());
                    if tx.send(event).is_err() {
                        break;
                    }
                }
                Err(EslError::QueueFull) => {
                    warn!(event = "SWITCH_EVENTS_DROPPED", pole = %pole, "Switch event queue overflowed");
                }
                Err(e) => {
                    warn!(event = "SWITCH_EVENT_UNREADABLE", pole = %pole, error = %e, "Unreadable switch event");
                }
            }
        }
        debug!(pole = %pole, "Switch event stream ended");
    });
    rx
}

/// Run `api <command>` and return the reply body without the `+OK` prefix.
pub async fn api(client: &EslClient, command: &str) -> Result<String> {
    let response = client.api(command).await?;
    let body = parse_api_body(response.body().unwrap_or_default())?;
    Ok(body.to_string())
}

/// Queue `bgapi <command>`; returns the job id the switch assigned.
pub async fn bgapi(client: &EslClient, command: &str) -> Result<String> {
    let response = client.bgapi(command).await?.into_result()?;
    Ok(response.job_uuid().unwrap_or_default().to_string())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
    use tokio::net::TcpListener;

    use super::*;
    use crate::config::SwitchConfig;
    use crate::event::EventKind;
    use crate::switch::{SwitchGateway, SwitchHandle, SwitchPool};

    const SHOW_CALLS: &str = r#"{"row_count":1,"rows":[{"uuid":"X","b_uuid":"Y"}]}"#;

    async fn read_command(reader: &mut BufReader<OwnedReadHalf>) -> Option<String> {
        let mut command = String::new();
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await.ok()? == 0 {
                return None;
            }
            let line = line.trim_end();
            if line.is_empty() {
                if command.is_empty() {
                    continue;
                }
                return Some(command);
            }
            if !command.is_empty() {
                command.push('\n');
            }
            command.push_str(line);
        }
    }

    async fn reply(stream: &mut OwnedWriteHalf, text: &str) {
        let frame = format!("Content-Type: command/reply\nReply-Text: {}\n\n", text);
        stream.write_all(frame.as_bytes()).await.unwrap();
    }

    fn event_frame(i: usize) -> String {
        let body = format!(
            "Event-Name: CHANNEL_CREATE\nUnique-ID: leg-{}\nCaller-Caller-ID-Name: John%20Doe\n\n",
            i
        );
        format!("Content-Length: {}\nContent-Type: text/event-plain\n\n{}", body.len(), body)
    }

    /// Accepts one connection, authenticates it, acknowledges the
    /// subscription, pushes `flood` events and only then answers `api`.
    async fn fake_switch(flood: usize) -> (u16, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let task = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read);
            let mut seen = Vec::new();

            write.write_all(b"Content-Type: auth/request\n\n").await.unwrap();
            while let Some(command) = read_command(&mut reader).await {
                seen.push(command.clone());
                if command.starts_with("auth ") {
                    reply(&mut write, "+OK accepted").await;
                } else if command.starts_with("event plain") {
                    reply(&mut write, "+OK event listener enabled plain").await;
                    for i in 0..flood {
                        write.write_all(event_frame(i).as_bytes()).await.unwrap();
                    }
                } else if command.starts_with("api ") {
                    let body = if command == "api show calls as json" {
                        SHOW_CALLS.to_string()
                    } else {
                        "-ERR Command not found!\n".to_string()
                    };
                    let frame = format!(
                        "Content-Type: api/response\nContent-Length: {}\n\n{}",
                        body.len(),
                        body
                    );
                    write.write_all(frame.as_bytes()).await.unwrap();
                } else if command.starts_with("bgapi ") {
                    let frame = "Content-Type: command/reply\nReply-Text: +OK Job-UUID: 7f4db78a\nJob-UUID: 7f4db78a\n\n";
                    write.write_all(frame.as_bytes()).await.unwrap();
                } else {
                    reply(&mut write, "-ERR command not found").await;
                }
            }
            seen
        });
        (port, task)
    }

    fn switch_config(port: u16) -> SwitchConfig {
        SwitchConfig {
            pole: "paris".to_string(),
            host: "127.0.0.1".to_string(),
            port,
            password: "ClueCon".to_string(),
        }
    }

    #[tokio::test]
    async fn live_calls_answer_while_events_pile_up() {
        let (port, _server) = fake_switch(1100).await;
        let pool = SwitchPool::new(vec![switch_config(port)], 1000);
        let switch = pool.handles()[0].clone();
        let mut events = switch.connect().await.unwrap();

        // Nobody reads `events` yet, as during startup recovery.
        let tables = tokio::time::timeout(Duration::from_secs(5), pool.live_calls())
            .await
            .expect("show calls reply was not delivered");
        assert_eq!(tables.len(), 1);
        let calls = tables[0].1.as_ref().unwrap();
        assert!(calls.contains_pair("X", "Y"));

        let client = switch.client().await.unwrap();
        let mut received = 0u64;
        while received + client.dropped_event_count() < 1100 {
            let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(event.kind, EventKind::ChannelCreate);
            assert_eq!(event.pole, "paris");
            assert_eq!(event.caller_name, "John Doe");
            received += 1;
        }
        assert!(received > 0);
    }

    #[tokio::test]
    async fn bgapi_returns_the_job_id() {
        let (port, server) = fake_switch(0).await;
        let switch = SwitchHandle::new(switch_config(port), 16);
        let _events = switch.connect().await.unwrap();
        let client = switch.client().await.unwrap();

        assert_eq!(bgapi(&client, "uuid_setvar X k v").await.unwrap(), "7f4db78a");
        assert!(api(&client, "bogus").await.is_err());

        switch.disconnect().await;
        let seen = server.await.unwrap();
        assert!(seen[1].starts_with("event plain"));
        assert!(seen[1].contains("CHANNEL_CREATE"));
        assert!(seen[1].contains("PLAYBACK_START"));
        assert!(seen.contains(&"bgapi uuid_setvar X k v".to_string()));
    }

    #[tokio::test]
    async fn closed_socket_ends_the_event_channel() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read);
            write.write_all(b"Content-Type: auth/request\n\n").await.unwrap();
            read_command(&mut reader).await;
            reply(&mut write, "+OK accepted").await;
            read_command(&mut reader).await;
            reply(&mut write, "+OK event listener enabled plain").await;
            write.write_all(event_frame(1).as_bytes()).await.unwrap();
        });

        let switch = SwitchHandle::new(switch_config(port), 16);
        let mut events = switch.connect().await.unwrap();
        let first = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert_eq!(first.map(|e| e.unique_id), Some("leg-1".to_string()));
        let end = tokio::time::timeout(Duration::from_secs(5), events.recv()).await.unwrap();
        assert!(end.is_none());
    }

    #[tokio::test]
    async fn wrong_password_fails_connect() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read, mut write) = socket.into_split();
            let mut reader = BufReader::new(read);
            write.write_all(b"Content-Type: auth/request\n\n").await.unwrap();
            read_command(&mut reader).await;
            reply(&mut write, "-ERR invalid").await;
        });

        let switch = SwitchHandle::new(switch_config(port), 16);
        assert!(switch.connect().await.is_err());
        assert!(switch.client().await.is_none());
    }
}
