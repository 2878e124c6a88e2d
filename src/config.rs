// live-sessions-service/src/config.rs
use anyhow::{bail, Context, Result};
use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use crate::switch::esl::DEFAULT_ESL_PORT;

/// One switch to follow: its pole name and event-socket endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchConfig {
    pub pole: String,
    pub host: String,
    pub port: u16,
    pub password: String,
}

impl SwitchConfig {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub grpc_listen_addr: SocketAddr,
    pub http_listen_addr: SocketAddr,
    pub grpc_request_timeout: Duration,

    // Snapshot store
    pub redis_url: String,
    pub snapshot_key: String,

    // Switches
    pub switches: Vec<SwitchConfig>,
    pub switch_retry_limit: u32,
    pub switch_backoff_max: Duration,
    pub switch_event_queue: usize,

    // Number classification
    pub number_directory_path: Option<String>,

    pub env: String,
    pub rust_log: String,
    pub service_version: String,
}

impl AppConfig {
    pub fn load_from_env() -> Result<Self> {
        let grpc_port = env::var("SESSIONS_SERVICE_GRPC_PORT").unwrap_or_else(|_| "13091".to_string());
        let http_port = env::var("SESSIONS_SERVICE_HTTP_PORT").unwrap_or_else(|_| "13090".to_string());

        let grpc_addr: SocketAddr = format!("[::]:{}", grpc_port).parse().context("Invalid gRPC port")?;
        let http_addr: SocketAddr = format!("[::]:{}", http_port).parse().context("Invalid HTTP port")?;

        let timeout_secs = env::var("GRPC_REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "5".to_string())
            .parse::<u64>()
            .context("Invalid GRPC_REQUEST_TIMEOUT_SECS")?;

        let password = env::var("FREESWITCH_ESL_PASSWORD").unwrap_or_else(|_| "ClueCon".to_string());
        let targets = env::var("FREESWITCH_TARGETS").context("REQUIRED: FREESWITCH_TARGETS")?;
        let switches = parse_switch_targets(&targets, &password)?;

        let switch_retry_limit = env::var("FREESWITCH_RETRY_LIMIT")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u32>()
            .context("Invalid FREESWITCH_RETRY_LIMIT")?;
        let backoff_max_secs = env::var("FREESWITCH_BACKOFF_MAX_SECS")
            .unwrap_or_else(|_| "30".to_string())
            .parse::<u64>()
            .context("Invalid FREESWITCH_BACKOFF_MAX_SECS")?;
        let switch_event_queue = env::var("FREESWITCH_EVENT_QUEUE_SIZE")
            .unwrap_or_else(|_| "1000".to_string())
            .parse::<usize>()
            .context("Invalid FREESWITCH_EVENT_QUEUE_SIZE")?;
        if switch_event_queue == 0 {
            bail!("FREESWITCH_EVENT_QUEUE_SIZE must be positive");
        }

        Ok(AppConfig {
            grpc_listen_addr: grpc_addr,
            http_listen_addr: http_addr,
            grpc_request_timeout: Duration::from_secs(timeout_secs),

            redis_url: env::var("REDIS_URL").context("REQUIRED: REDIS_URL")?,
            snapshot_key: env::var("SESSIONS_SNAPSHOT_KEY").unwrap_or_else(|_| "live_sessions".to_string()),

            switches,
            switch_retry_limit,
            switch_backoff_max: Duration::from_secs(backoff_max_secs),
            switch_event_queue,

            number_directory_path: env::var("NUMBER_DIRECTORY_PATH").ok().filter(|p| !p.is_empty()),

            env: env::var("ENV").unwrap_or_else(|_| "production".to_string()),
            rust_log: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            service_version: env::var("SERVICE_VERSION").unwrap_or_else(|_| "1.0.0".to_string()),
        })
    }
}

/// `pole=host:port,pole2=host2` → switch list. A missing port means the
/// default event-socket port; a missing pole is named after the host.
pub fn parse_switch_targets(raw: &str, password: &str) -> Result<Vec<SwitchConfig>> {
    let mut switches: Vec<SwitchConfig> = Vec::new();
    for item in raw.split(',').map(str::trim).filter(|item| !item.is_empty()) {
        let (pole, endpoint) = match item.split_once('=') {
            Some((pole, endpoint)) => (pole.trim().to_string(), endpoint.trim()),
            None => (String::new(), item),
        };
        if endpoint.is_empty() {
            bail!("Switch target '{}' has no address", item);
        }
        let (host, port) = match endpoint.rsplit_once(':') {
            Some((host, port)) => {
                let port = port
                    .parse::<u16>()
                    .with_context(|| format!("Invalid port in switch target '{}'", item))?;
                (host.to_string(), port)
            }
            None => (endpoint.to_string(), DEFAULT_ESL_PORT),
        };
        if host.is_empty() {
            bail!("Switch target '{}' has no host", item);
        }
        let pole = if pole.is_empty() { host.clone() } else { pole };
        if switches.iter().any(|s| s.pole == pole) {
            bail!("Switch pole '{}' is configured twice", pole);
        }
        switches.push(SwitchConfig {
            pole,
            host,
            port,
            password: password.to_string(),
        });
    }
    if switches.is_empty() {
        bail!("No switch target configured");
    }
    Ok(switches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_named_targets() {
        let switches = parse_switch_targets("paris=10.0.0.1:8021, lyon=fs-lyon", "secret").unwrap();
        assert_eq!(
            switches,
            vec![
                SwitchConfig {
                    pole: "paris".into(),
                    host: "10.0.0.1".into(),
                    port: 8021,
                    password: "secret".into()
                },
                SwitchConfig {
                    pole: "lyon".into(),
                    host: "fs-lyon".into(),
                    port: 8021,
                    password: "secret".into()
                },
            ]
        );
    }

    #[test]
    fn unnamed_target_uses_host_as_pole() {
        let switches = parse_switch_targets("fs1:9000", "ClueCon").unwrap();
        assert_eq!(switches[0].pole, "fs1");
        assert_eq!(switches[0].host, "fs1");
        assert_eq!(switches[0].port, 9000);
        assert_eq!(switches[0].addr(), "fs1:9000");
    }

    #[test]
    fn rejects_empty_and_duplicate_targets() {
        assert!(parse_switch_targets(" , ", "x").is_err());
        assert!(parse_switch_targets("paris=", "x").is_err());
        assert!(parse_switch_targets("paris=a,paris=b", "x").is_err());
        assert!(parse_switch_targets("paris=fs1:eighty", "x").is_err());
        assert!(parse_switch_targets("paris=:8021", "x").is_err());
    }
}
