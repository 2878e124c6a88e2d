// live-sessions-service/src/app.rs
use crate::config::AppConfig;
use crate::directory::{NumberDirectory, StaticDirectory};
use crate::error::ServiceError;
use crate::grpc::proto::sessions_service_server::SessionsServiceServer;
use crate::grpc::service::MySessionsService;
use crate::sessions::{RedisSnapshotStore, SessionStore};
use crate::switch::engine::SessionEngine;
use crate::switch::server::{RetryPolicy, SwitchListener};
use crate::switch::SwitchPool;
use anyhow::{Context, Result};
use hyper::{
    service::{make_service_fn, service_fn},
    Body, Request, Response, Server as HttpServer, StatusCode,
};
use std::convert::Infallible;
use std::env;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};
use tonic::transport::Server as GrpcServer;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Registry};

const HEALTH_BODY: &str = r#"{"status":"ok","service":"live-sessions-service"}"#;

pub struct App {
    config: Arc<AppConfig>,
}

async fn handle_http_request(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    let mut response = Response::new(Body::from(HEALTH_BODY));
    *response.status_mut() = StatusCode::OK;
    response
        .headers_mut()
        .insert(hyper::header::CONTENT_TYPE, hyper::header::HeaderValue::from_static("application/json"));
    Ok(response)
}

impl App {
    pub async fn bootstrap() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Arc::new(AppConfig::load_from_env().context("Configuration could not be loaded")?);

        let rust_log_env = env::var("RUST_LOG").unwrap_or_else(|_| config.rust_log.clone());
        let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&rust_log_env))?;
        let subscriber = Registry::default().with(env_filter);

        if config.env == "development" {
            subscriber.with(fmt::layer().with_target(true).with_line_number(true)).init();
        } else {
            subscriber.with(fmt::layer().json().with_current_span(true).with_span_list(true)).init();
        }

        info!(
            service_name = "live-sessions-service",
            version = %config.service_version,
            profile = %config.env,
            switches = config.switches.len(),
            "🚀 Service starting..."
        );
        Ok(Self { config })
    }

    pub async fn run(self) -> Result<()> {
        let (grpc_shutdown_tx, grpc_shutdown_rx) = oneshot::channel::<()>();
        let (http_shutdown_tx, http_shutdown_rx) = oneshot::channel::<()>();
        let (switch_shutdown_tx, switch_shutdown_rx) = watch::channel(false);
        let (fatal_tx, mut fatal_rx) = mpsc::unbounded_channel::<ServiceError>();

        // 1. Snapshot store & session table
        let snapshots = RedisSnapshotStore::new(&self.config.redis_url, self.config.snapshot_key.clone())
            .await
            .context("Snapshot store unreachable")?;
        let store = SessionStore::new(Arc::new(snapshots));

        // 2. Switches & engine
        let pool = SwitchPool::new(self.config.switches.clone(), self.config.switch_event_queue);
        let mut engine = SessionEngine::new(store, Arc::new(pool.clone()));
        if let Some(path) = &self.config.number_directory_path {
            let directory = StaticDirectory::load(path).await?;
            info!(path = %path, entries = directory.len(), "📒 Number directory loaded");
            engine = engine.with_directory(Arc::new(directory) as Arc<dyn NumberDirectory>);
        }
        let engine = Arc::new(engine);

        // 3. Connect every switch before recovery; the listeners start afterwards
        //    so buffered events apply on top of the restored table.
        let mut initial_streams = Vec::with_capacity(pool.handles().len());
        for switch in pool.handles() {
            match switch.connect().await {
                Ok(events) => initial_streams.push(Some(events)),
                Err(e) => {
                    warn!(event = "SWITCH_CONNECT_FAILED", pole = %switch.pole(), error = %e, "Switch unreachable at startup, will retry");
                    initial_streams.push(None);
                }
            }
        }

        let restored = engine.restore().await.context("Session recovery failed")?;
        info!(restored, "Session table ready");

        // 4. Switch listeners
        let retry = RetryPolicy {
            limit: self.config.switch_retry_limit,
            max_delay: self.config.switch_backoff_max,
        };
        let mut listener_handles = Vec::new();
        for (switch, events) in pool.handles().iter().zip(initial_streams) {
            let listener = SwitchListener::new(switch.clone(), engine.clone(), fatal_tx.clone(), retry);
            let shutdown_rx = switch_shutdown_rx.clone();
            listener_handles.push(tokio::spawn(async move {
                listener.run(events, shutdown_rx).await;
            }));
        }
        drop(fatal_tx);

        // 5. gRPC Server
        let grpc_config = self.config.clone();
        let grpc_engine = engine.clone();
        let grpc_server_handle = tokio::spawn(async move {
            let grpc_service = MySessionsService::new(grpc_engine);

            info!(address = %grpc_config.grpc_listen_addr, "gRPC server starting...");

            GrpcServer::builder()
                .timeout(grpc_config.grpc_request_timeout)
                .add_service(SessionsServiceServer::new(grpc_service))
                .serve_with_shutdown(grpc_config.grpc_listen_addr, async {
                    grpc_shutdown_rx.await.ok();
                })
                .await
                .context("gRPC server crashed")
        });

        // 6. HTTP Server
        let http_config = self.config.clone();
        let http_server_handle = tokio::spawn(async move {
            let addr = http_config.http_listen_addr;
            let make_svc = make_service_fn(|_conn| async {
                Ok::<_, Infallible>(service_fn(handle_http_request))
            });
            let server = HttpServer::bind(&addr).serve(make_svc).with_graceful_shutdown(async {
                http_shutdown_rx.await.ok();
            });
            info!(address = %addr, "HTTP health check active.");
            if let Err(e) = server.await {
                error!(error = %e, "HTTP server error");
            }
        });

        let ctrl_c = async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Ctrl+C handler failed");
                std::future::pending::<()>().await;
            }
        };

        let mut failure: Option<anyhow::Error> = None;
        tokio::select! {
            res = grpc_server_handle => {
                match res {
                    Ok(Ok(())) => warn!("gRPC server stopped"),
                    Ok(Err(e)) => failure = Some(e),
                    Err(e) => failure = Some(e.into()),
                }
            },
            _ = http_server_handle => { error!("HTTP server stopped"); },
            Some(e) = fatal_rx.recv() => {
                error!(event = "FATAL", error = %e, "💥 Unrecoverable snapshot store failure, shutting down");
                failure = Some(e.into());
            },
            _ = ctrl_c => { warn!("Shutdown signal received."); },
        }

        let _ = switch_shutdown_tx.send(true);
        let _ = grpc_shutdown_tx.send(());
        let _ = http_shutdown_tx.send(());
        for handle in listener_handles {
            let _ = handle.await;
        }

        info!("Service stopped.");
        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn health_endpoint_reports_ok() {
        let response = handle_http_request(Request::new(Body::empty())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = hyper::body::to_bytes(response.into_body()).await.unwrap();
        assert_eq!(&body[..], HEALTH_BODY.as_bytes());
    }
}
