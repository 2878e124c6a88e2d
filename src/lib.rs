// live-sessions-service/src/lib.rs
pub mod app;
pub mod config;
pub mod directory;
pub mod error;
pub mod event;
pub mod grpc;
pub mod sessions;
pub mod switch;
