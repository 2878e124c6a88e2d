// live-sessions-service/src/grpc/mod.rs

pub mod proto {
    tonic::include_proto!("sessions.v1");
}

pub mod service;
