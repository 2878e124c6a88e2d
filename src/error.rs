// live-sessions-service/src/error.rs
use freeswitch_esl_tokio::EslError;
use thiserror::Error;
use tonic::Status;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] anyhow::Error),
    #[error("Snapshot store error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Event socket error: {0}")]
    Esl(#[from] EslError),
    #[error("Switch '{0}' is not connected")]
    SwitchUnavailable(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Durable store failures stop the process: the snapshot is the only
    /// thing that survives a restart.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ServiceError::Redis(_) | ServiceError::Serialization(_))
    }
}

impl From<ServiceError> for Status {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Esl(EslError::CommandFailed { reply_text }) => Status::failed_precondition(reply_text),
            ServiceError::Esl(_) | ServiceError::SwitchUnavailable(_) => {
                Status::unavailable(format!("Switch unavailable: {}", err))
            }
            _ => Status::internal(format!("{:#?}", err)),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
