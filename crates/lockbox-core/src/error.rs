use std::time::Duration;

use thiserror::Error;
use tonic::{Code, Status};

pub type VaultResult<T> = Result<T, VaultError>;

#[derive(Debug, Error)]
pub enum VaultError {
    #[error("crypto error: {0}")]
    Crypto(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("file processing error: {0}")]
    FileProcessing(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("resource not found")]
    NotFound,

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("transfer stalled: no handoff within {0:?}")]
    Timeout(Duration),

    #[error("unauthenticated: {0}")]
    Unauthenticated(String),

    #[error("shutdown in progress: new operations are not admitted")]
    ShuttingDown,

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("gRPC error: {0}")]
    Grpc(#[from] Status),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl VaultError {
    /// Map a status received from the server back onto the taxonomy.
    ///
    /// Only the codes the server emits deliberately are mapped; anything else
    /// stays wrapped as `Grpc` so the original message is kept.
    pub fn from_status(status: Status) -> Self {
        match status.code() {
            Code::NotFound => VaultError::NotFound,
            Code::AlreadyExists => VaultError::AlreadyExists(status.message().to_string()),
            Code::Unauthenticated => VaultError::Unauthenticated(status.message().to_string()),
            Code::InvalidArgument => VaultError::InvalidArgument(status.message().to_string()),
            Code::Unavailable if status.message().contains("shutdown") => VaultError::ShuttingDown,
            _ => VaultError::Grpc(status),
        }
    }
}

impl From<VaultError> for Status {
    fn from(err: VaultError) -> Self {
        match err {
            VaultError::NotFound => Status::not_found(err.to_string()),
            VaultError::AlreadyExists(_) => Status::already_exists(err.to_string()),
            VaultError::Unauthenticated(_) => Status::unauthenticated(err.to_string()),
            VaultError::InvalidArgument(_) => Status::invalid_argument(err.to_string()),
            VaultError::ShuttingDown => Status::unavailable(err.to_string()),
            VaultError::Timeout(_) => Status::deadline_exceeded(err.to_string()),
            VaultError::Grpc(status) => status,
            other => Status::internal(other.to_string()),
        }
    }
}
