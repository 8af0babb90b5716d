use std::path::PathBuf;
use std::time::Duration;

use lockbox_core::VaultError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("file processing {path}: {source}")]
    FileProcessing {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {size} bytes exceeds the {max} byte limit")]
    TooLarge { path: PathBuf, size: u64, max: u64 },

    #[error("no chunk handoff within {0:?}")]
    Timeout(Duration),

    #[error("transfer aborted: {0}")]
    Aborted(String),

    #[error("transfer task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl TransferError {
    pub(crate) fn file(path: &std::path::Path, source: std::io::Error) -> Self {
        TransferError::FileProcessing {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl From<TransferError> for VaultError {
    fn from(err: TransferError) -> Self {
        match err {
            TransferError::Timeout(d) => VaultError::Timeout(d),
            TransferError::Aborted(_) => VaultError::Stream(err.to_string()),
            other => VaultError::FileProcessing(other.to_string()),
        }
    }
}
