use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{VaultError, VaultResult};

/// Top-level configuration (loaded from lockbox.toml), shared by client and server
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub daemon: DaemonConfig,
    pub storage: StorageConfig,
    pub transfer: TransferConfig,
    pub shutdown: ShutdownConfig,
    pub client: ClientConfig,
}

impl VaultConfig {
    /// Parse a config file. A missing file yields defaults.
    pub fn load(path: &Path) -> VaultResult<Self> {
        if !path.exists() {
            tracing::warn!(
                "config file not found: {}  (using defaults)",
                path.display()
            );
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| VaultError::Config(format!("reading config {}: {e}", path.display())))?;
        toml::from_str(&content)
            .map_err(|e| VaultError::Config(format!("parsing config {}: {e}", path.display())))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Unix socket path for gRPC (default: /run/lockboxd/lockboxd.sock)
    pub socket: PathBuf,
    /// TCP listen address; takes precedence over the socket when set
    pub listen: Option<String>,
    /// Prometheus metrics endpoint (default: 127.0.0.1:9190)
    pub metrics_addr: Option<String>,
    /// Log level (default: info)
    pub log_level: String,
    /// Log format: "json" or "text"
    pub log_format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON database of resource records and users
    pub db_path: PathBuf,
    /// Directory holding encrypted file blobs, one per record id
    pub blob_dir: PathBuf,
    /// Largest blob the server will accept or serve, in bytes
    pub max_blob_size: u64,
}

/// Chunked transfer tuning. `chunk_size` and `max_file_size` are independent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Read buffer size per chunk, in bytes
    pub chunk_size: usize,
    /// Largest local file accepted for upload, in bytes
    pub max_file_size: u64,
    /// How long a producer waits for the consumer to accept one chunk
    pub handoff_timeout_secs: u64,
}

impl TransferConfig {
    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_secs(self.handoff_timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShutdownConfig {
    /// Bound on draining in-flight transfers before forced exit
    pub timeout_secs: u64,
    /// Keep admitting new transfers while draining (default: reject)
    pub admit_during_shutdown: bool,
}

impl ShutdownConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Daemon Unix socket (default: /run/lockboxd/lockboxd.sock)
    pub socket: PathBuf,
    /// Remote endpoint (e.g. http://vault.example.com:42000); overrides socket
    pub endpoint: Option<String>,
    /// PEM private key; without it payloads are sent unencrypted
    pub private_key: Option<PathBuf>,
    /// Where the bearer token from `login` is kept
    pub token_file: PathBuf,
    /// Destination directory for downloaded files
    pub download_dir: PathBuf,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/lockboxd/lockboxd.sock"),
            listen: None,
            metrics_addr: Some("127.0.0.1:9190".into()),
            log_level: "info".into(),
            log_format: "json".into(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("/var/lib/lockboxd/db.json"),
            blob_dir: PathBuf::from("/var/lib/lockboxd/blobs"),
            max_blob_size: 256 * 1024 * 1024,
        }
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size: 64 * 1024,
            max_file_size: 64 * 1024 * 1024,
            handoff_timeout_secs: 60,
        }
    }
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 60,
            admit_during_shutdown: false,
        }
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            socket: PathBuf::from("/run/lockboxd/lockboxd.sock"),
            endpoint: None,
            private_key: None,
            token_file: PathBuf::from("~/.config/lockbox/token"),
            download_dir: PathBuf::from("."),
        }
    }
}
