//! lockbox-cli: the vault client
//!
//! Holds the private key, so this is where encryption happens: small secrets
//! are encrypted whole before `Save`, files are encrypted chunk by chunk as
//! they stream out and decrypted as they stream back in.

pub mod connect;
pub mod session;
pub mod vault;

pub use connect::connect;
pub use session::Session;
pub use vault::{Secret, VaultClient};

use std::path::{Path, PathBuf};

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        path.to_path_buf()
    }
}
