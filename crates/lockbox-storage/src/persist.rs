//! JSON table files, flushed atomically via temp+rename

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

use lockbox_core::VaultError;

/// Load a table, or its default if the file does not exist yet.
pub(crate) fn load_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    if !path.exists() {
        return Ok(T::default());
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
}

pub(crate) fn write_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating dir: {}", parent.display()))?;
    }

    let json = serde_json::to_string_pretty(value).context("serializing table")?;

    let tmp_path = path.with_extension("tmp");
    std::fs::write(&tmp_path, &json)
        .with_context(|| format!("writing temp: {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("renaming into place: {}", path.display()))?;
    Ok(())
}

pub(crate) fn storage_error(err: anyhow::Error) -> VaultError {
    VaultError::Storage(format!("{err:#}"))
}
