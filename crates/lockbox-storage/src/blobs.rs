//! File blob placement. Each File record's ciphertext lives at a path derived
//! only from the record id, under an injected root.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use lockbox_core::types::RecordId;
use lockbox_core::{VaultError, VaultResult};

#[derive(Debug, Clone)]
pub struct BlobLayout {
    root: PathBuf,
}

impl BlobLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Create the root directory if needed.
    pub async fn ensure(&self) -> VaultResult<()> {
        tokio::fs::create_dir_all(&self.root).await.map_err(|e| {
            VaultError::Storage(format!("creating blob dir {}: {e}", self.root.display()))
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, id: RecordId) -> PathBuf {
        self.root.join(format!("{id}.blob"))
    }

    /// Remove the blob for `id`; a blob that was never written is not an error.
    pub async fn remove(&self, id: RecordId) -> VaultResult<()> {
        match tokio::fs::remove_file(self.path_for(id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(VaultError::Storage(format!("removing blob {id}: {e}"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    #[test]
    fn test_path_is_derived_from_id() {
        let layout = BlobLayout::new("/srv/blobs");
        assert_eq!(layout.path_for(42), PathBuf::from("/srv/blobs/42.blob"));
        assert_ne!(layout.path_for(1), layout.path_for(11));
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let tmp = tempfile::TempDir::new().unwrap();
        let layout = BlobLayout::new(tmp.path().join("blobs"));
        assert_ok!(layout.ensure().await);

        std::fs::write(layout.path_for(3), b"ciphertext").unwrap();
        assert_ok!(layout.remove(3).await);
        assert!(!layout.path_for(3).exists());
        assert_ok!(layout.remove(3).await);
    }
}
