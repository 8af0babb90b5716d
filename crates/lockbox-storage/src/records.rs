//! Resource records, scoped per owner

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use lockbox_core::types::{RecordId, ResourceDescription, ResourceKind, ResourceRecord, UserId};
use lockbox_core::{VaultError, VaultResult};

use crate::persist;

/// Persistence collaborator for resource records.
///
/// Every lookup is scoped to an owner: an id that exists but belongs to
/// someone else is indistinguishable from a missing one (`NotFound`).
pub trait ResourceStore: Send + Sync {
    /// Insert a new record; the `id` field is ignored and a fresh id returned.
    fn create(&self, record: ResourceRecord) -> VaultResult<RecordId>;

    /// Replace kind, meta and data of an existing record owned by `record.owner_id`.
    fn update(&self, record: ResourceRecord) -> VaultResult<()>;

    fn get(&self, id: RecordId, owner: UserId) -> VaultResult<ResourceRecord>;

    /// Remove and return the record, so callers can clean up what hangs off it.
    fn delete(&self, id: RecordId, owner: UserId) -> VaultResult<ResourceRecord>;

    /// Descriptions of the owner's records, ordered by id. `None` lists every kind.
    fn list_by_kind(
        &self,
        owner: UserId,
        kind: Option<ResourceKind>,
    ) -> VaultResult<Vec<ResourceDescription>>;
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct RecordTable {
    next_id: RecordId,
    records: BTreeMap<RecordId, ResourceRecord>,
}

/// In-memory record table, optionally mirrored to a JSON file
#[derive(Debug)]
pub struct RecordStore {
    path: Option<PathBuf>,
    table: RwLock<RecordTable>,
}

impl RecordStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: RwLock::new(RecordTable::default()),
        }
    }

    /// Load the table at `path`, starting empty if it does not exist.
    pub fn open(path: &Path) -> VaultResult<Self> {
        let table: RecordTable = persist::load_or_default(path).map_err(persist::storage_error)?;
        tracing::debug!(path = %path.display(), records = table.records.len(), "record store opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            table: RwLock::new(table),
        })
    }

    pub fn len(&self) -> usize {
        self.read().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn read(&self) -> RwLockReadGuard<'_, RecordTable> {
        self.table.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, RecordTable> {
        self.table.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Persist `next` and only then make it the live table, so a failed
    /// write leaves memory matching what is on disk.
    fn commit(&self, table: &mut RecordTable, next: RecordTable) -> VaultResult<()> {
        if let Some(path) = &self.path {
            persist::write_atomic(path, &next).map_err(persist::storage_error)?;
        }
        *table = next;
        Ok(())
    }
}

impl ResourceStore for RecordStore {
    fn create(&self, mut record: ResourceRecord) -> VaultResult<RecordId> {
        let mut table = self.write();
        let mut next = table.clone();
        next.next_id += 1;
        let id = next.next_id;
        record.id = id;
        next.records.insert(id, record);
        self.commit(&mut table, next)?;
        Ok(id)
    }

    fn update(&self, record: ResourceRecord) -> VaultResult<()> {
        let mut table = self.write();
        let mut next = table.clone();
        match next.records.get_mut(&record.id) {
            Some(existing) if existing.owner_id == record.owner_id => {
                existing.kind = record.kind;
                existing.meta = record.meta;
                existing.data = record.data;
            }
            _ => return Err(VaultError::NotFound),
        }
        self.commit(&mut table, next)
    }

    fn get(&self, id: RecordId, owner: UserId) -> VaultResult<ResourceRecord> {
        self.read()
            .records
            .get(&id)
            .filter(|r| r.owner_id == owner)
            .cloned()
            .ok_or(VaultError::NotFound)
    }

    fn delete(&self, id: RecordId, owner: UserId) -> VaultResult<ResourceRecord> {
        let mut table = self.write();
        if table.records.get(&id).map(|r| r.owner_id) != Some(owner) {
            return Err(VaultError::NotFound);
        }
        let mut next = table.clone();
        let removed = next.records.remove(&id).ok_or(VaultError::NotFound)?;
        self.commit(&mut table, next)?;
        Ok(removed)
    }

    fn list_by_kind(
        &self,
        owner: UserId,
        kind: Option<ResourceKind>,
    ) -> VaultResult<Vec<ResourceDescription>> {
        Ok(self
            .read()
            .records
            .values()
            .filter(|r| r.owner_id == owner && kind.is_none_or(|k| r.kind == k))
            .map(ResourceRecord::description)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(owner: UserId, kind: ResourceKind, meta: &str) -> ResourceRecord {
        ResourceRecord {
            id: 0,
            owner_id: owner,
            kind,
            meta: meta.as_bytes().to_vec(),
            data: vec![0xAB; 256],
        }
    }

    #[test]
    fn test_create_assigns_increasing_ids() {
        let store = RecordStore::in_memory();
        let a = store.create(record(1, ResourceKind::LoginPassword, "a")).unwrap();
        let b = store.create(record(1, ResourceKind::BankCard, "b")).unwrap();
        assert!(b > a);
        assert_eq!(store.get(a, 1).unwrap().meta, b"a");
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_foreign_owner_is_not_found() {
        let store = RecordStore::in_memory();
        let id = store.create(record(1, ResourceKind::LoginPassword, "mine")).unwrap();

        assert!(matches!(store.get(id, 2), Err(VaultError::NotFound)));
        assert!(matches!(store.delete(id, 2), Err(VaultError::NotFound)));
        let mut hijack = record(2, ResourceKind::LoginPassword, "stolen");
        hijack.id = id;
        assert!(matches!(store.update(hijack), Err(VaultError::NotFound)));

        assert_eq!(store.get(id, 1).unwrap().meta, b"mine");
        assert!(matches!(store.get(999, 1), Err(VaultError::NotFound)));
    }

    #[test]
    fn test_update_replaces_payload() {
        let store = RecordStore::in_memory();
        let id = store.create(record(1, ResourceKind::BankCard, "old")).unwrap();
        let mut updated = record(1, ResourceKind::BankCard, "new");
        updated.id = id;
        updated.data = vec![1, 2, 3];
        store.update(updated).unwrap();

        let got = store.get(id, 1).unwrap();
        assert_eq!(got.meta, b"new");
        assert_eq!(got.data, vec![1, 2, 3]);
    }

    #[test]
    fn test_list_by_kind() {
        let store = RecordStore::in_memory();
        store.create(record(1, ResourceKind::LoginPassword, "lp1")).unwrap();
        store.create(record(1, ResourceKind::File, "fl1")).unwrap();
        store.create(record(1, ResourceKind::LoginPassword, "lp2")).unwrap();
        store.create(record(2, ResourceKind::LoginPassword, "other")).unwrap();

        let lps = store.list_by_kind(1, Some(ResourceKind::LoginPassword)).unwrap();
        assert_eq!(
            lps.iter().map(|d| d.meta.as_slice()).collect::<Vec<_>>(),
            vec![b"lp1".as_slice(), b"lp2".as_slice()]
        );
        assert_eq!(store.list_by_kind(1, None).unwrap().len(), 3);
        assert!(store.list_by_kind(3, None).unwrap().is_empty());
    }

    #[test]
    fn test_delete_returns_record() {
        let store = RecordStore::in_memory();
        let id = store.create(record(1, ResourceKind::File, "f")).unwrap();
        let removed = store.delete(id, 1).unwrap();
        assert_eq!(removed.kind, ResourceKind::File);
        assert!(store.is_empty());
        assert!(matches!(store.delete(id, 1), Err(VaultError::NotFound)));
    }

    #[test]
    fn test_persistence_survives_reopen() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("state").join("db.json");

        let id = {
            let store = RecordStore::open(&path).unwrap();
            store.create(record(7, ResourceKind::BankCard, "card")).unwrap()
        };

        let reopened = RecordStore::open(&path).unwrap();
        assert_eq!(reopened.get(id, 7).unwrap().meta, b"card");
        // ids keep increasing after reopen
        let next = reopened.create(record(7, ResourceKind::BankCard, "card2")).unwrap();
        assert!(next > id);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_failed_flush_leaves_no_record_behind() {
        let tmp = tempfile::TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        std::fs::write(&blocker, b"").unwrap();

        let store = RecordStore::open(&blocker.join("db.json")).unwrap();
        assert!(matches!(
            store.create(record(1, ResourceKind::LoginPassword, "ghost")),
            Err(VaultError::Storage(_))
        ));
        assert!(store.is_empty());
        assert!(store.list_by_kind(1, None).unwrap().is_empty());
        assert!(matches!(store.get(1, 1), Err(VaultError::NotFound)));
    }

    #[test]
    fn test_failed_flush_keeps_update_and_delete_unapplied() {
        let tmp = tempfile::TempDir::new().unwrap();
        let dir = tmp.path().join("state");
        let store = RecordStore::open(&dir.join("db.json")).unwrap();
        let id = store.create(record(1, ResourceKind::BankCard, "card")).unwrap();

        // the parent directory turns into a file, so every later write fails
        std::fs::remove_dir_all(&dir).unwrap();
        std::fs::write(&dir, b"").unwrap();

        let mut changed = record(1, ResourceKind::BankCard, "changed");
        changed.id = id;
        assert!(matches!(store.update(changed), Err(VaultError::Storage(_))));
        assert!(matches!(store.delete(id, 1), Err(VaultError::Storage(_))));
        assert!(matches!(
            store.create(record(1, ResourceKind::BankCard, "more")),
            Err(VaultError::Storage(_))
        ));

        assert_eq!(store.get(id, 1).unwrap().meta, b"card");
        assert_eq!(store.len(), 1);

        // once the directory is back, ids continue from the last committed one
        std::fs::remove_file(&dir).unwrap();
        let next = store.create(record(1, ResourceKind::BankCard, "again")).unwrap();
        assert_eq!(next, id + 1);
    }

    #[test]
    fn test_open_rejects_corrupt_file() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("db.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(RecordStore::open(&path), Err(VaultError::Storage(_))));
    }
}
