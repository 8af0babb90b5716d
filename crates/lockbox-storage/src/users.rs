//! Registered principals

use argon2::{Algorithm, Argon2, Params, Version};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use lockbox_core::types::UserId;
use lockbox_core::{VaultError, VaultResult};

use crate::persist;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct UserEntry {
    id: UserId,
    /// PHC string (`$argon2id$v=19$...`)
    password_hash: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct UserTable {
    next_id: UserId,
    users: BTreeMap<String, UserEntry>,
}

pub struct UserStore {
    path: Option<PathBuf>,
    table: RwLock<UserTable>,
    params: Params,
}

impl UserStore {
    pub fn in_memory() -> Self {
        Self {
            path: None,
            table: RwLock::new(UserTable::default()),
            params: Params::default(),
        }
    }

    pub fn open(path: &Path) -> VaultResult<Self> {
        let table: UserTable = persist::load_or_default(path).map_err(persist::storage_error)?;
        tracing::debug!(path = %path.display(), users = table.users.len(), "user store opened");
        Ok(Self {
            path: Some(path.to_path_buf()),
            table: RwLock::new(table),
            params: Params::default(),
        })
    }

    /// Override the Argon2id cost parameters used for new hashes.
    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    /// Users file kept next to the record database: `db.json` -> `db.users.json`.
    pub fn path_beside(db_path: &Path) -> PathBuf {
        db_path.with_extension("users.json")
    }

    /// Create a principal. `AlreadyExists` if the login is taken.
    pub fn register(&self, login: &str, password: &SecretString) -> VaultResult<UserId> {
        if login.is_empty() {
            return Err(VaultError::InvalidArgument("empty login".into()));
        }
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = self
            .hasher()
            .hash_password(password.expose_secret().as_bytes(), &salt)
            .map_err(|e| VaultError::Storage(format!("hashing password: {e}")))?
            .to_string();

        let mut table = self.table.write().unwrap_or_else(PoisonError::into_inner);
        if table.users.contains_key(login) {
            return Err(VaultError::AlreadyExists(format!("login '{login}'")));
        }
        let mut next = table.clone();
        next.next_id += 1;
        let id = next.next_id;
        next.users.insert(login.to_string(), UserEntry { id, password_hash });
        if let Some(path) = &self.path {
            persist::write_atomic(path, &next).map_err(persist::storage_error)?;
        }
        *table = next;
        tracing::info!(user_id = id, "user registered");
        Ok(id)
    }

    /// Check credentials; `Unauthenticated` for an unknown login or a wrong password.
    pub fn verify(&self, login: &str, password: &SecretString) -> VaultResult<UserId> {
        let entry = self
            .table
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .users
            .get(login)
            .cloned();
        let rejected = || VaultError::Unauthenticated("invalid login or password".into());

        let entry = entry.ok_or_else(rejected)?;
        let parsed = PasswordHash::new(&entry.password_hash)
            .map_err(|e| VaultError::Storage(format!("stored hash for '{login}': {e}")))?;
        self.hasher()
            .verify_password(password.expose_secret().as_bytes(), &parsed)
            .map_err(|_| rejected())?;
        Ok(entry.id)
    }

    fn hasher(&self) -> Argon2<'static> {
        Argon2::new(Algorithm::Argon2id, Version::V0x13, self.params.clone())
    }
}

impl std::fmt::Debug for UserStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}
