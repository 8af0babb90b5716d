//! lockbox-storage: what the server keeps
//!
//! - [`records`]: resource records (`ResourceStore` trait + JSON-backed `RecordStore`)
//! - [`users`]: registered principals with Argon2id password hashes
//! - [`blobs`]: where encrypted file payloads live, one file per record id
//!
//! Record and user tables are held in memory and flushed to JSON on every
//! change with an atomic write (temp file + rename).

pub mod blobs;
mod persist;
pub mod records;
pub mod users;

pub use blobs::BlobLayout;
pub use records::{RecordStore, ResourceStore};
pub use users::UserStore;
