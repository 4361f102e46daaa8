//! Durable snapshot of the task registry.
//!
//! A single [`BackupWriter`] owns the snapshot file. Everything else sends it
//! commands through a cloneable [`BackupHandle`], so the file is never
//! read-modify-written concurrently.

mod handle;
mod store;
mod writer;

pub use handle::{BackupCommand, BackupHandle};
pub use store::{BackupDocument, BackupError, BackupStore, JsonFileBackupStore};
pub use writer::{create_backup_system, BackupWriter};

pub(crate) use store::{read_json_or_default, write_json_atomic};
