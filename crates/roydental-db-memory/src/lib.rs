//! In-memory storage backend for the RoyDental data-access layer.
//!
//! This crate provides an in-memory implementation of the `RecordStore` trait
//! from `roydental-storage`. It is used by tests and by the `roydental`
//! binary when no PostgreSQL URL is configured.
//!
//! # Example
//!
//! ```ignore
//! use roydental_db_memory::InMemoryStorage;
//! use roydental_storage::{RecordStore, StoredRecord};
//!
//! let storage = InMemoryStorage::new();
//! let id = storage.next_value("doctor_id_seq").await?;
//! storage
//!     .insert("doctor", &StoredRecord::new(format!("DR-{id:06}"), None, doctor_json))
//!     .await?;
//! ```

mod storage;
mod transaction;

// Re-export the RecordStore trait for convenience
pub use roydental_storage::{RecordStore, StorageError, StoredRecord};

pub use storage::InMemoryStorage;
pub use transaction::MemoryTransaction;

/// Creates a new shareable in-memory store.
pub fn create_memory_store() -> roydental_storage::DynStore {
    std::sync::Arc::new(InMemoryStorage::new())
}
