//! # roydental-storage
//!
//! Backing-store abstraction for the RoyDental data-access layer.
//!
//! This crate defines the traits and types that all storage backends must implement.
//! It does not contain any implementations - those are provided by separate crates
//! (`roydental-db-memory`, `roydental-db-postgres`).
//!
//! ## Overview
//!
//! The main trait is [`RecordStore`], which defines the contract for:
//! - CRUD operations with equality [`Filter`] predicates
//! - Upserts that merge only the allowed columns
//! - Per-namespace sequence counters
//! - Multi-record [`Transaction`]s
//!
//! ## Example
//!
//! ```ignore
//! use roydental_storage::{Filter, RecordStore, StorageError, StoredRecord};
//!
//! async fn contacts_of(
//!     store: &dyn RecordStore,
//!     patient_id: &str,
//! ) -> Result<Vec<StoredRecord>, StorageError> {
//!     store
//!         .find("emergency_contact", &Filter::by_parent(patient_id))
//!         .await
//! }
//! ```

mod error;
mod traits;
mod types;

// Re-export everything from submodules
pub use error::{ErrorCategory, StorageError};
pub use traits::{RecordStore, Transaction};
pub use types::{Condition, Filter, RowLock, StoredRecord};

/// Type alias for a storage result.
pub type StorageResult<T> = Result<T, StorageError>;

/// Type alias for a shared storage trait object.
pub type DynStore = std::sync::Arc<dyn RecordStore>;

/// Prelude module for convenient imports.
///
/// ```ignore
/// use roydental_storage::prelude::*;
/// ```
pub mod prelude {
    pub use crate::error::{ErrorCategory, StorageError};
    pub use crate::traits::{RecordStore, Transaction};
    pub use crate::types::{Condition, Filter, RowLock, StoredRecord};
    pub use crate::{DynStore, StorageResult};
}
