//! Storage backend abstraction for `credvault`.
//!
//! This crate defines the [`StorageBackend`] trait, a key-value interface
//! that knows nothing about credentials, versions, or permissions. The
//! credential and permission stores in `credvault-core` serialize their
//! records onto it.
//!
//! Multi-key mutations go through [`StorageBackend::apply`], which every
//! backend must implement atomically. [`StagedTransaction`] builds on that:
//! it buffers writes in an overlay and hands them to `apply` in one batch on
//! commit, or drops them on rollback.
//!
//! Implementations:
//!
//! - [`MemoryBackend`]: in-memory, for development and tests
//! - [`RedbBackend`]: persistent, backed by redb (feature `redb-backend`)

mod error;
mod memory;
#[cfg(feature = "redb-backend")]
mod redb_backend;
mod transaction;

pub use error::StorageError;
pub use memory::MemoryBackend;
#[cfg(feature = "redb-backend")]
pub use redb_backend::RedbBackend;
pub use transaction::StagedTransaction;

/// A single mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteOp {
    /// Insert or overwrite `key` with `value`.
    Put { key: String, value: Vec<u8> },
    /// Remove `key`. Removing a missing key is not an error.
    Delete { key: String },
}

impl WriteOp {
    /// The key this operation touches.
    #[must_use]
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// A pluggable key-value storage backend.
///
/// Keys are UTF-8 strings using `/` as a separator (e.g.
/// `credentials/names//prod/db/cert`). Values are opaque byte arrays; secret
/// parts are already encrypted by the time they reach this layer.
///
/// Implementations must be safe to share across async tasks (`Send + Sync`).
#[async_trait::async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// Retrieve a value by key.
    ///
    /// Returns `Ok(None)` if the key does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;

    /// Store a key-value pair, overwriting any existing value.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Write`] if the underlying backend fails.
    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError>;

    /// Delete a key. Deleting a non-existent key is not an error.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Delete`] if the underlying backend fails.
    async fn delete(&self, key: &str) -> Result<(), StorageError>;

    /// List all keys that start with the given prefix, in ascending order.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::List`] if the underlying backend fails.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Apply a batch of writes atomically: either every operation becomes
    /// visible or none does. Operations apply in order, so a later write to
    /// the same key wins.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Transaction`] if the batch could not be
    /// committed. Nothing from the batch is visible in that case.
    async fn apply(&self, ops: &[WriteOp]) -> Result<(), StorageError>;

    /// Check whether a key exists in storage.
    ///
    /// The default implementation calls [`get`](StorageBackend::get) and checks
    /// for `Some`. Backends may override this with a more efficient check.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Read`] if the underlying backend fails.
    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key).await?.is_some())
    }
}
