//! Staged transactions over any [`StorageBackend`].
//!
//! A [`StagedTransaction`] is itself a `StorageBackend`: writes land in an
//! in-memory overlay, reads consult the overlay before falling through to the
//! base backend, and listings merge both. Nothing reaches the base backend
//! until [`commit`](StagedTransaction::commit), which hands the whole overlay
//! to [`StorageBackend::apply`] as one atomic batch.
//!
//! Reads of keys the transaction has not written see the latest committed
//! state of the base backend (read-committed). Callers that need writers to
//! the same keys serialized must hold their own locks for the duration.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::debug;

use crate::{StorageBackend, StorageError, WriteOp};

/// `None` marks a staged delete.
type Overlay = BTreeMap<String, Option<Vec<u8>>>;

/// Write overlay that commits atomically into a base backend.
pub struct StagedTransaction {
    base: Arc<dyn StorageBackend>,
    /// `None` once the transaction has been committed or rolled back.
    overlay: Mutex<Option<Overlay>>,
}

impl StagedTransaction {
    /// Begin a transaction over `base`.
    #[must_use]
    pub fn begin(base: Arc<dyn StorageBackend>) -> Self {
        Self {
            base,
            overlay: Mutex::new(Some(BTreeMap::new())),
        }
    }

    /// Number of keys with a staged write.
    pub async fn staged_len(&self) -> usize {
        self.overlay.lock().await.as_ref().map_or(0, BTreeMap::len)
    }

    /// Whether the transaction was already committed or rolled back.
    pub async fn is_finished(&self) -> bool {
        self.overlay.lock().await.is_none()
    }

    /// Apply every staged write to the base backend in a single batch.
    ///
    /// Returns the number of keys written.
    ///
    /// # Errors
    ///
    /// - [`StorageError::TransactionFinished`] if already committed or rolled back.
    /// - Any error from the base backend's [`apply`](StorageBackend::apply);
    ///   the batch is then not visible and the transaction is finished.
    pub async fn commit(&self) -> Result<usize, StorageError> {
        let overlay = self
            .overlay
            .lock()
            .await
            .take()
            .ok_or(StorageError::TransactionFinished)?;

        let ops: Vec<WriteOp> = overlay
            .into_iter()
            .map(|(key, value)| match value {
                Some(value) => WriteOp::Put { key, value },
                None => WriteOp::Delete { key },
            })
            .collect();

        if !ops.is_empty() {
            self.base.apply(&ops).await?;
        }
        debug!(writes = ops.len(), "staged transaction committed");
        Ok(ops.len())
    }

    /// Discard every staged write. Returns the number of keys discarded.
    ///
    /// Rolling back a finished transaction is a no-op returning 0.
    pub async fn rollback(&self) -> usize {
        let discarded = self
            .overlay
            .lock()
            .await
            .take()
            .map_or(0, |overlay| overlay.len());
        debug!(discarded, "staged transaction rolled back");
        discarded
    }

    async fn stage(&self, key: &str, value: Option<Vec<u8>>) -> Result<(), StorageError> {
        let mut guard = self.overlay.lock().await;
        let overlay = guard.as_mut().ok_or(StorageError::TransactionFinished)?;
        overlay.insert(key.to_owned(), value);
        Ok(())
    }
}

#[async_trait::async_trait]
impl StorageBackend for StagedTransaction {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        {
            let guard = self.overlay.lock().await;
            let overlay = guard.as_ref().ok_or(StorageError::TransactionFinished)?;
            if let Some(staged) = overlay.get(key) {
                return Ok(staged.clone());
            }
        }
        self.base.get(key).await
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        self.stage(key, Some(value.to_vec())).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        self.stage(key, None).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let committed = self.base.list(prefix).await?;

        let guard = self.overlay.lock().await;
        let overlay = guard.as_ref().ok_or(StorageError::TransactionFinished)?;

        let mut keys: BTreeSet<String> = committed
            .into_iter()
            .filter(|k| !matches!(overlay.get(k), Some(None)))
            .collect();
        keys.extend(
            overlay
                .range(prefix.to_owned()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .filter(|(_, v)| v.is_some())
                .map(|(k, _)| k.clone()),
        );
        Ok(keys.into_iter().collect())
    }

    async fn apply(&self, ops: &[WriteOp]) -> Result<(), StorageError> {
        let mut guard = self.overlay.lock().await;
        let overlay = guard.as_mut().ok_or(StorageError::TransactionFinished)?;
        for op in ops {
            match op {
                WriteOp::Put { key, value } => {
                    overlay.insert(key.clone(), Some(value.clone()));
                }
                WriteOp::Delete { key } => {
                    overlay.insert(key.clone(), None);
                }
            }
        }
        Ok(())
    }
}

impl std::fmt::Debug for StagedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagedTransaction").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::MemoryBackend;

    fn setup() -> (MemoryBackend, StagedTransaction) {
        let base = MemoryBackend::new();
        let txn = StagedTransaction::begin(Arc::new(base.clone()));
        (base, txn)
    }

    #[tokio::test]
    async fn staged_writes_are_invisible_until_commit() {
        let (base, txn) = setup();
        txn.put("versions/a/1", b"v1").await.unwrap();

        assert_eq!(txn.get("versions/a/1").await.unwrap(), Some(b"v1".to_vec()));
        assert_eq!(base.get("versions/a/1").await.unwrap(), None);

        assert_eq!(txn.commit().await.unwrap(), 1);
        assert_eq!(base.get("versions/a/1").await.unwrap(), Some(b"v1".to_vec()));
    }

    #[tokio::test]
    async fn rollback_discards_everything() {
        let (base, txn) = setup();
        base.put("keep", b"1").await.unwrap();

        txn.put("new", b"2").await.unwrap();
        txn.delete("keep").await.unwrap();
        assert_eq!(txn.rollback().await, 2);

        assert!(base.exists("keep").await.unwrap());
        assert!(!base.exists("new").await.unwrap());
    }

    #[tokio::test]
    async fn staged_delete_hides_committed_key() {
        let (base, txn) = setup();
        base.put("signed-by/ca/x", b"").await.unwrap();

        txn.delete("signed-by/ca/x").await.unwrap();
        assert_eq!(txn.get("signed-by/ca/x").await.unwrap(), None);
        assert!(txn.list("signed-by/ca/").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn list_merges_overlay_and_base() {
        let (base, txn) = setup();
        base.put("p/a", b"1").await.unwrap();
        base.put("p/c", b"1").await.unwrap();
        base.put("q/z", b"1").await.unwrap();

        txn.put("p/b", b"2").await.unwrap();
        txn.delete("p/c").await.unwrap();
        txn.put("q/y", b"2").await.unwrap();

        assert_eq!(txn.list("p/").await.unwrap(), vec!["p/a", "p/b"]);
    }

    #[tokio::test]
    async fn finished_transaction_rejects_use() {
        let (_base, txn) = setup();
        txn.commit().await.unwrap();

        assert!(txn.is_finished().await);
        assert!(matches!(
            txn.put("k", b"v").await,
            Err(StorageError::TransactionFinished)
        ));
        assert!(matches!(
            txn.commit().await,
            Err(StorageError::TransactionFinished)
        ));
        assert_eq!(txn.rollback().await, 0);
    }

    #[tokio::test]
    async fn apply_stages_without_committing() {
        let (base, txn) = setup();
        txn.apply(&[
            WriteOp::Put {
                key: "a".to_owned(),
                value: b"1".to_vec(),
            },
            WriteOp::Delete {
                key: "b".to_owned(),
            },
        ])
        .await
        .unwrap();

        assert_eq!(txn.staged_len().await, 2);
        assert!(base.is_empty().await);
    }
}
