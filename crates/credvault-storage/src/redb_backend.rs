//! Persistent redb storage backend.
//!
//! Feature-gated behind `redb-backend`. Every call runs in its own redb
//! transaction on the Tokio blocking pool; [`apply`](StorageBackend::apply)
//! puts a whole batch inside one write transaction, so a batch is either
//! fully durable or absent after a crash.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition, WriteTransaction};

use crate::{StorageBackend, StorageError, WriteOp};

/// The single table holding every key. Namespacing is done by key prefix.
const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("records");

/// A storage backend backed by a redb database file.
#[derive(Clone)]
pub struct RedbBackend {
    db: Arc<Database>,
    path: PathBuf,
}

impl std::fmt::Debug for RedbBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbBackend")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

fn txn_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::Transaction {
        reason: e.to_string(),
    }
}

fn table_err(e: impl std::fmt::Display) -> StorageError {
    StorageError::MissingTable {
        name: format!("records: {e}"),
    }
}

impl RedbBackend {
    /// Open or create a redb database at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Open`] if the file cannot be opened or created,
    /// or [`StorageError::Transaction`] if the records table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path).map_err(|e| StorageError::Open {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let txn = db.begin_write().map_err(txn_err)?;
        txn.open_table(RECORDS).map_err(table_err)?;
        txn.commit().map_err(txn_err)?;

        Ok(Self {
            db: Arc::new(db),
            path: path.to_path_buf(),
        })
    }

    /// Filesystem path of the database.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Run `f` inside a write transaction on the blocking pool and commit.
    async fn write<F>(&self, f: F) -> Result<(), StorageError>
    where
        F: FnOnce(&WriteTransaction) -> Result<(), StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_write().map_err(txn_err)?;
            f(&txn)?;
            txn.commit().map_err(txn_err)
        })
        .await
        .map_err(|e| txn_err(format!("blocking task panicked: {e}")))?
    }
}

fn write_op(txn: &WriteTransaction, op: &WriteOp) -> Result<(), StorageError> {
    let mut table = txn.open_table(RECORDS).map_err(table_err)?;
    match op {
        WriteOp::Put { key, value } => {
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(|e| StorageError::Write {
                    key: key.clone(),
                    reason: e.to_string(),
                })?;
        }
        WriteOp::Delete { key } => {
            table.remove(key.as_str()).map_err(|e| StorageError::Delete {
                key: key.clone(),
                reason: e.to_string(),
            })?;
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl StorageBackend for RedbBackend {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        tokio::task::spawn_blocking(move || {
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(RECORDS).map_err(table_err)?;
            let value = table
                .get(key.as_str())
                .map_err(|e| StorageError::Read {
                    key: key.clone(),
                    reason: e.to_string(),
                })?
                .map(|v| v.value().to_vec());
            Ok(value)
        })
        .await
        .map_err(|e| StorageError::Read {
            key: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn put(&self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let op = WriteOp::Put {
            key: key.to_owned(),
            value: value.to_vec(),
        };
        self.write(move |txn| write_op(txn, &op)).await
    }

    async fn delete(&self, key: &str) -> Result<(), StorageError> {
        let op = WriteOp::Delete {
            key: key.to_owned(),
        };
        self.write(move |txn| write_op(txn, &op)).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let db = Arc::clone(&self.db);
        let prefix = prefix.to_owned();
        tokio::task::spawn_blocking(move || {
            let list_err = |e: &dyn std::fmt::Display| StorageError::List {
                prefix: prefix.clone(),
                reason: e.to_string(),
            };
            let txn = db.begin_read().map_err(txn_err)?;
            let table = txn.open_table(RECORDS).map_err(table_err)?;

            let mut keys = Vec::new();
            for item in table.range(prefix.as_str()..).map_err(|e| list_err(&e))? {
                let (k, _) = item.map_err(|e| list_err(&e))?;
                let key = k.value();
                if !key.starts_with(prefix.as_str()) {
                    break;
                }
                keys.push(key.to_owned());
            }
            Ok(keys)
        })
        .await
        .map_err(|e| StorageError::List {
            prefix: String::new(),
            reason: format!("blocking task panicked: {e}"),
        })?
    }

    async fn apply(&self, ops: &[WriteOp]) -> Result<(), StorageError> {
        let ops = ops.to_vec();
        self.write(move |txn| ops.iter().try_for_each(|op| write_op(txn, op)))
            .await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn batch_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credvault.redb");

        {
            let backend = RedbBackend::open(&path).unwrap();
            backend.put("stale", b"x").await.unwrap();
            backend
                .apply(&[
                    WriteOp::Put {
                        key: "credentials/ids/1".to_owned(),
                        value: b"cred".to_vec(),
                    },
                    WriteOp::Delete {
                        key: "stale".to_owned(),
                    },
                ])
                .await
                .unwrap();
        }

        let reopened = RedbBackend::open(&path).unwrap();
        assert_eq!(
            reopened.get("credentials/ids/1").await.unwrap(),
            Some(b"cred".to_vec())
        );
        assert!(!reopened.exists("stale").await.unwrap());
    }

    #[tokio::test]
    async fn list_stops_at_prefix_boundary() {
        let dir = tempfile::tempdir().unwrap();
        let backend = RedbBackend::open(dir.path().join("db.redb")).unwrap();
        backend.put("a/1", b"").await.unwrap();
        backend.put("a/2", b"").await.unwrap();
        backend.put("b/1", b"").await.unwrap();

        assert_eq!(backend.list("a/").await.unwrap(), vec!["a/1", "a/2"]);
    }
}
