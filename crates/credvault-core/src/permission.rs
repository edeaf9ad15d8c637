//! Permission entries and their store.
//!
//! A [`PermissionEntry`] grants one actor a set of operations on one path.
//! The path is either an exact credential name (`/prod/db/cert`) or a
//! wildcard (`/prod/*`) covering every name below the prefix. There is at
//! most one entry per (path, actor); re-granting merges into it.
//!
//! Storage layout:
//! - `permissions/entries/<hex path>/<hex actor>`: the entry
//! - `permissions/actors/<hex actor>/<hex path>`: per-actor index
//! - `permissions/uuids/<uuid>`: `<hex path>/<hex actor>` pointer
//!
//! Paths and actors are hex-encoded so `/` and `*` inside them cannot collide
//! with the key separators.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use credvault_storage::{StorageBackend, WriteOp};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::error::StoreError;

const ENTRY_PREFIX: &str = "permissions/entries/";
const ACTOR_PREFIX: &str = "permissions/actors/";
const UUID_PREFIX: &str = "permissions/uuids/";

/// An operation a permission entry can grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionOperation {
    /// Read credential values and metadata.
    Read,
    /// Create new versions (set, generate, regenerate).
    Write,
    /// Delete credentials and versions.
    Delete,
    /// Read the permission entries of a path.
    ReadAcl,
    /// Create, change, or remove permission entries of a path.
    WriteAcl,
}

impl PermissionOperation {
    /// Every operation, in declaration order.
    pub const ALL: [Self; 5] = [
        Self::Read,
        Self::Write,
        Self::Delete,
        Self::ReadAcl,
        Self::WriteAcl,
    ];

    /// Wire name of the operation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
            Self::Delete => "delete",
            Self::ReadAcl => "read_acl",
            Self::WriteAcl => "write_acl",
        }
    }
}

impl fmt::Display for PermissionOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One (path, actor) grant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionEntry {
    /// Stable identifier of the entry.
    pub uuid: Uuid,
    /// Exact credential name or `<prefix>/*`.
    pub path: String,
    /// Opaque actor identity.
    pub actor: String,
    /// Granted operations.
    pub operations: BTreeSet<PermissionOperation>,
}

impl PermissionEntry {
    /// Whether this entry grants `op`.
    #[must_use]
    pub fn allows(&self, op: PermissionOperation) -> bool {
        self.operations.contains(&op)
    }
}

/// Whether `path` is a wildcard of the form `<prefix>/*`.
#[must_use]
pub fn is_wildcard(path: &str) -> bool {
    path.ends_with("/*")
}

/// Check that `path` is a valid permission path.
///
/// Paths must start with `/`, must not be empty after it, and may only
/// contain `*` as a trailing `/*` segment.
///
/// # Errors
///
/// Returns a human-readable reason when the path is rejected.
pub fn validate_path(path: &str) -> Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("permission path '{path}' must start with '/'"));
    }
    if path.len() < 2 {
        return Err("permission path must name something below '/'".to_owned());
    }
    let body = path.strip_suffix("/*").unwrap_or(path);
    if body.contains('*') {
        return Err(format!(
            "permission path '{path}' may only use '*' as a trailing '/*' segment"
        ));
    }
    if path.contains("//") {
        return Err(format!("permission path '{path}' contains an empty segment"));
    }
    Ok(())
}

fn entry_key(path: &str, actor: &str) -> String {
    format!("{ENTRY_PREFIX}{}/{}", hex::encode(path), hex::encode(actor))
}

fn actor_key(actor: &str, path: &str) -> String {
    format!("{ACTOR_PREFIX}{}/{}", hex::encode(actor), hex::encode(path))
}

fn decode_segment(key: &str, segment: &str) -> Result<String, StoreError> {
    let bytes = hex::decode(segment).map_err(|e| StoreError::Corrupt {
        key: key.to_owned(),
        reason: format!("bad hex segment: {e}"),
    })?;
    String::from_utf8(bytes).map_err(|e| StoreError::Corrupt {
        key: key.to_owned(),
        reason: format!("segment is not utf-8: {e}"),
    })
}

/// CRUD over permission entries.
#[derive(Clone)]
pub struct PermissionStore {
    storage: Arc<dyn StorageBackend>,
}

impl PermissionStore {
    /// Create a store over `storage`.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    async fn load(&self, key: &str) -> Result<Option<PermissionEntry>, StoreError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                key: key.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Entry for exactly (`path`, `actor`), if any.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or the entry is corrupt.
    pub async fn find_by_path_and_actor(
        &self,
        path: &str,
        actor: &str,
    ) -> Result<Option<PermissionEntry>, StoreError> {
        self.load(&entry_key(path, actor)).await
    }

    /// Entries of `actor` on any of `paths`. Missing combinations are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or an entry is corrupt.
    pub async fn find_by_paths_and_actor(
        &self,
        paths: &[String],
        actor: &str,
    ) -> Result<Vec<PermissionEntry>, StoreError> {
        let mut found = Vec::new();
        for path in paths {
            if let Some(entry) = self.find_by_path_and_actor(path, actor).await? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    /// Every entry on exactly `path`, one per actor.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or an entry is corrupt.
    pub async fn find_all_by_path(&self, path: &str) -> Result<Vec<PermissionEntry>, StoreError> {
        let prefix = format!("{ENTRY_PREFIX}{}/", hex::encode(path));
        let mut found = Vec::new();
        for key in self.storage.list(&prefix).await? {
            if let Some(entry) = self.load(&key).await? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    /// Every entry held by `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or an index key is corrupt.
    pub async fn find_all_by_actor(&self, actor: &str) -> Result<Vec<PermissionEntry>, StoreError> {
        let prefix = format!("{ACTOR_PREFIX}{}/", hex::encode(actor));
        let mut found = Vec::new();
        for key in self.storage.list(&prefix).await? {
            let segment = key.strip_prefix(&prefix).unwrap_or_default();
            let path = decode_segment(&key, segment)?;
            if let Some(entry) = self.find_by_path_and_actor(&path, actor).await? {
                found.push(entry);
            }
        }
        Ok(found)
    }

    /// Entry by its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or the pointer is dangling.
    pub async fn find_by_uuid(&self, uuid: Uuid) -> Result<Option<PermissionEntry>, StoreError> {
        let pointer_key = format!("{UUID_PREFIX}{uuid}");
        let Some(pointer) = self.storage.get(&pointer_key).await? else {
            return Ok(None);
        };
        let suffix = String::from_utf8(pointer).map_err(|e| StoreError::Corrupt {
            key: pointer_key.clone(),
            reason: e.to_string(),
        })?;
        self.load(&format!("{ENTRY_PREFIX}{suffix}")).await
    }

    /// Grant `operations` to `actor` on `path`, merging into an existing
    /// entry for the same pair. Returns the resulting entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn upsert(
        &self,
        path: &str,
        actor: &str,
        operations: &BTreeSet<PermissionOperation>,
    ) -> Result<PermissionEntry, StoreError> {
        let entry = match self.find_by_path_and_actor(path, actor).await? {
            Some(mut existing) => {
                existing.operations.extend(operations.iter().copied());
                existing
            }
            None => PermissionEntry {
                uuid: Uuid::new_v4(),
                path: path.to_owned(),
                actor: actor.to_owned(),
                operations: operations.clone(),
            },
        };
        self.write(&entry).await?;
        info!(path = %path, actor = %actor, operations = ?entry.operations, "permissions granted");
        Ok(entry)
    }

    /// Replace the operation set of an existing entry. Returns `None` when
    /// there is no entry with `uuid`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn replace_operations(
        &self,
        uuid: Uuid,
        operations: BTreeSet<PermissionOperation>,
    ) -> Result<Option<PermissionEntry>, StoreError> {
        let Some(mut entry) = self.find_by_uuid(uuid).await? else {
            return Ok(None);
        };
        entry.operations = operations;
        self.write(&entry).await?;
        Ok(Some(entry))
    }

    async fn write(&self, entry: &PermissionEntry) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(entry).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        let ops = [
            WriteOp::Put {
                key: entry_key(&entry.path, &entry.actor),
                value: bytes,
            },
            WriteOp::Put {
                key: actor_key(&entry.actor, &entry.path),
                value: Vec::new(),
            },
            WriteOp::Put {
                key: format!("{UUID_PREFIX}{}", entry.uuid),
                value: format!("{}/{}", hex::encode(&entry.path), hex::encode(&entry.actor))
                    .into_bytes(),
            },
        ];
        self.storage.apply(&ops).await?;
        Ok(())
    }

    /// Remove the entry for (`path`, `actor`). Returns the removed entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn delete(
        &self,
        path: &str,
        actor: &str,
    ) -> Result<Option<PermissionEntry>, StoreError> {
        let Some(entry) = self.find_by_path_and_actor(path, actor).await? else {
            return Ok(None);
        };
        self.storage
            .apply(&[
                WriteOp::Delete {
                    key: entry_key(path, actor),
                },
                WriteOp::Delete {
                    key: actor_key(actor, path),
                },
                WriteOp::Delete {
                    key: format!("{UUID_PREFIX}{}", entry.uuid),
                },
            ])
            .await?;
        info!(path = %path, actor = %actor, "permission entry deleted");
        Ok(Some(entry))
    }
}

impl fmt::Debug for PermissionStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionStore").finish_non_exhaustive()
    }
}
