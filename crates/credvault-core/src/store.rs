//! Credential and version persistence.
//!
//! Storage layout:
//! - `credentials/ids/<uuid>`: the [`Credential`] record
//! - `credentials/names/<lower-cased name>`: uuid pointer
//! - `versions/<credential uuid>/<20-digit ordinal>`: a [`CredentialVersion`]
//! - `versions/ids/<version uuid>`: pointer to the version key
//! - `signed-by/<hex of lower-cased ca name>/<credential uuid>`: signed-by edge
//! - `signed-by-rev/<credential uuid>`: lower-cased ca name of that edge
//!
//! The signed-by edge of a credential follows its most recent version and is
//! refreshed whenever that changes. Every multi-key change goes through one
//! [`StorageBackend::apply`] batch.

use std::sync::Arc;

use chrono::Utc;
use credvault_storage::{StorageBackend, WriteOp};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;
use uuid::Uuid;

use crate::credential::{Credential, CredentialType, CredentialVersion, VersionData};
use crate::crypto::EncryptedValue;
use crate::error::StoreError;

const CREDENTIAL_ID_PREFIX: &str = "credentials/ids/";
const CREDENTIAL_NAME_PREFIX: &str = "credentials/names/";
const VERSION_PREFIX: &str = "versions/";
const VERSION_ID_PREFIX: &str = "versions/ids/";
const SIGNED_BY_PREFIX: &str = "signed-by/";
const SIGNED_BY_REV_PREFIX: &str = "signed-by-rev/";

fn name_key(name: &str) -> String {
    format!("{CREDENTIAL_NAME_PREFIX}{}", name.to_lowercase())
}

fn credential_key(uuid: Uuid) -> String {
    format!("{CREDENTIAL_ID_PREFIX}{uuid}")
}

fn versions_prefix(credential_uuid: Uuid) -> String {
    format!("{VERSION_PREFIX}{credential_uuid}/")
}

fn version_key(credential_uuid: Uuid, ordinal: u64) -> String {
    format!("{VERSION_PREFIX}{credential_uuid}/{ordinal:020}")
}

/// CA names are hex-encoded so that `/ca` never prefixes the edges of `/ca/mid`.
fn signed_by_prefix(ca_name: &str) -> String {
    format!("{SIGNED_BY_PREFIX}{}/", hex::encode(ca_name.to_lowercase()))
}

fn signed_by_key(ca_name: &str, credential_uuid: Uuid) -> String {
    format!("{}{credential_uuid}", signed_by_prefix(ca_name))
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(value).map_err(|e| StoreError::Serialization {
        reason: e.to_string(),
    })
}

fn corrupt(key: &str, reason: impl std::fmt::Display) -> StoreError {
    StoreError::Corrupt {
        key: key.to_owned(),
        reason: reason.to_string(),
    }
}

/// A new version before it has an id and ordinal.
#[derive(Debug, Clone)]
pub struct NewVersion {
    pub data: VersionData,
    pub encrypted_value: Option<EncryptedValue>,
    pub metadata: Option<serde_json::Value>,
}

/// CRUD over credentials and their versions.
#[derive(Clone)]
pub struct CredentialStore {
    storage: Arc<dyn StorageBackend>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self { storage }
    }

    /// The backend this store reads and writes.
    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    async fn load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StoreError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| corrupt(key, e))
    }

    async fn load_pointer(&self, key: &str) -> Result<Option<String>, StoreError> {
        let Some(bytes) = self.storage.get(key).await? else {
            return Ok(None);
        };
        String::from_utf8(bytes).map(Some).map_err(|e| corrupt(key, e))
    }

    /// Credential by name, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or a record is corrupt.
    pub async fn find_credential(&self, name: &str) -> Result<Option<Credential>, StoreError> {
        let key = name_key(name);
        let Some(pointer) = self.load_pointer(&key).await? else {
            return Ok(None);
        };
        let uuid = Uuid::parse_str(&pointer).map_err(|e| corrupt(&key, e))?;
        self.find_credential_by_uuid(uuid).await
    }

    /// Credential by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or the record is corrupt.
    pub async fn find_credential_by_uuid(
        &self,
        uuid: Uuid,
    ) -> Result<Option<Credential>, StoreError> {
        self.load(&credential_key(uuid)).await
    }

    /// Create and persist a credential record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn create_credential(
        &self,
        name: &str,
        credential_type: CredentialType,
    ) -> Result<Credential, StoreError> {
        let credential = Credential::new(name, credential_type);
        self.storage
            .apply(&[
                WriteOp::Put {
                    key: credential_key(credential.uuid),
                    value: encode(&credential)?,
                },
                WriteOp::Put {
                    key: name_key(name),
                    value: credential.uuid.to_string().into_bytes(),
                },
            ])
            .await?;
        debug!(name = %name, credential_uuid = %credential.uuid, "credential created");
        Ok(credential)
    }

    /// Every credential whose lower-cased name starts with `prefix`
    /// (case-insensitive). An empty prefix lists everything.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or a record is corrupt.
    pub async fn find_by_name_prefix(&self, prefix: &str) -> Result<Vec<Credential>, StoreError> {
        let keys = self.storage.list(&name_key(prefix)).await?;
        self.credentials_for_name_keys(keys).await
    }

    /// Every credential whose name contains `fragment`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or a record is corrupt.
    pub async fn find_by_name_like(&self, fragment: &str) -> Result<Vec<Credential>, StoreError> {
        let fragment = fragment.to_lowercase();
        let keys = self
            .storage
            .list(CREDENTIAL_NAME_PREFIX)
            .await?
            .into_iter()
            .filter(|key| {
                key.strip_prefix(CREDENTIAL_NAME_PREFIX)
                    .is_some_and(|name| name.contains(&fragment))
            })
            .collect();
        self.credentials_for_name_keys(keys).await
    }

    async fn credentials_for_name_keys(
        &self,
        keys: Vec<String>,
    ) -> Result<Vec<Credential>, StoreError> {
        let mut found = Vec::with_capacity(keys.len());
        for key in keys {
            let Some(pointer) = self.load_pointer(&key).await? else {
                continue;
            };
            let uuid = Uuid::parse_str(&pointer).map_err(|e| corrupt(&key, e))?;
            if let Some(credential) = self.find_credential_by_uuid(uuid).await? {
                found.push(credential);
            }
        }
        Ok(found)
    }

    /// Append a version to `credential`. The ordinal is one past the newest
    /// existing version.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn save_version(
        &self,
        credential: &Credential,
        new: NewVersion,
    ) -> Result<CredentialVersion, StoreError> {
        let ordinal = self
            .version_keys(credential.uuid)
            .await?
            .last()
            .and_then(|key| key.rsplit('/').next())
            .and_then(|tail| tail.parse::<u64>().ok())
            .unwrap_or(0)
            + 1;

        let version = CredentialVersion {
            uuid: Uuid::new_v4(),
            credential_uuid: credential.uuid,
            ordinal,
            created_at: Utc::now(),
            encrypted_value: new.encrypted_value,
            metadata: new.metadata,
            data: new.data,
        };
        let key = version_key(credential.uuid, ordinal);

        let mut ops = vec![
            WriteOp::Put {
                key: key.clone(),
                value: encode(&version)?,
            },
            WriteOp::Put {
                key: format!("{VERSION_ID_PREFIX}{}", version.uuid),
                value: key.into_bytes(),
            },
        ];
        ops.extend(self.signed_by_ops(credential.uuid, version.ca_name()).await?);
        self.storage.apply(&ops).await?;

        debug!(
            credential_uuid = %credential.uuid,
            version_uuid = %version.uuid,
            ordinal,
            "version saved"
        );
        Ok(version)
    }

    async fn version_keys(&self, credential_uuid: Uuid) -> Result<Vec<String>, StoreError> {
        Ok(self.storage.list(&versions_prefix(credential_uuid)).await?)
    }

    /// All versions of a credential, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or a record is corrupt.
    pub async fn find_versions(
        &self,
        credential_uuid: Uuid,
    ) -> Result<Vec<CredentialVersion>, StoreError> {
        let mut versions = Vec::new();
        for key in self.version_keys(credential_uuid).await?.iter().rev() {
            if let Some(version) = self.load(key).await? {
                versions.push(version);
            }
        }
        Ok(versions)
    }

    /// Most recent version of a credential.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or the record is corrupt.
    pub async fn find_latest(
        &self,
        credential_uuid: Uuid,
    ) -> Result<Option<CredentialVersion>, StoreError> {
        match self.version_keys(credential_uuid).await?.last() {
            Some(key) => self.load(key).await,
            None => Ok(None),
        }
    }

    /// Version by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or the record is corrupt.
    pub async fn find_version(&self, uuid: Uuid) -> Result<Option<CredentialVersion>, StoreError> {
        match self.load_pointer(&format!("{VERSION_ID_PREFIX}{uuid}")).await? {
            Some(key) => self.load(&key).await,
            None => Ok(None),
        }
    }

    /// Overwrite a stored version in place. Only flag changes (the
    /// transitional marker) go through here; content is never rewritten.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn update_version(&self, version: &CredentialVersion) -> Result<(), StoreError> {
        self.storage
            .put(
                &version_key(version.credential_uuid, version.ordinal),
                &encode(version)?,
            )
            .await?;
        Ok(())
    }

    /// Hard-delete one version and refresh the credential's signed-by edge.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn delete_version(&self, version: &CredentialVersion) -> Result<(), StoreError> {
        let key = version_key(version.credential_uuid, version.ordinal);
        let remaining_latest = {
            let keys = self.version_keys(version.credential_uuid).await?;
            match keys.iter().rev().find(|k| **k != key) {
                Some(k) => self.load::<CredentialVersion>(k).await?,
                None => None,
            }
        };

        let mut ops = vec![
            WriteOp::Delete { key },
            WriteOp::Delete {
                key: format!("{VERSION_ID_PREFIX}{}", version.uuid),
            },
        ];
        let ca_name = remaining_latest.as_ref().and_then(CredentialVersion::ca_name);
        ops.extend(self.signed_by_ops(version.credential_uuid, ca_name).await?);
        self.storage.apply(&ops).await?;
        Ok(())
    }

    /// Delete a credential, all its versions, and its index entries.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails.
    pub async fn delete_credential(&self, credential: &Credential) -> Result<usize, StoreError> {
        let mut ops = Vec::new();
        let versions = self.find_versions(credential.uuid).await?;
        for version in &versions {
            ops.push(WriteOp::Delete {
                key: version_key(credential.uuid, version.ordinal),
            });
            ops.push(WriteOp::Delete {
                key: format!("{VERSION_ID_PREFIX}{}", version.uuid),
            });
        }
        ops.extend(self.signed_by_ops(credential.uuid, None).await?);
        ops.push(WriteOp::Delete {
            key: name_key(&credential.name),
        });
        ops.push(WriteOp::Delete {
            key: credential_key(credential.uuid),
        });
        self.storage.apply(&ops).await?;
        Ok(versions.len())
    }

    /// Credentials whose most recent version names `ca_name` as signer
    /// (case-insensitive), ordered by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if storage fails or a record is corrupt.
    pub async fn find_signed_by(&self, ca_name: &str) -> Result<Vec<Credential>, StoreError> {
        let prefix = signed_by_prefix(ca_name);
        let mut children = Vec::new();
        for key in self.storage.list(&prefix).await? {
            let tail = key.strip_prefix(&prefix).unwrap_or_default();
            let uuid = Uuid::parse_str(tail).map_err(|e| corrupt(&key, e))?;
            if let Some(credential) = self.find_credential_by_uuid(uuid).await? {
                children.push(credential);
            }
        }
        children.sort_by_key(|c| c.name.to_lowercase());
        Ok(children)
    }

    /// Ops replacing the signed-by edge of `credential_uuid` with `ca_name`.
    async fn signed_by_ops(
        &self,
        credential_uuid: Uuid,
        ca_name: Option<&str>,
    ) -> Result<Vec<WriteOp>, StoreError> {
        let rev_key = format!("{SIGNED_BY_REV_PREFIX}{credential_uuid}");
        let mut ops = Vec::new();
        if let Some(previous) = self.load_pointer(&rev_key).await? {
            ops.push(WriteOp::Delete {
                key: signed_by_key(&previous, credential_uuid),
            });
        }
        match ca_name {
            Some(ca_name) => {
                ops.push(WriteOp::Put {
                    key: signed_by_key(ca_name, credential_uuid),
                    value: Vec::new(),
                });
                ops.push(WriteOp::Put {
                    key: rev_key,
                    value: ca_name.to_lowercase().into_bytes(),
                });
            }
            None => ops.push(WriteOp::Delete { key: rev_key }),
        }
        Ok(ops)
    }
}

impl std::fmt::Debug for CredentialStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialStore").finish_non_exhaustive()
    }
}
