//! Startup wiring: storage, encryption, audit, and the bootstrap admin grant.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};

use credvault_core::Vault;
use credvault_core::audit::AuditManager;
use credvault_core::audit_file::FileAuditBackend;
use credvault_core::crypto::{AesGcmEncryptor, Encryptor};
use credvault_core::permission::{PermissionOperation, PermissionStore};
use credvault_storage::{MemoryBackend, StorageBackend};

use crate::config::{ServerConfig, StorageBackendType};

/// Open the configured storage backend.
///
/// # Errors
///
/// Fails when the persistent backend cannot be opened or was not compiled in.
pub fn open_storage(config: &ServerConfig) -> anyhow::Result<Arc<dyn StorageBackend>> {
    match &config.storage_backend {
        StorageBackendType::Memory => {
            info!("using in-memory storage (data will not persist)");
            Ok(Arc::new(MemoryBackend::new()))
        }
        #[cfg(feature = "redb-backend")]
        StorageBackendType::Redb { path } => {
            info!(path = %path, "using redb storage");
            Ok(Arc::new(
                credvault_storage::RedbBackend::open(path).context("failed to open redb storage")?,
            ))
        }
        #[cfg(not(feature = "redb-backend"))]
        StorageBackendType::Redb { .. } => {
            anyhow::bail!("redb backend requested but feature 'redb-backend' is not enabled");
        }
    }
}

/// Build the vault over `storage` from `config`.
pub async fn build_vault(config: &ServerConfig, storage: Arc<dyn StorageBackend>) -> Arc<Vault> {
    let encryptor: Arc<dyn Encryptor> = match &config.encryption_key {
        Some(configured) => Arc::new(AesGcmEncryptor::new(
            configured.id,
            configured.key.clone(),
        )),
        None => {
            warn!("CREDVAULT_ENCRYPTION_KEY not set, using an ephemeral key; stored values will not survive a restart");
            Arc::new(AesGcmEncryptor::ephemeral())
        }
    };

    let audit = Arc::new(AuditManager::new());
    if let Some(path) = &config.audit_file_path {
        audit.add_backend(Arc::new(FileAuditBackend::new(path))).await;
        info!(path = %path, "file audit backend registered");
    }

    Arc::new(Vault::new(storage, encryptor, audit, config.core.clone()))
}

/// Grant `actor` every operation on `/*`.
///
/// # Errors
///
/// Fails when the permission store cannot be written.
pub async fn grant_admin(vault: &Vault, actor: &str) -> anyhow::Result<()> {
    let store = PermissionStore::new(Arc::clone(vault.storage()));
    store
        .upsert("/*", actor, &PermissionOperation::ALL.into_iter().collect())
        .await
        .context("failed to grant bootstrap admin")?;
    info!(actor = %actor, "bootstrap admin granted all operations on /*");
    Ok(())
}
