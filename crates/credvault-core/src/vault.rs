//! Shared service context.
//!
//! A [`Vault`] owns the collaborators every service needs: the storage
//! backend, permission resolver, encryptor, certificate reader and
//! generator, audit manager, and the keyed lock. Services hold an
//! `Arc<Vault>` and run each mutation as a unit of work: stage writes in a
//! [`StagedTransaction`], log the audit record, then commit.

use std::sync::Arc;

use credvault_storage::{StagedTransaction, StorageBackend};
use tracing::warn;

use crate::audit::{AuditManager, RequestAudit};
use crate::config::CoreConfig;
use crate::credential::{Credential, CredentialVersion};
use crate::crypto::Encryptor;
use crate::error::CredentialError;
use crate::generator::{CertificateGenerator, RcgenGenerator};
use crate::lock::KeyedLock;
use crate::permission::{PermissionOperation, PermissionStore};
use crate::regenerate::Regenerator;
use crate::resolver::PermissionResolver;
use crate::store::CredentialStore;
use crate::versions::CertificateVersionManager;
use crate::view::{self, CredentialView};
use crate::x509::{CertificateReader, X509Reader};

/// Everything the credential services share.
pub struct Vault {
    storage: Arc<dyn StorageBackend>,
    resolver: PermissionResolver,
    encryptor: Arc<dyn Encryptor>,
    reader: Arc<dyn CertificateReader>,
    generator: Arc<dyn CertificateGenerator>,
    regenerator: Regenerator,
    audit: Arc<AuditManager>,
    locks: KeyedLock,
    config: CoreConfig,
}

impl Vault {
    /// Build a vault with the `x509-parser` reader and `rcgen` generator.
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        encryptor: Arc<dyn Encryptor>,
        audit: Arc<AuditManager>,
        config: CoreConfig,
    ) -> Self {
        Self::with_collaborators(
            storage,
            encryptor,
            Arc::new(X509Reader),
            Arc::new(RcgenGenerator),
            audit,
            config,
        )
    }

    /// Build a vault with explicit certificate collaborators.
    #[must_use]
    pub fn with_collaborators(
        storage: Arc<dyn StorageBackend>,
        encryptor: Arc<dyn Encryptor>,
        reader: Arc<dyn CertificateReader>,
        generator: Arc<dyn CertificateGenerator>,
        audit: Arc<AuditManager>,
        config: CoreConfig,
    ) -> Self {
        let resolver = PermissionResolver::new(
            PermissionStore::new(Arc::clone(&storage)),
            config.enforce_permissions,
        );
        let regenerator = Regenerator::new(
            Arc::clone(&storage),
            Arc::clone(&reader),
            Arc::clone(&generator),
            Arc::clone(&encryptor),
            config.concatenate_cas,
            config.default_certificate_duration_days,
            config.max_certificate_duration_days,
        );
        Self {
            storage,
            resolver,
            encryptor,
            reader,
            generator,
            regenerator,
            audit,
            locks: KeyedLock::new(),
            config,
        }
    }

    #[must_use]
    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    #[must_use]
    pub fn resolver(&self) -> &PermissionResolver {
        &self.resolver
    }

    #[must_use]
    pub fn audit(&self) -> &Arc<AuditManager> {
        &self.audit
    }

    #[must_use]
    pub fn storage(&self) -> &Arc<dyn StorageBackend> {
        &self.storage
    }

    pub(crate) fn encryptor(&self) -> &dyn Encryptor {
        self.encryptor.as_ref()
    }

    pub(crate) fn reader(&self) -> &dyn CertificateReader {
        self.reader.as_ref()
    }

    pub(crate) fn generator(&self) -> &dyn CertificateGenerator {
        self.generator.as_ref()
    }

    pub(crate) fn locks(&self) -> &KeyedLock {
        &self.locks
    }

    /// Read-side store over committed state.
    pub(crate) fn store(&self) -> CredentialStore {
        self.regenerator.store().clone()
    }

    /// Read-side version manager over committed state.
    pub(crate) fn versions(&self) -> CertificateVersionManager {
        self.regenerator.versions().clone()
    }

    /// Regenerator over committed state.
    pub(crate) fn regenerator(&self) -> &Regenerator {
        &self.regenerator
    }

    /// `NotFound` unless `actor` may read `name`.
    pub(crate) async fn ensure_readable(
        &self,
        actor: &str,
        name: &str,
    ) -> Result<(), CredentialError> {
        if self
            .resolver
            .has_permission(actor, name, PermissionOperation::Read)
            .await
        {
            Ok(())
        } else {
            Err(CredentialError::not_found(name))
        }
    }

    /// `Forbidden` unless `actor` holds `op` on `name`.
    pub(crate) async fn ensure_allowed(
        &self,
        actor: &str,
        name: &str,
        op: PermissionOperation,
    ) -> Result<(), CredentialError> {
        if self.resolver.has_permission(actor, name, op).await {
            Ok(())
        } else {
            Err(CredentialError::forbidden(name, op))
        }
    }

    pub(crate) fn render(
        &self,
        credential: &Credential,
        version: &CredentialVersion,
    ) -> Result<CredentialView, CredentialError> {
        view::render(
            self.encryptor(),
            self.config.concatenate_cas,
            credential,
            version,
        )
    }

    /// Open a unit of work.
    pub(crate) fn begin(&self) -> UnitOfWork {
        let txn = Arc::new(StagedTransaction::begin(Arc::clone(&self.storage)));
        let storage: Arc<dyn StorageBackend> = txn.clone();
        UnitOfWork {
            regenerator: self.regenerator.on(storage),
            txn,
        }
    }

    /// Settle a unit of work: on success audit then commit, otherwise roll
    /// back. An audit failure also rolls back.
    pub(crate) async fn finish<T>(
        &self,
        uow: UnitOfWork,
        audit: RequestAudit,
        result: Result<T, CredentialError>,
    ) -> Result<T, CredentialError> {
        let value = match result {
            Ok(value) => value,
            Err(e) => {
                let discarded = uow.txn.rollback().await;
                warn!(error = %e, discarded, "unit of work rolled back");
                return Err(e);
            }
        };
        if let Err(e) = audit.finish(&self.audit).await {
            let discarded = uow.txn.rollback().await;
            warn!(error = %e, discarded, "audit failed; unit of work rolled back");
            return Err(e.into());
        }
        uow.txn.commit().await?;
        Ok(value)
    }

    /// Log a read-only request's audit record.
    pub(crate) async fn audit_read(&self, audit: RequestAudit) -> Result<(), CredentialError> {
        audit.finish(&self.audit).await.map_err(Into::into)
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// One staged mutation.
pub(crate) struct UnitOfWork {
    txn: Arc<StagedTransaction>,
    regenerator: Regenerator,
}

impl UnitOfWork {
    /// Regenerator writing into this unit of work.
    pub(crate) fn regenerator(&self) -> &Regenerator {
        &self.regenerator
    }

    pub(crate) fn store(&self) -> &CredentialStore {
        self.regenerator.store()
    }

    pub(crate) fn versions(&self) -> &CertificateVersionManager {
        self.regenerator.versions()
    }

    /// Permission store writing into this unit of work.
    pub(crate) fn permissions(&self) -> PermissionStore {
        PermissionStore::new(self.txn.clone())
    }
}
