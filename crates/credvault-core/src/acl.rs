//! Permission management.
//!
//! Reading the entries of a path needs READ_ACL on it; changing them needs
//! WRITE_ACL. Nobody can change their own entries.

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditOperation, RequestAudit};
use crate::error::CredentialError;
use crate::permission::{PermissionEntry, PermissionOperation, validate_path};
use crate::vault::Vault;

/// ACL-gated access to permission entries.
#[derive(Debug, Clone)]
pub struct PermissionService {
    vault: Arc<Vault>,
}

impl PermissionService {
    #[must_use]
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    /// Entries granted on exactly `path`.
    ///
    /// # Errors
    ///
    /// `NotFound` without READ_ACL on `path`.
    pub async fn get_permissions(
        &self,
        actor: &str,
        path: &str,
    ) -> Result<Vec<PermissionEntry>, CredentialError> {
        self.ensure_acl_readable(actor, path).await?;
        let entries = self.vault.resolver().store().find_all_by_path(path).await?;

        let mut audit = RequestAudit::new(actor, format!("get permissions {path}"));
        audit.record(path, None, None, AuditOperation::AclAccess);
        self.vault.audit_read(audit).await?;
        Ok(entries)
    }

    /// Entry by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when missing or without READ_ACL on its path.
    pub async fn get_by_uuid(
        &self,
        actor: &str,
        uuid: Uuid,
    ) -> Result<PermissionEntry, CredentialError> {
        let entry = self.entry(uuid).await?;
        if !self
            .vault
            .resolver()
            .has_permission(actor, &entry.path, PermissionOperation::ReadAcl)
            .await
        {
            return Err(CredentialError::not_found(uuid.to_string()));
        }

        let mut audit = RequestAudit::new(actor, format!("get permission {uuid}"));
        audit.record(&entry.path, Some(entry.uuid), None, AuditOperation::AclAccess);
        self.vault.audit_read(audit).await?;
        Ok(entry)
    }

    /// Grant `operations` on `path` to `grantee`, merging into any existing
    /// entry.
    ///
    /// # Errors
    ///
    /// `Validation` for a malformed path, an empty operation set, or a
    /// self-grant; `Forbidden` without WRITE_ACL on `path`.
    pub async fn add_permissions(
        &self,
        actor: &str,
        path: &str,
        grantee: &str,
        operations: BTreeSet<PermissionOperation>,
    ) -> Result<PermissionEntry, CredentialError> {
        validate_path(path).map_err(CredentialError::validation)?;
        check_change(actor, grantee, &operations)?;
        self.vault
            .ensure_allowed(actor, path, PermissionOperation::WriteAcl)
            .await?;
        let _guard = self.vault.locks().lock(path).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("add permissions {path}"));
        let result = async {
            let entry = uow.permissions().upsert(path, grantee, &operations).await?;
            audit.record(path, Some(entry.uuid), None, AuditOperation::AclUpdate);
            Ok::<_, CredentialError>(entry)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    /// Replace the operation set of entry `uuid`.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown entry, `Validation` for an empty set or the
    /// actor's own entry, `Forbidden` without WRITE_ACL on its path.
    pub async fn replace_permissions(
        &self,
        actor: &str,
        uuid: Uuid,
        operations: BTreeSet<PermissionOperation>,
    ) -> Result<PermissionEntry, CredentialError> {
        let existing = self.entry(uuid).await?;
        check_change(actor, &existing.actor, &operations)?;
        self.vault
            .ensure_allowed(actor, &existing.path, PermissionOperation::WriteAcl)
            .await?;
        let _guard = self.vault.locks().lock(&existing.path).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("replace permission {uuid}"));
        let result = async {
            let entry = uow
                .permissions()
                .replace_operations(uuid, operations)
                .await?
                .ok_or_else(|| CredentialError::not_found(uuid.to_string()))?;
            audit.record(&entry.path, Some(entry.uuid), None, AuditOperation::AclUpdate);
            info!(path = %entry.path, grantee = %entry.actor, "permissions replaced");
            Ok(entry)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    /// Remove `grantee`'s entry on `path`. Returns the removed entry.
    ///
    /// # Errors
    ///
    /// `Validation` for the actor's own entry, `Forbidden` without WRITE_ACL,
    /// `NotFound` when there is no such entry.
    pub async fn delete_permission(
        &self,
        actor: &str,
        path: &str,
        grantee: &str,
    ) -> Result<PermissionEntry, CredentialError> {
        if actor == grantee {
            return Err(CredentialError::validation(
                "you cannot modify your own permissions",
            ));
        }
        self.vault
            .ensure_allowed(actor, path, PermissionOperation::WriteAcl)
            .await?;
        let _guard = self.vault.locks().lock(path).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("delete permission {path}"));
        let result = async {
            let entry = uow
                .permissions()
                .delete(path, grantee)
                .await?
                .ok_or_else(|| CredentialError::not_found(path))?;
            audit.record(path, Some(entry.uuid), None, AuditOperation::AclDelete);
            Ok(entry)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    async fn ensure_acl_readable(&self, actor: &str, path: &str) -> Result<(), CredentialError> {
        if self
            .vault
            .resolver()
            .has_permission(actor, path, PermissionOperation::ReadAcl)
            .await
        {
            Ok(())
        } else {
            Err(CredentialError::not_found(path))
        }
    }

    async fn entry(&self, uuid: Uuid) -> Result<PermissionEntry, CredentialError> {
        self.vault
            .resolver()
            .store()
            .find_by_uuid(uuid)
            .await?
            .ok_or_else(|| CredentialError::not_found(uuid.to_string()))
    }
}

fn check_change(
    actor: &str,
    grantee: &str,
    operations: &BTreeSet<PermissionOperation>,
) -> Result<(), CredentialError> {
    if actor == grantee {
        return Err(CredentialError::validation(
            "you cannot modify your own permissions",
        ));
    }
    if operations.is_empty() {
        return Err(CredentialError::validation(
            "at least one operation must be granted",
        ));
    }
    Ok(())
}
