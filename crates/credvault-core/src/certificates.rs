//! Certificate operations addressed by credential id.
//!
//! Listing with signing relations, rotation through transitional versions,
//! per-version import and deletion.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditOperation, RequestAudit};
use crate::credential::{
    CertificateValue, Credential, CredentialType, CredentialValue, CredentialVersion,
    normalize_name,
};
use crate::credentials::sealed_version;
use crate::error::CredentialError;
use crate::permission::PermissionOperation;
use crate::regenerate::RegenerateOptions;
use crate::store::{CredentialStore, NewVersion};
use crate::vault::{UnitOfWork, Vault};
use crate::view::{CertificateSummary, CertificateVersionSummary, CredentialView};

/// Id-addressed certificate operations.
#[derive(Debug, Clone)]
pub struct CertificateService {
    vault: Arc<Vault>,
}

impl CertificateService {
    #[must_use]
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    /// Every certificate the actor can read, ordered by name.
    ///
    /// # Errors
    ///
    /// Infrastructure errors only.
    pub async fn get_all(&self, actor: &str) -> Result<Vec<CertificateSummary>, CredentialError> {
        let store = self.vault.store();
        let certificates: Vec<Credential> = store
            .find_by_name_prefix("/")
            .await?
            .into_iter()
            .filter(|c| c.credential_type == CredentialType::Certificate)
            .collect();
        let readable = self
            .vault
            .resolver()
            .filter_readable(actor, certificates, |c| c.name.as_str())
            .await;

        let mut audit = RequestAudit::new(actor, "get certificates");
        let mut summaries = Vec::with_capacity(readable.len());
        for credential in &readable {
            audit.record(
                &credential.name,
                Some(credential.uuid),
                None,
                AuditOperation::CredentialAccess,
            );
            summaries.push(summarize(&store, credential).await?);
        }
        summaries.sort_by_key(|s| s.name.to_lowercase());
        self.vault.audit_read(audit).await?;
        Ok(summaries)
    }

    /// Summary of the certificate called `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` when missing, unreadable, or not a certificate.
    pub async fn get_by_name(
        &self,
        actor: &str,
        name: &str,
    ) -> Result<CertificateSummary, CredentialError> {
        let name = normalize_name(name)?;
        self.vault.ensure_readable(actor, &name).await?;
        let store = self.vault.store();
        let credential = store
            .find_credential(&name)
            .await?
            .filter(|c| c.credential_type == CredentialType::Certificate)
            .ok_or_else(|| CredentialError::not_found(&name))?;
        let summary = summarize(&store, &credential).await?;

        let mut audit = RequestAudit::new(actor, format!("get certificate {name}"));
        audit.record(
            &credential.name,
            Some(credential.uuid),
            None,
            AuditOperation::CredentialAccess,
        );
        self.vault.audit_read(audit).await?;
        Ok(summary)
    }

    /// Regenerate a certificate in shape, optionally as its transitional
    /// version.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Forbidden` without WRITE, `Validation`
    /// when a non-CA is asked to become transitional, `Conflict` when a
    /// transitional version already exists.
    pub async fn regenerate(
        &self,
        actor: &str,
        credential_uuid: Uuid,
        set_as_transitional: bool,
    ) -> Result<CredentialView, CredentialError> {
        let credential = self.certificate(credential_uuid).await?;
        let _guard = self.vault.locks().lock(&credential.name).await;

        let uow = self.vault.begin();
        let mut audit =
            RequestAudit::new(actor, format!("regenerate certificate {credential_uuid}"));
        let result = async {
            let regenerator = uow.regenerator();
            regenerator
                .authorize(self.vault.resolver(), actor, &credential.name)
                .await?;
            let version = regenerator
                .regenerate(
                    &credential.name,
                    RegenerateOptions {
                        set_as_transitional,
                    },
                    &mut audit,
                )
                .await?;
            self.vault.render(&credential, &version)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    /// Import a new version of an existing certificate.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown id, `Forbidden` without WRITE, `Validation`
    /// for invalid material or a transitional request on a non-CA.
    pub async fn create_version(
        &self,
        actor: &str,
        credential_uuid: Uuid,
        value: CertificateValue,
        set_as_transitional: bool,
    ) -> Result<CredentialView, CredentialError> {
        let credential = self.certificate(credential_uuid).await?;
        self.vault
            .ensure_allowed(actor, &credential.name, PermissionOperation::Write)
            .await?;
        let _guard = self.vault.locks().lock(&credential.name).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("create version {credential_uuid}"));
        let result = self
            .create_version_in(&uow, actor, &credential, value, set_as_transitional, &mut audit)
            .await;
        self.vault.finish(uow, audit, result).await
    }

    async fn create_version_in(
        &self,
        uow: &UnitOfWork,
        actor: &str,
        credential: &Credential,
        value: CertificateValue,
        set_as_transitional: bool,
        audit: &mut RequestAudit,
    ) -> Result<CredentialView, CredentialError> {
        let new = sealed_version(
            &self.vault,
            uow.versions(),
            actor,
            CredentialValue::Certificate(value),
        )
        .await?;
        if set_as_transitional
            && !new
                .data
                .as_certificate()
                .is_some_and(|c| c.certificate_authority)
        {
            return Err(CredentialError::validation(
                "only CA certificates can have a transitional version",
            ));
        }

        let latest_metadata = uow
            .store()
            .find_latest(credential.uuid)
            .await?
            .and_then(|v| v.metadata);
        let mut version = uow
            .store()
            .save_version(
                credential,
                NewVersion {
                    metadata: latest_metadata,
                    ..new
                },
            )
            .await?;
        if set_as_transitional {
            version = uow.versions().set_transitional_version(version.uuid).await?;
        }

        audit.record(
            &credential.name,
            Some(credential.uuid),
            Some(version.uuid),
            AuditOperation::CredentialUpdate,
        );
        info!(
            name = %credential.name,
            version_uuid = %version.uuid,
            transitional = set_as_transitional,
            "certificate version imported"
        );
        self.vault.render(credential, &version)
    }

    /// Make `version_uuid` the transitional version, or clear the
    /// transitional flag when `None`. Returns the active version followed by
    /// the transitional one.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown certificate or version, `Forbidden` without
    /// WRITE, `Validation` when the version belongs to another credential.
    pub async fn set_transitional_version(
        &self,
        actor: &str,
        credential_uuid: Uuid,
        version_uuid: Option<Uuid>,
    ) -> Result<Vec<CredentialView>, CredentialError> {
        let credential = self.certificate(credential_uuid).await?;
        self.vault
            .ensure_allowed(actor, &credential.name, PermissionOperation::Write)
            .await?;
        let _guard = self.vault.locks().lock(&credential.name).await;

        let uow = self.vault.begin();
        let mut audit =
            RequestAudit::new(actor, format!("update transitional {credential_uuid}"));
        let result = async {
            let versions = uow.versions();
            let cleared = versions.unset_transitional_version(credential.uuid).await?;
            let marked = match version_uuid {
                Some(version_uuid) => {
                    let version = uow
                        .store()
                        .find_version(version_uuid)
                        .await?
                        .ok_or_else(|| CredentialError::not_found(version_uuid.to_string()))?;
                    if version.credential_uuid != credential.uuid {
                        return Err(CredentialError::validation(
                            "the version does not belong to this certificate",
                        ));
                    }
                    Some(versions.set_transitional_version(version.uuid).await?)
                }
                None => None,
            };

            for version in cleared.iter().chain(marked.iter()) {
                audit.record(
                    &credential.name,
                    Some(credential.uuid),
                    Some(version.uuid),
                    AuditOperation::CredentialUpdate,
                );
            }
            let live = versions
                .find_active_with_transitional(&credential.name)
                .await?;
            self.render_all(&credential, &live)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    /// Versions of a certificate, newest first. With `current_only` just the
    /// active version and the transitional one.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown or unreadable certificate.
    pub async fn get_versions(
        &self,
        actor: &str,
        credential_uuid: Uuid,
        current_only: bool,
    ) -> Result<Vec<CredentialView>, CredentialError> {
        let credential = self.certificate(credential_uuid).await?;
        if !self
            .vault
            .resolver()
            .has_permission(actor, &credential.name, PermissionOperation::Read)
            .await
        {
            return Err(CredentialError::not_found(credential_uuid.to_string()));
        }
        let versions = if current_only {
            self.vault
                .versions()
                .find_active_with_transitional(&credential.name)
                .await?
        } else {
            self.vault.store().find_versions(credential.uuid).await?
        };
        let views = self.render_all(&credential, &versions)?;

        let mut audit =
            RequestAudit::new(actor, format!("get certificate versions {credential_uuid}"));
        for version in &versions {
            audit.record(
                &credential.name,
                Some(credential.uuid),
                Some(version.uuid),
                AuditOperation::CredentialAccess,
            );
        }
        self.vault.audit_read(audit).await?;
        Ok(views)
    }

    /// Delete one version of a certificate. Returns the deleted version.
    ///
    /// # Errors
    ///
    /// `NotFound` for an unknown certificate or a version of another
    /// credential, `Forbidden` without DELETE, `Conflict` for the last
    /// version.
    pub async fn delete_version(
        &self,
        actor: &str,
        credential_uuid: Uuid,
        version_uuid: Uuid,
    ) -> Result<CredentialView, CredentialError> {
        let credential = self.certificate(credential_uuid).await?;
        self.vault
            .ensure_allowed(actor, &credential.name, PermissionOperation::Delete)
            .await?;
        let _guard = self.vault.locks().lock(&credential.name).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("delete version {version_uuid}"));
        let result = async {
            let version = uow
                .store()
                .find_version(version_uuid)
                .await?
                .filter(|v| v.credential_uuid == credential.uuid)
                .ok_or_else(|| CredentialError::not_found(version_uuid.to_string()))?;
            let view = self.vault.render(&credential, &version)?;
            uow.versions().delete_version(version.uuid).await?;
            audit.record(
                &credential.name,
                Some(credential.uuid),
                Some(version.uuid),
                AuditOperation::CredentialDelete,
            );
            Ok::<_, CredentialError>(view)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    async fn certificate(&self, credential_uuid: Uuid) -> Result<Credential, CredentialError> {
        self.vault
            .store()
            .find_credential_by_uuid(credential_uuid)
            .await?
            .filter(|c| c.credential_type == CredentialType::Certificate)
            .ok_or_else(|| CredentialError::not_found(credential_uuid.to_string()))
    }

    fn render_all(
        &self,
        credential: &Credential,
        versions: &[CredentialVersion],
    ) -> Result<Vec<CredentialView>, CredentialError> {
        versions
            .iter()
            .map(|v| self.vault.render(credential, v))
            .collect()
    }
}

async fn summarize(
    store: &CredentialStore,
    credential: &Credential,
) -> Result<CertificateSummary, CredentialError> {
    let versions = store.find_versions(credential.uuid).await?;
    let signed_by = match versions.first().and_then(CredentialVersion::certificate) {
        Some(data) => match &data.ca_name {
            Some(ca_name) => ca_name.clone(),
            None if data.self_signed => credential.name.clone(),
            None => String::new(),
        },
        None => String::new(),
    };
    let signs = store
        .find_signed_by(&credential.name)
        .await?
        .into_iter()
        .map(|c| c.name)
        .filter(|name| !name.eq_ignore_ascii_case(&credential.name))
        .collect();

    Ok(CertificateSummary {
        id: credential.uuid,
        name: credential.name.clone(),
        signed_by,
        signs,
        versions: versions
            .iter()
            .filter_map(CertificateVersionSummary::of)
            .collect(),
    })
}
