//! Credential operations.
//!
//! [`CredentialService`] is the name-addressed surface: import, generate,
//! read, search, delete, and single or cascading regeneration. Every
//! mutation takes the keyed lock of the names it touches and runs as one
//! unit of work.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::audit::{AuditOperation, RequestAudit};
use crate::bulk;
use crate::cancel::CancelSignal;
use crate::credential::{
    CertificateValue, CertificateVersionData, Credential, CredentialValue, CredentialVersion,
    NameSet, VersionData, normalize_name,
};
use crate::error::{CertificateError, CredentialError};
use crate::parameters::{GenerationParameters, WriteMode};
use crate::permission::PermissionOperation;
use crate::regenerate::{RegenerateOptions, ensure_same_type};
use crate::store::NewVersion;
use crate::vault::{UnitOfWork, Vault};
use crate::versions::CertificateVersionManager;
use crate::view::{CredentialView, FoundCredential};

/// Name-addressed credential operations.
#[derive(Debug, Clone)]
pub struct CredentialService {
    vault: Arc<Vault>,
}

impl CredentialService {
    #[must_use]
    pub fn new(vault: Arc<Vault>) -> Self {
        Self { vault }
    }

    /// Newest version of `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` when the credential is missing or unreadable.
    pub async fn get_by_name(
        &self,
        actor: &str,
        name: &str,
    ) -> Result<CredentialView, CredentialError> {
        let name = normalize_name(name)?;
        self.vault.ensure_readable(actor, &name).await?;
        let (credential, latest) = self.vault.regenerator().current(&name).await?;
        let view = self.vault.render(&credential, &latest)?;

        let mut audit = RequestAudit::new(actor, format!("get {name}"));
        audit.record(
            &credential.name,
            Some(credential.uuid),
            Some(latest.uuid),
            AuditOperation::CredentialAccess,
        );
        self.vault.audit_read(audit).await?;
        Ok(view)
    }

    /// A single version by id.
    ///
    /// # Errors
    ///
    /// `NotFound` when the version is missing or its credential unreadable.
    pub async fn get_version(
        &self,
        actor: &str,
        version_uuid: Uuid,
    ) -> Result<CredentialView, CredentialError> {
        let store = self.vault.store();
        let not_found = || CredentialError::not_found(version_uuid.to_string());
        let version = store.find_version(version_uuid).await?.ok_or_else(not_found)?;
        let credential = store
            .find_credential_by_uuid(version.credential_uuid)
            .await?
            .ok_or_else(not_found)?;
        if !self
            .vault
            .resolver()
            .has_permission(actor, &credential.name, PermissionOperation::Read)
            .await
        {
            return Err(not_found());
        }
        let view = self.vault.render(&credential, &version)?;

        let mut audit = RequestAudit::new(actor, format!("get version {version_uuid}"));
        audit.record(
            &credential.name,
            Some(credential.uuid),
            Some(version.uuid),
            AuditOperation::CredentialAccess,
        );
        self.vault.audit_read(audit).await?;
        Ok(view)
    }

    /// Versions of `name`, newest first, at most `limit` of them.
    ///
    /// # Errors
    ///
    /// `NotFound` when the credential is missing or unreadable.
    pub async fn get_versions(
        &self,
        actor: &str,
        name: &str,
        limit: Option<usize>,
    ) -> Result<Vec<CredentialView>, CredentialError> {
        let name = normalize_name(name)?;
        self.vault.ensure_readable(actor, &name).await?;
        let store = self.vault.store();
        let credential = store
            .find_credential(&name)
            .await?
            .ok_or_else(|| CredentialError::not_found(&name))?;
        let versions = store.find_versions(credential.uuid).await?;
        if versions.is_empty() {
            return Err(CredentialError::not_found(&name));
        }

        let mut audit = RequestAudit::new(actor, format!("get versions {name}"));
        let mut views = Vec::new();
        for version in versions.iter().take(limit.unwrap_or(usize::MAX)) {
            views.push(self.vault.render(&credential, version)?);
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

    /// Readable credentials under `path`. `path` is a directory: `/a`
    /// matches `/a/b` but not `/ab`. An empty path or `/` lists everything
    /// readable.
    ///
    /// # Errors
    ///
    /// Infrastructure errors only.
    pub async fn find_by_path(
        &self,
        actor: &str,
        path: &str,
    ) -> Result<Vec<FoundCredential>, CredentialError> {
        let prefix = directory_prefix(path);
        let credentials = self.vault.store().find_by_name_prefix(&prefix).await?;
        self.found(actor, format!("find path {prefix}"), credentials)
            .await
    }

    /// Readable credentials whose name contains `fragment`, ignoring case.
    ///
    /// # Errors
    ///
    /// Infrastructure errors only.
    pub async fn find_by_name_like(
        &self,
        actor: &str,
        fragment: &str,
    ) -> Result<Vec<FoundCredential>, CredentialError> {
        let credentials = self.vault.store().find_by_name_like(fragment).await?;
        self.found(actor, format!("find name-like {fragment}"), credentials)
            .await
    }

    async fn found(
        &self,
        actor: &str,
        request: String,
        credentials: Vec<Credential>,
    ) -> Result<Vec<FoundCredential>, CredentialError> {
        let readable = self
            .vault
            .resolver()
            .filter_readable(actor, credentials, |c| c.name.as_str())
            .await;
        let store = self.vault.store();
        let mut audit = RequestAudit::new(actor, request);
        let mut found = Vec::with_capacity(readable.len());
        for credential in readable {
            let Some(latest) = store.find_latest(credential.uuid).await? else {
                continue;
            };
            audit.record(
                &credential.name,
                Some(credential.uuid),
                None,
                AuditOperation::CredentialFind,
            );
            found.push(FoundCredential {
                name: credential.name,
                version_created_at: latest.created_at,
            });
        }
        found.sort_by(|a, b| b.version_created_at.cmp(&a.version_created_at));
        self.vault.audit_read(audit).await?;
        Ok(found)
    }

    /// Store `value` as a new version of `name`, creating the credential if
    /// needed.
    ///
    /// Certificates must parse, carry a matching private key, and when a
    /// `ca_name` is given be signed by that CA's active version; the stored
    /// `ca` is then the CA's certificate regardless of what was supplied.
    ///
    /// # Errors
    ///
    /// `Forbidden` without WRITE, `NotFound` when the named CA is missing or
    /// unreadable, `Validation` for malformed input or a type change.
    pub async fn set(
        &self,
        actor: &str,
        name: &str,
        value: CredentialValue,
        metadata: Option<serde_json::Value>,
    ) -> Result<CredentialView, CredentialError> {
        let name = normalize_name(name)?;
        self.vault
            .ensure_allowed(actor, &name, PermissionOperation::Write)
            .await?;
        let _guard = self.vault.locks().lock(&name).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("set {name}"));
        let result = self
            .set_in(&uow, actor, &name, value, metadata, &mut audit)
            .await;
        self.vault.finish(uow, audit, result).await
    }

    async fn set_in(
        &self,
        uow: &UnitOfWork,
        actor: &str,
        name: &str,
        value: CredentialValue,
        metadata: Option<serde_json::Value>,
        audit: &mut RequestAudit,
    ) -> Result<CredentialView, CredentialError> {
        let credential_type = value.credential_type();
        let new = sealed_version(&self.vault, uow.versions(), actor, value).await?;
        let store = uow.store();
        let credential = match store.find_credential(name).await? {
            Some(existing) => {
                ensure_same_type(&existing, credential_type)?;
                existing
            }
            None => store.create_credential(name, credential_type).await?,
        };
        let version = store
            .save_version(&credential, NewVersion { metadata, ..new })
            .await?;

        audit.record(
            &credential.name,
            Some(credential.uuid),
            Some(version.uuid),
            AuditOperation::CredentialUpdate,
        );
        info!(
            name = %credential.name,
            version_uuid = %version.uuid,
            credential_type = %credential_type,
            "credential set"
        );
        self.vault.render(&credential, &version)
    }

    /// Generate a value for `name`.
    ///
    /// With [`WriteMode::NoOverwrite`] an existing credential is returned
    /// unchanged. [`WriteMode::Converge`] regenerates only when `params`
    /// differ from the shape of the newest version, ignoring duration.
    /// [`WriteMode::Overwrite`] always produces a new version.
    ///
    /// # Errors
    ///
    /// `Forbidden` without WRITE, `NotFound` when a named CA is missing or
    /// unreadable, `Validation` for invalid parameters or a type change.
    pub async fn generate(
        &self,
        actor: &str,
        name: &str,
        params: GenerationParameters,
        mode: WriteMode,
        metadata: Option<serde_json::Value>,
    ) -> Result<CredentialView, CredentialError> {
        let name = normalize_name(name)?;
        self.vault
            .ensure_allowed(actor, &name, PermissionOperation::Write)
            .await?;
        let params = match params {
            GenerationParameters::Certificate(cert) => {
                let mut cert = cert.normalized();
                if let Some(ca_name) = cert.ca_name.take() {
                    let ca_name = normalize_name(&ca_name)?;
                    self.vault.ensure_readable(actor, &ca_name).await?;
                    cert.ca_name = Some(ca_name);
                }
                GenerationParameters::Certificate(cert)
            }
            other => other,
        };
        let _guard = self.vault.locks().lock(&name).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("generate {name}"));
        let result = self
            .generate_in(&uow, &name, &params, mode, metadata, &mut audit)
            .await;
        self.vault.finish(uow, audit, result).await
    }

    async fn generate_in(
        &self,
        uow: &UnitOfWork,
        name: &str,
        params: &GenerationParameters,
        mode: WriteMode,
        metadata: Option<serde_json::Value>,
        audit: &mut RequestAudit,
    ) -> Result<CredentialView, CredentialError> {
        let store = uow.store();
        let regenerator = uow.regenerator();
        let credential = match store.find_credential(name).await? {
            Some(existing) => {
                ensure_same_type(&existing, params.credential_type())?;
                if let Some(latest) = store.find_latest(existing.uuid).await? {
                    let keep = match mode {
                        WriteMode::NoOverwrite => true,
                        WriteMode::Converge => regenerator
                            .extractor()
                            .extract(&latest)
                            .is_ok_and(|current| current.is_equivalent_to(params)),
                        WriteMode::Overwrite => false,
                    };
                    if keep {
                        audit.record(
                            &existing.name,
                            Some(existing.uuid),
                            Some(latest.uuid),
                            AuditOperation::CredentialAccess,
                        );
                        return self.vault.render(&existing, &latest);
                    }
                }
                existing
            }
            None => {
                store
                    .create_credential(name, params.credential_type())
                    .await?
            }
        };

        let version = regenerator
            .produce(&credential, params, metadata, RegenerateOptions::default())
            .await?;
        audit.record(
            &credential.name,
            Some(credential.uuid),
            Some(version.uuid),
            AuditOperation::CredentialUpdate,
        );
        info!(
            name = %credential.name,
            version_uuid = %version.uuid,
            mode = ?mode,
            "credential generated"
        );
        self.vault.render(&credential, &version)
    }

    /// Regenerate `name` in shape.
    ///
    /// # Errors
    ///
    /// `Forbidden` without WRITE, `NotFound` when the credential or its
    /// signing CA is missing or unreadable, `Validation` when the credential
    /// cannot be regenerated.
    pub async fn regenerate(
        &self,
        actor: &str,
        name: &str,
    ) -> Result<CredentialView, CredentialError> {
        let name = normalize_name(name)?;
        let _guard = self.vault.locks().lock(&name).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("regenerate {name}"));
        let result = async {
            let regenerator = uow.regenerator();
            let (credential, _) = regenerator
                .authorize(self.vault.resolver(), actor, &name)
                .await?;
            let version = regenerator
                .regenerate(&name, RegenerateOptions::default(), &mut audit)
                .await?;
            self.vault.render(&credential, &version)
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }

    /// Regenerate every certificate transitively signed by `signer`.
    /// Returns the regenerated names; the signer itself is not included.
    /// Either every descendant gets a new version or none does.
    ///
    /// # Errors
    ///
    /// `NotFound` when the signer is missing or unreadable, `Forbidden` when
    /// any descendant lacks WRITE, `Cancelled` when `cancel` fires, or any
    /// error from regenerating a node.
    pub async fn bulk_regenerate(
        &self,
        actor: &str,
        signer: &str,
        cancel: &CancelSignal,
    ) -> Result<NameSet, CredentialError> {
        let signer = normalize_name(signer)?;
        let subtree = bulk::preflight(
            &self.vault.store(),
            self.vault.resolver(),
            actor,
            &signer,
            cancel,
        )
        .await?;
        let _guard = self
            .vault
            .locks()
            .lock_many(subtree.iter().chain(std::iter::once(signer.as_str())))
            .await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("bulk regenerate {signer}"));
        let result = bulk::regenerate_subtree(
            uow.regenerator(),
            self.vault.resolver(),
            actor,
            &signer,
            &subtree,
            cancel,
            &mut audit,
        )
        .await;
        self.vault.finish(uow, audit, result).await
    }

    /// Delete `name` and all of its versions.
    ///
    /// # Errors
    ///
    /// `Forbidden` without DELETE, `NotFound` when the credential is missing.
    pub async fn delete(&self, actor: &str, name: &str) -> Result<(), CredentialError> {
        let name = normalize_name(name)?;
        self.vault
            .ensure_allowed(actor, &name, PermissionOperation::Delete)
            .await?;
        let _guard = self.vault.locks().lock(&name).await;

        let uow = self.vault.begin();
        let mut audit = RequestAudit::new(actor, format!("delete {name}"));
        let result = async {
            let credential = uow
                .store()
                .find_credential(&name)
                .await?
                .ok_or_else(|| CredentialError::not_found(&name))?;
            let versions = uow.store().delete_credential(&credential).await?;
            audit.record(
                &credential.name,
                Some(credential.uuid),
                None,
                AuditOperation::CredentialDelete,
            );
            info!(name = %credential.name, versions, "credential deleted");
            Ok::<(), CredentialError>(())
        }
        .await;
        self.vault.finish(uow, audit, result).await
    }
}

/// `path` as a lower-level directory prefix: leading and trailing `/`.
fn directory_prefix(path: &str) -> String {
    let trimmed = path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_owned()
    } else {
        format!("/{trimmed}/")
    }
}

/// Encrypt an imported value into a version body.
pub(crate) async fn sealed_version(
    vault: &Vault,
    versions: &CertificateVersionManager,
    actor: &str,
    value: CredentialValue,
) -> Result<NewVersion, CredentialError> {
    let encrypt = |plain: &str| vault.encryptor().encrypt(plain.as_bytes());
    let (data, encrypted_value) = match value {
        CredentialValue::Value(value) => {
            if value.is_empty() {
                return Err(CredentialError::validation("a value must not be empty"));
            }
            (VersionData::Value, encrypt(&value)?)
        }
        CredentialValue::Json(json) => {
            if !json.is_object() {
                return Err(CredentialError::validation("a JSON value must be an object"));
            }
            (VersionData::Json, encrypt(&json.to_string())?)
        }
        CredentialValue::Password(password) => {
            if password.is_empty() {
                return Err(CredentialError::validation("a password must not be empty"));
            }
            (VersionData::Password { parameters: None }, encrypt(&password)?)
        }
        CredentialValue::User { username, password } => {
            if password.is_empty() {
                return Err(CredentialError::validation("a password must not be empty"));
            }
            (
                VersionData::User {
                    username,
                    parameters: None,
                },
                encrypt(&password)?,
            )
        }
        CredentialValue::Certificate(certificate) => {
            let (data, private_key) =
                imported_certificate(vault, versions, actor, certificate).await?;
            (VersionData::Certificate(data), encrypt(&private_key)?)
        }
    };
    Ok(NewVersion {
        data,
        encrypted_value: Some(encrypted_value),
        metadata: None,
    })
}

/// Validate an imported certificate and describe it. Returns the version
/// data and the private key to seal.
async fn imported_certificate(
    vault: &Vault,
    versions: &CertificateVersionManager,
    actor: &str,
    value: CertificateValue,
) -> Result<(CertificateVersionData, String), CredentialError> {
    let parsed = vault.reader().parse(&value.certificate)?;
    let private_key = value
        .private_key
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| {
            CredentialError::validation("a certificate must be stored with its private key")
        })?;
    if !vault
        .generator()
        .private_key_matches(&value.certificate, &private_key)?
    {
        return Err(CredentialError::validation(
            "the provided private key does not match the certificate",
        ));
    }

    let (ca, ca_name, trusted_ca) = match value.ca_name.as_deref() {
        Some(raw) => {
            let ca_name = normalize_name(raw)?;
            vault.ensure_readable(actor, &ca_name).await?;
            let live = versions.find_active_with_transitional(&ca_name).await?;
            let active = live
                .iter()
                .find(|v| !v.is_transitional())
                .and_then(CredentialVersion::certificate)
                .filter(|c| c.certificate_authority)
                .ok_or_else(|| CredentialError::not_found(&ca_name))?;
            if !vault
                .reader()
                .is_signed_by_ca(&value.certificate, &active.certificate)?
            {
                return Err(CertificateError::NotSignedByCa { ca_name }.into());
            }
            let trusted = live
                .iter()
                .find(|v| v.is_transitional())
                .and_then(CredentialVersion::certificate)
                .map(|c| c.certificate.clone());
            (Some(active.certificate.clone()), Some(ca_name), trusted)
        }
        None => {
            let ca = value.ca.filter(|ca| !ca.trim().is_empty());
            if let Some(ca) = &ca {
                if !parsed.is_self_signed
                    && !vault.reader().is_signed_by_ca(&value.certificate, ca)?
                {
                    return Err(CredentialError::validation(
                        "the certificate is not signed by the provided CA",
                    ));
                }
            }
            (ca, None, None)
        }
    };

    let data = CertificateVersionData {
        certificate: value.certificate,
        ca,
        ca_name,
        trusted_ca,
        transitional: false,
        certificate_authority: parsed.is_ca,
        self_signed: parsed.is_self_signed,
        generated: false,
        expiry_date: Some(parsed.not_after),
    };
    Ok((data, private_key))
}
