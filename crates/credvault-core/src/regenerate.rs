//! Producing new versions from generation requests.
//!
//! [`Regenerator`] is the write path shared by `generate`, `regenerate`,
//! and the cascade: it turns [`GenerationParameters`] into fresh key
//! material, encrypts the secret part, and appends a version. It performs
//! no authorization; callers check permissions first.

use std::sync::Arc;

use credvault_storage::StorageBackend;
use tracing::info;

use crate::audit::{AuditOperation, RequestAudit};
use crate::credential::{
    CertificateVersionData, Credential, CredentialType, CredentialVersion, VersionData,
};
use crate::crypto::Encryptor;
use crate::error::CredentialError;
use crate::extract::ParameterExtractor;
use crate::generator::{
    CertificateGenerator, SigningAuthority, generate_password, generate_username,
};
use crate::parameters::{CertificateParameters, GenerationParameters};
use crate::permission::PermissionOperation;
use crate::resolver::PermissionResolver;
use crate::store::{CredentialStore, NewVersion};
use crate::versions::CertificateVersionManager;
use crate::x509::CertificateReader;

/// Options for a single regeneration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegenerateOptions {
    /// Store the new version as the transitional version (CA certificates
    /// only).
    pub set_as_transitional: bool,
}

/// Generates and persists new versions.
#[derive(Clone)]
pub struct Regenerator {
    store: CredentialStore,
    versions: CertificateVersionManager,
    extractor: ParameterExtractor,
    reader: Arc<dyn CertificateReader>,
    generator: Arc<dyn CertificateGenerator>,
    encryptor: Arc<dyn Encryptor>,
    concatenate_cas: bool,
    default_duration_days: u32,
    max_duration_days: u32,
}

impl Regenerator {
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        reader: Arc<dyn CertificateReader>,
        generator: Arc<dyn CertificateGenerator>,
        encryptor: Arc<dyn Encryptor>,
        concatenate_cas: bool,
        default_duration_days: u32,
        max_duration_days: u32,
    ) -> Self {
        let store = CredentialStore::new(storage);
        Self {
            versions: CertificateVersionManager::new(store.clone(), concatenate_cas),
            store,
            extractor: ParameterExtractor::new(Arc::clone(&reader)),
            reader,
            generator,
            encryptor,
            concatenate_cas,
            default_duration_days,
            max_duration_days,
        }
    }

    /// The same regenerator writing to `storage` (typically a staged
    /// transaction).
    #[must_use]
    pub fn on(&self, storage: Arc<dyn StorageBackend>) -> Self {
        let store = CredentialStore::new(storage);
        Self {
            versions: CertificateVersionManager::new(store.clone(), self.concatenate_cas),
            store,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    #[must_use]
    pub fn versions(&self) -> &CertificateVersionManager {
        &self.versions
    }

    #[must_use]
    pub fn extractor(&self) -> &ParameterExtractor {
        &self.extractor
    }

    /// Permission checks for regenerating `name`: WRITE on the credential
    /// and, when its newest version is signed by a stored CA, READ on that
    /// CA.
    ///
    /// # Errors
    ///
    /// `Forbidden` without WRITE, `NotFound` when the credential is missing
    /// or the CA is not readable.
    pub async fn authorize(
        &self,
        resolver: &PermissionResolver,
        actor: &str,
        name: &str,
    ) -> Result<(Credential, CredentialVersion), CredentialError> {
        if !resolver
            .has_permission(actor, name, PermissionOperation::Write)
            .await
        {
            return Err(CredentialError::forbidden(name, PermissionOperation::Write));
        }
        let (credential, latest) = self.current(name).await?;
        if let Some(ca_name) = latest.ca_name() {
            if !resolver
                .has_permission(actor, ca_name, PermissionOperation::Read)
                .await
            {
                return Err(CredentialError::not_found(ca_name));
            }
        }
        Ok((credential, latest))
    }

    /// Credential and newest version for `name`.
    ///
    /// # Errors
    ///
    /// `NotFound` when either is missing.
    pub async fn current(
        &self,
        name: &str,
    ) -> Result<(Credential, CredentialVersion), CredentialError> {
        let credential = self
            .store
            .find_credential(name)
            .await?
            .ok_or_else(|| CredentialError::not_found(name))?;
        let latest = self
            .store
            .find_latest(credential.uuid)
            .await?
            .ok_or_else(|| CredentialError::not_found(name))?;
        Ok((credential, latest))
    }

    /// Regenerate `name` in shape, without authorization, and record an
    /// audit event for the new version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the credential or its signer is missing, `Validation`
    /// if it cannot be regenerated, `Conflict` for a disallowed transitional
    /// request, or infrastructure errors.
    pub async fn regenerate(
        &self,
        name: &str,
        options: RegenerateOptions,
        audit: &mut RequestAudit,
    ) -> Result<CredentialVersion, CredentialError> {
        let (credential, latest) = self.current(name).await?;
        let params = self.extractor.extract(&latest)?;
        let version = self
            .produce(&credential, &params, latest.metadata.clone(), options)
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
            "credential regenerated"
        );
        Ok(version)
    }

    /// Generate material for `params` and append it as a new version of
    /// `credential`.
    ///
    /// # Errors
    ///
    /// See [`regenerate`](Self::regenerate).
    pub async fn produce(
        &self,
        credential: &Credential,
        params: &GenerationParameters,
        metadata: Option<serde_json::Value>,
        options: RegenerateOptions,
    ) -> Result<CredentialVersion, CredentialError> {
        ensure_same_type(credential, params.credential_type())?;
        if options.set_as_transitional && params.credential_type() != CredentialType::Certificate {
            return Err(CredentialError::validation(
                "only CA certificates can have a transitional version",
            ));
        }

        let new = match params {
            GenerationParameters::Certificate(cert) => {
                self.check_transitional_request(credential, cert, options).await?;
                self.certificate_version(cert).await?
            }
            GenerationParameters::Password(password) => {
                let value = generate_password(password).map_err(CredentialError::validation)?;
                NewVersion {
                    data: VersionData::Password {
                        parameters: Some(password.clone()),
                    },
                    encrypted_value: Some(self.encryptor.encrypt(value.as_bytes())?),
                    metadata: None,
                }
            }
            GenerationParameters::User(user) => {
                let value =
                    generate_password(&user.password).map_err(CredentialError::validation)?;
                let username = user.username.clone().unwrap_or_else(generate_username);
                NewVersion {
                    data: VersionData::User {
                        username,
                        parameters: Some(user.clone()),
                    },
                    encrypted_value: Some(self.encryptor.encrypt(value.as_bytes())?),
                    metadata: None,
                }
            }
        };

        let version = self
            .store
            .save_version(credential, NewVersion { metadata, ..new })
            .await?;

        if options.set_as_transitional {
            return self.versions.set_transitional_version(version.uuid).await;
        }
        Ok(version)
    }

    async fn check_transitional_request(
        &self,
        credential: &Credential,
        params: &CertificateParameters,
        options: RegenerateOptions,
    ) -> Result<(), CredentialError> {
        if !options.set_as_transitional {
            return Ok(());
        }
        if !params.is_ca {
            return Err(CredentialError::validation(
                "only CA certificates can have a transitional version",
            ));
        }
        if self.versions.find_transitional(credential.uuid).await?.is_some() {
            return Err(CredentialError::conflict(
                "the maximum number of transitional versions for this CA has been reached",
            ));
        }
        Ok(())
    }

    async fn certificate_version(
        &self,
        params: &CertificateParameters,
    ) -> Result<NewVersion, CredentialError> {
        let params = params.clone().normalized();
        params.validate(self.default_duration_days, self.max_duration_days)?;

        let (generated, trusted_ca) = match &params.ca_name {
            None => (
                self.generator
                    .generate(&params, None, self.default_duration_days)?,
                None,
            ),
            Some(ca_name) => {
                let signer = self.signer(ca_name).await?;
                let generated = self.generator.generate(
                    &params,
                    Some(&SigningAuthority {
                        certificate: &signer.certificate,
                        private_key: &signer.private_key,
                    }),
                    self.default_duration_days,
                )?;
                (generated, signer.transitional_certificate)
            }
        };

        let parsed = self.reader.parse(&generated.certificate)?;
        Ok(NewVersion {
            data: VersionData::Certificate(CertificateVersionData {
                certificate: generated.certificate,
                ca: Some(generated.ca),
                ca_name: params.ca_name.clone(),
                trusted_ca,
                transitional: false,
                certificate_authority: params.is_ca,
                self_signed: params.self_sign,
                generated: true,
                expiry_date: Some(parsed.not_after),
            }),
            encrypted_value: Some(self.encryptor.encrypt(generated.private_key.as_bytes())?),
            metadata: None,
        })
    }

    /// Active signing material of `ca_name` plus the certificate of its
    /// transitional version, if any.
    async fn signer(&self, ca_name: &str) -> Result<Signer, CredentialError> {
        let live = self.versions.find_active_with_transitional(ca_name).await?;
        let active = live
            .iter()
            .find(|v| !v.is_transitional())
            .ok_or_else(|| CredentialError::not_found(ca_name))?;
        let data = active
            .certificate()
            .filter(|c| c.certificate_authority)
            .ok_or_else(|| {
                CredentialError::validation(format!("'{ca_name}' is not a certificate authority"))
            })?;
        let sealed = active.encrypted_value.as_ref().ok_or_else(|| {
            CredentialError::validation(format!("CA '{ca_name}' has no private key"))
        })?;
        let private_key = String::from_utf8(self.encryptor.decrypt(sealed)?).map_err(|_| {
            CredentialError::validation(format!("CA '{ca_name}' private key is not valid PEM"))
        })?;
        let transitional_certificate = live
            .iter()
            .find(|v| v.is_transitional())
            .and_then(|v| v.certificate())
            .map(|c| c.certificate.clone());

        Ok(Signer {
            certificate: data.certificate.clone(),
            private_key,
            transitional_certificate,
        })
    }
}

struct Signer {
    certificate: String,
    private_key: String,
    transitional_certificate: Option<String>,
}

fn type_mismatch(credential: &Credential) -> CredentialError {
    CredentialError::validation(format!(
        "the credential '{}' is of type '{}'; delete it to store a different type",
        credential.name, credential.credential_type
    ))
}

/// Reject a version whose type differs from the credential's.
pub(crate) fn ensure_same_type(
    credential: &Credential,
    incoming: CredentialType,
) -> Result<(), CredentialError> {
    if credential.credential_type == incoming {
        Ok(())
    } else {
        Err(type_mismatch(credential))
    }
}

impl std::fmt::Debug for Regenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Regenerator")
            .field("default_duration_days", &self.default_duration_days)
            .finish_non_exhaustive()
    }
}
