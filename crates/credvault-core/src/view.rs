//! Caller-facing projections of stored credentials.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::credential::{
    CertificateValue, Credential, CredentialValue, CredentialVersion, VersionData,
};
use crate::crypto::{EncryptedValue, Encryptor};
use crate::error::{CredentialError, StoreError};
use crate::versions::present_ca;

/// Certificate flags shown alongside a certificate value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateFlags {
    pub transitional: bool,
    pub certificate_authority: bool,
    pub self_signed: bool,
    pub generated: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// One decrypted version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CredentialView {
    /// Version id.
    pub id: Uuid,
    pub name: String,
    pub version_created_at: DateTime<Utc>,
    #[serde(flatten)]
    pub value: CredentialValue,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CertificateFlags>,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FoundCredential {
    pub name: String,
    pub version_created_at: DateTime<Utc>,
}

/// Per-version line of a [`CertificateSummary`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateVersionSummary {
    pub id: Uuid,
    pub expiry_date: Option<DateTime<Utc>>,
    pub transitional: bool,
    pub certificate_authority: bool,
    pub self_signed: bool,
    pub generated: bool,
}

/// Certificate credential with its signing relations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub id: Uuid,
    pub name: String,
    /// Signer name; the certificate's own name when self-signed, empty when
    /// signed outside the vault.
    pub signed_by: String,
    /// Credentials whose newest version names this one as signer.
    pub signs: Vec<String>,
    pub versions: Vec<CertificateVersionSummary>,
}

impl CertificateVersionSummary {
    pub(crate) fn of(version: &CredentialVersion) -> Option<Self> {
        let data = version.certificate()?;
        Some(Self {
            id: version.uuid,
            expiry_date: data.expiry_date,
            transitional: data.transitional,
            certificate_authority: data.certificate_authority,
            self_signed: data.self_signed,
            generated: data.generated,
        })
    }
}

fn decrypt_string(
    encryptor: &dyn Encryptor,
    sealed: Option<&EncryptedValue>,
    version: &CredentialVersion,
) -> Result<String, CredentialError> {
    let corrupt = |reason: String| StoreError::Corrupt {
        key: version.uuid.to_string(),
        reason,
    };
    let sealed = sealed.ok_or_else(|| corrupt("missing encrypted value".to_owned()))?;
    let plain = encryptor.decrypt(sealed)?;
    String::from_utf8(plain).map_err(|e| corrupt(e.to_string()).into())
}

/// Decrypt `version` of `credential` into a [`CredentialView`].
///
/// # Errors
///
/// Returns [`CredentialError::Store`] when decryption fails or the stored
/// value is corrupt.
pub fn render(
    encryptor: &dyn Encryptor,
    concatenate_cas: bool,
    credential: &Credential,
    version: &CredentialVersion,
) -> Result<CredentialView, CredentialError> {
    let sealed = version.encrypted_value.as_ref();
    let (value, certificate) = match &version.data {
        VersionData::Value => (
            CredentialValue::Value(decrypt_string(encryptor, sealed, version)?),
            None,
        ),
        VersionData::Json => {
            let raw = decrypt_string(encryptor, sealed, version)?;
            let json = serde_json::from_str(&raw).map_err(|e| StoreError::Corrupt {
                key: version.uuid.to_string(),
                reason: e.to_string(),
            })?;
            (CredentialValue::Json(json), None)
        }
        VersionData::Password { .. } => (
            CredentialValue::Password(decrypt_string(encryptor, sealed, version)?),
            None,
        ),
        VersionData::User { username, .. } => (
            CredentialValue::User {
                username: username.clone(),
                password: decrypt_string(encryptor, sealed, version)?,
            },
            None,
        ),
        VersionData::Certificate(data) => {
            let private_key = match sealed {
                Some(_) => Some(decrypt_string(encryptor, sealed, version)?),
                None => None,
            };
            (
                CredentialValue::Certificate(CertificateValue {
                    ca: present_ca(data, concatenate_cas),
                    ca_name: data.ca_name.clone(),
                    certificate: data.certificate.clone(),
                    private_key,
                }),
                Some(CertificateFlags {
                    transitional: data.transitional,
                    certificate_authority: data.certificate_authority,
                    self_signed: data.self_signed,
                    generated: data.generated,
                    expiry_date: data.expiry_date,
                }),
            )
        }
    };

    Ok(CredentialView {
        id: version.uuid,
        name: credential.name.clone(),
        version_created_at: version.created_at,
        value,
        metadata: version.metadata.clone(),
        certificate,
    })
}
