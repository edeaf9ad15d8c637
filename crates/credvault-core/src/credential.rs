//! Credential and version records.
//!
//! A [`Credential`] is a named container; each write creates a new
//! [`CredentialVersion`]. Non-secret attributes live in [`VersionData`], a
//! closed enum keyed by [`CredentialType`]. Secret material is held only as
//! an [`EncryptedValue`] and surfaces decrypted as a [`CredentialValue`].

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::crypto::EncryptedValue;
use crate::error::CredentialError;
use crate::parameters::{PasswordParameters, UserParameters};

/// Discriminant of the credential sum type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialType {
    Value,
    Json,
    Password,
    User,
    Certificate,
}

impl CredentialType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Value => "value",
            Self::Json => "json",
            Self::Password => "password",
            Self::User => "user",
            Self::Certificate => "certificate",
        }
    }

    /// Whether credentials of this type can be regenerated in shape.
    #[must_use]
    pub fn is_generatable(self) -> bool {
        matches!(self, Self::Password | Self::User | Self::Certificate)
    }
}

impl fmt::Display for CredentialType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalize a credential name: prepend `/` when missing and reject empty
/// segments or a trailing slash.
///
/// # Errors
///
/// Returns [`CredentialError::Validation`] for malformed names.
pub fn normalize_name(name: &str) -> Result<String, CredentialError> {
    let trimmed = name.trim();
    let name = if trimmed.starts_with('/') {
        trimmed.to_owned()
    } else {
        format!("/{trimmed}")
    };
    if name.len() < 2 {
        return Err(CredentialError::validation("a credential name must not be empty"));
    }
    if name.ends_with('/') || name.contains("//") {
        return Err(CredentialError::validation(format!(
            "credential name '{name}' must not contain empty segments or a trailing slash"
        )));
    }
    if name.contains('*') {
        return Err(CredentialError::validation(format!(
            "credential name '{name}' must not contain '*'"
        )));
    }
    Ok(name)
}

/// Hex SHA-256 of the lower-cased name. Two names differing only in case
/// share a checksum.
#[must_use]
pub fn name_checksum(name: &str) -> String {
    hex::encode(Sha256::digest(name.to_lowercase().as_bytes()))
}

/// A named secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub uuid: Uuid,
    /// Name as first created. Lookups ignore case.
    pub name: String,
    pub checksum: String,
    pub credential_type: CredentialType,
    pub created_at: DateTime<Utc>,
}

impl Credential {
    /// A new credential record. The name must already be normalized.
    #[must_use]
    pub fn new(name: &str, credential_type: CredentialType) -> Self {
        Self {
            uuid: Uuid::new_v4(),
            name: name.to_owned(),
            checksum: name_checksum(name),
            credential_type,
            created_at: Utc::now(),
        }
    }
}

/// Certificate attributes of a version. The private key is the version's
/// encrypted value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateVersionData {
    /// PEM certificate.
    pub certificate: String,
    /// Signer's PEM at issuance time.
    pub ca: Option<String>,
    /// Credential name of the signer, if signed by a stored CA.
    pub ca_name: Option<String>,
    /// Extra trust-chain PEM, typically the signer's transitional version.
    pub trusted_ca: Option<String>,
    pub transitional: bool,
    pub certificate_authority: bool,
    pub self_signed: bool,
    pub generated: bool,
    pub expiry_date: Option<DateTime<Utc>>,
}

/// Non-secret attributes of a version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VersionData {
    Value,
    Json,
    Password {
        #[serde(default)]
        parameters: Option<PasswordParameters>,
    },
    User {
        username: String,
        #[serde(default)]
        parameters: Option<UserParameters>,
    },
    Certificate(CertificateVersionData),
}

impl VersionData {
    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Value => CredentialType::Value,
            Self::Json => CredentialType::Json,
            Self::Password { .. } => CredentialType::Password,
            Self::User { .. } => CredentialType::User,
            Self::Certificate(_) => CredentialType::Certificate,
        }
    }

    #[must_use]
    pub fn as_certificate(&self) -> Option<&CertificateVersionData> {
        match self {
            Self::Certificate(data) => Some(data),
            _ => None,
        }
    }

    pub fn as_certificate_mut(&mut self) -> Option<&mut CertificateVersionData> {
        match self {
            Self::Certificate(data) => Some(data),
            _ => None,
        }
    }
}

/// One immutable snapshot of a credential's value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialVersion {
    pub uuid: Uuid,
    pub credential_uuid: Uuid,
    /// Position in the credential's history, starting at 1.
    pub ordinal: u64,
    pub created_at: DateTime<Utc>,
    /// Secret part. Absent for certificates imported without a private key.
    pub encrypted_value: Option<EncryptedValue>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
    pub data: VersionData,
}

impl CredentialVersion {
    #[must_use]
    pub fn certificate(&self) -> Option<&CertificateVersionData> {
        self.data.as_certificate()
    }

    /// Whether this is a certificate version flagged transitional.
    #[must_use]
    pub fn is_transitional(&self) -> bool {
        self.certificate().is_some_and(|c| c.transitional)
    }

    /// Whether this is a certificate version that can sign others.
    #[must_use]
    pub fn is_certificate_authority(&self) -> bool {
        self.certificate().is_some_and(|c| c.certificate_authority)
    }

    /// Signer named by this version, if any.
    #[must_use]
    pub fn ca_name(&self) -> Option<&str> {
        self.certificate().and_then(|c| c.ca_name.as_deref())
    }
}

/// Decrypted certificate value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateValue {
    #[serde(default)]
    pub ca: Option<String>,
    #[serde(default)]
    pub ca_name: Option<String>,
    pub certificate: String,
    #[serde(default)]
    pub private_key: Option<String>,
}

/// Decrypted value of a version, one variant per credential type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CredentialValue {
    Value(String),
    Json(serde_json::Value),
    Password(String),
    User { username: String, password: String },
    Certificate(CertificateValue),
}

impl CredentialValue {
    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Value(_) => CredentialType::Value,
            Self::Json(_) => CredentialType::Json,
            Self::Password(_) => CredentialType::Password,
            Self::User { .. } => CredentialType::User,
            Self::Certificate(_) => CredentialType::Certificate,
        }
    }
}

/// Case-insensitive, order-independent set of credential names. Keeps the
/// first spelling seen for each name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NameSet {
    entries: BTreeMap<String, String>,
}

impl NameSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `name`; returns false if an equal name (ignoring case) exists.
    pub fn insert(&mut self, name: &str) -> bool {
        let key = name.to_lowercase();
        if self.entries.contains_key(&key) {
            return false;
        }
        self.entries.insert(key, name.to_owned());
        true
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_lowercase())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in lower-case order, original spelling.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.values().map(String::as_str)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.entries.into_values().collect()
    }
}

impl Serialize for NameSet {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.iter())
    }
}

impl<'a> FromIterator<&'a str> for NameSet {
    fn from_iter<I: IntoIterator<Item = &'a str>>(iter: I) -> Self {
        let mut set = Self::new();
        for name in iter {
            set.insert(name);
        }
        set
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn names_gain_a_leading_slash() {
        assert_eq!(normalize_name("a/b").unwrap(), "/a/b");
        assert_eq!(normalize_name("/a/b").unwrap(), "/a/b");
        assert!(normalize_name("/").is_err());
        assert!(normalize_name("/a//b").is_err());
        assert!(normalize_name("/a/").is_err());
        assert!(normalize_name("/a/*").is_err());
    }

    #[test]
    fn checksum_ignores_case() {
        assert_eq!(name_checksum("/CA/Root"), name_checksum("/ca/root"));
        assert_ne!(name_checksum("/ca/root"), name_checksum("/ca/leaf"));
    }

    #[test]
    fn name_set_dedupes_case_insensitively() {
        let mut set = NameSet::new();
        assert!(set.insert("/ca/Leaf"));
        assert!(!set.insert("/CA/leaf"));
        assert!(set.contains("/ca/leaf"));
        assert_eq!(set.into_vec(), vec!["/ca/Leaf".to_owned()]);
    }

    #[test]
    fn version_data_tags_by_type() {
        let data = VersionData::Certificate(CertificateVersionData {
            certificate: "pem".to_owned(),
            certificate_authority: true,
            ..CertificateVersionData::default()
        });
        let json = serde_json::to_value(&data).unwrap();
        assert_eq!(json["type"], "certificate");
        assert_eq!(json["certificate_authority"], true);

        let back: VersionData = serde_json::from_value(json).unwrap();
        assert_eq!(back.credential_type(), CredentialType::Certificate);
    }
}
