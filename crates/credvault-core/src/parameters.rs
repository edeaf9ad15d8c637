//! Generation requests.
//!
//! A [`GenerationParameters`] value describes the shape of a credential to
//! produce. It exists only for credential types that can be generated:
//! certificates, passwords, and users. Two requests for the same type can be
//! compared with [`GenerationParameters::is_equivalent_to`], which ignores
//! certificate duration; that comparison drives converge-mode generation.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::credential::CredentialType;
use crate::error::CertificateError;

/// Key lengths the certificate generator supports (ECDSA P-256 / P-384).
pub const SUPPORTED_KEY_LENGTHS: [u32; 2] = [256, 384];

/// Default key length for generated certificates.
pub const DEFAULT_KEY_LENGTH: u32 = 256;

/// Distinguished-name fields of a certificate subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubjectName {
    pub common_name: Option<String>,
    pub organization: Option<String>,
    pub organizational_unit: Option<String>,
    pub locality: Option<String>,
    pub state: Option<String>,
    pub country: Option<String>,
}

impl SubjectName {
    /// Subject with only a common name.
    pub fn common_name(cn: impl Into<String>) -> Self {
        Self {
            common_name: Some(cn.into()),
            ..Self::default()
        }
    }

    /// Whether no field is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.common_name.is_none()
            && self.organization.is_none()
            && self.organizational_unit.is_none()
            && self.locality.is_none()
            && self.state.is_none()
            && self.country.is_none()
    }
}

/// X.509 key usage bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeyUsage {
    DigitalSignature,
    NonRepudiation,
    KeyEncipherment,
    DataEncipherment,
    KeyAgreement,
    KeyCertSign,
    CrlSign,
    EncipherOnly,
    DecipherOnly,
}

/// X.509 extended key usage purposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendedKeyUsage {
    ServerAuth,
    ClientAuth,
    CodeSigning,
    EmailProtection,
    TimeStamping,
    OcspSigning,
}

/// Shape of a certificate to generate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateParameters {
    #[serde(default)]
    pub subject: SubjectName,
    /// DNS names, IP addresses, e-mail addresses, or URIs.
    #[serde(default)]
    pub alternative_names: Vec<String>,
    #[serde(default)]
    pub key_usage: BTreeSet<KeyUsage>,
    #[serde(default)]
    pub extended_key_usage: BTreeSet<ExtendedKeyUsage>,
    #[serde(default = "default_key_length")]
    pub key_length: u32,
    /// Validity in days. `None` means the configured default.
    #[serde(default)]
    pub duration_days: Option<u32>,
    #[serde(default)]
    pub is_ca: bool,
    #[serde(default)]
    pub self_sign: bool,
    /// Name of the CA credential that signs this certificate.
    #[serde(default)]
    pub ca_name: Option<String>,
}

fn default_key_length() -> u32 {
    DEFAULT_KEY_LENGTH
}

impl Default for CertificateParameters {
    fn default() -> Self {
        Self {
            subject: SubjectName::default(),
            alternative_names: Vec::new(),
            key_usage: BTreeSet::new(),
            extended_key_usage: BTreeSet::new(),
            key_length: DEFAULT_KEY_LENGTH,
            duration_days: None,
            is_ca: false,
            self_sign: false,
            ca_name: None,
        }
    }
}

impl CertificateParameters {
    /// Apply the implicit rules: a CA with no signer is self-signed.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        if self.ca_name.is_none() && self.is_ca {
            self.self_sign = true;
        }
        self
    }

    /// Duration to use, falling back to `default_days`.
    #[must_use]
    pub fn effective_duration(&self, default_days: u32) -> u32 {
        self.duration_days.unwrap_or(default_days)
    }

    /// Reject requests the generator cannot satisfy.
    ///
    /// # Errors
    ///
    /// Returns [`CertificateError`] for an unsupported key length, a duration
    /// outside `1..=max_days`, or a request without subject or alternative
    /// names. Signer mistakes are reported as `Generation` errors.
    pub fn validate(&self, default_days: u32, max_days: u32) -> Result<(), CertificateError> {
        if !SUPPORTED_KEY_LENGTHS.contains(&self.key_length) {
            return Err(CertificateError::InvalidKeyLength {
                bits: self.key_length,
            });
        }
        let days = self.effective_duration(default_days);
        if days == 0 || days > max_days {
            return Err(CertificateError::InvalidDuration {
                days,
                max: max_days,
            });
        }
        if self.subject.is_empty() && self.alternative_names.is_empty() {
            return Err(CertificateError::MissingSubject);
        }
        match (&self.ca_name, self.self_sign) {
            (Some(_), true) => Err(CertificateError::Generation {
                reason: "a certificate cannot be both self-signed and signed by a CA".to_owned(),
            }),
            (None, false) => Err(CertificateError::Generation {
                reason: "a certificate needs a CA name, is_ca, or self_sign".to_owned(),
            }),
            _ => Ok(()),
        }
    }

    /// Same shape ignoring duration. Alternative names compare as a set and
    /// CA names compare case-insensitively.
    #[must_use]
    pub fn is_equivalent_to(&self, other: &Self) -> bool {
        let sans = |p: &Self| -> BTreeSet<String> {
            p.alternative_names.iter().map(|s| s.to_lowercase()).collect()
        };
        let ca = |p: &Self| p.ca_name.as_deref().map(str::to_lowercase);

        self.subject == other.subject
            && sans(self) == sans(other)
            && self.key_usage == other.key_usage
            && self.extended_key_usage == other.extended_key_usage
            && self.key_length == other.key_length
            && self.is_ca == other.is_ca
            && self.self_sign == other.self_sign
            && ca(self) == ca(other)
    }
}

/// Shape of a generated password.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PasswordParameters {
    pub length: usize,
    pub exclude_upper: bool,
    pub exclude_lower: bool,
    pub exclude_number: bool,
    pub include_special: bool,
}

impl Default for PasswordParameters {
    fn default() -> Self {
        Self {
            length: 30,
            exclude_upper: false,
            exclude_lower: false,
            exclude_number: false,
            include_special: false,
        }
    }
}

/// Shape of a generated user (username + password).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserParameters {
    /// Fixed username. Generated when absent.
    pub username: Option<String>,
    pub password: PasswordParameters,
}

/// A generation request for one of the generatable credential types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "parameters", rename_all = "snake_case")]
pub enum GenerationParameters {
    Certificate(CertificateParameters),
    Password(PasswordParameters),
    User(UserParameters),
}

impl GenerationParameters {
    /// Credential type this request produces.
    #[must_use]
    pub fn credential_type(&self) -> CredentialType {
        match self {
            Self::Certificate(_) => CredentialType::Certificate,
            Self::Password(_) => CredentialType::Password,
            Self::User(_) => CredentialType::User,
        }
    }

    /// Same type and same shape, ignoring certificate duration.
    #[must_use]
    pub fn is_equivalent_to(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Certificate(a), Self::Certificate(b)) => a.is_equivalent_to(b),
            (Self::Password(a), Self::Password(b)) => a == b,
            (Self::User(a), Self::User(b)) => a == b,
            _ => false,
        }
    }
}

/// What `generate` does when the credential already has a version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteMode {
    /// Keep the existing version.
    #[default]
    NoOverwrite,
    /// Always produce a new version.
    Overwrite,
    /// Produce a new version only if the requested shape differs.
    Converge,
}
