//! Rebuild a generation request from an existing version.
//!
//! Regeneration must produce a credential of the same shape as the one it
//! replaces. For certificates the shape is read back from the stored PEM;
//! for passwords and users it is the parameters recorded on the version.

use std::sync::Arc;

use crate::credential::{CredentialVersion, VersionData};
use crate::error::CredentialError;
use crate::parameters::{CertificateParameters, GenerationParameters};
use crate::x509::CertificateReader;

/// Derives [`GenerationParameters`] from stored versions.
#[derive(Clone)]
pub struct ParameterExtractor {
    reader: Arc<dyn CertificateReader>,
}

impl ParameterExtractor {
    #[must_use]
    pub fn new(reader: Arc<dyn CertificateReader>) -> Self {
        Self { reader }
    }

    /// The request that regenerates `version` in shape.
    ///
    /// The certificate duration is the original validity period, so a
    /// regenerated certificate lives as long as the one it replaces.
    ///
    /// # Errors
    ///
    /// `Validation` for value and JSON credentials, and for certificates that
    /// were neither self-signed nor signed by a stored CA. Parse errors if
    /// the stored certificate is malformed.
    pub fn extract(
        &self,
        version: &CredentialVersion,
    ) -> Result<GenerationParameters, CredentialError> {
        match &version.data {
            VersionData::Value | VersionData::Json => Err(CredentialError::validation(format!(
                "credentials of type '{}' cannot be regenerated",
                version.data.credential_type()
            ))),
            VersionData::Password { parameters } => Ok(GenerationParameters::Password(
                parameters.clone().unwrap_or_default(),
            )),
            VersionData::User {
                username,
                parameters,
            } => {
                let mut params = parameters.clone().unwrap_or_default();
                params.username = Some(username.clone());
                Ok(GenerationParameters::User(params))
            }
            VersionData::Certificate(data) => {
                let parsed = self.reader.parse(&data.certificate)?;
                let self_sign = data.self_signed || parsed.is_self_signed;
                if data.ca_name.is_none() && !self_sign {
                    return Err(CredentialError::validation(
                        "the certificate was not generated by a stored CA and cannot be regenerated",
                    ));
                }
                Ok(GenerationParameters::Certificate(CertificateParameters {
                    subject: parsed.subject.clone(),
                    alternative_names: parsed.alternative_names.clone(),
                    key_usage: parsed.key_usage.clone(),
                    extended_key_usage: parsed.extended_key_usage.clone(),
                    key_length: parsed.key_length,
                    duration_days: Some(parsed.duration_days()),
                    is_ca: parsed.is_ca,
                    self_sign: data.ca_name.is_none() && self_sign,
                    ca_name: data.ca_name.clone(),
                }))
            }
        }
    }
}

impl std::fmt::Debug for ParameterExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParameterExtractor").finish_non_exhaustive()
    }
}
