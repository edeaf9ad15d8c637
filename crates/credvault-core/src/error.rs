//! Error types for `credvault-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material, and caller-facing
//! not-found errors never reveal whether the credential exists.

use credvault_storage::StorageError;

use crate::permission::PermissionOperation;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },

    /// The value was encrypted under a key this encryptor does not hold.
    #[error("unknown encryption key '{key_uuid}'")]
    UnknownKey { key_uuid: String },

    /// A stored nonce or ciphertext was not valid base64 or had the wrong size.
    #[error("malformed encrypted value: {reason}")]
    Malformed { reason: String },
}

/// Errors from the credential and permission stores.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The storage backend failed.
    #[error("store backend error: {0}")]
    Storage(#[from] StorageError),

    /// A record could not be serialized.
    #[error("record serialization failed: {reason}")]
    Serialization { reason: String },

    /// A stored record could not be decoded or references something missing.
    #[error("corrupt record at '{key}': {reason}")]
    Corrupt { key: String, reason: String },

    /// Encrypting or decrypting a stored value failed.
    #[error("store crypto error: {0}")]
    Crypto(#[from] CryptoError),
}

/// Errors from parsing, validating, or generating X.509 material.
#[derive(Debug, thiserror::Error)]
pub enum CertificateError {
    /// The PEM or DER input could not be parsed.
    #[error("malformed certificate: {reason}")]
    Parse { reason: String },

    /// A private key could not be parsed.
    #[error("malformed private key: {reason}")]
    PrivateKey { reason: String },

    /// Building or signing the certificate failed.
    #[error("certificate generation failed: {reason}")]
    Generation { reason: String },

    /// Unsupported key length.
    #[error("unsupported key length {bits}; supported lengths are 256 and 384")]
    InvalidKeyLength { bits: u32 },

    /// Duration outside the allowed range.
    #[error("invalid duration {days} days; must be between 1 and {max}")]
    InvalidDuration { days: u32, max: u32 },

    /// Neither a subject field nor an alternative name was supplied.
    #[error("a certificate needs at least one subject field or alternative name")]
    MissingSubject,

    /// An alternative name could not be encoded.
    #[error("invalid alternative name '{value}'")]
    InvalidAlternativeName { value: String },

    /// The certificate was not signed by the CA it claims.
    #[error("certificate is not signed by CA '{ca_name}'")]
    NotSignedByCa { ca_name: String },
}

/// Errors from audit operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// Every audit backend failed to write, so the request must be denied.
    #[error("all audit backends failed (fail-closed)")]
    AllBackendsFailed,

    /// A specific audit backend failed.
    #[error("audit backend '{name}' failed: {reason}")]
    BackendFailure { name: String, reason: String },

    /// Serialization of the audit record failed.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Caller-facing classification of a [`CredentialError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Absent, or not readable by the actor. Deliberately indistinguishable.
    NotFound,
    /// The actor lacks WRITE/DELETE/ACL rights on a visible resource.
    Forbidden,
    /// Malformed input or material.
    Validation,
    /// The request conflicts with the current state.
    Conflict,
    /// The caller cancelled the operation.
    Cancelled,
    /// Storage, crypto, or audit infrastructure failed.
    Internal,
}

/// Errors returned by the credential, certificate, and permission services.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// The credential does not exist or the actor may not read it.
    #[error(
        "the request could not be completed because the credential '{name}' does not exist or you do not have sufficient authorization"
    )]
    NotFound { name: String },

    /// The actor lacks the required operation on the path.
    #[error("actor is not permitted to {operation} '{name}'")]
    Forbidden {
        name: String,
        operation: PermissionOperation,
    },

    /// The request or the stored material is invalid.
    #[error("invalid request: {reason}")]
    Validation { reason: String },

    /// The request conflicts with the credential's current state.
    #[error("conflict: {reason}")]
    Conflict { reason: String },

    /// The operation was cancelled before it completed; nothing was committed.
    #[error("operation cancelled")]
    Cancelled,

    /// X.509 parsing, validation, or generation failed.
    #[error(transparent)]
    Certificate(#[from] CertificateError),

    /// Storage or serialization failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The audit trail could not be written.
    #[error(transparent)]
    Audit(#[from] AuditError),
}

impl CredentialError {
    /// Shorthand for [`CredentialError::NotFound`].
    pub fn not_found(name: impl Into<String>) -> Self {
        Self::NotFound { name: name.into() }
    }

    /// Shorthand for [`CredentialError::Forbidden`].
    pub fn forbidden(name: impl Into<String>, operation: PermissionOperation) -> Self {
        Self::Forbidden {
            name: name.into(),
            operation,
        }
    }

    /// Shorthand for [`CredentialError::Validation`].
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    /// Shorthand for [`CredentialError::Conflict`].
    pub fn conflict(reason: impl Into<String>) -> Self {
        Self::Conflict {
            reason: reason.into(),
        }
    }

    /// Classify this error for the transport layer.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Forbidden { .. } => ErrorKind::Forbidden,
            Self::Validation { .. } | Self::Certificate(_) => ErrorKind::Validation,
            Self::Conflict { .. } => ErrorKind::Conflict,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Store(_) | Self::Audit(_) => ErrorKind::Internal,
        }
    }
}

impl From<StorageError> for CredentialError {
    fn from(err: StorageError) -> Self {
        Self::Store(StoreError::Storage(err))
    }
}

impl From<CryptoError> for CredentialError {
    fn from(err: CryptoError) -> Self {
        Self::Store(StoreError::Crypto(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_message_does_not_distinguish_absence_from_denial() {
        let msg = CredentialError::not_found("/a/b").to_string();
        assert!(msg.contains("does not exist or you do not have sufficient authorization"));
    }

    #[test]
    fn certificate_errors_classify_as_validation() {
        let err = CredentialError::from(CertificateError::MissingSubject);
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn storage_errors_classify_as_internal() {
        let err = CredentialError::from(StorageError::TransactionFinished);
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn forbidden_names_the_operation() {
        let err = CredentialError::forbidden("/ca/leaf", PermissionOperation::Write);
        assert_eq!(err.kind(), ErrorKind::Forbidden);
        assert_eq!(err.to_string(), "actor is not permitted to write '/ca/leaf'");
    }
}
