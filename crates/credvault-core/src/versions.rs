//! Certificate version state.
//!
//! Each certificate version carries a stored `transitional` flag. The
//! *active* version is derived: the newest version that is not
//! transitional. At most one version per credential is transitional; this
//! manager clears the old flag before setting a new one, and refuses to
//! delete a credential's last remaining version.

use tracing::info;
use uuid::Uuid;

use crate::credential::{CertificateVersionData, CredentialVersion};
use crate::error::CredentialError;
use crate::store::CredentialStore;

/// Active/transitional lookups and transitions for certificate credentials.
#[derive(Debug, Clone)]
pub struct CertificateVersionManager {
    store: CredentialStore,
    concatenate_cas: bool,
}

impl CertificateVersionManager {
    #[must_use]
    pub fn new(store: CredentialStore, concatenate_cas: bool) -> Self {
        Self {
            store,
            concatenate_cas,
        }
    }

    /// Newest non-transitional version of the credential named `ca_name`.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] if storage fails.
    pub async fn find_active(
        &self,
        ca_name: &str,
    ) -> Result<Option<CredentialVersion>, CredentialError> {
        let Some(credential) = self.store.find_credential(ca_name).await? else {
            return Ok(None);
        };
        Ok(self
            .store
            .find_versions(credential.uuid)
            .await?
            .into_iter()
            .find(|v| v.certificate().is_some() && !v.is_transitional()))
    }

    /// The active version followed by the transitional one, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] if storage fails.
    pub async fn find_active_with_transitional(
        &self,
        name: &str,
    ) -> Result<Vec<CredentialVersion>, CredentialError> {
        let Some(credential) = self.store.find_credential(name).await? else {
            return Ok(Vec::new());
        };
        let versions = self.store.find_versions(credential.uuid).await?;
        let active = versions
            .iter()
            .find(|v| v.certificate().is_some() && !v.is_transitional());
        let transitional = versions.iter().find(|v| v.is_transitional());
        Ok(active.into_iter().chain(transitional).cloned().collect())
    }

    /// The transitional version of a credential, if any.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] if storage fails.
    pub async fn find_transitional(
        &self,
        credential_uuid: Uuid,
    ) -> Result<Option<CredentialVersion>, CredentialError> {
        Ok(self
            .store
            .find_versions(credential_uuid)
            .await?
            .into_iter()
            .find(CredentialVersion::is_transitional))
    }

    /// Mark `version_uuid` transitional, clearing any other transitional
    /// version of the same credential first.
    ///
    /// # Errors
    ///
    /// `NotFound` if the version does not exist, `Validation` if it is not a
    /// certificate version.
    pub async fn set_transitional_version(
        &self,
        version_uuid: Uuid,
    ) -> Result<CredentialVersion, CredentialError> {
        let mut version = self
            .store
            .find_version(version_uuid)
            .await?
            .ok_or_else(|| CredentialError::not_found(version_uuid.to_string()))?;
        if version.certificate().is_none() {
            return Err(CredentialError::validation(
                "only certificate versions can be transitional",
            ));
        }

        if let Some(current) = self.find_transitional(version.credential_uuid).await? {
            if current.uuid == version.uuid {
                return Ok(current);
            }
            self.clear_flag(current).await?;
        }

        if let Some(data) = version.data.as_certificate_mut() {
            data.transitional = true;
        }
        self.store.update_version(&version).await?;
        info!(
            credential_uuid = %version.credential_uuid,
            version_uuid = %version.uuid,
            "transitional version set"
        );
        Ok(version)
    }

    /// Clear the transitional flag of a credential. Returns the version that
    /// was transitional, or `None` if there was none.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Store`] if storage fails.
    pub async fn unset_transitional_version(
        &self,
        credential_uuid: Uuid,
    ) -> Result<Option<CredentialVersion>, CredentialError> {
        match self.find_transitional(credential_uuid).await? {
            Some(current) => self.clear_flag(current).await.map(Some),
            None => Ok(None),
        }
    }

    async fn clear_flag(
        &self,
        mut version: CredentialVersion,
    ) -> Result<CredentialVersion, CredentialError> {
        if let Some(data) = version.data.as_certificate_mut() {
            data.transitional = false;
        }
        self.store.update_version(&version).await?;
        info!(
            credential_uuid = %version.credential_uuid,
            version_uuid = %version.uuid,
            "transitional version cleared"
        );
        Ok(version)
    }

    /// Hard-delete a version.
    ///
    /// # Errors
    ///
    /// `NotFound` if the version does not exist, `Conflict` if it is the
    /// credential's only version.
    pub async fn delete_version(
        &self,
        version_uuid: Uuid,
    ) -> Result<CredentialVersion, CredentialError> {
        let version = self
            .store
            .find_version(version_uuid)
            .await?
            .ok_or_else(|| CredentialError::not_found(version_uuid.to_string()))?;
        let count = self.store.find_versions(version.credential_uuid).await?.len();
        if count <= 1 {
            return Err(CredentialError::conflict(
                "the last version of a certificate cannot be deleted",
            ));
        }
        self.store.delete_version(&version).await?;
        info!(
            credential_uuid = %version.credential_uuid,
            version_uuid = %version.uuid,
            "certificate version deleted"
        );
        Ok(version)
    }

    /// The `ca` value callers see. With concatenation enabled and a trusted
    /// CA present it is `trim(ca) + "\n" + trim(trusted_ca) + "\n"`.
    #[must_use]
    pub fn presented_ca(&self, data: &CertificateVersionData) -> Option<String> {
        present_ca(data, self.concatenate_cas)
    }
}

/// See [`CertificateVersionManager::presented_ca`].
#[must_use]
pub fn present_ca(data: &CertificateVersionData, concatenate: bool) -> Option<String> {
    match (&data.ca, &data.trusted_ca) {
        (Some(ca), Some(trusted)) if concatenate => {
            Some(format!("{}\n{}\n", ca.trim(), trusted.trim()))
        }
        (ca, _) => ca.clone(),
    }
}
