//! Shared fixtures for the service-level tests.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::BTreeSet;
use std::sync::Arc;

use credvault_core::audit::{AuditManager, MemoryAuditBackend};
use credvault_core::credential::{CredentialVersion, normalize_name};
use credvault_core::crypto::AesGcmEncryptor;
use credvault_core::generator::{CertificateGenerator, RcgenGenerator};
use credvault_core::parameters::{
    CertificateParameters, GenerationParameters, SubjectName, WriteMode,
};
use credvault_core::permission::PermissionOperation;
use credvault_core::store::CredentialStore;
use credvault_core::view::CredentialView;
use credvault_core::x509::X509Reader;
use credvault_core::{
    CertificateService, CoreConfig, CredentialService, PermissionService, Vault,
};
use credvault_storage::MemoryBackend;

pub const ADMIN: &str = "uaa-user:admin";

pub struct Harness {
    pub vault: Arc<Vault>,
    pub credentials: CredentialService,
    pub certificates: CertificateService,
    pub permissions: PermissionService,
    pub audit: Arc<MemoryAuditBackend>,
}

pub async fn harness() -> Harness {
    harness_with(Arc::new(RcgenGenerator), CoreConfig::default()).await
}

/// A harness whose vault uses `generator`. [`ADMIN`] holds every operation
/// on `/*`.
pub async fn harness_with(generator: Arc<dyn CertificateGenerator>, config: CoreConfig) -> Harness {
    let audit = Arc::new(MemoryAuditBackend::new());
    let manager = Arc::new(AuditManager::new());
    manager.add_backend(audit.clone()).await;

    let vault = Arc::new(Vault::with_collaborators(
        Arc::new(MemoryBackend::new()),
        Arc::new(AesGcmEncryptor::ephemeral()),
        Arc::new(X509Reader),
        generator,
        manager,
        config,
    ));
    let harness = Harness {
        credentials: CredentialService::new(Arc::clone(&vault)),
        certificates: CertificateService::new(Arc::clone(&vault)),
        permissions: PermissionService::new(Arc::clone(&vault)),
        vault,
        audit,
    };
    grant(&harness, "/*", ADMIN, &PermissionOperation::ALL).await;
    harness
}

pub async fn grant(h: &Harness, path: &str, actor: &str, ops: &[PermissionOperation]) {
    h.vault
        .resolver()
        .upsert_permissions(path, actor, &ops.iter().copied().collect::<BTreeSet<_>>())
        .await
        .unwrap();
}

pub fn ca(ca_name: Option<&str>) -> GenerationParameters {
    GenerationParameters::Certificate(CertificateParameters {
        subject: SubjectName::common_name("test ca"),
        is_ca: true,
        ca_name: ca_name.map(str::to_owned),
        ..CertificateParameters::default()
    })
}

pub fn leaf(ca_name: &str, common_name: &str) -> GenerationParameters {
    GenerationParameters::Certificate(CertificateParameters {
        subject: SubjectName::common_name(common_name),
        alternative_names: vec![format!("{common_name}.internal")],
        ca_name: Some(ca_name.to_owned()),
        ..CertificateParameters::default()
    })
}

pub async fn generate(h: &Harness, name: &str, params: GenerationParameters) -> CredentialView {
    h.credentials
        .generate(ADMIN, name, params, WriteMode::Overwrite, None)
        .await
        .unwrap()
}

pub fn store(h: &Harness) -> CredentialStore {
    CredentialStore::new(Arc::clone(h.vault.storage()))
}

pub async fn versions_of(h: &Harness, name: &str) -> Vec<CredentialVersion> {
    let store = store(h);
    let credential = store
        .find_credential(&normalize_name(name).unwrap())
        .await
        .unwrap()
        .unwrap();
    store.find_versions(credential.uuid).await.unwrap()
}

pub async fn version_count(h: &Harness, name: &str) -> usize {
    versions_of(h, name).await.len()
}
