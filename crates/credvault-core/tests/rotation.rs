//! Certificate rotation: regeneration in shape, transitional versions, and
//! version deletion.

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use credvault_core::credential::CredentialValue;
use credvault_core::error::CredentialError;
use credvault_core::parameters::{
    CertificateParameters, ExtendedKeyUsage, GenerationParameters, KeyUsage, SubjectName,
};
use credvault_core::permission::PermissionOperation::{Delete, Read, Write};
use credvault_core::view::CredentialView;
use credvault_core::x509::{CertificateReader, X509Reader};
use credvault_core::CoreConfig;

use common::{ADMIN, ca, generate, grant, harness, harness_with, leaf, versions_of};

fn certificate_of(view: &CredentialView) -> &credvault_core::credential::CertificateValue {
    match &view.value {
        CredentialValue::Certificate(cert) => cert,
        other => unreachable!("expected a certificate, got {:?}", other.credential_type()),
    }
}

async fn certificate_uuid(h: &common::Harness, name: &str) -> uuid::Uuid {
    h.certificates.get_by_name(ADMIN, name).await.unwrap().id
}

// ── Shape preservation ───────────────────────────────────────────────

#[tokio::test]
async fn test_regeneration_preserves_shape_with_fresh_material() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    let params = GenerationParameters::Certificate(CertificateParameters {
        subject: SubjectName {
            common_name: Some("api".to_owned()),
            organization: Some("Example".to_owned()),
            country: Some("NL".to_owned()),
            ..SubjectName::default()
        },
        alternative_names: vec!["api.internal".to_owned(), "10.1.2.3".to_owned()],
        key_usage: BTreeSet::from([KeyUsage::DigitalSignature, KeyUsage::KeyEncipherment]),
        extended_key_usage: BTreeSet::from([ExtendedKeyUsage::ServerAuth]),
        key_length: 384,
        duration_days: Some(30),
        ca_name: Some("/ca".to_owned()),
        ..CertificateParameters::default()
    });
    let before = generate(&h, "/api", params).await;

    // X.509 validity has second granularity.
    tokio::time::sleep(Duration::from_millis(1100)).await;
    let after = h.credentials.regenerate(ADMIN, "/api").await.unwrap();

    let old = certificate_of(&before);
    let new = certificate_of(&after);
    let old_parsed = X509Reader.parse(&old.certificate).unwrap();
    let new_parsed = X509Reader.parse(&new.certificate).unwrap();

    assert_eq!(new_parsed.subject, old_parsed.subject);
    assert_eq!(
        new_parsed.alternative_names.iter().collect::<BTreeSet<_>>(),
        old_parsed.alternative_names.iter().collect::<BTreeSet<_>>()
    );
    assert_eq!(new_parsed.key_usage, old_parsed.key_usage);
    assert_eq!(new_parsed.extended_key_usage, old_parsed.extended_key_usage);
    assert_eq!(new_parsed.key_length, 384);
    assert_eq!(new_parsed.duration_days(), 30);
    assert_eq!(new.ca_name.as_deref(), Some("/ca"));

    assert_ne!(new.certificate, old.certificate);
    assert_ne!(new.private_key, old.private_key);
    assert!(new_parsed.not_after > old_parsed.not_after);
    assert_ne!(after.id, before.id);
}

#[tokio::test]
async fn test_regeneration_keeps_metadata() {
    let h = harness().await;
    let metadata = serde_json::json!({"owner": "team-a"});
    h.credentials
        .generate(
            ADMIN,
            "/pw",
            GenerationParameters::Password(Default::default()),
            credvault_core::parameters::WriteMode::Overwrite,
            Some(metadata.clone()),
        )
        .await
        .unwrap();

    let regenerated = h.credentials.regenerate(ADMIN, "/pw").await.unwrap();
    assert_eq!(regenerated.metadata, Some(metadata));
}

#[tokio::test]
async fn test_regenerate_requires_read_on_signing_ca() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    generate(&h, "/svc", leaf("/ca", "svc")).await;
    grant(&h, "/svc", "bob", &[Read, Write]).await;

    let err = h.credentials.regenerate("bob", "/svc").await.unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { ref name } if name == "/ca"));

    grant(&h, "/ca", "bob", &[Read]).await;
    h.credentials.regenerate("bob", "/svc").await.unwrap();
}

#[tokio::test]
async fn test_regenerate_without_write_is_forbidden() {
    let h = harness().await;
    generate(&h, "/svc", ca(None)).await;
    grant(&h, "/svc", "bob", &[Read]).await;

    let err = h.credentials.regenerate("bob", "/svc").await.unwrap_err();
    assert!(matches!(err, CredentialError::Forbidden { .. }));
}

#[tokio::test]
async fn test_values_cannot_be_regenerated() {
    let h = harness().await;
    h.credentials
        .set(ADMIN, "/v", CredentialValue::Value("x".to_owned()), None)
        .await
        .unwrap();

    let err = h.credentials.regenerate(ADMIN, "/v").await.unwrap_err();
    assert!(matches!(err, CredentialError::Validation { .. }));
}

// ── Transitional versions ────────────────────────────────────────────

#[tokio::test]
async fn test_at_most_one_transitional_version() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    h.credentials.regenerate(ADMIN, "/ca").await.unwrap();
    h.credentials.regenerate(ADMIN, "/ca").await.unwrap();
    let id = certificate_uuid(&h, "/ca").await;
    let all = versions_of(&h, "/ca").await;
    let (v1, v2) = (all[2].uuid, all[1].uuid);

    h.certificates
        .set_transitional_version(ADMIN, id, Some(v1))
        .await
        .unwrap();
    let live = h
        .certificates
        .set_transitional_version(ADMIN, id, Some(v2))
        .await
        .unwrap();

    let flagged: Vec<_> = versions_of(&h, "/ca")
        .await
        .into_iter()
        .filter(|v| v.is_transitional())
        .map(|v| v.uuid)
        .collect();
    assert_eq!(flagged, vec![v2]);
    assert_eq!(live.len(), 2);
    assert_eq!(live[1].id, v2);
    assert!(live[1].certificate.as_ref().unwrap().transitional);
}

#[tokio::test]
async fn test_clearing_transitional_version() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    h.certificates
        .regenerate(ADMIN, certificate_uuid(&h, "/ca").await, true)
        .await
        .unwrap();
    let id = certificate_uuid(&h, "/ca").await;

    let live = h
        .certificates
        .set_transitional_version(ADMIN, id, None)
        .await
        .unwrap();
    assert_eq!(live.len(), 1);
    assert!(versions_of(&h, "/ca").await.iter().all(|v| !v.is_transitional()));
}

#[tokio::test]
async fn test_transitional_version_of_another_certificate_is_rejected() {
    let h = harness().await;
    generate(&h, "/ca1", ca(None)).await;
    generate(&h, "/ca2", ca(None)).await;
    let foreign = versions_of(&h, "/ca2").await[0].uuid;

    let err = h
        .certificates
        .set_transitional_version(ADMIN, certificate_uuid(&h, "/ca1").await, Some(foreign))
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::Validation { .. }));
}

#[tokio::test]
async fn test_second_transitional_regeneration_conflicts() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    let id = certificate_uuid(&h, "/ca").await;
    h.certificates.regenerate(ADMIN, id, true).await.unwrap();

    let err = h.certificates.regenerate(ADMIN, id, true).await.unwrap_err();
    assert!(matches!(err, CredentialError::Conflict { .. }));
}

#[tokio::test]
async fn test_leaf_cannot_become_transitional() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    generate(&h, "/leaf", leaf("/ca", "leaf")).await;

    let err = h
        .certificates
        .regenerate(ADMIN, certificate_uuid(&h, "/leaf").await, true)
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::Validation { .. }));
    assert_eq!(versions_of(&h, "/leaf").await.len(), 1);
}

#[tokio::test]
async fn test_signing_uses_active_version_and_trusts_transitional() {
    let h = harness_with(
        std::sync::Arc::new(credvault_core::generator::RcgenGenerator),
        CoreConfig {
            concatenate_cas: true,
            ..CoreConfig::default()
        },
    )
    .await;
    let original = generate(&h, "/ca", ca(None)).await;
    let transitional = h
        .certificates
        .regenerate(ADMIN, certificate_uuid(&h, "/ca").await, true)
        .await
        .unwrap();
    let issued = generate(&h, "/leaf", leaf("/ca", "leaf")).await;

    let active_pem = &certificate_of(&original).certificate;
    let next_pem = &certificate_of(&transitional).certificate;
    let leaf = certificate_of(&issued);
    assert!(X509Reader.is_signed_by_ca(&leaf.certificate, active_pem).unwrap());
    assert_eq!(
        leaf.ca.as_deref(),
        Some(format!("{}\n{}\n", active_pem.trim(), next_pem.trim()).as_str())
    );
}

#[tokio::test]
async fn test_current_versions_are_active_then_transitional() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    h.credentials.regenerate(ADMIN, "/ca").await.unwrap();
    let id = certificate_uuid(&h, "/ca").await;
    h.certificates.regenerate(ADMIN, id, true).await.unwrap();

    let all = h.certificates.get_versions(ADMIN, id, false).await.unwrap();
    let current = h.certificates.get_versions(ADMIN, id, true).await.unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(current.len(), 2);
    assert_eq!(current[0].id, all[1].id);
    assert_eq!(current[1].id, all[0].id);
}

#[tokio::test]
async fn test_versions_of_unreadable_certificate_are_not_found() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    let id = certificate_uuid(&h, "/ca").await;

    let err = h.certificates.get_versions("bob", id, false).await.unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { .. }));
}

// ── Version deletion ─────────────────────────────────────────────────

#[tokio::test]
async fn test_last_version_cannot_be_deleted() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    let id = certificate_uuid(&h, "/ca").await;
    let only = versions_of(&h, "/ca").await[0].uuid;

    let err = h
        .certificates
        .delete_version(ADMIN, id, only)
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::Conflict { .. }));
    assert_eq!(versions_of(&h, "/ca").await.len(), 1);
}

#[tokio::test]
async fn test_delete_version_requires_delete_permission() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    h.credentials.regenerate(ADMIN, "/ca").await.unwrap();
    let id = certificate_uuid(&h, "/ca").await;
    let oldest = versions_of(&h, "/ca").await[1].uuid;
    grant(&h, "/ca", "bob", &[Read, Write]).await;

    let err = h
        .certificates
        .delete_version("bob", id, oldest)
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::Forbidden { .. }));

    grant(&h, "/ca", "bob", &[Delete]).await;
    let deleted = h.certificates.delete_version("bob", id, oldest).await.unwrap();
    assert_eq!(deleted.id, oldest);
    assert_eq!(versions_of(&h, "/ca").await.len(), 1);
}

#[tokio::test]
async fn test_deleting_newest_version_moves_signed_by_edge_back() {
    let h = harness().await;
    generate(&h, "/ca-a", ca(None)).await;
    generate(&h, "/ca-b", ca(None)).await;
    generate(&h, "/leaf", leaf("/ca-a", "leaf")).await;
    generate(&h, "/leaf", leaf("/ca-b", "leaf")).await;
    let newest = versions_of(&h, "/leaf").await[0].uuid;

    h.certificates
        .delete_version(ADMIN, certificate_uuid(&h, "/leaf").await, newest)
        .await
        .unwrap();

    let a = h.certificates.get_by_name(ADMIN, "/ca-a").await.unwrap();
    let b = h.certificates.get_by_name(ADMIN, "/ca-b").await.unwrap();
    assert_eq!(a.signs, vec!["/leaf"]);
    assert!(b.signs.is_empty());
}
