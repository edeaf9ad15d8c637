//! Credential lifecycle: import, generation modes, reads, and deletion.

#![allow(clippy::unwrap_used)]

mod common;

use credvault_core::credential::{CertificateValue, CredentialValue};
use credvault_core::error::{CertificateError, CredentialError};
use credvault_core::generator::{CertificateGenerator, RcgenGenerator};
use credvault_core::parameters::{
    CertificateParameters, GenerationParameters, PasswordParameters, SubjectName,
    UserParameters, WriteMode,
};
use credvault_core::permission::PermissionOperation::{Read, Write};

use common::{ADMIN, ca, generate, grant, harness, leaf, version_count};

fn password(length: usize) -> GenerationParameters {
    GenerationParameters::Password(PasswordParameters {
        length,
        ..PasswordParameters::default()
    })
}

fn password_value(view: &credvault_core::view::CredentialView) -> &str {
    match &view.value {
        CredentialValue::Password(p) => p,
        other => unreachable!("expected a password, got {:?}", other.credential_type()),
    }
}

fn external_certificate(common_name: &str) -> (String, String) {
    let generated = RcgenGenerator
        .generate(
            &CertificateParameters {
                subject: SubjectName::common_name(common_name),
                self_sign: true,
                ..CertificateParameters::default()
            },
            None,
            30,
        )
        .unwrap();
    (generated.certificate, generated.private_key)
}

// ── Set ──────────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_appends_versions_and_round_trips_values() {
    let h = harness().await;
    let json = serde_json::json!({"user": "db", "port": 5432});
    h.credentials
        .set(ADMIN, "/cfg", CredentialValue::Json(json.clone()), None)
        .await
        .unwrap();
    h.credentials
        .set(ADMIN, "/CFG", CredentialValue::Json(serde_json::json!({})), None)
        .await
        .unwrap();

    let versions = h.credentials.get_versions(ADMIN, "/cfg", None).await.unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].value, CredentialValue::Json(json));
    assert_eq!(versions[0].name, "/cfg");

    let limited = h.credentials.get_versions(ADMIN, "/cfg", Some(1)).await.unwrap();
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].id, versions[0].id);

    let by_id = h.credentials.get_version(ADMIN, versions[1].id).await.unwrap();
    assert_eq!(by_id, versions[1]);
}

#[tokio::test]
async fn test_set_rejects_type_change_and_bad_names() {
    let h = harness().await;
    h.credentials
        .set(ADMIN, "/x", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap();

    let changed = h
        .credentials
        .set(ADMIN, "/x", CredentialValue::Password("p".to_owned()), None)
        .await
        .unwrap_err();
    let bad_name = h
        .credentials
        .set(ADMIN, "/a//b", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap_err();
    let not_object = h
        .credentials
        .set(ADMIN, "/j", CredentialValue::Json(serde_json::json!([1])), None)
        .await
        .unwrap_err();

    assert!(matches!(changed, CredentialError::Validation { .. }));
    assert!(matches!(bad_name, CredentialError::Validation { .. }));
    assert!(matches!(not_object, CredentialError::Validation { .. }));
    assert_eq!(version_count(&h, "/x").await, 1);
}

#[tokio::test]
async fn test_set_user_keeps_username() {
    let h = harness().await;
    let view = h
        .credentials
        .set(
            ADMIN,
            "/u",
            CredentialValue::User {
                username: "svc".to_owned(),
                password: "hunter2".to_owned(),
            },
            Some(serde_json::json!({"rotated-by": "ops"})),
        )
        .await
        .unwrap();
    assert_eq!(
        view.value,
        CredentialValue::User {
            username: "svc".to_owned(),
            password: "hunter2".to_owned(),
        }
    );
    assert!(view.metadata.is_some());
}

// ── Certificate import ───────────────────────────────────────────────

#[tokio::test]
async fn test_import_signed_by_stored_ca() {
    let h = harness().await;
    let ca_view = generate(&h, "/ca", ca(None)).await;
    let CredentialValue::Certificate(ca_cert) = &ca_view.value else {
        unreachable!("certificate")
    };
    let issued = RcgenGenerator
        .generate(
            &CertificateParameters {
                subject: SubjectName::common_name("imported"),
                ca_name: Some("/ca".to_owned()),
                ..CertificateParameters::default()
            },
            Some(&credvault_core::generator::SigningAuthority {
                certificate: &ca_cert.certificate,
                private_key: ca_cert.private_key.as_deref().unwrap(),
            }),
            30,
        )
        .unwrap();

    let view = h
        .credentials
        .set(
            ADMIN,
            "/imported",
            CredentialValue::Certificate(CertificateValue {
                ca: Some("ignored".to_owned()),
                ca_name: Some("ca".to_owned()),
                certificate: issued.certificate,
                private_key: Some(issued.private_key),
            }),
            None,
        )
        .await
        .unwrap();

    let CredentialValue::Certificate(stored) = &view.value else {
        unreachable!("certificate")
    };
    assert_eq!(stored.ca.as_ref(), Some(&ca_cert.certificate));
    assert_eq!(stored.ca_name.as_deref(), Some("/ca"));
    let flags = view.certificate.unwrap();
    assert!(!flags.generated);
    assert!(!flags.certificate_authority);

    let summary = h.certificates.get_by_name(ADMIN, "/ca").await.unwrap();
    assert_eq!(summary.signs, vec!["/imported"]);
}

#[tokio::test]
async fn test_import_not_signed_by_claimed_ca_is_rejected() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    let (certificate, private_key) = external_certificate("stranger");

    let err = h
        .credentials
        .set(
            ADMIN,
            "/stranger",
            CredentialValue::Certificate(CertificateValue {
                ca: None,
                ca_name: Some("/ca".to_owned()),
                certificate,
                private_key: Some(private_key),
            }),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CredentialError::Certificate(CertificateError::NotSignedByCa { .. })
    ));
}

#[tokio::test]
async fn test_import_requires_matching_private_key() {
    let h = harness().await;
    let (certificate, _) = external_certificate("one");
    let (_, other_key) = external_certificate("two");

    let mismatched = h
        .credentials
        .set(
            ADMIN,
            "/c",
            CredentialValue::Certificate(CertificateValue {
                ca: None,
                ca_name: None,
                certificate: certificate.clone(),
                private_key: Some(other_key),
            }),
            None,
        )
        .await
        .unwrap_err();
    let missing = h
        .credentials
        .set(
            ADMIN,
            "/c",
            CredentialValue::Certificate(CertificateValue {
                ca: None,
                ca_name: None,
                certificate,
                private_key: None,
            }),
            None,
        )
        .await
        .unwrap_err();

    assert!(matches!(mismatched, CredentialError::Validation { .. }));
    assert!(matches!(missing, CredentialError::Validation { .. }));
}

#[tokio::test]
async fn test_import_with_unreadable_ca_is_not_found() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    grant(&h, "/mine", "bob", &[Read, Write]).await;
    let (certificate, private_key) = external_certificate("x");

    let err = h
        .credentials
        .set(
            "bob",
            "/mine",
            CredentialValue::Certificate(CertificateValue {
                ca: None,
                ca_name: Some("/ca".to_owned()),
                certificate,
                private_key: Some(private_key),
            }),
            None,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { ref name } if name == "/ca"));
}

// ── Generate ─────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_overwrite_returns_existing_version() {
    let h = harness().await;
    let first = generate(&h, "/pw", password(20)).await;

    let again = h
        .credentials
        .generate(ADMIN, "/pw", password(40), WriteMode::NoOverwrite, None)
        .await
        .unwrap();

    assert_eq!(again.id, first.id);
    assert_eq!(password_value(&again).len(), 20);
    assert_eq!(version_count(&h, "/pw").await, 1);
}

#[tokio::test]
async fn test_converge_only_regenerates_on_shape_change() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    let first = generate(&h, "/leaf", leaf("/ca", "leaf")).await;

    let same = h
        .credentials
        .generate(ADMIN, "/leaf", leaf("/ca", "leaf"), WriteMode::Converge, None)
        .await
        .unwrap();
    assert_eq!(same.id, first.id);

    let mut longer = leaf("/ca", "leaf");
    if let GenerationParameters::Certificate(params) = &mut longer {
        params.duration_days = Some(10);
    }
    let unchanged = h
        .credentials
        .generate(ADMIN, "/leaf", longer, WriteMode::Converge, None)
        .await
        .unwrap();
    assert_eq!(unchanged.id, first.id);

    let renamed = h
        .credentials
        .generate(ADMIN, "/leaf", leaf("/ca", "other"), WriteMode::Converge, None)
        .await
        .unwrap();
    assert_ne!(renamed.id, first.id);
    assert_eq!(version_count(&h, "/leaf").await, 2);
}

#[tokio::test]
async fn test_overwrite_always_produces_a_version() {
    let h = harness().await;
    generate(&h, "/pw", password(20)).await;
    generate(&h, "/pw", password(20)).await;
    assert_eq!(version_count(&h, "/pw").await, 2);
}

#[tokio::test]
async fn test_generated_user_has_username_and_password() {
    let h = harness().await;
    let view = generate(
        &h,
        "/db-user",
        GenerationParameters::User(UserParameters {
            username: None,
            password: PasswordParameters::default(),
        }),
    )
    .await;

    let CredentialValue::User { username, password } = &view.value else {
        unreachable!("user")
    };
    assert_eq!(username.len(), 20);
    assert_eq!(password.len(), PasswordParameters::default().length);

    let regenerated = h.credentials.regenerate(ADMIN, "/db-user").await.unwrap();
    let CredentialValue::User {
        username: kept,
        password: fresh,
    } = &regenerated.value
    else {
        unreachable!("user")
    };
    assert_eq!(kept, username);
    assert_ne!(fresh, password);
}

#[tokio::test]
async fn test_generate_signed_by_unreadable_ca_is_not_found() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    grant(&h, "/svc", "bob", &[Write]).await;

    let err = h
        .credentials
        .generate("bob", "/svc", leaf("/ca", "svc"), WriteMode::Overwrite, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn test_invalid_certificate_parameters_are_rejected() {
    let h = harness().await;
    let mut bad = ca(None);
    if let GenerationParameters::Certificate(params) = &mut bad {
        params.key_length = 1024;
    }
    let err = h
        .credentials
        .generate(ADMIN, "/bad", bad, WriteMode::Overwrite, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        CredentialError::Certificate(CertificateError::InvalidKeyLength { bits: 1024 })
    ));
    assert!(h.credentials.get_by_name(ADMIN, "/bad").await.is_err());
}

// ── Delete & audit ───────────────────────────────────────────────────

#[tokio::test]
async fn test_delete_removes_credential_and_signed_by_edge() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    generate(&h, "/leaf", leaf("/ca", "leaf")).await;

    h.credentials.delete(ADMIN, "/leaf").await.unwrap();

    let summary = h.certificates.get_by_name(ADMIN, "/ca").await.unwrap();
    assert!(summary.signs.is_empty());
    let err = h.credentials.delete(ADMIN, "/leaf").await.unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn test_reads_and_writes_are_audited() {
    let h = harness().await;
    let view = h
        .credentials
        .set(ADMIN, "/a", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap();
    h.credentials.get_by_name(ADMIN, "/a").await.unwrap();

    let trail = h.audit.records().await;
    let ops: Vec<_> = trail
        .iter()
        .flat_map(|r| r.events.iter().map(|e| (e.operation, e.version_uuid)))
        .collect();
    use credvault_core::audit::AuditOperation::{CredentialAccess, CredentialUpdate};
    assert_eq!(
        ops,
        vec![(CredentialUpdate, Some(view.id)), (CredentialAccess, Some(view.id))]
    );
}

#[tokio::test]
async fn test_certificate_listing_shows_signing_relations() {
    let h = harness().await;
    generate(&h, "/root", ca(None)).await;
    generate(&h, "/int", ca(Some("/root"))).await;
    generate(&h, "/leaf", leaf("/int", "leaf")).await;
    grant(&h, "/int", "bob", &[Read]).await;

    let all = h.certificates.get_all(ADMIN).await.unwrap();
    let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["/int", "/leaf", "/root"]);
    assert_eq!(all[0].signed_by, "/root");
    assert_eq!(all[0].signs, vec!["/leaf"]);
    assert_eq!(all[2].signed_by, "/root");
    assert!(all[2].versions[0].self_signed);

    let visible = h.certificates.get_all("bob").await.unwrap();
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].name, "/int");
}

#[tokio::test]
async fn test_certificate_listing_with_nested_ca_paths() {
    let h = harness().await;
    generate(&h, "/ca", ca(None)).await;
    generate(&h, "/ca/mid", ca(Some("/ca"))).await;
    generate(&h, "/ca/mid/leaf", leaf("/ca/mid", "leaf")).await;

    let all = h.certificates.get_all(ADMIN).await.unwrap();
    let names: Vec<_> = all.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["/ca", "/ca/mid", "/ca/mid/leaf"]);
    assert_eq!(all[0].signs, vec!["/ca/mid"]);
    assert_eq!(all[1].signed_by, "/ca");
    assert_eq!(all[1].signs, vec!["/ca/mid/leaf"]);
    assert!(all[2].signs.is_empty());
}
