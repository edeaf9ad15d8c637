//! Path permissions: wildcard resolution, idempotent grants, ACL management.

#![allow(clippy::unwrap_used)]

mod common;

use std::collections::BTreeSet;

use credvault_core::credential::CredentialValue;
use credvault_core::error::CredentialError;
use credvault_core::permission::PermissionOperation::{self, Delete, Read, ReadAcl, Write, WriteAcl};

use common::{ADMIN, grant, harness};

// ── Resolution ───────────────────────────────────────────────────────

#[tokio::test]
async fn test_wildcard_read_covers_every_name_below_prefix() {
    let h = harness().await;
    grant(&h, "/team/*", "alice", &[Read]).await;
    let resolver = h.vault.resolver();

    for name in ["/team/x", "/team/a/b/c", "/team/*"] {
        assert!(resolver.has_permission("alice", name, Read).await, "{name}");
    }
    for name in ["/other/x", "/teamx/y", "/team"] {
        assert!(!resolver.has_permission("alice", name, Read).await, "{name}");
    }
}

#[tokio::test]
async fn test_mixed_grants_scenario() {
    let h = harness().await;
    grant(&h, "/ca/*", "actor", &[Read]).await;
    grant(&h, "/ca/leaf", "actor", &[Write]).await;
    let resolver = h.vault.resolver();

    assert!(resolver.has_permission("actor", "/ca/leaf", Write).await);
    assert!(!resolver.has_permission("actor", "/ca/other", Write).await);
    assert!(resolver.has_permission("actor", "/ca/other", Read).await);
}

#[tokio::test]
async fn test_repeated_grants_merge_into_one_entry() {
    let h = harness().await;
    grant(&h, "/p", "actor", &[Read]).await;
    grant(&h, "/p", "actor", &[Write]).await;
    grant(&h, "/p", "actor", &[Read]).await;

    let entries = h
        .vault
        .resolver()
        .store()
        .find_all_by_path("/p")
        .await
        .unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operations, BTreeSet::from([Read, Write]));
}

#[tokio::test]
async fn test_enforcement_off_allows_everything() {
    let h = common::harness_with(
        std::sync::Arc::new(credvault_core::generator::RcgenGenerator),
        credvault_core::CoreConfig {
            enforce_permissions: false,
            ..credvault_core::CoreConfig::default()
        },
    )
    .await;

    h.credentials
        .set("anyone", "/x", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap();
    h.credentials.get_by_name("someone-else", "/x").await.unwrap();
}

// ── Credential gating ────────────────────────────────────────────────

#[tokio::test]
async fn test_unreadable_credential_looks_absent() {
    let h = harness().await;
    h.credentials
        .set(ADMIN, "/secret", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap();

    let hidden = h.credentials.get_by_name("bob", "/secret").await.unwrap_err();
    let missing = h.credentials.get_by_name(ADMIN, "/nothing").await.unwrap_err();
    assert!(matches!(hidden, CredentialError::NotFound { .. }));
    assert!(matches!(missing, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn test_write_without_permission_is_forbidden() {
    let h = harness().await;
    grant(&h, "/app/*", "bob", &[Read]).await;

    let err = h
        .credentials
        .set("bob", "/app/x", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap_err();
    assert!(matches!(err, CredentialError::Forbidden { operation: Write, .. }));
}

#[tokio::test]
async fn test_delete_requires_delete_permission() {
    let h = harness().await;
    h.credentials
        .set(ADMIN, "/app/x", CredentialValue::Value("v".to_owned()), None)
        .await
        .unwrap();
    grant(&h, "/app/x", "bob", &[Read, Write]).await;

    let err = h.credentials.delete("bob", "/app/x").await.unwrap_err();
    assert!(matches!(err, CredentialError::Forbidden { operation: Delete, .. }));

    grant(&h, "/app/*", "bob", &[Delete]).await;
    h.credentials.delete("bob", "/app/x").await.unwrap();
    let err = h.credentials.get_by_name(ADMIN, "/app/x").await.unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn test_search_results_are_filtered_by_read() {
    let h = harness().await;
    for name in ["/dev/a", "/dev/b", "/prod/a"] {
        h.credentials
            .set(ADMIN, name, CredentialValue::Value("v".to_owned()), None)
            .await
            .unwrap();
    }
    grant(&h, "/dev/*", "bob", &[Read]).await;
    grant(&h, "/prod/a", "bob", &[Write]).await;

    let mut everything: Vec<_> = h
        .credentials
        .find_by_path("bob", "/")
        .await
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    everything.sort();
    assert_eq!(everything, vec!["/dev/a", "/dev/b"]);

    let like = h.credentials.find_by_name_like("bob", "/A").await.unwrap();
    assert_eq!(like.len(), 1);
    assert_eq!(like[0].name, "/dev/a");

    let admin = h.credentials.find_by_path(ADMIN, "prod").await.unwrap();
    assert_eq!(admin.len(), 1);
}

// ── ACL management ───────────────────────────────────────────────────

#[tokio::test]
async fn test_acl_manager_can_grant_and_revoke() {
    let h = harness().await;
    grant(&h, "/svc/*", "manager", &[ReadAcl, WriteAcl]).await;

    let entry = h
        .permissions
        .add_permissions("manager", "/svc/db", "bob", BTreeSet::from([Read]))
        .await
        .unwrap();
    h.permissions
        .add_permissions("manager", "/svc/db", "bob", BTreeSet::from([Write]))
        .await
        .unwrap();

    let listed = h.permissions.get_permissions("manager", "/svc/db").await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].uuid, entry.uuid);
    assert_eq!(listed[0].operations, BTreeSet::from([Read, Write]));

    let replaced = h
        .permissions
        .replace_permissions("manager", entry.uuid, BTreeSet::from([Delete]))
        .await
        .unwrap();
    assert_eq!(replaced.operations, BTreeSet::from([Delete]));

    h.permissions
        .delete_permission("manager", "/svc/db", "bob")
        .await
        .unwrap();
    assert!(
        h.permissions
            .get_permissions("manager", "/svc/db")
            .await
            .unwrap()
            .is_empty()
    );
}

#[tokio::test]
async fn test_acl_reads_without_read_acl_are_not_found() {
    let h = harness().await;
    grant(&h, "/svc/*", "bob", &[Read]).await;

    let err = h.permissions.get_permissions("bob", "/svc/db").await.unwrap_err();
    assert!(matches!(err, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn test_acl_changes_are_validated() {
    let h = harness().await;
    let all: BTreeSet<PermissionOperation> = PermissionOperation::ALL.into_iter().collect();

    let own = h
        .permissions
        .add_permissions(ADMIN, "/x", ADMIN, all.clone())
        .await
        .unwrap_err();
    let bad_path = h
        .permissions
        .add_permissions(ADMIN, "/x*/y", "bob", all.clone())
        .await
        .unwrap_err();
    let empty = h
        .permissions
        .add_permissions(ADMIN, "/x", "bob", BTreeSet::new())
        .await
        .unwrap_err();
    let no_acl = h
        .permissions
        .add_permissions("bob", "/x", "carol", all)
        .await
        .unwrap_err();
    let missing = h
        .permissions
        .delete_permission(ADMIN, "/x", "nobody")
        .await
        .unwrap_err();

    assert!(matches!(own, CredentialError::Validation { .. }));
    assert!(matches!(bad_path, CredentialError::Validation { .. }));
    assert!(matches!(empty, CredentialError::Validation { .. }));
    assert!(matches!(no_acl, CredentialError::Forbidden { operation: WriteAcl, .. }));
    assert!(matches!(missing, CredentialError::NotFound { .. }));
}

#[tokio::test]
async fn test_acl_changes_are_audited() {
    let h = harness().await;
    h.permissions
        .add_permissions(ADMIN, "/x", "bob", BTreeSet::from([Read]))
        .await
        .unwrap();

    let trail = h.audit.records().await;
    let record = trail.last().unwrap();
    assert_eq!(record.events.len(), 1);
    assert_eq!(record.events[0].resource_name, "/x");
    assert_eq!(
        record.events[0].operation,
        credvault_core::audit::AuditOperation::AclUpdate
    );
}
