//! Cascading regeneration.
//!
//! Regenerates every certificate transitively signed by a CA. The signed-by
//! graph is walked twice:
//!
//! 1. **Pre-flight** (read-only): READ on the signer, WRITE on every
//!    descendant. Any gap aborts before anything is written.
//! 2. **Mutation**: depth-first, each child is regenerated in shape and, if
//!    the new version is a CA, its own children follow. WRITE is checked
//!    again on every child.
//!
//! Both walks carry a case-insensitive visited set of signers, so a cycle in
//! a corrupted graph is logged and cut instead of looping. The cancel signal
//! is polled before every node. The caller runs phase 2 against a staged
//! transaction and discards it on any error, so the cascade is
//! all-or-nothing.

use tracing::{info, warn};

use crate::audit::RequestAudit;
use crate::cancel::CancelSignal;
use crate::credential::{Credential, NameSet};
use crate::error::CredentialError;
use crate::permission::PermissionOperation;
use crate::regenerate::{RegenerateOptions, Regenerator};
use crate::resolver::PermissionResolver;
use crate::store::CredentialStore;

/// Pending children of one signer during a depth-first walk.
struct Frame {
    children: Vec<Credential>,
    next: usize,
}

impl Frame {
    fn new(children: Vec<Credential>) -> Self {
        Self { children, next: 0 }
    }

    fn advance(&mut self) -> Option<Credential> {
        let child = self.children.get(self.next).cloned();
        self.next += 1;
        child
    }
}

/// Whether the newest version of `credential` can sign others.
async fn is_ca(store: &CredentialStore, credential: &Credential) -> Result<bool, CredentialError> {
    Ok(store
        .find_latest(credential.uuid)
        .await?
        .is_some_and(|v| v.is_certificate_authority()))
}

fn check_cancel(cancel: &CancelSignal) -> Result<(), CredentialError> {
    if cancel.is_cancelled() {
        Err(CredentialError::Cancelled)
    } else {
        Ok(())
    }
}

/// Phase 1: verify the actor may regenerate the whole subtree under
/// `signer`. Returns the subtree's credential names (excluding the signer).
///
/// # Errors
///
/// `NotFound` when the signer is missing or unreadable, `Forbidden` for the
/// first descendant lacking WRITE, `Cancelled` if the signal fires.
pub async fn preflight(
    store: &CredentialStore,
    resolver: &PermissionResolver,
    actor: &str,
    signer: &str,
    cancel: &CancelSignal,
) -> Result<NameSet, CredentialError> {
    if !resolver
        .has_permission(actor, signer, PermissionOperation::Read)
        .await
    {
        return Err(CredentialError::not_found(signer));
    }
    if store.find_credential(signer).await?.is_none() {
        return Err(CredentialError::not_found(signer));
    }

    let mut signers = NameSet::new();
    signers.insert(signer);
    let mut subtree = NameSet::new();
    let mut stack = vec![Frame::new(store.find_signed_by(signer).await?)];

    loop {
        let Some(frame) = stack.last_mut() else {
            break;
        };
        let Some(child) = frame.advance() else {
            stack.pop();
            continue;
        };
        check_cancel(cancel)?;

        if signers.contains(&child.name) {
            warn!(name = %child.name, "signed-by cycle detected during pre-flight; skipping");
            continue;
        }
        if !resolver
            .has_permission(actor, &child.name, PermissionOperation::Write)
            .await
        {
            return Err(CredentialError::forbidden(
                &child.name,
                PermissionOperation::Write,
            ));
        }
        subtree.insert(&child.name);

        if is_ca(store, &child).await? && signers.insert(&child.name) {
            stack.push(Frame::new(store.find_signed_by(&child.name).await?));
        }
    }
    Ok(subtree)
}

/// Phase 2: regenerate every descendant of `signer`. `regenerator` should
/// write to a staged transaction; `locked` are the names whose locks the
/// caller holds, and meeting any other descendant is a conflict.
///
/// # Errors
///
/// `Forbidden` if a WRITE re-check fails, `Conflict` if the graph grew
/// beyond the locked set, `Cancelled` if the signal fires, or any error from
/// regenerating a node.
pub async fn regenerate_subtree(
    regenerator: &Regenerator,
    resolver: &PermissionResolver,
    actor: &str,
    signer: &str,
    locked: &NameSet,
    cancel: &CancelSignal,
    audit: &mut RequestAudit,
) -> Result<NameSet, CredentialError> {
    let store = regenerator.store();
    let mut signers = NameSet::new();
    signers.insert(signer);
    let mut regenerated = NameSet::new();
    let mut stack = vec![Frame::new(store.find_signed_by(signer).await?)];

    loop {
        let Some(frame) = stack.last_mut() else {
            break;
        };
        let Some(child) = frame.advance() else {
            stack.pop();
            continue;
        };
        check_cancel(cancel)?;

        if signers.contains(&child.name) {
            warn!(name = %child.name, "signed-by cycle detected; not re-entering signer");
            continue;
        }
        if !regenerated.insert(&child.name) {
            continue;
        }
        if !locked.contains(&child.name) {
            return Err(CredentialError::conflict(format!(
                "'{}' joined the signing tree of '{signer}' during regeneration",
                child.name
            )));
        }
        if !resolver
            .has_permission(actor, &child.name, PermissionOperation::Write)
            .await
        {
            return Err(CredentialError::forbidden(
                &child.name,
                PermissionOperation::Write,
            ));
        }

        let version = regenerator
            .regenerate(&child.name, RegenerateOptions::default(), audit)
            .await?;

        if version.is_certificate_authority() && signers.insert(&child.name) {
            stack.push(Frame::new(store.find_signed_by(&child.name).await?));
        }
    }

    info!(signer = %signer, regenerated = regenerated.len(), "cascade regenerated");
    Ok(regenerated)
}
