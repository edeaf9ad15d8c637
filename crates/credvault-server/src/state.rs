//! Shared application state for the `credvault` server.
//!
//! A single [`AppState`] is constructed at startup and shared across all
//! Axum handlers via `Arc`.

use std::sync::Arc;

use credvault_core::cancel::CancelSignal;
use credvault_core::{CertificateService, CredentialService, PermissionService, Vault};

/// Shared application state passed to all HTTP handlers.
pub struct AppState {
    /// Credential reads, writes, generation and regeneration.
    pub credentials: CredentialService,
    /// Certificate summaries and version management.
    pub certificates: CertificateService,
    /// Permission entries.
    pub permissions: PermissionService,
    /// Fires on shutdown; in-flight bulk regenerations roll back.
    pub shutdown: CancelSignal,
}

impl AppState {
    /// Build the services over `vault`.
    #[must_use]
    pub fn new(vault: &Arc<Vault>, shutdown: CancelSignal) -> Self {
        Self {
            credentials: CredentialService::new(Arc::clone(vault)),
            certificates: CertificateService::new(Arc::clone(vault)),
            permissions: PermissionService::new(Arc::clone(vault)),
            shutdown,
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState").finish_non_exhaustive()
    }
}
