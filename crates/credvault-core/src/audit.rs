//! Audit trail for credential operations.
//!
//! Every service call collects (resource, version, operation, actor) events
//! into a [`RequestAudit`] and writes them as one [`AuditRecord`] before its
//! staged writes are committed. If every audit backend fails the call is
//! denied and nothing is committed (fail-closed).
//!
//! Records never contain secret values, only names and identifiers.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::warn;
use uuid::Uuid;

use crate::error::AuditError;

/// What happened to a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditOperation {
    CredentialAccess,
    CredentialUpdate,
    CredentialDelete,
    CredentialFind,
    AclAccess,
    AclUpdate,
    AclDelete,
}

/// One touched resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Credential name or permission path.
    pub resource_name: String,
    /// Credential or permission-entry id, when one exists.
    pub resource_uuid: Option<Uuid>,
    /// Version id for version-level events.
    pub version_uuid: Option<Uuid>,
    pub operation: AuditOperation,
    pub actor: String,
}

/// All events of one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub actor: String,
    /// Short description of the inbound call, e.g. `bulk regenerate /ca/root`.
    pub request: String,
    pub events: Vec<AuditEvent>,
}

/// Destination for audit records.
#[async_trait::async_trait]
pub trait AuditBackend: Send + Sync {
    /// The backend's name (for error reporting).
    fn name(&self) -> &str;

    /// Persist a record. Must not silently drop records.
    ///
    /// # Errors
    ///
    /// Returns an error if the record could not be persisted.
    async fn log(&self, record: &AuditRecord) -> Result<(), AuditError>;
}

/// Fans records out to every registered backend with fail-closed semantics.
///
/// At least one backend must accept a record. With no backends registered,
/// records are dropped.
#[derive(Default)]
pub struct AuditManager {
    backends: RwLock<Vec<Arc<dyn AuditBackend>>>,
}

impl AuditManager {
    /// Create a manager with no backends.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a backend.
    pub async fn add_backend(&self, backend: Arc<dyn AuditBackend>) {
        self.backends.write().await.push(backend);
    }

    /// Whether any backend is registered.
    pub async fn has_backends(&self) -> bool {
        !self.backends.read().await.is_empty()
    }

    /// Write `record` to every backend.
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::AllBackendsFailed`] if every backend fails.
    pub async fn log(&self, record: &AuditRecord) -> Result<(), AuditError> {
        let backends = self.backends.read().await;
        if backends.is_empty() {
            return Ok(());
        }

        let mut any_success = false;
        for backend in backends.iter() {
            match backend.log(record).await {
                Ok(()) => any_success = true,
                Err(e) => {
                    warn!(backend = backend.name(), error = %e, "audit backend failed");
                }
            }
        }

        if any_success {
            Ok(())
        } else {
            Err(AuditError::AllBackendsFailed)
        }
    }
}

impl std::fmt::Debug for AuditManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditManager").finish_non_exhaustive()
    }
}

/// Collects the events of one request.
#[derive(Debug, Clone)]
pub struct RequestAudit {
    actor: String,
    request: String,
    events: Vec<AuditEvent>,
}

impl RequestAudit {
    /// Start collecting for `actor`'s `request`.
    pub fn new(actor: impl Into<String>, request: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            request: request.into(),
            events: Vec::new(),
        }
    }

    /// Record one event.
    pub fn record(
        &mut self,
        resource_name: impl Into<String>,
        resource_uuid: Option<Uuid>,
        version_uuid: Option<Uuid>,
        operation: AuditOperation,
    ) {
        self.events.push(AuditEvent {
            resource_name: resource_name.into(),
            resource_uuid,
            version_uuid,
            operation,
            actor: self.actor.clone(),
        });
    }

    /// Events recorded so far.
    #[must_use]
    pub fn events(&self) -> &[AuditEvent] {
        &self.events
    }

    /// Write the collected events as one record. No-op when nothing was
    /// recorded.
    ///
    /// # Errors
    ///
    /// Propagates [`AuditManager::log`] failures.
    pub async fn finish(self, manager: &AuditManager) -> Result<(), AuditError> {
        if self.events.is_empty() {
            return Ok(());
        }
        let record = AuditRecord {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            actor: self.actor,
            request: self.request,
            events: self.events,
        };
        manager.log(&record).await
    }
}

/// Keeps records in memory. Used by tests and embedded deployments that
/// inspect the trail directly.
#[derive(Debug, Default)]
pub struct MemoryAuditBackend {
    records: Mutex<Vec<AuditRecord>>,
}

impl MemoryAuditBackend {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of every record logged so far.
    pub async fn records(&self) -> Vec<AuditRecord> {
        self.records.lock().await.clone()
    }
}

#[async_trait::async_trait]
impl AuditBackend for MemoryAuditBackend {
    #[allow(clippy::unnecessary_literal_bound)]
    fn name(&self) -> &str {
        "memory"
    }

    async fn log(&self, record: &AuditRecord) -> Result<(), AuditError> {
        self.records.lock().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    struct Broken;

    #[async_trait::async_trait]
    impl AuditBackend for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        async fn log(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::BackendFailure {
                name: "broken".to_owned(),
                reason: "disk full".to_owned(),
            })
        }
    }

    fn audit_with_event() -> RequestAudit {
        let mut audit = RequestAudit::new("uaa-client:ops", "regenerate /a");
        audit.record("/a", Some(Uuid::new_v4()), Some(Uuid::new_v4()), AuditOperation::CredentialUpdate);
        audit
    }

    #[tokio::test]
    async fn one_record_per_request() {
        let manager = AuditManager::new();
        let memory = Arc::new(MemoryAuditBackend::new());
        manager.add_backend(memory.clone()).await;

        let mut audit = audit_with_event();
        audit.record("/b", None, None, AuditOperation::CredentialUpdate);
        audit.finish(&manager).await.unwrap();

        let records = memory.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].events.len(), 2);
        assert_eq!(records[0].events[1].actor, "uaa-client:ops");
    }

    #[tokio::test]
    async fn all_backends_failing_is_an_error() {
        let manager = AuditManager::new();
        manager.add_backend(Arc::new(Broken)).await;
        let err = audit_with_event().finish(&manager).await.unwrap_err();
        assert!(matches!(err, AuditError::AllBackendsFailed));
    }

    #[tokio::test]
    async fn one_healthy_backend_is_enough() {
        let manager = AuditManager::new();
        manager.add_backend(Arc::new(Broken)).await;
        manager.add_backend(Arc::new(MemoryAuditBackend::new())).await;
        assert!(audit_with_event().finish(&manager).await.is_ok());
    }

    #[tokio::test]
    async fn empty_request_writes_nothing() {
        let manager = AuditManager::new();
        manager.add_backend(Arc::new(Broken)).await;
        assert!(RequestAudit::new("a", "noop").finish(&manager).await.is_ok());
    }
}
