//! Core library for `credvault`.
//!
//! Versioned credentials (values, JSON, passwords, users, certificates),
//! certificate issuance and rotation through transitional versions,
//! cascading regeneration across the signed-by graph, path-based
//! permissions, and the audit trail. This crate depends on
//! `credvault-storage` for the storage backend trait and knows nothing about
//! HTTP.
//!
//! The entry points are the services built over a shared [`vault::Vault`]:
//! [`credentials::CredentialService`], [`certificates::CertificateService`],
//! and [`acl::PermissionService`].

pub mod acl;
pub mod audit;
pub mod audit_file;
pub mod bulk;
pub mod cancel;
pub mod certificates;
pub mod config;
pub mod credential;
pub mod credentials;
pub mod crypto;
pub mod error;
pub mod extract;
pub mod generator;
pub mod lock;
pub mod parameters;
pub mod permission;
pub mod regenerate;
pub mod resolver;
pub mod store;
pub mod vault;
pub mod versions;
pub mod view;
pub mod x509;

pub use acl::PermissionService;
pub use certificates::CertificateService;
pub use config::CoreConfig;
pub use credentials::CredentialService;
pub use error::{CredentialError, ErrorKind};
pub use vault::Vault;
