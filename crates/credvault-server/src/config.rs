//! Server configuration for `credvault`.
//!
//! Loads configuration from `CREDVAULT_*` environment variables with
//! development-friendly defaults.

use std::net::SocketAddr;

use credvault_core::CoreConfig;
use credvault_core::crypto::{EncryptionKey, VALUE_KEY_INFO, derive_key};
use uuid::Uuid;

/// Configuration errors detected at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// `CREDVAULT_ENCRYPTION_KEY` is not 64 hex characters.
    #[error("CREDVAULT_ENCRYPTION_KEY must be 32 bytes of hex: {reason}")]
    InvalidEncryptionKey { reason: String },

    /// `CREDVAULT_ENCRYPTION_KEY_ID` is not a UUID.
    #[error("CREDVAULT_ENCRYPTION_KEY_ID must be a UUID, got '{value}'")]
    InvalidKeyId { value: String },

    /// A numeric variable did not parse.
    #[error("{name} must be a positive integer, got '{value}'")]
    InvalidNumber { name: &'static str, value: String },
}

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP listener to.
    pub bind_addr: SocketAddr,
    /// Storage backend type.
    pub storage_backend: StorageBackendType,
    /// Log level filter used when `RUST_LOG` is unset.
    pub log_level: String,
    /// Path to the JSON-lines audit file. Without it audit records only go
    /// to the log.
    pub audit_file_path: Option<String>,
    /// Configured encryption key. `None` means an ephemeral key.
    pub encryption_key: Option<ConfiguredKey>,
    /// Actor granted every operation on `/*` at startup.
    pub bootstrap_admin: Option<String>,
    /// Switches handed to the core services.
    pub core: CoreConfig,
}

/// Encryption key loaded from the environment. The id is stamped on every
/// value it encrypts, so it must stay the same across restarts.
#[derive(Debug, Clone)]
pub struct ConfiguredKey {
    pub id: Uuid,
    pub key: EncryptionKey,
}

/// Supported storage backend types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackendType {
    /// In-memory (development only, data lost on restart).
    Memory,
    /// Redb persistent storage.
    Redb { path: String },
}

impl ServerConfig {
    /// Load configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed encryption key or number.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration through `lookup`.
    ///
    /// Variables:
    /// - `CREDVAULT_BIND_ADDR`: full bind address (overrides `PORT`, default `127.0.0.1:8844`)
    /// - `PORT`: port to bind on `0.0.0.0`
    /// - `CREDVAULT_STORAGE`: `memory` or `redb` (default `memory`)
    /// - `CREDVAULT_STORAGE_PATH`: redb file (default `./data/credvault.redb`)
    /// - `CREDVAULT_LOG_LEVEL`: log filter (default `info`)
    /// - `CREDVAULT_AUDIT_FILE`: audit log file (optional)
    /// - `CREDVAULT_ENCRYPTION_KEY`: 64 hex characters (optional)
    /// - `CREDVAULT_ENCRYPTION_KEY_ID`: UUID of that key (default nil UUID)
    /// - `CREDVAULT_ENFORCE_PERMISSIONS`: default `true`
    /// - `CREDVAULT_CONCATENATE_CAS`: default `false`
    /// - `CREDVAULT_DEFAULT_CERT_DURATION_DAYS`: default `365`
    /// - `CREDVAULT_BOOTSTRAP_ADMIN`: actor id (optional)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] for a malformed encryption key or number.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let default_addr = SocketAddr::from(([127, 0, 0, 1], 8844));
        let bind_addr = if let Some(addr) = lookup("CREDVAULT_BIND_ADDR") {
            addr.parse().unwrap_or(default_addr)
        } else if let Some(port) = lookup("PORT") {
            SocketAddr::from(([0, 0, 0, 0], port.parse().unwrap_or(8844)))
        } else {
            default_addr
        };

        let storage_path =
            lookup("CREDVAULT_STORAGE_PATH").unwrap_or_else(|| "./data/credvault.redb".to_owned());
        let storage_backend = match lookup("CREDVAULT_STORAGE")
            .unwrap_or_else(|| "memory".to_owned())
            .to_lowercase()
            .as_str()
        {
            "redb" => StorageBackendType::Redb { path: storage_path },
            _ => StorageBackendType::Memory,
        };

        let encryption_key = match lookup("CREDVAULT_ENCRYPTION_KEY") {
            Some(raw) => {
                let id = match lookup("CREDVAULT_ENCRYPTION_KEY_ID") {
                    Some(value) => Uuid::parse_str(value.trim())
                        .map_err(|_| ConfigError::InvalidKeyId { value })?,
                    None => Uuid::nil(),
                };
                Some(ConfiguredKey {
                    id,
                    key: parse_key(&raw)?,
                })
            }
            None => None,
        };

        let defaults = CoreConfig::default();
        let default_certificate_duration_days = match lookup("CREDVAULT_DEFAULT_CERT_DURATION_DAYS")
        {
            Some(value) => match value.parse::<u32>() {
                Ok(days) if days > 0 => days,
                _ => {
                    return Err(ConfigError::InvalidNumber {
                        name: "CREDVAULT_DEFAULT_CERT_DURATION_DAYS",
                        value,
                    });
                }
            },
            None => defaults.default_certificate_duration_days,
        };

        let core = CoreConfig {
            enforce_permissions: lookup("CREDVAULT_ENFORCE_PERMISSIONS")
                .map_or(defaults.enforce_permissions, |v| v != "false" && v != "0"),
            concatenate_cas: lookup("CREDVAULT_CONCATENATE_CAS")
                .map_or(defaults.concatenate_cas, |v| v == "true" || v == "1"),
            default_certificate_duration_days,
            max_certificate_duration_days: defaults.max_certificate_duration_days,
        };

        Ok(Self {
            bind_addr,
            storage_backend,
            log_level: lookup("CREDVAULT_LOG_LEVEL").unwrap_or_else(|| "info".to_owned()),
            audit_file_path: lookup("CREDVAULT_AUDIT_FILE"),
            encryption_key,
            bootstrap_admin: lookup("CREDVAULT_BOOTSTRAP_ADMIN").filter(|a| !a.is_empty()),
            core,
        })
    }
}

/// Decode 32 bytes of hex and run them through HKDF.
fn parse_key(raw: &str) -> Result<EncryptionKey, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidEncryptionKey { reason };
    let bytes = hex::decode(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    if bytes.len() != 32 {
        return Err(invalid(format!("got {} bytes", bytes.len())));
    }
    derive_key(&bytes, None, VALUE_KEY_INFO).map_err(|e| invalid(e.to_string()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(vars: &[(&str, &str)]) -> Result<ServerConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        ServerConfig::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = load(&[]).unwrap();
        assert_eq!(cfg.bind_addr, SocketAddr::from(([127, 0, 0, 1], 8844)));
        assert_eq!(cfg.storage_backend, StorageBackendType::Memory);
        assert!(cfg.encryption_key.is_none());
        assert!(cfg.bootstrap_admin.is_none());
        assert_eq!(cfg.core, CoreConfig::default());
    }

    #[test]
    fn test_port_binds_all_interfaces() {
        let cfg = load(&[("PORT", "9000")]).unwrap();
        assert_eq!(cfg.bind_addr, SocketAddr::from(([0, 0, 0, 0], 9000)));
    }

    #[test]
    fn test_core_switches() {
        let cfg = load(&[
            ("CREDVAULT_ENFORCE_PERMISSIONS", "false"),
            ("CREDVAULT_CONCATENATE_CAS", "true"),
            ("CREDVAULT_DEFAULT_CERT_DURATION_DAYS", "90"),
            ("CREDVAULT_STORAGE", "redb"),
        ])
        .unwrap();
        assert!(!cfg.core.enforce_permissions);
        assert!(cfg.core.concatenate_cas);
        assert_eq!(cfg.core.default_certificate_duration_days, 90);
        assert!(matches!(cfg.storage_backend, StorageBackendType::Redb { .. }));
    }

    #[test]
    fn test_encryption_key_is_validated() {
        let key = "ab".repeat(32);
        let configured = load(&[("CREDVAULT_ENCRYPTION_KEY", &key)])
            .unwrap()
            .encryption_key
            .unwrap();
        assert_eq!(configured.id, Uuid::nil());
        assert!(matches!(
            load(&[
                ("CREDVAULT_ENCRYPTION_KEY", &key),
                ("CREDVAULT_ENCRYPTION_KEY_ID", "nope")
            ]),
            Err(ConfigError::InvalidKeyId { .. })
        ));
        assert!(matches!(
            load(&[("CREDVAULT_ENCRYPTION_KEY", "abcd")]),
            Err(ConfigError::InvalidEncryptionKey { .. })
        ));
        assert!(matches!(
            load(&[("CREDVAULT_ENCRYPTION_KEY", "zz")]),
            Err(ConfigError::InvalidEncryptionKey { .. })
        ));
    }

    #[test]
    fn test_bad_duration_rejected() {
        assert!(matches!(
            load(&[("CREDVAULT_DEFAULT_CERT_DURATION_DAYS", "0")]),
            Err(ConfigError::InvalidNumber { .. })
        ));
    }
}
