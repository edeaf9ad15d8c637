//! Core configuration.

use serde::{Deserialize, Serialize};

/// Behavior switches for the credential services.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// When false every permission check passes.
    pub enforce_permissions: bool,
    /// Present `ca` as `ca + trusted_ca` when a certificate carries a
    /// trusted CA.
    pub concatenate_cas: bool,
    /// Duration of generated certificates when the request names none.
    pub default_certificate_duration_days: u32,
    /// Upper bound on any requested certificate duration.
    pub max_certificate_duration_days: u32,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            enforce_permissions: true,
            concatenate_cas: false,
            default_certificate_duration_days: 365,
            max_certificate_duration_days: 3650,
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_fall_back_to_defaults() {
        let cfg: CoreConfig = serde_json::from_str(r#"{"concatenate_cas": true}"#).unwrap();
        assert!(cfg.enforce_permissions);
        assert!(cfg.concatenate_cas);
        assert_eq!(cfg.default_certificate_duration_days, 365);
    }
}
