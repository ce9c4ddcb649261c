//! Process-wide outbound TLS material and the revocation flag.

use serde::{Deserialize, Serialize};
use std::sync::RwLock;

use crate::config::TlsConfig;

/// Raw credential values as handed over by whoever rotates certificates.
///
/// Every field is optional: absence means "disabled" (or "not revoked"),
/// never an error.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSnapshot {
    pub https_enabled: Option<bool>,
    pub root_ca: Option<String>,
    pub server_key: Option<String>,
    pub server_cert: Option<String>,
    pub revoked: Option<bool>,
}

/// Credential values with defaults applied, ready for building transports.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TlsMaterial {
    pub https_enabled: bool,
    pub root_ca: String,
    pub server_key: String,
    pub server_cert: String,
    pub revoked: bool,
}

impl CredentialSnapshot {
    /// Apply the safe defaults, logging a warning for every suspicious gap.
    pub fn resolve(&self) -> TlsMaterial {
        // Without a root CA none of the PEM material is trusted.
        let (root_ca, server_key, server_cert) = match &self.root_ca {
            Some(ca) => (
                ca.clone(),
                self.server_key.clone().unwrap_or_default(),
                self.server_cert.clone().unwrap_or_default(),
            ),
            None => (String::new(), String::new(), String::new()),
        };
        let material = TlsMaterial {
            https_enabled: self.https_enabled.unwrap_or(false),
            root_ca,
            server_key,
            server_cert,
            revoked: self.revoked.unwrap_or(false),
        };

        if self.https_enabled.is_none() || self.revoked.is_none() {
            tracing::warn!(
                name = "credentials.defaults_applied",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                https_enabled_set = self.https_enabled.is_some(),
                revoked_set = self.revoked.is_some(),
                message = "credential snapshot incomplete; treating missing values as disabled"
            );
        }
        if material.https_enabled && material.server_cert.is_empty() {
            tracing::warn!(
                name = "credentials.missing_cert",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                message = "federation client should use https but no server certificate is loaded"
            );
        }
        if material.revoked {
            tracing::warn!(
                name = "credentials.revoked",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                message = "server certificate is revoked or expired"
            );
        }
        material
    }

    /// Build the startup snapshot from PEM files named in the configuration.
    /// Unreadable files leave the corresponding field empty.
    pub fn from_tls_config(tls: &TlsConfig) -> Self {
        Self {
            https_enabled: Some(tls.enabled),
            root_ca: read_pem(tls.root_ca_path.as_deref()),
            server_key: read_pem(tls.server_key_path.as_deref()),
            server_cert: read_pem(tls.server_cert_path.as_deref()),
            revoked: Some(false),
        }
    }
}

fn read_pem(path: Option<&str>) -> Option<String> {
    let path = path?;
    match std::fs::read_to_string(path) {
        Ok(pem) => Some(pem),
        Err(e) => {
            tracing::warn!(
                name = "credentials.read_pem_failed",
                target = concat!(env!("CARGO_PKG_NAME"), "::", module_path!()),
                path = %path,
                error = %e,
                message = "failed to read PEM file"
            );
            None
        }
    }
}

/// Holder of the current [`CredentialSnapshot`]; replaced wholesale on rotation.
#[derive(Debug, Default)]
pub struct CredentialStore {
    current: RwLock<CredentialSnapshot>,
}

impl CredentialStore {
    pub fn new(snapshot: CredentialSnapshot) -> Self {
        Self {
            current: RwLock::new(snapshot),
        }
    }

    pub fn snapshot(&self) -> CredentialSnapshot {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn replace(&self, snapshot: CredentialSnapshot) {
        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }

    pub fn set_revoked(&self, revoked: bool) {
        match self.current.write() {
            Ok(mut guard) => guard.revoked = Some(revoked),
            Err(poisoned) => poisoned.into_inner().revoked = Some(revoked),
        }
    }

    /// Fast path consulted before every outbound federation request.
    pub fn is_revoked(&self) -> bool {
        match self.current.read() {
            Ok(guard) => guard.revoked.unwrap_or(false),
            Err(poisoned) => poisoned.into_inner().revoked.unwrap_or(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_snapshot_resolves_to_disabled() {
        let material = CredentialSnapshot::default().resolve();
        assert!(!material.https_enabled);
        assert!(!material.revoked);
        assert!(material.root_ca.is_empty());
    }

    #[test]
    fn missing_root_ca_discards_cert_and_key() {
        let snapshot = CredentialSnapshot {
            https_enabled: Some(true),
            root_ca: None,
            server_key: Some("key".into()),
            server_cert: Some("cert".into()),
            revoked: Some(false),
        };
        let material = snapshot.resolve();
        assert!(material.https_enabled);
        assert!(material.server_cert.is_empty());
        assert!(material.server_key.is_empty());
    }

    #[test]
    fn revocation_toggles_without_replacing_material() {
        let store = CredentialStore::new(CredentialSnapshot {
            root_ca: Some("ca".into()),
            ..Default::default()
        });
        assert!(!store.is_revoked());
        store.set_revoked(true);
        assert!(store.is_revoked());
        assert_eq!(store.snapshot().root_ca.as_deref(), Some("ca"));
    }

    #[test]
    fn missing_pem_file_leaves_field_empty() {
        let tls = TlsConfig {
            enabled: true,
            root_ca_path: Some("/nonexistent/ca.pem".into()),
            server_cert_path: None,
            server_key_path: None,
        };
        let snapshot = CredentialSnapshot::from_tls_config(&tls);
        assert_eq!(snapshot.https_enabled, Some(true));
        assert!(snapshot.root_ca.is_none());
    }
}
