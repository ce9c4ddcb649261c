//! rustls client configurations for outbound federation traffic.

use once_cell::sync::OnceCell;
use rustls::crypto::{CryptoProvider, ring};
use rustls::{ClientConfig, RootCertStore};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};
use std::sync::Arc;

use crate::credentials::TlsMaterial;
use crate::error::TransportError;

/// Shared configuration for destinations that only need public roots.
static DEFAULT_TLS_CONFIG: OnceCell<Arc<ClientConfig>> = OnceCell::new();

fn provider() -> Arc<CryptoProvider> {
    Arc::new(ring::default_provider())
}

fn tls_err(e: impl std::fmt::Display) -> TransportError {
    TransportError::Tls(e.to_string())
}

/// Public webpki roots, no client certificate. Built once per process.
pub fn default_tls_config() -> Result<Arc<ClientConfig>, TransportError> {
    DEFAULT_TLS_CONFIG
        .get_or_try_init(|| {
            let mut root_cert_store = RootCertStore::empty();
            root_cert_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

            let config = ClientConfig::builder_with_provider(provider())
                .with_safe_default_protocol_versions()
                .map_err(tls_err)?
                .with_root_certificates(root_cert_store)
                .with_no_client_auth();

            Ok(Arc::new(config))
        })
        .cloned()
}

/// Configuration trusting the private root CA and presenting the server
/// certificate when both halves of the key pair are present.
pub fn client_tls_config(material: &TlsMaterial) -> Result<Arc<ClientConfig>, TransportError> {
    if material.root_ca.is_empty() {
        return default_tls_config();
    }

    let mut roots = RootCertStore::empty();
    for cert in rustls_pemfile::certs(&mut material.root_ca.as_bytes()) {
        roots.add(cert.map_err(tls_err)?).map_err(tls_err)?;
    }
    if roots.is_empty() {
        return Err(TransportError::Tls(
            "root CA bundle contains no certificates".into(),
        ));
    }

    let builder = ClientConfig::builder_with_provider(provider())
        .with_safe_default_protocol_versions()
        .map_err(tls_err)?
        .with_root_certificates(roots);

    let config = if material.server_cert.is_empty() || material.server_key.is_empty() {
        builder.with_no_client_auth()
    } else {
        let chain: Vec<CertificateDer<'static>> =
            rustls_pemfile::certs(&mut material.server_cert.as_bytes())
                .collect::<Result<_, _>>()
                .map_err(tls_err)?;
        let key: PrivateKeyDer<'static> =
            rustls_pemfile::private_key(&mut material.server_key.as_bytes())
                .map_err(tls_err)?
                .ok_or_else(|| TransportError::Tls("server key PEM holds no private key".into()))?;
        builder
            .with_client_auth_cert(chain, key)
            .map_err(tls_err)?
    };

    Ok(Arc::new(config))
}
