//! TLS termination for the HTTP listener

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::server::WebPkiClientVerifier;
use rustls::{RootCertStore, ServerConfig};
use rustls_pemfile::{certs, private_key};
use tokio_rustls::TlsAcceptor;

use burrow_core::config::TlsConfig;
use burrow_core::error::TransportError;

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::Tls(format!("Failed to open cert file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TransportError::Tls(format!("Failed to parse certificates: {}", e)))
}

fn load_private_key(path: &Path) -> Result<PrivateKeyDer<'static>, TransportError> {
    let file = File::open(path)
        .map_err(|e| TransportError::Tls(format!("Failed to open key file {:?}: {}", path, e)))?;
    let mut reader = BufReader::new(file);
    private_key(&mut reader)
        .map_err(|e| TransportError::Tls(format!("Failed to parse private key: {}", e)))?
        .ok_or_else(|| TransportError::Tls(format!("No private key found in {:?}", path)))
}

fn load_root_store(path: &Path) -> Result<RootCertStore, TransportError> {
    let mut roots = RootCertStore::empty();
    for cert in load_certs(path)? {
        roots
            .add(cert)
            .map_err(|e| TransportError::Tls(format!("Failed to add CA certificate: {}", e)))?;
    }
    Ok(roots)
}

/// Build a TLS acceptor from the configured files.
///
/// Returns `None` when no certificate/key pair is configured. With a CA
/// file, clients must present a certificate signed by it.
pub fn build_acceptor(tls: &TlsConfig) -> Result<Option<TlsAcceptor>, TransportError> {
    let (Some(cert), Some(key)) = (&tls.cert, &tls.key) else {
        return Ok(None);
    };

    let certs = load_certs(cert)?;
    let key = load_private_key(key)?;
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let builder = ServerConfig::builder_with_provider(Arc::clone(&provider))
        .with_safe_default_protocol_versions()
        .map_err(|e| TransportError::Tls(e.to_string()))?;

    let builder = match &tls.ca {
        Some(ca) => {
            let verifier =
                WebPkiClientVerifier::builder_with_provider(Arc::new(load_root_store(ca)?), provider)
                    .build()
                    .map_err(|e| {
                        TransportError::Tls(format!("Failed to build client verifier: {}", e))
                    })?;
            builder.with_client_cert_verifier(verifier)
        }
        None => builder.with_no_client_auth(),
    };

    let mut config = builder
        .with_single_cert(certs, key)
        .map_err(|e| TransportError::Tls(format!("Failed to build server config: {}", e)))?;
    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    tracing::info!(
        "TLS enabled (cert: {:?}, client certificates {})",
        cert,
        if tls.ca.is_some() { "required" } else { "not required" }
    );

    Ok(Some(TlsAcceptor::from(Arc::new(config))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_no_tls_configured() {
        assert!(build_acceptor(&TlsConfig::default()).unwrap().is_none());
    }

    #[test]
    fn test_missing_cert_file() {
        let tls = TlsConfig {
            cert: Some("/nonexistent/cert.pem".into()),
            key: Some("/nonexistent/key.pem".into()),
            ca: None,
        };
        assert!(matches!(build_acceptor(&tls), Err(TransportError::Tls(_))));
    }

    #[test]
    fn test_key_file_without_key() {
        let mut empty = NamedTempFile::new().unwrap();
        writeln!(empty, "not a pem file").unwrap();
        assert!(load_private_key(empty.path()).is_err());
    }
}
