//! TLS material loading for the HTTPS listener.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::TlsAcceptor;

use crate::config::TlsSettings;
use crate::error::{ServerError, ServerResult};
use crate::listener::ListenerKind;

fn tls_error(message: impl Into<String>) -> ServerError {
    ServerError::Tls {
        listener: ListenerKind::Https,
        message: message.into(),
    }
}

fn open(path: &Path, what: &str) -> ServerResult<BufReader<File>> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| tls_error(format!("failed to open {what} file {}: {e}", path.display())))
}

/// Reads every certificate in a PEM file.
pub fn load_certs(path: &Path) -> ServerResult<Vec<CertificateDer<'static>>> {
    let mut reader = open(path, "certificate")?;
    let certs = rustls_pemfile::certs(&mut reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| tls_error(format!("failed to parse certificate {}: {e}", path.display())))?;
    if certs.is_empty() {
        return Err(tls_error(format!("no certificate found in {}", path.display())));
    }
    Ok(certs)
}

/// Reads the first private key in a PEM file.
pub fn load_private_key(path: &Path) -> ServerResult<PrivateKeyDer<'static>> {
    let mut reader = open(path, "key")?;
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| tls_error(format!("failed to parse key {}: {e}", path.display())))?
        .ok_or_else(|| tls_error(format!("no private key found in {}", path.display())))
}

/// Builds an acceptor advertising `h2` and `http/1.1` over ALPN.
pub fn load_acceptor(settings: &TlsSettings) -> ServerResult<TlsAcceptor> {
    let certs = load_certs(&settings.cert_file)?;
    let key = load_private_key(&settings.key_file)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = rustls::ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_error(format!("unsupported protocol versions: {e}")))?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| tls_error(format!("failed to build TLS config: {e}")))?;
    config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}
