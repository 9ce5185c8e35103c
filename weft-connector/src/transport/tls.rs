//! Mutual-TLS client configuration built from [`ClientMetadata`] paths.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::{ClientConfig, RootCertStore};

use crate::config::ClientMetadata;
use crate::error::{ConnectionError, ConnectionResult};

/// Build a rustls client configuration presenting the client certificate
/// and trusting only the deployment's CA bundle.
pub fn client_tls_config(metadata: &ClientMetadata) -> ConnectionResult<Arc<ClientConfig>> {
    let mut roots = RootCertStore::empty();
    for cert in read_certs(&metadata.ca_crt_path)? {
        roots.add(cert).map_err(|e| {
            ConnectionError::config(format!(
                "invalid CA certificate in {}: {e}",
                metadata.ca_crt_path.display()
            ))
        })?;
    }

    let certs = read_certs(&metadata.client_crt_path)?;
    let key = read_private_key(&metadata.client_key_path)?;

    let config = ClientConfig::builder()
        .with_root_certificates(roots)
        .with_client_auth_cert(certs, key)
        .map_err(|e| {
            ConnectionError::config(format!(
                "client certificate/key pair rejected: {e}"
            ))
        })?;

    Ok(Arc::new(config))
}

fn read_certs(path: &Path) -> ConnectionResult<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        ConnectionError::config(format!("cannot open {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    let certs: Vec<_> = rustls_pemfile::certs(&mut reader)
        .collect::<Result<_, _>>()
        .map_err(|e| {
            ConnectionError::config(format!("cannot parse PEM in {}: {e}", path.display()))
        })?;
    if certs.is_empty() {
        return Err(ConnectionError::config(format!(
            "no certificates found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> ConnectionResult<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        ConnectionError::config(format!("cannot open {}: {e}", path.display()))
    })?;
    let mut reader = BufReader::new(file);
    rustls_pemfile::private_key(&mut reader)
        .map_err(|e| {
            ConnectionError::config(format!("cannot parse PEM in {}: {e}", path.display()))
        })?
        .ok_or_else(|| {
            ConnectionError::config(format!("no private key found in {}", path.display()))
        })
}
