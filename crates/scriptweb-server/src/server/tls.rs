// Copyright 2025 Scriptweb Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use scriptweb_common::{BridgeError, Result};
use tokio_rustls::TlsAcceptor;

/// Builds a TLS acceptor from a PEM certificate chain and private key.
///
/// The ring provider is passed explicitly so the process-wide default
/// provider never has to be installed.
pub(crate) fn load_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let certs = load_certs(cert_path)?;
    let key = load_key(key_path)?;

    let mut config = rustls::ServerConfig::builder_with_provider(Arc::new(
        rustls::crypto::ring::default_provider(),
    ))
    .with_safe_default_protocol_versions()
    .map_err(|e| BridgeError::TlsConfig(e.to_string()))?
    .with_no_client_auth()
    .with_single_cert(certs, key)
    .map_err(|e| BridgeError::TlsConfig(format!("Failed to build TLS config: {}", e)))?;

    config.alpn_protocols = vec![b"http/1.1".to_vec()];

    Ok(TlsAcceptor::from(Arc::new(config)))
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).map_err(|e| {
        BridgeError::TlsConfig(format!("Failed to open cert file {}: {}", path.display(), e))
    })?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| BridgeError::TlsConfig(format!("Failed to parse cert: {}", e)))?;

    if certs.is_empty() {
        return Err(BridgeError::TlsConfig(format!(
            "No certificate found in {}",
            path.display()
        )));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).map_err(|e| {
        BridgeError::TlsConfig(format!("Failed to open key file {}: {}", path.display(), e))
    })?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| BridgeError::TlsConfig(format!("Failed to parse key: {}", e)))?
        .ok_or_else(|| {
            BridgeError::TlsConfig(format!("No private key found in {}", path.display()))
        })
}
