//! TLS for the webhook listener

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::PrivateKeyDer;
use rustls::ServerConfig;
use rustls_pemfile::{certs, read_all, Item};
use tracing::debug;

/// Server side TLS configuration of the webhook
#[derive(Clone)]
pub struct TlsServerConfig {
    pub config: Arc<ServerConfig>,
}

impl TlsServerConfig {
    /// Build from a PEM certificate chain and a PEM private key (PKCS#8, PKCS#1 or SEC1)
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self> {
        let chain = certs(&mut BufReader::new(cert_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Failed to parse certificates: {}", e))?;
        if chain.is_empty() {
            return Err(anyhow!("No certificates found in PEM data"));
        }
        debug!("Loaded {} certificate(s)", chain.len());

        let items = read_all(&mut BufReader::new(key_pem))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| anyhow!("Failed to parse private key: {}", e))?;
        let key = items
            .into_iter()
            .find_map(|item| match item {
                Item::Pkcs8Key(k) => Some(PrivateKeyDer::Pkcs8(k)),
                Item::Pkcs1Key(k) => Some(PrivateKeyDer::Pkcs1(k)),
                Item::Sec1Key(k) => Some(PrivateKeyDer::Sec1(k)),
                _ => None,
            })
            .ok_or_else(|| anyhow!("No private key found in PEM data"))?;

        let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
            .with_safe_default_protocol_versions()
            .map_err(|e| anyhow!("Failed to select TLS versions: {}", e))?
            .with_no_client_auth()
            .with_single_cert(chain, key)
            .map_err(|e| anyhow!("Failed to create TLS config: {}", e))?;

        Ok(Self {
            config: Arc::new(config),
        })
    }

    pub fn from_files(cert_path: &Path, key_path: &Path) -> Result<Self> {
        let cert = std::fs::read(cert_path)
            .with_context(|| format!("Failed to read TLS certificate from {}", cert_path.display()))?;
        let key = std::fs::read(key_path)
            .with_context(|| format!("Failed to read TLS key from {}", key_path.display()))?;
        Self::from_pem(&cert, &key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_missing_certificate() {
        let err = TlsServerConfig::from_pem(b"", b"").err().unwrap();
        assert!(err.to_string().contains("No certificates"));
    }

    #[test]
    fn test_rejects_missing_key() {
        let cert = b"-----BEGIN CERTIFICATE-----\nMAA=\n-----END CERTIFICATE-----\n";
        let err = TlsServerConfig::from_pem(cert, b"").err().unwrap();
        assert!(err.to_string().contains("No private key"));
    }

    #[test]
    fn test_missing_files() {
        let err = TlsServerConfig::from_files(Path::new("/nonexistent/tls.crt"), Path::new("/nonexistent/tls.key"))
            .err()
            .unwrap();
        assert!(err.to_string().contains("/nonexistent/tls.crt"));
    }
}
