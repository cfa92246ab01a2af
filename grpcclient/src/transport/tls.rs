//! Transport security.
//!
//! [`TlsClientConfig`] is the TLS material of a client configuration. As a
//! [`SecurityProvider`] it turns into a rustls [`ClientConfig`] when TLS is
//! enabled and into [`TransportSecurity::Insecure`] otherwise.
//!
//! # Feature Flags
//!
//! TLS needs a crypto provider and, unless a CA file is configured, root
//! certificates:
//!
//! - **Crypto providers** (choose one):
//!   - `tls-ring` - Use ring crypto (default with `tls` feature)
//!   - `tls-aws-lc` - Use AWS LC crypto
//!
//! - **Root certificates** (choose one):
//!   - `tls-native-roots` - Use system root certificates (default with `tls` feature)
//!   - `tls-webpki-roots` - Use bundled Mozilla root certificates
//!
//! Without a feature-gated provider, the process-wide default installed via
//! `CryptoProvider::install_default()` is used.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, WebPkiSupportedAlgorithms};
use rustls::pki_types::pem::PemObject;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use serde::{Deserialize, Serialize};

use crate::SecurityError;

static TLS13_ONLY: &[&rustls::SupportedProtocolVersion] = &[&rustls::version::TLS13];

/// Resolves the transport security of a connection.
pub trait SecurityProvider: Send + Sync {
    /// Produce security options; `enabled` is the configuration's TLS flag.
    fn transport_security(&self, enabled: bool) -> Result<TransportSecurity, SecurityError>;
}

/// Security options handed to connection establishment.
#[derive(Clone, Debug)]
pub enum TransportSecurity {
    /// Plaintext connection.
    Insecure,
    /// TLS connection.
    Tls {
        config: Arc<ClientConfig>,
        /// Name to verify the server certificate against, when it differs
        /// from the dial target.
        server_name: Option<String>,
    },
}

impl TransportSecurity {
    /// Returns whether the connection uses TLS.
    pub fn is_tls(&self) -> bool {
        matches!(self, TransportSecurity::Tls { .. })
    }
}

/// Minimum TLS protocol version.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TlsVersion {
    #[serde(rename = "VersionTLS12")]
    Tls12,
    #[serde(rename = "VersionTLS13")]
    Tls13,
}

/// TLS material for a client connection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsClientConfig {
    /// Client certificate chain (PEM), for mutual TLS.
    #[serde(rename = "tls_cert_path", skip_serializing_if = "Option::is_none")]
    pub cert_path: Option<PathBuf>,
    /// Client private key (PEM), for mutual TLS.
    #[serde(rename = "tls_key_path", skip_serializing_if = "Option::is_none")]
    pub key_path: Option<PathBuf>,
    /// CA certificates (PEM) trusted instead of the platform roots.
    #[serde(rename = "tls_ca_path", skip_serializing_if = "Option::is_none")]
    pub ca_path: Option<PathBuf>,
    /// Override for the name the server certificate is verified against.
    #[serde(rename = "tls_server_name", skip_serializing_if = "Option::is_none")]
    pub server_name: Option<String>,
    /// Skip server certificate verification.
    #[serde(rename = "tls_insecure_skip_verify")]
    pub insecure_skip_verify: bool,
    /// Lowest protocol version offered.
    #[serde(rename = "tls_min_version", skip_serializing_if = "Option::is_none")]
    pub min_version: Option<TlsVersion>,
}

impl TlsClientConfig {
    /// Build the rustls client configuration.
    ///
    /// The ALPN protocol is always `h2`.
    pub fn client_config(&self) -> Result<ClientConfig, SecurityError> {
        let client_auth = match (&self.cert_path, &self.key_path) {
            (Some(cert), Some(key)) => Some((load_certs(cert)?, load_key(key)?)),
            (None, None) => None,
            _ => return Err(SecurityError::IncompleteClientAuth),
        };

        if let Some(name) = &self.server_name {
            ServerName::try_from(name.as_str())
                .map_err(|_| SecurityError::InvalidServerName(name.clone()))?;
        }

        let provider = crypto_provider().ok_or(SecurityError::NoCryptoProvider)?;
        let versions: &[&'static rustls::SupportedProtocolVersion] = match self.min_version {
            Some(TlsVersion::Tls13) => TLS13_ONLY,
            Some(TlsVersion::Tls12) | None => rustls::ALL_VERSIONS,
        };
        let algorithms = provider.signature_verification_algorithms;
        let builder = ClientConfig::builder_with_provider(provider).with_protocol_versions(versions)?;

        let builder = if self.insecure_skip_verify {
            #[cfg(feature = "tracing")]
            tracing::warn!("TLS server certificate verification is disabled");

            builder
                .dangerous()
                .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert { algorithms }))
        } else {
            builder.with_root_certificates(self.root_store()?)
        };

        let mut config = match client_auth {
            Some((certs, key)) => builder.with_client_auth_cert(certs, key)?,
            None => builder.with_no_client_auth(),
        };
        config.alpn_protocols = vec![b"h2".to_vec()];

        Ok(config)
    }

    fn root_store(&self) -> Result<RootCertStore, SecurityError> {
        match &self.ca_path {
            Some(path) => {
                let mut roots = RootCertStore::empty();
                for cert in load_certs(path)? {
                    roots.add(cert)?;
                }
                Ok(roots)
            }
            None => Ok(platform_roots()),
        }
    }
}

impl SecurityProvider for TlsClientConfig {
    fn transport_security(&self, enabled: bool) -> Result<TransportSecurity, SecurityError> {
        if !enabled {
            return Ok(TransportSecurity::Insecure);
        }

        Ok(TransportSecurity::Tls {
            config: Arc::new(self.client_config()?),
            server_name: self.server_name.clone(),
        })
    }
}

/// Pick the crypto provider.
///
/// Priority:
/// 1. Feature-gated provider (tls-ring, then tls-aws-lc)
/// 2. User-installed process default
fn crypto_provider() -> Option<Arc<CryptoProvider>> {
    #[cfg(feature = "tls-ring")]
    return Some(Arc::new(rustls::crypto::ring::default_provider()));

    #[cfg(all(feature = "tls-aws-lc", not(feature = "tls-ring")))]
    return Some(Arc::new(rustls::crypto::aws_lc_rs::default_provider()));

    #[cfg(not(any(feature = "tls-ring", feature = "tls-aws-lc")))]
    {
        CryptoProvider::get_default().cloned()
    }
}

/// Root certificates from enabled features. Native roots win when both
/// features are on.
fn platform_roots() -> RootCertStore {
    #[allow(unused_mut)]
    let mut roots = RootCertStore::empty();

    #[cfg(feature = "tls-native-roots")]
    {
        let native_certs = rustls_native_certs::load_native_certs();
        if !native_certs.errors.is_empty() {
            // Some certs may still have loaded
            #[cfg(feature = "tracing")]
            tracing::debug!("errors loading native certs: {:?}", native_certs.errors);
        }
        roots.add_parsable_certificates(native_certs.certs);
    }

    #[cfg(all(feature = "tls-webpki-roots", not(feature = "tls-native-roots")))]
    {
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    }

    roots
}

fn load_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, SecurityError> {
    let pem_error = |message: String| SecurityError::Pem {
        kind: "certificates",
        path: path.to_path_buf(),
        message,
    };

    let certs = CertificateDer::pem_file_iter(path)
        .map_err(|e| pem_error(e.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| pem_error(e.to_string()))?;

    if certs.is_empty() {
        return Err(pem_error("no certificates found".to_string()));
    }
    Ok(certs)
}

fn load_key(path: &Path) -> Result<PrivateKeyDer<'static>, SecurityError> {
    PrivateKeyDer::from_pem_file(path).map_err(|e| SecurityError::Pem {
        kind: "private key",
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Accepts any server certificate while still checking handshake
/// signatures.
///
/// Connections using it are open to man-in-the-middle attacks. Only for
/// development and testing.
#[derive(Debug)]
struct AcceptAnyServerCert {
    algorithms: WebPkiSupportedAlgorithms,
}

impl ServerCertVerifier for AcceptAnyServerCert {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls12_signature(message, cert, dss, &self.algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        rustls::crypto::verify_tls13_signature(message, cert, dss, &self.algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.algorithms.supported_schemes()
    }
}
