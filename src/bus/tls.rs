//! Transport security for the broker connection.
//!
//! Three modes are supported:
//! - `plain`: unencrypted TCP (the usual port is 1883)
//! - `tls`: TLS verified against the platform's native root certificates
//! - `tls-insecure`: TLS with certificate verification disabled. Only meant
//!   for demo brokers with self-signed certificates; it offers no protection
//!   against an active attacker.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use rumqttc::{TlsConfiguration, Transport};
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur while preparing a TLS transport.
#[derive(Debug, Error)]
pub enum TlsError {
    /// The platform certificate store could not be read.
    #[error("failed to load native root certificates: {0}")]
    NativeCerts(#[from] std::io::Error),

    /// The platform certificate store held no usable certificates.
    #[error("no usable root certificates found")]
    NoRootCertificates,
}

/// How the broker connection is secured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum TransportSecurity {
    #[default]
    Plain,
    Tls,
    TlsInsecure,
}

/// Error returned when parsing an unknown transport name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transport {0:?}: expected \"plain\", \"tls\" or \"tls-insecure\"")]
pub struct InvalidTransport(pub String);

impl FromStr for TransportSecurity {
    type Err = InvalidTransport;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "plain" | "tcp" => Ok(TransportSecurity::Plain),
            "tls" => Ok(TransportSecurity::Tls),
            "tls-insecure" => Ok(TransportSecurity::TlsInsecure),
            _ => Err(InvalidTransport(s.to_string())),
        }
    }
}

impl fmt::Display for TransportSecurity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportSecurity::Plain => "plain",
            TransportSecurity::Tls => "tls",
            TransportSecurity::TlsInsecure => "tls-insecure",
        };
        f.write_str(name)
    }
}

impl TransportSecurity {
    /// Builds the rumqttc transport for this mode.
    pub fn transport(self) -> Result<Transport, TlsError> {
        match self {
            TransportSecurity::Plain => Ok(Transport::Tcp),
            TransportSecurity::Tls => {
                let config = verified_client_config()?;
                Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
                    Arc::new(config),
                )))
            }
            TransportSecurity::TlsInsecure => {
                warn!("TLS certificate verification is disabled");
                Ok(Transport::tls_with_config(TlsConfiguration::Rustls(
                    Arc::new(insecure_client_config()),
                )))
            }
        }
    }
}

fn verified_client_config() -> Result<ClientConfig, TlsError> {
    let mut roots = RootCertStore::empty();
    let certs = rustls_native_certs::load_native_certs()?;
    let (added, ignored) = roots.add_parsable_certificates(certs);
    debug!(added, ignored, "Loaded native root certificates");
    if added == 0 {
        return Err(TlsError::NoRootCertificates);
    }

    Ok(ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn insecure_client_config() -> ClientConfig {
    ClientConfig::builder()
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(AcceptAnyServerCert))
        .with_no_client_auth()
}

/// Certificate verifier that accepts every server certificate.
#[derive(Debug)]
struct AcceptAnyServerCert;

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
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        vec![
            SignatureScheme::ECDSA_NISTP384_SHA384,
            SignatureScheme::ECDSA_NISTP256_SHA256,
            SignatureScheme::ED25519,
            SignatureScheme::RSA_PSS_SHA512,
            SignatureScheme::RSA_PSS_SHA384,
            SignatureScheme::RSA_PSS_SHA256,
            SignatureScheme::RSA_PKCS1_SHA512,
            SignatureScheme::RSA_PKCS1_SHA384,
            SignatureScheme::RSA_PKCS1_SHA256,
        ]
    }
}
