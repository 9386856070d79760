use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rustls::ClientConfig;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::CryptoProvider;
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use x509_parser::prelude::*;

use super::types::SslInfo;

const SECONDS_PER_DAY: i64 = 86_400;

/// Accepts any certificate; we only read it, trust is the HTTP probe's job.
#[derive(Debug)]
struct NoVerifier(Arc<CryptoProvider>);

impl ServerCertVerifier for NoVerifier {
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
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &rustls::DigitallySignedStruct,
    ) -> Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<rustls::SignatureScheme> {
        self.0.signature_verification_algorithms.supported_schemes()
    }
}

/// Reads the leaf certificate a server presents
pub struct CertInspector {
    connector: TlsConnector,
    budget: Duration,
}

impl CertInspector {
    /// `budget` covers connect and handshake together
    pub fn new(budget: Duration) -> Result<Self> {
        let provider = Arc::new(rustls::crypto::ring::default_provider());
        let config = ClientConfig::builder_with_provider(provider.clone())
            .with_safe_default_protocol_versions()?
            .dangerous()
            .with_custom_certificate_verifier(Arc::new(NoVerifier(provider)))
            .with_no_client_auth();

        Ok(Self { connector: TlsConnector::from(Arc::new(config)), budget })
    }

    pub async fn inspect(&self, host: &str, port: u16) -> Result<SslInfo> {
        let der = timeout(self.budget, self.fetch_leaf(host, port))
            .await
            .map_err(|_| anyhow!("TLS inspection timed out after {}s", self.budget.as_secs()))??;

        parse_certificate(&der, Utc::now())
    }

    async fn fetch_leaf(&self, host: &str, port: u16) -> Result<Vec<u8>> {
        let server_name = ServerName::try_from(host.to_string())
            .map_err(|e| anyhow!("Invalid server name {host}: {e}"))?;

        let tcp = TcpStream::connect((host, port))
            .await
            .map_err(|e| anyhow!("TCP connection failed: {e}"))?;
        let tls = self
            .connector
            .connect(server_name, tcp)
            .await
            .map_err(|e| anyhow!("TLS handshake failed: {e}"))?;

        let (_io, conn) = tls.into_inner();
        conn.peer_certificates()
            .and_then(|certs| certs.first())
            .map(|leaf| leaf.as_ref().to_vec())
            .ok_or_else(|| anyhow!("No peer certificates"))
    }
}

/// Extract expiry and issuer from a DER certificate as of `now`.
///
/// `days_remaining` is floored, so a certificate that expired an hour ago
/// reports -1.
pub fn parse_certificate(der: &[u8], now: DateTime<Utc>) -> Result<SslInfo> {
    let (_, cert) =
        X509Certificate::from_der(der).map_err(|e| anyhow!("Failed to parse X.509 certificate: {e}"))?;

    let not_after = cert.validity().not_after.timestamp();
    let expiry_date = DateTime::from_timestamp(not_after, 0)
        .ok_or_else(|| anyhow!("Certificate expiry {not_after} out of range"))?;
    let days_remaining = (not_after - now.timestamp()).div_euclid(SECONDS_PER_DAY);

    Ok(SslInfo { expiry_date, issuer: issuer_name(cert.issuer()), days_remaining })
}

/// Organization, then common name, then organizational unit
fn issuer_name(issuer: &X509Name<'_>) -> String {
    [
        issuer.iter_organization().next(),
        issuer.iter_common_name().next(),
        issuer.iter_organizational_unit().next(),
    ]
    .into_iter()
    .flatten()
    .find_map(|attr| attr.as_str().ok())
    .map(str::to_string)
    .unwrap_or_else(|| "Unknown".to_string())
}
