//! Certificate request and issuer chain retrieval

use std::path::PathBuf;

use tracing::{debug, info, warn};
use url::Url;

use getssl_crypto::{create_csr, der_to_pem, CERTIFICATE_LABEL};

use super::client::AcmeClient;
use super::error::AcmeError;
use super::jws::b64url;
use super::storage::CertificateStorage;
use super::types::{up_link, NewCertificate, Problem};

/// Leaf certificate issued by `new-cert`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedCertificate {
    /// PEM encoded leaf certificate
    pub cert_pem: String,
    /// Absolute URL of the issuer certificate (`Link: rel="up"`)
    pub issuer_url: String,
}

/// Outcome of a `new-cert` request
#[derive(Debug, Clone)]
pub enum CertificateReply {
    Issued(IssuedCertificate),
    /// The CA wants the domains authorized (again) first
    Unauthorized(Problem),
}

/// Requests the certificate and writes the outputs
#[derive(Debug, Clone)]
pub struct CertificateIssuer {
    storage: CertificateStorage,
}

impl CertificateIssuer {
    pub fn new(storage: CertificateStorage) -> Self {
        Self { storage }
    }

    /// Build a CSR over `domains` and POST it to `new-cert`
    pub async fn request_certificate(
        &self,
        client: &mut AcmeClient,
        cert_key_pem: &str,
        domains: &[String],
    ) -> Result<CertificateReply, AcmeError> {
        let csr = create_csr(cert_key_pem, domains)
            .map_err(|e| AcmeError::CertificateRequest(e.to_string()))?;
        info!(domains = ?domains, "Requesting certificate");

        let url = client.endpoints().new_cert.clone();
        let reply = client
            .post_signed(&url, &NewCertificate::new(b64url(&csr)))
            .await
            .map_err(|e| e.into_fatal(AcmeError::CertificateRequest))?;

        if let Some(problem) = Problem::from_body(&reply.body) {
            if problem.is_unauthorized() {
                warn!(problem = %problem, "Certificate request refused as unauthorized");
                return Ok(CertificateReply::Unauthorized(problem));
            }
            return Err(AcmeError::CertificateRequest(problem.to_string()));
        }
        if !reply.is_success() {
            return Err(AcmeError::CertificateRequest(format!(
                "unexpected status {}",
                reply.status
            )));
        }
        if reply.body.is_empty() {
            return Err(AcmeError::CertificateRequest(
                "response contained no certificate".to_string(),
            ));
        }

        let link = up_link(reply.header_values("Link")).ok_or(AcmeError::NoIssuerLink)?;
        let issuer_url = resolve(&url, &link).ok_or(AcmeError::NoIssuerLink)?;
        debug!(issuer = %issuer_url, "Certificate issued");

        Ok(CertificateReply::Issued(IssuedCertificate {
            cert_pem: certificate_pem(&reply.body),
            issuer_url,
        }))
    }

    /// Write the certificate key and the leaf certificate
    ///
    /// Returns the key and certificate paths.
    pub fn write_certificate(
        &self,
        primary_domain: &str,
        cert_key_pem: &str,
        issued: &IssuedCertificate,
    ) -> Result<(PathBuf, PathBuf), AcmeError> {
        let key_path = self
            .storage
            .write_private_key(primary_domain, cert_key_pem)
            .map_err(|source| AcmeError::CertificateKeyWrite {
                path: self.storage.key_path(primary_domain),
                source,
            })?;

        let cert_path = self
            .storage
            .write_certificate(primary_domain, &issued.cert_pem)
            .map_err(|source| AcmeError::CertificateWrite {
                path: self.storage.cert_path(primary_domain),
                source,
            })?;

        Ok((key_path, cert_path))
    }

    /// Download the issuer certificate and write it next to the leaf
    pub async fn fetch_intermediate(
        &self,
        client: &mut AcmeClient,
        issuer_url: &str,
    ) -> Result<PathBuf, AcmeError> {
        info!(url = %issuer_url, "Fetching intermediate certificate");

        let fetch_failed = |reason: String| AcmeError::IntermediateFetch {
            url: issuer_url.to_string(),
            reason,
        };

        let reply = client
            .get(issuer_url)
            .await
            .map_err(|e| e.into_fatal(fetch_failed))?;
        if !reply.is_success() {
            return Err(fetch_failed(format!("unexpected status {}", reply.status)));
        }
        if reply.body.is_empty() {
            return Err(fetch_failed("empty response".to_string()));
        }

        let pem = certificate_pem(&reply.body);
        self.storage
            .write_intermediate(&pem)
            .map_err(|source| AcmeError::IntermediateWrite {
                path: self.storage.intermediate_path(),
                source,
            })
    }
}

/// PEM text for a certificate body that is usually DER
fn certificate_pem(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) if text.trim_start().starts_with("-----BEGIN ") => text.to_string(),
        _ => der_to_pem(body, CERTIFICATE_LABEL),
    }
}

/// Resolve a possibly relative link against the request URL
fn resolve(base: &str, link: &str) -> Option<String> {
    if let Ok(absolute) = Url::parse(link) {
        return Some(absolute.into());
    }
    Url::parse(base).ok()?.join(link).ok().map(Into::into)
}
