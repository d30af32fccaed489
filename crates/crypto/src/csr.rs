//! Certificate signing requests and PEM encoding

use rcgen::{CertificateParams, DistinguishedName, DnType, KeyPair, PKCS_RSA_SHA256};
use tracing::debug;

use crate::keys::{encode_pkcs8, parse_private_key};
use crate::CryptoError;

/// PEM label for X.509 certificates
pub const CERTIFICATE_LABEL: &str = "CERTIFICATE";

/// Build a DER-encoded CSR for `domains`, signed with the key in `key_pem`
///
/// The first domain becomes the subject common name; every domain, in
/// input order, is listed as a DNS subject alternative name.
pub fn create_csr(key_pem: &str, domains: &[String]) -> Result<Vec<u8>, CryptoError> {
    let primary = domains
        .first()
        .ok_or_else(|| CryptoError::Csr("at least one domain is required".to_string()))?;

    // rcgen only loads PKCS#8, so normalize PKCS#1 input first
    let pkcs8_pem = encode_pkcs8(&parse_private_key(key_pem)?)?;
    let key_pair = KeyPair::from_pem_and_sign_algo(&pkcs8_pem, &PKCS_RSA_SHA256)
        .map_err(|e| CryptoError::Csr(format!("unusable key: {e}")))?;

    let mut params =
        CertificateParams::new(domains.to_vec()).map_err(|e| CryptoError::Csr(e.to_string()))?;
    let mut subject = DistinguishedName::new();
    subject.push(DnType::CommonName, primary.as_str());
    params.distinguished_name = subject;

    let csr = params
        .serialize_request(&key_pair)
        .map_err(|e| CryptoError::Csr(e.to_string()))?;

    debug!(common_name = %primary, names = domains.len(), "Created CSR");
    Ok(csr.der().to_vec())
}

/// Wrap DER bytes in PEM armor with the given label
pub fn der_to_pem(der: &[u8], label: &str) -> String {
    let block = pem::Pem::new(label, der.to_vec());
    pem::encode_config(
        &block,
        pem::EncodeConfig::new().set_line_ending(pem::LineEnding::LF),
    )
}
