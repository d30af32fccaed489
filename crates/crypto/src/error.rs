//! Crypto error types

use thiserror::Error;

/// Errors raised by key handling, signing and CSR construction
#[derive(Debug, Error)]
pub enum CryptoError {
    /// RSA key generation failed
    #[error("Failed to generate RSA key: {0}")]
    KeyGeneration(String),

    /// PEM text is not an RSA private key we can parse
    #[error("Failed to parse RSA private key: {0}")]
    KeyParse(String),

    /// Key parsed but failed its consistency check
    #[error("RSA private key is invalid: {0}")]
    InvalidKey(String),

    /// Key could not be re-encoded
    #[error("Failed to encode RSA private key: {0}")]
    KeyEncoding(String),

    /// Signing failed
    #[error("Failed to sign data: {0}")]
    Signing(String),

    /// CSR construction failed
    #[error("Failed to create certificate signing request: {0}")]
    Csr(String),
}
