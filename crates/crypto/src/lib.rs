//! Crypto primitives for the getssl ACME client
//!
//! Thin layer over the RustCrypto `rsa`/`sha2` crates and `rcgen` that
//! exposes exactly what an ACME v1 client needs:
//!
//! - RSA key generation, loading and validation (PEM in, PEM out)
//! - The public modulus/exponent for building a JWK
//! - SHA-256 digests and RS256 (PKCS#1 v1.5) signatures
//! - CSR construction over a list of DNS names
//! - DER to PEM conversion for certificates returned by the CA
//!
//! Keys always cross this API as PEM text. Generated keys are PKCS#8;
//! loading also accepts PKCS#1 (`RSA PRIVATE KEY`) files.

mod csr;
mod error;
mod keys;

pub use csr::{create_csr, der_to_pem, CERTIFICATE_LABEL};
pub use error::CryptoError;
pub use keys::{generate_rsa_key, public_modulus_exponent, sign_rs256, validate_rsa_key};

use sha2::{Digest, Sha256};

/// SHA-256 digest of `data`
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}
