//! RSA key handling and RS256 signatures

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use rsa::RsaPrivateKey;
use sha2::Sha256;
use tracing::{debug, trace};

use crate::CryptoError;

/// Generate a new RSA private key of `bits` bits, returned as PKCS#8 PEM
pub fn generate_rsa_key(bits: usize) -> Result<String, CryptoError> {
    debug!(bits, "Generating RSA private key");

    let mut rng = rand::thread_rng();
    let key = RsaPrivateKey::new(&mut rng, bits)
        .map_err(|e| CryptoError::KeyGeneration(e.to_string()))?;

    encode_pkcs8(&key)
}

/// Check that `pem` holds a usable RSA private key
///
/// Returns `false` for unparseable PEM as well as for keys whose
/// components are inconsistent.
pub fn validate_rsa_key(pem: &str) -> bool {
    match parse_private_key(pem) {
        Ok(key) => match key.validate() {
            Ok(()) => true,
            Err(e) => {
                debug!(error = %e, "RSA key failed validation");
                false
            }
        },
        Err(e) => {
            debug!(error = %e, "RSA key could not be parsed");
            false
        }
    }
}

/// Big-endian modulus and public exponent of the key in `pem`
///
/// Both are minimal encodings (no leading zero bytes), as required for
/// the `n` and `e` members of a JWK.
pub fn public_modulus_exponent(pem: &str) -> Result<(Vec<u8>, Vec<u8>), CryptoError> {
    let key = parse_private_key(pem)?;
    Ok((key.n().to_bytes_be(), key.e().to_bytes_be()))
}

/// RS256 signature (RSASSA-PKCS1-v1_5 with SHA-256) over `data`
pub fn sign_rs256(pem: &str, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let key = parse_private_key(pem)?;
    let signing_key = SigningKey::<Sha256>::new(key);
    let signature = signing_key
        .try_sign(data)
        .map_err(|e| CryptoError::Signing(e.to_string()))?;

    trace!(len = data.len(), "Signed data with RS256");
    Ok(signature.to_vec())
}

/// Parse a PKCS#8 or PKCS#1 PEM private key
pub(crate) fn parse_private_key(pem: &str) -> Result<RsaPrivateKey, CryptoError> {
    match RsaPrivateKey::from_pkcs8_pem(pem) {
        Ok(key) => Ok(key),
        Err(pkcs8_err) => RsaPrivateKey::from_pkcs1_pem(pem).map_err(|pkcs1_err| {
            CryptoError::KeyParse(format!("not PKCS#8 ({pkcs8_err}) or PKCS#1 ({pkcs1_err})"))
        }),
    }
}

/// Re-encode a private key as PKCS#8 PEM
pub(crate) fn encode_pkcs8(key: &RsaPrivateKey) -> Result<String, CryptoError> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
    Ok(pem.as_str().to_owned())
}
