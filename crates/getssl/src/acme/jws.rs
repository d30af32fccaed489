//! Signed request construction
//!
//! Every ACME v1 POST body is a JWS-like envelope:
//!
//! ```text
//! {
//!   "header":    {"alg":"RS256","jwk":{..}},
//!   "protected": b64url({"alg":"RS256","jwk":{..},"nonce":".."}),
//!   "payload":   b64url(payload json),
//!   "signature": b64url(RS256(protected + "." + payload))
//! }
//! ```

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, Method};
use serde::Serialize;

use getssl_crypto::{public_modulus_exponent, sha256, sign_rs256, CryptoError};

use super::error::RequestError;
use super::transport::HttpRequest;

/// Signature algorithm advertised in every header
const ALGORITHM: &str = "RS256";

/// Content type ACME v1 servers accept for the envelope
pub const SIGNED_CONTENT_TYPE: &str = "application/x-www-form-urlencoded";

/// base64url without padding
pub fn b64url(data: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(data)
}

/// Public half of the account key as a JWK
///
/// Field order is the lexicographic member order, so serializing this
/// struct yields the canonical form used for the thumbprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Jwk {
    pub e: String,
    pub kty: &'static str,
    pub n: String,
}

/// The account key together with its derived JWK and thumbprint
#[derive(Clone)]
pub struct AccountKey {
    pem: String,
    jwk: Jwk,
    thumbprint: String,
}

impl AccountKey {
    /// Derive the JWK and thumbprint from a PEM private key
    pub fn from_pem(pem: impl Into<String>) -> Result<Self, CryptoError> {
        let pem = pem.into();
        let (n, e) = public_modulus_exponent(&pem)?;
        let jwk = Jwk {
            e: b64url(&e),
            kty: "RSA",
            n: b64url(&n),
        };
        let canonical = serde_json::to_vec(&jwk)
            .map_err(|e| CryptoError::KeyEncoding(e.to_string()))?;
        let thumbprint = b64url(&sha256(&canonical));

        Ok(Self {
            pem,
            jwk,
            thumbprint,
        })
    }

    pub fn jwk(&self) -> &Jwk {
        &self.jwk
    }

    /// base64url(SHA-256(canonical JWK))
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Value the CA expects at `/.well-known/acme-challenge/{token}`
    pub fn key_authorization(&self, token: &str) -> String {
        format!("{}.{}", token, self.thumbprint)
    }

    pub(crate) fn pem(&self) -> &str {
        &self.pem
    }
}

impl std::fmt::Debug for AccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountKey")
            .field("thumbprint", &self.thumbprint)
            .finish()
    }
}

#[derive(Serialize)]
struct Header<'a> {
    alg: &'static str,
    jwk: &'a Jwk,
}

#[derive(Serialize)]
struct ProtectedHeader<'a> {
    alg: &'static str,
    jwk: &'a Jwk,
    nonce: &'a str,
}

#[derive(Serialize)]
struct Envelope<'a> {
    header: Header<'a>,
    protected: String,
    payload: String,
    signature: String,
}

/// Build the signed POST for `target_uri` carrying `payload`
///
/// Pure function: the caller owns nonce bookkeeping and must never pass
/// the same nonce twice.
pub fn build_signed_request<P: Serialize + ?Sized>(
    account: &AccountKey,
    nonce: &str,
    target_uri: &str,
    payload: &P,
) -> Result<HttpRequest, RequestError> {
    if nonce.is_empty() {
        return Err(RequestError::NoNonce("nonce is empty".to_string()));
    }

    let protected = ProtectedHeader {
        alg: ALGORITHM,
        jwk: &account.jwk,
        nonce,
    };
    let protected = b64url(&to_json(&protected)?);
    let payload = b64url(&to_json(payload)?);

    let signing_input = format!("{}.{}", protected, payload);
    let signature = sign_rs256(account.pem(), signing_input.as_bytes())
        .map_err(|e| RequestError::Signing(e.to_string()))?;

    let envelope = Envelope {
        header: Header {
            alg: ALGORITHM,
            jwk: &account.jwk,
        },
        protected,
        payload,
        signature: b64url(&signature),
    };

    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(SIGNED_CONTENT_TYPE));

    Ok(HttpRequest {
        method: Method::POST,
        url: target_uri.to_string(),
        headers,
        body: Some(to_json(&envelope)?),
    })
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, RequestError> {
    serde_json::to_vec(value).map_err(|e| RequestError::Signing(e.to_string()))
}
