//! ACME v1 resource shapes
//!
//! Request payloads are serialized from these types and response bodies are
//! parsed into them; nothing is pulled out of raw JSON text by pattern.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Challenge type served over plain HTTP
pub const HTTP01: &str = "http-01";

// =============================================================================
// Request payloads
// =============================================================================

/// `new-reg` payload
#[derive(Debug, Clone, Serialize)]
pub struct NewRegistration<'a> {
    pub resource: &'static str,
    pub contact: Vec<String>,
    pub agreement: &'a str,
}

impl<'a> NewRegistration<'a> {
    pub fn new(email: &str, agreement: &'a str) -> Self {
        Self {
            resource: "new-reg",
            contact: vec![format!("mailto:{}", email)],
            agreement,
        }
    }
}

/// `new-authz` payload
#[derive(Debug, Clone, Serialize)]
pub struct NewAuthorization<'a> {
    pub resource: &'static str,
    pub identifier: Identifier<'a>,
}

impl<'a> NewAuthorization<'a> {
    pub fn dns(domain: &'a str) -> Self {
        Self {
            resource: "new-authz",
            identifier: Identifier {
                kind: "dns",
                value: domain,
            },
        }
    }
}

/// Identifier being authorized
#[derive(Debug, Clone, Serialize)]
pub struct Identifier<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub value: &'a str,
}

/// Challenge activation payload
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChallengeResponse<'a> {
    pub resource: &'static str,
    pub key_authorization: &'a str,
}

impl<'a> ChallengeResponse<'a> {
    pub fn new(key_authorization: &'a str) -> Self {
        Self {
            resource: "challenge",
            key_authorization,
        }
    }
}

/// `new-cert` payload
#[derive(Debug, Clone, Serialize)]
pub struct NewCertificate {
    pub resource: &'static str,
    /// base64url DER CSR
    pub csr: String,
}

impl NewCertificate {
    pub fn new(csr: String) -> Self {
        Self {
            resource: "new-cert",
            csr,
        }
    }
}

// =============================================================================
// Response bodies
// =============================================================================

/// Authorization object returned by `new-authz`
#[derive(Debug, Clone, Deserialize)]
pub struct Authorization {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub challenges: Vec<Challenge>,
}

impl Authorization {
    /// The HTTP-01 challenge, if the CA offered one with a uri and token
    pub fn http01(&self) -> Option<&Challenge> {
        self.challenges
            .iter()
            .find(|c| c.kind == HTTP01 && c.uri.is_some() && c.token.is_some())
    }
}

/// Challenge object, both inside an authorization and when polled
#[derive(Debug, Clone, Deserialize)]
pub struct Challenge {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub uri: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub status: Option<ChallengeStatus>,
    /// Problem recorded by the CA when validation failed
    #[serde(default)]
    pub error: Option<Problem>,
}

/// Lifecycle of a challenge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Valid,
    Invalid,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChallengeStatus::Pending => "pending",
            ChallengeStatus::Valid => "valid",
            ChallengeStatus::Invalid => "invalid",
            ChallengeStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// ACME problem document
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Problem {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub detail: String,
    #[serde(default)]
    pub status: Option<u16>,
}

impl Problem {
    /// Parse a problem document out of a response body
    pub fn from_body(body: &[u8]) -> Option<Self> {
        serde_json::from_slice::<Problem>(body)
            .ok()
            .filter(|p| !p.kind.is_empty())
    }

    /// `urn:acme:error:unauthorized` (or its v2 spelling)
    pub fn is_unauthorized(&self) -> bool {
        self.kind.ends_with(":unauthorized")
    }
}

impl fmt::Display for Problem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.detail.is_empty() {
            write!(f, "{}", self.kind)
        } else {
            write!(f, "{}: {}", self.kind, self.detail)
        }
    }
}

// =============================================================================
// Link header
// =============================================================================

/// URL of the `Link` entry with `rel="up"`
///
/// Accepts several header values and comma-separated entries per value,
/// e.g. `<https://ca/acme/issuer-cert>;rel="up"`.
pub fn up_link<'a>(values: impl IntoIterator<Item = &'a str>) -> Option<String> {
    for value in values {
        for entry in value.split(',') {
            let mut parts = entry.split(';');
            let Some(target) = parts.next() else {
                continue;
            };
            let target = target.trim();
            let Some(url) = target.strip_prefix('<').and_then(|t| t.strip_suffix('>')) else {
                continue;
            };

            let is_up = parts.any(|param| {
                let Some((key, val)) = param.split_once('=') else {
                    return false;
                };
                key.trim().eq_ignore_ascii_case("rel")
                    && val.trim().trim_matches('"').split_whitespace().any(|r| r == "up")
            });
            if is_up && !url.is_empty() {
                return Some(url.to_string());
            }
        }
    }
    None
}
