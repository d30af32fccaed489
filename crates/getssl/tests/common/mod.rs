//! Scripted ACME v1 CA for integration tests
//!
//! [`FakeCa`] plugs into the orchestrator as its [`HttpTransport`]. It hands
//! out nonces and rejects any nonce it did not issue or already saw, checks
//! every RS256 signature against the embedded JWK, checks key
//! authorizations against the JWK thumbprint, fetches tokens from the
//! real challenge responder, and parses the CSR it is sent.

#![allow(dead_code)]

use std::collections::HashSet;
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use bytes::Bytes;
use http::{HeaderMap, HeaderValue, Method};
use parking_lot::Mutex;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use rsa::{BigUint, RsaPublicKey};
use sha2::Sha256;
use serde_json::{json, Value};
use x509_parser::certification_request::X509CertificationRequest;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use getssl::acme::{b64url, HttpRequest, HttpTransport, Reply, TransportError};
use getssl::RunConfig;

pub const CA_HOST: &str = "ca.test";
pub const CA_BASE: &str = "http://ca.test";

const UNAUTHORIZED: &str = "urn:acme:error:unauthorized";

/// How the CA decides challenges
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeOutcome {
    /// Valid on the first poll if the key authorization checked out
    Valid,
    /// Always invalid
    Invalid,
    /// Never leaves pending
    Pending,
    /// Pending for this many polls, then decided like `Valid`
    PendingThenValid(u32),
}

/// Behaviour knobs of the fake CA
#[derive(Debug, Clone)]
pub struct CaScript {
    /// The account key is already registered
    pub account_known: bool,
    /// Status returned by new-reg; 201 and 409 register the account
    pub registration_status: u16,
    pub challenge_outcome: ChallengeOutcome,
    /// Number of new-cert requests refused as unauthorized
    pub unauthorized_certs: u32,
    /// Send `Link: <issuer>;rel="up"` with the certificate
    pub issuer_link: bool,
    pub issuer_status: u16,
    /// Fetch each token from the responder on activation
    pub fetch_tokens: bool,
    pub responder_port: u16,
    /// Indices of exchanges whose response carries no nonce
    pub drop_nonce_on: Vec<usize>,
}

impl Default for CaScript {
    fn default() -> Self {
        Self {
            account_known: true,
            registration_status: 201,
            challenge_outcome: ChallengeOutcome::Valid,
            unauthorized_certs: 0,
            issuer_link: true,
            issuer_status: 200,
            fetch_tokens: true,
            responder_port: 0,
            drop_nonce_on: Vec::new(),
        }
    }
}

/// One request/response pair as seen by the CA
#[derive(Debug, Clone)]
pub struct Exchange {
    pub method: String,
    pub path: String,
    pub status: u16,
    /// Nonce the request was signed with
    pub signed_nonce: Option<String>,
    /// Nonce handed out in the response
    pub issued_nonce: Option<String>,
    pub payload: Option<Value>,
}

impl Exchange {
    pub fn line(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

#[derive(Debug)]
struct Authz {
    domain: String,
    token: String,
    activated: bool,
    key_authorization_ok: bool,
    polls: u32,
    valid: bool,
}

#[derive(Debug)]
struct Signed {
    nonce: String,
    signature_valid: bool,
    thumbprint: String,
    payload: Value,
}

struct Answer {
    status: u16,
    body: Vec<u8>,
    headers: Vec<(&'static str, String)>,
}

impl Answer {
    fn empty(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            headers: Vec::new(),
        }
    }

    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: body.to_string().into_bytes(),
            headers: vec![("content-type", "application/json".to_string())],
        }
    }

    fn problem(status: u16, kind: &str, detail: &str) -> Self {
        Self {
            status,
            body: json!({"type": kind, "detail": detail, "status": status})
                .to_string()
                .into_bytes(),
            headers: vec![("content-type", "application/problem+json".to_string())],
        }
    }

    fn unauthorized(detail: &str) -> Self {
        Self::problem(403, UNAUTHORIZED, detail)
    }
}

struct CaState {
    script: CaScript,
    nonce_counter: u64,
    outstanding: HashSet<String>,
    bad_nonces: Vec<String>,
    bad_signatures: usize,
    registered: bool,
    authorizations: Vec<Authz>,
    csr_domains: Vec<Vec<String>>,
    exchanges: Vec<Exchange>,
    leaf_der: Vec<u8>,
    issuer_der: Vec<u8>,
}

/// In-process ACME v1 CA
#[derive(Clone)]
pub struct FakeCa {
    state: Arc<Mutex<CaState>>,
}

impl FakeCa {
    pub fn new(script: CaScript) -> Self {
        Self {
            state: Arc::new(Mutex::new(CaState {
                script,
                nonce_counter: 0,
                outstanding: HashSet::new(),
                bad_nonces: Vec::new(),
                bad_signatures: 0,
                registered: false,
                authorizations: Vec::new(),
                csr_domains: Vec::new(),
                exchanges: Vec::new(),
                leaf_der: self_signed_der("leaf.fake-ca.test"),
                issuer_der: self_signed_der("Fake Issuer"),
            })),
        }
    }

    pub fn exchanges(&self) -> Vec<Exchange> {
        self.state.lock().exchanges.clone()
    }

    /// `METHOD /path` of every exchange, in order
    pub fn lines(&self) -> Vec<String> {
        self.state.lock().exchanges.iter().map(Exchange::line).collect()
    }

    pub fn count(&self, method: &str, path: &str) -> usize {
        self.state
            .lock()
            .exchanges
            .iter()
            .filter(|e| e.method == method && e.path == path)
            .count()
    }

    pub fn count_prefix(&self, method: &str, prefix: &str) -> usize {
        self.state
            .lock()
            .exchanges
            .iter()
            .filter(|e| e.method == method && e.path.starts_with(prefix))
            .count()
    }

    /// Domains in the order new-authz saw them
    pub fn authorized_domains(&self) -> Vec<String> {
        self.state
            .lock()
            .authorizations
            .iter()
            .map(|a| a.domain.clone())
            .collect()
    }

    /// Names of every CSR received
    pub fn csr_domains(&self) -> Vec<Vec<String>> {
        self.state.lock().csr_domains.clone()
    }

    /// Nonces that were unknown or replayed
    pub fn bad_nonces(&self) -> Vec<String> {
        self.state.lock().bad_nonces.clone()
    }

    /// Signed requests whose signature did not verify against their JWK
    pub fn bad_signatures(&self) -> usize {
        self.state.lock().bad_signatures
    }

    pub fn is_registered(&self) -> bool {
        self.state.lock().registered
    }

    pub fn leaf_der(&self) -> Vec<u8> {
        self.state.lock().leaf_der.clone()
    }

    pub fn issuer_der(&self) -> Vec<u8> {
        self.state.lock().issuer_der.clone()
    }

    /// Fetch the token of authorization `index` from the responder
    async fn fetch_token(&self, index: usize) -> Option<String> {
        let (port, token) = {
            let state = self.state.lock();
            if !state.script.fetch_tokens {
                return None;
            }
            let token = state.authorizations.get(index)?.token.clone();
            (state.script.responder_port, token)
        };

        let url = format!(
            "http://127.0.0.1:{}/.well-known/acme-challenge/{}",
            port, token
        );
        let response = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .ok()?
            .get(&url)
            .send()
            .await
            .ok()?;
        if !response.status().is_success() {
            return None;
        }
        response.text().await.ok()
    }
}

#[async_trait]
impl HttpTransport for FakeCa {
    async fn execute(&self, request: HttpRequest) -> Result<Reply, TransportError> {
        let url = url::Url::parse(&request.url).map_err(|e| TransportError::Other(e.to_string()))?;
        if url.host_str() != Some(CA_HOST) {
            return Err(TransportError::Other(format!(
                "unexpected host in {}",
                request.url
            )));
        }
        let path = url.path().to_string();
        let signed = request.body.as_deref().and_then(parse_signed);

        let served = match (&request.method, challenge_index(&path), &signed) {
            (&Method::POST, Some(index), Some(_)) => self.fetch_token(index).await,
            _ => None,
        };

        let mut state = self.state.lock();
        let answer = state.route(&request.method, &path, signed.as_ref(), served);
        Ok(state.finish(&request.method, path, signed, answer))
    }
}

impl CaState {
    fn route(
        &mut self,
        method: &Method,
        path: &str,
        signed: Option<&Signed>,
        served: Option<String>,
    ) -> Answer {
        if let Some(signed) = signed {
            if !self.outstanding.remove(&signed.nonce) {
                self.bad_nonces.push(signed.nonce.clone());
                return Answer::problem(400, "urn:acme:error:badNonce", "JWS has invalid anti-replay nonce");
            }
            if !signed.signature_valid {
                self.bad_signatures += 1;
                return Answer::problem(400, "urn:acme:error:malformed", "JWS signature is invalid");
            }
        }

        let challenge = challenge_index(path);
        match (method.as_str(), path, signed, challenge) {
            ("HEAD", "/directory", None, _) => Answer::empty(200),
            ("POST", "/acme/new-reg", Some(s), _) => self.new_reg(s),
            ("POST", "/acme/new-authz", Some(s), _) => self.new_authz(s),
            ("POST", "/acme/new-cert", Some(s), _) => self.new_cert(s),
            ("GET", "/acme/issuer-cert", None, _) => self.issuer_cert(),
            ("POST", _, Some(s), Some(index)) => self.activate(index, s, served),
            ("GET", _, None, Some(index)) => self.poll(index),
            _ => Answer::problem(404, "urn:acme:error:malformed", "unknown resource"),
        }
    }

    fn new_reg(&mut self, signed: &Signed) -> Answer {
        match self.script.registration_status {
            201 => {
                self.registered = true;
                Answer::json(201, json!({"id": 1, "contact": signed.payload["contact"]}))
            }
            409 => {
                self.registered = true;
                Answer::problem(409, "urn:acme:error:malformed", "Registration key is already in use")
            }
            status => Answer::problem(status, "urn:acme:error:serverInternal", "Error creating registration"),
        }
    }

    fn new_authz(&mut self, signed: &Signed) -> Answer {
        if !(self.script.account_known || self.registered) {
            return Answer::unauthorized("No registration exists matching provided key");
        }

        let domain = signed.payload["identifier"]["value"]
            .as_str()
            .unwrap_or_default()
            .to_string();
        let index = self.authorizations.len();
        let token = format!("token{}-{}", index, domain.replace('.', "_"));

        let body = json!({
            "identifier": {"type": "dns", "value": domain},
            "status": "pending",
            "challenges": [
                {
                    "type": "dns-01",
                    "uri": format!("{}/acme/challenge/dns/{}", CA_BASE, index),
                    "token": "dns-token"
                },
                {
                    "type": "http-01",
                    "uri": format!("{}/acme/challenge/{}", CA_BASE, index),
                    "token": token,
                    "status": "pending"
                }
            ]
        });

        self.authorizations.push(Authz {
            domain,
            token,
            activated: false,
            key_authorization_ok: false,
            polls: 0,
            valid: false,
        });
        Answer::json(201, body)
    }

    fn activate(&mut self, index: usize, signed: &Signed, served: Option<String>) -> Answer {
        let fetch_tokens = self.script.fetch_tokens;
        let Some(authz) = self.authorizations.get_mut(index) else {
            return Answer::problem(404, "urn:acme:error:malformed", "no such challenge");
        };

        let expected = format!("{}.{}", authz.token, signed.thumbprint);
        let submitted = signed.payload["keyAuthorization"].as_str() == Some(expected.as_str());
        let fetched = !fetch_tokens || served.as_deref() == Some(expected.as_str());

        authz.activated = true;
        authz.key_authorization_ok = submitted && fetched;
        Answer::json(202, challenge_json(index, authz, "pending"))
    }

    fn poll(&mut self, index: usize) -> Answer {
        let outcome = self.script.challenge_outcome;
        let Some(authz) = self.authorizations.get_mut(index) else {
            return Answer::problem(404, "urn:acme:error:malformed", "no such challenge");
        };
        authz.polls += 1;

        let decided = if authz.key_authorization_ok { "valid" } else { "invalid" };
        let status = if !authz.activated {
            "pending"
        } else {
            match outcome {
                ChallengeOutcome::Valid => decided,
                ChallengeOutcome::Invalid => "invalid",
                ChallengeOutcome::Pending => "pending",
                ChallengeOutcome::PendingThenValid(n) if authz.polls <= n => "pending",
                ChallengeOutcome::PendingThenValid(_) => decided,
            }
        };
        if status == "valid" {
            authz.valid = true;
        }

        let mut body = challenge_json(index, authz, status);
        if status == "invalid" {
            body["error"] = json!({
                "type": UNAUTHORIZED,
                "detail": format!("Invalid response from http://{}/.well-known/acme-challenge/{}", authz.domain, authz.token)
            });
        }
        Answer::json(202, body)
    }

    fn new_cert(&mut self, signed: &Signed) -> Answer {
        if self.script.unauthorized_certs > 0 {
            self.script.unauthorized_certs -= 1;
            for authz in &mut self.authorizations {
                authz.valid = false;
            }
            return Answer::unauthorized("Error creating new cert :: authorizations for these names not found or expired");
        }

        let Some(der) = signed.payload["csr"]
            .as_str()
            .and_then(|csr| URL_SAFE_NO_PAD.decode(csr).ok())
        else {
            return Answer::problem(400, "urn:acme:error:malformed", "Error parsing certificate request");
        };

        let domains = csr_names(&der);
        self.csr_domains.push(domains.clone());
        let all_valid = !domains.is_empty()
            && domains.iter().all(|d| {
                self.authorizations
                    .iter()
                    .any(|a| a.valid && &a.domain == d)
            });
        if !all_valid {
            return Answer::unauthorized("Error creating new cert :: authorizations for these names not found or expired");
        }

        let mut answer = Answer {
            status: 201,
            body: self.leaf_der.clone(),
            headers: vec![("content-type", "application/pkix-cert".to_string())],
        };
        if self.script.issuer_link {
            answer
                .headers
                .push(("link", format!("<{}/acme/issuer-cert>;rel=\"up\"", CA_BASE)));
        }
        answer
    }

    fn issuer_cert(&self) -> Answer {
        if self.script.issuer_status != 200 {
            return Answer::problem(self.script.issuer_status, "urn:acme:error:serverInternal", "unavailable");
        }
        Answer {
            status: 200,
            body: self.issuer_der.clone(),
            headers: vec![("content-type", "application/pkix-cert".to_string())],
        }
    }

    fn finish(
        &mut self,
        method: &Method,
        path: String,
        signed: Option<Signed>,
        answer: Answer,
    ) -> Reply {
        let mut headers = HeaderMap::new();
        for (name, value) in &answer.headers {
            headers.insert(*name, HeaderValue::from_str(value).unwrap());
        }

        let index = self.exchanges.len();
        let issued_nonce = if self.script.drop_nonce_on.contains(&index) {
            None
        } else {
            self.nonce_counter += 1;
            let nonce = format!("nonce-{}", self.nonce_counter);
            self.outstanding.insert(nonce.clone());
            headers.insert("replay-nonce", HeaderValue::from_str(&nonce).unwrap());
            Some(nonce)
        };

        let (signed_nonce, payload) = match signed {
            Some(s) => (Some(s.nonce), Some(s.payload)),
            None => (None, None),
        };
        self.exchanges.push(Exchange {
            method: method.to_string(),
            path,
            status: answer.status,
            signed_nonce,
            issued_nonce,
            payload,
        });

        Reply {
            status: answer.status,
            headers,
            body: Bytes::from(answer.body),
        }
    }
}

fn challenge_json(index: usize, authz: &Authz, status: &str) -> Value {
    json!({
        "type": "http-01",
        "uri": format!("{}/acme/challenge/{}", CA_BASE, index),
        "token": authz.token,
        "status": status
    })
}

fn challenge_index(path: &str) -> Option<usize> {
    path.strip_prefix("/acme/challenge/")?.parse().ok()
}

fn decode_json(segment: &str) -> Option<Value> {
    serde_json::from_slice(&URL_SAFE_NO_PAD.decode(segment).ok()?).ok()
}

fn parse_signed(body: &[u8]) -> Option<Signed> {
    let envelope: Value = serde_json::from_slice(body).ok()?;
    let protected_b64 = envelope["protected"].as_str()?;
    let payload_b64 = envelope["payload"].as_str()?;
    let protected = decode_json(protected_b64)?;
    let payload = decode_json(payload_b64)?;

    let jwk = &protected["jwk"];
    let canonical = format!(
        r#"{{"e":"{}","kty":"{}","n":"{}"}}"#,
        jwk["e"].as_str()?,
        jwk["kty"].as_str()?,
        jwk["n"].as_str()?
    );

    let signing_input = format!("{}.{}", protected_b64, payload_b64);
    let signature_valid = verify_rs256(
        jwk["n"].as_str()?,
        jwk["e"].as_str()?,
        envelope["signature"].as_str()?,
        signing_input.as_bytes(),
    );

    Some(Signed {
        nonce: protected["nonce"].as_str()?.to_string(),
        signature_valid,
        thumbprint: b64url(&getssl_crypto::sha256(canonical.as_bytes())),
        payload,
    })
}

fn verify_rs256(n: &str, e: &str, signature: &str, data: &[u8]) -> bool {
    let decode = |s: &str| URL_SAFE_NO_PAD.decode(s).ok();
    let (Some(n), Some(e), Some(signature)) = (decode(n), decode(e), decode(signature)) else {
        return false;
    };
    let Ok(key) = RsaPublicKey::new(BigUint::from_bytes_be(&n), BigUint::from_bytes_be(&e)) else {
        return false;
    };
    let Ok(signature) = Signature::try_from(signature.as_slice()) else {
        return false;
    };
    VerifyingKey::<Sha256>::new(key).verify(data, &signature).is_ok()
}

fn csr_names(der: &[u8]) -> Vec<String> {
    let Ok((_, csr)) = X509CertificationRequest::from_der(der) else {
        return Vec::new();
    };
    let mut names = Vec::new();
    if let Some(extensions) = csr.requested_extensions() {
        for extension in extensions {
            if let ParsedExtension::SubjectAlternativeName(san) = extension {
                for name in &san.general_names {
                    if let GeneralName::DNSName(dns) = name {
                        names.push(dns.to_string());
                    }
                }
            }
        }
    }
    names
}

fn self_signed_der(name: &str) -> Vec<u8> {
    let key = rcgen::KeyPair::generate().unwrap();
    let params = rcgen::CertificateParams::new(vec![name.to_string()]).unwrap();
    params.self_signed(&key).unwrap().der().to_vec()
}

// ============================================================================
// Harness helpers
// ============================================================================

/// A port that was free a moment ago
pub fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

/// Configuration pointing at the fake CA with fast polling
pub fn test_config(dir: &Path, domains: &[&str], port: u16) -> RunConfig {
    let mut config = RunConfig::new(domains.iter().map(|d| d.to_string()).collect());
    config.email = Some("admin@example.com".to_string());
    config.account_key = dir.join("letsencrypt.key");
    config.dest_dir = dir.join("certs");
    config.ca_url = CA_BASE.to_string();
    config.http_bind = format!("127.0.0.1:{}", port).parse().unwrap();
    config.account_key_bits = 2048;
    config.cert_key_bits = 2048;
    config.poll_interval = Duration::from_millis(10);
    config.max_polls = 5;
    config.served_grace = Duration::from_millis(200);
    config
}

/// Write a valid account key to the configured location
pub fn install_account_key(config: &RunConfig) {
    let pem = getssl_crypto::generate_rsa_key(2048).unwrap();
    std::fs::write(&config.account_key, pem).unwrap();
}
