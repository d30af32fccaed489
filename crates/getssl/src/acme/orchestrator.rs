//! Issuance run state machine
//!
//! ```text
//! Init -> Nonce -> [Register] -> AuthStart -> Challenge(0..n) -> CertRequest
//!                      ^             ^                               |
//!                      |             +-------- unauthorized (once) --+
//!                      +-- unauthorized on new-authz (once)
//! CertRequest -> IntermediateFetch -> Done
//! ```
//!
//! Two guards make the corrective transitions fire at most once per run: a
//! second `unauthorized` after registration or after re-authorization is
//! fatal.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use tracing::{debug, info, warn};

use getssl_crypto::{generate_rsa_key, validate_rsa_key};

use super::authz::{AuthorizationReply, AuthorizationSequencer, DomainList};
use super::client::AcmeClient;
use super::error::{AcmeError, RequestError};
use super::issuer::{CertificateIssuer, CertificateReply, IssuedCertificate};
use super::jws::AccountKey;
use super::storage::{self, CertificateStorage};
use super::transport::HttpTransport;
use super::types::{NewRegistration, Problem};
use crate::config::RunConfig;

/// Position of a run in the issuance flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Init,
    Nonce,
    Register,
    AuthStart,
    /// Authorizing the domain at this index
    Challenge(usize),
    CertRequest,
    IntermediateFetch,
    Done,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Init => f.write_str("init"),
            RunState::Nonce => f.write_str("nonce"),
            RunState::Register => f.write_str("register"),
            RunState::AuthStart => f.write_str("auth-start"),
            RunState::Challenge(index) => write!(f, "challenge[{}]", index),
            RunState::CertRequest => f.write_str("cert-request"),
            RunState::IntermediateFetch => f.write_str("intermediate-fetch"),
            RunState::Done => f.write_str("done"),
        }
    }
}

/// Corrective transitions already spent in this run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct GuardFlags {
    /// Registration was attempted
    pub registered: bool,
    /// The domain list was re-authorized after an unauthorized `new-cert`
    pub authorized: bool,
}

/// Files produced by a successful run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedFiles {
    pub key_path: PathBuf,
    pub cert_path: PathBuf,
    pub intermediate_path: PathBuf,
}

/// Drives one issuance run from account key to intermediate certificate
pub struct Orchestrator {
    config: RunConfig,
    transport: Arc<dyn HttpTransport>,
    state: RunState,
    guards: GuardFlags,
    domains: DomainList,
    sequencer: AuthorizationSequencer,
    issuer: CertificateIssuer,
}

impl Orchestrator {
    /// Create an orchestrator; returns `None` if `config` lists no domains
    pub fn new(config: RunConfig, transport: Arc<dyn HttpTransport>) -> Option<Self> {
        let domains = DomainList::new(config.domains.clone())?;
        let sequencer = AuthorizationSequencer::new(config.http_bind, config.poll_policy());
        let issuer = CertificateIssuer::new(CertificateStorage::new(&config.dest_dir));

        Some(Self {
            config,
            transport,
            state: RunState::Init,
            guards: GuardFlags::default(),
            domains,
            sequencer,
            issuer,
        })
    }

    /// Current position; after a failed run, the state that failed
    pub fn state(&self) -> RunState {
        self.state
    }

    pub fn guards(&self) -> GuardFlags {
        self.guards
    }

    pub fn domains(&self) -> &DomainList {
        &self.domains
    }

    /// Run the whole flow
    ///
    /// Output files are written only after the certificate was issued,
    /// which in turn requires every domain to be authorized.
    pub async fn run(&mut self) -> Result<IssuedFiles, AcmeError> {
        self.guards = GuardFlags::default();
        self.domains.reset();
        self.enter(RunState::Init);

        let (account_pem, fresh_account) = self.ensure_account_key()?;
        let account = AccountKey::from_pem(account_pem).map_err(|e| AcmeError::AccountKeyInvalid {
            path: self.config.account_key.clone(),
            reason: e.to_string(),
        })?;
        info!(thumbprint = %account.thumbprint(), "Using account key");

        debug!(bits = self.config.cert_key_bits, "Generating certificate key");
        let cert_key = generate_rsa_key(self.config.cert_key_bits)
            .map_err(|e| AcmeError::CertificateKey(e.to_string()))?;

        let mut client = AcmeClient::new(
            Box::new(self.transport.clone()),
            self.config.endpoints(),
            account,
        );

        self.enter(RunState::Nonce);
        client.refresh_nonce().await?;

        if fresh_account {
            self.register(&mut client).await?;
        }

        let issued = self.issue(&mut client, &cert_key).await?;

        let (key_path, cert_path) =
            self.issuer
                .write_certificate(self.domains.primary(), &cert_key, &issued)?;

        self.enter(RunState::IntermediateFetch);
        let intermediate_path = self
            .issuer
            .fetch_intermediate(&mut client, &issued.issuer_url)
            .await?;

        self.enter(RunState::Done);
        info!(
            certificate = %cert_path.display(),
            key = %key_path.display(),
            intermediate = %intermediate_path.display(),
            "Certificate issued"
        );

        Ok(IssuedFiles {
            key_path,
            cert_path,
            intermediate_path,
        })
    }

    /// Load the account key, creating it when missing
    ///
    /// Returns the PEM and whether it was just created.
    fn ensure_account_key(&self) -> Result<(String, bool), AcmeError> {
        let path = &self.config.account_key;

        let stored = storage::load_account_key(path).map_err(|e| AcmeError::AccountKeyInvalid {
            path: path.clone(),
            reason: e.to_string(),
        })?;

        if let Some(pem) = stored {
            if !validate_rsa_key(&pem) {
                return Err(AcmeError::AccountKeyInvalid {
                    path: path.clone(),
                    reason: "not a valid RSA private key".to_string(),
                });
            }
            debug!(path = %path.display(), "Loaded existing account key");
            return Ok((pem, false));
        }

        // A new key always needs a registration, which needs a contact
        if self.config.contact_email().is_none() {
            return Err(AcmeError::MissingEmail);
        }

        info!(
            path = %path.display(),
            bits = self.config.account_key_bits,
            "Creating account key"
        );
        let key_write = |reason: String| AcmeError::AccountKeyWrite {
            path: path.clone(),
            reason,
        };
        let pem = generate_rsa_key(self.config.account_key_bits)
            .map_err(|e| key_write(e.to_string()))?;
        storage::save_account_key(path, &pem).map_err(|e| key_write(e.to_string()))?;

        Ok((pem, true))
    }

    /// POST `new-reg` once per run
    ///
    /// 201 and 409 (already registered) are success. Any other failure is
    /// logged and the run goes on; a later `unauthorized` is then fatal.
    async fn register(&mut self, client: &mut AcmeClient) -> Result<(), AcmeError> {
        self.enter(RunState::Register);
        self.guards.registered = true;

        let Some(email) = self.config.contact_email() else {
            return Err(AcmeError::MissingEmail);
        };
        info!(email = %email, "Registering account");

        let url = client.endpoints().new_reg.clone();
        let payload = NewRegistration::new(email, &self.config.agreement);
        match client.post_signed(&url, &payload).await {
            Ok(reply) if reply.status == 201 => info!("Account registered"),
            Ok(reply) if reply.status == 409 => info!("Account already registered"),
            Ok(reply) => {
                let problem = Problem::from_body(&reply.body).unwrap_or_default();
                warn!(status = reply.status, problem = %problem, "Registration failed");
            }
            Err(RequestError::NoNonce(reason)) => return Err(AcmeError::NoNonce(reason)),
            Err(e) => warn!(error = %e, "Registration request failed"),
        }
        Ok(())
    }

    /// Authorize every domain, request the certificate, re-authorize once
    async fn issue(
        &mut self,
        client: &mut AcmeClient,
        cert_key: &str,
    ) -> Result<IssuedCertificate, AcmeError> {
        loop {
            self.authorize_domains(client).await?;

            self.enter(RunState::CertRequest);
            let reply = self
                .issuer
                .request_certificate(client, cert_key, self.domains.as_slice())
                .await?;

            match reply {
                CertificateReply::Issued(issued) => return Ok(issued),
                CertificateReply::Unauthorized(problem) if !self.guards.authorized => {
                    warn!(problem = %problem, "Certificate refused, authorizing domains again");
                    self.guards.authorized = true;
                }
                CertificateReply::Unauthorized(problem) => {
                    return Err(AcmeError::CertificateRequest(format!(
                        "still unauthorized after re-authorization: {}",
                        problem
                    )));
                }
            }
        }
    }

    /// Authorize the domains in list order
    async fn authorize_domains(&mut self, client: &mut AcmeClient) -> Result<(), AcmeError> {
        self.enter(RunState::AuthStart);
        self.domains.reset();

        while let Some(domain) = self.domains.current().map(str::to_string) {
            self.enter(RunState::Challenge(self.domains.cursor()));

            let challenge = match self.sequencer.request_authorization(client, &domain).await? {
                AuthorizationReply::Challenge(challenge) => challenge,
                AuthorizationReply::Unauthorized(problem) if !self.guards.registered => {
                    info!(problem = %problem, "CA does not know this account, registering");
                    self.register(client).await?;
                    continue;
                }
                AuthorizationReply::Unauthorized(problem) => {
                    return Err(AcmeError::NoHttp01Challenge {
                        domain,
                        reason: format!("unauthorized after registration: {}", problem),
                    });
                }
            };

            self.sequencer.complete(client, &challenge).await?;
            self.domains.advance();
        }
        Ok(())
    }

    fn enter(&mut self, state: RunState) {
        debug!(from = %self.state, to = %state, "State transition");
        self.state = state;
    }
}

impl fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("guards", &self.guards)
            .field("domains", &self.domains)
            .finish()
    }
}
