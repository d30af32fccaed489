//! Authorization sequencing
//!
//! Domains are authorized strictly one at a time and in input order:
//! request an authorization, publish the key authorization through the
//! responder, activate the challenge, then poll until the CA decides.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::challenge::ChallengeManager;
use super::client::AcmeClient;
use super::error::{AcmeError, RequestError};
use super::responder::{ChallengeResponder, ChallengeServed};
use super::types::{Authorization, Challenge, ChallengeResponse, ChallengeStatus, NewAuthorization, Problem};

/// Default delay between challenge polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);
/// Default number of polls before a pending challenge is given up
pub const DEFAULT_MAX_POLLS: u32 = 60;
/// Default time to wait for the CA to fetch the token before polling
pub const DEFAULT_SERVED_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// Domain list
// ============================================================================

/// Ordered, non-empty list of domains with a cursor
///
/// The list itself is never modified; progress is the cursor position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainList {
    domains: Vec<String>,
    cursor: usize,
}

impl DomainList {
    /// Returns `None` for an empty list
    pub fn new(domains: Vec<String>) -> Option<Self> {
        if domains.is_empty() {
            return None;
        }
        Some(Self { domains, cursor: 0 })
    }

    /// First domain: certificate CN and output file prefix
    pub fn primary(&self) -> &str {
        &self.domains[0]
    }

    pub fn as_slice(&self) -> &[String] {
        &self.domains
    }

    pub fn len(&self) -> usize {
        self.domains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.domains.is_empty()
    }

    /// Domain under the cursor, `None` once every domain is done
    pub fn current(&self) -> Option<&str> {
        self.domains.get(self.cursor).map(String::as_str)
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Move past the current domain
    pub fn advance(&mut self) {
        if self.cursor < self.domains.len() {
            self.cursor += 1;
        }
    }

    /// Start over from the primary domain
    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    pub fn is_exhausted(&self) -> bool {
        self.cursor >= self.domains.len()
    }
}

// ============================================================================
// Sequencer
// ============================================================================

/// Timing of the observe and poll steps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay between polls of a pending challenge
    pub interval: Duration,
    /// Polls before giving up on a pending challenge
    pub max_polls: u32,
    /// How long to wait for the CA to fetch the token before polling
    pub served_grace: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            served_grace: DEFAULT_SERVED_GRACE,
        }
    }
}

/// HTTP-01 challenge handed out by `new-authz`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingChallenge {
    pub domain: String,
    pub token: String,
    pub uri: String,
}

/// Outcome of a `new-authz` request
#[derive(Debug, Clone)]
pub enum AuthorizationReply {
    /// The CA offered an HTTP-01 challenge
    Challenge(PendingChallenge),
    /// The account is not (yet) allowed to request authorizations
    Unauthorized(Problem),
}

/// Walks domains through the HTTP-01 flow
#[derive(Debug)]
pub struct AuthorizationSequencer {
    bind_addr: SocketAddr,
    policy: PollPolicy,
    challenges: ChallengeManager,
    responder: Option<ChallengeResponder>,
    served_tx: mpsc::UnboundedSender<ChallengeServed>,
    served_rx: mpsc::UnboundedReceiver<ChallengeServed>,
}

impl AuthorizationSequencer {
    /// Sequencer whose responder will bind `bind_addr` on first use
    pub fn new(bind_addr: SocketAddr, policy: PollPolicy) -> Self {
        let (served_tx, served_rx) = mpsc::unbounded_channel();
        Self {
            bind_addr,
            policy,
            challenges: ChallengeManager::new(),
            responder: None,
            served_tx,
            served_rx,
        }
    }

    /// POST `new-authz` for `domain` and pick out its HTTP-01 challenge
    pub async fn request_authorization(
        &self,
        client: &mut AcmeClient,
        domain: &str,
    ) -> Result<AuthorizationReply, AcmeError> {
        info!(domain = %domain, "Requesting authorization");

        let no_challenge = |reason: String| AcmeError::NoHttp01Challenge {
            domain: domain.to_string(),
            reason,
        };

        let url = client.endpoints().new_authz.clone();
        let reply = client
            .post_signed(&url, &NewAuthorization::dns(domain))
            .await
            .map_err(|e| e.into_fatal(no_challenge))?;

        if let Some(problem) = Problem::from_body(&reply.body) {
            if problem.is_unauthorized() {
                warn!(domain = %domain, problem = %problem, "Authorization refused as unauthorized");
                return Ok(AuthorizationReply::Unauthorized(problem));
            }
            return Err(no_challenge(problem.to_string()));
        }
        if !reply.is_success() {
            return Err(no_challenge(format!("unexpected status {}", reply.status)));
        }

        let authorization: Authorization = serde_json::from_slice(&reply.body)
            .map_err(|e| no_challenge(format!("malformed authorization: {}", e)))?;

        let Some(Challenge {
            uri: Some(uri),
            token: Some(token),
            ..
        }) = authorization.http01()
        else {
            return Err(no_challenge("authorization offers no http-01 challenge".to_string()));
        };

        if !is_valid_token(token) {
            return Err(no_challenge(format!("malformed challenge token '{}'", token)));
        }

        debug!(domain = %domain, token = %token, uri = %uri, "Received HTTP-01 challenge");
        Ok(AuthorizationReply::Challenge(PendingChallenge {
            domain: domain.to_string(),
            token: token.clone(),
            uri: uri.clone(),
        }))
    }

    /// Serve, activate and poll `challenge` until it is valid
    pub async fn complete(
        &mut self,
        client: &mut AcmeClient,
        challenge: &PendingChallenge,
    ) -> Result<(), AcmeError> {
        self.ensure_responder().await?;

        let key_authorization = client.account().key_authorization(&challenge.token);
        self.challenges
            .add_challenge(&challenge.token, &key_authorization);

        let result = self.activate_and_poll(client, challenge, &key_authorization).await;
        self.challenges.remove_challenge(&challenge.token);
        result
    }

    async fn activate_and_poll(
        &mut self,
        client: &mut AcmeClient,
        challenge: &PendingChallenge,
        key_authorization: &str,
    ) -> Result<(), AcmeError> {
        debug!(domain = %challenge.domain, uri = %challenge.uri, "Activating challenge");
        match client
            .post_signed(&challenge.uri, &ChallengeResponse::new(key_authorization))
            .await
        {
            Ok(reply) if reply.is_success() => {}
            Ok(reply) => {
                let problem = Problem::from_body(&reply.body).unwrap_or_default();
                warn!(
                    domain = %challenge.domain,
                    status = reply.status,
                    problem = %problem,
                    "Challenge activation was not accepted"
                );
            }
            Err(RequestError::NoNonce(reason)) => return Err(AcmeError::NoNonce(reason)),
            Err(e) => {
                warn!(domain = %challenge.domain, error = %e, "Challenge activation failed");
            }
        }

        self.await_served(&challenge.token).await;
        self.poll(client, challenge).await
    }

    async fn ensure_responder(&mut self) -> Result<(), AcmeError> {
        if self.responder.is_some() {
            return Ok(());
        }

        let responder =
            ChallengeResponder::bind(self.bind_addr, self.challenges.clone(), self.served_tx.clone())
                .await
                .map_err(|source| AcmeError::ResponderBind {
                    addr: self.bind_addr,
                    source,
                })?;
        self.responder = Some(responder);
        Ok(())
    }

    /// Wait up to the grace period for the responder to report `token`
    async fn await_served(&mut self, token: &str) {
        let rx = &mut self.served_rx;
        let wait = async {
            while let Some(event) = rx.recv().await {
                if event.token == token {
                    return Some(event);
                }
            }
            None
        };

        match tokio::time::timeout(self.policy.served_grace, wait).await {
            Ok(Some(event)) => {
                info!(token = %token, peer = %event.peer, "CA fetched challenge token");
            }
            Ok(None) => {}
            Err(_) => {
                debug!(token = %token, "No challenge fetch observed yet, polling anyway");
            }
        }
    }

    async fn poll(
        &self,
        client: &mut AcmeClient,
        challenge: &PendingChallenge,
    ) -> Result<(), AcmeError> {
        let unreadable = |reason: String| AcmeError::ChallengeStatus {
            domain: challenge.domain.clone(),
            reason,
        };

        for attempt in 1..=self.policy.max_polls {
            let reply = client
                .get(&challenge.uri)
                .await
                .map_err(|e| e.into_fatal(unreadable))?;

            if !reply.is_success() {
                let problem = Problem::from_body(&reply.body).unwrap_or_default();
                return Err(unreadable(format!("status {} {}", reply.status, problem)));
            }

            let state: Challenge = serde_json::from_slice(&reply.body)
                .map_err(|e| unreadable(format!("malformed challenge: {}", e)))?;

            match state.status {
                Some(ChallengeStatus::Valid) => {
                    info!(domain = %challenge.domain, "Challenge is valid");
                    return Ok(());
                }
                Some(ChallengeStatus::Pending) => {
                    debug!(
                        domain = %challenge.domain,
                        attempt,
                        max = self.policy.max_polls,
                        "Challenge still pending"
                    );
                    if attempt < self.policy.max_polls {
                        tokio::time::sleep(self.policy.interval).await;
                    }
                }
                Some(status) => {
                    let detail = match state.error {
                        Some(problem) => problem.to_string(),
                        None => format!("challenge status is {}", status),
                    };
                    return Err(AcmeError::ChallengeInvalid {
                        domain: challenge.domain.clone(),
                        detail,
                    });
                }
                None => return Err(unreadable("response has no status".to_string())),
            }
        }

        Err(AcmeError::ChallengeTimeout {
            domain: challenge.domain.clone(),
            attempts: self.policy.max_polls,
        })
    }
}

/// Tokens are base64url; anything else cannot be served as a path segment
fn is_valid_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}
