//! Single-slot ACME client
//!
//! All traffic to the CA flows through [`AcmeClient`]. Each request method
//! takes `&mut self`, so at most one request is in flight; dropping a
//! request future cancels it. The client keeps exactly one nonce: it is
//! taken out of the slot when a signed request is built and the slot is
//! refilled from the `Replay-Nonce` header of whatever response arrives
//! next. A nonce is therefore never signed twice.

use serde::Serialize;
use tracing::{debug, trace, warn};

use super::error::{AcmeError, RequestError};
use super::jws::{build_signed_request, AccountKey};
use super::transport::{HttpRequest, HttpTransport, Reply};

/// Response header carrying the next anti-replay nonce
pub const REPLAY_NONCE: &str = "Replay-Nonce";

/// Let's Encrypt ACME v1 production endpoint
pub const LETSENCRYPT_PRODUCTION: &str = "https://acme-v01.api.letsencrypt.org";
/// Let's Encrypt ACME v1 staging endpoint
pub const LETSENCRYPT_STAGING: &str = "https://acme-staging.api.letsencrypt.org";

/// Resource URLs of an ACME v1 CA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaEndpoints {
    pub directory: String,
    pub new_reg: String,
    pub new_authz: String,
    pub new_cert: String,
}

impl CaEndpoints {
    /// Derive the well-known v1 resource paths from a CA base URL
    pub fn from_base(base: &str) -> Self {
        let base = base.trim_end_matches('/');
        Self {
            directory: format!("{}/directory", base),
            new_reg: format!("{}/acme/new-reg", base),
            new_authz: format!("{}/acme/new-authz", base),
            new_cert: format!("{}/acme/new-cert", base),
        }
    }
}

/// Client holding the transport, the account key and the nonce slot
pub struct AcmeClient {
    transport: Box<dyn HttpTransport>,
    endpoints: CaEndpoints,
    account: AccountKey,
    nonce: Option<String>,
}

impl AcmeClient {
    /// Create a client; no request is sent until the first call
    pub fn new(
        transport: Box<dyn HttpTransport>,
        endpoints: CaEndpoints,
        account: AccountKey,
    ) -> Self {
        Self {
            transport,
            endpoints,
            account,
            nonce: None,
        }
    }

    pub fn endpoints(&self) -> &CaEndpoints {
        &self.endpoints
    }

    pub fn account(&self) -> &AccountKey {
        &self.account
    }

    /// Nonce the next signed request will use, if one is held
    pub fn current_nonce(&self) -> Option<&str> {
        self.nonce.as_deref()
    }

    /// Fetch a fresh nonce with `HEAD {CA}/directory`
    pub async fn refresh_nonce(&mut self) -> Result<(), AcmeError> {
        let url = self.endpoints.directory.clone();
        debug!(url = %url, "Requesting nonce");

        let reply = self
            .send(HttpRequest::head(url))
            .await
            .map_err(|e| AcmeError::NoNonce(e.to_string()))?;

        if self.nonce.is_none() {
            return Err(AcmeError::NoNonce(format!(
                "directory responded with status {} but no {} header",
                reply.status, REPLAY_NONCE
            )));
        }
        Ok(())
    }

    /// Sign `payload` with the account key and POST it to `url`
    pub async fn post_signed<P: Serialize + ?Sized>(
        &mut self,
        url: &str,
        payload: &P,
    ) -> Result<Reply, RequestError> {
        let nonce = self.take_nonce().await?;
        trace!(url = %url, nonce = %nonce, "Signing request");

        let request = build_signed_request(&self.account, &nonce, url, payload)?;
        self.send(request).await
    }

    /// Unsigned GET
    pub async fn get(&mut self, url: &str) -> Result<Reply, RequestError> {
        self.send(HttpRequest::get(url)).await
    }

    /// Take the current nonce out of the slot, refilling it once if empty
    async fn take_nonce(&mut self) -> Result<String, RequestError> {
        if let Some(nonce) = self.nonce.take() {
            return Ok(nonce);
        }

        debug!("No nonce held, fetching a new one");
        let reply = self.send(HttpRequest::head(self.endpoints.directory.clone())).await?;
        self.nonce.take().ok_or_else(|| {
            RequestError::NoNonce(format!(
                "directory responded with status {} but no {} header",
                reply.status, REPLAY_NONCE
            ))
        })
    }

    async fn send(&mut self, request: HttpRequest) -> Result<Reply, RequestError> {
        let method = request.method.clone();
        let url = request.url.clone();

        let reply = self.transport.execute(request).await?;
        debug!(method = %method, url = %url, status = reply.status, "CA responded");

        match reply.header(REPLAY_NONCE) {
            Some(nonce) if !nonce.is_empty() => self.nonce = Some(nonce.to_string()),
            _ => {
                if !reply.is_success() {
                    warn!(url = %url, status = reply.status, "Response carried no nonce");
                }
            }
        }
        Ok(reply)
    }
}

impl std::fmt::Debug for AcmeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcmeClient")
            .field("endpoints", &self.endpoints)
            .field("account", &self.account)
            .field("has_nonce", &self.nonce.is_some())
            .finish()
    }
}
