//! ACME v1 certificate issuance over HTTP-01
//!
//! # Architecture
//!
//! - [`AcmeClient`] - Single-slot signed request client holding the nonce
//! - [`AuthorizationSequencer`] - Walks each domain through new-authz,
//!   activation and polling
//! - [`ChallengeManager`] / [`ChallengeResponder`] - Token registry and the
//!   embedded HTTP server that serves it
//! - [`CertificateIssuer`] - CSR submission and issuer chain retrieval
//! - [`CertificateStorage`] - Output files
//! - [`Orchestrator`] - The run state machine tying it all together
//!
//! # Challenge Flow
//!
//! 1. The account key is loaded, or created and later registered
//! 2. A nonce is fetched with `HEAD {CA}/directory`
//! 3. For each domain, in order, `new-authz` yields an HTTP-01 token
//! 4. [`ChallengeManager`] registers `token.thumbprint` for the responder
//! 5. The challenge is activated and the CA fetches
//!    `/.well-known/acme-challenge/<token>`
//! 6. The challenge URI is polled until it is `valid`
//! 7. Once every domain is valid, a CSR is posted to `new-cert`
//! 8. The leaf, its key and the issuer certificate are written

mod authz;
mod challenge;
mod client;
mod error;
mod issuer;
mod jws;
mod orchestrator;
mod responder;
mod storage;
mod transport;
mod types;

pub use authz::{
    AuthorizationReply, AuthorizationSequencer, DomainList, PendingChallenge, PollPolicy,
    DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL, DEFAULT_SERVED_GRACE,
};
pub use challenge::{ChallengeManager, ACME_CHALLENGE_PREFIX};
pub use client::{AcmeClient, CaEndpoints, LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING, REPLAY_NONCE};
pub use error::{AcmeError, RequestError, StorageError};
pub use issuer::{CertificateIssuer, CertificateReply, IssuedCertificate};
pub use jws::{b64url, build_signed_request, AccountKey, Jwk, SIGNED_CONTENT_TYPE};
pub use orchestrator::{GuardFlags, IssuedFiles, Orchestrator, RunState};
pub use responder::{ChallengeResponder, ChallengeServed};
pub use storage::{load_account_key, save_account_key, CertificateStorage, INTERMEDIATE_FILE};
pub use transport::{HttpRequest, HttpTransport, Reply, ReqwestTransport, TransportError};
pub use types::{
    up_link, Authorization, Challenge, ChallengeResponse, ChallengeStatus, NewAuthorization,
    NewCertificate, NewRegistration, Problem, HTTP01,
};
