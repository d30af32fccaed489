//! ACME error types
//!
//! Every fatal condition of a run has its own [`AcmeError`] variant and
//! maps to a distinct process exit code via [`AcmeError::exit_code`].

use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

use super::transport::TransportError;

/// Fatal errors that terminate an issuance run
#[derive(Debug, Error)]
pub enum AcmeError {
    /// Account key could not be generated or written
    #[error("Cannot write private key for Let's Encrypt to {path}: {reason}")]
    AccountKeyWrite { path: PathBuf, reason: String },

    /// Existing account key is unreadable or not a valid RSA key
    #[error("Cannot load private key for Let's Encrypt from {path}: {reason}")]
    AccountKeyInvalid { path: PathBuf, reason: String },

    /// CA did not hand out a Replay-Nonce
    #[error("No nonce received from CA: {0}")]
    NoNonce(String),

    /// HTTP-01 responder could not listen
    #[error("Cannot listen on {addr}: {source}")]
    ResponderBind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// new-authz did not yield an HTTP-01 challenge
    #[error("No http-01 challenge found for domain '{domain}': {reason}")]
    NoHttp01Challenge { domain: String, reason: String },

    /// Challenge status could not be fetched or parsed
    #[error("Cannot read challenge status for domain '{domain}': {reason}")]
    ChallengeStatus { domain: String, reason: String },

    /// CA marked the challenge invalid
    #[error("Challenge for domain '{domain}' failed: {detail}")]
    ChallengeInvalid { domain: String, detail: String },

    /// Challenge stayed pending for every allowed poll
    #[error("Challenge for domain '{domain}' still pending after {attempts} polls")]
    ChallengeTimeout { domain: String, attempts: u32 },

    /// new-cert failed and no corrective action is left
    #[error("Certificate request failed: {0}")]
    CertificateRequest(String),

    /// Certificate key could not be generated
    #[error("Cannot create certificate private key: {0}")]
    CertificateKey(String),

    /// Certificate key could not be written
    #[error("Cannot write certificate private key to {path}: {source}")]
    CertificateKeyWrite {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// Leaf certificate could not be written
    #[error("Cannot write certificate to {path}: {source}")]
    CertificateWrite {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// new-cert response carried no `Link: <..>;rel="up"`
    #[error("No issuer link found in certificate response")]
    NoIssuerLink,

    /// Issuer certificate could not be downloaded
    #[error("Cannot fetch intermediate certificate from {url}: {reason}")]
    IntermediateFetch { url: String, reason: String },

    /// Issuer certificate could not be written
    #[error("Cannot write intermediate certificate to {path}: {source}")]
    IntermediateWrite {
        path: PathBuf,
        #[source]
        source: StorageError,
    },

    /// Registration is needed but no contact email was configured
    #[error("An email address is required to register with the CA")]
    MissingEmail,
}

impl AcmeError {
    /// Process exit code for this failure
    pub fn exit_code(&self) -> i32 {
        match self {
            AcmeError::AccountKeyWrite { .. } => 2,
            AcmeError::AccountKeyInvalid { .. } => 3,
            AcmeError::NoNonce(_) => 4,
            AcmeError::ResponderBind { .. } => 5,
            AcmeError::NoHttp01Challenge { .. } => 6,
            AcmeError::ChallengeStatus { .. } => 7,
            AcmeError::ChallengeInvalid { .. } | AcmeError::ChallengeTimeout { .. } => 8,
            AcmeError::CertificateRequest(_) => 9,
            AcmeError::CertificateKey(_) | AcmeError::CertificateKeyWrite { .. } => 10,
            AcmeError::CertificateWrite { .. } => 11,
            AcmeError::NoIssuerLink => 12,
            AcmeError::IntermediateFetch { .. } => 13,
            AcmeError::IntermediateWrite { .. } => 14,
            AcmeError::MissingEmail => 15,
        }
    }
}

/// Errors from a single request issued through the ACME client
#[derive(Debug, Error)]
pub enum RequestError {
    /// No nonce available to sign with
    #[error("No nonce available: {0}")]
    NoNonce(String),

    /// Transport-level failure
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Payload could not be serialized or signed
    #[error("Failed to sign request: {0}")]
    Signing(String),
}

impl RequestError {
    /// Turn a request failure into the fatal error of the calling step
    ///
    /// A missing nonce is always [`AcmeError::NoNonce`]; everything else is
    /// described by `step`.
    pub fn into_fatal(self, step: impl FnOnce(String) -> AcmeError) -> AcmeError {
        match self {
            RequestError::NoNonce(reason) => AcmeError::NoNonce(reason),
            other => step(other.to_string()),
        }
    }
}

/// Errors specific to key and certificate file operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// IO error during file operations
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// File content is not valid UTF-8 text
    #[error("File is not valid PEM text: {path}")]
    NotText { path: String },
}
