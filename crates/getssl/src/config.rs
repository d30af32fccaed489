//! Run configuration
//!
//! [`RunConfig`] is everything one issuance run needs. The binary builds it
//! from command line arguments and environment variables; tests build it
//! directly.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;
use validator::{Validate, ValidationError};

use crate::acme::{
    CaEndpoints, PollPolicy, DEFAULT_MAX_POLLS, DEFAULT_POLL_INTERVAL, DEFAULT_SERVED_GRACE,
    LETSENCRYPT_PRODUCTION, LETSENCRYPT_STAGING,
};

/// Subscriber agreement sent with the registration
pub const DEFAULT_AGREEMENT: &str = "https://letsencrypt.org/documents/LE-SA-v1.0.1-July-27-2015.pdf";

/// Default account key location
pub const DEFAULT_ACCOUNT_KEY: &str = "letsencrypt.key";

/// Default size of a newly generated account key
pub const DEFAULT_ACCOUNT_KEY_BITS: usize = 4096;

/// Default size of the certificate key
pub const DEFAULT_CERT_KEY_BITS: usize = 2048;

/// Default port of the HTTP-01 responder
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Validation(#[from] validator::ValidationErrors),
}

/// Inputs of one issuance run
#[derive(Debug, Clone, Validate)]
pub struct RunConfig {
    /// Domains to certify; the first is the primary domain
    #[validate(
        length(min = 1, message = "At least one domain is required"),
        custom(function = "validate_domains")
    )]
    pub domains: Vec<String>,

    /// Registration contact, needed only when the CA asks for registration
    #[validate(email(message = "Invalid email address"))]
    pub email: Option<String>,

    /// Account key file, created if missing
    pub account_key: PathBuf,

    /// Directory receiving the key and certificates
    pub dest_dir: PathBuf,

    /// CA base URL
    #[validate(url(message = "Invalid CA URL"))]
    pub ca_url: String,

    /// Subscriber agreement URL
    #[validate(url(message = "Invalid agreement URL"))]
    pub agreement: String,

    /// Address the HTTP-01 responder binds
    pub http_bind: SocketAddr,

    #[validate(range(min = 2048, max = 8192, message = "Key size must be between 2048 and 8192 bits"))]
    pub account_key_bits: usize,

    #[validate(range(min = 2048, max = 8192, message = "Key size must be between 2048 and 8192 bits"))]
    pub cert_key_bits: usize,

    /// Delay between challenge polls
    pub poll_interval: Duration,

    #[validate(range(min = 1, message = "At least one poll is required"))]
    pub max_polls: u32,

    /// Time to wait for the CA to fetch the token before polling
    pub served_grace: Duration,
}

impl RunConfig {
    /// Production defaults for `domains`
    pub fn new(domains: Vec<String>) -> Self {
        Self {
            domains,
            email: None,
            account_key: PathBuf::from(DEFAULT_ACCOUNT_KEY),
            dest_dir: PathBuf::from("."),
            ca_url: LETSENCRYPT_PRODUCTION.to_string(),
            agreement: DEFAULT_AGREEMENT.to_string(),
            http_bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_HTTP_PORT)),
            account_key_bits: DEFAULT_ACCOUNT_KEY_BITS,
            cert_key_bits: DEFAULT_CERT_KEY_BITS,
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_polls: DEFAULT_MAX_POLLS,
            served_grace: DEFAULT_SERVED_GRACE,
        }
    }

    /// Validate and return the configuration
    pub fn validated(self) -> Result<Self, ConfigError> {
        Validate::validate(&self)?;
        Ok(self)
    }

    /// Contact email for registration; a blank value counts as absent
    pub fn contact_email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }

    pub fn endpoints(&self) -> CaEndpoints {
        CaEndpoints::from_base(&self.ca_url)
    }

    pub fn poll_policy(&self) -> PollPolicy {
        PollPolicy {
            interval: self.poll_interval,
            max_polls: self.max_polls,
            served_grace: self.served_grace,
        }
    }
}

/// CA base URL: an explicit override wins, then staging or production
pub fn select_ca_url(override_url: Option<&str>, staging: bool) -> String {
    match override_url {
        Some(url) => url.to_string(),
        None if staging => LETSENCRYPT_STAGING.to_string(),
        None => LETSENCRYPT_PRODUCTION.to_string(),
    }
}

/// Split a comma separated domain list, dropping empty entries
pub fn parse_domain_list(input: &str) -> Vec<String> {
    input
        .split(',')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(str::to_string)
        .collect()
}

fn validate_domains(domains: &[String]) -> Result<(), ValidationError> {
    for domain in domains {
        if domain.is_empty()
            || domain.contains('/')
            || domain.chars().any(char::is_whitespace)
        {
            let mut err = ValidationError::new("invalid_domain");
            err.message = Some(format!("Invalid domain name '{}'", domain).into());
            return Err(err);
        }
    }
    Ok(())
}
