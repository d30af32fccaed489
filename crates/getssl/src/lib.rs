//! getssl - obtain a TLS certificate from an ACME v1 CA
//!
//! One run takes a list of domains, proves control of each one through the
//! HTTP-01 challenge served by an embedded responder, and writes:
//!
//! - `{primary}_key.pem` - the certificate private key
//! - `{primary}_crt.pem` - the certificate covering every domain
//! - `intermediate_crt.pem` - the issuer certificate
//!
//! ```no_run
//! use std::sync::Arc;
//! use getssl::{Orchestrator, ReqwestTransport, RunConfig};
//!
//! # async fn issue() -> anyhow::Result<()> {
//! let mut config = RunConfig::new(vec!["example.com".into(), "www.example.com".into()]);
//! config.email = Some("admin@example.com".into());
//!
//! let transport = Arc::new(ReqwestTransport::new()?);
//! let mut orchestrator = Orchestrator::new(config.validated()?, transport)
//!     .ok_or_else(|| anyhow::anyhow!("no domains"))?;
//! let files = orchestrator.run().await?;
//! println!("{}", files.cert_path.display());
//! # Ok(())
//! # }
//! ```

pub mod acme;
pub mod config;

pub use acme::{
    AcmeError, HttpTransport, IssuedFiles, Orchestrator, ReqwestTransport, RunState,
};
pub use config::{ConfigError, RunConfig};
