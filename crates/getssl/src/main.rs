//! getssl - Main entry point
//!
//! Obtains a certificate for the given domains from an ACME v1 CA and
//! exits with a code identifying the step that failed.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use tracing::{error, info};

use getssl::config::{
    select_ca_url, DEFAULT_ACCOUNT_KEY, DEFAULT_ACCOUNT_KEY_BITS, DEFAULT_AGREEMENT,
    DEFAULT_CERT_KEY_BITS, DEFAULT_HTTP_PORT,
};
use getssl::acme::{DEFAULT_MAX_POLLS, DEFAULT_SERVED_GRACE};
use getssl::{Orchestrator, ReqwestTransport, RunConfig};

/// getssl - Obtain a certificate from an ACME v1 CA using HTTP-01
#[derive(Parser, Debug)]
#[command(name = "getssl")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Domain to certify; repeat for more names, the first is the primary
    #[arg(
        short = 'd',
        long = "domain",
        env = "GETSSL_DOMAINS",
        value_delimiter = ',',
        required = true
    )]
    domains: Vec<String>,

    /// Contact email used when registering the account
    #[arg(short = 'e', long = "email", env = "GETSSL_EMAIL")]
    email: Option<String>,

    /// Account key file, created if missing
    #[arg(short = 'k', long = "key", env = "GETSSL_ACCOUNT_KEY", default_value = DEFAULT_ACCOUNT_KEY)]
    account_key: PathBuf,

    /// Directory receiving the certificate files
    #[arg(short = 'o', long = "dest-dir", env = "GETSSL_DEST_DIR", default_value = ".")]
    dest_dir: PathBuf,

    /// Use the Let's Encrypt staging CA
    #[arg(short = 't', long = "test")]
    test: bool,

    /// CA base URL, overrides --test
    #[arg(long = "ca-url", env = "GETSSL_CA_URL")]
    ca_url: Option<String>,

    /// Subscriber agreement URL sent at registration
    #[arg(long = "agreement", default_value = DEFAULT_AGREEMENT)]
    agreement: String,

    /// Port of the HTTP-01 challenge responder
    #[arg(
        long = "http-port",
        env = "GETSSL_HTTP_PORT",
        default_value_t = DEFAULT_HTTP_PORT,
        value_parser = clap::value_parser!(u16).range(1..)
    )]
    http_port: u16,

    /// Size of a newly created account key
    #[arg(long = "account-key-bits", default_value_t = DEFAULT_ACCOUNT_KEY_BITS)]
    account_key_bits: usize,

    /// Size of the certificate key
    #[arg(long = "cert-key-bits", default_value_t = DEFAULT_CERT_KEY_BITS)]
    cert_key_bits: usize,

    /// Seconds between challenge polls
    #[arg(long = "poll-interval-secs", default_value_t = 5)]
    poll_interval_secs: u64,

    /// Polls before a pending challenge is given up
    #[arg(long = "max-polls", default_value_t = DEFAULT_MAX_POLLS)]
    max_polls: u32,

    /// Enable verbose logging (debug level)
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,

    /// Log output format
    #[arg(long = "log-format", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

impl Cli {
    fn into_config(self) -> RunConfig {
        RunConfig {
            ca_url: select_ca_url(self.ca_url.as_deref(), self.test),
            domains: self.domains,
            email: self.email.filter(|e| !e.trim().is_empty()),
            account_key: self.account_key,
            dest_dir: self.dest_dir,
            agreement: self.agreement,
            http_bind: SocketAddr::from(([0, 0, 0, 0], self.http_port)),
            account_key_bits: self.account_key_bits,
            cert_key_bits: self.cert_key_bits,
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            max_polls: self.max_polls,
            served_grace: DEFAULT_SERVED_GRACE,
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_format);

    let config = match cli.into_config().validated() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("getssl: {}", e);
            return ExitCode::from(1);
        }
    };

    match run(config) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("getssl: {:#}", e);
            ExitCode::from(1)
        }
    }
}

/// Execute one issuance run on a single-threaded runtime
fn run(config: RunConfig) -> Result<ExitCode> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    let transport = Arc::new(ReqwestTransport::new().context("Failed to create HTTP client")?);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        domains = ?config.domains,
        ca = %config.ca_url,
        "Starting getssl"
    );

    let mut orchestrator = Orchestrator::new(config, transport)
        .context("At least one domain is required")?;

    let code = match runtime.block_on(orchestrator.run()) {
        Ok(files) => {
            info!(certificate = %files.cert_path.display(), "Done");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(state = %orchestrator.state(), error = %e, "Run failed");
            eprintln!("getssl: {}", e);
            ExitCode::from(exit_status(e.exit_code()))
        }
    };
    Ok(code)
}

fn exit_status(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}

fn init_logging(verbose: bool, format: LogFormat) {
    let log_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
