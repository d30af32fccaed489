//! Key and certificate files
//!
//! # Layout
//!
//! ```text
//! letsencrypt.key            # ACME account key (0600), path configurable
//! dest/
//! ├── example.com_key.pem    # Certificate private key (0600)
//! ├── example.com_crt.pem    # Leaf certificate
//! └── intermediate_crt.pem   # Issuer certificate
//! ```

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info, trace};

use super::error::StorageError;

/// File name of the issuer certificate
pub const INTERMEDIATE_FILE: &str = "intermediate_crt.pem";

/// Load the account key at `path`
///
/// Returns `Ok(None)` when the file does not exist.
pub fn load_account_key(path: &Path) -> Result<Option<String>, StorageError> {
    if !path.exists() {
        trace!(path = %path.display(), "No stored account key found");
        return Ok(None);
    }

    let bytes = fs::read(path)?;
    let pem = String::from_utf8(bytes).map_err(|_| StorageError::NotText {
        path: path.display().to_string(),
    })?;

    debug!(path = %path.display(), "Loaded account key");
    Ok(Some(pem))
}

/// Persist the account key at `path` with owner-only permissions
pub fn save_account_key(path: &Path, pem: &str) -> Result<(), StorageError> {
    write_private(path, pem)?;
    info!(path = %path.display(), "Saved account key");
    Ok(())
}

/// Output files for one issuance run
#[derive(Debug, Clone)]
pub struct CertificateStorage {
    /// Destination directory
    dest_dir: PathBuf,
}

impl CertificateStorage {
    /// Storage writing into `dest_dir`; the directory is created on first write
    pub fn new(dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            dest_dir: dest_dir.into(),
        }
    }

    /// `{primary}_key.pem`
    pub fn key_path(&self, primary_domain: &str) -> PathBuf {
        self.dest_dir.join(format!("{}_key.pem", primary_domain))
    }

    /// `{primary}_crt.pem`
    pub fn cert_path(&self, primary_domain: &str) -> PathBuf {
        self.dest_dir.join(format!("{}_crt.pem", primary_domain))
    }

    /// `intermediate_crt.pem`
    pub fn intermediate_path(&self) -> PathBuf {
        self.dest_dir.join(INTERMEDIATE_FILE)
    }

    /// Write the certificate private key (0600)
    pub fn write_private_key(&self, primary_domain: &str, key_pem: &str) -> Result<PathBuf, StorageError> {
        let path = self.key_path(primary_domain);
        write_private(&path, key_pem)?;
        info!(path = %path.display(), "Saved certificate private key");
        Ok(path)
    }

    /// Write the leaf certificate
    pub fn write_certificate(&self, primary_domain: &str, cert_pem: &str) -> Result<PathBuf, StorageError> {
        let path = self.cert_path(primary_domain);
        write_public(&path, cert_pem)?;
        info!(path = %path.display(), "Saved certificate");
        Ok(path)
    }

    /// Write the issuer certificate
    pub fn write_intermediate(&self, cert_pem: &str) -> Result<PathBuf, StorageError> {
        let path = self.intermediate_path();
        write_public(&path, cert_pem)?;
        info!(path = %path.display(), "Saved intermediate certificate");
        Ok(path)
    }
}

fn ensure_parent(path: &Path) -> Result<(), StorageError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn write_public(path: &Path, contents: &str) -> Result<(), StorageError> {
    ensure_parent(path)?;
    fs::write(path, contents)?;
    Ok(())
}

/// Write `contents` so that only the owner can read it
fn write_private(path: &Path, contents: &str) -> Result<(), StorageError> {
    ensure_parent(path)?;

    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents.as_bytes())?;
    file.sync_all()?;

    // mode() only applies to newly created files
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }

    Ok(())
}
