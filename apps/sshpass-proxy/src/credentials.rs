//! Password and host key sources

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use crypto_session::{CryptoError, HostKey, os_rng};
use thiserror::Error;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Environment variable read by `-e`
pub const PASSWORD_ENV: &str = "SSHPASS";

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("no password given (use -p, -f or -e)")]
    MissingPassword,

    #[error("password is empty")]
    EmptyPassword,

    #[error("SSHPASS is not set")]
    EnvUnset,

    #[error("cannot read password file {}: {source}", path.display())]
    PasswordFile { path: PathBuf, source: io::Error },

    #[error("cannot locate a configuration directory (set XDG_CONFIG_HOME or HOME)")]
    NoConfigDir,

    #[error("host key {}: {source}", path.display())]
    HostKeyIo { path: PathBuf, source: io::Error },

    #[error("host key {}: {source}", path.display())]
    HostKeyFormat { path: PathBuf, source: CryptoError },
}

/// Where the password comes from
#[derive(Clone, PartialEq, Eq)]
pub enum PasswordSource {
    Literal(OsString),
    File(PathBuf),
    Env,
}

impl std::fmt::Debug for PasswordSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Literal(_) => f.write_str("Literal(<redacted>)"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Env => f.write_str("Env"),
        }
    }
}

/// Resolve a password as raw bytes; `env` looks up environment variables.
///
/// File contents are trimmed of surrounding ASCII whitespace. No source has
/// to be valid UTF-8.
pub fn resolve_password(
    source: &PasswordSource,
    env: impl Fn(&str) -> Option<OsString>,
) -> Result<Zeroizing<Vec<u8>>, CredentialError> {
    let password = match source {
        PasswordSource::Literal(password) => {
            Zeroizing::new(password.clone().into_encoded_bytes())
        }
        PasswordSource::File(path) => {
            let contents = Zeroizing::new(fs::read(path).map_err(|source| {
                CredentialError::PasswordFile {
                    path: path.clone(),
                    source,
                }
            })?);
            Zeroizing::new(contents.trim_ascii().to_vec())
        }
        PasswordSource::Env => {
            let value = env(PASSWORD_ENV).ok_or(CredentialError::EnvUnset)?;
            Zeroizing::new(value.into_encoded_bytes())
        }
    };
    if password.is_empty() {
        return Err(CredentialError::EmptyPassword);
    }
    Ok(password)
}

/// `$XDG_CONFIG_HOME/sshpass_proxy/host_key.pem`, else under `~/.config`
pub fn default_host_key_path(
    xdg_config_home: Option<OsString>,
    home: Option<OsString>,
) -> Option<PathBuf> {
    let base = xdg_config_home
        .filter(|dir| !dir.is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            home.filter(|dir| !dir.is_empty())
                .map(|home| PathBuf::from(home).join(".config"))
        })?;
    Some(base.join("sshpass_proxy").join("host_key.pem"))
}

/// Load a PEM host key
pub fn load_host_key(path: &Path) -> Result<HostKey, CredentialError> {
    let pem = Zeroizing::new(fs::read_to_string(path).map_err(|source| {
        CredentialError::HostKeyIo {
            path: path.to_path_buf(),
            source,
        }
    })?);
    HostKey::from_pkcs8_pem(&pem).map_err(|source| CredentialError::HostKeyFormat {
        path: path.to_path_buf(),
        source,
    })
}

/// Load the host key at `path`, creating it (mode 0600) when missing
pub fn load_or_generate_host_key(path: &Path) -> Result<HostKey, CredentialError> {
    if path.exists() {
        return load_host_key(path);
    }
    store_or_load_host_key(path, HostKey::generate(&mut *os_rng()))
}

/// Write `key` to a new file at `path`. If another process created the file
/// first, its key wins and is loaded instead.
fn store_or_load_host_key(path: &Path, key: HostKey) -> Result<HostKey, CredentialError> {
    match write_new_host_key(path, &key) {
        Ok(()) => {
            info!(
                path = %path.display(),
                fingerprint = %key.public_key().fingerprint(),
                "generated host key"
            );
            Ok(key)
        }
        Err(CredentialError::HostKeyIo { source, .. })
            if source.kind() == io::ErrorKind::AlreadyExists =>
        {
            debug!(path = %path.display(), "host key appeared concurrently; loading it");
            load_host_key(path)
        }
        Err(e) => Err(e),
    }
}

fn write_new_host_key(path: &Path, key: &HostKey) -> Result<(), CredentialError> {
    let io_error = |source: io::Error| CredentialError::HostKeyIo {
        path: path.to_path_buf(),
        source,
    };
    let pem = key
        .to_pkcs8_pem()
        .map_err(|source| CredentialError::HostKeyFormat {
            path: path.to_path_buf(),
            source,
        })?;

    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).map_err(io_error)?;
    }
    let mut file = private_file(path).map_err(io_error)?;
    file.write_all(pem.as_bytes()).map_err(io_error)?;
    file.sync_all().map_err(io_error)
}

#[cfg(unix)]
fn private_file(path: &Path) -> io::Result<fs::File> {
    use std::os::unix::fs::OpenOptionsExt;

    fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(path)
}

#[cfg(not(unix))]
fn private_file(path: &Path) -> io::Result<fs::File> {
    fs::OpenOptions::new().write(true).create_new(true).open(path)
}
