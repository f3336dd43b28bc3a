//! Internet Archive S3 credentials
//!
//! Keys come from the command line when both are given, otherwise from the
//! `~/.ias3cfg` file written by the `ia` tool:
//!
//! ```text
//! [default]
//! access_key = ABCDEF
//! secret_key = 123456
//! ```

use crate::error::CredentialsError;
use std::fmt;
use std::path::{Path, PathBuf};

/// Name of the credentials file in the user's home directory
pub const CREDS_FILE_NAME: &str = ".ias3cfg";

/// Access/secret key pair for the IA S3 API
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    access_key: String,
    secret_key: String,
}

impl Credentials {
    pub fn new(access_key: impl Into<String>, secret_key: impl Into<String>) -> Self {
        Self {
            access_key: access_key.into(),
            secret_key: secret_key.into(),
        }
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }
}

// Keep the secret out of logs and panics
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// Default credentials file location: `$HOME/.ias3cfg`
pub fn default_creds_path() -> Result<PathBuf, CredentialsError> {
    dirs::home_dir()
        .map(|home| home.join(CREDS_FILE_NAME))
        .ok_or(CredentialsError::NoHome)
}

/// Pick credentials from flags, falling back to a credentials file
///
/// `file` overrides the default `$HOME/.ias3cfg` location.
pub fn resolve(
    access_key: Option<&str>,
    secret_key: Option<&str>,
    file: Option<&Path>,
) -> Result<Credentials, CredentialsError> {
    if let (Some(access), Some(secret)) = (access_key, secret_key) {
        return Ok(Credentials::new(access, secret));
    }

    let path = match file {
        Some(path) => path.to_path_buf(),
        None => default_creds_path()?,
    };
    load_from_file(&path)
}

/// Read the `[default]` section of an ias3cfg file
pub fn load_from_file(path: &Path) -> Result<Credentials, CredentialsError> {
    let content = std::fs::read_to_string(path).map_err(|source| CredentialsError::Unreadable {
        path: path.to_path_buf(),
        source,
    })?;

    match parse_ias3cfg(&content) {
        (Some(access), Some(secret)) => Ok(Credentials::new(access, secret)),
        _ => Err(CredentialsError::MissingKeys {
            path: path.to_path_buf(),
        }),
    }
}

/// Extract `access_key` and `secret_key` from the `[default]` section
///
/// Lines starting with `#` or `;` are comments. Keys in other sections are
/// ignored, and empty values count as missing.
pub fn parse_ias3cfg(content: &str) -> (Option<String>, Option<String>) {
    let mut in_default = false;
    let mut access_key = None;
    let mut secret_key = None;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            in_default = section.trim() == "default";
            continue;
        }

        if !in_default {
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let value = value.trim();
        if value.is_empty() {
            continue;
        }

        match key.trim() {
            "access_key" => access_key = Some(value.to_string()),
            "secret_key" => secret_key = Some(value.to_string()),
            _ => {}
        }
    }

    (access_key, secret_key)
}
