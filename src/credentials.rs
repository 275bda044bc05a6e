//! Bearer token sources
//!
//! The engine never acquires tokens itself. A [`CredentialProvider`] is asked
//! for the current token on every request, so an operator can rotate the token
//! (for example by rewriting the token file) without restarting a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Credential errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CredentialError {
    /// Environment variable is unset or empty
    #[error("environment variable {0} is not set")]
    MissingEnv(String),

    /// Token file could not be read
    #[error("failed to read token file {path}: {message}")]
    Unreadable {
        /// Token file path
        path: PathBuf,
        /// Underlying IO error
        message: String,
    },

    /// Token source produced an empty value
    #[error("credential source {0} produced an empty token")]
    Empty(String),
}

/// Supplies the bearer token attached to each request
pub trait CredentialProvider: Send + Sync + fmt::Debug {
    /// Current `Authorization` header value, or `None` for anonymous access
    fn bearer(&self) -> Result<Option<String>, CredentialError>;
}

/// Where a target's token comes from
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum CredentialConfig {
    /// Anonymous access
    #[default]
    None,
    /// Token embedded in the configuration
    Static {
        /// Token value
        token: String,
    },
    /// Token read from an environment variable on every request
    Env {
        /// Variable name
        var: String,
    },
    /// Token read from a file on every request
    File {
        /// File path
        path: PathBuf,
    },
}

impl CredentialConfig {
    /// Build the provider described by this configuration
    pub fn provider(&self) -> Box<dyn CredentialProvider> {
        match self {
            CredentialConfig::None => Box::new(Anonymous),
            CredentialConfig::Static { token } => Box::new(StaticToken::new(token.clone())),
            CredentialConfig::Env { var } => Box::new(EnvToken::new(var.clone())),
            CredentialConfig::File { path } => Box::new(FileToken::new(path.clone())),
        }
    }
}

/// Prefix a bare token with the `Bearer` scheme; values that already carry a
/// scheme are returned unchanged.
pub fn as_authorization(token: &str) -> String {
    let token = token.trim();
    if token.contains(' ') {
        token.to_string()
    } else {
        format!("Bearer {token}")
    }
}

/// No credentials
#[derive(Debug, Clone, Copy, Default)]
pub struct Anonymous;

impl CredentialProvider for Anonymous {
    fn bearer(&self) -> Result<Option<String>, CredentialError> {
        Ok(None)
    }
}

/// A fixed token
#[derive(Clone)]
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    /// Wrap a token
    pub fn new(token: impl Into<String>) -> Self {
        Self { token: token.into() }
    }
}

impl fmt::Debug for StaticToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticToken").field("token", &"<redacted>").finish()
    }
}

impl CredentialProvider for StaticToken {
    fn bearer(&self) -> Result<Option<String>, CredentialError> {
        if self.token.trim().is_empty() {
            return Err(CredentialError::Empty("static".to_string()));
        }
        Ok(Some(as_authorization(&self.token)))
    }
}

/// Token read from an environment variable
#[derive(Debug, Clone)]
pub struct EnvToken {
    var: String,
}

impl EnvToken {
    /// Read from `var`
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialProvider for EnvToken {
    fn bearer(&self) -> Result<Option<String>, CredentialError> {
        match std::env::var(&self.var) {
            Ok(value) if !value.trim().is_empty() => Ok(Some(as_authorization(&value))),
            _ => Err(CredentialError::MissingEnv(self.var.clone())),
        }
    }
}

/// Token read from a file
#[derive(Debug, Clone)]
pub struct FileToken {
    path: PathBuf,
}

impl FileToken {
    /// Read from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl CredentialProvider for FileToken {
    fn bearer(&self) -> Result<Option<String>, CredentialError> {
        let contents =
            std::fs::read_to_string(&self.path).map_err(|e| CredentialError::Unreadable {
                path: self.path.clone(),
                message: e.to_string(),
            })?;
        let token = contents.lines().next().unwrap_or("").trim();
        if token.is_empty() {
            return Err(CredentialError::Empty(self.path.display().to_string()));
        }
        Ok(Some(as_authorization(token)))
    }
}
