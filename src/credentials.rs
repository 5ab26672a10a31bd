//! Short-lived transport credentials.
//!
//! Credentials are requested fresh for every clone, fetch and API call and are
//! never stored next to a mirror.

use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CredentialError {
    /// No token has been configured.
    #[error("no token configured")]
    Missing,
    /// The token issuer refused or failed.
    #[error("token issuance failed: {0}")]
    Issuance(String),
}

/// A (principal, secret) pair used to authenticate one transport operation.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub username: String,
    pub secret: String,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Supplies credentials on demand.
pub trait TokenSource: Send + Sync {
    fn token(&self) -> Result<Credential, CredentialError>;
}

/// A token source backed by a fixed token, e.g. a PAT from `GITHUB_TOKEN`.
pub struct StaticToken {
    username: String,
    secret: Option<String>,
}

impl StaticToken {
    pub fn new(username: impl Into<String>, secret: Option<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.filter(|s| !s.is_empty()),
        }
    }
}

impl TokenSource for StaticToken {
    fn token(&self) -> Result<Credential, CredentialError> {
        let secret = self.secret.as_ref().ok_or(CredentialError::Missing)?;
        Ok(Credential::new(self.username.clone(), secret.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_output_redacts_secret() {
        let cred = Credential::new("x-access-token", "ghs_supersecret");
        let rendered = format!("{:?}", cred);
        assert!(rendered.contains("x-access-token"));
        assert!(!rendered.contains("ghs_supersecret"));
    }

    #[test]
    fn static_token_hands_out_copies() {
        let source = StaticToken::new("x-access-token", Some("ghp_abc".to_string()));
        let cred = source.token().unwrap();
        assert_eq!(cred, Credential::new("x-access-token", "ghp_abc"));
    }

    #[test]
    fn static_token_without_secret_is_missing() {
        let source = StaticToken::new("x-access-token", Some(String::new()));
        assert!(matches!(source.token(), Err(CredentialError::Missing)));

        let source = StaticToken::new("x-access-token", None);
        assert!(matches!(source.token(), Err(CredentialError::Missing)));
    }
}
