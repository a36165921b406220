//! Authentication gate for the admin surface.
//!
//! This module handles:
//! - Operator accounts configured from the environment
//! - Password checks against SHA-256 digests
//! - Session token issue, verification and revocation on logout

mod token;

pub use token::{SessionClaims, SessionToken, TokenService, MAX_SESSION_TTL_SECS};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};

use token::unix_now;

/// Errors that can occur during authentication
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Missing bearer token")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    Expired,

    #[error("Session has been revoked")]
    Revoked,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("JWT encoding error: {0}")]
    Jwt(String),
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AuthError::Jwt(err.to_string())
    }
}

/// Hex SHA-256 digest of a password
pub fn password_digest(password: &str) -> String {
    hex::encode(Sha256::digest(password.as_bytes()))
}

/// An operator allowed into the admin surface
#[derive(Clone, Serialize, Deserialize)]
pub struct AdminAccount {
    pub email: String,
    /// Lowercase hex SHA-256 of the password
    #[serde(skip_serializing)]
    pub password_sha256: String,
    pub name: String,
    pub role: String,
}

impl std::fmt::Debug for AdminAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAccount")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("role", &self.role)
            .finish()
    }
}

impl AdminAccount {
    pub fn new(
        email: impl Into<String>,
        password_sha256: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> Result<Self, AuthError> {
        let password_sha256 = password_sha256.into().trim().to_lowercase();
        let decoded = hex::decode(&password_sha256)
            .map_err(|e| AuthError::InvalidConfig(format!("password digest is not hex: {}", e)))?;
        if decoded.len() != 32 {
            return Err(AuthError::InvalidConfig(
                "password digest must be 32 bytes".to_string(),
            ));
        }

        Ok(Self {
            email: email.into().trim().to_lowercase(),
            password_sha256,
            name: name.into(),
            role: role.into(),
        })
    }

    /// Build an account from a plain password
    pub fn from_password(
        email: impl Into<String>,
        password: &str,
        name: impl Into<String>,
        role: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into().trim().to_lowercase(),
            password_sha256: password_digest(password),
            name: name.into(),
            role: role.into(),
        }
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let candidate = password_digest(password);
        // Compare every byte regardless of where the first mismatch is
        candidate.len() == self.password_sha256.len()
            && candidate
                .bytes()
                .zip(self.password_sha256.bytes())
                .fold(0u8, |acc, (a, b)| acc | (a ^ b))
                == 0
    }
}

/// Login, session verification and logout
pub struct AuthService {
    accounts: Vec<AdminAccount>,
    tokens: TokenService,
    /// jti -> expiry of revoked sessions
    revoked: DashMap<String, u64>,
}

impl AuthService {
    pub fn new(accounts: Vec<AdminAccount>, secret: &str, ttl_seconds: u64) -> Result<Self, AuthError> {
        let tokens = TokenService::new(secret, ttl_seconds)?;
        if accounts.is_empty() {
            warn!("No admin accounts configured - admin surface is closed");
        }
        Ok(Self {
            accounts,
            tokens,
            revoked: DashMap::new(),
        })
    }

    /// Whether anyone can log in at all
    pub fn is_enabled(&self) -> bool {
        !self.accounts.is_empty()
    }

    pub fn login(&self, email: &str, password: &str) -> Result<SessionToken, AuthError> {
        let email = email.trim().to_lowercase();
        let account = self
            .accounts
            .iter()
            .find(|a| a.email == email)
            .filter(|a| a.verify_password(password))
            .ok_or_else(|| {
                warn!("Failed admin login for {}", email);
                AuthError::InvalidCredentials
            })?;

        let session = self.tokens.issue(account)?;
        info!("Admin {} logged in", account.email);
        Ok(session)
    }

    /// Verify a bearer token and make sure it was not revoked
    pub fn authenticate(&self, token: &str) -> Result<SessionClaims, AuthError> {
        let claims = self.tokens.verify(token)?;
        if self.revoked.contains_key(&claims.jti) {
            return Err(AuthError::Revoked);
        }
        Ok(claims)
    }

    /// Revoke the session until it would have expired anyway
    pub fn logout(&self, claims: &SessionClaims) {
        self.revoked.insert(claims.jti.clone(), claims.exp);
        info!("Admin {} logged out", claims.sub);
    }

    /// Forget revocations whose tokens have expired
    pub fn purge_revoked(&self) -> usize {
        let now = unix_now();
        let before = self.revoked.len();
        self.revoked.retain(|_, exp| *exp > now);
        let purged = before.saturating_sub(self.revoked.len());
        if purged > 0 {
            debug!("Purged {} expired revocations", purged);
        }
        purged
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.len()
    }
}
