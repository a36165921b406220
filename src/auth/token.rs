//! Session token generation and verification.
//!
//! Admin sessions are HS256 JWTs signed with the server secret. Each token
//! carries a unique `jti` so a single session can be revoked on logout.

use jsonwebtoken::{decode, encode, errors::ErrorKind, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use super::{AdminAccount, AuthError};

/// Claims carried by an admin session token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (account email)
    pub sub: String,
    /// Display name
    pub name: String,
    pub role: String,
    /// JWT ID
    pub jti: String,
    /// Issued at timestamp
    pub iat: u64,
    /// Expiration timestamp
    pub exp: u64,
}

/// Issued session token with metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    /// The JWT token string
    pub token: String,
    pub expires_at: u64,
    pub claims: SessionClaims,
}

/// Longest session a token may grant
pub const MAX_SESSION_TTL_SECS: u64 = 365 * 24 * 60 * 60;

/// Signs and verifies session tokens
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    ttl_seconds: u64,
}

impl TokenService {
    pub fn new(secret: &str, ttl_seconds: u64) -> Result<Self, AuthError> {
        if secret.is_empty() {
            return Err(AuthError::InvalidConfig("JWT secret is empty".to_string()));
        }
        if ttl_seconds == 0 {
            return Err(AuthError::InvalidConfig("session TTL must be positive".to_string()));
        }
        if ttl_seconds > MAX_SESSION_TTL_SECS {
            return Err(AuthError::InvalidConfig(format!(
                "session TTL must be at most {} seconds",
                MAX_SESSION_TTL_SECS
            )));
        }

        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            ttl_seconds,
        })
    }

    pub fn ttl_seconds(&self) -> u64 {
        self.ttl_seconds
    }

    /// Issue a token for an authenticated account
    pub fn issue(&self, account: &AdminAccount) -> Result<SessionToken, AuthError> {
        let now = unix_now();
        let exp = now
            .checked_add(self.ttl_seconds)
            .ok_or_else(|| AuthError::InvalidConfig("session expiry overflows".to_string()))?;

        let claims = SessionClaims {
            sub: account.email.clone(),
            name: account.name.clone(),
            role: account.role.clone(),
            jti: uuid::Uuid::new_v4().to_string(),
            iat: now,
            exp,
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)?;

        Ok(SessionToken {
            token,
            expires_at: exp,
            claims,
        })
    }

    /// Check signature and expiry, returning the claims
    pub fn verify(&self, token: &str) -> Result<SessionClaims, AuthError> {
        decode::<SessionClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::InvalidToken(e.to_string()),
            })
    }
}

pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
