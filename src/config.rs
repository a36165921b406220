use std::{env, fmt::Display, str::FromStr};

use thiserror::Error;
use tracing::{info, warn};

use crate::auth::{AdminAccount, MAX_SESSION_TTL_SECS};
use crate::storage::StorageConfig;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid {key} value: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("{0} must be set")]
    Missing(&'static str),
}

/// Runtime configuration of the server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub storage: StorageConfig,
    pub jwt_secret: String,
    pub session_ttl_secs: u64,
    /// `None` allows any origin
    pub cors_origin: Option<String>,
    /// Upper bound for a decoded image upload
    pub max_upload_bytes: usize,
    pub admins: Vec<AdminAccount>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            storage: StorageConfig::default(),
            jwt_secret: String::new(),
            session_ttl_secs: 12 * 60 * 60,
            cors_origin: None,
            max_upload_bytes: 5 * 1024 * 1024,
            admins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Load from the process environment
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let storage_path: String = try_load(&lookup, "STORAGE_PATH", "./data/podcast.sled")?;
        let cache_size: u64 = try_load(&lookup, "STORAGE_CACHE_BYTES", "268435456")?;

        let jwt_secret = match lookup("JWT_SECRET").filter(|s| !s.is_empty()) {
            Some(secret) => secret,
            None => {
                warn!("JWT_SECRET not set, sessions will not survive a restart");
                format!(
                    "{}{}",
                    uuid::Uuid::new_v4().simple(),
                    uuid::Uuid::new_v4().simple()
                )
            }
        };

        let session_ttl_secs: u64 = try_load(&lookup, "SESSION_TTL_SECS", "43200")?;
        if session_ttl_secs == 0 || session_ttl_secs > MAX_SESSION_TTL_SECS {
            return Err(ConfigError::Invalid {
                key: "SESSION_TTL_SECS",
                reason: format!("must be between 1 and {}", MAX_SESSION_TTL_SECS),
            });
        }

        let cors_origin = lookup("CORS_ORIGIN").filter(|s| !s.is_empty() && s != "*");

        Ok(Self {
            port: try_load(&lookup, "PORT", "5000")?,
            storage: StorageConfig::new(storage_path).with_cache_size(cache_size),
            jwt_secret,
            session_ttl_secs,
            cors_origin,
            max_upload_bytes: try_load(&lookup, "MAX_UPLOAD_BYTES", "5242880")?,
            admins: load_admins(&lookup)?,
        })
    }
}

fn try_load<T, F>(lookup: &F, key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .unwrap_or_else(|| {
            info!("{key} not set, using default: {default}");
            default.to_string()
        })
        .parse()
        .map_err(|e: T::Err| {
            warn!("Invalid {key} value: {e}");
            ConfigError::Invalid {
                key,
                reason: e.to_string(),
            }
        })
}

/// A single operator account; without `ADMIN_EMAIL` the admin surface is closed
fn load_admins<F>(lookup: &F) -> Result<Vec<AdminAccount>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(email) = lookup("ADMIN_EMAIL").filter(|s| !s.trim().is_empty()) else {
        warn!("ADMIN_EMAIL not set, admin login is disabled");
        return Ok(Vec::new());
    };

    let digest = lookup("ADMIN_PASSWORD_SHA256").ok_or(ConfigError::Missing("ADMIN_PASSWORD_SHA256"))?;
    let name = lookup("ADMIN_NAME").unwrap_or_else(|| "Administrador".to_string());
    let role = lookup("ADMIN_ROLE").unwrap_or_else(|| "admin".to_string());

    let account = AdminAccount::new(email, digest, name, role).map_err(|e| ConfigError::Invalid {
        key: "ADMIN_PASSWORD_SHA256",
        reason: e.to_string(),
    })?;
    Ok(vec![account])
}
