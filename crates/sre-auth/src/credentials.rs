//! Temporary credentials and the cache entries that hold them.

use crate::error::{AuthError, Result};
use crate::providers::IssuedCredentials;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::fmt;

/// Credentials closer than this to expiry are never handed out.
pub const SAFETY_BUFFER: Duration = Duration::minutes(5);

/// Short-lived credentials produced by a successful exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct TemporaryCredentials {
    access_key: String,
    secret_key: String,
    session_token: String,
    expires_at: DateTime<Utc>,
    region: String,
}

impl TemporaryCredentials {
    /// Wrap freshly issued credentials. Fails if they are not in the future at `now`.
    pub fn new(
        issued: IssuedCredentials,
        region: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        if issued.expires_at <= now {
            return Err(AuthError::CredentialExpired {
                message: format!(
                    "Token exchange returned credentials that expired at {}",
                    issued.expires_at.to_rfc3339()
                ),
                role_name: None,
            });
        }

        Ok(Self {
            access_key: issued.access_key,
            secret_key: issued.secret_key,
            session_token: issued.session_token,
            expires_at: issued.expires_at,
            region: region.into(),
        })
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Detect use of credentials held past their expiry.
    pub fn ensure_fresh(&self, now: DateTime<Utc>, role_name: Option<&str>) -> Result<()> {
        if self.is_expired_at(now) {
            return Err(AuthError::CredentialExpired {
                message: "AWS credentials have expired".to_string(),
                role_name: role_name.map(str::to_string),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for TemporaryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TemporaryCredentials")
            .field("access_key", &self.access_key)
            .field("secret_key", &"***")
            .field("session_token", &"***")
            .field("expires_at", &self.expires_at)
            .field("region", &self.region)
            .finish()
    }
}

/// Cached credentials for one role.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub credentials: TemporaryCredentials,
    pub cached_at: DateTime<Utc>,
}

impl CacheEntry {
    pub fn new(credentials: TemporaryCredentials, cached_at: DateTime<Utc>) -> Self {
        Self {
            credentials,
            cached_at,
        }
    }

    /// Both the administrative TTL and the expiry buffer must hold.
    pub fn is_valid(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        self.within_ttl(now, ttl) && self.outside_expiry_buffer(now)
    }

    pub fn within_ttl(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.cached_at < ttl
    }

    pub fn outside_expiry_buffer(&self, now: DateTime<Utc>) -> bool {
        self.credentials.expires_at - now > SAFETY_BUFFER
    }

    pub fn info(&self, now: DateTime<Utc>, ttl: Duration) -> CacheInfo {
        CacheInfo {
            cached_at: self.cached_at,
            expires_at: self.credentials.expires_at,
            valid: self.is_valid(now, ttl),
            region: self.credentials.region.clone(),
        }
    }
}

/// Point-in-time view of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheInfo {
    pub cached_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub valid: bool,
    pub region: String,
}
