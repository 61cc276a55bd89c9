//! Token-exchange collaborators.

pub mod sts;

use crate::factory::ClientHandle;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

/// Parameters for a single role assumption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeRequest {
    pub role_arn: String,
    pub session_name: String,
    pub duration_seconds: u32,
    pub external_id: Option<String>,
}

/// Raw credentials returned by the exchange endpoint.
#[derive(Clone, PartialEq, Eq)]
pub struct IssuedCredentials {
    pub access_key: String,
    pub secret_key: String,
    pub session_token: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedCredentials")
            .field("access_key", &self.access_key)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

/// Result of a "who am I" call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CallerIdentity {
    pub account: Option<String>,
    pub user_id: Option<String>,
    pub arn: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeErrorKind {
    AccessDenied,
    InvalidParameter,
    MalformedPolicy,
    TokenRefreshRequired,
    /// The caller had no base identity to sign the request with.
    MissingCredentials,
    /// The named profile for the base identity does not exist.
    InvalidProfile,
    Other,
}

impl ExchangeErrorKind {
    /// Classify a provider error code.
    pub fn from_code(code: &str) -> Self {
        match code {
            "AccessDenied" | "AccessDeniedException" => ExchangeErrorKind::AccessDenied,
            "InvalidParameterValue" | "ValidationError" => ExchangeErrorKind::InvalidParameter,
            "MalformedPolicyDocument" | "MalformedPolicyDocumentException" => {
                ExchangeErrorKind::MalformedPolicy
            }
            "TokenRefreshRequired" | "ExpiredToken" | "ExpiredTokenException" => {
                ExchangeErrorKind::TokenRefreshRequired
            }
            _ => ExchangeErrorKind::Other,
        }
    }
}

/// Failure reported by a [`TokenService`].
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExchangeError {
    pub kind: ExchangeErrorKind,
    /// Provider-native error code, when one was returned.
    pub code: Option<String>,
    pub message: String,
}

impl ExchangeError {
    pub fn new(kind: ExchangeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            code: None,
            message: message.into(),
        }
    }

    /// Build from a provider code, classifying it.
    pub fn from_code(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        Self {
            kind: ExchangeErrorKind::from_code(&code),
            code: Some(code),
            message: message.into(),
        }
    }
}

/// Security token service used by the broker.
#[async_trait]
pub trait TokenService: Send + Sync {
    /// Exchange the ambient identity for credentials of the requested role.
    async fn assume_role(&self, request: ExchangeRequest)
    -> Result<IssuedCredentials, ExchangeError>;

    /// Report the identity behind a client handle.
    async fn caller_identity(&self, handle: &ClientHandle) -> Result<CallerIdentity, ExchangeError>;
}
