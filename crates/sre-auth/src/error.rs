//! Error taxonomy for the credential broker.
//!
//! Collaborator failures ([`ExchangeError`], [`FactoryError`]) never leave the
//! crate in their native shape; the broker maps them into [`AuthError`].

use crate::factory::FactoryError;
use crate::providers::{ExchangeError, ExchangeErrorKind};
use std::fmt;
use thiserror::Error;

/// Why a token exchange was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssumeRoleFailure {
    AccessDenied,
    InvalidParameter,
    MalformedPolicy,
    Other,
}

impl fmt::Display for AssumeRoleFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            AssumeRoleFailure::AccessDenied => "access denied",
            AssumeRoleFailure::InvalidParameter => "invalid parameter",
            AssumeRoleFailure::MalformedPolicy => "malformed trust policy",
            AssumeRoleFailure::Other => "exchange rejected",
        };
        f.write_str(reason)
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Invalid configuration: {message}{}", field_suffix(.field))]
    Configuration {
        message: String,
        field: Option<String>,
    },

    #[error("Role configuration not found: {0}")]
    RoleNotFound(String),

    #[error("Authentication failed: {message}{}", role_suffix(.role_arn))]
    Authentication {
        message: String,
        role_arn: Option<String>,
    },

    #[error("Assume role failed ({reason}): {message} (Role: {role_arn})")]
    AssumeRoleFailed {
        role_arn: String,
        reason: AssumeRoleFailure,
        code: Option<String>,
        message: String,
    },

    #[error("{message}{}", role_name_suffix(.role_name))]
    CredentialExpired {
        message: String,
        role_name: Option<String>,
    },

    #[error("Failed to create AWS client for service {service}: {message}")]
    ClientCreationFailed { service: String, message: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, AuthError>;

fn field_suffix(field: &Option<String>) -> String {
    field
        .as_ref()
        .map(|f| format!(" (Field: {})", f))
        .unwrap_or_default()
}

fn role_suffix(role_arn: &Option<String>) -> String {
    role_arn
        .as_ref()
        .map(|arn| format!(" (Role: {})", arn))
        .unwrap_or_default()
}

fn role_name_suffix(role_name: &Option<String>) -> String {
    role_name
        .as_ref()
        .map(|name| format!(" (Role: {})", name))
        .unwrap_or_default()
}

impl AuthError {
    pub fn config(message: impl Into<String>) -> Self {
        AuthError::Configuration {
            message: message.into(),
            field: None,
        }
    }

    pub fn config_field(field: impl Into<String>, message: impl Into<String>) -> Self {
        AuthError::Configuration {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Stable error code for programmatic handling and tool-call output.
    pub fn code(&self) -> String {
        match self {
            AuthError::Configuration { .. } => "CONFIG_INVALID".to_string(),
            AuthError::RoleNotFound(_) => "ROLE_NOT_FOUND".to_string(),
            AuthError::Authentication { .. } => "AUTH_FAILED".to_string(),
            AuthError::AssumeRoleFailed { code: Some(c), .. } => {
                format!("ASSUME_ROLE_FAILED_{}", c)
            }
            AuthError::AssumeRoleFailed { code: None, .. } => "ASSUME_ROLE_FAILED".to_string(),
            AuthError::CredentialExpired { .. } => "CREDENTIALS_EXPIRED".to_string(),
            AuthError::ClientCreationFailed { .. } => "CLIENT_CREATION_FAILED".to_string(),
            AuthError::Internal(_) => "INTERNAL_ERROR".to_string(),
        }
    }

    /// Map a rejected exchange for a specific role.
    pub(crate) fn from_exchange(err: ExchangeError, role_arn: &str, role_name: &str) -> Self {
        let reason = match err.kind {
            ExchangeErrorKind::AccessDenied => AssumeRoleFailure::AccessDenied,
            ExchangeErrorKind::InvalidParameter => AssumeRoleFailure::InvalidParameter,
            ExchangeErrorKind::MalformedPolicy => AssumeRoleFailure::MalformedPolicy,
            ExchangeErrorKind::TokenRefreshRequired => {
                return AuthError::CredentialExpired {
                    message: format!("AWS token refresh required: {}", err.message),
                    role_name: Some(role_name.to_string()),
                };
            }
            ExchangeErrorKind::InvalidProfile => {
                return AuthError::config_field(
                    "aws_profile",
                    format!("AWS profile unusable: {}", err.message),
                );
            }
            ExchangeErrorKind::MissingCredentials => {
                return AuthError::Authentication {
                    message: format!(
                        "no base credentials available to assume role: {}",
                        err.message
                    ),
                    role_arn: Some(role_arn.to_string()),
                };
            }
            ExchangeErrorKind::Other => AssumeRoleFailure::Other,
        };

        let message = match reason {
            AssumeRoleFailure::AccessDenied => {
                "Access denied - check IAM permissions and trust relationships".to_string()
            }
            AssumeRoleFailure::InvalidParameter => {
                format!("Invalid parameter value: {}", err.message)
            }
            AssumeRoleFailure::MalformedPolicy => {
                "Malformed policy document in role trust policy".to_string()
            }
            AssumeRoleFailure::Other => format!("AWS error: {}", err.message),
        };

        AuthError::AssumeRoleFailed {
            role_arn: role_arn.to_string(),
            reason,
            code: err.code,
            message,
        }
    }

    /// Map a failure of a plain service call that is not a role exchange.
    pub(crate) fn from_service_call(err: ExchangeError, context: &str) -> Self {
        match err.kind {
            ExchangeErrorKind::InvalidProfile => AuthError::config_field(
                "aws_profile",
                format!("AWS profile unusable during {}: {}", context, err.message),
            ),
            ExchangeErrorKind::MissingCredentials => AuthError::Authentication {
                message: "AWS credentials not found. Please configure AWS credentials or check environment variables.".to_string(),
                role_arn: None,
            },
            ExchangeErrorKind::AccessDenied => AuthError::Authentication {
                message: format!("Access denied during {}: {}", context, err.message),
                role_arn: None,
            },
            ExchangeErrorKind::InvalidParameter => {
                AuthError::config(format!("Invalid parameter during {}: {}", context, err.message))
            }
            ExchangeErrorKind::TokenRefreshRequired => AuthError::CredentialExpired {
                message: format!(
                    "AWS token refresh required during {}: {}",
                    context, err.message
                ),
                role_name: None,
            },
            ExchangeErrorKind::MalformedPolicy => AuthError::AssumeRoleFailed {
                role_arn: "unknown".to_string(),
                reason: AssumeRoleFailure::MalformedPolicy,
                code: err.code,
                message: format!("AWS error during {}: {}", context, err.message),
            },
            ExchangeErrorKind::Other => AuthError::AssumeRoleFailed {
                role_arn: "unknown".to_string(),
                reason: AssumeRoleFailure::Other,
                code: err.code,
                message: format!("AWS error during {}: {}", context, err.message),
            },
        }
    }

    pub(crate) fn from_factory(err: FactoryError, service: &str) -> Self {
        match err {
            FactoryError::NoCredentials(message) => AuthError::Authentication {
                message: format!(
                    "AWS credentials not found while creating {} client: {}",
                    service, message
                ),
                role_arn: None,
            },
            FactoryError::Misconfigured(message) => {
                AuthError::config_field("aws_profile", format!("AWS profile unusable: {}", message))
            }
            FactoryError::UnknownService(name) => AuthError::ClientCreationFailed {
                service: service.to_string(),
                message: format!("unknown service name '{}'", name),
            },
            FactoryError::Construction(message) => AuthError::ClientCreationFailed {
                service: service.to_string(),
                message,
            },
        }
    }
}
