//! Cross-account AWS credential broker for the SRE assistant.
//!
//! This crate assumes configured IAM roles through STS, caches the temporary
//! credentials per role, and hands out ready-to-use AWS client configurations
//! for either an assumed role or the ambient identity of the process.

pub mod broker;
pub mod clock;
pub mod config;
pub mod credentials;
pub mod error;
pub mod factory;
pub mod providers;

pub use broker::{CredentialBroker, IdentitySummary, RoleSelector};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BrokerConfig, RoleBinding, RoleBindingBuilder, RoleBindingSpec};
pub use credentials::{CacheEntry, CacheInfo, SAFETY_BUFFER, TemporaryCredentials};
pub use error::{AssumeRoleFailure, AuthError, Result};
pub use factory::{
    AwsClientFactory, ClientFactory, ClientHandle, ClientIdentity, ClientOptions, ClientRequest,
    FactoryError,
};
pub use providers::{
    CallerIdentity, ExchangeError, ExchangeErrorKind, ExchangeRequest, IssuedCredentials,
    TokenService, sts::StsTokenService,
};
