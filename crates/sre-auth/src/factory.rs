//! Service client construction.
//!
//! A [`ClientHandle`] carries a fully resolved [`SdkConfig`]; any `aws-sdk-*`
//! client can be built from it with `Client::new(handle.sdk_config())`.

use crate::credentials::TemporaryCredentials;
use crate::error::Result;
use async_trait::async_trait;
use aws_config::profile::profile_file::ProfileFiles;
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::{BehaviorVersion, ConfigLoader, Region, SdkConfig};
use aws_credential_types::Credentials;
use aws_credential_types::provider::ProvideCredentials;
use aws_credential_types::provider::error::CredentialsError;
use aws_sdk_sts::error::DisplayErrorContext;
use aws_types::os_shim_internal::{Env, Fs};
use chrono::{DateTime, Utc};
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::debug;

/// Service identifiers the AWS factory will build clients for.
pub const KNOWN_SERVICES: &[&str] = &[
    "autoscaling",
    "ce",
    "cloudformation",
    "cloudtrail",
    "cloudwatch",
    "dynamodb",
    "ec2",
    "ecr",
    "ecs",
    "eks",
    "elasticache",
    "elbv2",
    "iam",
    "kms",
    "lambda",
    "logs",
    "organizations",
    "rds",
    "route53",
    "s3",
    "secretsmanager",
    "sns",
    "sqs",
    "ssm",
    "sts",
];

const CREDENTIALS_PROVIDER_NAME: &str = "sre-auth-broker";

/// Extra client settings passed through to the factory untouched by the broker.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientOptions {
    pub endpoint_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub operation_timeout: Option<Duration>,
}

impl ClientOptions {
    pub fn with_endpoint_url(mut self, url: impl Into<String>) -> Self {
        self.endpoint_url = Some(url.into());
        self
    }

    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = Some(attempts);
        self
    }

    pub fn with_operation_timeout(mut self, timeout: Duration) -> Self {
        self.operation_timeout = Some(timeout);
        self
    }
}

/// Identity a client is built with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientIdentity {
    /// Profile or environment chain of the running process.
    Ambient { profile: Option<String> },
    /// Temporary credentials obtained for a named role.
    AssumedRole {
        role_name: String,
        credentials: TemporaryCredentials,
    },
}

#[derive(Debug, Clone)]
pub struct ClientRequest {
    pub service: String,
    pub region: String,
    pub identity: ClientIdentity,
    pub options: ClientOptions,
}

/// An authenticated, ready-to-use client configuration owned by the caller.
#[derive(Debug, Clone)]
pub struct ClientHandle {
    service: String,
    region: String,
    identity: ClientIdentity,
    config: SdkConfig,
}

impl ClientHandle {
    pub fn new(
        service: impl Into<String>,
        region: impl Into<String>,
        identity: ClientIdentity,
        config: SdkConfig,
    ) -> Self {
        Self {
            service: service.into(),
            region: region.into(),
            identity,
            config,
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn identity(&self) -> &ClientIdentity {
        &self.identity
    }

    pub fn sdk_config(&self) -> &SdkConfig {
        &self.config
    }

    /// Assumed-role credentials, if the handle was built with them.
    pub fn credentials(&self) -> Option<&TemporaryCredentials> {
        match &self.identity {
            ClientIdentity::AssumedRole { credentials, .. } => Some(credentials),
            ClientIdentity::Ambient { .. } => None,
        }
    }

    pub fn role_name(&self) -> Option<&str> {
        match &self.identity {
            ClientIdentity::AssumedRole { role_name, .. } => Some(role_name),
            ClientIdentity::Ambient { .. } => None,
        }
    }

    /// Fail with `CredentialExpired` if the handle's assumed-role credentials
    /// have lapsed since it was handed out. Ambient identities refresh
    /// themselves and always pass.
    pub fn ensure_fresh(&self, now: DateTime<Utc>) -> Result<()> {
        match &self.identity {
            ClientIdentity::AssumedRole {
                role_name,
                credentials,
            } => credentials.ensure_fresh(now, Some(role_name)),
            ClientIdentity::Ambient { .. } => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Error)]
pub enum FactoryError {
    #[error("no credentials available: {0}")]
    NoCredentials(String),
    #[error("identity misconfigured: {0}")]
    Misconfigured(String),
    #[error("unknown service: {0}")]
    UnknownService(String),
    #[error("{0}")]
    Construction(String),
}

/// Builds client handles from resolved credentials or the ambient identity.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    async fn create(&self, request: ClientRequest) -> std::result::Result<ClientHandle, FactoryError>;
}

/// [`ClientFactory`] backed by `aws-config`.
#[derive(Debug, Clone, Default)]
pub struct AwsClientFactory {
    /// Skip the eager credential check for ambient identities.
    lazy_ambient: bool,
    /// Shared config and credentials files; the standard locations when unset.
    profile_files: Option<ProfileFiles>,
}

impl AwsClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defer ambient credential resolution to the first service call.
    pub fn with_lazy_ambient(mut self, lazy: bool) -> Self {
        self.lazy_ambient = lazy;
        self
    }

    /// Read profiles from these files instead of `~/.aws/config` and
    /// `~/.aws/credentials`.
    pub fn with_profile_files(mut self, files: ProfileFiles) -> Self {
        self.profile_files = Some(files);
        self
    }

    fn loader(&self, request: &ClientRequest) -> ConfigLoader {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(request.region.clone()));
        if let Some(files) = &self.profile_files {
            loader = loader.profile_files(files.clone());
        }

        match &request.identity {
            ClientIdentity::AssumedRole { credentials, .. } => {
                loader = loader.credentials_provider(sdk_credentials(credentials));
            }
            ClientIdentity::Ambient {
                profile: Some(profile),
            } => {
                loader = loader.profile_name(profile);
            }
            ClientIdentity::Ambient { profile: None } => {}
        }

        let options = &request.options;
        if let Some(url) = &options.endpoint_url {
            loader = loader.endpoint_url(url);
        }
        if let Some(attempts) = options.max_attempts {
            loader = loader.retry_config(RetryConfig::standard().with_max_attempts(attempts));
        }
        if let Some(timeout) = options.operation_timeout {
            loader = loader.timeout_config(TimeoutConfig::builder().operation_timeout(timeout).build());
        }
        loader
    }
}

#[async_trait]
impl ClientFactory for AwsClientFactory {
    async fn create(&self, request: ClientRequest) -> std::result::Result<ClientHandle, FactoryError> {
        if !is_known_service(&request.service) {
            return Err(FactoryError::UnknownService(request.service));
        }

        if let ClientIdentity::Ambient {
            profile: Some(profile),
        } = &request.identity
        {
            ensure_profile_defined(profile, self.profile_files.as_ref()).await?;
        }

        let config = self.loader(&request).load().await;

        if matches!(request.identity, ClientIdentity::Ambient { .. }) && !self.lazy_ambient {
            verify_ambient_credentials(&config).await?;
        }

        debug!(service = %request.service, region = %request.region, "AWS client configuration loaded");
        Ok(ClientHandle::new(
            request.service,
            request.region,
            request.identity,
            config,
        ))
    }
}

pub fn is_known_service(service: &str) -> bool {
    KNOWN_SERVICES.contains(&service)
}

/// Fail with [`FactoryError::Misconfigured`] unless `profile` is defined in
/// the shared config or credentials files.
///
/// The default provider chain skips an unknown profile and reports missing
/// credentials, which hides the actual mistake.
pub async fn ensure_profile_defined(
    profile: &str,
    files: Option<&ProfileFiles>,
) -> std::result::Result<(), FactoryError> {
    let files = files.cloned().unwrap_or_default();
    let profiles = aws_config::profile::load(&Fs::real(), &Env::real(), &files, None)
        .await
        .map_err(|e| FactoryError::Misconfigured(format!("could not load AWS profiles: {}", e)))?;

    if profiles.get_profile(profile).is_none() {
        debug!(profile, "AWS profile not found");
        return Err(FactoryError::Misconfigured(format!(
            "profile `{}` was not defined",
            profile
        )));
    }
    Ok(())
}

fn sdk_credentials(credentials: &TemporaryCredentials) -> Credentials {
    Credentials::new(
        credentials.access_key(),
        credentials.secret_key(),
        Some(credentials.session_token().to_string()),
        Some(SystemTime::from(credentials.expires_at())),
        CREDENTIALS_PROVIDER_NAME,
    )
}

async fn verify_ambient_credentials(config: &SdkConfig) -> std::result::Result<(), FactoryError> {
    let provider = config.credentials_provider().ok_or_else(|| {
        FactoryError::NoCredentials("no credentials provider configured".to_string())
    })?;

    match provider.provide_credentials().await {
        Ok(_) => Ok(()),
        Err(err) => Err(classify_credentials_error(&err)),
    }
}

fn classify_credentials_error(err: &CredentialsError) -> FactoryError {
    let detail = DisplayErrorContext(err).to_string();
    match err {
        CredentialsError::InvalidConfiguration { .. } => FactoryError::Misconfigured(detail),
        _ => FactoryError::NoCredentials(detail),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::IssuedCredentials;
    use aws_config::profile::profile_file::ProfileFileKind;
    use std::io::Write;

    fn profile_files(contents: &str) -> (tempfile::NamedTempFile, ProfileFiles) {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        let files = ProfileFiles::builder()
            .with_file(ProfileFileKind::Config, file.path())
            .build();
        (file, files)
    }

    fn ambient(profile: &str) -> ClientRequest {
        ClientRequest {
            service: "ec2".to_string(),
            region: "us-east-1".to_string(),
            identity: ClientIdentity::Ambient {
                profile: Some(profile.to_string()),
            },
            options: ClientOptions::default(),
        }
    }

    const SHARED_CONFIG: &str = "[default]\nregion = us-east-1\n\n[profile ops]\naws_access_key_id = AKIDEXAMPLE\naws_secret_access_key = example-secret\n";

    fn assumed(now: DateTime<Utc>) -> ClientIdentity {
        ClientIdentity::AssumedRole {
            role_name: "prod".to_string(),
            credentials: TemporaryCredentials::new(
                IssuedCredentials {
                    access_key: "ASIAEXAMPLE".to_string(),
                    secret_key: "secret".to_string(),
                    session_token: "token".to_string(),
                    expires_at: now + chrono::Duration::hours(1),
                },
                "us-east-1",
                now,
            )
            .unwrap(),
        }
    }

    #[test]
    fn test_known_services() {
        assert!(is_known_service("s3"));
        assert!(is_known_service("sts"));
        assert!(!is_known_service(""));
        assert!(!is_known_service("S3"));
        assert!(!is_known_service("not-a-service"));
    }

    #[tokio::test]
    async fn test_unknown_service_rejected() {
        let factory = AwsClientFactory::new();
        let err = factory
            .create(ClientRequest {
                service: "warp-drive".to_string(),
                region: "us-east-1".to_string(),
                identity: assumed(Utc::now()),
                options: ClientOptions::default(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, FactoryError::UnknownService(ref s) if s == "warp-drive"));
    }

    #[tokio::test]
    async fn test_assumed_role_handle_uses_static_credentials() {
        let now = Utc::now();
        let factory = AwsClientFactory::new();
        let handle = factory
            .create(ClientRequest {
                service: "ec2".to_string(),
                region: "eu-west-1".to_string(),
                identity: assumed(now),
                options: ClientOptions::default().with_endpoint_url("http://localhost:4566"),
            })
            .await
            .unwrap();

        assert_eq!(handle.service(), "ec2");
        assert_eq!(handle.region(), "eu-west-1");
        assert_eq!(handle.role_name(), Some("prod"));
        assert_eq!(
            handle.sdk_config().region().map(|r| r.as_ref()),
            Some("eu-west-1")
        );
        assert_eq!(handle.sdk_config().endpoint_url(), Some("http://localhost:4566"));

        let provider = handle.sdk_config().credentials_provider().unwrap();
        let resolved = provider.provide_credentials().await.unwrap();
        assert_eq!(resolved.access_key_id(), "ASIAEXAMPLE");
        assert_eq!(resolved.session_token(), Some("token"));
    }

    #[tokio::test]
    async fn test_lazy_ambient_skips_credential_check() {
        let factory = AwsClientFactory::new().with_lazy_ambient(true);
        let handle = factory
            .create(ClientRequest {
                service: "s3".to_string(),
                region: "ap-southeast-2".to_string(),
                identity: ClientIdentity::Ambient { profile: None },
                options: ClientOptions::default()
                    .with_max_attempts(1)
                    .with_operation_timeout(Duration::from_secs(5)),
            })
            .await
            .unwrap();

        assert_eq!(handle.region(), "ap-southeast-2");
        assert!(handle.credentials().is_none());
        assert_eq!(handle.role_name(), None);
    }

    #[tokio::test]
    async fn test_undefined_profile_is_misconfigured() {
        let (_file, files) = profile_files(SHARED_CONFIG);
        let factory = AwsClientFactory::new().with_profile_files(files);

        let err = factory.create(ambient("does-not-exist")).await.unwrap_err();
        assert!(
            matches!(err, FactoryError::Misconfigured(ref msg) if msg.contains("does-not-exist")),
            "unexpected error: {err:?}"
        );
    }

    #[tokio::test]
    async fn test_undefined_profile_rejected_even_when_lazy() {
        let (_file, files) = profile_files(SHARED_CONFIG);
        let factory = AwsClientFactory::new()
            .with_lazy_ambient(true)
            .with_profile_files(files);

        let err = factory.create(ambient("does-not-exist")).await.unwrap_err();
        assert!(matches!(err, FactoryError::Misconfigured(_)));
    }

    #[tokio::test]
    async fn test_defined_profile_resolves() {
        let (_file, files) = profile_files(SHARED_CONFIG);
        let factory = AwsClientFactory::new().with_profile_files(files);

        let handle = factory.create(ambient("ops")).await.unwrap();
        assert_eq!(
            handle.identity(),
            &ClientIdentity::Ambient {
                profile: Some("ops".to_string())
            }
        );
    }

    #[tokio::test]
    async fn test_ensure_profile_defined() {
        let (_file, files) = profile_files(SHARED_CONFIG);
        assert!(ensure_profile_defined("ops", Some(&files)).await.is_ok());
        assert!(ensure_profile_defined("default", Some(&files)).await.is_ok());
        assert!(ensure_profile_defined("prod", Some(&files)).await.is_err());

        let (_empty, no_profiles) = profile_files("");
        assert!(matches!(
            ensure_profile_defined("ops", Some(&no_profiles)).await,
            Err(FactoryError::Misconfigured(_))
        ));
    }

    #[test]
    fn test_handle_ensure_fresh() {
        let now = Utc::now();
        let config = SdkConfig::builder()
            .region(Region::new("us-east-1"))
            .behavior_version(BehaviorVersion::latest())
            .build();
        let handle = ClientHandle::new("s3", "us-east-1", assumed(now), config.clone());

        assert!(handle.ensure_fresh(now).is_ok());
        assert_eq!(
            handle
                .ensure_fresh(now + chrono::Duration::hours(2))
                .unwrap_err()
                .code(),
            "CREDENTIALS_EXPIRED"
        );

        let ambient = ClientHandle::new("s3", "us-east-1", ClientIdentity::Ambient { profile: None }, config);
        assert!(ambient.ensure_fresh(now + chrono::Duration::days(365)).is_ok());
        assert!(ambient.credentials().is_none());
    }
}
