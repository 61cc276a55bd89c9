//! AWS STS token exchange.

use super::{
    CallerIdentity, ExchangeError, ExchangeErrorKind, ExchangeRequest, IssuedCredentials,
    TokenService,
};
use crate::factory::{ClientHandle, ensure_profile_defined};
use async_trait::async_trait;
use aws_config::profile::profile_file::ProfileFiles;
use aws_config::{BehaviorVersion, Region, SdkConfig};
use aws_credential_types::provider::error::CredentialsError;
use aws_sdk_sts::Client;
use aws_sdk_sts::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use chrono::{DateTime, Utc};
use std::error::Error as StdError;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// STS-backed [`TokenService`].
///
/// The STS client signing the exchange is built on first use from the
/// ambient identity (named profile if given, else the default chain).
pub struct StsTokenService {
    region: String,
    profile: Option<String>,
    profile_files: Option<ProfileFiles>,
    client: OnceCell<Client>,
}

impl StsTokenService {
    pub fn new(region: impl Into<String>, profile: Option<String>) -> Self {
        Self {
            region: region.into(),
            profile,
            profile_files: None,
            client: OnceCell::new(),
        }
    }

    /// Resolve the named profile from these files instead of the standard
    /// shared config locations.
    pub fn with_profile_files(mut self, files: ProfileFiles) -> Self {
        self.profile_files = Some(files);
        self
    }

    /// Use an already loaded SDK configuration for the exchange client.
    pub fn from_sdk_config(config: &SdkConfig) -> Self {
        Self {
            region: config
                .region()
                .map(|r| r.to_string())
                .unwrap_or_else(|| crate::config::DEFAULT_REGION.to_string()),
            profile: None,
            profile_files: None,
            client: OnceCell::new_with(Some(Client::new(config))),
        }
    }

    async fn client(&self) -> Result<&Client, ExchangeError> {
        self.client
            .get_or_try_init(|| async {
                let mut loader = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.region.clone()));
                if let Some(files) = &self.profile_files {
                    loader = loader.profile_files(files.clone());
                }
                if let Some(profile) = &self.profile {
                    ensure_profile_defined(profile, self.profile_files.as_ref())
                        .await
                        .map_err(|e| {
                            warn!(profile = %profile, "AWS profile for the exchange client is not defined");
                            ExchangeError::new(ExchangeErrorKind::InvalidProfile, e.to_string())
                        })?;
                    loader = loader.profile_name(profile);
                }
                debug!(region = %self.region, profile = ?self.profile, "STS client created");
                Ok::<_, ExchangeError>(Client::new(&loader.load().await))
            })
            .await
    }
}

#[async_trait]
impl TokenService for StsTokenService {
    async fn assume_role(
        &self,
        request: ExchangeRequest,
    ) -> Result<IssuedCredentials, ExchangeError> {
        info!(
            role_arn = %request.role_arn,
            session = %request.session_name,
            duration = request.duration_seconds,
            "Assuming role"
        );

        let duration = i32::try_from(request.duration_seconds).map_err(|_| {
            ExchangeError::new(
                ExchangeErrorKind::InvalidParameter,
                format!("duration {} out of range", request.duration_seconds),
            )
        })?;

        let response = self
            .client()
            .await?
            .assume_role()
            .role_arn(&request.role_arn)
            .role_session_name(&request.session_name)
            .duration_seconds(duration)
            .set_external_id(request.external_id.clone())
            .send()
            .await
            .map_err(|e| map_sdk_error("AssumeRole", e))?;

        let creds = response.credentials().ok_or_else(|| {
            ExchangeError::new(ExchangeErrorKind::Other, "AWS STS returned no credentials")
        })?;

        let expiration = creds.expiration();
        let expires_at = DateTime::<Utc>::from_timestamp(expiration.secs(), expiration.subsec_nanos())
            .ok_or_else(|| {
                ExchangeError::new(
                    ExchangeErrorKind::Other,
                    format!("unrepresentable expiration timestamp: {:?}", expiration),
                )
            })?;

        info!(role_arn = %request.role_arn, expires_at = %expires_at, "Successfully assumed role");

        Ok(IssuedCredentials {
            access_key: creds.access_key_id().to_string(),
            secret_key: creds.secret_access_key().to_string(),
            session_token: creds.session_token().to_string(),
            expires_at,
        })
    }

    async fn caller_identity(&self, handle: &ClientHandle) -> Result<CallerIdentity, ExchangeError> {
        let response = Client::new(handle.sdk_config())
            .get_caller_identity()
            .send()
            .await
            .map_err(|e| map_sdk_error("GetCallerIdentity", e))?;

        Ok(CallerIdentity {
            account: response.account().map(str::to_string),
            user_id: response.user_id().map(str::to_string),
            arn: response.arn().map(str::to_string),
        })
    }
}

/// Map an SDK failure into the exchange taxonomy.
fn map_sdk_error<E, R>(operation: &str, err: SdkError<E, R>) -> ExchangeError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    if let Some(code) = err.code() {
        let error = ExchangeError::from_code(code, err.message().unwrap_or("no message provided"));
        warn!(operation, code = %code, kind = ?error.kind, "AWS STS rejected request");
        return error;
    }

    let detail = DisplayErrorContext(&err).to_string();
    if caused_by_missing_credentials(&err) {
        warn!(operation, "No AWS credentials available to sign request");
        return ExchangeError::new(ExchangeErrorKind::MissingCredentials, detail);
    }

    warn!(operation, error = %detail, "AWS STS request failed");
    ExchangeError::new(ExchangeErrorKind::Other, format!("{} failed: {}", operation, detail))
}

fn caused_by_missing_credentials(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if e.downcast_ref::<CredentialsError>().is_some() {
            return true;
        }
        current = e.source();
    }
    false
}
