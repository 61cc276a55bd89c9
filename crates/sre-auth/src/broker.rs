//! The credential broker.

use crate::clock::{Clock, SystemClock};
use crate::config::{BrokerConfig, MAX_SESSION_LABEL_LEN, RoleBinding};
use crate::credentials::{CacheEntry, CacheInfo, TemporaryCredentials};
use crate::error::{AuthError, Result};
use crate::factory::{
    AwsClientFactory, ClientFactory, ClientHandle, ClientIdentity, ClientOptions, ClientRequest,
};
use crate::providers::sts::StsTokenService;
use crate::providers::{ExchangeRequest, TokenService};
use chrono::Duration;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, Semaphore};
use tracing::{debug, error, info, warn};

/// Which identity a client should be built with.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum RoleSelector {
    /// The ambient identity of the process.
    #[default]
    Default,
    /// A configured role binding, by name.
    Named(String),
}

impl RoleSelector {
    pub fn role_name(&self) -> Option<&str> {
        match self {
            RoleSelector::Default => None,
            RoleSelector::Named(name) => Some(name),
        }
    }
}

/// A blank name selects the ambient identity.
impl From<&str> for RoleSelector {
    fn from(name: &str) -> Self {
        if name.trim().is_empty() {
            RoleSelector::Default
        } else {
            RoleSelector::Named(name.to_string())
        }
    }
}

/// A blank name selects the ambient identity.
impl From<String> for RoleSelector {
    fn from(name: String) -> Self {
        if name.trim().is_empty() {
            RoleSelector::Default
        } else {
            RoleSelector::Named(name)
        }
    }
}

impl<T: Into<RoleSelector>> From<Option<T>> for RoleSelector {
    fn from(name: Option<T>) -> Self {
        name.map(Into::into).unwrap_or_default()
    }
}

/// Outcome of a successful credential test.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentitySummary {
    pub account: Option<String>,
    pub user_id: Option<String>,
    pub arn: Option<String>,
    pub role_name: Option<String>,
}

/// Hands out authenticated AWS clients, assuming configured roles on demand
/// and caching the resulting credentials per role.
///
/// Cloning is cheap; clones share configuration, cache and collaborators.
#[derive(Clone)]
pub struct CredentialBroker {
    inner: Arc<BrokerInner>,
}

struct BrokerInner {
    config: RwLock<BrokerConfig>,
    cache: RwLock<HashMap<String, CacheEntry>>,
    /// One lock per role so a burst of misses triggers a single exchange.
    refresh_locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
    exchange_permits: Semaphore,
    sequence: AtomicU64,
    token_service: Arc<dyn TokenService>,
    client_factory: Arc<dyn ClientFactory>,
    clock: Arc<dyn Clock>,
}

impl CredentialBroker {
    /// Create a broker with the given collaborators and the wall clock.
    pub fn new(
        config: BrokerConfig,
        token_service: Arc<dyn TokenService>,
        client_factory: Arc<dyn ClientFactory>,
    ) -> Result<Self> {
        Self::with_clock(config, token_service, client_factory, Arc::new(SystemClock))
    }

    /// Create a broker with an explicit time source.
    pub fn with_clock(
        config: BrokerConfig,
        token_service: Arc<dyn TokenService>,
        client_factory: Arc<dyn ClientFactory>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        if config.enable_role_chaining {
            warn!("Role chaining is not supported; enable_role_chaining has no effect");
        }

        info!(
            region = %config.default_region,
            roles = config.list_roles().len(),
            caching = config.enable_caching,
            cache_ttl = config.cache_ttl_seconds,
            "Credential broker initialized"
        );

        let exchange_permits = Semaphore::new(config.max_concurrent_exchanges);
        Ok(Self {
            inner: Arc::new(BrokerInner {
                config: RwLock::new(config),
                cache: RwLock::new(HashMap::new()),
                refresh_locks: StdMutex::new(HashMap::new()),
                exchange_permits,
                sequence: AtomicU64::new(0),
                token_service,
                client_factory,
                clock,
            }),
        })
    }

    /// Create a broker backed by AWS STS and the `aws-config` client factory.
    pub fn from_config(config: BrokerConfig) -> Result<Self> {
        let token_service =
            StsTokenService::new(config.default_region.clone(), config.default_profile.clone());
        Self::new(
            config,
            Arc::new(token_service),
            Arc::new(AwsClientFactory::new()),
        )
    }

    /// Create an AWS-backed broker configured from `AWS_AUTH_*` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_config(BrokerConfig::from_env()?)
    }

    /// Snapshot of the current configuration.
    pub async fn config(&self) -> BrokerConfig {
        self.inner.config.read().await.clone()
    }

    /// Build a client for `service`.
    ///
    /// With [`RoleSelector::Default`] the ambient identity is used and nothing
    /// is cached. With a named role, valid cached credentials are reused and
    /// otherwise refreshed before the client is built. `region` overrides the
    /// configured default region for the client only.
    pub async fn get_client(
        &self,
        service: &str,
        role: impl Into<RoleSelector>,
        region: Option<&str>,
        options: ClientOptions,
    ) -> Result<ClientHandle> {
        if service.trim().is_empty() {
            return Err(AuthError::ClientCreationFailed {
                service: service.to_string(),
                message: "service name must not be empty".to_string(),
            });
        }

        let (region, profile) = {
            let config = self.inner.config.read().await;
            (
                region
                    .map(str::to_string)
                    .unwrap_or_else(|| config.default_region.clone()),
                config.default_profile.clone(),
            )
        };

        let role: RoleSelector = role.into();
        let identity = match role {
            RoleSelector::Default => {
                debug!(service = %service, profile = ?profile, "Using ambient credentials");
                ClientIdentity::Ambient { profile }
            }
            RoleSelector::Named(name) => {
                let credentials = self.resolve_credentials(&name).await?;
                ClientIdentity::AssumedRole {
                    role_name: name,
                    credentials,
                }
            }
        };

        let role_name = match &identity {
            ClientIdentity::AssumedRole { role_name, .. } => Some(role_name.clone()),
            ClientIdentity::Ambient { .. } => None,
        };

        let handle = self
            .inner
            .client_factory
            .create(ClientRequest {
                service: service.to_string(),
                region: region.clone(),
                identity,
                options,
            })
            .await
            .map_err(|e| {
                let err = AuthError::from_factory(e, service);
                error!(service = %service, error = %err, "Failed to create AWS client");
                err
            })?;

        info!(service = %service, region = %region, role = ?role_name, "Created AWS client");
        Ok(handle)
    }

    /// Force a new token exchange for `role_name`, replacing any cached entry.
    pub async fn refresh(&self, role_name: &str) -> Result<()> {
        self.binding(role_name).await?;
        let guard = self.inner.role_lock(role_name).lock_owned().await;
        // Re-read under the lock so a concurrent add_role is honoured
        let binding = self.binding(role_name).await?;
        self.exchange(binding, Some(guard)).await.map(|_| ())
    }

    /// Verify an identity works by asking STS who it is.
    pub async fn test_credentials(&self, role: impl Into<RoleSelector>) -> Result<IdentitySummary> {
        let role: RoleSelector = role.into();
        let role_name = role.role_name().map(str::to_string);

        let handle = self
            .get_client("sts", role, None, ClientOptions::default())
            .await?;

        let identity = self
            .inner
            .token_service
            .caller_identity(&handle)
            .await
            .map_err(|e| {
                let err = AuthError::from_service_call(e, "credential test");
                error!(role = ?role_name, error = %err, "Credential test failed");
                err
            })?;

        info!(
            role = ?role_name,
            account = ?identity.account,
            arn = ?identity.arn,
            "Credential test successful"
        );

        Ok(IdentitySummary {
            account: identity.account,
            user_id: identity.user_id,
            arn: identity.arn,
            role_name,
        })
    }

    /// Drop cached credentials for one role, or for every role.
    pub async fn clear_cache(&self, role_name: Option<&str>) {
        let mut cache = self.inner.cache.write().await;
        match role_name {
            Some(name) => {
                if cache.remove(name).is_some() {
                    info!(role = %name, "Cleared credential cache for role");
                }
            }
            None => {
                cache.clear();
                info!("Cleared all credential cache");
            }
        }
    }

    /// Per-role cache state, with validity computed at call time.
    pub async fn cache_info(&self) -> BTreeMap<String, CacheInfo> {
        let ttl = self.cache_ttl().await;
        let now = self.inner.clock.now();
        let cache = self.inner.cache.read().await;

        cache
            .iter()
            .map(|(name, entry)| (name.clone(), entry.info(now, ttl)))
            .collect()
    }

    /// Register or replace a role binding. A replaced role's cached
    /// credentials are discarded.
    ///
    /// Waits for any in-flight exchange for the role so its result cannot
    /// land in the cache after the eviction.
    pub async fn add_role(&self, binding: RoleBinding) {
        let name = binding.name().to_string();
        let _guard = self.inner.role_lock(&name).lock_owned().await;
        self.inner.config.write().await.add_role(binding);
        if self.inner.cache.write().await.remove(&name).is_some() {
            info!(role = %name, "Replaced role binding, cached credentials dropped");
        }
    }

    /// Names of the configured roles.
    pub async fn roles(&self) -> Vec<String> {
        self.inner.config.read().await.list_roles()
    }

    async fn binding(&self, role_name: &str) -> Result<RoleBinding> {
        self.inner
            .config
            .read()
            .await
            .get_role(role_name)
            .cloned()
            .ok_or_else(|| AuthError::RoleNotFound(role_name.to_string()))
    }

    async fn cache_ttl(&self) -> Duration {
        let seconds = self.inner.config.read().await.cache_ttl_seconds;
        Duration::seconds(i64::try_from(seconds).unwrap_or(i64::MAX))
    }

    async fn resolve_credentials(&self, role_name: &str) -> Result<TemporaryCredentials> {
        if !self.inner.config.read().await.enable_caching {
            let binding = self.binding(role_name).await?;
            return self.exchange(binding, None).await;
        }

        if let Some(credentials) = self.cached(role_name).await {
            debug!(role = %role_name, "Using cached credentials");
            return Ok(credentials);
        }

        // Unknown roles fail before a lock is allocated for them
        self.binding(role_name).await?;
        let guard = self.inner.role_lock(role_name).lock_owned().await;

        // Another caller may have refreshed while we waited
        if let Some(credentials) = self.cached(role_name).await {
            debug!(role = %role_name, "Using credentials refreshed by a concurrent caller");
            return Ok(credentials);
        }

        let binding = self.binding(role_name).await?;
        self.exchange(binding, Some(guard)).await
    }

    async fn cached(&self, role_name: &str) -> Option<TemporaryCredentials> {
        let ttl = self.cache_ttl().await;
        let now = self.inner.clock.now();
        let cache = self.inner.cache.read().await;
        cache
            .get(role_name)
            .filter(|entry| entry.is_valid(now, ttl))
            .map(|entry| entry.credentials.clone())
    }

    /// Run the exchange on its own task so that it completes, and fills the
    /// cache, even if the caller is dropped. The role lock travels with it.
    async fn exchange(
        &self,
        binding: RoleBinding,
        guard: Option<OwnedMutexGuard<()>>,
    ) -> Result<TemporaryCredentials> {
        let inner = Arc::clone(&self.inner);
        let role_name = binding.name().to_string();

        let task = tokio::spawn(async move {
            let _guard = guard;
            let _permit = inner
                .exchange_permits
                .acquire()
                .await
                .map_err(|_| AuthError::Internal("exchange limiter closed".to_string()))?;
            inner.exchange_and_store(&binding).await
        });

        task.await.map_err(|e| {
            error!(role = %role_name, error = %e, "Credential exchange task failed");
            AuthError::Internal(format!("credential exchange for role {} aborted: {}", role_name, e))
        })?
    }
}

impl BrokerInner {
    fn role_lock(&self, role_name: &str) -> Arc<Mutex<()>> {
        let mut locks = self.refresh_locks.lock().unwrap_or_else(|e| e.into_inner());
        Arc::clone(locks.entry(role_name.to_string()).or_default())
    }

    async fn exchange_and_store(&self, binding: &RoleBinding) -> Result<TemporaryCredentials> {
        let request = ExchangeRequest {
            role_arn: binding.role_arn().to_string(),
            session_name: session_name(
                binding.session_label(),
                self.clock.now().timestamp(),
                self.sequence.fetch_add(1, Ordering::Relaxed),
            ),
            duration_seconds: binding.duration_seconds(),
            external_id: binding.external_id().map(str::to_string),
        };

        info!(
            role = %binding.name(),
            role_arn = %binding.role_arn(),
            session = %request.session_name,
            "Refreshing credentials"
        );

        let issued = self.token_service.assume_role(request).await.map_err(|e| {
            let err = AuthError::from_exchange(e, binding.role_arn(), binding.name());
            error!(role = %binding.name(), code = %err.code(), error = %err, "Failed to assume role");
            err
        })?;

        let (region, caching) = {
            let config = self.config.read().await;
            (config.default_region.clone(), config.enable_caching)
        };

        let now = self.clock.now();
        let credentials = TemporaryCredentials::new(issued, region, now).map_err(|e| match e {
            AuthError::CredentialExpired { message, .. } => AuthError::CredentialExpired {
                message,
                role_name: Some(binding.name().to_string()),
            },
            other => other,
        })?;

        if caching {
            self.cache.write().await.insert(
                binding.name().to_string(),
                CacheEntry::new(credentials.clone(), now),
            );
        }

        info!(
            role = %binding.name(),
            expires_at = %credentials.expires_at().to_rfc3339(),
            "Successfully refreshed credentials"
        );
        Ok(credentials)
    }
}

/// `<label>-<unix seconds>-<sequence>`, with the label shortened so the
/// result stays within the session name limit.
fn session_name(label: &str, unix_seconds: i64, sequence: u64) -> String {
    let suffix = format!("-{}-{}", unix_seconds, sequence);
    let keep = MAX_SESSION_LABEL_LEN
        .saturating_sub(suffix.len())
        .min(label.len());
    let base = label.get(..keep).unwrap_or(label);
    format!("{}{}", base, suffix)
}
