//! Broker configuration and role bindings.
//!
//! Role bindings are validated when they are built and are immutable
//! afterwards. [`BrokerConfig`] can be assembled in code, loaded from the
//! `AWS_AUTH_*` environment variables, or read from a YAML file.

use crate::error::{AuthError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::LazyLock;
use tracing::{info, warn};

pub const DEFAULT_REGION: &str = "us-east-1";
pub const DEFAULT_SESSION_LABEL: &str = "SREBotSession";
pub const MAX_SESSION_LABEL_LEN: usize = 64;

pub const MIN_SESSION_DURATION_SECS: u32 = 900;
pub const MAX_SESSION_DURATION_SECS: u32 = 43_200;
pub const DEFAULT_SESSION_DURATION_SECS: u32 = 3600;

pub const MIN_CACHE_TTL_SECS: u64 = 300;
pub const MAX_CACHE_TTL_SECS: u64 = 43_200;
pub const DEFAULT_CACHE_TTL_SECS: u64 = 3000;

pub const DEFAULT_MAX_CONCURRENT_EXCHANGES: usize = 10;

const ROLE_ARN_PREFIX: &str = "arn:aws:iam::";

static SESSION_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9+=,.@-]+$").expect("valid session label pattern"));

/// A named, validated target role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoleBinding {
    name: String,
    role_arn: String,
    account_id: String,
    session_label: String,
    duration_seconds: u32,
    #[serde(skip_serializing_if = "Option::is_none", serialize_with = "mask_secret")]
    external_id: Option<String>,
}

/// Shared secrets are shown as present, never in clear text.
fn mask_secret<S: serde::Serializer>(
    value: &Option<String>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match value {
        Some(_) => serializer.serialize_str("***"),
        None => serializer.serialize_none(),
    }
}

impl RoleBinding {
    pub fn builder(
        name: impl Into<String>,
        role_arn: impl Into<String>,
        account_id: impl Into<String>,
    ) -> RoleBindingBuilder {
        RoleBindingBuilder::new(name, role_arn, account_id)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn role_arn(&self) -> &str {
        &self.role_arn
    }

    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn session_label(&self) -> &str {
        &self.session_label
    }

    pub fn duration_seconds(&self) -> u32 {
        self.duration_seconds
    }

    pub fn external_id(&self) -> Option<&str> {
        self.external_id.as_deref()
    }
}

/// Builder for [`RoleBinding`]; all validation happens in [`build`](Self::build).
#[derive(Debug, Clone)]
pub struct RoleBindingBuilder {
    name: String,
    role_arn: String,
    account_id: String,
    session_label: String,
    duration_seconds: u32,
    external_id: Option<String>,
}

impl RoleBindingBuilder {
    pub fn new(
        name: impl Into<String>,
        role_arn: impl Into<String>,
        account_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            role_arn: role_arn.into(),
            account_id: account_id.into(),
            session_label: DEFAULT_SESSION_LABEL.to_string(),
            duration_seconds: DEFAULT_SESSION_DURATION_SECS,
            external_id: None,
        }
    }

    pub fn session_label(mut self, label: impl Into<String>) -> Self {
        self.session_label = label.into();
        self
    }

    pub fn duration_seconds(mut self, seconds: u32) -> Self {
        self.duration_seconds = seconds;
        self
    }

    pub fn external_id(mut self, external_id: impl Into<String>) -> Self {
        self.external_id = Some(external_id.into());
        self
    }

    pub fn build(self) -> Result<RoleBinding> {
        if self.name.trim().is_empty() {
            return Err(AuthError::config_field("name", "role name must not be empty"));
        }
        validate_role_arn(&self.role_arn)?;
        validate_account_id(&self.account_id)?;
        validate_session_label(&self.session_label)?;
        validate_duration(self.duration_seconds)?;

        Ok(RoleBinding {
            name: self.name,
            role_arn: self.role_arn,
            account_id: self.account_id,
            session_label: self.session_label,
            duration_seconds: self.duration_seconds,
            external_id: self.external_id,
        })
    }
}

fn validate_role_arn(arn: &str) -> Result<()> {
    if !arn.starts_with(ROLE_ARN_PREFIX) {
        return Err(AuthError::config_field(
            "role_arn",
            "role_arn must be a valid IAM role ARN starting with arn:aws:iam::",
        ));
    }
    if !arn.contains(":role/") {
        return Err(AuthError::config_field(
            "role_arn",
            "role_arn must contain :role/ and specify a role name",
        ));
    }
    Ok(())
}

fn validate_account_id(account_id: &str) -> Result<()> {
    if account_id.len() != 12 || !account_id.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AuthError::config_field(
            "account_id",
            "account_id must be a 12-digit string",
        ));
    }
    Ok(())
}

fn validate_session_label(label: &str) -> Result<()> {
    if !SESSION_LABEL_RE.is_match(label) {
        return Err(AuthError::config_field(
            "role_session_name",
            "role_session_name can only contain alphanumeric characters and +=,.@-",
        ));
    }
    if label.len() > MAX_SESSION_LABEL_LEN {
        return Err(AuthError::config_field(
            "role_session_name",
            "role_session_name must be 64 characters or less",
        ));
    }
    Ok(())
}

fn validate_duration(seconds: u32) -> Result<()> {
    if !(MIN_SESSION_DURATION_SECS..=MAX_SESSION_DURATION_SECS).contains(&seconds) {
        return Err(AuthError::config_field(
            "duration_seconds",
            format!(
                "duration_seconds must be between {} and {}, got {}",
                MIN_SESSION_DURATION_SECS, MAX_SESSION_DURATION_SECS, seconds
            ),
        ));
    }
    Ok(())
}

fn validate_cache_ttl(seconds: u64) -> Result<()> {
    if !(MIN_CACHE_TTL_SECS..=MAX_CACHE_TTL_SECS).contains(&seconds) {
        return Err(AuthError::config_field(
            "cache_ttl_seconds",
            format!(
                "cache_ttl_seconds must be between {} and {}, got {}",
                MIN_CACHE_TTL_SECS, MAX_CACHE_TTL_SECS, seconds
            ),
        ));
    }
    Ok(())
}

/// Role fields as they appear in `AWS_AUTH_ROLES` or a config file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RoleBindingSpec {
    pub role_arn: String,
    pub account_id: String,
    #[serde(default = "default_session_label", alias = "session_label")]
    pub role_session_name: String,
    #[serde(default = "default_duration")]
    pub duration_seconds: u32,
    #[serde(default)]
    pub external_id: Option<String>,
}

fn default_session_label() -> String {
    DEFAULT_SESSION_LABEL.to_string()
}

fn default_duration() -> u32 {
    DEFAULT_SESSION_DURATION_SECS
}

impl RoleBindingSpec {
    pub fn into_binding(self, name: impl Into<String>) -> Result<RoleBinding> {
        let mut builder = RoleBinding::builder(name, self.role_arn, self.account_id)
            .session_label(self.role_session_name)
            .duration_seconds(self.duration_seconds);
        if let Some(external_id) = self.external_id {
            builder = builder.external_id(external_id);
        }
        builder.build()
    }
}

/// Process-wide broker settings.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerConfig {
    /// Region for credentials and for clients without an explicit override.
    pub default_region: String,
    /// Named profile for the ambient identity.
    pub default_profile: Option<String>,
    pub enable_caching: bool,
    /// Administrative TTL, independent of the credentials' own expiry.
    pub cache_ttl_seconds: u64,
    /// Reserved. Role chaining is not implemented and the flag has no effect.
    pub enable_role_chaining: bool,
    /// Upper bound on concurrent outbound token exchanges.
    pub max_concurrent_exchanges: usize,
    roles: BTreeMap<String, RoleBinding>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            default_region: DEFAULT_REGION.to_string(),
            default_profile: None,
            enable_caching: true,
            cache_ttl_seconds: DEFAULT_CACHE_TTL_SECS,
            enable_role_chaining: false,
            max_concurrent_exchanges: DEFAULT_MAX_CONCURRENT_EXCHANGES,
            roles: BTreeMap::new(),
        }
    }
}

impl BrokerConfig {
    pub fn new(default_region: impl Into<String>) -> Self {
        Self {
            default_region: default_region.into(),
            ..Default::default()
        }
    }

    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.default_profile = Some(profile.into());
        self
    }

    pub fn with_caching(mut self, enable: bool) -> Self {
        self.enable_caching = enable;
        self
    }

    pub fn with_cache_ttl(mut self, seconds: u64) -> Result<Self> {
        validate_cache_ttl(seconds)?;
        self.cache_ttl_seconds = seconds;
        Ok(self)
    }

    pub fn with_max_concurrent_exchanges(mut self, max: usize) -> Self {
        self.max_concurrent_exchanges = max;
        self
    }

    pub fn with_role(mut self, binding: RoleBinding) -> Self {
        self.add_role(binding);
        self
    }

    /// Register a role, replacing any binding with the same name.
    pub fn add_role(&mut self, binding: RoleBinding) {
        info!(role = %binding.name(), "Added role configuration");
        self.roles.insert(binding.name().to_string(), binding);
    }

    pub fn get_role(&self, name: &str) -> Option<&RoleBinding> {
        self.roles.get(name)
    }

    pub fn list_roles(&self) -> Vec<String> {
        self.roles.keys().cloned().collect()
    }

    pub fn roles(&self) -> impl Iterator<Item = &RoleBinding> {
        self.roles.values()
    }

    /// Check the settings that can be set directly on the public fields.
    pub fn validate(&self) -> Result<()> {
        if self.default_region.trim().is_empty() {
            return Err(AuthError::config_field(
                "default_region",
                "default_region must not be empty",
            ));
        }
        validate_cache_ttl(self.cache_ttl_seconds)?;
        if self.max_concurrent_exchanges == 0 {
            return Err(AuthError::config_field(
                "max_concurrent_exchanges",
                "max_concurrent_exchanges must be at least 1",
            ));
        }
        Ok(())
    }

    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key source using the
    /// `AWS_AUTH_*` variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let mut config = Self::default();

        if let Some(region) = get("AWS_AUTH_DEFAULT_REGION").or_else(|| get("AWS_REGION")) {
            config.default_region = region;
        }
        config.default_profile = get("AWS_AUTH_DEFAULT_PROFILE").or_else(|| get("AWS_PROFILE"));

        if let Some(value) = get("AWS_AUTH_ENABLE_CACHING") {
            config.enable_caching = parse_flag(&value);
        }

        if let Some(value) = get("AWS_AUTH_CACHE_TTL") {
            match value.trim().parse::<u64>() {
                Ok(ttl) => config.cache_ttl_seconds = ttl,
                Err(_) => warn!(value = %value, "Invalid AWS_AUTH_CACHE_TTL value, using default"),
            }
        }

        if let Some(value) = get("AWS_AUTH_ENABLE_ROLE_CHAINING") {
            config.enable_role_chaining = parse_flag(&value);
        }

        if let Some(value) = get("AWS_AUTH_MAX_CONCURRENT_EXCHANGES") {
            match value.trim().parse::<usize>() {
                Ok(max) if max > 0 => config.max_concurrent_exchanges = max,
                _ => warn!(
                    value = %value,
                    "Invalid AWS_AUTH_MAX_CONCURRENT_EXCHANGES value, using default"
                ),
            }
        }

        if let Some(roles_json) = get("AWS_AUTH_ROLES") {
            match parse_role_table(&roles_json) {
                Ok(roles) => {
                    info!(count = roles.len(), "Loaded role configurations from environment");
                    config.roles = roles;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to parse AWS_AUTH_ROLES, continuing without roles");
                    config.roles.clear();
                }
            }
        }

        if let (Some(role_arn), Some(account_id)) = (
            get("AWS_AUTH_DEFAULT_ROLE_ARN"),
            get("AWS_AUTH_DEFAULT_ACCOUNT_ID"),
        ) {
            let name = get("AWS_AUTH_DEFAULT_ROLE_NAME").unwrap_or_else(|| "default".to_string());
            let duration = match get("AWS_AUTH_DEFAULT_DURATION") {
                Some(raw) => raw.trim().parse::<u32>().map_err(|_| {
                    AuthError::config_field(
                        "duration_seconds",
                        format!("AWS_AUTH_DEFAULT_DURATION is not an integer: {}", raw),
                    )
                })?,
                None => DEFAULT_SESSION_DURATION_SECS,
            };

            let mut builder = RoleBinding::builder(&name, role_arn, account_id)
                .session_label(
                    get("AWS_AUTH_DEFAULT_SESSION_NAME")
                        .unwrap_or_else(|| DEFAULT_SESSION_LABEL.to_string()),
                )
                .duration_seconds(duration);
            if let Some(external_id) = get("AWS_AUTH_DEFAULT_EXTERNAL_ID") {
                builder = builder.external_id(external_id);
            }

            config.roles.insert(name.clone(), builder.build()?);
            info!(role = %name, "Configured default role");
        }

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file. Unlike the environment loader,
    /// an invalid role in an explicit file is an error.
    pub fn from_file(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            AuthError::config(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self> {
        let file: BrokerConfigFile = serde_yaml::from_str(contents)
            .map_err(|e| AuthError::config(format!("invalid configuration file: {}", e)))?;
        file.try_into()
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim().to_ascii_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_role_table(json: &str) -> Result<BTreeMap<String, RoleBinding>> {
    let specs: HashMap<String, RoleBindingSpec> = serde_json::from_str(json)
        .map_err(|e| AuthError::config_field("roles", e.to_string()))?;

    specs
        .into_iter()
        .map(|(name, spec)| {
            let binding = spec.into_binding(&name)?;
            Ok::<_, AuthError>((name, binding))
        })
        .collect()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BrokerConfigFile {
    #[serde(default = "default_region")]
    default_region: String,
    #[serde(default)]
    default_profile: Option<String>,
    #[serde(default = "default_true")]
    enable_caching: bool,
    #[serde(default = "default_cache_ttl")]
    cache_ttl_seconds: u64,
    #[serde(default)]
    enable_role_chaining: bool,
    #[serde(default = "default_max_concurrent")]
    max_concurrent_exchanges: usize,
    #[serde(default)]
    roles: BTreeMap<String, RoleBindingSpec>,
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    DEFAULT_CACHE_TTL_SECS
}

fn default_max_concurrent() -> usize {
    DEFAULT_MAX_CONCURRENT_EXCHANGES
}

impl TryFrom<BrokerConfigFile> for BrokerConfig {
    type Error = AuthError;

    fn try_from(file: BrokerConfigFile) -> Result<Self> {
        let roles = file
            .roles
            .into_iter()
            .map(|(name, spec)| Ok::<_, AuthError>((name.clone(), spec.into_binding(name)?)))
            .collect::<Result<BTreeMap<_, _>>>()?;

        let config = BrokerConfig {
            default_region: file.default_region,
            default_profile: file.default_profile,
            enable_caching: file.enable_caching,
            cache_ttl_seconds: file.cache_ttl_seconds,
            enable_role_chaining: file.enable_role_chaining,
            max_concurrent_exchanges: file.max_concurrent_exchanges,
            roles,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serialized_binding_masks_external_id() {
        let config = BrokerConfig::new("us-east-1").with_role(
            RoleBinding::builder("prod", ARN, ACCOUNT)
                .external_id("shared-secret")
                .build()
                .unwrap(),
        );

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["roles"]["prod"]["external_id"], "***");

        let yaml = serde_yaml::to_string(&config).unwrap();
        assert!(yaml.contains("***"), "{yaml}");
        assert!(!yaml.contains("shared-secret"));

        let plain = RoleBinding::builder("dev", ARN, ACCOUNT).build().unwrap();
        assert!(serde_json::to_value(&plain).unwrap().get("external_id").is_none());
    }

    const ARN: &str = "arn:aws:iam::123456789012:role/SREReadOnly";
    const ACCOUNT: &str = "123456789012";

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_valid_role_binding() {
        let binding = RoleBinding::builder("prod", ARN, ACCOUNT)
            .duration_seconds(7200)
            .external_id("ext-123")
            .build()
            .unwrap();

        assert_eq!(binding.name(), "prod");
        assert_eq!(binding.role_arn(), ARN);
        assert_eq!(binding.account_id(), ACCOUNT);
        assert_eq!(binding.session_label(), DEFAULT_SESSION_LABEL);
        assert_eq!(binding.duration_seconds(), 7200);
        assert_eq!(binding.external_id(), Some("ext-123"));
    }

    #[test]
    fn test_invalid_role_arn() {
        for arn in [
            "",
            "invalid-arn",
            "arn:aws:s3:::bucket",
            "arn:aws:iam::123456789012:user/alice",
            "ARN:AWS:IAM::123456789012:role/Upper",
        ] {
            let err = RoleBinding::builder("r", arn, ACCOUNT).build().unwrap_err();
            assert!(
                matches!(err, AuthError::Configuration { field: Some(ref f), .. } if f == "role_arn"),
                "expected role_arn error for {arn:?}"
            );
        }
    }

    #[test]
    fn test_role_arn_stored_unchanged() {
        for arn in [
            "arn:aws:iam::123456789012:role/a",
            "arn:aws:iam::123456789012:role/path/to/Role",
            "arn:aws:iam::999999999999:role/with+=,.@-chars",
        ] {
            let binding = RoleBinding::builder("r", arn, ACCOUNT).build().unwrap();
            assert_eq!(binding.role_arn(), arn);
        }
    }

    #[test]
    fn test_invalid_account_id() {
        for account in ["", "12345", "1234567890123", "12345678901a", " 12345678901", "１２３４５６７８９０１２"] {
            let err = RoleBinding::builder("r", ARN, account).build().unwrap_err();
            assert!(
                matches!(err, AuthError::Configuration { field: Some(ref f), .. } if f == "account_id"),
                "expected account_id error for {account:?}"
            );
        }
    }

    #[test]
    fn test_invalid_session_label() {
        let err = RoleBinding::builder("r", ARN, ACCOUNT)
            .session_label("has space")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");

        let err = RoleBinding::builder("r", ARN, ACCOUNT)
            .session_label("a".repeat(65))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("64 characters"));

        RoleBinding::builder("r", ARN, ACCOUNT)
            .session_label("a".repeat(64))
            .build()
            .unwrap();
    }

    #[test]
    fn test_duration_bounds() {
        for ok in [900, 3600, 43_200] {
            RoleBinding::builder("r", ARN, ACCOUNT)
                .duration_seconds(ok)
                .build()
                .unwrap();
        }
        for bad in [0, 899, 43_201] {
            assert!(
                RoleBinding::builder("r", ARN, ACCOUNT)
                    .duration_seconds(bad)
                    .build()
                    .is_err()
            );
        }
    }

    #[test]
    fn test_default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.default_region, "us-east-1");
        assert_eq!(config.default_profile, None);
        assert!(config.enable_caching);
        assert!(!config.enable_role_chaining);
        assert_eq!(config.cache_ttl_seconds, 3000);
        assert_eq!(config.max_concurrent_exchanges, 10);
        assert!(config.list_roles().is_empty());
    }

    #[test]
    fn test_cache_ttl_bounds() {
        assert!(BrokerConfig::default().with_cache_ttl(299).is_err());
        assert!(BrokerConfig::default().with_cache_ttl(43_201).is_err());
        let config = BrokerConfig::default().with_cache_ttl(300).unwrap();
        assert_eq!(config.cache_ttl_seconds, 300);
    }

    #[test]
    fn test_add_get_list_roles() {
        let mut config = BrokerConfig::new("eu-west-1");
        config.add_role(RoleBinding::builder("staging", ARN, ACCOUNT).build().unwrap());
        config.add_role(RoleBinding::builder("prod", ARN, ACCOUNT).build().unwrap());

        assert_eq!(config.list_roles(), vec!["prod".to_string(), "staging".to_string()]);
        assert_eq!(config.get_role("prod").unwrap().role_arn(), ARN);
        assert!(config.get_role("missing").is_none());
    }

    #[test]
    fn test_from_env() {
        let roles = format!(
            r#"{{"prod": {{"role_arn": "{ARN}", "account_id": "{ACCOUNT}", "duration_seconds": 7200}}}}"#
        );
        let config = BrokerConfig::from_lookup(lookup(&[
            ("AWS_AUTH_DEFAULT_REGION", "us-west-2"),
            ("AWS_REGION", "eu-central-1"),
            ("AWS_PROFILE", "ops"),
            ("AWS_AUTH_ENABLE_CACHING", "No"),
            ("AWS_AUTH_CACHE_TTL", "1800"),
            ("AWS_AUTH_ENABLE_ROLE_CHAINING", "YES"),
            ("AWS_AUTH_ROLES", roles.as_str()),
        ]))
        .unwrap();

        assert_eq!(config.default_region, "us-west-2");
        assert_eq!(config.default_profile.as_deref(), Some("ops"));
        assert!(!config.enable_caching);
        assert_eq!(config.cache_ttl_seconds, 1800);
        assert!(config.enable_role_chaining);
        assert_eq!(config.get_role("prod").unwrap().duration_seconds(), 7200);
    }

    #[test]
    fn test_from_env_region_fallback() {
        let config = BrokerConfig::from_lookup(lookup(&[("AWS_REGION", "ap-south-1")])).unwrap();
        assert_eq!(config.default_region, "ap-south-1");
    }

    #[test]
    fn test_unparsable_ttl_falls_back_to_default() {
        let config =
            BrokerConfig::from_lookup(lookup(&[("AWS_AUTH_CACHE_TTL", "soon")])).unwrap();
        assert_eq!(config.cache_ttl_seconds, DEFAULT_CACHE_TTL_SECS);
    }

    #[test]
    fn test_out_of_bounds_ttl_is_rejected() {
        let err = BrokerConfig::from_lookup(lookup(&[("AWS_AUTH_CACHE_TTL", "60")])).unwrap_err();
        assert!(
            matches!(err, AuthError::Configuration { field: Some(ref f), .. } if f == "cache_ttl_seconds")
        );
    }

    #[test]
    fn test_malformed_roles_json_yields_no_roles() {
        let config = BrokerConfig::from_lookup(lookup(&[("AWS_AUTH_ROLES", "{not json")])).unwrap();
        assert!(config.list_roles().is_empty());

        let invalid = format!(
            r#"{{"ok": {{"role_arn": "{ARN}", "account_id": "{ACCOUNT}"}}, "bad": {{"role_arn": "{ARN}", "account_id": "42"}}}}"#
        );
        let config = BrokerConfig::from_lookup(lookup(&[("AWS_AUTH_ROLES", invalid.as_str())])).unwrap();
        assert!(config.list_roles().is_empty());
    }

    #[test]
    fn test_single_role_env_config() {
        let config = BrokerConfig::from_lookup(lookup(&[
            ("AWS_AUTH_DEFAULT_ROLE_ARN", ARN),
            ("AWS_AUTH_DEFAULT_ACCOUNT_ID", ACCOUNT),
            ("AWS_AUTH_DEFAULT_SESSION_NAME", "ops-bot"),
            ("AWS_AUTH_DEFAULT_DURATION", "1800"),
            ("AWS_AUTH_DEFAULT_EXTERNAL_ID", "shared-secret"),
        ]))
        .unwrap();

        let role = config.get_role("default").unwrap();
        assert_eq!(role.role_arn(), ARN);
        assert_eq!(role.session_label(), "ops-bot");
        assert_eq!(role.duration_seconds(), 1800);
        assert_eq!(role.external_id(), Some("shared-secret"));
    }

    #[test]
    fn test_single_role_requires_both_fields() {
        let config =
            BrokerConfig::from_lookup(lookup(&[("AWS_AUTH_DEFAULT_ROLE_ARN", ARN)])).unwrap();
        assert!(config.list_roles().is_empty());
    }

    #[test]
    fn test_single_role_invalid_duration() {
        let err = BrokerConfig::from_lookup(lookup(&[
            ("AWS_AUTH_DEFAULT_ROLE_ARN", ARN),
            ("AWS_AUTH_DEFAULT_ACCOUNT_ID", ACCOUNT),
            ("AWS_AUTH_DEFAULT_DURATION", "an hour"),
        ]))
        .unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn test_from_yaml() {
        let yaml = format!(
            r#"
default_region: us-west-2
cache_ttl_seconds: 900
roles:
  prod:
    role_arn: {ARN}
    account_id: "{ACCOUNT}"
    role_session_name: sre-prod
    external_id: abc
"#
        );
        let config = BrokerConfig::from_yaml(&yaml).unwrap();
        assert_eq!(config.default_region, "us-west-2");
        assert_eq!(config.cache_ttl_seconds, 900);
        assert!(config.enable_caching);

        let prod = config.get_role("prod").unwrap();
        assert_eq!(prod.name(), "prod");
        assert_eq!(prod.session_label(), "sre-prod");
        assert_eq!(prod.duration_seconds(), DEFAULT_SESSION_DURATION_SECS);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broker.yaml");
        std::fs::write(&path, "default_region: eu-west-1\nenable_caching: false\n").unwrap();

        let config = BrokerConfig::from_file(&path).unwrap();
        assert_eq!(config.default_region, "eu-west-1");
        assert!(!config.enable_caching);
        assert_eq!(config.cache_ttl_seconds, DEFAULT_CACHE_TTL_SECS);

        let err = BrokerConfig::from_file(&dir.path().join("missing.yaml")).unwrap_err();
        assert_eq!(err.code(), "CONFIG_INVALID");
    }

    #[test]
    fn test_from_yaml_rejects_unknown_keys() {
        let err = BrokerConfig::from_yaml("default_regoin: us-west-2\n").unwrap_err();
        assert!(err.to_string().contains("default_regoin"));
    }

    #[test]
    fn test_from_yaml_rejects_invalid_role() {
        let yaml = r#"
roles:
  prod:
    role_arn: not-an-arn
    account_id: "123456789012"
"#;
        assert!(BrokerConfig::from_yaml(yaml).is_err());
    }
}
