//! Command handlers.

use crate::output::{OutputFormat, or_unset, render};
use console::style;
use serde::Serialize;
use sre_auth::{ClientOptions, CredentialBroker, RoleSelector};

type HandlerResult = Result<(), Box<dyn std::error::Error>>;

/// Show the identity behind a role.
pub async fn whoami(
    broker: &CredentialBroker,
    role: Option<String>,
    format: OutputFormat,
) -> HandlerResult {
    let summary = broker.test_credentials(RoleSelector::from(role)).await?;

    if let Some(rendered) = render(format, &summary)? {
        println!("{}", rendered);
        return Ok(());
    }

    println!("{} Credentials valid", style("✓").green());
    println!("  role:    {}", or_unset(summary.role_name.as_deref()));
    println!("  account: {}", or_unset(summary.account.as_deref()));
    println!("  user_id: {}", or_unset(summary.user_id.as_deref()));
    println!("  arn:     {}", or_unset(summary.arn.as_deref()));
    Ok(())
}

/// List configured roles.
pub async fn list_roles(broker: &CredentialBroker, format: OutputFormat) -> HandlerResult {
    let config = broker.config().await;
    let roles: Vec<_> = config.roles().collect();

    if let Some(rendered) = render(format, &roles)? {
        println!("{}", rendered);
        return Ok(());
    }

    if roles.is_empty() {
        println!("{} No roles configured", style("i").blue());
        return Ok(());
    }

    for role in roles {
        println!("{}", style(role.name()).bold());
        println!("  role_arn:          {}", role.role_arn());
        println!("  account_id:        {}", role.account_id());
        println!("  role_session_name: {}", role.session_label());
        println!("  duration_seconds:  {}", role.duration_seconds());
        if role.external_id().is_some() {
            println!("  external_id:       ***");
        }
    }
    Ok(())
}

#[derive(Serialize)]
struct ClientSummary<'a> {
    service: &'a str,
    region: &'a str,
    role: Option<&'a str>,
    expires_at: Option<String>,
}

/// Build a client and describe it.
pub async fn build_client(
    broker: &CredentialBroker,
    service: &str,
    role: Option<String>,
    region: Option<&str>,
    endpoint_url: Option<String>,
    format: OutputFormat,
) -> HandlerResult {
    let mut options = ClientOptions::default();
    if let Some(url) = endpoint_url {
        options = options.with_endpoint_url(url);
    }

    let handle = broker
        .get_client(service, RoleSelector::from(role), region, options)
        .await?;

    let summary = ClientSummary {
        service: handle.service(),
        region: handle.region(),
        role: handle.role_name(),
        expires_at: handle.credentials().map(|c| c.expires_at().to_rfc3339()),
    };

    if let Some(rendered) = render(format, &summary)? {
        println!("{}", rendered);
        return Ok(());
    }

    println!(
        "{} Created {} client in {}",
        style("✓").green(),
        style(summary.service).bold(),
        summary.region
    );
    match summary.role {
        Some(role) => println!("  role:       {}", role),
        None => println!("  identity:   ambient"),
    }
    if let Some(expires_at) = &summary.expires_at {
        println!("  expires_at: {}", expires_at);
    }
    Ok(())
}

/// Assume roles and print the cache state.
pub async fn warm_cache(
    broker: &CredentialBroker,
    roles: Vec<String>,
    format: OutputFormat,
) -> HandlerResult {
    let roles = if roles.is_empty() {
        broker.roles().await
    } else {
        roles
    };

    for role in &roles {
        broker.refresh(role).await?;
    }

    let info = broker.cache_info().await;
    if let Some(rendered) = render(format, &info)? {
        println!("{}", rendered);
        return Ok(());
    }

    if info.is_empty() {
        println!("{} No cache entries", style("i").blue());
        return Ok(());
    }

    for (role, entry) in info {
        let status = if entry.valid {
            style("valid").green()
        } else {
            style("stale").yellow()
        };
        println!("{} ({})", style(role).bold(), status);
        println!("  cached_at:  {}", entry.cached_at.to_rfc3339());
        println!("  expires_at: {}", entry.expires_at.to_rfc3339());
        println!("  region:     {}", entry.region);
    }
    Ok(())
}

/// Show the effective configuration.
pub async fn show_config(broker: &CredentialBroker, format: OutputFormat) -> HandlerResult {
    let config = broker.config().await;

    if let Some(rendered) = render(format, &config)? {
        println!("{}", rendered);
        return Ok(());
    }

    println!("Current configuration:");
    println!("  default_region: {}", config.default_region);
    println!(
        "  default_profile: {}",
        or_unset(config.default_profile.as_deref())
    );
    println!("  enable_caching: {}", config.enable_caching);
    println!("  cache_ttl_seconds: {}", config.cache_ttl_seconds);
    println!("  enable_role_chaining: {}", config.enable_role_chaining);
    println!(
        "  max_concurrent_exchanges: {}",
        config.max_concurrent_exchanges
    );
    println!("  roles: {}", config.list_roles().join(", "));
    Ok(())
}
