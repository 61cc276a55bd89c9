//! sre-auth CLI entrypoint.

use clap::Parser;
use console::style;
use sre_auth::{AuthError, BrokerConfig, CredentialBroker};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;
use tracing_subscriber::EnvFilter;

mod commands;
mod handlers;
mod output;


use commands::{CacheCommands, Commands, ConfigCommands};
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(name = "sre-auth")]
#[command(author, version, about = "Cross-account AWS credential broker", long_about = None)]
struct Cli {
    /// YAML configuration file (AWS_AUTH_* environment variables otherwise)
    #[arg(short, long, global = true, env = "SRE_AUTH_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Table)]
    output: OutputFormat,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> sre_auth::Result<BrokerConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration file");
            BrokerConfig::from_file(path)
        }
        None => BrokerConfig::from_env(),
    }
}

async fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>> {
    let broker = CredentialBroker::from_config(load_config(cli.config.as_ref())?)?;
    let format = cli.output;

    match cli.command {
        Commands::Whoami { role } => handlers::whoami(&broker, role, format).await?,
        Commands::Roles => handlers::list_roles(&broker, format).await?,
        Commands::Client {
            service,
            role,
            region,
            endpoint_url,
        } => {
            handlers::build_client(
                &broker,
                &service,
                role,
                region.as_deref(),
                endpoint_url,
                format,
            )
            .await?
        }
        Commands::Cache { command } => match command {
            CacheCommands::Warm { roles } => handlers::warm_cache(&broker, roles, format).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&broker, format).await?,
        },
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            match e.downcast_ref::<AuthError>() {
                Some(auth) => eprintln!(
                    "{} [{}] {}",
                    style("✗").red(),
                    style(auth.code()).bold(),
                    auth
                ),
                None => eprintln!("{} {}", style("✗").red(), e),
            }
            ExitCode::FAILURE
        }
    }
}
