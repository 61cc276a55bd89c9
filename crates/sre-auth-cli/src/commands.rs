//! CLI command definitions.

use clap::Subcommand;

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show the AWS identity behind a role or the ambient credentials
    Whoami {
        /// Configured role name (ambient identity if omitted)
        #[arg(short, long)]
        role: Option<String>,
    },

    /// List configured roles
    Roles,

    /// Build a service client and report what it resolved to
    Client {
        /// AWS service identifier, e.g. ec2 or s3
        service: String,

        /// Configured role name (ambient identity if omitted)
        #[arg(short, long)]
        role: Option<String>,

        /// Region override for this client
        #[arg(long)]
        region: Option<String>,

        /// Custom endpoint URL
        #[arg(long)]
        endpoint_url: Option<String>,
    },

    /// Inspect the credential cache
    Cache {
        #[command(subcommand)]
        command: CacheCommands,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Debug, Subcommand)]
pub enum CacheCommands {
    /// Assume the given roles and show the resulting cache state
    Warm {
        /// Role names (all configured roles if omitted)
        roles: Vec<String>,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
}
