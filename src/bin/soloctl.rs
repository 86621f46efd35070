//! Solo coordination CLI.
//!
//! `soloctl` inspects and manipulates the namespace lock and the remote config
//! of a deployment.

use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::{Parser, Subcommand};
use solo::bootstrap::Services;
use solo::soloctl::{self, GlobalOptions};

#[derive(Parser, Debug)]
#[command(name = "soloctl")]
#[command(about = "Namespace lock and remote config tool for Solo deployments")]
#[command(version)]
struct Args {
    /// Path to a TOML settings file
    #[arg(long, short = 'c', global = true)]
    config: Option<PathBuf>,

    /// Target namespace
    #[arg(long, short = 'n', global = true)]
    namespace: Option<String>,

    /// Deployment name, resolved through the settings file
    #[arg(long, short = 'd', global = true)]
    deployment: Option<String>,

    /// Kube context to use
    #[arg(long, global = true)]
    context: Option<String>,

    /// Cluster reference, resolved to a kube context through the settings file
    #[arg(long, global = true)]
    cluster_ref: Option<String>,

    /// Output in JSON format instead of human-readable text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

impl Args {
    fn to_global_options(&self) -> GlobalOptions {
        GlobalOptions {
            namespace: self.namespace.clone(),
            deployment: self.deployment.clone(),
            context: self.context.clone(),
            cluster_ref: self.cluster_ref.clone(),
            json: self.json,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Namespace lease operations
    Lease {
        #[command(subcommand)]
        action: LeaseAction,
    },
    /// Remote config operations
    RemoteConfig {
        #[command(subcommand)]
        action: RemoteConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum LeaseAction {
    /// Show the current holder of the namespace lease
    Status,
    /// Acquire the namespace lock, optionally hold it, then release it
    Acquire {
        /// Seconds to hold the lock before releasing it
        #[arg(long, default_value = "0")]
        hold_secs: u64,
    },
    /// Release an expired namespace lease
    Release,
}

#[derive(Subcommand, Debug)]
enum RemoteConfigAction {
    /// Print the remote config document
    Show,
    /// Print the command history
    History,
    /// Create the remote config for a new deployment
    Create {
        /// Consensus node aliases, e.g. node1,node2
        #[arg(long, value_delimiter = ',')]
        node_aliases: Vec<String>,
    },
}

async fn run(args: Args) -> anyhow::Result<()> {
    let services = Services::from_config(args.config.as_deref()).await?;
    let opts = args.to_global_options();
    let mut stdout = io::stdout();

    let result = match &args.command {
        Command::Lease { action } => match action {
            LeaseAction::Status => soloctl::lease_status(&services, &opts, &mut stdout).await,
            LeaseAction::Acquire { hold_secs } => {
                soloctl::lease_acquire(
                    &services,
                    &opts,
                    Duration::from_secs(*hold_secs),
                    &mut stdout,
                )
                .await
            }
            LeaseAction::Release => soloctl::lease_release(&services, &opts, &mut stdout).await,
        },
        Command::RemoteConfig { action } => match action {
            RemoteConfigAction::Show => {
                soloctl::remote_config_show(&services, &opts, &mut stdout).await
            }
            RemoteConfigAction::History => {
                soloctl::remote_config_history(&services, &opts, &mut stdout).await
            }
            RemoteConfigAction::Create { node_aliases } => {
                soloctl::remote_config_create(&services, &opts, node_aliases, &mut stdout).await
            }
        },
    };
    services.shutdown().await;
    result
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
