mod commands;
mod utils;

use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "tierstack")]
#[command(about = "Secure multi-tier network stacks, synthesized from KDL", long_about = None)]
struct Cli {
    #[command(flatten)]
    stack: StackOptions,

    #[command(subcommand)]
    command: Commands,
}

/// Where the stack comes from, plus per-run overrides
#[derive(Args, Debug, Default, Clone)]
pub struct StackOptions {
    /// Stack file (default: discovered from the current directory)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Base CIDR block of the network
    #[arg(long, env = "TIERSTACK_BASE_CIDR", global = true)]
    pub base_cidr: Option<String>,

    /// Number of availability zones every tier is replicated over
    #[arg(long, env = "TIERSTACK_AZ_COUNT", global = true)]
    pub az_count: Option<usize>,

    /// Number of application instances
    #[arg(long, env = "TIERSTACK_COMPUTE_FLEET_SIZE", global = true)]
    pub compute_fleet_size: Option<usize>,

    /// Number of database instances
    #[arg(long, env = "TIERSTACK_DB_FLEET_SIZE", global = true)]
    pub db_fleet_size: Option<usize>,

    /// `sub` claim the CI role is bound to (e.g. repo:org/app:ref:refs/heads/main)
    #[arg(long, env = "TIERSTACK_TRUSTED_REPO_REF", global = true)]
    pub trusted_repo_ref: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synthesize the stack and print the resource graph as JSON
    Synth {
        /// Write the graph to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Check the stack and print a summary
    Validate,
    /// Show task stages and resource apply levels
    Graph,
    /// Show what apply would change
    Plan,
    /// Provision the stack
    Apply {
        /// Apply without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Tear the stack down, dependents first
    Destroy {
        /// Destroy without asking
        #[arg(short, long)]
        yes: bool,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // logs go to stderr; stdout carries command output
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    if let Err(e) = run(cli).await {
        eprintln!();
        eprintln!("{} {}", format!("✗ {}:", utils::error_kind(&e)).red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Version => {
            println!("tierstack {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        Commands::Synth { output } => {
            let loaded = utils::load_stack(&cli.stack)?;
            commands::synth::handle(&loaded, output.as_deref())
        }
        Commands::Validate => {
            let loaded = utils::load_stack(&cli.stack)?;
            commands::validate::handle(&loaded)
        }
        Commands::Graph => {
            let loaded = utils::load_stack(&cli.stack)?;
            commands::graph::handle(&loaded)
        }
        Commands::Plan => {
            let loaded = utils::load_stack(&cli.stack)?;
            commands::plan::handle(&loaded).await
        }
        Commands::Apply { yes } => {
            let loaded = utils::load_stack(&cli.stack)?;
            commands::apply::handle(&loaded, yes).await
        }
        Commands::Destroy { yes } => {
            let loaded = utils::load_stack(&cli.stack)?;
            commands::destroy::handle(&loaded, yes).await
        }
    }
}
