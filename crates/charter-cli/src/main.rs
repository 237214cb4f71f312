//! Charter CLI - deploy trees of charts to Kubernetes

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

mod commands;
mod display;
mod error;
mod exit_codes;
mod prompt;
mod util;

use error::Result;
use util::parse_duration;

#[derive(Parser)]
#[command(name = "charter")]
#[command(version)]
#[command(about = "Deploy trees of charts to Kubernetes", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Settings file (defaults to <config dir>/charter/settings.yaml)
    #[arg(long, global = true, env = "CHARTER_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Apply a chart and everything below it
    Apply {
        /// Chart directory, archive or URL
        chart: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Set values on command line (key=value)
        #[arg(long = "set")]
        set: Vec<String>,

        /// Do not store the packaged-chart record
        #[arg(long)]
        skip_packaging: bool,

        /// Give up after this long (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Simulate the cluster in memory and list what would change
        #[arg(long)]
        in_memory: bool,
    },

    /// Delete a chart and everything below it
    Delete {
        /// Chart directory, archive or URL
        chart: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Also delete shared dependencies nobody uses anymore
        #[arg(long)]
        recursive: bool,

        /// Give up after this long (e.g. 90s, 5m)
        #[arg(long, value_parser = parse_duration)]
        timeout: Option<Duration>,

        /// Simulate the cluster in memory and list what would change
        #[arg(long)]
        in_memory: bool,
    },

    /// List installed charts
    List {
        /// Namespace to look in
        #[arg(short, long)]
        namespace: Option<String>,

        /// Only charts of this genus
        #[arg(long)]
        genus: Option<String>,

        /// Simulate the cluster in memory
        #[arg(long)]
        in_memory: bool,
    },

    /// Render the chart tree as one sorted multi-document stream
    Template {
        /// Chart directory, archive or URL
        chart: String,

        /// Target namespace
        #[arg(short, long)]
        namespace: Option<String>,

        /// Set values on command line (key=value)
        #[arg(long = "set")]
        set: Vec<String>,
    },

    /// Package a chart directory into <name>-<version>.tgz
    Package {
        /// Chart directory
        #[arg(default_value = ".")]
        chart: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = ".")]
        output: PathBuf,
    },
}

#[tokio::main]
async fn main() {
    miette::set_panic_hook();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
}

/// Logs go to stderr; `RUST_LOG` wins over `-v`
fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

async fn run(cli: Cli) -> Result<()> {
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Apply {
            chart,
            namespace,
            set,
            skip_packaging,
            timeout,
            in_memory,
        } => {
            let args = commands::apply::ApplyArgs {
                chart: &chart,
                namespace: namespace.as_deref(),
                set: &set,
                skip_packaging,
                timeout,
                in_memory,
            };
            commands::apply::run(config, args).await
        }

        Commands::Delete {
            chart,
            namespace,
            recursive,
            timeout,
            in_memory,
        } => {
            let args = commands::delete::DeleteArgs {
                chart: &chart,
                namespace: namespace.as_deref(),
                recursive,
                timeout,
                in_memory,
            };
            commands::delete::run(config, args).await
        }

        Commands::List {
            namespace,
            genus,
            in_memory,
        } => {
            commands::list::run(config, namespace.as_deref(), genus.as_deref(), in_memory).await
        }

        Commands::Template {
            chart,
            namespace,
            set,
        } => commands::template::run(config, &chart, namespace.as_deref(), &set).await,

        Commands::Package { chart, output } => commands::package::run(&chart, &output),
    }
}
