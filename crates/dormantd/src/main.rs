//! dormantd: the dormant daemon.
//!
//! One binary, three roles:
//! - `provision`: plan every configured world and persist it scaled to zero
//! - `control`: provider API, launcher endpoint and autoscaler in one process
//! - `watchdog`: the per-instance sidecar, configured from its environment
//!
//! # Usage
//!
//! ```text
//! dormantd provision --config dormant.toml --data-dir /var/lib/dormant
//! dormantd control --config dormant.toml --data-dir /var/lib/dormant
//! WORLD=valheim DNSZONE=Z123 SERVERNAME=valheim.example.com dormantd watchdog
//! ```

mod control;
mod provision;
mod watchdog_mode;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,dormantd=debug,dormant=debug";

#[derive(Parser)]
#[command(name = "dormantd", about = "dormant game-server lifecycle daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true, env = "DORMANT_LOG_JSON")]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate topology and persist every configured world.
    Provision {
        #[arg(long, default_value = "dormant.toml")]
        config: PathBuf,

        #[arg(long, default_value = "/var/lib/dormant")]
        data_dir: PathBuf,

        /// Validate and print the plan without writing anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Run the provider API, launcher and autoscaler.
    Control {
        #[arg(long, default_value = "dormant.toml")]
        config: PathBuf,

        #[arg(long, default_value = "/var/lib/dormant")]
        data_dir: PathBuf,

        /// Overrides `control.port`.
        #[arg(long)]
        port: Option<u16>,
    },

    /// Run the idle watchdog next to a game server.
    Watchdog(watchdog_mode::WatchdogArgs),
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let fmt = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        fmt.json().init();
    } else {
        fmt.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    match cli.command {
        Command::Provision {
            config,
            data_dir,
            dry_run,
        } => provision::run_provision(&config, &data_dir, dry_run),
        Command::Control {
            config,
            data_dir,
            port,
        } => control::run_control(&config, &data_dir, port).await,
        Command::Watchdog(args) => watchdog_mode::run_watchdog(args).await,
    }
}
