//! Amahi Agent - 家庭服务器编排代理
//!
//! Usage:
//! - Normal mode: `amahi-agent`
//! - Custom port and data dir: `amahi-agent --port 4600 --data-dir /srv/amahi`
//! - Dry run against a real host: `amahi-agent --simulate`

use std::path::PathBuf;

use clap::Parser;
use tracing::error;

use amahi_agent::RuntimeConfig;

/// Home-server orchestration agent
#[derive(Debug, Parser)]
#[command(name = "amahi-agent", version, about)]
struct Cli {
    /// Override the listening port
    #[arg(long)]
    port: Option<u16>,

    /// Directory holding the entity store and simulated deploy targets
    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    /// Application catalog (JSON); the built-in catalog is used otherwise
    #[arg(long, value_name = "FILE")]
    catalog: Option<PathBuf>,

    /// Print commands and replay scripted output instead of executing anything
    #[arg(long, conflicts_with = "real")]
    simulate: bool,

    /// Execute commands on this host
    #[arg(long)]
    real: bool,
}

impl From<Cli> for RuntimeConfig {
    fn from(cli: Cli) -> Self {
        let simulate = match (cli.simulate, cli.real) {
            (true, _) => Some(true),
            (_, true) => Some(false),
            _ => None,
        };
        Self {
            port_override: cli.port,
            data_dir: cli.data_dir,
            catalog: cli.catalog,
            simulate,
        }
    }
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();
    amahi_agent::init_tracing();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "Failed to create runtime");
            return std::process::ExitCode::FAILURE;
        }
    };

    match rt.block_on(amahi_agent::run(cli.into())) {
        Ok(()) => std::process::ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %format!("{:#}", e), "amahi-agent stopped");
            std::process::ExitCode::FAILURE
        }
    }
}
