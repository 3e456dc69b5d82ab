//! armadad — the Armada daemon.
//!
//! # Usage
//!
//! ```text
//! armadad master --bind 0.0.0.0:5801 --data-dir /var/lib/armada
//! armadad standalone --host h1 --host h2 --data-dir /var/lib/armada
//! ```

use std::path::PathBuf;

use armada_core::DaemonConfig;
use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "armadad", about = "Armada orchestrator daemon")]
struct Cli {
    /// TOML config file; flags override its values.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct MasterArgs {
    /// Address the master API listens on.
    #[arg(long)]
    bind: Option<String>,

    /// Data directory for the coordination store.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Master presence id (defaults to the bind address).
    #[arg(long)]
    id: Option<String>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the master API over the coordination store.
    Master(MasterArgs),
    /// Run a master and in-process agents sharing one store.
    Standalone {
        #[command(flatten)]
        master: MasterArgs,

        /// Host to run an agent for; repeatable.
        #[arg(long = "host")]
        hosts: Vec<String>,
    },
}

impl MasterArgs {
    fn apply(self, config: &mut DaemonConfig) {
        if let Some(bind) = self.bind {
            config.master.bind = bind;
        }
        if let Some(dir) = self.data_dir {
            config.store.data_dir = Some(dir);
        }
        if let Some(id) = self.id {
            config.master.id = Some(id);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    armadad::logging::init(cli.log_json);

    let mut config = match &cli.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };

    match cli.command {
        Command::Master(args) => {
            args.apply(&mut config);
            armadad::daemon::run_master(config).await
        }
        Command::Standalone { master, hosts } => {
            master.apply(&mut config);
            if !hosts.is_empty() {
                config.agent.hosts = hosts;
            }
            armadad::daemon::run_standalone(config).await
        }
    }
}
