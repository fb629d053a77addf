use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};

use tg_shop_launcher::bot;
use tg_shop_launcher::config::{self, BotConfig};
use tg_shop_launcher::gate::{self, GatePolicy, TcpProbe};
use tg_shop_launcher::handoff::Handoff;
use tg_shop_launcher::logging;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Validate the bot configuration, wait for the database and start the bot"
)]
struct Args {
    /// Path to the .env file loaded before reading the environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Verify the token and publish the command menu before starting
    #[arg(long)]
    register_commands: bool,

    /// Bot command, e.g. `-- python -m bot.main`
    #[arg(last = true, required = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let handoff = Handoff::from_argv(&args.command)?;

    config::load_env_file(Some(&args.env_file))?;
    let cfg = match BotConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            logging::init_stderr();
            error!(%err, "refusing to start the bot");
            return Err(err.into());
        }
    };
    cfg.launcher.ensure_dirs()?;
    logging::init_with_file(&cfg.launcher.log_dir, "bot")?;

    let endpoint = cfg.database.endpoint()?;
    let policy = GatePolicy::new(cfg.launcher.wait_timeout, cfg.launcher.wait_interval);
    if let Err(err) = gate::wait_until_ready(&TcpProbe, &endpoint, &policy).await {
        error!(%err, "database never became reachable");
        return Err(err.into());
    }

    if args.register_commands {
        if let Err(err) = bot::register_commands(&cfg.telegram).await {
            error!(?err, "bot startup checks failed");
            return Err(err);
        }
    }

    info!("starting bot process");
    Err(handoff.exec())
}
