use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing::error;

use tg_shop_launcher::assets::StaticAssets;
use tg_shop_launcher::bootstrap::{self, BootstrapOptions};
use tg_shop_launcher::config::{self, WebAdminConfig};
use tg_shop_launcher::db::MigrationSource;
use tg_shop_launcher::gate::TcpProbe;
use tg_shop_launcher::handoff::Handoff;
use tg_shop_launcher::logging;

/// Web-admin entrypoint: wait for the database, migrate, ensure the admin
/// account, then replace this process with the server.
#[derive(Debug, Parser)]
#[command(author, version, about)]
struct Args {
    /// Path to the .env file loaded before reading the environment
    #[arg(long, default_value = ".env")]
    env_file: PathBuf,

    /// Read migrations from this directory instead of the embedded set
    #[arg(long)]
    migrations: Option<PathBuf>,

    /// Directory of static assets to stage before starting the server
    #[arg(long, requires = "static_root")]
    static_src: Option<PathBuf>,

    /// Destination of the staged static assets
    #[arg(long, requires = "static_src")]
    static_root: Option<PathBuf>,

    /// Server command, e.g. `-- gunicorn app.wsgi --bind 0.0.0.0:8000`
    #[arg(last = true, required = true)]
    server: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let handoff = Handoff::from_argv(&args.server)?;

    config::load_env_file(Some(&args.env_file))?;
    let cfg = match WebAdminConfig::from_env() {
        Ok(cfg) => cfg,
        Err(err) => {
            logging::init_stderr();
            error!(%err, "refusing to start");
            return Err(err.into());
        }
    };
    cfg.launcher.ensure_dirs()?;
    logging::init_with_file(&cfg.launcher.log_dir, "web")?;

    let options = BootstrapOptions {
        migrations: args
            .migrations
            .map(MigrationSource::Directory)
            .unwrap_or_default(),
        static_assets: args
            .static_src
            .zip(args.static_root)
            .map(|(source, root)| StaticAssets { source, root }),
    };

    if let Err(err) = bootstrap::run(&cfg, &TcpProbe, &options).await {
        error!(?err, "bootstrap failed");
        return Err(err);
    }

    Err(handoff.exec())
}
