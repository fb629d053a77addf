use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;

use tg_shop_launcher::logging;
use tg_shop_launcher::topology::{Topology, TopologyOptions};

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Render the database/web/bot compose file, or validate an existing one"
)]
struct Args {
    /// Validate this compose file instead of rendering one
    #[arg(long, conflicts_with = "output")]
    check: Option<PathBuf>,

    /// Write the rendered file here instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    /// Prefix for container names
    #[arg(long, default_value = "shop")]
    project: String,

    /// PostgreSQL image
    #[arg(long, default_value = "postgres:15")]
    postgres_image: String,

    /// Host directory mounted as the application log directory
    #[arg(long, default_value = "./logs")]
    log_dir: String,
}

fn main() -> Result<()> {
    logging::init_stderr();
    let args = Args::parse();

    if let Some(path) = &args.check {
        let topology = Topology::load(path)?;
        topology
            .validate()
            .with_context(|| format!("{} is not a valid shop topology", path.display()))?;
        info!(path = %path.display(), services = topology.services.len(), "topology is valid");
        return Ok(());
    }

    let opts = TopologyOptions {
        project: args.project,
        postgres_image: args.postgres_image,
        log_dir: args.log_dir,
        ..Default::default()
    };
    let topology = Topology::standard(&opts);
    topology.validate()?;
    let yaml = topology.to_yaml()?;

    match args.output {
        Some(path) => {
            std::fs::write(&path, &yaml)
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!(path = %path.display(), "compose file written");
        }
        None => print!("{yaml}"),
    }
    Ok(())
}
