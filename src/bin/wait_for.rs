use anyhow::{anyhow, Result};
use clap::Parser;
use std::time::Duration;
use tracing::error;

use tg_shop_launcher::gate::{self, Endpoint, GatePolicy, TcpProbe};
use tg_shop_launcher::handoff::Handoff;
use tg_shop_launcher::logging;

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Wait until host:port accepts TCP connections, then optionally exec a command"
)]
struct Args {
    /// Endpoint as host:port
    target: Option<String>,

    /// Host to probe (alternative to host:port)
    #[arg(long, conflicts_with = "target", requires = "port")]
    host: Option<String>,

    /// Port to probe (alternative to host:port)
    #[arg(long, conflicts_with = "target", requires = "host")]
    port: Option<u16>,

    /// Give up after this many seconds; 0 waits forever
    #[arg(short, long, default_value = "15")]
    timeout: u64,

    /// Delay between attempts in milliseconds
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Do not print anything on stderr unless the gate fails
    #[arg(short, long)]
    quiet: bool,

    /// Command to exec once the endpoint is reachable
    #[arg(last = true)]
    command: Vec<String>,
}

impl Args {
    fn endpoint(&self) -> Result<Endpoint> {
        match (&self.target, &self.host, self.port) {
            (Some(target), _, _) => Ok(target.parse()?),
            (None, Some(host), Some(port)) if port != 0 => Ok(Endpoint::new(host.clone(), port)),
            _ => Err(anyhow!("an endpoint is required: host:port or --host/--port")),
        }
    }

    fn policy(&self) -> GatePolicy {
        let timeout = (self.timeout > 0).then(|| Duration::from_secs(self.timeout));
        GatePolicy::new(timeout, Duration::from_millis(self.interval_ms))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    logging::init_stderr_with(if args.quiet {
        logging::quiet_filter()
    } else {
        logging::env_filter()
    });

    let endpoint = args.endpoint()?;
    let handoff = if args.command.is_empty() {
        None
    } else {
        Some(Handoff::from_argv(&args.command)?)
    };

    if let Err(err) = gate::wait_until_ready(&TcpProbe, &endpoint, &args.policy()).await {
        error!(%err, "giving up");
        return Err(err.into());
    }

    match handoff {
        Some(handoff) => Err(handoff.exec()),
        None => Ok(()),
    }
}
