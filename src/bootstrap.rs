//! The web-admin startup sequence: wait for the database, migrate, ensure the
//! admin account, stage static assets. Handing off to the server is left to
//! the caller so the sequence itself can be exercised in tests.
//!
//! Every step runs only after the previous one succeeded. The whole sequence
//! is idempotent; after a failure the supervisor restarts the container and
//! the sequence runs again from the top.
use crate::assets::{self, StaticAssets};
use crate::config::WebAdminConfig;
use crate::db::{self, AdminOutcome, MigrationSource};
use crate::gate::{self, Endpoint, GateError, GatePolicy, Probe};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, instrument};

#[derive(Debug, Clone, Default)]
pub struct BootstrapOptions {
    pub migrations: MigrationSource,
    pub static_assets: Option<StaticAssets>,
}

/// What a completed run did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BootstrapReport {
    pub waited: Duration,
    pub migrations_applied: usize,
    pub admin: AdminOutcome,
    pub static_files: Option<usize>,
}

/// The database endpoint the gate waits on: the one the pool will dial.
pub fn database_endpoint(cfg: &WebAdminConfig) -> Result<Endpoint, GateError> {
    cfg.database.endpoint()
}

/// Migrate, then ensure the admin account. The caller owns the pool and
/// closes it whatever the outcome.
async fn prepare_schema(
    pool: &db::Pool,
    cfg: &WebAdminConfig,
    options: &BootstrapOptions,
) -> Result<(usize, AdminOutcome)> {
    info!(step = "migrate", "applying migrations");
    let migrations_applied = db::run_migrations(pool, &options.migrations).await?;

    info!(step = "ensure_admin", username = %cfg.admin.username, "ensuring admin account");
    let admin = db::ensure_admin(pool, &cfg.admin)
        .await
        .context("failed to ensure admin account")?;
    Ok((migrations_applied, admin))
}

#[instrument(skip_all)]
pub async fn run(
    cfg: &WebAdminConfig,
    probe: &dyn Probe,
    options: &BootstrapOptions,
) -> Result<BootstrapReport> {
    let endpoint = database_endpoint(cfg)?;
    let policy = GatePolicy::new(cfg.launcher.wait_timeout, cfg.launcher.wait_interval);
    info!(step = "wait", %endpoint, "waiting for database");
    let waited = gate::wait_until_ready(probe, &endpoint, &policy).await?;

    let pool = db::init_pool(&cfg.database.url(), 2).await?;
    let prepared = prepare_schema(&pool, cfg, options).await;
    pool.close().await;
    let (migrations_applied, admin) = prepared?;

    let static_files = match &options.static_assets {
        Some(static_assets) => {
            info!(step = "static", "staging static assets");
            Some(assets::stage(static_assets).await?)
        }
        None => None,
    };

    let report = BootstrapReport {
        waited,
        migrations_applied,
        admin,
        static_files,
    };
    info!(
        waited = ?report.waited,
        migrations_applied = report.migrations_applied,
        admin = report.admin.as_str(),
        static_files = ?report.static_files,
        "bootstrap complete"
    );
    Ok(report)
}
