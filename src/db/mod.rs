//! Database module: pool setup, migrations and the admin-account repository.
//!
//! - `model`: typed rows returned by repositories.
//! - `repo`: SQL-only functions that map rows into entities.
//!
//! Production talks to PostgreSQL; tests run the same SQL against SQLite.
//! Everything goes through sqlx's `Any` driver, so queries stick to the
//! dialect both understand (`$n` placeholders, TEXT timestamps).

pub mod model;
pub mod repo;

pub use model::{AdminAccount, AdminOutcome};
pub use repo::*;

use anyhow::{Context, Result};
use sqlx::any::AnyPoolOptions;
use sqlx::migrate::{Migrate, Migrator};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, instrument};

pub type Pool = sqlx::AnyPool;

static EMBEDDED: Migrator = sqlx::migrate!("./migrations");

/// Where migrations are read from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum MigrationSource {
    /// The set compiled into the binary.
    #[default]
    Embedded,
    /// A directory of `<version>_<name>.sql` files read at startup.
    Directory(PathBuf),
}

pub async fn init_pool(database_url: &str, max_connections: u32) -> Result<Pool> {
    sqlx::any::install_default_drivers();
    let pool = AnyPoolOptions::new()
        .max_connections(max_connections.max(1))
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await
        .context("failed to connect to the database")?;
    Ok(pool)
}

/// Apply every pending migration. Returns how many were newly applied.
///
/// Already-applied migrations are skipped; a migration whose checksum no
/// longer matches the recorded one is an error that needs an operator.
#[instrument(skip(pool))]
pub async fn run_migrations(pool: &Pool, source: &MigrationSource) -> Result<usize> {
    let loaded;
    let migrator = match source {
        MigrationSource::Embedded => &EMBEDDED,
        MigrationSource::Directory(dir) => {
            loaded = Migrator::new(dir.as_path())
                .await
                .with_context(|| format!("failed to read migrations from {}", dir.display()))?;
            &loaded
        }
    };

    let mut conn = pool.acquire().await?;
    conn.ensure_migrations_table().await?;
    let before = conn.list_applied_migrations().await?.len();

    migrator
        .run(&mut *conn)
        .await
        .context("failed to apply migrations")?;

    let after = conn.list_applied_migrations().await?.len();
    let applied = after.saturating_sub(before);
    info!(applied, total = after, "schema is up to date");
    Ok(applied)
}
