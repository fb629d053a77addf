use super::model::{AdminAccount, AdminOutcome};
use super::Pool;
use crate::config::Admin;
use crate::password;
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use sqlx::Row;
use tracing::{info, instrument, warn};
use uuid::Uuid;

#[instrument(skip(pool))]
pub async fn find_admin(pool: &Pool, username: &str) -> Result<Option<AdminAccount>> {
    let row = sqlx::query(
        "SELECT id, username, email, password_hash, is_superuser, created_at \
         FROM admin_accounts WHERE username = $1",
    )
    .bind(username)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| AdminAccount {
        id: row.get("id"),
        username: row.get("username"),
        email: row.get("email"),
        password_hash: row.get("password_hash"),
        is_superuser: row.get::<i64, _>("is_superuser") != 0,
        created_at: row.get("created_at"),
    }))
}

#[instrument(skip(pool))]
pub async fn count_admins(pool: &Pool) -> Result<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM admin_accounts")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Make sure an account with `admin.username` exists.
///
/// An existing account is left untouched, password included. The insert
/// itself is `ON CONFLICT DO NOTHING`, so two bootstraps racing on the same
/// database still end up with a single row.
#[instrument(skip_all, fields(username = %admin.username))]
pub async fn ensure_admin(pool: &Pool, admin: &Admin) -> Result<AdminOutcome> {
    if let Some(existing) = find_admin(pool, &admin.username).await? {
        if existing.email != admin.email {
            warn!(
                stored = %existing.email,
                configured = %admin.email,
                "admin account exists with a different email; leaving it unchanged"
            );
        }
        info!("admin account already present");
        return Ok(AdminOutcome::AlreadyPresent);
    }

    let password_hash = password::hash_password(admin.password.expose())
        .map_err(|e| anyhow!("failed to hash admin password: {e}"))?;
    let result = sqlx::query(
        "INSERT INTO admin_accounts (id, username, email, password_hash, is_superuser, created_at) \
         VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (username) DO NOTHING",
    )
    .bind(Uuid::new_v4().to_string())
    .bind(&admin.username)
    .bind(&admin.email)
    .bind(&password_hash)
    .bind(1_i64)
    .bind(Utc::now().to_rfc3339())
    .execute(pool)
    .await
    .context("failed to insert admin account")?;

    if result.rows_affected() == 1 {
        info!("admin account created");
        Ok(AdminOutcome::Created)
    } else {
        info!("admin account created concurrently by another process");
        Ok(AdminOutcome::AlreadyPresent)
    }
}
