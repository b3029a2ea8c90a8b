//! One-time bootstrap of the initial admin account.

use anyhow::{Context, Result};
use secrecy::ExposeSecret;
use sqlx::PgPool;
use tracing::Instrument;

use super::auth::{hasher, AuthConfig};

/// Create the configured bootstrap admin if no user with that login exists.
/// Returns whether a user was created. Idempotent across restarts; a no-op
/// when the bootstrap login or password is not configured.
pub(crate) async fn ensure_bootstrap_admin(pool: &PgPool, config: &AuthConfig) -> Result<bool> {
    let (Some(login), Some(password)) = (
        config.bootstrap_admin_login(),
        config.bootstrap_admin_password(),
    ) else {
        return Ok(false);
    };
    if login.is_empty() {
        return Ok(false);
    }

    let query = "SELECT id FROM users WHERE login = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let existing = sqlx::query(query)
        .bind(login)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup bootstrap admin")?;
    if existing.is_some() {
        return Ok(false);
    }

    let password_hash = hasher::hash_password(password.expose_secret())?;

    let query = r"
        INSERT INTO users (login, password_hash, name, role, percent, is_active)
        VALUES ($1, $2, $3, 'admin', NULL, TRUE)
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    sqlx::query(query)
        .bind(login)
        .bind(password_hash)
        .bind(config.bootstrap_admin_name())
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert bootstrap admin")?;

    Ok(true)
}
