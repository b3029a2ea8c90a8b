//! Database helpers for principals and refresh tokens.
//!
//! Only hashes of refresh tokens are persisted; the raw value exists solely
//! in the caller's hands. Refresh rows are append-only: revocation sets
//! `revoked_at`, nothing is ever deleted.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};
use tracing::Instrument;

use super::principal::Principal;

const PRINCIPAL_COLUMNS: &str = "id, login, name, role, percent, is_active, created_at";

const INSERT_REFRESH_TOKEN_SQL: &str = r"
    INSERT INTO refresh_tokens (user_id, token_hash, expires_at, ip, user_agent)
    VALUES ($1, $2, $3, $4, $5)
";

/// Principal plus the stored password hash, for the login path only.
pub(super) struct CredentialRow {
    pub(super) principal: Principal,
    pub(super) password_hash: String,
}

pub(crate) fn principal_from_row(row: &PgRow) -> Result<Principal> {
    let role: String = row.get("role");
    Ok(Principal {
        id: row.get("id"),
        login: row.get("login"),
        name: row.get("name"),
        role: role.parse()?,
        percent: row.get("percent"),
        is_active: row.get("is_active"),
        created_at: row.get("created_at"),
    })
}

/// Look up login data by login name. Activity and password checks stay with
/// the caller so their failures can be merged into one error.
pub(super) async fn lookup_credentials(
    pool: &PgPool,
    login: &str,
) -> Result<Option<CredentialRow>> {
    let query = format!("SELECT {PRINCIPAL_COLUMNS}, password_hash FROM users WHERE login = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(login)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup credentials")?;

    row.map(|row| {
        Ok(CredentialRow {
            principal: principal_from_row(&row)?,
            password_hash: row.get("password_hash"),
        })
    })
    .transpose()
}

pub(super) async fn lookup_principal(pool: &PgPool, user_id: i64) -> Result<Option<Principal>> {
    let query = format!("SELECT {PRINCIPAL_COLUMNS} FROM users WHERE id = $1");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(user_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to lookup principal")?;

    row.map(|row| principal_from_row(&row)).transpose()
}

pub(super) async fn insert_refresh_token(
    pool: &PgPool,
    user_id: i64,
    token_hash: &[u8],
    expires_at: DateTime<Utc>,
    ip: &str,
    user_agent: &str,
) -> Result<()> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = INSERT_REFRESH_TOKEN_SQL
    );
    sqlx::query(INSERT_REFRESH_TOKEN_SQL)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(ip)
        .bind(user_agent)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to insert refresh token")?;
    Ok(())
}

pub(super) async fn insert_refresh_token_tx(
    tx: &mut Transaction<'static, Postgres>,
    user_id: i64,
    token_hash: &[u8],
    expires_at: DateTime<Utc>,
    ip: &str,
    user_agent: &str,
) -> Result<()> {
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = INSERT_REFRESH_TOKEN_SQL
    );
    sqlx::query(INSERT_REFRESH_TOKEN_SQL)
        .bind(user_id)
        .bind(token_hash)
        .bind(expires_at)
        .bind(ip)
        .bind(user_agent)
        .execute(&mut **tx)
        .instrument(span)
        .await
        .context("failed to insert rotated refresh token")?;
    Ok(())
}

/// Validate a presented refresh token and revoke it, returning an open
/// transaction the caller completes by inserting the replacement record and
/// committing. Dropping the transaction rolls the revocation back, so a
/// request cancelled mid-rotation leaves the table in its pre-rotation state.
///
/// Returns `None` when the token must be rejected: unknown hash, subject
/// mismatch, already revoked, stored expiry passed, or inactive owner. The
/// caller maps all of these to one merged error.
pub(super) async fn begin_refresh_rotation(
    pool: &PgPool,
    subject_id: i64,
    token_hash: &[u8],
) -> Result<Option<(Transaction<'static, Postgres>, Principal)>> {
    let mut tx = pool.begin().await.context("begin refresh rotation")?;

    let query = r"
        SELECT rt.user_id AS token_user_id, rt.expires_at, rt.revoked_at,
               u.id, u.login, u.name, u.role, u.percent, u.is_active, u.created_at
        FROM refresh_tokens rt
        JOIN users u ON u.id = rt.user_id
        WHERE rt.token_hash = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .instrument(span)
        .await
        .context("failed to lookup refresh token")?;

    let Some(row) = row else {
        return Ok(None);
    };

    let token_user_id: i64 = row.get("token_user_id");
    let expires_at: DateTime<Utc> = row.get("expires_at");
    let revoked_at: Option<DateTime<Utc>> = row.get("revoked_at");
    let principal = principal_from_row(&row)?;

    if token_user_id != subject_id
        || revoked_at.is_some()
        || expires_at <= Utc::now()
        || !principal.is_active
    {
        return Ok(None);
    }

    // The guard makes rotation single-use under races: of two concurrent
    // redemptions of the same token, the second observes the first's
    // revocation here and updates zero rows.
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE token_hash = $1 AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(token_hash)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to revoke refresh token for rotation")?;

    if result.rows_affected() == 0 {
        return Ok(None);
    }

    Ok(Some((tx, principal)))
}

/// Revoke one live refresh token by hash. Idempotent: revoking an unknown or
/// already-revoked token affects zero rows.
pub(super) async fn revoke_refresh_token(pool: &PgPool, token_hash: &[u8]) -> Result<u64> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE token_hash = $1 AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(token_hash)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke refresh token")?;
    Ok(result.rows_affected())
}

/// Revoke every live refresh token owned by a principal ("log out
/// everywhere").
pub(super) async fn revoke_all_refresh_tokens(pool: &PgPool, user_id: i64) -> Result<u64> {
    let query = r"
        UPDATE refresh_tokens
        SET revoked_at = NOW()
        WHERE user_id = $1 AND revoked_at IS NULL
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .execute(pool)
        .instrument(span)
        .await
        .context("failed to revoke refresh tokens")?;
    Ok(result.rows_affected())
}
