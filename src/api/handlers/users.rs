//! User administration endpoints (admin only).

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, Instrument};
use utoipa::ToSchema;

use super::auth::{
    hasher, is_unique_violation, principal_from_row,
    principal::{require_role, Principal, Role},
    types::UserOut,
    AuthState,
};

const USER_COLUMNS: &str = "id, login, name, role, percent, is_active, created_at";

#[derive(ToSchema, Deserialize, Debug)]
pub(crate) struct UserCreate {
    pub(crate) login: String,
    pub(crate) password: String,
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) percent: Option<f64>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub(crate) struct UserUpdate {
    pub(crate) login: Option<String>,
    pub(crate) password: Option<String>,
    pub(crate) name: Option<String>,
    pub(crate) role: Option<Role>,
    pub(crate) percent: Option<f64>,
}

#[derive(ToSchema, Serialize, Debug)]
pub(crate) struct UserToggleResponse {
    pub(crate) success: bool,
    pub(crate) user: UserOut,
}

/// Validated target state for an update, computed before touching the store.
#[derive(Debug, PartialEq)]
struct UserChanges {
    login: String,
    name: String,
    role: Role,
    percent: Option<f64>,
    password: Option<String>,
}

fn valid_login(login: &str) -> bool {
    Regex::new(r"^[A-Za-z0-9_.-]{3,64}$").is_ok_and(|regex| regex.is_match(login))
}

fn valid_percent(percent: f64) -> bool {
    (0.0..=100.0).contains(&percent)
}

/// Merge an update payload over the current user, enforcing the percent
/// invariant: present iff the (resulting) role is investor.
fn apply_user_update(existing: &Principal, payload: UserUpdate) -> Result<UserChanges, &'static str> {
    let untouched = payload.login.is_none()
        && payload.password.is_none()
        && payload.name.is_none()
        && payload.role.is_none()
        && payload.percent.is_none();
    if untouched {
        return Err("No fields to update.");
    }

    let login = match payload.login {
        Some(login) => {
            if !valid_login(&login) {
                return Err("login must be 3-64 characters of letters, digits, '_', '.' or '-'.");
            }
            login
        }
        None => existing.login.clone(),
    };

    let password = match payload.password {
        Some(password) if !password.is_empty() => Some(password),
        _ => None,
    };

    let role = payload.role.unwrap_or(existing.role);
    let percent = match role {
        Role::Admin => None,
        Role::Investor => {
            let percent = payload.percent.or(existing.percent);
            let Some(percent) = percent else {
                return Err("percent is required for investor role.");
            };
            if !valid_percent(percent) {
                return Err("percent must be between 0 and 100.");
            }
            Some(percent)
        }
    };

    Ok(UserChanges {
        login,
        name: payload.name.unwrap_or_else(|| existing.name.clone()),
        role,
        percent,
        password,
    })
}

async fn fetch_user(pool: &PgPool, user_id: i64) -> Result<Option<Principal>> {
    let query = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
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
        .context("failed to fetch user")?;
    row.map(|row| principal_from_row(&row)).transpose()
}

#[utoipa::path(
    get,
    path = "/api/users",
    responses(
        (status = 200, description = "All users", body = [UserOut]),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not an admin")
    ),
    tag = "users"
)]
pub(crate) async fn list_users(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Err(err) = require_role(&headers, &pool, &auth_state, &[Role::Admin]).await {
        return err.into_response();
    }

    let query = format!("SELECT {USER_COLUMNS} FROM users ORDER BY id ASC");
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query).fetch_all(&*pool).instrument(span).await;

    match rows {
        Ok(rows) => {
            let users: Result<Vec<UserOut>> = rows
                .iter()
                .map(|row| principal_from_row(row).map(UserOut::from))
                .collect();
            match users {
                Ok(users) => (StatusCode::OK, Json(users)).into_response(),
                Err(err) => {
                    error!("Failed to decode users: {err:#}");
                    StatusCode::INTERNAL_SERVER_ERROR.into_response()
                }
            }
        }
        Err(err) => {
            error!("Failed to list users: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/users",
    request_body = UserCreate,
    responses(
        (status = 201, description = "User created", body = UserOut),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Not an admin"),
        (status = 409, description = "Login already taken")
    ),
    tag = "users"
)]
pub(crate) async fn create_user(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<UserCreate>,
) -> Response {
    if let Err(err) = require_role(&headers, &pool, &auth_state, &[Role::Admin]).await {
        return err.into_response();
    }

    if !valid_login(&payload.login) {
        return (
            StatusCode::BAD_REQUEST,
            "login must be 3-64 characters of letters, digits, '_', '.' or '-'.",
        )
            .into_response();
    }
    if payload.password.is_empty() {
        return (StatusCode::BAD_REQUEST, "password must not be empty.").into_response();
    }
    let percent = match payload.role {
        Role::Admin => None,
        Role::Investor => match payload.percent {
            Some(percent) if valid_percent(percent) => Some(percent),
            Some(_) => {
                return (StatusCode::BAD_REQUEST, "percent must be between 0 and 100.")
                    .into_response()
            }
            None => {
                return (
                    StatusCode::BAD_REQUEST,
                    "percent is required for investor role.",
                )
                    .into_response()
            }
        },
    };

    let password_hash = match hasher::hash_password(&payload.password) {
        Ok(hash) => hash,
        Err(err) => {
            error!("Failed to hash password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let query = format!(
        r"
        INSERT INTO users (login, password_hash, name, role, percent, is_active)
        VALUES ($1, $2, $3, $4, $5, TRUE)
        RETURNING {USER_COLUMNS}
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(&payload.login)
        .bind(&password_hash)
        .bind(&payload.name)
        .bind(payload.role.as_str())
        .bind(percent)
        .fetch_one(&*pool)
        .instrument(span)
        .await;

    match row {
        Ok(row) => match principal_from_row(&row) {
            Ok(user) => (StatusCode::CREATED, Json(UserOut::from(user))).into_response(),
            Err(err) => {
                error!("Failed to decode created user: {err:#}");
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        },
        Err(err) if is_unique_violation(&err) => (
            StatusCode::CONFLICT,
            "User with this login already exists.",
        )
            .into_response(),
        Err(err) => {
            error!("Failed to create user: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/users/{user_id}",
    request_body = UserUpdate,
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "User updated", body = UserOut),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Unknown user"),
        (status = 409, description = "Login already taken")
    ),
    tag = "users"
)]
pub(crate) async fn update_user(
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<UserUpdate>,
) -> Response {
    if let Err(err) = require_role(&headers, &pool, &auth_state, &[Role::Admin]).await {
        return err.into_response();
    }

    let existing = match fetch_user(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return (StatusCode::NOT_FOUND, "User not found.").into_response(),
        Err(err) => {
            error!("Failed to fetch user: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let changes = match apply_user_update(&existing, payload) {
        Ok(changes) => changes,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    let password_hash = match changes.password.as_deref().map(hasher::hash_password) {
        None => None,
        Some(Ok(hash)) => Some(hash),
        Some(Err(err)) => {
            error!("Failed to hash password: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let result = match password_hash {
        Some(password_hash) => {
            let query = r"
                UPDATE users
                SET login = $2, name = $3, role = $4, percent = $5, password_hash = $6
                WHERE id = $1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(user_id)
                .bind(&changes.login)
                .bind(&changes.name)
                .bind(changes.role.as_str())
                .bind(changes.percent)
                .bind(&password_hash)
                .execute(&*pool)
                .instrument(span)
                .await
        }
        None => {
            let query = r"
                UPDATE users
                SET login = $2, name = $3, role = $4, percent = $5
                WHERE id = $1
            ";
            let span = tracing::info_span!(
                "db.query",
                db.system = "postgresql",
                db.operation = "UPDATE",
                db.statement = query
            );
            sqlx::query(query)
                .bind(user_id)
                .bind(&changes.login)
                .bind(&changes.name)
                .bind(changes.role.as_str())
                .bind(changes.percent)
                .execute(&*pool)
                .instrument(span)
                .await
        }
    };

    if let Err(err) = result {
        if is_unique_violation(&err) {
            return (StatusCode::CONFLICT, "Login is already taken.").into_response();
        }
        error!("Failed to update user: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match fetch_user(&pool, user_id).await {
        Ok(Some(user)) => (StatusCode::OK, Json(UserOut::from(user))).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found.").into_response(),
        Err(err) => {
            error!("Failed to reload user: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    patch,
    path = "/api/users/{user_id}/toggle",
    params(("user_id" = i64, Path, description = "User id")),
    responses(
        (status = 200, description = "Active flag flipped", body = UserToggleResponse),
        (status = 400, description = "Cannot disable own active account"),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Unknown user")
    ),
    tag = "users"
)]
pub(crate) async fn toggle_user(
    Path(user_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let current_admin = match require_role(&headers, &pool, &auth_state, &[Role::Admin]).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let existing = match fetch_user(&pool, user_id).await {
        Ok(Some(user)) => user,
        Ok(None) => return (StatusCode::NOT_FOUND, "User not found.").into_response(),
        Err(err) => {
            error!("Failed to fetch user: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    // Locking yourself out is always a mistake.
    if existing.id == current_admin.id && existing.is_active {
        return (
            StatusCode::BAD_REQUEST,
            "You cannot disable your own active account.",
        )
            .into_response();
    }

    let query = "UPDATE users SET is_active = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(user_id)
        .bind(!existing.is_active)
        .execute(&*pool)
        .instrument(span)
        .await;
    if let Err(err) = result {
        error!("Failed to toggle user: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match fetch_user(&pool, user_id).await {
        Ok(Some(user)) => (
            StatusCode::OK,
            Json(UserToggleResponse {
                success: true,
                user: UserOut::from(user),
            }),
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "User not found.").into_response(),
        Err(err) => {
            error!("Failed to reload user: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn investor() -> Principal {
        Principal {
            id: 5,
            login: "ivy".to_string(),
            name: "Ivy".to_string(),
            role: Role::Investor,
            percent: Some(40.0),
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn valid_login_accepts_reasonable_names() {
        assert!(valid_login("alice"));
        assert!(valid_login("alice.b-c_99"));
        assert!(!valid_login("ab"));
        assert!(!valid_login("has space"));
        assert!(!valid_login(&"x".repeat(65)));
    }

    #[test]
    fn valid_percent_bounds() {
        assert!(valid_percent(0.0));
        assert!(valid_percent(100.0));
        assert!(!valid_percent(-0.1));
        assert!(!valid_percent(100.1));
    }

    #[test]
    fn empty_update_is_rejected() {
        let result = apply_user_update(&investor(), UserUpdate::default());
        assert_eq!(result, Err("No fields to update."));
    }

    #[test]
    fn update_keeps_unset_fields() -> std::result::Result<(), &'static str> {
        let changes = apply_user_update(
            &investor(),
            UserUpdate {
                name: Some("Ivy Lane".to_string()),
                ..UserUpdate::default()
            },
        )?;
        assert_eq!(changes.login, "ivy");
        assert_eq!(changes.name, "Ivy Lane");
        assert_eq!(changes.role, Role::Investor);
        assert_eq!(changes.percent, Some(40.0));
        assert!(changes.password.is_none());
        Ok(())
    }

    #[test]
    fn promoting_to_admin_clears_percent() -> std::result::Result<(), &'static str> {
        let changes = apply_user_update(
            &investor(),
            UserUpdate {
                role: Some(Role::Admin),
                ..UserUpdate::default()
            },
        )?;
        assert_eq!(changes.role, Role::Admin);
        assert_eq!(changes.percent, None);
        Ok(())
    }

    #[test]
    fn demoting_to_investor_requires_percent() {
        let mut admin = investor();
        admin.role = Role::Admin;
        admin.percent = None;

        let result = apply_user_update(
            &admin,
            UserUpdate {
                role: Some(Role::Investor),
                ..UserUpdate::default()
            },
        );
        assert_eq!(result, Err("percent is required for investor role."));

        let changes = apply_user_update(
            &admin,
            UserUpdate {
                role: Some(Role::Investor),
                percent: Some(25.0),
                ..UserUpdate::default()
            },
        );
        assert_eq!(
            changes.map(|changes| changes.percent),
            Ok(Some(25.0))
        );
    }

    #[test]
    fn out_of_range_percent_is_rejected() {
        let result = apply_user_update(
            &investor(),
            UserUpdate {
                percent: Some(150.0),
                ..UserUpdate::default()
            },
        );
        assert_eq!(result, Err("percent must be between 0 and 100."));
    }

    #[test]
    fn empty_password_is_ignored() -> std::result::Result<(), &'static str> {
        let changes = apply_user_update(
            &investor(),
            UserUpdate {
                password: Some(String::new()),
                name: Some("Ivy".to_string()),
                ..UserUpdate::default()
            },
        )?;
        assert!(changes.password.is_none());
        Ok(())
    }

    #[test]
    fn bad_login_update_is_rejected() {
        let result = apply_user_update(
            &investor(),
            UserUpdate {
                login: Some("no spaces allowed".to_string()),
                ..UserUpdate::default()
            },
        );
        assert!(result.is_err());
    }
}
