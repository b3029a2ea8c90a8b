//! Session endpoints: login, refresh with rotation, logout, and the current
//! principal.

use anyhow::Context;
use axum::{
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::info;

use super::{
    error::AuthError,
    hasher,
    principal::{require_auth, Principal},
    rate_limit::RateLimitDecision,
    state::AuthState,
    storage,
    token::{Claims, TokenKind},
    types::{AuthResponse, LoginRequest, LogoutRequest, LogoutResponse, RefreshRequest, UserOut},
    utils::{client_user_agent, extract_bearer_token, extract_client_ip, hash_refresh_token},
};

#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session issued", body = AuthResponse),
        (status = 401, description = "Invalid credentials"),
        (status = 429, description = "Too many attempts; see Retry-After")
    ),
    tag = "auth"
)]
pub(crate) async fn login(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<LoginRequest>,
) -> Response {
    match login_flow(&headers, &pool, &auth_state, &payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn login_flow(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    payload: &LoginRequest,
) -> Result<AuthResponse, AuthError> {
    let client_ip = extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string());

    if let RateLimitDecision::Limited { retry_after } = state.limiter().allow(&client_ip).await {
        return Err(AuthError::RateLimited { retry_after });
    }

    // Unknown login, deactivated account, and wrong password are deliberately
    // indistinguishable to the caller.
    let Some(credentials) = storage::lookup_credentials(pool, &payload.login).await? else {
        return Err(AuthError::InvalidCredentials);
    };
    if !credentials.principal.is_active
        || !hasher::verify_password(&payload.password, &credentials.password_hash)
    {
        return Err(AuthError::InvalidCredentials);
    }

    // A legitimate client should not keep paying for earlier failed attempts.
    state.limiter().reset(&client_ip).await;

    let principal = credentials.principal;
    let (access_token, access_claims) =
        state
            .codec()
            .issue(principal.id, principal.role, TokenKind::Access)?;
    let (refresh_token, refresh_claims) =
        state
            .codec()
            .issue(principal.id, principal.role, TokenKind::Refresh)?;

    storage::insert_refresh_token(
        pool,
        principal.id,
        &hash_refresh_token(&refresh_token),
        refresh_expiry(&refresh_claims)?,
        &client_ip,
        &client_user_agent(headers),
    )
    .await?;

    info!(user_id = principal.id, "login succeeded");

    Ok(session_response(
        access_token,
        &access_claims,
        refresh_token,
        principal,
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Session rotated", body = AuthResponse),
        (status = 401, description = "Invalid, expired, or revoked refresh token")
    ),
    tag = "auth"
)]
pub(crate) async fn refresh(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<RefreshRequest>,
) -> Response {
    match refresh_flow(&headers, &pool, &auth_state, &payload).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn refresh_flow(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    payload: &RefreshRequest,
) -> Result<AuthResponse, AuthError> {
    let claims = state
        .codec()
        .verify(&payload.refresh_token, TokenKind::Refresh)?;
    let subject_id = claims.subject_id()?;

    let old_hash = hash_refresh_token(&payload.refresh_token);

    // Rotation: the presented token is revoked and replaced in one
    // transaction, so a stolen token works at most once.
    let Some((mut tx, principal)) =
        storage::begin_refresh_rotation(pool, subject_id, &old_hash).await?
    else {
        return Err(AuthError::InvalidRefreshToken);
    };

    let (access_token, access_claims) =
        state
            .codec()
            .issue(principal.id, principal.role, TokenKind::Access)?;
    let (refresh_token, refresh_claims) =
        state
            .codec()
            .issue(principal.id, principal.role, TokenKind::Refresh)?;

    let client_ip = extract_client_ip(headers).unwrap_or_else(|| "unknown".to_string());
    storage::insert_refresh_token_tx(
        &mut tx,
        principal.id,
        &hash_refresh_token(&refresh_token),
        refresh_expiry(&refresh_claims)?,
        &client_ip,
        &client_user_agent(headers),
    )
    .await?;

    tx.commit()
        .await
        .context("commit refresh rotation")
        .map_err(AuthError::Database)?;

    Ok(session_response(
        access_token,
        &access_claims,
        refresh_token,
        principal,
    ))
}

#[utoipa::path(
    post,
    path = "/api/auth/logout",
    request_body = LogoutRequest,
    responses(
        (status = 200, description = "Matching sessions revoked", body = LogoutResponse)
    ),
    tag = "auth"
)]
pub(crate) async fn logout(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    payload: Option<Json<LogoutRequest>>,
) -> Response {
    match logout_flow(&headers, &pool, &auth_state, payload.map(|Json(p)| p)).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(err) => err.into_response(),
    }
}

/// Best-effort on the credential side: a stale or garbage token is treated as
/// "nothing to revoke", never as an error. Store faults still surface.
async fn logout_flow(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    payload: Option<LogoutRequest>,
) -> Result<LogoutResponse, AuthError> {
    let mut revoked = 0u64;

    if let Some(refresh_token) = payload.and_then(|payload| payload.refresh_token) {
        if !refresh_token.is_empty() {
            let token_hash = hash_refresh_token(&refresh_token);
            revoked += storage::revoke_refresh_token(pool, &token_hash).await?;
        }
    }

    // With a valid access token, fall back to "log out everywhere": revoke
    // every live refresh record of its subject.
    if let Some(token) = extract_bearer_token(headers) {
        if let Ok(claims) = state.codec().verify(&token, TokenKind::Access) {
            if let Ok(subject_id) = claims.subject_id() {
                revoked += storage::revoke_all_refresh_tokens(pool, subject_id).await?;
            }
        }
    }

    Ok(LogoutResponse {
        success: true,
        revoked,
    })
}

#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current principal", body = UserOut),
        (status = 401, description = "Missing or invalid access token")
    ),
    tag = "auth"
)]
pub(crate) async fn me(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => (StatusCode::OK, Json(UserOut::from(principal))).into_response(),
        Err(err) => err.into_response(),
    }
}

fn session_response(
    access_token: String,
    access_claims: &Claims,
    refresh_token: String,
    principal: Principal,
) -> AuthResponse {
    AuthResponse {
        access_token,
        refresh_token,
        token_type: "bearer".to_string(),
        expires_in: (access_claims.exp - access_claims.iat).max(1),
        user: UserOut::from(principal),
    }
}

fn refresh_expiry(claims: &Claims) -> Result<DateTime<Utc>, AuthError> {
    DateTime::from_timestamp(claims.exp, 0)
        .context("refresh token expiry out of range")
        .map_err(AuthError::Database)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::handlers::auth::principal::Role;

    fn claims(iat: i64, exp: i64) -> Claims {
        Claims {
            sub: "1".to_string(),
            role: Role::Admin,
            kind: TokenKind::Access,
            jti: "jti".to_string(),
            iat,
            exp,
        }
    }

    fn principal() -> Principal {
        Principal {
            id: 1,
            login: "root".to_string(),
            name: "Administrator".to_string(),
            role: Role::Admin,
            percent: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn session_response_reports_access_ttl() {
        let response = session_response(
            "access".to_string(),
            &claims(100, 1000),
            "refresh".to_string(),
            principal(),
        );
        assert_eq!(response.expires_in, 900);
        assert_eq!(response.token_type, "bearer");
    }

    #[test]
    fn session_response_floors_expires_in_at_one() {
        let response = session_response(
            "access".to_string(),
            &claims(1000, 1000),
            "refresh".to_string(),
            principal(),
        );
        assert_eq!(response.expires_in, 1);
    }

    #[test]
    fn refresh_expiry_converts_epoch_seconds() -> anyhow::Result<()> {
        let expiry = refresh_expiry(&claims(0, 1_700_000_000)).map_err(|err| anyhow::anyhow!("{err}"))?;
        assert_eq!(expiry.timestamp(), 1_700_000_000);
        Ok(())
    }
}
