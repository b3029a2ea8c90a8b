//! Campaign management endpoints.
//!
//! Reads and writes are ownership-scoped: investors resolve campaigns through
//! a predicate that only matches their own rows, so a foreign campaign
//! uniformly answers 404 and its existence is never confirmed.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::{error, Instrument};
use utoipa::ToSchema;

use super::auth::{
    principal::{require_auth, require_role, Role},
    AuthState,
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct CampaignOut {
    pub(crate) id: i64,
    pub(crate) investor_id: i64,
    pub(crate) investor_login: Option<String>,
    pub(crate) investor_name: Option<String>,
    pub(crate) name: String,
    pub(crate) budget: f64,
    pub(crate) status: String,
    pub(crate) created_at: DateTime<Utc>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub(crate) struct CampaignCreate {
    /// Required for admin-created campaigns; ignored for investors, who
    /// always create their own.
    pub(crate) investor_id: Option<i64>,
    pub(crate) name: String,
    pub(crate) budget: f64,
    pub(crate) status: Option<String>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub(crate) struct CampaignUpdate {
    pub(crate) name: Option<String>,
    pub(crate) budget: Option<f64>,
    pub(crate) status: Option<String>,
    /// Reassignment of ownership, admin only.
    pub(crate) investor_id: Option<i64>,
}

#[derive(ToSchema, Deserialize, Debug)]
pub(crate) struct CampaignStatusUpdate {
    pub(crate) status: String,
}

#[derive(ToSchema, Serialize, Debug)]
pub(crate) struct CampaignDeleteResponse {
    pub(crate) success: bool,
    pub(crate) deleted_campaign_id: i64,
    pub(crate) deleted_applications: u64,
}

#[derive(Debug, PartialEq)]
struct CampaignChanges {
    name: String,
    budget: f64,
    status: String,
    investor_id: i64,
}

fn campaign_from_row(row: &PgRow) -> CampaignOut {
    CampaignOut {
        id: row.get("id"),
        investor_id: row.get("investor_id"),
        investor_login: row.get("investor_login"),
        investor_name: row.get("investor_name"),
        name: row.get("name"),
        budget: row.get("budget"),
        status: row.get("status"),
        created_at: row.get("created_at"),
    }
}

const CAMPAIGN_SELECT: &str = r"
    SELECT c.id, c.investor_id, c.name, c.budget, c.status, c.created_at,
           u.login AS investor_login, u.name AS investor_name
    FROM campaigns c
    JOIN users u ON u.id = c.investor_id
";

/// Resolve one campaign through the caller's ownership scope. `scope` is
/// `Some(investor_id)` for investors and `None` for admins; a row outside the
/// scope resolves to `None`, which callers answer with 404.
async fn fetch_campaign(
    pool: &PgPool,
    campaign_id: i64,
    scope: Option<i64>,
) -> Result<Option<CampaignOut>> {
    let query = format!(
        "{CAMPAIGN_SELECT} WHERE c.id = $1 AND ($2::BIGINT IS NULL OR c.investor_id = $2)"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(campaign_id)
        .bind(scope)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch campaign")?;
    Ok(row.map(|row| campaign_from_row(&row)))
}

/// `Ok(())` when `investor_id` names an active investor, `Err(message)`
/// otherwise.
async fn validate_investor(
    pool: &PgPool,
    investor_id: i64,
) -> Result<std::result::Result<(), &'static str>> {
    let query = "SELECT role, is_active FROM users WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(investor_id)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to validate investor")?;

    let Some(row) = row else {
        return Ok(Err("investor_id must reference an investor user."));
    };
    let role: String = row.get("role");
    if role != Role::Investor.as_str() {
        return Ok(Err("investor_id must reference an investor user."));
    }
    let is_active: bool = row.get("is_active");
    if !is_active {
        return Ok(Err("Investor account is inactive."));
    }
    Ok(Ok(()))
}

fn apply_campaign_update(
    existing: &CampaignOut,
    payload: &CampaignUpdate,
) -> Result<CampaignChanges, &'static str> {
    if payload.name.is_none()
        && payload.budget.is_none()
        && payload.status.is_none()
        && payload.investor_id.is_none()
    {
        return Err("No fields to update.");
    }

    Ok(CampaignChanges {
        name: payload.name.clone().unwrap_or_else(|| existing.name.clone()),
        budget: payload.budget.unwrap_or(existing.budget),
        status: payload
            .status
            .clone()
            .unwrap_or_else(|| existing.status.clone()),
        investor_id: payload.investor_id.unwrap_or(existing.investor_id),
    })
}

#[utoipa::path(
    get,
    path = "/api/campaigns",
    responses(
        (status = 200, description = "Campaigns visible to the caller", body = [CampaignOut]),
        (status = 401, description = "Not authenticated")
    ),
    tag = "campaigns"
)]
pub(crate) async fn list_campaigns(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let query = format!(
        "{CAMPAIGN_SELECT} WHERE ($1::BIGINT IS NULL OR c.investor_id = $1) ORDER BY c.id DESC"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(principal.investor_scope())
        .fetch_all(&*pool)
        .instrument(span)
        .await;

    match rows {
        Ok(rows) => {
            let campaigns: Vec<CampaignOut> =
                rows.iter().map(campaign_from_row).collect();
            (StatusCode::OK, Json(campaigns)).into_response()
        }
        Err(err) => {
            error!("Failed to list campaigns: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/api/campaigns",
    request_body = CampaignCreate,
    responses(
        (status = 201, description = "Campaign created", body = CampaignOut),
        (status = 400, description = "Invalid payload"),
        (status = 401, description = "Not authenticated")
    ),
    tag = "campaigns"
)]
pub(crate) async fn create_campaign(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CampaignCreate>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let investor_id = if principal.is_admin() {
        let Some(investor_id) = payload.investor_id else {
            return (
                StatusCode::BAD_REQUEST,
                "investor_id is required for admin-created campaigns.",
            )
                .into_response();
        };
        match validate_investor(&pool, investor_id).await {
            Ok(Ok(())) => investor_id,
            Ok(Err(message)) => return (StatusCode::BAD_REQUEST, message).into_response(),
            Err(err) => {
                error!("Failed to validate investor: {err:#}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    } else {
        principal.id
    };

    let status = payload.status.unwrap_or_else(|| "active".to_string());
    let query = r"
        INSERT INTO campaigns (investor_id, name, budget, status)
        VALUES ($1, $2, $3, $4)
        RETURNING id
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "INSERT",
        db.statement = query
    );
    let row = sqlx::query(query)
        .bind(investor_id)
        .bind(&payload.name)
        .bind(payload.budget)
        .bind(&status)
        .fetch_one(&*pool)
        .instrument(span)
        .await;

    let campaign_id: i64 = match row {
        Ok(row) => row.get("id"),
        Err(err) => {
            error!("Failed to create campaign: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    match fetch_campaign(&pool, campaign_id, None).await {
        Ok(Some(campaign)) => (StatusCode::CREATED, Json(campaign)).into_response(),
        Ok(None) => {
            error!("Created campaign {campaign_id} could not be loaded");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
        Err(err) => {
            error!("Failed to load created campaign: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    put,
    path = "/api/campaigns/{campaign_id}",
    request_body = CampaignUpdate,
    params(("campaign_id" = i64, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign updated", body = CampaignOut),
        (status = 400, description = "Invalid payload"),
        (status = 403, description = "Ownership reassignment requires admin"),
        (status = 404, description = "No such campaign within the caller's scope")
    ),
    tag = "campaigns"
)]
pub(crate) async fn update_campaign(
    Path(campaign_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CampaignUpdate>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let existing = match fetch_campaign(&pool, campaign_id, principal.investor_scope()).await {
        Ok(Some(campaign)) => campaign,
        Ok(None) => return (StatusCode::NOT_FOUND, "Campaign not found.").into_response(),
        Err(err) => {
            error!("Failed to fetch campaign: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    if payload.investor_id.is_some() && !principal.is_admin() {
        return (
            StatusCode::FORBIDDEN,
            "Only admin can reassign campaign ownership.",
        )
            .into_response();
    }

    let changes = match apply_campaign_update(&existing, &payload) {
        Ok(changes) => changes,
        Err(message) => return (StatusCode::BAD_REQUEST, message).into_response(),
    };

    if changes.investor_id != existing.investor_id {
        match validate_investor(&pool, changes.investor_id).await {
            Ok(Ok(())) => {}
            Ok(Err(message)) => return (StatusCode::BAD_REQUEST, message).into_response(),
            Err(err) => {
                error!("Failed to validate investor: {err:#}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        }
    }

    let query = r"
        UPDATE campaigns
        SET name = $2, budget = $3, status = $4, investor_id = $5
        WHERE id = $1
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(campaign_id)
        .bind(&changes.name)
        .bind(changes.budget)
        .bind(&changes.status)
        .bind(changes.investor_id)
        .execute(&*pool)
        .instrument(span)
        .await;
    if let Err(err) = result {
        error!("Failed to update campaign: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match fetch_campaign(&pool, campaign_id, None).await {
        Ok(Some(campaign)) => (StatusCode::OK, Json(campaign)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Campaign not found.").into_response(),
        Err(err) => {
            error!("Failed to reload campaign: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    patch,
    path = "/api/campaigns/{campaign_id}/status",
    request_body = CampaignStatusUpdate,
    params(("campaign_id" = i64, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Status updated", body = CampaignOut),
        (status = 404, description = "No such campaign within the caller's scope")
    ),
    tag = "campaigns"
)]
pub(crate) async fn update_campaign_status(
    Path(campaign_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<CampaignStatusUpdate>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    match fetch_campaign(&pool, campaign_id, principal.investor_scope()).await {
        Ok(Some(_)) => {}
        Ok(None) => return (StatusCode::NOT_FOUND, "Campaign not found.").into_response(),
        Err(err) => {
            error!("Failed to fetch campaign: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    }

    let query = "UPDATE campaigns SET status = $2 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(campaign_id)
        .bind(&payload.status)
        .execute(&*pool)
        .instrument(span)
        .await;
    if let Err(err) = result {
        error!("Failed to update campaign status: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match fetch_campaign(&pool, campaign_id, None).await {
        Ok(Some(campaign)) => (StatusCode::OK, Json(campaign)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Campaign not found.").into_response(),
        Err(err) => {
            error!("Failed to reload campaign: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/campaigns/{campaign_id}",
    params(("campaign_id" = i64, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign and its applications deleted", body = CampaignDeleteResponse),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Unknown campaign")
    ),
    tag = "campaigns"
)]
pub(crate) async fn delete_campaign(
    Path(campaign_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Err(err) = require_role(&headers, &pool, &auth_state, &[Role::Admin]).await {
        return err.into_response();
    }

    match delete_campaign_tx(&pool, campaign_id).await {
        Ok(Some(deleted_applications)) => (
            StatusCode::OK,
            Json(CampaignDeleteResponse {
                success: true,
                deleted_campaign_id: campaign_id,
                deleted_applications,
            }),
        )
            .into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Campaign not found.").into_response(),
        Err(err) => {
            error!("Failed to delete campaign: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Delete a campaign and its applications in one transaction. Returns the
/// number of applications removed, or `None` when the campaign is unknown.
async fn delete_campaign_tx(pool: &PgPool, campaign_id: i64) -> Result<Option<u64>> {
    let mut tx = pool.begin().await.context("begin campaign deletion")?;

    let query = "DELETE FROM applications WHERE campaign_id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let deleted_applications = sqlx::query(query)
        .bind(campaign_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete campaign applications")?
        .rows_affected();

    let query = "DELETE FROM campaigns WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let deleted = sqlx::query(query)
        .bind(campaign_id)
        .execute(&mut *tx)
        .instrument(span)
        .await
        .context("failed to delete campaign")?
        .rows_affected();

    if deleted == 0 {
        // Dropping the transaction rolls the application deletes back.
        return Ok(None);
    }

    tx.commit().await.context("commit campaign deletion")?;
    Ok(Some(deleted_applications))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn campaign() -> CampaignOut {
        CampaignOut {
            id: 3,
            investor_id: 5,
            investor_login: Some("ivy".to_string()),
            investor_name: Some("Ivy".to_string()),
            name: "Spring push".to_string(),
            budget: 1000.0,
            status: "active".to_string(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn empty_update_is_rejected() {
        let result = apply_campaign_update(&campaign(), &CampaignUpdate::default());
        assert_eq!(result, Err("No fields to update."));
    }

    #[test]
    fn update_keeps_unset_fields() -> std::result::Result<(), &'static str> {
        let changes = apply_campaign_update(
            &campaign(),
            &CampaignUpdate {
                budget: Some(2500.0),
                ..CampaignUpdate::default()
            },
        )?;
        assert_eq!(changes.name, "Spring push");
        assert_eq!(changes.budget, 2500.0);
        assert_eq!(changes.status, "active");
        assert_eq!(changes.investor_id, 5);
        Ok(())
    }

    #[test]
    fn reassignment_carries_through() -> std::result::Result<(), &'static str> {
        let changes = apply_campaign_update(
            &campaign(),
            &CampaignUpdate {
                investor_id: Some(9),
                ..CampaignUpdate::default()
            },
        )?;
        assert_eq!(changes.investor_id, 9);
        Ok(())
    }
}
