//! Application management endpoints.
//!
//! Applications are scoped through their campaign: investors only see and
//! touch rows whose campaign they own. Unattributed applications
//! (campaign_id NULL) are visible to admins only.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path, Query},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::sync::Arc;
use tracing::{error, Instrument};
use utoipa::{IntoParams, ToSchema};

use super::auth::{
    principal::{require_auth, require_role, Role},
    AuthState,
};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct ApplicationOut {
    pub(crate) id: i64,
    pub(crate) telegram_id: i64,
    pub(crate) username: Option<String>,
    pub(crate) first_name: String,
    pub(crate) phone: String,
    pub(crate) age: i32,
    pub(crate) citizenship: String,
    pub(crate) source: String,
    pub(crate) contacted: bool,
    pub(crate) submitted_at: DateTime<Utc>,
    pub(crate) campaign_id: Option<i64>,
    pub(crate) campaign_name: Option<String>,
    pub(crate) status: String,
    pub(crate) revenue: Option<f64>,
}

#[derive(ToSchema, Deserialize, Debug, Default)]
pub(crate) struct ApplicationUpdate {
    pub(crate) status: Option<String>,
    pub(crate) revenue: Option<f64>,
}

#[derive(IntoParams, Deserialize, Debug, Default)]
pub(crate) struct ApplicationFilter {
    /// Restrict to one campaign.
    pub(crate) campaign: Option<i64>,
    /// Restrict to one status; unset rows count as "new".
    pub(crate) status: Option<String>,
    /// Inclusive lower bound on the submission day.
    pub(crate) date_from: Option<NaiveDate>,
    /// Inclusive upper bound on the submission day.
    pub(crate) date_to: Option<NaiveDate>,
}

#[derive(ToSchema, Serialize, Debug)]
pub(crate) struct ApplicationDeleteResponse {
    pub(crate) success: bool,
    pub(crate) deleted_application_id: i64,
}

const APPLICATION_SELECT: &str = r"
    SELECT a.id, a.telegram_id, a.username, a.first_name, a.phone, a.age,
           a.citizenship, a.source, a.contacted, a.submitted_at, a.campaign_id,
           a.revenue, COALESCE(a.status, 'new') AS status,
           c.name AS campaign_name
    FROM applications a
    LEFT JOIN campaigns c ON c.id = a.campaign_id
";

fn application_from_row(row: &PgRow) -> ApplicationOut {
    ApplicationOut {
        id: row.get("id"),
        telegram_id: row.get("telegram_id"),
        username: row.get("username"),
        first_name: row.get("first_name"),
        phone: row.get("phone"),
        age: row.get("age"),
        citizenship: row.get("citizenship"),
        source: row.get("source"),
        contacted: row.get("contacted"),
        submitted_at: row.get("submitted_at"),
        campaign_id: row.get("campaign_id"),
        campaign_name: row.get("campaign_name"),
        status: row.get("status"),
        revenue: row.get("revenue"),
    }
}

#[utoipa::path(
    get,
    path = "/api/applications",
    params(ApplicationFilter),
    responses(
        (status = 200, description = "Applications visible to the caller", body = [ApplicationOut]),
        (status = 401, description = "Not authenticated")
    ),
    tag = "applications"
)]
pub(crate) async fn list_applications(
    Query(filter): Query<ApplicationFilter>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let query = format!(
        r"
        {APPLICATION_SELECT}
        WHERE ($1::BIGINT IS NULL OR c.investor_id = $1)
          AND ($2::BIGINT IS NULL OR a.campaign_id = $2)
          AND ($3::TEXT IS NULL OR COALESCE(a.status, 'new') = $3)
          AND ($4::DATE IS NULL OR a.submitted_at::date >= $4)
          AND ($5::DATE IS NULL OR a.submitted_at::date <= $5)
        ORDER BY a.id DESC
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(principal.investor_scope())
        .bind(filter.campaign)
        .bind(&filter.status)
        .bind(filter.date_from)
        .bind(filter.date_to)
        .fetch_all(&*pool)
        .instrument(span)
        .await;

    match rows {
        Ok(rows) => {
            let applications: Vec<ApplicationOut> =
                rows.iter().map(application_from_row).collect();
            (StatusCode::OK, Json(applications)).into_response()
        }
        Err(err) => {
            error!("Failed to list applications: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Resolve an application through the caller's ownership scope; rows outside
/// the scope answer `None` (404 to the caller).
async fn fetch_application(
    pool: &PgPool,
    application_id: i64,
    scope: Option<i64>,
) -> Result<Option<ApplicationOut>> {
    let query = format!(
        "{APPLICATION_SELECT} WHERE a.id = $1 AND ($2::BIGINT IS NULL OR c.investor_id = $2)"
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let row = sqlx::query(&query)
        .bind(application_id)
        .bind(scope)
        .fetch_optional(pool)
        .instrument(span)
        .await
        .context("failed to fetch application")?;
    Ok(row.map(|row| application_from_row(&row)))
}

#[utoipa::path(
    put,
    path = "/api/applications/{application_id}",
    request_body = ApplicationUpdate,
    params(("application_id" = i64, Path, description = "Application id")),
    responses(
        (status = 200, description = "Application updated", body = ApplicationOut),
        (status = 400, description = "No fields to update"),
        (status = 404, description = "No such application within the caller's scope")
    ),
    tag = "applications"
)]
pub(crate) async fn update_application(
    Path(application_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
    Json(payload): Json<ApplicationUpdate>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    if payload.status.is_none() && payload.revenue.is_none() {
        return (StatusCode::BAD_REQUEST, "No fields to update.").into_response();
    }

    let existing =
        match fetch_application(&pool, application_id, principal.investor_scope()).await {
            Ok(Some(application)) => application,
            Ok(None) => {
                return (StatusCode::NOT_FOUND, "Application not found.").into_response()
            }
            Err(err) => {
                error!("Failed to fetch application: {err:#}");
                return StatusCode::INTERNAL_SERVER_ERROR.into_response();
            }
        };

    let status = payload.status.unwrap_or(existing.status);
    let revenue = payload.revenue.or(existing.revenue);

    let query = "UPDATE applications SET status = $2, revenue = $3 WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "UPDATE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(application_id)
        .bind(&status)
        .bind(revenue)
        .execute(&*pool)
        .instrument(span)
        .await;
    if let Err(err) = result {
        error!("Failed to update application: {err}");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    }

    match fetch_application(&pool, application_id, principal.investor_scope()).await {
        Ok(Some(application)) => (StatusCode::OK, Json(application)).into_response(),
        Ok(None) => (StatusCode::NOT_FOUND, "Application not found.").into_response(),
        Err(err) => {
            error!("Failed to reload application: {err:#}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/api/applications/{application_id}",
    params(("application_id" = i64, Path, description = "Application id")),
    responses(
        (status = 200, description = "Application deleted", body = ApplicationDeleteResponse),
        (status = 403, description = "Not an admin"),
        (status = 404, description = "Unknown application")
    ),
    tag = "applications"
)]
pub(crate) async fn delete_application(
    Path(application_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    if let Err(err) = require_role(&headers, &pool, &auth_state, &[Role::Admin]).await {
        return err.into_response();
    }

    let query = "DELETE FROM applications WHERE id = $1";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "DELETE",
        db.statement = query
    );
    let result = sqlx::query(query)
        .bind(application_id)
        .execute(&*pool)
        .instrument(span)
        .await;

    match result {
        Ok(result) if result.rows_affected() == 0 => {
            (StatusCode::NOT_FOUND, "Application not found.").into_response()
        }
        Ok(_) => (
            StatusCode::OK,
            Json(ApplicationDeleteResponse {
                success: true,
                deleted_application_id: application_id,
            }),
        )
            .into_response(),
        Err(err) => {
            error!("Failed to delete application: {err}");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;

    #[test]
    fn filter_deserializes_from_query_fields() -> Result<()> {
        let filter: ApplicationFilter = serde_json::from_value(serde_json::json!({
            "campaign": 3,
            "status": "new",
            "date_from": "2025-01-01",
            "date_to": "2025-01-31",
        }))?;
        assert_eq!(filter.campaign, Some(3));
        assert_eq!(filter.status.as_deref(), Some("new"));
        assert_eq!(
            filter.date_from,
            NaiveDate::from_ymd_opt(2025, 1, 1)
        );
        assert_eq!(filter.date_to, NaiveDate::from_ymd_opt(2025, 1, 31));
        Ok(())
    }

    #[test]
    fn filter_fields_are_optional() -> Result<()> {
        let filter: ApplicationFilter = serde_json::from_value(serde_json::json!({}))?;
        assert!(filter.campaign.is_none());
        assert!(filter.status.is_none());
        assert!(filter.date_from.is_none());
        assert!(filter.date_to.is_none());
        Ok(())
    }

    #[test]
    fn unset_status_reads_as_new() -> Result<()> {
        let application: ApplicationOut = serde_json::from_value(serde_json::json!({
            "id": 1,
            "telegram_id": 42,
            "username": null,
            "first_name": "Lev",
            "phone": "+7000",
            "age": 21,
            "citizenship": "RU",
            "source": "bot",
            "contacted": false,
            "submitted_at": "2025-01-01T00:00:00Z",
            "campaign_id": null,
            "campaign_name": null,
            "status": "new",
            "revenue": null,
        }))?;
        assert_eq!(application.status, "new");
        assert!(application.campaign_id.is_none());
        Ok(())
    }
}
