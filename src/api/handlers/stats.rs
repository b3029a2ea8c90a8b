//! Dashboard and per-campaign statistics.

use anyhow::{Context, Result};
use axum::{
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{postgres::PgRow, PgPool, Row};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, Instrument};
use utoipa::ToSchema;

use super::auth::{principal::require_auth, AuthState};
use super::metrics::{calc_profit_metrics, round2};

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub(crate) struct CampaignMetric {
    pub(crate) campaign_id: i64,
    pub(crate) campaign_name: String,
    pub(crate) investor_id: i64,
    pub(crate) investor_name: Option<String>,
    pub(crate) status: String,
    pub(crate) budget: f64,
    pub(crate) percent: f64,
    pub(crate) applications_count: i64,
    pub(crate) total_revenue: f64,
    pub(crate) net_profit: f64,
    pub(crate) investor_profit: f64,
    pub(crate) admin_profit: f64,
    pub(crate) roi: f64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct DashboardTotals {
    pub(crate) campaigns: i64,
    pub(crate) total_budget: f64,
    pub(crate) total_revenue: f64,
    pub(crate) net_profit: f64,
    pub(crate) investor_profit: f64,
    pub(crate) admin_profit: f64,
    pub(crate) roi: f64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct TimelinePoint {
    /// Submission day, `YYYY-MM-DD`.
    pub(crate) date: String,
    pub(crate) revenue: f64,
}

#[derive(ToSchema, Serialize, Debug)]
pub(crate) struct DashboardResponse {
    pub(crate) totals: DashboardTotals,
    pub(crate) campaigns: Vec<CampaignMetric>,
    pub(crate) timeline: Vec<TimelinePoint>,
    pub(crate) generated_at: DateTime<Utc>,
}

#[derive(ToSchema, Serialize, Debug)]
pub(crate) struct CampaignStatsResponse {
    pub(crate) campaign: CampaignMetric,
    pub(crate) applications_by_status: BTreeMap<String, i64>,
    pub(crate) timeline: Vec<TimelinePoint>,
    pub(crate) generated_at: DateTime<Utc>,
}

const CAMPAIGN_METRIC_SELECT: &str = r"
    SELECT c.id, c.investor_id, c.name, c.budget, c.status,
           u.name AS investor_name, u.percent AS percent,
           COALESCE(SUM(a.revenue), 0) AS total_revenue,
           COUNT(a.id) AS applications_count
    FROM campaigns c
    JOIN users u ON u.id = c.investor_id
    LEFT JOIN applications a ON a.campaign_id = c.id
";

const CAMPAIGN_METRIC_GROUP: &str = r"
    GROUP BY c.id, c.investor_id, c.name, c.budget, c.status, u.name, u.percent
";

fn campaign_metric_from_row(row: &PgRow) -> CampaignMetric {
    let budget: f64 = row.get("budget");
    let percent: f64 = row.get::<Option<f64>, _>("percent").unwrap_or(0.0);
    let total_revenue: f64 = row.get("total_revenue");
    let computed = calc_profit_metrics(total_revenue, budget, percent);

    CampaignMetric {
        campaign_id: row.get("id"),
        campaign_name: row.get("name"),
        investor_id: row.get("investor_id"),
        investor_name: row.get("investor_name"),
        status: row.get("status"),
        budget: round2(budget),
        percent: round2(percent),
        applications_count: row.get("applications_count"),
        total_revenue: computed.total_revenue,
        net_profit: computed.net_profit,
        investor_profit: computed.investor_profit,
        admin_profit: computed.admin_profit,
        roi: computed.roi,
    }
}

/// Sum per-campaign figures; the aggregate roi relates total net profit to
/// total budget, zero when nothing was budgeted.
fn build_totals(metrics: &[CampaignMetric]) -> DashboardTotals {
    let total_budget = round2(metrics.iter().map(|metric| metric.budget).sum());
    let total_revenue = round2(metrics.iter().map(|metric| metric.total_revenue).sum());
    let net_profit = round2(metrics.iter().map(|metric| metric.net_profit).sum());
    let investor_profit = round2(metrics.iter().map(|metric| metric.investor_profit).sum());
    let admin_profit = round2(metrics.iter().map(|metric| metric.admin_profit).sum());
    let roi = if total_budget > 0.0 {
        round2(net_profit / total_budget * 100.0)
    } else {
        0.0
    };

    DashboardTotals {
        campaigns: metrics.len() as i64,
        total_budget,
        total_revenue,
        net_profit,
        investor_profit,
        admin_profit,
        roi,
    }
}

async fn load_timeline(
    pool: &PgPool,
    scope: Option<i64>,
    campaign_id: Option<i64>,
) -> Result<Vec<TimelinePoint>> {
    let query = r"
        SELECT a.submitted_at::date AS day, COALESCE(SUM(a.revenue), 0) AS revenue
        FROM applications a
        JOIN campaigns c ON c.id = a.campaign_id
        WHERE ($1::BIGINT IS NULL OR c.investor_id = $1)
          AND ($2::BIGINT IS NULL OR a.campaign_id = $2)
        GROUP BY day
        ORDER BY day ASC
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(scope)
        .bind(campaign_id)
        .fetch_all(pool)
        .instrument(span)
        .await
        .context("failed to load revenue timeline")?;

    Ok(rows
        .iter()
        .map(|row| {
            let day: NaiveDate = row.get("day");
            TimelinePoint {
                date: day.to_string(),
                revenue: round2(row.get("revenue")),
            }
        })
        .collect())
}

#[utoipa::path(
    get,
    path = "/api/stats/dashboard",
    responses(
        (status = 200, description = "Totals, campaign metrics and timeline", body = DashboardResponse),
        (status = 401, description = "Not authenticated")
    ),
    tag = "stats"
)]
pub(crate) async fn dashboard(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };
    let scope = principal.investor_scope();

    let query = format!(
        r"
        {CAMPAIGN_METRIC_SELECT}
        WHERE ($1::BIGINT IS NULL OR c.investor_id = $1)
        {CAMPAIGN_METRIC_GROUP}
        ORDER BY c.id DESC
        "
    );
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query.as_str()
    );
    let rows = sqlx::query(&query)
        .bind(scope)
        .fetch_all(&*pool)
        .instrument(span)
        .await;

    let campaigns: Vec<CampaignMetric> = match rows {
        Ok(rows) => rows.iter().map(campaign_metric_from_row).collect(),
        Err(err) => {
            error!("Failed to load campaign metrics: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let timeline = match load_timeline(&pool, scope, None).await {
        Ok(timeline) => timeline,
        Err(err) => {
            error!("Failed to load timeline: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let response = DashboardResponse {
        totals: build_totals(&campaigns),
        campaigns,
        timeline,
        generated_at: Utc::now(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[utoipa::path(
    get,
    path = "/api/stats/campaign/{campaign_id}",
    params(("campaign_id" = i64, Path, description = "Campaign id")),
    responses(
        (status = 200, description = "Campaign metrics, status histogram and timeline", body = CampaignStatsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 404, description = "No such campaign within the caller's scope")
    ),
    tag = "stats"
)]
pub(crate) async fn campaign_stats(
    Path(campaign_id): Path<i64>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    auth_state: Extension<Arc<AuthState>>,
) -> Response {
    let principal = match require_auth(&headers, &pool, &auth_state).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };
    let scope = principal.investor_scope();

    let query = format!(
        r"
        {CAMPAIGN_METRIC_SELECT}
        WHERE c.id = $1 AND ($2::BIGINT IS NULL OR c.investor_id = $2)
        {CAMPAIGN_METRIC_GROUP}
        "
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
        .fetch_optional(&*pool)
        .instrument(span)
        .await;

    let campaign = match row {
        Ok(Some(row)) => campaign_metric_from_row(&row),
        Ok(None) => return (StatusCode::NOT_FOUND, "Campaign not found.").into_response(),
        Err(err) => {
            error!("Failed to load campaign stats: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let query = r"
        SELECT COALESCE(status, 'new') AS status, COUNT(*) AS amount
        FROM applications
        WHERE campaign_id = $1
        GROUP BY COALESCE(status, 'new')
    ";
    let span = tracing::info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = "SELECT",
        db.statement = query
    );
    let rows = sqlx::query(query)
        .bind(campaign_id)
        .fetch_all(&*pool)
        .instrument(span)
        .await;

    let applications_by_status: BTreeMap<String, i64> = match rows {
        Ok(rows) => rows
            .iter()
            .map(|row| (row.get("status"), row.get("amount")))
            .collect(),
        Err(err) => {
            error!("Failed to load status histogram: {err}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let timeline = match load_timeline(&pool, scope, Some(campaign_id)).await {
        Ok(timeline) => timeline,
        Err(err) => {
            error!("Failed to load timeline: {err:#}");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let response = CampaignStatsResponse {
        campaign,
        applications_by_status,
        timeline,
        generated_at: Utc::now(),
    };
    (StatusCode::OK, Json(response)).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metric(budget: f64, revenue: f64, percent: f64) -> CampaignMetric {
        let computed = calc_profit_metrics(revenue, budget, percent);
        CampaignMetric {
            campaign_id: 1,
            campaign_name: "c".to_string(),
            investor_id: 1,
            investor_name: None,
            status: "active".to_string(),
            budget,
            percent,
            applications_count: 0,
            total_revenue: computed.total_revenue,
            net_profit: computed.net_profit,
            investor_profit: computed.investor_profit,
            admin_profit: computed.admin_profit,
            roi: computed.roi,
        }
    }

    #[test]
    fn totals_sum_campaign_figures() {
        let metrics = vec![metric(1000.0, 1500.0, 40.0), metric(500.0, 400.0, 50.0)];
        let totals = build_totals(&metrics);
        assert_eq!(totals.campaigns, 2);
        assert_eq!(totals.total_budget, 1500.0);
        assert_eq!(totals.total_revenue, 1900.0);
        assert_eq!(totals.net_profit, 400.0);
        assert_eq!(totals.investor_profit, 150.0);
        assert_eq!(totals.admin_profit, 250.0);
        // 400 / 1500 * 100
        assert_eq!(totals.roi, 26.67);
    }

    #[test]
    fn empty_dashboard_has_zero_totals() {
        let totals = build_totals(&[]);
        assert_eq!(totals.campaigns, 0);
        assert_eq!(totals.total_budget, 0.0);
        assert_eq!(totals.roi, 0.0);
    }
}
