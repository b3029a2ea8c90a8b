//! OpenAPI document for the API surface.
//!
//! Handlers annotated with `#[utoipa::path]` are registered here; `/healthz`
//! is intentionally undocumented.

use utoipa::OpenApi;

use super::handlers::{applications, auth, campaigns, stats, users};

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::session::login,
        auth::session::refresh,
        auth::session::logout,
        auth::session::me,
        users::list_users,
        users::create_user,
        users::update_user,
        users::toggle_user,
        campaigns::list_campaigns,
        campaigns::create_campaign,
        campaigns::update_campaign,
        campaigns::update_campaign_status,
        campaigns::delete_campaign,
        applications::list_applications,
        applications::update_application,
        applications::delete_application,
        stats::dashboard,
        stats::campaign_stats,
    ),
    components(schemas(
        auth::principal::Role,
        auth::types::LoginRequest,
        auth::types::RefreshRequest,
        auth::types::LogoutRequest,
        auth::types::LogoutResponse,
        auth::types::UserOut,
        auth::types::AuthResponse,
        users::UserCreate,
        users::UserUpdate,
        users::UserToggleResponse,
        campaigns::CampaignOut,
        campaigns::CampaignCreate,
        campaigns::CampaignUpdate,
        campaigns::CampaignStatusUpdate,
        campaigns::CampaignDeleteResponse,
        applications::ApplicationOut,
        applications::ApplicationUpdate,
        applications::ApplicationDeleteResponse,
        stats::CampaignMetric,
        stats::DashboardTotals,
        stats::TimelinePoint,
        stats::DashboardResponse,
        stats::CampaignStatsResponse,
    )),
    tags(
        (name = "auth", description = "Session issuance, rotation, and revocation"),
        (name = "users", description = "User administration"),
        (name = "campaigns", description = "Campaign management"),
        (name = "applications", description = "Lead applications"),
        (name = "stats", description = "Dashboard and campaign statistics"),
    )
)]
pub(crate) struct ApiDoc;
