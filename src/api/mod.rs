//! HTTP server assembly: pool, router, middleware layers, and lifecycle.

use anyhow::{anyhow, Context, Result};
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{
        header::{AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method, Request,
    },
    routing::{get, patch, post, put},
    Extension, Router,
};
use sqlx::postgres::PgPoolOptions;
use std::{sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, info_span, Span};
use ulid::Ulid;
use url::Url;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub(crate) mod handlers;
mod openapi;

pub use handlers::auth::{AuthConfig, AuthState};

use handlers::{applications, auth, bootstrap, campaigns, health, stats, users};

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

/// Routes under the `/api` prefix. Kept in one place so the OpenAPI document
/// in `openapi.rs` stays the authoritative description of the same surface.
fn api_router() -> Router {
    Router::new()
        .route("/auth/login", post(auth::session::login))
        .route("/auth/refresh", post(auth::session::refresh))
        .route("/auth/logout", post(auth::session::logout))
        .route("/auth/me", get(auth::session::me))
        .route("/users", get(users::list_users).post(users::create_user))
        .route("/users/:user_id", put(users::update_user))
        .route("/users/:user_id/toggle", patch(users::toggle_user))
        .route(
            "/campaigns",
            get(campaigns::list_campaigns).post(campaigns::create_campaign),
        )
        .route(
            "/campaigns/:campaign_id",
            put(campaigns::update_campaign).delete(campaigns::delete_campaign),
        )
        .route(
            "/campaigns/:campaign_id/status",
            patch(campaigns::update_campaign_status),
        )
        .route("/applications", get(applications::list_applications))
        .route(
            "/applications/:application_id",
            put(applications::update_application).delete(applications::delete_application),
        )
        .route("/stats/dashboard", get(stats::dashboard))
        .route("/stats/campaign/:campaign_id", get(stats::campaign_stats))
}

/// Start the server.
///
/// # Errors
///
/// Returns an error if the database is unreachable, the bootstrap admin
/// cannot be ensured, the CORS origins are invalid, or the listener fails.
pub async fn new(
    port: u16,
    dsn: String,
    auth_config: AuthConfig,
    cors_origins: Vec<String>,
) -> Result<()> {
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    if bootstrap::ensure_bootstrap_admin(&pool, &auth_config).await? {
        info!("Bootstrap admin user created");
    }

    let auth_state = Arc::new(AuthState::new(auth_config));

    let cors = CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION])
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_origin(AllowOrigin::list(parse_cors_origins(&cors_origins)?));

    let app = Router::new()
        .nest("/api", api_router())
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", openapi::ApiDoc::openapi()))
        .route("/healthz", get(health::health))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &Request<Body>| {
                        HeaderValue::from_str(Ulid::new().to_string().as_str()).ok()
                    },
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(Extension(auth_state))
                .layer(Extension(pool)),
        );

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Gracefully shutdown");
        })
        .await?;

    Ok(())
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// Validate the configured CORS origins and normalize them to
/// `scheme://host[:port]` header values.
fn parse_cors_origins(origins: &[String]) -> Result<Vec<HeaderValue>> {
    origins
        .iter()
        .map(|origin| {
            let parsed =
                Url::parse(origin).with_context(|| format!("Invalid CORS origin: {origin}"))?;
            let host = parsed
                .host_str()
                .ok_or_else(|| anyhow!("CORS origin must include a valid host: {origin}"))?;
            let port = parsed
                .port()
                .map_or_else(String::new, |port| format!(":{port}"));
            let normalized = format!("{}://{}{}", parsed.scheme(), host, port);
            HeaderValue::from_str(&normalized).context("Failed to build CORS origin header")
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_cors_origins_normalizes_values() -> Result<()> {
        let origins = vec![
            "http://localhost:5173/".to_string(),
            "https://admin.example.com".to_string(),
        ];
        let values = parse_cors_origins(&origins)?;
        assert_eq!(values[0], HeaderValue::from_static("http://localhost:5173"));
        assert_eq!(
            values[1],
            HeaderValue::from_static("https://admin.example.com")
        );
        Ok(())
    }

    #[test]
    fn parse_cors_origins_rejects_garbage() {
        assert!(parse_cors_origins(&["not a url".to_string()]).is_err());
    }
}
