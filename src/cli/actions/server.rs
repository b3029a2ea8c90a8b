//! Server action: assemble the auth configuration and run the API.

use anyhow::Result;
use jsonwebtoken::Algorithm;
use secrecy::SecretString;

use crate::api::{self, AuthConfig};
use crate::cli::{actions::Action, telemetry};

/// Validated server configuration produced by the CLI dispatcher.
#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub cors_origins: Vec<String>,
    pub jwt_secret: SecretString,
    pub jwt_algorithm: Algorithm,
    pub access_ttl_minutes: i64,
    pub refresh_ttl_days: i64,
    pub login_rate_limit: usize,
    pub login_rate_window_seconds: u64,
    pub bootstrap_admin_login: Option<String>,
    pub bootstrap_admin_password: Option<SecretString>,
    pub bootstrap_admin_name: String,
}

/// Handle the server action.
///
/// # Errors
///
/// Returns an error if the server fails to start or exits abnormally.
pub async fn handle(action: Action) -> Result<()> {
    let Action::Server(args) = action;

    let auth_config = AuthConfig::new(args.jwt_secret)
        .with_jwt_algorithm(args.jwt_algorithm)
        .with_access_ttl_seconds(args.access_ttl_minutes * 60)
        .with_refresh_ttl_seconds(args.refresh_ttl_days * 24 * 60 * 60)
        .with_login_rate_limit(args.login_rate_limit)
        .with_login_rate_window_seconds(args.login_rate_window_seconds)
        .with_bootstrap_admin(
            args.bootstrap_admin_login,
            args.bootstrap_admin_password,
            args.bootstrap_admin_name,
        );

    let result = api::new(args.port, args.dsn, auth_config, args.cors_origins).await;

    telemetry::shutdown_tracer();

    result
}
