//! Command-line argument dispatch and server initialization.
//!
//! Parses validated CLI arguments and maps them to the appropriate action,
//! currently starting the API server with its full configuration.

use anyhow::{Context, Result};

use crate::cli::actions::{server::Args, Action};
use crate::cli::commands::auth;

/// Map validated CLI matches to a server action.
///
/// # Errors
///
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;
    let cors_origins = matches
        .get_one::<String>("cors-origins")
        .map(|origins| {
            origins
                .split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .map(str::to_string)
                .collect::<Vec<String>>()
        })
        .unwrap_or_default();

    let auth_opts = auth::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        cors_origins,
        jwt_secret: auth_opts.jwt_secret,
        jwt_algorithm: auth_opts.jwt_algorithm,
        access_ttl_minutes: auth_opts.access_ttl_minutes,
        refresh_ttl_days: auth_opts.refresh_ttl_days,
        login_rate_limit: auth_opts.login_rate_limit,
        login_rate_window_seconds: auth_opts.login_rate_window_seconds,
        bootstrap_admin_login: auth_opts.bootstrap_admin_login,
        bootstrap_admin_password: auth_opts.bootstrap_admin_password,
        bootstrap_admin_name: auth_opts.bootstrap_admin_name,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_server_action_from_args() -> Result<()> {
        temp_env::with_vars(
            [
                ("KONTORO_PORT", None::<&str>),
                ("KONTORO_CORS_ORIGINS", None::<&str>),
            ],
            || {
                let command = crate::cli::commands::new();
                let matches = command.get_matches_from(vec![
                    "kontoro",
                    "--dsn",
                    "postgres://user@localhost:5432/kontoro",
                    "--jwt-secret",
                    "secret",
                    "--cors-origins",
                    "http://localhost:5173, https://admin.example.com",
                ]);
                let Action::Server(args) = handler(&matches)?;
                assert_eq!(args.port, 8080);
                assert_eq!(args.dsn, "postgres://user@localhost:5432/kontoro");
                assert_eq!(
                    args.cors_origins,
                    vec![
                        "http://localhost:5173".to_string(),
                        "https://admin.example.com".to_string(),
                    ]
                );
                Ok(())
            },
        )
    }

    #[test]
    fn rejects_bad_algorithm() {
        temp_env::with_vars([("KONTORO_JWT_ALGORITHM", Some("ES256"))], || {
            let command = crate::cli::commands::new();
            let matches = command.get_matches_from(vec![
                "kontoro",
                "--dsn",
                "postgres://user@localhost:5432/kontoro",
                "--jwt-secret",
                "secret",
            ]);
            assert!(handler(&matches).is_err());
        });
    }
}
