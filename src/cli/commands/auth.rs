//! Session/auth related CLI arguments.

use anyhow::{bail, Context, Result};
use clap::{Arg, ArgMatches, Command};
use jsonwebtoken::Algorithm;
use secrecy::SecretString;

pub fn with_args(command: Command) -> Command {
    let command = with_token_args(command);
    let command = with_rate_limit_args(command);
    with_bootstrap_args(command)
}

fn with_token_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("jwt-secret")
                .long("jwt-secret")
                .help("Secret used to sign bearer tokens")
                .env("KONTORO_JWT_SECRET")
                .required(true),
        )
        .arg(
            Arg::new("jwt-algorithm")
                .long("jwt-algorithm")
                .help("HMAC signing algorithm: HS256, HS384, or HS512")
                .env("KONTORO_JWT_ALGORITHM")
                .default_value("HS256"),
        )
        .arg(
            Arg::new("access-token-ttl-minutes")
                .long("access-token-ttl-minutes")
                .help("Access token TTL in minutes")
                .env("KONTORO_ACCESS_TOKEN_TTL_MINUTES")
                .default_value("15")
                .value_parser(clap::value_parser!(i64)),
        )
        .arg(
            Arg::new("refresh-token-ttl-days")
                .long("refresh-token-ttl-days")
                .help("Refresh token TTL in days")
                .env("KONTORO_REFRESH_TOKEN_TTL_DAYS")
                .default_value("30")
                .value_parser(clap::value_parser!(i64)),
        )
}

fn with_rate_limit_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("login-rate-limit")
                .long("login-rate-limit")
                .help("Login attempts allowed per client within the window")
                .env("KONTORO_LOGIN_RATE_LIMIT")
                .default_value("5")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new("login-rate-window-seconds")
                .long("login-rate-window-seconds")
                .help("Sliding window for login throttling in seconds")
                .env("KONTORO_LOGIN_RATE_WINDOW_SECONDS")
                .default_value("900")
                .value_parser(clap::value_parser!(u64)),
        )
}

fn with_bootstrap_args(command: Command) -> Command {
    command
        .arg(
            Arg::new("bootstrap-admin-login")
                .long("bootstrap-admin-login")
                .help("Login of the admin created at first start if absent")
                .env("KONTORO_BOOTSTRAP_ADMIN_LOGIN"),
        )
        .arg(
            Arg::new("bootstrap-admin-password")
                .long("bootstrap-admin-password")
                .help("Password for the bootstrap admin")
                .env("KONTORO_BOOTSTRAP_ADMIN_PASSWORD"),
        )
        .arg(
            Arg::new("bootstrap-admin-name")
                .long("bootstrap-admin-name")
                .help("Display name for the bootstrap admin")
                .env("KONTORO_BOOTSTRAP_ADMIN_NAME")
                .default_value("Administrator"),
        )
}

/// Parsed auth options.
#[derive(Debug)]
pub struct Options {
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

impl Options {
    /// Parse and validate auth options from CLI matches.
    ///
    /// # Errors
    ///
    /// Returns an error when required arguments are missing or the signing
    /// algorithm is not an HMAC variant.
    pub fn parse(matches: &ArgMatches) -> Result<Self> {
        let jwt_secret = matches
            .get_one::<String>("jwt-secret")
            .cloned()
            .context("missing required argument: --jwt-secret")?;

        let algorithm_name = matches
            .get_one::<String>("jwt-algorithm")
            .cloned()
            .unwrap_or_else(|| "HS256".to_string());
        let jwt_algorithm: Algorithm = algorithm_name
            .parse()
            .with_context(|| format!("unknown signing algorithm: {algorithm_name}"))?;
        // The signing secret is symmetric; asymmetric algorithms would need a
        // key pair the CLI does not take.
        if !matches!(
            jwt_algorithm,
            Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512
        ) {
            bail!("unsupported signing algorithm: {algorithm_name} (expected HS256/HS384/HS512)");
        }

        Ok(Self {
            jwt_secret: SecretString::from(jwt_secret),
            jwt_algorithm,
            access_ttl_minutes: matches
                .get_one::<i64>("access-token-ttl-minutes")
                .copied()
                .unwrap_or(15),
            refresh_ttl_days: matches
                .get_one::<i64>("refresh-token-ttl-days")
                .copied()
                .unwrap_or(30),
            login_rate_limit: matches
                .get_one::<usize>("login-rate-limit")
                .copied()
                .unwrap_or(5),
            login_rate_window_seconds: matches
                .get_one::<u64>("login-rate-window-seconds")
                .copied()
                .unwrap_or(900),
            bootstrap_admin_login: matches
                .get_one::<String>("bootstrap-admin-login")
                .cloned()
                .filter(|login| !login.is_empty()),
            bootstrap_admin_password: matches
                .get_one::<String>("bootstrap-admin-password")
                .cloned()
                .filter(|password| !password.is_empty())
                .map(SecretString::from),
            bootstrap_admin_name: matches
                .get_one::<String>("bootstrap-admin-name")
                .cloned()
                .unwrap_or_else(|| "Administrator".to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn matches(extra: &[&str]) -> ArgMatches {
        let mut args = vec![
            "kontoro",
            "--dsn",
            "postgres://user@localhost:5432/kontoro",
            "--jwt-secret",
            "secret",
        ];
        args.extend_from_slice(extra);
        crate::cli::commands::new().get_matches_from(args)
    }

    #[test]
    fn defaults_are_applied() -> Result<()> {
        temp_env::with_vars([("KONTORO_JWT_ALGORITHM", None::<&str>)], || {
            let options = Options::parse(&matches(&[]))?;
            assert_eq!(options.jwt_secret.expose_secret(), "secret");
            assert_eq!(options.jwt_algorithm, Algorithm::HS256);
            assert_eq!(options.access_ttl_minutes, 15);
            assert_eq!(options.refresh_ttl_days, 30);
            assert_eq!(options.login_rate_limit, 5);
            assert_eq!(options.login_rate_window_seconds, 900);
            assert!(options.bootstrap_admin_login.is_none());
            assert_eq!(options.bootstrap_admin_name, "Administrator");
            Ok(())
        })
    }

    #[test]
    fn overrides_are_honored() -> Result<()> {
        let options = Options::parse(&matches(&[
            "--jwt-algorithm",
            "HS512",
            "--access-token-ttl-minutes",
            "5",
            "--refresh-token-ttl-days",
            "7",
            "--login-rate-limit",
            "3",
            "--login-rate-window-seconds",
            "60",
            "--bootstrap-admin-login",
            "root",
            "--bootstrap-admin-password",
            "hunter2",
        ]))?;
        assert_eq!(options.jwt_algorithm, Algorithm::HS512);
        assert_eq!(options.access_ttl_minutes, 5);
        assert_eq!(options.refresh_ttl_days, 7);
        assert_eq!(options.login_rate_limit, 3);
        assert_eq!(options.login_rate_window_seconds, 60);
        assert_eq!(options.bootstrap_admin_login.as_deref(), Some("root"));
        assert!(options.bootstrap_admin_password.is_some());
        Ok(())
    }

    #[test]
    fn non_hmac_algorithm_is_rejected() {
        let result = Options::parse(&matches(&["--jwt-algorithm", "RS256"]));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let result = Options::parse(&matches(&["--jwt-algorithm", "HS999"]));
        assert!(result.is_err());
    }
}
