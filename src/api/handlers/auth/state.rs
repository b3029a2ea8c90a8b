//! Auth configuration and shared state.
//!
//! Constructed once at process start and injected into every handler via
//! `Extension<Arc<AuthState>>`; there are no module-level singletons.

use jsonwebtoken::Algorithm;
use secrecy::SecretString;
use std::time::Duration;

use super::{rate_limit::SlidingWindowRateLimiter, token::TokenCodec};

const DEFAULT_ACCESS_TTL_SECONDS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECONDS: i64 = 30 * 24 * 60 * 60;
const DEFAULT_LOGIN_RATE_LIMIT: usize = 5;
const DEFAULT_LOGIN_RATE_WINDOW_SECONDS: u64 = 900;
const DEFAULT_BOOTSTRAP_ADMIN_NAME: &str = "Administrator";

#[derive(Clone, Debug)]
pub struct AuthConfig {
    jwt_secret: SecretString,
    jwt_algorithm: Algorithm,
    access_ttl_seconds: i64,
    refresh_ttl_seconds: i64,
    login_rate_limit: usize,
    login_rate_window_seconds: u64,
    bootstrap_admin_login: Option<String>,
    bootstrap_admin_password: Option<SecretString>,
    bootstrap_admin_name: String,
}

impl AuthConfig {
    #[must_use]
    pub fn new(jwt_secret: SecretString) -> Self {
        Self {
            jwt_secret,
            jwt_algorithm: Algorithm::HS256,
            access_ttl_seconds: DEFAULT_ACCESS_TTL_SECONDS,
            refresh_ttl_seconds: DEFAULT_REFRESH_TTL_SECONDS,
            login_rate_limit: DEFAULT_LOGIN_RATE_LIMIT,
            login_rate_window_seconds: DEFAULT_LOGIN_RATE_WINDOW_SECONDS,
            bootstrap_admin_login: None,
            bootstrap_admin_password: None,
            bootstrap_admin_name: DEFAULT_BOOTSTRAP_ADMIN_NAME.to_string(),
        }
    }

    #[must_use]
    pub fn with_jwt_algorithm(mut self, algorithm: Algorithm) -> Self {
        self.jwt_algorithm = algorithm;
        self
    }

    #[must_use]
    pub fn with_access_ttl_seconds(mut self, seconds: i64) -> Self {
        self.access_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_refresh_ttl_seconds(mut self, seconds: i64) -> Self {
        self.refresh_ttl_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_login_rate_limit(mut self, limit: usize) -> Self {
        self.login_rate_limit = limit;
        self
    }

    #[must_use]
    pub fn with_login_rate_window_seconds(mut self, seconds: u64) -> Self {
        self.login_rate_window_seconds = seconds;
        self
    }

    #[must_use]
    pub fn with_bootstrap_admin(
        mut self,
        login: Option<String>,
        password: Option<SecretString>,
        name: String,
    ) -> Self {
        self.bootstrap_admin_login = login;
        self.bootstrap_admin_password = password;
        self.bootstrap_admin_name = name;
        self
    }

    pub(crate) fn bootstrap_admin_login(&self) -> Option<&str> {
        self.bootstrap_admin_login.as_deref()
    }

    pub(crate) fn bootstrap_admin_password(&self) -> Option<&SecretString> {
        self.bootstrap_admin_password.as_ref()
    }

    pub(crate) fn bootstrap_admin_name(&self) -> &str {
        &self.bootstrap_admin_name
    }
}

pub struct AuthState {
    config: AuthConfig,
    codec: TokenCodec,
    limiter: SlidingWindowRateLimiter,
}

impl AuthState {
    #[must_use]
    pub fn new(config: AuthConfig) -> Self {
        let codec = TokenCodec::new(
            &config.jwt_secret,
            config.jwt_algorithm,
            config.access_ttl_seconds,
            config.refresh_ttl_seconds,
        );
        let limiter = SlidingWindowRateLimiter::new(
            config.login_rate_limit,
            Duration::from_secs(config.login_rate_window_seconds),
        );
        Self {
            config,
            codec,
            limiter,
        }
    }

    pub(crate) fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub(crate) fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub(crate) fn limiter(&self) -> &SlidingWindowRateLimiter {
        &self.limiter
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new(SecretString::from("secret".to_string()));
        assert_eq!(config.access_ttl_seconds, DEFAULT_ACCESS_TTL_SECONDS);
        assert_eq!(config.refresh_ttl_seconds, DEFAULT_REFRESH_TTL_SECONDS);
        assert_eq!(config.login_rate_limit, DEFAULT_LOGIN_RATE_LIMIT);
        assert_eq!(
            config.login_rate_window_seconds,
            DEFAULT_LOGIN_RATE_WINDOW_SECONDS
        );
        assert_eq!(config.bootstrap_admin_name(), "Administrator");
        assert!(config.bootstrap_admin_login().is_none());

        let config = config
            .with_jwt_algorithm(Algorithm::HS512)
            .with_access_ttl_seconds(60)
            .with_refresh_ttl_seconds(120)
            .with_login_rate_limit(3)
            .with_login_rate_window_seconds(30)
            .with_bootstrap_admin(
                Some("root".to_string()),
                Some(SecretString::from("hunter2".to_string())),
                "Root".to_string(),
            );

        assert_eq!(config.jwt_algorithm, Algorithm::HS512);
        assert_eq!(config.access_ttl_seconds, 60);
        assert_eq!(config.refresh_ttl_seconds, 120);
        assert_eq!(config.login_rate_limit, 3);
        assert_eq!(config.login_rate_window_seconds, 30);
        assert_eq!(config.bootstrap_admin_login(), Some("root"));
        assert!(config.bootstrap_admin_password().is_some());
        assert_eq!(config.bootstrap_admin_name(), "Root");
    }

    #[test]
    fn auth_state_wires_codec_from_config() {
        let config = AuthConfig::new(SecretString::from("secret".to_string()))
            .with_access_ttl_seconds(77);
        let state = AuthState::new(config);
        assert_eq!(state.codec().access_ttl_seconds(), 77);
    }
}
