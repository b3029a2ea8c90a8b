//! Error taxonomy for authentication and authorization.
//!
//! Every variant maps to a stable HTTP status with a generic message; which
//! sub-check failed is never exposed to the caller.

use axum::{
    http::{header::RETRY_AFTER, StatusCode},
    response::IntoResponse,
};
use thiserror::Error;
use tracing::error;

use super::token::TokenError;

#[derive(Debug, Error)]
pub(crate) enum AuthError {
    /// Unknown login, wrong password, or inactive account. Merged so a caller
    /// cannot enumerate which check failed.
    #[error("Invalid credentials.")]
    InvalidCredentials,
    #[error("Too many login attempts. Please try again later.")]
    RateLimited { retry_after: u64 },
    #[error(transparent)]
    Token(#[from] TokenError),
    /// Unknown, revoked, expired, subject-mismatched, or inactive-owner
    /// refresh token. Merged for the same reason as `InvalidCredentials`.
    #[error("Refresh token is invalid or expired.")]
    InvalidRefreshToken,
    #[error("Authentication required.")]
    Unauthenticated,
    #[error("Insufficient permissions.")]
    Forbidden,
    /// Persistence faults are logged server-side and surfaced as a plain 500.
    #[error("Internal server error.")]
    Database(#[from] anyhow::Error),
}

impl AuthError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidCredentials
            | Self::Token(_)
            | Self::InvalidRefreshToken
            | Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> axum::response::Response {
        match self {
            Self::RateLimited { retry_after } => (
                StatusCode::TOO_MANY_REQUESTS,
                [(RETRY_AFTER, retry_after.to_string())],
                self.to_string(),
            )
                .into_response(),
            Self::Database(ref err) => {
                error!("Database error: {err:#}");
                (self.status(), self.to_string()).into_response()
            }
            _ => (self.status(), self.to_string()).into_response(),
        }
    }
}
