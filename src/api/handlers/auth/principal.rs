//! Authenticated principal extraction and authorization checks.
//!
//! `require_auth` is the per-request authentication gate: decode the bearer
//! access token, resolve the subject to a live user, return a principal for
//! downstream handlers. It runs on every protected endpoint, so it does one
//! SELECT and writes nothing.

use axum::http::HeaderMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::fmt;
use std::str::FromStr;
use utoipa::ToSchema;

use super::{
    error::AuthError,
    state::AuthState,
    storage,
    token::TokenKind,
    utils::extract_bearer_token,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Role {
    Admin,
    Investor,
}

impl Role {
    pub(crate) const fn as_str(self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Investor => "investor",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(Self::Admin),
            "investor" => Ok(Self::Investor),
            other => Err(anyhow::anyhow!("unknown role: {other}")),
        }
    }
}

/// Authenticated user context derived from a verified access token.
#[derive(Debug, Clone)]
pub(crate) struct Principal {
    pub(crate) id: i64,
    pub(crate) login: String,
    pub(crate) name: String,
    pub(crate) role: Role,
    pub(crate) percent: Option<f64>,
    pub(crate) is_active: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl Principal {
    pub(crate) fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// `Some(id)` scopes a query to an investor's own rows; `None` leaves it
    /// unscoped for admins. Every ownership check goes through this predicate
    /// so list and by-id resolution agree on what exists for a caller.
    pub(crate) fn investor_scope(&self) -> Option<i64> {
        match self.role {
            Role::Admin => None,
            Role::Investor => Some(self.id),
        }
    }

    pub(crate) fn require_role(&self, roles: &[Role]) -> Result<(), AuthError> {
        if roles.contains(&self.role) {
            Ok(())
        } else {
            Err(AuthError::Forbidden)
        }
    }
}

/// Resolve the bearer access token into a live principal.
///
/// Missing/invalid/expired tokens and absent or deactivated users all
/// collapse into `Unauthenticated`.
pub(crate) async fn require_auth(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
) -> Result<Principal, AuthError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(AuthError::Unauthenticated);
    };

    let claims = state
        .codec()
        .verify(&token, TokenKind::Access)
        .map_err(|_| AuthError::Unauthenticated)?;
    let subject_id = claims
        .subject_id()
        .map_err(|_| AuthError::Unauthenticated)?;

    match storage::lookup_principal(pool, subject_id).await? {
        Some(principal) if principal.is_active => Ok(principal),
        _ => Err(AuthError::Unauthenticated),
    }
}

/// `require_auth` plus a role-membership check.
pub(crate) async fn require_role(
    headers: &HeaderMap,
    pool: &PgPool,
    state: &AuthState,
    roles: &[Role],
) -> Result<Principal, AuthError> {
    let principal = require_auth(headers, pool, state).await?;
    principal.require_role(roles)?;
    Ok(principal)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            id: 7,
            login: "alice".to_string(),
            name: "Alice".to_string(),
            role,
            percent: match role {
                Role::Admin => None,
                Role::Investor => Some(40.0),
            },
            is_active: true,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn role_round_trips_through_str() -> anyhow::Result<()> {
        assert_eq!("admin".parse::<Role>()?, Role::Admin);
        assert_eq!("investor".parse::<Role>()?, Role::Investor);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
        Ok(())
    }

    #[test]
    fn role_serializes_lowercase() -> anyhow::Result<()> {
        assert_eq!(serde_json::to_string(&Role::Investor)?, "\"investor\"");
        Ok(())
    }

    #[test]
    fn admin_reads_are_unscoped() {
        let admin = principal(Role::Admin);
        assert!(admin.is_admin());
        assert_eq!(admin.investor_scope(), None);
    }

    #[test]
    fn investor_reads_are_scoped_to_own_id() {
        let investor = principal(Role::Investor);
        assert!(!investor.is_admin());
        assert_eq!(investor.investor_scope(), Some(7));
    }

    #[test]
    fn require_role_enforces_membership() {
        let investor = principal(Role::Investor);
        assert!(investor.require_role(&[Role::Investor]).is_ok());
        assert!(investor.require_role(&[Role::Admin, Role::Investor]).is_ok());
        assert!(matches!(
            investor.require_role(&[Role::Admin]),
            Err(AuthError::Forbidden)
        ));
    }
}
