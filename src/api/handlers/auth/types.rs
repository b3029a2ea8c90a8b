//! Request/response types for the auth endpoints.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::principal::{Principal, Role};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct LoginRequest {
    pub(crate) login: String,
    pub(crate) password: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct RefreshRequest {
    pub(crate) refresh_token: String,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Default)]
pub(crate) struct LogoutRequest {
    pub(crate) refresh_token: Option<String>,
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct LogoutResponse {
    pub(crate) success: bool,
    pub(crate) revoked: u64,
}

#[derive(ToSchema, Serialize, Deserialize, Debug, Clone)]
pub(crate) struct UserOut {
    pub(crate) id: i64,
    pub(crate) login: String,
    pub(crate) name: String,
    pub(crate) role: Role,
    /// Profit share in percent; present iff the user is an investor.
    pub(crate) percent: Option<f64>,
    pub(crate) is_active: bool,
    pub(crate) created_at: DateTime<Utc>,
}

impl From<Principal> for UserOut {
    fn from(principal: Principal) -> Self {
        Self {
            id: principal.id,
            login: principal.login,
            name: principal.name,
            role: principal.role,
            percent: principal.percent,
            is_active: principal.is_active,
            created_at: principal.created_at,
        }
    }
}

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub(crate) struct AuthResponse {
    pub(crate) access_token: String,
    pub(crate) refresh_token: String,
    pub(crate) token_type: String,
    /// Access-token lifetime in seconds.
    pub(crate) expires_in: i64,
    pub(crate) user: UserOut,
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};

    #[test]
    fn admin_percent_serializes_as_null() -> Result<()> {
        let user = UserOut {
            id: 1,
            login: "root".to_string(),
            name: "Administrator".to_string(),
            role: Role::Admin,
            percent: None,
            is_active: true,
            created_at: Utc::now(),
        };
        let value = serde_json::to_value(&user)?;
        assert!(value
            .get("percent")
            .context("percent must be present")?
            .is_null());
        assert_eq!(
            value.get("role").and_then(serde_json::Value::as_str),
            Some("admin")
        );
        Ok(())
    }

    #[test]
    fn logout_request_tolerates_missing_token() -> Result<()> {
        let decoded: LogoutRequest = serde_json::from_str("{}")?;
        assert!(decoded.refresh_token.is_none());
        Ok(())
    }

    #[test]
    fn auth_response_round_trips() -> Result<()> {
        let response = AuthResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 900,
            user: UserOut {
                id: 2,
                login: "ivy".to_string(),
                name: "Ivy".to_string(),
                role: Role::Investor,
                percent: Some(35.0),
                is_active: true,
                created_at: Utc::now(),
            },
        };
        let value = serde_json::to_value(&response)?;
        assert_eq!(
            value.get("token_type").and_then(serde_json::Value::as_str),
            Some("bearer")
        );
        let decoded: AuthResponse = serde_json::from_value(value)?;
        assert_eq!(decoded.user.percent, Some(35.0));
        Ok(())
    }
}
