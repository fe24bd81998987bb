//! Caller identity supplied by the upstream gateway.
//!
//! Authentication happens before requests reach this service; the gateway
//! forwards the authenticated user in `X-User-ID` and their role in
//! `X-User-Role`.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const USER_ROLE_HEADER: &str = "X-User-Role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallerRole {
    Admin,
    Client,
}

impl CallerRole {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "admin" => Some(CallerRole::Admin),
            "client" => Some(CallerRole::Client),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CallerContext {
    pub user_id: String,
    pub role: CallerRole,
}

impl CallerContext {
    pub fn new(user_id: impl Into<String>, role: CallerRole) -> Self {
        Self {
            user_id: user_id.into(),
            role,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == CallerRole::Admin
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Administrator role required"
            )))
        }
    }

    /// Admins may act on any client; clients only on themselves.
    pub fn ensure_can_access(&self, client_id: &str) -> Result<(), AppError> {
        if self.is_admin() || self.user_id == client_id {
            Ok(())
        } else {
            Err(AppError::Forbidden(anyhow::anyhow!(
                "Access to another client's records is not allowed"
            )))
        }
    }

    /// Client filter for list queries. `None` means unrestricted.
    pub fn client_scope(&self) -> Option<&str> {
        match self.role {
            CallerRole::Admin => None,
            CallerRole::Client => Some(self.user_id.as_str()),
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!("Missing X-User-ID header"))
            })?;

        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(CallerRole::parse)
            .ok_or_else(|| {
                AppError::Unauthorized(anyhow::anyhow!(
                    "Missing or unrecognised X-User-Role header"
                ))
            })?;

        tracing::Span::current().record("user_id", user_id);

        Ok(CallerContext::new(user_id, role))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(headers: &[(&str, &str)]) -> Result<CallerContext, AppError> {
        let mut builder = Request::builder().uri("/");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let (mut parts, _) = builder.body(()).unwrap().into_parts();
        CallerContext::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_user_and_role() {
        let ctx = extract(&[(USER_ID_HEADER, "c1"), (USER_ROLE_HEADER, "Client")])
            .await
            .unwrap();
        assert_eq!(ctx.user_id, "c1");
        assert_eq!(ctx.role, CallerRole::Client);
        assert_eq!(ctx.client_scope(), Some("c1"));
    }

    #[tokio::test]
    async fn missing_headers_are_unauthorized() {
        assert!(matches!(
            extract(&[(USER_ROLE_HEADER, "admin")]).await,
            Err(AppError::Unauthorized(_))
        ));
        assert!(matches!(
            extract(&[(USER_ID_HEADER, "c1"), (USER_ROLE_HEADER, "owner")]).await,
            Err(AppError::Unauthorized(_))
        ));
    }

    #[test]
    fn clients_cannot_reach_other_clients() {
        let client = CallerContext::new("c1", CallerRole::Client);
        assert!(client.ensure_can_access("c1").is_ok());
        assert!(matches!(
            client.ensure_can_access("c2"),
            Err(AppError::Forbidden(_))
        ));
        assert!(matches!(client.require_admin(), Err(AppError::Forbidden(_))));

        let admin = CallerContext::new("a1", CallerRole::Admin);
        assert!(admin.ensure_can_access("c2").is_ok());
        assert_eq!(admin.client_scope(), None);
    }
}
