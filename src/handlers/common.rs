use crate::errors::ServiceError;
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Header carrying the authenticated user id, set by the upstream auth layer.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying the caller's role (`customer` or `admin`).
pub const USER_ROLE_HEADER: &str = "x-user-role";

pub const ADMIN_ROLE: &str = "admin";

/// Caller identity resolved from the gateway-provided headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: Uuid,
    pub role: String,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        self.role.eq_ignore_ascii_case(ADMIN_ROLE)
    }

    pub fn require_admin(&self) -> Result<(), ServiceError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(ServiceError::Forbidden("admin role required".to_string()))
        }
    }

    /// `None` for admins, who may see every user's records.
    pub fn owner_scope(&self) -> Option<Uuid> {
        (!self.is_admin()).then_some(self.user_id)
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized(format!("missing {} header", USER_ID_HEADER)))?;
        let user_id = Uuid::parse_str(user_id.trim()).map_err(|_| {
            ServiceError::Unauthorized(format!("{} is not a valid id", USER_ID_HEADER))
        })?;
        let role = parts
            .headers
            .get(USER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(|r| r.trim().to_ascii_lowercase())
            .filter(|r| !r.is_empty())
            .unwrap_or_else(|| "customer".to_string());

        Ok(Self { user_id, role })
    }
}

/// Standard success response
pub fn success_response<T: Serialize>(data: T) -> Response {
    (StatusCode::OK, Json(crate::ApiResponse::success(data))).into_response()
}

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(crate::ApiResponse::success(data))).into_response()
}

/// Optional free-text reason attached to cancellations, returns and rejections.
#[derive(Debug, Default, Deserialize, Serialize)]
pub struct ReasonBody {
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::Request;

    async fn extract(req: Request<()>) -> Result<AuthUser, ServiceError> {
        let (mut parts, _) = req.into_parts();
        AuthUser::from_request_parts(&mut parts, &()).await
    }

    #[tokio::test]
    async fn reads_identity_headers() {
        let id = Uuid::new_v4();
        let req = Request::builder()
            .header(USER_ID_HEADER, id.to_string())
            .header(USER_ROLE_HEADER, "Admin")
            .body(())
            .unwrap();
        let user = extract(req).await.unwrap();
        assert_eq!(user.user_id, id);
        assert!(user.is_admin());
        assert_eq!(user.owner_scope(), None);
    }

    #[tokio::test]
    async fn missing_user_is_unauthorized() {
        let req = Request::builder().body(()).unwrap();
        let err = extract(req).await.unwrap_err();
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn customers_cannot_act_as_admin() {
        let req = Request::builder()
            .header(USER_ID_HEADER, Uuid::new_v4().to_string())
            .body(())
            .unwrap();
        let user = extract(req).await.unwrap();
        assert_eq!(user.role, "customer");
        assert_eq!(
            user.require_admin().unwrap_err().status_code(),
            StatusCode::FORBIDDEN
        );
    }
}
