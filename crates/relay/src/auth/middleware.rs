use crate::{
    auth::jwt::{JwtAccessTokenService, UserAccess},
    error::{ErrorCode, RelayError},
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use civica_common::types::{Department, Role};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: uuid::Uuid,
    pub name: String,
    pub role: Role,
    pub department: Option<Department>,
}

impl From<UserAccess> for AuthenticatedUser {
    fn from(access: UserAccess) -> Self {
        Self {
            user_id: access.user_id,
            name: access.name,
            role: access.role,
            department: access.department,
        }
    }
}

pub async fn require_bearer_auth(
    State(jwt_service): State<Arc<JwtAccessTokenService>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(extract_bearer_token)
    {
        Some(token) => token,
        None => return unauthorized_response("missing bearer token"),
    };

    let access = match jwt_service.validate_access_token(token) {
        Ok(access) => access,
        Err(_) => return unauthorized_response("invalid bearer token"),
    };

    request.extensions_mut().insert(AuthenticatedUser::from(access));

    next.run(request).await
}

fn extract_bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("Bearer") {
        return None;
    }

    let token = token.trim();
    if token.is_empty() {
        return None;
    }

    Some(token)
}

fn unauthorized_response(message: &'static str) -> Response {
    RelayError::new(ErrorCode::AuthInvalidToken, message).into_response()
}
