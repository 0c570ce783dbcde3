use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use super::ApiError;
use crate::engine::Actor;
use crate::limits::MAX_USER_ID_LEN;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

/// Identity forwarded by the authentication layer in front of us.
#[derive(Debug, Clone)]
pub struct Caller {
    pub user_id: String,
    pub admin: bool,
}

impl Caller {
    pub fn require_admin(&self) -> Result<(), ApiError> {
        if self.admin {
            Ok(())
        } else {
            Err(ApiError::Forbidden)
        }
    }

    pub fn actor(&self) -> Actor {
        if self.admin {
            Actor::admin(self.user_id.clone())
        } else {
            Actor::user(self.user_id.clone())
        }
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Caller {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = header(parts, USER_ID_HEADER)
            .filter(|id| !id.is_empty() && id.len() <= MAX_USER_ID_LEN)
            .ok_or(ApiError::Unauthorized)?
            .to_string();
        let admin =
            header(parts, USER_ROLE_HEADER).is_some_and(|r| r.eq_ignore_ascii_case("admin"));
        Ok(Self { user_id, admin })
    }
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
}
