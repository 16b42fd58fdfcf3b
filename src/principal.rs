//! The authenticated caller of a request.
//!
//! Credentials are verified upstream. The gateway forwards the caller as
//! `x-user-id` and `x-user-role` headers, which are trusted as given.

use crate::types::{Role, UserId};
use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use tracing::warn;

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_ROLE_HEADER: &str = "x-user-role";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Principal {
    pub id: UserId,
    pub role: Role,
}

impl Principal {
    pub fn from_headers(headers: &HeaderMap) -> Result<Self, MissingPrincipal> {
        let id = header(headers, USER_ID_HEADER)?
            .parse()
            .map_err(|_| MissingPrincipal("Malformed user id"))?;
        let role = header(headers, USER_ROLE_HEADER)?
            .parse()
            .map_err(|_| MissingPrincipal("Unknown role"))?;
        Ok(Self { id, role })
    }
}

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, MissingPrincipal> {
    headers
        .get(name)
        .ok_or(MissingPrincipal("Missing credentials"))?
        .to_str()
        .map_err(|_| MissingPrincipal("Malformed credentials"))
}

/// Rejection when a request carries no usable principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MissingPrincipal(pub &'static str);

impl IntoResponse for MissingPrincipal {
    fn into_response(self) -> Response {
        warn!(reason = self.0, "Rejected unauthenticated request");
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": { "code": "UNAUTHENTICATED", "message": self.0 } })),
        )
            .into_response()
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = MissingPrincipal;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Principal::from_headers(&parts.headers)
    }
}
