//! Authenticated-user extraction.
//!
//! Token issuance and verification live in an external auth service that
//! terminates in front of this server and forwards the verified identity in
//! the `x-user-id` header. The messaging core trusts that identity and
//! performs no credential checks of its own.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use tutorlink_shared::types::UserId;

use crate::error::ServerError;

pub const USER_ID_HEADER: &str = "x-user-id";

/// The verified identity of the calling user.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser(pub UserId);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let raw = parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServerError::Unauthorized(format!("missing {USER_ID_HEADER} header"))
            })?;

        let id = Uuid::parse_str(raw).map_err(|_| {
            ServerError::Unauthorized(format!("malformed {USER_ID_HEADER} header"))
        })?;

        Ok(AuthUser(UserId(id)))
    }
}
