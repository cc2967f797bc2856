//! Caller identity, as asserted by the authenticating proxy in front of this service.
//!
//! Authentication happens upstream. Requests arrive with either `x-user-id`
//! (an opaque, already-verified id) or `x-user-email`, which is folded into an
//! id usable inside storage keys. The service only ever compares ids; it never
//! verifies them.

use crate::{errors::AppError, services::key_codec};
use axum::{extract::FromRequestParts, http::request::Parts};

pub const USER_ID_HEADER: &str = "x-user-id";
pub const USER_EMAIL_HEADER: &str = "x-user-email";

/// The verified caller of a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser(pub String);

impl AuthenticatedUser {
    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Turn an email into a key-safe user id: `jane.doe@example.com` → `jane_doe_at_example_com`.
pub fn user_id_from_email(email: &str) -> String {
    email.trim().replace('@', "_at_").replace('.', "_")
}

fn header<'a>(parts: &'a Parts, name: &str) -> Option<&'a str> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = match (header(parts, USER_ID_HEADER), header(parts, USER_EMAIL_HEADER)) {
            (Some(id), _) => id.to_string(),
            (None, Some(email)) => user_id_from_email(email),
            (None, None) => {
                return Err(AppError::unauthenticated("Unauthorized - Please sign in"));
            }
        };

        key_codec::validate_user_id(&user_id)
            .map_err(|err| AppError::bad_request(err.to_string()))?;
        Ok(AuthenticatedUser(user_id))
    }
}
