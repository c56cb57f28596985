//! Authentication is an external collaborator (spec.md §1): the core
//! consumes an opaque `user_id` attached to each request. This extractor
//! stands in for the session/token layer a real deployment would put in
//! front of this service — it trusts an `x-user-id` header rather than
//! validating a session token, which is explicitly out of scope here.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;

pub struct UserId(pub String);

impl<S> FromRequestParts<S> for UserId
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get("x-user-id")
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(|v| UserId(v.to_string()))
            .ok_or((StatusCode::UNAUTHORIZED, "missing x-user-id header"))
    }
}
