use axum::{
    extract::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::error::ApiError;

/// Header carrying the authenticated user's identity (their email), set by the
/// fronting auth proxy.
pub const USER_HEADER: &str = "x-scrt-user";

const USER_ID_MAX_LEN: usize = 320;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserId(pub String);

/// Axum middleware that requires a user identity and exposes it as `Extension<UserId>`.
pub async fn require_user(mut request: Request, next: Next) -> Response {
    let user = request
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= USER_ID_MAX_LEN)
        .map(|v| UserId(v.to_owned()));

    match user {
        Some(user) => {
            request.extensions_mut().insert(user);
            next.run(request).await
        }
        None => ApiError::Unauthorized.into_response(),
    }
}
