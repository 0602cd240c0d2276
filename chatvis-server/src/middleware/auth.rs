use std::sync::Arc;

use axum::{
    body::Body,
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, header, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{Span, debug};

use crate::{
    app_state::AppState,
    auth::{AuthError, AuthenticatedUser},
    http::error::ApiError,
    middleware::request_context::RequestContext,
};

/// Require a valid `Authorization: Bearer <jwt>` header.
///
/// The authenticated user is stored in the request extensions, both on its own and on the
/// [`RequestContext`].
///
/// # Errors
/// Responds `401` when the header is missing or the token does not validate.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(req.headers()).ok_or(AuthError::MissingToken)?;
    let user = state.tokens.validate(token)?;

    Span::current().record("user_id", user.id);
    debug!(user_id = user.id, path = %req.uri().path(), "request authenticated");

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.user = Some(user.clone());
    }
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthenticatedUser>()
            .cloned()
            .ok_or_else(|| ApiError::from(AuthError::MissingToken))
    }
}
