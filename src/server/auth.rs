//! Authentication gate for the API.
//!
//! When enabled, every `/api` request must carry a configured API key,
//! either as `Authorization: Bearer <key>` or as an `api_key` query
//! parameter (players fetching segments cannot set headers). The matching
//! user is attached to the request as [`AuthenticatedUser`]. When disabled,
//! requests run as the anonymous user.

use crate::config::AuthConfig;
use crate::server::error::AppError;
use crate::server::AppContext;
use axum::{
    body::Body,
    extract::{Query, State},
    http::Request,
    middleware::Next,
    response::Response,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    typed_header::TypedHeader,
};
use scenestream_common::{Error, Result, UserId};
use serde::Deserialize;

/// The verified caller, available to handlers as an extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthenticatedUser(pub UserId);

#[derive(Debug, Default, Deserialize)]
pub struct ApiKeyQuery {
    pub api_key: Option<String>,
}

/// Map a presented key to its user
fn check_auth(
    auth_config: &AuthConfig,
    bearer_token: Option<&str>,
    query_key: Option<&str>,
) -> Result<UserId> {
    if !auth_config.enabled {
        return Ok(UserId::anonymous());
    }

    for presented in [bearer_token, query_key].into_iter().flatten() {
        if let Some(entry) = auth_config.api_keys.iter().find(|k| k.key == presented) {
            return Ok(UserId::from(entry.user_id));
        }
    }

    Err(Error::Unauthorized("a valid API key is required".into()))
}

/// Middleware for API key authentication
pub async fn api_auth_middleware(
    State(ctx): State<AppContext>,
    bearer: Option<TypedHeader<Authorization<Bearer>>>,
    query: Option<Query<ApiKeyQuery>>,
    mut request: Request<Body>,
    next: Next,
) -> std::result::Result<Response, AppError> {
    let bearer_token = bearer.map(|b| b.token().to_string());
    let query_key = query.and_then(|Query(q)| q.api_key);

    let user = check_auth(
        &ctx.config.server.auth,
        bearer_token.as_deref(),
        query_key.as_deref(),
    )?;

    request.extensions_mut().insert(AuthenticatedUser(user));
    Ok(next.run(request).await)
}
