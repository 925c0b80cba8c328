//! Shared-token authentication for mutating routes.
//!
//! The token is accepted as a bearer header, a `?token=` query parameter, or
//! a `refinery_token` cookie. When no token is configured every request is
//! allowed.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ApiError;
use crate::state::AppState;

pub(crate) async fn guard(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = &state.config.token else {
        return Ok(next.run(request).await);
    };

    if presented_token(&request).is_some_and(|token| token == *expected) {
        Ok(next.run(request).await)
    } else {
        Err(ApiError::Unauthorized)
    }
}

fn presented_token(request: &Request) -> Option<String> {
    if let Some(value) = request.headers().get(header::AUTHORIZATION) {
        let value = value.to_str().ok()?;
        return Some(
            value
                .strip_prefix("Bearer ")
                .unwrap_or(value)
                .trim()
                .to_string(),
        );
    }

    if let Some(query) = request.uri().query() {
        for pair in query.split('&') {
            if let Some(token) = pair.strip_prefix("token=") {
                return Some(token.to_string());
            }
        }
    }

    if let Some(cookies) = request.headers().get(header::COOKIE) {
        let cookies = cookies.to_str().ok()?;
        for cookie in cookies.split(';') {
            if let Some(token) = cookie.trim().strip_prefix("refinery_token=") {
                return Some(token.to_string());
            }
        }
    }

    None
}
