use axum::extract::State;

use crate::auth::AuthContext;
use crate::error::AppError;
use crate::state::AppState;

/// Extract the bearer token, verify it, and attach the [`AuthContext`] to
/// request extensions for the handlers downstream.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut req: axum::extract::Request,
    next: axum::middleware::Next,
) -> Result<axum::response::Response, AppError> {
    // Introspection endpoints stay public for health checks.
    let path = req.uri().path();
    if matches!(path, "/health") {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Authentication)?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or(AppError::Authentication)?;

    let ctx = state.verifier.verify(token).await?;
    req.extensions_mut().insert(ctx);

    Ok(next.run(req).await)
}

/// Token for WebSocket upgrades, which browsers cannot send as a header:
/// accepted from the `token` query parameter or the Authorization header.
pub async fn verify_ws_token(
    state: &AppState,
    query_token: Option<&str>,
    headers: &axum::http::HeaderMap,
) -> Result<AuthContext, AppError> {
    let token = query_token.map(str::to_string).or_else(|| {
        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.strip_prefix("Bearer "))
            .map(str::to_string)
    });

    match token {
        Some(token) => state.verifier.verify(&token).await,
        None => Err(AppError::Authentication),
    }
}
