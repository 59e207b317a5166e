use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;

use crate::auth::authorize;
use crate::error::AppError;
use crate::state::AppState;

/// POST /-/reload: re-read the config file and swap in a new snapshot.
///
/// Authorized against the snapshot that is active before the reload. A
/// config error leaves that snapshot in place and returns 422.
pub async fn reload(
    State(app): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<serde_json::Value>, AppError> {
    let current = app.snapshot().await;
    let caller = authorize(&headers, current.auth_enabled, &current.tokens).inspect_err(|e| {
        tracing::warn!(reason = %e, "reload rejected");
    })?;

    if app.source.is_none() {
        return Err(AppError::not_found("reload is not available: no config file"));
    }

    let next = app.reload().await.inspect_err(|e| {
        tracing::error!(user = caller.label(), "reload failed, keeping previous config: {e}");
    })?;
    tracing::info!(user = caller.label(), "reload requested");

    Ok(Json(serde_json::json!({
        "reloaded": true,
        "auth_enabled": next.auth_enabled,
        "actions": next.actions.names(),
    })))
}
