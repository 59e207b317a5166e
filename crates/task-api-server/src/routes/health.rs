use axum::extract::State;
use axum::Json;

use crate::state::AppState;

/// GET /-/health: liveness plus a glance at load. Never requires auth and
/// never lists action names.
pub async fn health(State(app): State<AppState>) -> Json<serde_json::Value> {
    let snapshot = app.snapshot().await;
    Json(serde_json::json!({
        "status": "ok",
        "actions": snapshot.actions.len(),
        "available_slots": app.executor.available(),
        "max_concurrent": app.executor.limits().max_concurrent,
    }))
}
