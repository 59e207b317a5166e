use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Extension, Json};
use task_api_core::exec::{ExecOutcome, ExecutionResult};

use crate::auth::{Caller, Dispatch};
use crate::error::AppError;
use crate::state::AppState;

/// POST /{action}: run the action's configured command and report how it
/// went.
///
/// Reached only through [`crate::auth::gate`], which has already resolved the
/// action and the caller. The request body is never read. Status reflects
/// the outcome: 200 success, 502 non-zero exit or signal, 504 timeout,
/// 500 spawn failure, 503 when every execution slot is taken.
pub async fn run_action(
    State(app): State<AppState>,
    Extension(dispatch): Extension<Dispatch>,
) -> Result<Response, AppError> {
    let Dispatch {
        snapshot,
        action,
        caller,
    } = dispatch;
    let timeout = snapshot.timeout_for(&action);

    let result = match app.executor.execute(&action.name, &action.command, timeout).await {
        Ok(r) => r,
        Err(e) => {
            tracing::warn!(action = %action.name, user = caller.label(), "{e}");
            return Err(e.into());
        }
    };

    let duration_ms = result.duration.as_millis() as u64;
    if result.is_success() {
        tracing::info!(
            action = %action.name,
            user = caller.label(),
            id = %result.id,
            duration_ms,
            "action succeeded"
        );
    } else {
        tracing::warn!(
            action = %action.name,
            user = caller.label(),
            id = %result.id,
            outcome = result.outcome.as_str(),
            exit_code = result.exit_code,
            duration_ms,
            "action failed"
        );
    }

    Ok((status_for(&result.outcome), Json(result_body(&result, &caller))).into_response())
}

pub fn status_for(outcome: &ExecOutcome) -> StatusCode {
    match outcome {
        ExecOutcome::Success => StatusCode::OK,
        ExecOutcome::NonZeroExit { .. } | ExecOutcome::Signaled { .. } => StatusCode::BAD_GATEWAY,
        ExecOutcome::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ExecOutcome::SpawnFailure { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn result_body(result: &ExecutionResult, caller: &Caller) -> serde_json::Value {
    let mut body = serde_json::json!({
        "id": result.id,
        "action": result.action,
        "user": caller.label(),
        "outcome": result.outcome.as_str(),
        "exit_code": result.exit_code,
        "stdout": result.stdout_lossy(),
        "stderr": result.stderr_lossy(),
        "stdout_truncated": result.stdout_truncated,
        "stderr_truncated": result.stderr_truncated,
        "started_at": result.started_at,
        "duration_ms": result.duration.as_millis() as u64,
    });
    match &result.outcome {
        ExecOutcome::Signaled { signal } => body["signal"] = serde_json::json!(signal),
        ExecOutcome::SpawnFailure { message } => body["error"] = serde_json::json!(message),
        _ => {}
    }
    body
}
