use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{header, HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use task_api_core::actions::Action;
use task_api_core::config::Snapshot;
use task_api_core::tokens::TokenStore;
use task_api_core::AuthError;

use crate::error::AppError;
use crate::state::AppState;

/// Who a request runs on behalf of. Used for logging only; authorization
/// has already been decided by the time a `Caller` exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Anonymous,
    User(String),
}

impl Caller {
    pub fn label(&self) -> &str {
        match self {
            Caller::Anonymous => "anonymous",
            Caller::User(user) => user.as_str(),
        }
    }
}

/// Everything the action handler needs, resolved by [`gate`] against one
/// pinned snapshot.
#[derive(Debug, Clone)]
pub struct Dispatch {
    pub snapshot: Arc<Snapshot>,
    pub action: Action,
    pub caller: Caller,
}

/// Pull the token out of the `Authorization` header. Accepts
/// `Bearer <token>` or the bare token.
pub fn extract_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?.trim();
    let token = match value.split_once(' ') {
        Some((scheme, rest)) if scheme.eq_ignore_ascii_case("bearer") => rest.trim(),
        None if value.eq_ignore_ascii_case("bearer") => "",
        _ => value,
    };
    (!token.is_empty()).then_some(token)
}

pub fn authorize(headers: &HeaderMap, enabled: bool, store: &TokenStore) -> Result<Caller, AuthError> {
    if !enabled {
        return Ok(Caller::Anonymous);
    }
    let token = extract_token(headers).ok_or(AuthError::MissingToken)?;
    let user = store.lookup(token).ok_or(AuthError::InvalidToken)?;
    Ok(Caller::User(user.to_string()))
}

/// Axum middleware in front of `/{action}`.
///
/// Evaluated in order against the snapshot active when the request arrives:
/// 1. unknown action → 404 (auth is never consulted)
/// 2. method other than POST → 405
/// 3. auth enabled and token missing → 401, token unknown → 403
/// 4. otherwise a [`Dispatch`] is attached to the request and it proceeds
pub async fn gate(
    State(app): State<AppState>,
    Path(name): Path<String>,
    mut req: Request,
    next: Next,
) -> Response {
    let snapshot = app.snapshot().await;

    let Some(action) = snapshot.actions.get(&name).cloned() else {
        return AppError::not_found(format!("unknown action '{name}'")).into_response();
    };

    if req.method() != Method::POST {
        return AppError::method_not_allowed(format!("action '{name}' only accepts POST"))
            .into_response();
    }

    let caller = match authorize(req.headers(), snapshot.auth_enabled, &snapshot.tokens) {
        Ok(caller) => caller,
        Err(e) => {
            tracing::warn!(action = %name, reason = %e, "request rejected");
            return AppError(e.into()).into_response();
        }
    };
    tracing::info!(action = %name, user = caller.label(), "dispatching");

    req.extensions_mut().insert(Dispatch {
        snapshot,
        action,
        caller,
    });
    next.run(req).await
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
