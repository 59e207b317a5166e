pub mod actions;
pub mod health;
pub mod reload;

use crate::error::AppError;

/// Fallback for any path that is neither an action nor a control route.
pub async fn not_found(uri: axum::http::Uri) -> AppError {
    AppError::not_found(format!("no route for '{}'", uri.path()))
}
