pub mod auth;
pub mod error;
pub mod routes;
pub mod state;

use std::future::Future;

use anyhow::Context;
use axum::routing::{any, get, post};
use axum::{middleware, Router};
use task_api_core::config::ConfigSource;
use task_api_core::exec::Executor;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all routes and middleware.
/// Used by `serve()` and available for integration testing.
///
/// Control routes live under `/-/`, which no action name can start with.
pub fn build_router(app_state: AppState) -> Router {
    let actions = Router::new()
        .route("/{action}", any(routes::actions::run_action))
        .route_layer(middleware::from_fn_with_state(
            app_state.clone(),
            auth::gate,
        ));

    Router::new()
        .route("/-/health", get(routes::health::health))
        .route("/-/reload", post(routes::reload::reload))
        .merge(actions)
        .fallback(routes::not_found)
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Load the config file, bind the port and serve until Ctrl-C or SIGTERM.
///
/// Failing to load the initial config or to bind are the only fatal errors;
/// everything after that is handled per request.
pub async fn serve(source: ConfigSource, port_override: Option<u16>) -> anyhow::Result<()> {
    let path = source.path().display().to_string();
    let settings = source
        .load()
        .with_context(|| format!("failed to load config from {path}"))?;
    let snapshot = settings
        .snapshot()
        .with_context(|| format!("invalid configuration in {path}"))?;
    let port = port_override.unwrap_or(snapshot.port);

    let executor = Executor::new(settings.limits());
    let app_state = AppState::new(snapshot, executor, Some(source));

    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    #[cfg(unix)]
    spawn_hangup_reload(app_state.clone())?;

    serve_on(app_state, listener, shutdown_signal()).await
}

/// Serve on a pre-bound listener until `shutdown` resolves.
///
/// Unlike `serve`, this accepts a `TcpListener` that was already bound so the
/// caller can read the actual port before starting (useful when `port = 0` and
/// the OS picks a free port).
pub async fn serve_on<F>(
    app_state: AppState,
    listener: tokio::net::TcpListener,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let actual_port = listener.local_addr()?.port();
    let snapshot = app_state.snapshot().await;
    tracing::info!(
        actions = snapshot.actions.len(),
        auth_enabled = snapshot.auth_enabled,
        "task-api listening on http://0.0.0.0:{actual_port}"
    );

    let app = build_router(app_state);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;
    tracing::info!("task-api stopped");
    Ok(())
}

/// Reload the configuration whenever the process receives SIGHUP.
#[cfg(unix)]
fn spawn_hangup_reload(app_state: AppState) -> anyhow::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("SIGHUP received, reloading configuration");
            if let Err(e) = app_state.reload().await {
                tracing::error!("reload failed, keeping previous config: {e}");
            }
        }
    });
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install SIGTERM handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
