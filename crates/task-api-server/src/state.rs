use std::sync::Arc;

use task_api_core::config::{ConfigSource, Snapshot};
use task_api_core::exec::Executor;
use task_api_core::ConfigError;
use tokio::sync::{Mutex, RwLock};

/// Shared application state passed to all route handlers.
///
/// The active [`Snapshot`] sits behind an `Arc` that is swapped whole on
/// reload. Handlers clone the `Arc` once and keep using it, so a request
/// that started before a reload finishes against the snapshot it began with.
#[derive(Clone)]
pub struct AppState {
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    pub executor: Executor,
    pub source: Option<ConfigSource>,
    reload_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(snapshot: Snapshot, executor: Executor, source: Option<ConfigSource>) -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(Arc::new(snapshot))),
            executor,
            source,
            reload_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The snapshot active right now.
    pub async fn snapshot(&self) -> Arc<Snapshot> {
        self.snapshot.read().await.clone()
    }

    /// Install `next` as the active snapshot and return the one it replaced.
    pub async fn replace(&self, next: Snapshot) -> Arc<Snapshot> {
        let next = Arc::new(next);
        let mut guard = self.snapshot.write().await;
        std::mem::replace(&mut *guard, next)
    }

    /// Re-read the config source and swap in the result. On any error the
    /// current snapshot stays active.
    pub async fn reload(&self) -> Result<Arc<Snapshot>, ConfigError> {
        let Some(source) = self.source.clone() else {
            return Err(ConfigError::NotFound("no config file to reload from".into()));
        };
        // One reload at a time, so two racing reloads cannot install an
        // older read after a newer one.
        let _serial = self.reload_lock.lock().await;

        let next = tokio::task::spawn_blocking(move || source.load_snapshot())
            .await
            .map_err(|e| ConfigError::Io(std::io::Error::other(format!("task join error: {e}"))))??;

        let previous = self.replace(next).await;
        let current = self.snapshot().await;
        if previous.port != current.port {
            tracing::warn!(
                old = previous.port,
                new = current.port,
                "port changed; the new port takes effect after a restart"
            );
        }
        tracing::info!(
            actions = current.actions.len(),
            auth_enabled = current.auth_enabled,
            "configuration reloaded"
        );
        Ok(current)
    }
}
