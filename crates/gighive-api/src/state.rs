use std::sync::Arc;

use anyhow::anyhow;
use tracing::error;

use gighive_db::Database;
use gighive_gateway::dispatcher::Dispatcher;

use crate::config::Config;
use crate::identity::IdentityProvider;
use crate::storage::Storage;

pub type AppState = Arc<AppStateInner>;

/// Everything a handler can reach. Built once in `main` (or by a test) and
/// shared behind an `Arc`.
pub struct AppStateInner {
    pub db: Database,
    pub storage: Storage,
    pub dispatcher: Dispatcher,
    pub identity: Arc<dyn IdentityProvider>,
    pub config: Config,
}

/// Run blocking database work off the async runtime.
pub async fn with_db<F, T>(state: &AppState, f: F) -> anyhow::Result<T>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let state = state.clone();
    tokio::task::spawn_blocking(move || f(&state.db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            anyhow!("spawn_blocking join error: {e}")
        })?
}
