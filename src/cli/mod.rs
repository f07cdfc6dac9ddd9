//! Operator and batch-driver commands

pub mod session;
pub mod sync;

use crate::config::SessiondConfig;
use crate::pool::{make_pooled_sync_callback, SyncTaskPool};
use crate::state::SaveCallback;
use crate::store::{IndexStore, SqliteIndexStore};
use crate::Result;
use anyhow::Context;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Project root plus its loaded configuration
pub struct CliContext {
    pub project_root: PathBuf,
    pub config: SessiondConfig,
}

impl CliContext {
    /// Use `project_root` if given, the current directory otherwise
    pub fn load(project_root: Option<PathBuf>) -> Result<Self> {
        let project_root = match project_root {
            Some(root) => root,
            None => env::current_dir()?,
        };
        let config = SessiondConfig::load(&project_root)?;
        Ok(Self {
            project_root,
            config,
        })
    }

    pub fn session_dir(&self, slug: &str) -> PathBuf {
        crate::sync::session_dir(&self.project_root, slug)
    }

    pub fn open_index(&self) -> Result<Arc<SqliteIndexStore>> {
        let path = self.config.database_path(&self.project_root);
        let store = SqliteIndexStore::open(&path)
            .with_context(|| format!("Failed to open index database {}", path.display()))?;
        Ok(Arc::new(store))
    }

    /// Pool and save callback that mirror every manifest save into the index
    pub fn background_sync(&self) -> Result<BackgroundSync> {
        let pool = Arc::new(SyncTaskPool::with_config(&self.config.pool));
        let store: Arc<dyn IndexStore> = self.open_index()?;
        let callback = make_pooled_sync_callback(
            pool.clone(),
            store,
            self.project_root.clone(),
            self.config.project_id,
        );
        Ok(BackgroundSync {
            pool,
            callback,
            shutdown_timeout: self.config.pool.shutdown_timeout(),
        })
    }
}

pub struct BackgroundSync {
    pool: Arc<SyncTaskPool>,
    callback: SaveCallback,
    shutdown_timeout: Duration,
}

impl BackgroundSync {
    pub fn callback(&self) -> SaveCallback {
        self.callback.clone()
    }

    /// Wait for scheduled index updates before the process exits
    pub async fn drain(self) {
        self.pool.shutdown(self.shutdown_timeout).await;
    }
}

fn relative<'a>(path: &'a Path, root: &Path) -> &'a Path {
    path.strip_prefix(root).unwrap_or(path)
}
