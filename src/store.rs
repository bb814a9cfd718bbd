//! Pool initialisation and the `SkiffCore` handle shared by every operation.
//!
//! The mobile shell calls [`SkiffCore::bootstrap`] once at unlock with its
//! backend collaborators; everything after that goes through the handle. The
//! handle also tracks which chat screen is currently open — the reconcile
//! path needs it to decide whether an incoming message bumps the unread
//! counter.

use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use sqlx::SqlitePool;
use thiserror::Error;

use crate::auth::AuthProvider;
use crate::media::MediaStore;
use crate::remote::{ConnectivityMonitor, RemoteSource};

// ─── Error ───────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store init error: {0}")]
    Init(String),
}

// ─── Clock ───────────────────────────────────────────────────────────────────

pub fn now_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ─── Core handle ─────────────────────────────────────────────────────────────

pub struct SkiffCore {
    pub pool: SqlitePool,
    pub remote: Arc<dyn RemoteSource>,
    pub connectivity: Arc<dyn ConnectivityMonitor>,
    pub auth: Arc<dyn AuthProvider>,
    pub media: Arc<dyn MediaStore>,
    open_chat: Mutex<Option<String>>,
}

impl SkiffCore {
    pub async fn bootstrap(
        db_dir: &str,
        remote: Arc<dyn RemoteSource>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        auth: Arc<dyn AuthProvider>,
        media: Arc<dyn MediaStore>,
    ) -> Result<Arc<Self>, StoreError> {
        init_logging();
        let pool = init_cache_pool(db_dir).await?;
        crate::db::run_migrations(&pool)
            .await
            .map_err(|e| StoreError::Init(e.to_string()))?;
        Ok(Arc::new(SkiffCore {
            pool,
            remote,
            connectivity,
            auth,
            media,
            open_chat: Mutex::new(None),
        }))
    }

    /// Build a core around an existing pool; used by tests.
    pub fn with_pool(
        pool: SqlitePool,
        remote: Arc<dyn RemoteSource>,
        connectivity: Arc<dyn ConnectivityMonitor>,
        auth: Arc<dyn AuthProvider>,
        media: Arc<dyn MediaStore>,
    ) -> Arc<Self> {
        Arc::new(SkiffCore {
            pool,
            remote,
            connectivity,
            auth,
            media,
            open_chat: Mutex::new(None),
        })
    }

    /// Chat id of the conversation screen the user is looking at, if any.
    pub fn open_chat(&self) -> Option<String> {
        self.open_chat.lock().expect("open_chat lock").clone()
    }

    pub fn set_open_chat(&self, chat_id: Option<String>) {
        *self.open_chat.lock().expect("open_chat lock") = chat_id;
    }
}

/// Open (creating if needed) the cache database at `{db_dir}/cache.db`.
pub async fn init_cache_pool(db_dir: &str) -> Result<SqlitePool, StoreError> {
    let url = format!("sqlite://{db_dir}/cache.db?mode=rwc");
    SqlitePool::connect(&url)
        .await
        .map_err(|e| StoreError::Init(e.to_string()))
}

#[cfg(target_os = "android")]
fn init_logging() {
    android_logger::init_once(
        android_logger::Config::default()
            .with_max_level(log::LevelFilter::Debug)
            .with_tag("skiff-core"),
    );
}

#[cfg(not(target_os = "android"))]
fn init_logging() {}
