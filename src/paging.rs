//! Generic cursor-paging mediator.
//!
//! One component, instantiated per collection (chats, friends,
//! messages-per-chat), bridges the local-first paging UI and the remote
//! source. `initialize` is a pure freshness policy over the remote-key clock;
//! `load` fetches exactly one page per direction and commits it together with
//! its cursor chain in a single transaction.
//!
//! Chain shape, for every committed page: an entity's `next_cursor` is its own
//! ordering marker (usable directly as a `start_after` bound) and its
//! `previous_cursor` is its predecessor's marker (usable as `end_before`).
//! `NULL` marks a known edge of the range.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::{SqliteConnection, SqlitePool};

use crate::db::DbError;
use crate::error::SyncError;
use crate::remote::{ConnectivityMonitor, RemoteSource, Snapshot};
use crate::remote_keys::{self, KeySpace, RemoteKey};
use crate::store::now_millis;

// ─── Contract types ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadDirection {
    Refresh,
    Prepend,
    Append,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InitializeAction {
    LaunchInitialRefresh,
    SkipInitialRefresh,
}

/// Boundary ids of the currently loaded window, supplied by the paging UI.
#[derive(Debug, Clone, Default)]
pub struct PagingState {
    pub first_loaded_id: Option<String>,
    pub last_loaded_id: Option<String>,
}

impl PagingState {
    pub fn window(first: impl Into<String>, last: impl Into<String>) -> Self {
        PagingState {
            first_loaded_id: Some(first.into()),
            last_loaded_id: Some(last.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadSuccess {
    pub end_of_pagination_reached: bool,
}

const END_REACHED: LoadSuccess = LoadSuccess { end_of_pagination_reached: true };

// ─── Collection trait ────────────────────────────────────────────────────────

/// What varies between the three paginated collections: page size, TTL, key
/// shape, the remote query and the entity upsert.
#[async_trait]
pub trait PagedCollection: Send + Sync {
    const PAGE_SIZE: u32;
    const TTL_MS: i64;

    fn key_space(&self) -> KeySpace<'_>;

    /// True when a Refresh fetches from the absolute start of the remote
    /// ordering (chats, friends); false when it fetches the most-recent end
    /// and earlier history remains reachable by Prepend (messages).
    fn refresh_from_start(&self) -> bool;

    /// Fetch one page. `cursor` is `None` on Refresh.
    async fn fetch_page(
        &self,
        remote: &dyn RemoteSource,
        direction: LoadDirection,
        cursor: Option<&str>,
    ) -> Result<Vec<Snapshot>, SyncError>;

    /// Remove the collection's entity rows ahead of a Refresh replace.
    async fn clear_local(&self, conn: &mut SqliteConnection) -> Result<(), DbError>;

    /// Upsert one fetched entity and return its ordering marker — the cursor
    /// value neighbouring pages will chain through.
    async fn store_entity(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &Snapshot,
    ) -> Result<String, SyncError>;
}

// ─── Mediator ────────────────────────────────────────────────────────────────

pub struct Mediator<C: PagedCollection> {
    collection: C,
    pool: SqlitePool,
    remote: Arc<dyn RemoteSource>,
    connectivity: Arc<dyn ConnectivityMonitor>,
}

impl<C: PagedCollection> Mediator<C> {
    pub fn new(
        collection: C,
        pool: SqlitePool,
        remote: Arc<dyn RemoteSource>,
        connectivity: Arc<dyn ConnectivityMonitor>,
    ) -> Self {
        Mediator { collection, pool, remote, connectivity }
    }

    pub fn collection(&self) -> &C {
        &self.collection
    }

    /// Freshness policy: cold cache or a stale newest key launches a refresh;
    /// offline always serves the cache as-is. Never inspects row counts.
    pub async fn initialize(&self) -> Result<InitializeAction, SyncError> {
        if !self.connectivity.is_connected() {
            return Ok(InitializeAction::SkipInitialRefresh);
        }
        let newest =
            remote_keys::newest_created_at(&self.pool, self.collection.key_space()).await?;
        let action = match newest {
            None => InitializeAction::LaunchInitialRefresh,
            Some(created_at) if now_millis() - created_at > C::TTL_MS => {
                InitializeAction::LaunchInitialRefresh
            }
            Some(_) => InitializeAction::SkipInitialRefresh,
        };
        Ok(action)
    }

    /// Fetch one page in `direction` and merge it transactionally.
    pub async fn load(
        &self,
        direction: LoadDirection,
        state: &PagingState,
    ) -> Result<LoadSuccess, SyncError> {
        let space = self.collection.key_space();

        // Resolve the fetch cursor from the boundary item's key. A missing
        // key or cursor means there is nothing further in that direction, so
        // the load completes without touching the network.
        let cursor = match direction {
            LoadDirection::Refresh => None,
            LoadDirection::Prepend => {
                let Some(first) = state.first_loaded_id.as_deref() else {
                    return Ok(END_REACHED);
                };
                let mut conn = self.pool.acquire().await?;
                let key = remote_keys::get(&mut conn, space, first).await?;
                match key.and_then(|k| k.previous_cursor).filter(|c| !c.is_empty()) {
                    None => return Ok(END_REACHED),
                    some => some,
                }
            }
            LoadDirection::Append => {
                let Some(last) = state.last_loaded_id.as_deref() else {
                    return Ok(END_REACHED);
                };
                let mut conn = self.pool.acquire().await?;
                let key = remote_keys::get(&mut conn, space, last).await?;
                match key.and_then(|k| k.next_cursor).filter(|c| !c.is_empty()) {
                    None => return Ok(END_REACHED),
                    some => some,
                }
            }
        };

        // Degrade to cache-only rather than blocking the UI on connectivity.
        if !self.connectivity.is_connected() {
            return Ok(END_REACHED);
        }

        let page = self
            .collection
            .fetch_page(self.remote.as_ref(), direction, cursor.as_deref())
            .await?;
        let page_full = page.len() as u32 >= C::PAGE_SIZE;
        let now = now_millis();

        // Merge: full replace on Refresh, append/prepend otherwise. A failure
        // anywhere rolls the whole page back, so an entity row can never be
        // committed without its key row.
        let mut tx = self.pool.begin().await?;
        if direction == LoadDirection::Refresh {
            self.collection.clear_local(&mut tx).await?;
            remote_keys::clear(&mut tx, space).await?;
        }

        let mut markers = Vec::with_capacity(page.len());
        for snapshot in &page {
            markers.push(self.collection.store_entity(&mut tx, snapshot).await?);
        }

        for (i, snapshot) in page.iter().enumerate() {
            let previous_cursor = if i > 0 {
                Some(markers[i - 1].clone())
            } else {
                match direction {
                    // Appending continues from the cursor we fetched with.
                    LoadDirection::Append => cursor.clone(),
                    // Refresh from the start of the ordering has nothing
                    // before it; refresh from the most-recent end keeps the
                    // page head open for Prepend while full pages arrive.
                    LoadDirection::Refresh if self.collection.refresh_from_start() => None,
                    LoadDirection::Refresh | LoadDirection::Prepend => {
                        page_full.then(|| markers[0].clone())
                    }
                }
            };
            let key = RemoteKey {
                id: snapshot.key.clone(),
                previous_cursor,
                next_cursor: Some(markers[i].clone()),
                created_at: now,
            };
            remote_keys::insert(&mut tx, space, &key).await?;
        }
        tx.commit().await?;

        let end_of_pagination_reached = match direction {
            // A refresh hands the UI the freshest single page; further history
            // arrives through scroll-triggered Prepend/Append loads.
            LoadDirection::Refresh => true,
            _ => page.is_empty(),
        };
        Ok(LoadSuccess { end_of_pagination_reached })
    }
}
