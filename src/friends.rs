//! Friends collection — page size 35, TTL 24 hours, keyed by user id.
//!
//! Friends change rarely, hence the long TTL. Search runs against the cache
//! only; a stale contact list is refreshed by the mediator, not by search.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sqlx::SqliteConnection;

use crate::db::{self, DbError, UserRow};
use crate::error::SyncError;
use crate::paging::{LoadDirection, Mediator, PagedCollection};
use crate::remote::{Query, RemoteSource, Snapshot};
use crate::remote_keys::KeySpace;
use crate::store::SkiffCore;

pub const FRIENDS_PAGE_SIZE: u32 = 35;
pub const FRIENDS_TTL_MS: i64 = 24 * 60 * 60 * 1000;

// ─── Remote document ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDoc {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub last_seen_at: i64,
}

impl UserDoc {
    pub fn into_row(self, user_id: &str) -> UserRow {
        UserRow {
            user_id: user_id.to_string(),
            name: self.name,
            email: self.email,
            avatar_url: self.avatar_url,
            status: self.status,
            last_seen_at: self.last_seen_at,
        }
    }
}

pub(crate) fn parse_user(snapshot: &Snapshot) -> Result<UserRow, SyncError> {
    let doc: UserDoc = serde_json::from_value(snapshot.value.clone())
        .map_err(|e| SyncError::malformed(format!("user {}: {e}", snapshot.key)))?;
    Ok(doc.into_row(&snapshot.key))
}

// ─── Paged collection ────────────────────────────────────────────────────────

pub struct FriendsCollection;

impl FriendsCollection {
    pub fn path(&self) -> &'static str {
        "users"
    }
}

#[async_trait]
impl PagedCollection for FriendsCollection {
    const PAGE_SIZE: u32 = FRIENDS_PAGE_SIZE;
    const TTL_MS: i64 = FRIENDS_TTL_MS;

    fn key_space(&self) -> KeySpace<'_> {
        KeySpace::friends()
    }

    fn refresh_from_start(&self) -> bool {
        true
    }

    async fn fetch_page(
        &self,
        remote: &dyn RemoteSource,
        direction: LoadDirection,
        cursor: Option<&str>,
    ) -> Result<Vec<Snapshot>, SyncError> {
        let query = match (direction, cursor) {
            (LoadDirection::Refresh, _) => Query::order_by_key().limit_to_first(Self::PAGE_SIZE),
            (LoadDirection::Append, Some(c)) => {
                Query::order_by_key().start_after(c).limit_to_first(Self::PAGE_SIZE)
            }
            (LoadDirection::Prepend, Some(c)) => {
                Query::order_by_key().end_before(c).limit_to_last(Self::PAGE_SIZE)
            }
            (_, None) => return Ok(Vec::new()),
        };
        remote.query(self.path(), query).await
    }

    async fn clear_local(&self, conn: &mut SqliteConnection) -> Result<(), DbError> {
        db::clear_users(conn).await
    }

    async fn store_entity(
        &self,
        conn: &mut SqliteConnection,
        snapshot: &Snapshot,
    ) -> Result<String, SyncError> {
        let row = parse_user(snapshot)?;
        db::upsert_user(conn, &row).await?;
        Ok(snapshot.key.clone())
    }
}

pub fn friends_mediator(core: &Arc<SkiffCore>) -> Mediator<FriendsCollection> {
    Mediator::new(
        FriendsCollection,
        core.pool.clone(),
        core.remote.clone(),
        core.connectivity.clone(),
    )
}

/// Contact search over the cache.
pub async fn search(core: &Arc<SkiffCore>, query: &str) -> Result<Vec<UserRow>, SyncError> {
    Ok(db::search_users(&core.pool, query).await?)
}
