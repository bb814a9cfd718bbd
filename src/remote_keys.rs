//! Remote key store — persisted page cursors, one row per cached entity.
//!
//! Each paginated collection (chats, friends, messages-per-chat) keeps a key
//! table chaining `previous_cursor`/`next_cursor` through the remote ordering.
//! `created_at` is a cache-freshness clock, not a relationship pointer: the
//! mediators read the newest one to decide whether a refresh is due, and the
//! reconcile path bumps it to mark an entity as most recently touched.
//!
//! All three tables share one shape, so the helpers are parameterised by a
//! `KeySpace` (table name plus the optional per-chat scope for messages).

use sqlx::{Row, SqliteConnection, SqlitePool};

use crate::db::DbError;

// ─── Key space ───────────────────────────────────────────────────────────────

/// Identifies one key table, optionally scoped to a single chat.
#[derive(Debug, Clone, Copy)]
pub struct KeySpace<'a> {
    table: &'static str,
    scope: Option<(&'static str, &'a str)>,
}

impl KeySpace<'_> {
    pub const fn chats() -> KeySpace<'static> {
        KeySpace { table: "chat_keys", scope: None }
    }

    pub const fn friends() -> KeySpace<'static> {
        KeySpace { table: "friend_keys", scope: None }
    }

    pub fn messages(chat_id: &str) -> KeySpace<'_> {
        KeySpace { table: "message_keys", scope: Some(("chat_id", chat_id)) }
    }

    fn scope_clause(&self) -> String {
        match self.scope {
            Some((col, _)) => format!(" AND {col} = ?"),
            None => String::new(),
        }
    }
}

// ─── Row type ────────────────────────────────────────────────────────────────

/// `None` and `""` both mark a chain edge; at most one row per chain may
/// carry one.
#[derive(Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct RemoteKey {
    pub id: String,
    pub previous_cursor: Option<String>,
    pub next_cursor: Option<String>,
    pub created_at: i64,
}

impl RemoteKey {
    pub fn is_chain_head(&self) -> bool {
        matches!(self.previous_cursor.as_deref(), None | Some(""))
    }
}

// ─── Operations ──────────────────────────────────────────────────────────────

pub async fn get(
    conn: &mut SqliteConnection,
    space: KeySpace<'_>,
    id: &str,
) -> Result<Option<RemoteKey>, DbError> {
    let sql = format!(
        "SELECT id, previous_cursor, next_cursor, created_at FROM {} WHERE id = ?{}",
        space.table,
        space.scope_clause(),
    );
    let mut q = sqlx::query_as::<_, RemoteKey>(&sql).bind(id);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    Ok(q.fetch_optional(conn).await?)
}

/// Upsert a key row. The entity row must be written in the same transaction.
pub async fn insert(
    conn: &mut SqliteConnection,
    space: KeySpace<'_>,
    key: &RemoteKey,
) -> Result<(), DbError> {
    let (cols, placeholders, conflict) = match space.scope {
        Some((col, _)) => (
            format!("id, {col}, previous_cursor, next_cursor, created_at"),
            "?, ?, ?, ?, ?",
            format!("id, {col}"),
        ),
        None => (
            "id, previous_cursor, next_cursor, created_at".to_string(),
            "?, ?, ?, ?",
            "id".to_string(),
        ),
    };
    let sql = format!(
        "INSERT INTO {} ({cols}) VALUES ({placeholders})
         ON CONFLICT({conflict}) DO UPDATE SET
             previous_cursor = excluded.previous_cursor,
             next_cursor     = excluded.next_cursor,
             created_at      = excluded.created_at",
        space.table,
    );
    let mut q = sqlx::query(&sql).bind(&key.id);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    q.bind(&key.previous_cursor)
        .bind(&key.next_cursor)
        .bind(key.created_at)
        .execute(conn)
        .await?;
    Ok(())
}

/// Refresh the freshness clock without touching the cursor chain.
pub async fn touch(
    conn: &mut SqliteConnection,
    space: KeySpace<'_>,
    id: &str,
    now: i64,
) -> Result<(), DbError> {
    let sql = format!(
        "UPDATE {} SET created_at = ? WHERE id = ?{}",
        space.table,
        space.scope_clause(),
    );
    let mut q = sqlx::query(&sql).bind(now).bind(id);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    q.execute(conn).await?;
    Ok(())
}

/// The key with the greatest `created_at`, i.e. the most recently written one.
pub async fn newest(
    conn: &mut SqliteConnection,
    space: KeySpace<'_>,
) -> Result<Option<RemoteKey>, DbError> {
    let where_clause = match space.scope {
        Some((col, _)) => format!(" WHERE {col} = ?"),
        None => String::new(),
    };
    let sql = format!(
        "SELECT id, previous_cursor, next_cursor, created_at FROM {}{}
         ORDER BY created_at DESC LIMIT 1",
        space.table, where_clause,
    );
    let mut q = sqlx::query_as::<_, RemoteKey>(&sql);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    Ok(q.fetch_optional(conn).await?)
}

/// Newest `created_at` in the space; drives the mediator freshness policy.
pub async fn newest_created_at(
    pool: &SqlitePool,
    space: KeySpace<'_>,
) -> Result<Option<i64>, DbError> {
    let where_clause = match space.scope {
        Some((col, _)) => format!(" WHERE {col} = ?"),
        None => String::new(),
    };
    let sql = format!("SELECT MAX(created_at) AS ts FROM {}{}", space.table, where_clause);
    let mut q = sqlx::query(&sql);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    let row = q.fetch_one(pool).await?;
    Ok(row.get::<Option<i64>, _>("ts"))
}

/// Drop every key in the space (full refresh or teardown).
pub async fn clear(conn: &mut SqliteConnection, space: KeySpace<'_>) -> Result<(), DbError> {
    let where_clause = match space.scope {
        Some((col, _)) => format!(" WHERE {col} = ?"),
        None => String::new(),
    };
    let sql = format!("DELETE FROM {}{}", space.table, where_clause);
    let mut q = sqlx::query(&sql);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    q.execute(conn).await?;
    Ok(())
}

pub async fn delete(
    conn: &mut SqliteConnection,
    space: KeySpace<'_>,
    id: &str,
) -> Result<(), DbError> {
    let sql = format!("DELETE FROM {} WHERE id = ?{}", space.table, space.scope_clause());
    let mut q = sqlx::query(&sql).bind(id);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    q.execute(conn).await?;
    Ok(())
}

/// Number of chain-edge rows (`previous_cursor` NULL or empty) in the space.
/// The ordering invariant requires this to stay at most 1.
pub async fn edge_count(pool: &SqlitePool, space: KeySpace<'_>) -> Result<i64, DbError> {
    let scope_clause = match space.scope {
        Some((col, _)) => format!(" AND {col} = ?"),
        None => String::new(),
    };
    let sql = format!(
        "SELECT COUNT(*) AS n FROM {}
         WHERE (previous_cursor IS NULL OR previous_cursor = ''){}",
        space.table, scope_clause,
    );
    let mut q = sqlx::query(&sql);
    if let Some((_, value)) = space.scope {
        q = q.bind(value);
    }
    let row = q.fetch_one(pool).await?;
    Ok(row.get::<i64, _>("n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    fn key(id: &str, prev: Option<&str>, next: Option<&str>, ts: i64) -> RemoteKey {
        RemoteKey {
            id: id.into(),
            previous_cursor: prev.map(Into::into),
            next_cursor: next.map(Into::into),
            created_at: ts,
        }
    }

    #[tokio::test]
    async fn insert_get_roundtrip() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let space = KeySpace::chats();

        insert(&mut conn, space, &key("a", None, Some("a"), 100)).await.unwrap();
        let got = get(&mut conn, space, "a").await.unwrap().unwrap();
        assert!(got.is_chain_head());
        assert_eq!(got.next_cursor.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn touch_updates_clock_but_not_cursors() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();
        let space = KeySpace::chats();

        insert(&mut conn, space, &key("a", Some("z"), Some("a"), 100)).await.unwrap();
        touch(&mut conn, space, "a", 999).await.unwrap();

        let got = get(&mut conn, space, "a").await.unwrap().unwrap();
        assert_eq!(got.created_at, 999);
        assert_eq!(got.previous_cursor.as_deref(), Some("z"));
        assert_eq!(got.next_cursor.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn newest_is_scoped_per_chat_for_messages() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        insert(&mut conn, KeySpace::messages("c1"), &key("m1", None, Some("1"), 10))
            .await
            .unwrap();
        insert(&mut conn, KeySpace::messages("c2"), &key("m2", None, Some("2"), 99))
            .await
            .unwrap();

        let newest_c1 = newest(&mut conn, KeySpace::messages("c1")).await.unwrap().unwrap();
        assert_eq!(newest_c1.id, "m1");
        drop(conn);

        assert_eq!(
            newest_created_at(&pool, KeySpace::messages("c1")).await.unwrap(),
            Some(10)
        );
        assert_eq!(
            newest_created_at(&pool, KeySpace::messages("c3")).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn same_message_id_may_exist_in_two_chats() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        insert(&mut conn, KeySpace::messages("c1"), &key("m", None, Some("1"), 1))
            .await
            .unwrap();
        insert(&mut conn, KeySpace::messages("c2"), &key("m", Some("x"), Some("2"), 2))
            .await
            .unwrap();

        let in_c1 = get(&mut conn, KeySpace::messages("c1"), "m").await.unwrap().unwrap();
        let in_c2 = get(&mut conn, KeySpace::messages("c2"), "m").await.unwrap().unwrap();
        assert!(in_c1.is_chain_head());
        assert!(!in_c2.is_chain_head());
    }

    #[tokio::test]
    async fn clear_is_scoped() {
        let pool = test_pool().await;
        let mut conn = pool.acquire().await.unwrap();

        insert(&mut conn, KeySpace::messages("c1"), &key("m1", None, None, 1)).await.unwrap();
        insert(&mut conn, KeySpace::messages("c2"), &key("m2", None, None, 1)).await.unwrap();
        clear(&mut conn, KeySpace::messages("c1")).await.unwrap();

        assert!(get(&mut conn, KeySpace::messages("c1"), "m1").await.unwrap().is_none());
        assert!(get(&mut conn, KeySpace::messages("c2"), "m2").await.unwrap().is_some());
    }
}
