//! In-memory test doubles: a hierarchical remote with query + child-event
//! semantics, a toggleable connectivity monitor, and fake auth/media
//! backends. Tests drive the real cache against these.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::SqlitePool;
use tokio::sync::mpsc;

use crate::auth::{AuthError, AuthProvider, AuthUser, Credentials};
use crate::db;
use crate::error::SyncError;
use crate::media::{MediaError, MediaStore, ProgressCallback};
use crate::remote::{
    ChildEvent, ConnectivityMonitor, OrderBy, Query, QueryLimit, RemoteSource, Snapshot,
    Subscription,
};
use crate::store::SkiffCore;

// ─── Pool & core ─────────────────────────────────────────────────────────────

/// One-connection in-memory pool with the schema applied. A single
/// connection keeps every handle on the same `:memory:` database.
pub async fn test_pool() -> SqlitePool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory pool");
    db::run_migrations(&pool).await.expect("migrations");
    pool
}

pub async fn test_core() -> (Arc<SkiffCore>, Arc<MemoryRemote>, Arc<TestConnectivity>) {
    let pool = test_pool().await;
    let remote = Arc::new(MemoryRemote::new());
    let connectivity = Arc::new(TestConnectivity::new());
    let core = SkiffCore::with_pool(
        pool,
        remote.clone(),
        connectivity.clone(),
        Arc::new(FakeAuth::signed_in("me")),
        Arc::new(FakeMedia),
    );
    (core, remote, connectivity)
}

// ─── Document fixtures ───────────────────────────────────────────────────────

pub fn chat_doc(peer_id: &str, timestamp: i64) -> Value {
    json!({
        "peer_id": peer_id,
        "peer_name": format!("Peer {peer_id}"),
        "last_message": "hello",
        "last_message_type": "text",
        "timestamp": timestamp,
    })
}

pub fn user_doc(name: &str) -> Value {
    json!({
        "name": name,
        "email": format!("{}@example.com", name.to_lowercase().replace(' ', ".")),
        "last_seen_at": 0,
    })
}

pub fn message_doc(sender: &str, text: &str, timestamp: i64) -> Value {
    json!({
        "sender_id": sender,
        "text": text,
        "timestamp": timestamp,
    })
}

// ─── In-memory remote ────────────────────────────────────────────────────────

struct Listener {
    id: u64,
    path: String,
    sender: mpsc::Sender<ChildEvent>,
}

/// A JSON tree behind the [`RemoteSource`] trait. Writes fan child events out
/// to attached listeners; queries evaluate ordering, bounds and limits over
/// the children of a path, returning them in ascending order.
pub struct MemoryRemote {
    tree: Mutex<Value>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    next_listener_id: AtomicU64,
    query_calls: AtomicU32,
}

impl MemoryRemote {
    pub fn new() -> Self {
        MemoryRemote {
            tree: Mutex::new(Value::Object(Map::new())),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener_id: AtomicU64::new(0),
            query_calls: AtomicU32::new(0),
        }
    }

    pub async fn put(&self, path: &str, value: Value) {
        self.write(path, value).await;
    }

    pub async fn delete(&self, path: &str) {
        self.write(path, Value::Null).await;
    }

    pub async fn get_value(&self, path: &str) -> Option<Value> {
        let tree = self.tree.lock().unwrap();
        node_at(&tree, path).cloned()
    }

    /// How many `query` calls the mediators have made so far.
    pub fn query_calls(&self) -> u32 {
        self.query_calls.load(AtomicOrdering::SeqCst)
    }

    async fn write(&self, path: &str, value: Value) {
        let mut outgoing: Vec<(mpsc::Sender<ChildEvent>, ChildEvent)> = Vec::new();
        {
            let mut tree = self.tree.lock().unwrap();
            let listeners = self.listeners.lock().unwrap();

            // Which top-level child of each listened path does this write
            // touch? Remember its pre-image so we can classify the event.
            let affected: Vec<(usize, String, Option<Value>)> = listeners
                .iter()
                .enumerate()
                .filter_map(|(i, l)| {
                    let child = child_key(&l.path, path)?;
                    let before = node_at(&tree, &format!("{}/{child}", l.path)).cloned();
                    Some((i, child, before))
                })
                .collect();

            set_at(&mut tree, path, value);

            for (i, child, before) in affected {
                let listener = &listeners[i];
                let after = node_at(&tree, &format!("{}/{child}", listener.path)).cloned();
                let event = match (before, after) {
                    (None, Some(v)) => ChildEvent::Added(Snapshot { key: child, value: v }),
                    (Some(_), Some(v)) => ChildEvent::Changed(Snapshot { key: child, value: v }),
                    (Some(v), None) => ChildEvent::Removed(Snapshot { key: child, value: v }),
                    (None, None) => continue,
                };
                outgoing.push((listener.sender.clone(), event));
            }
        }
        for (sender, event) in outgoing {
            // A closed receiver just means the subscription is gone.
            let _ = sender.send(event).await;
        }
    }
}

#[async_trait]
impl RemoteSource for MemoryRemote {
    async fn get(&self, path: &str) -> Result<Option<Value>, SyncError> {
        Ok(self.get_value(path).await)
    }

    async fn set(&self, path: &str, value: Value) -> Result<(), SyncError> {
        self.write(path, value).await;
        Ok(())
    }

    async fn update(&self, updates: HashMap<String, Value>) -> Result<(), SyncError> {
        for (path, value) in updates {
            self.write(&path, value).await;
        }
        Ok(())
    }

    async fn query(&self, path: &str, query: Query) -> Result<Vec<Snapshot>, SyncError> {
        self.query_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let children: Vec<(String, Value)> = {
            let tree = self.tree.lock().unwrap();
            match node_at(&tree, path) {
                Some(Value::Object(map)) => {
                    map.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
                }
                _ => Vec::new(),
            }
        };

        let sort_value = |key: &str, value: &Value| -> Value {
            match &query.order {
                OrderBy::Key => Value::String(key.to_string()),
                OrderBy::Child(field) => value.get(field).cloned().unwrap_or(Value::Null),
            }
        };

        let mut rows: Vec<(Value, String, Value)> = children
            .into_iter()
            .map(|(k, v)| (sort_value(&k, &v), k, v))
            .collect();
        rows.sort_by(|a, b| cmp_values(&a.0, &b.0).then_with(|| a.1.cmp(&b.1)));

        if let Some(bound) = &query.start_after {
            rows.retain(|(s, _, _)| cmp_values(s, bound) == Ordering::Greater);
        }
        if let Some(bound) = &query.end_before {
            rows.retain(|(s, _, _)| cmp_values(s, bound) == Ordering::Less);
        }
        if let Some(bound) = &query.equal_to {
            rows.retain(|(s, _, _)| cmp_values(s, bound) == Ordering::Equal);
        }
        match query.limit {
            Some(QueryLimit::First(n)) => rows.truncate(n as usize),
            Some(QueryLimit::Last(n)) => {
                let keep = n as usize;
                if rows.len() > keep {
                    rows.drain(..rows.len() - keep);
                }
            }
            None => {}
        }

        Ok(rows
            .into_iter()
            .map(|(_, key, value)| Snapshot { key, value })
            .collect())
    }

    async fn subscribe(&self, path: &str) -> Result<Subscription, SyncError> {
        let (sender, receiver) = mpsc::channel(64);
        let id = self.next_listener_id.fetch_add(1, AtomicOrdering::SeqCst);
        self.listeners
            .lock()
            .unwrap()
            .push(Listener { id, path: path.to_string(), sender });

        let listeners = self.listeners.clone();
        Ok(Subscription::new(receiver, move || {
            listeners.lock().unwrap().retain(|l| l.id != id);
        }))
    }
}

fn child_key(listened: &str, written: &str) -> Option<String> {
    let rest = written.strip_prefix(listened)?.strip_prefix('/')?;
    let child = rest.split('/').next()?;
    if child.is_empty() {
        None
    } else {
        Some(child.to_string())
    }
}

fn node_at<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let mut node = root;
    for segment in path.split('/').filter(|s| !s.is_empty()) {
        node = node.as_object()?.get(segment)?;
    }
    Some(node)
}

/// Write `value` at `path`, creating intermediate objects. `Null` deletes.
fn set_at(root: &mut Value, path: &str, value: Value) {
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let Some((leaf, parents)) = segments.split_last() else {
        return;
    };

    let mut node = root;
    for segment in parents {
        if value.is_null() && !matches!(node.get(*segment), Some(Value::Object(_))) {
            return; // nothing to delete underneath
        }
        let map = match node {
            Value::Object(map) => map,
            other => {
                *other = Value::Object(Map::new());
                other.as_object_mut().unwrap()
            }
        };
        node = map
            .entry(segment.to_string())
            .or_insert_with(|| Value::Object(Map::new()));
    }

    let map = match node {
        Value::Object(map) => map,
        other => {
            *other = Value::Object(Map::new());
            other.as_object_mut().unwrap()
        }
    };
    if value.is_null() {
        map.remove(*leaf);
    } else {
        map.insert(leaf.to_string(), value);
    }
}

/// Null < bool < number < string, like the backend's ordering.
fn cmp_values(a: &Value, b: &Value) -> Ordering {
    fn rank(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Bool(_) => 1,
            Value::Number(_) => 2,
            Value::String(_) => 3,
            _ => 4,
        }
    }
    match (a, b) {
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ─── Connectivity ────────────────────────────────────────────────────────────

pub struct TestConnectivity {
    connected: AtomicBool,
}

impl TestConnectivity {
    pub fn new() -> Self {
        TestConnectivity { connected: AtomicBool::new(true) }
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, AtomicOrdering::SeqCst);
    }
}

impl ConnectivityMonitor for TestConnectivity {
    fn is_connected(&self) -> bool {
        self.connected.load(AtomicOrdering::SeqCst)
    }
}

// ─── Auth & media fakes ──────────────────────────────────────────────────────

pub struct FakeAuth {
    user: Mutex<Option<AuthUser>>,
    sign_in_calls: AtomicU32,
}

impl FakeAuth {
    pub fn signed_in(uid: &str) -> Self {
        FakeAuth {
            user: Mutex::new(Some(AuthUser {
                uid: uid.to_string(),
                email: Some(format!("{uid}@example.com")),
                display_name: None,
            })),
            sign_in_calls: AtomicU32::new(0),
        }
    }

    pub fn signed_out() -> Self {
        FakeAuth { user: Mutex::new(None), sign_in_calls: AtomicU32::new(0) }
    }

    pub fn sign_in_calls(&self) -> u32 {
        self.sign_in_calls.load(AtomicOrdering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    fn current_user(&self) -> Option<AuthUser> {
        self.user.lock().unwrap().clone()
    }

    async fn sign_in(&self, credentials: Credentials) -> Result<AuthUser, AuthError> {
        self.sign_in_calls.fetch_add(1, AtomicOrdering::SeqCst);
        let user = AuthUser {
            uid: "fake-uid".to_string(),
            email: match credentials {
                Credentials::EmailPassword { email, .. } => Some(email),
                _ => None,
            },
            display_name: None,
        };
        *self.user.lock().unwrap() = Some(user.clone());
        Ok(user)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        *self.user.lock().unwrap() = None;
        Ok(())
    }

    async fn delete_account(&self) -> Result<(), AuthError> {
        *self.user.lock().unwrap() = None;
        Ok(())
    }
}

pub struct FakeMedia;

#[async_trait]
impl MediaStore for FakeMedia {
    async fn upload(
        &self,
        path: &str,
        bytes: Vec<u8>,
        progress: Option<ProgressCallback>,
    ) -> Result<String, MediaError> {
        if let Some(report) = progress {
            report(bytes.len() as u64, bytes.len() as u64);
        }
        Ok(format!("https://media.test/{path}"))
    }

    async fn download(&self, path: &str) -> Result<Vec<u8>, MediaError> {
        Err(MediaError::NotFound(path.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn update_creates_intermediate_objects_and_null_deletes() {
        let remote = MemoryRemote::new();
        remote
            .update(HashMap::from([(
                "a/b/c".to_string(),
                json!(1),
            )]))
            .await
            .unwrap();
        assert_eq!(remote.get_value("a/b/c").await, Some(json!(1)));

        remote
            .update(HashMap::from([("a/b".to_string(), Value::Null)]))
            .await
            .unwrap();
        assert!(remote.get_value("a/b").await.is_none());
        assert!(remote.get_value("a").await.is_some());
    }

    #[tokio::test]
    async fn query_orders_bounds_and_limits() {
        let remote = MemoryRemote::new();
        for (key, ts) in [("x", 3), ("y", 1), ("z", 2)] {
            remote.put(&format!("items/{key}"), json!({"timestamp": ts})).await;
        }

        let by_key = remote
            .query("items", Query::order_by_key().start_after("x"))
            .await
            .unwrap();
        assert_eq!(by_key.iter().map(|s| s.key.as_str()).collect::<Vec<_>>(), vec!["y", "z"]);

        let by_ts = remote
            .query(
                "items",
                Query::order_by_child("timestamp").end_before(3i64).limit_to_last(1),
            )
            .await
            .unwrap();
        assert_eq!(by_ts.len(), 1);
        assert_eq!(by_ts[0].key, "z");
    }

    #[tokio::test]
    async fn nested_write_surfaces_as_a_changed_child() {
        let remote = MemoryRemote::new();
        remote.put("chats/c1", json!({"last_message": "old"})).await;
        let mut sub = remote.subscribe("chats").await.unwrap();

        remote.put("chats/c1/last_message", json!("new")).await;
        match sub.next_event().await.unwrap() {
            ChildEvent::Changed(s) => {
                assert_eq!(s.key, "c1");
                assert_eq!(s.value["last_message"], "new");
            }
            other => panic!("expected Changed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn detached_listener_stops_receiving() {
        let remote = MemoryRemote::new();
        let sub = remote.subscribe("chats").await.unwrap();
        sub.detach();
        remote.put("chats/c1", json!({"timestamp": 1})).await;
        assert!(remote.listeners.lock().unwrap().is_empty());
    }
}
