//! skiff-core — offline-first sync core for a mobile chat client.
//!
//! A local SQLite cache is the single source the UI reads from; paged
//! mediators and reconciliation merge the remote store into it.

pub mod auth;
pub mod chats;
pub mod db;
pub mod error;
pub mod friends;
pub mod media;
pub mod messages;
pub mod paging;
pub mod profile;
pub mod push;
pub mod reconcile;
pub mod remote;
pub mod remote_keys;
pub mod screen;
pub mod store;

#[cfg(test)]
pub mod test_support;

// ── Core handle ──────────────────────────────────────────────────────────────
pub use error::SyncError;
pub use store::{now_millis, SkiffCore, StoreError};

// ── Remote seam ──────────────────────────────────────────────────────────────
pub use remote::{
    ChildEvent, ConnectivityMonitor, Query, RemoteSource, Snapshot, Subscription,
};

// ── Paging ───────────────────────────────────────────────────────────────────
pub use paging::{InitializeAction, LoadDirection, LoadSuccess, Mediator, PagingState};

// ── Collections ──────────────────────────────────────────────────────────────
pub use chats::{chats_mediator, close_chat, create_chat, delete_chat, open_chat};
pub use friends::friends_mediator;
pub use messages::{messages_mediator, send_image_message, send_text_message};
pub use push::handle_push;
