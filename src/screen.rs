//! Screen state as pure values: `reduce(state, event) -> state`.
//!
//! The UI shell renders whatever state it is handed and forwards events; all
//! transitions live here where they can be tested without a UI framework.
//! Cache updates and load outcomes arrive as separate events because the
//! cache feed keeps emitting while a page load is in flight.

use crate::db::{ChatRow, MessageRow};

// ─── Chat list ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub enum LoadStatus {
    #[default]
    Idle,
    Loading,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChatListState {
    pub status: LoadStatus,
    pub chats: Vec<ChatRow>,
    pub end_of_history: bool,
}

#[derive(Debug, Clone)]
pub enum ChatListEvent {
    /// The screen came on; an initial load may be running.
    Started,
    /// The cache feed emitted a new ordering of the list.
    CacheUpdated(Vec<ChatRow>),
    LoadStarted,
    LoadCompleted { end_of_pagination_reached: bool },
    LoadFailed(String),
    /// The user dismissed the error banner.
    ErrorDismissed,
}

pub fn reduce_chat_list(state: ChatListState, event: ChatListEvent) -> ChatListState {
    match event {
        ChatListEvent::Started => ChatListState { status: LoadStatus::Loading, ..state },
        ChatListEvent::CacheUpdated(chats) => ChatListState { chats, ..state },
        ChatListEvent::LoadStarted => ChatListState { status: LoadStatus::Loading, ..state },
        ChatListEvent::LoadCompleted { end_of_pagination_reached } => ChatListState {
            status: LoadStatus::Idle,
            end_of_history: end_of_pagination_reached,
            ..state
        },
        ChatListEvent::LoadFailed(reason) => {
            ChatListState { status: LoadStatus::Failed(reason), ..state }
        }
        ChatListEvent::ErrorDismissed => ChatListState { status: LoadStatus::Idle, ..state },
    }
}

// ─── Conversation ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ConversationState {
    pub status: LoadStatus,
    pub messages: Vec<MessageRow>,
    pub end_of_history: bool,
    pub draft: String,
    pub sending: bool,
}

#[derive(Debug, Clone)]
pub enum ConversationEvent {
    Opened,
    CacheUpdated(Vec<MessageRow>),
    DraftChanged(String),
    SendStarted,
    /// The fan-out landed; the message itself arrives via the cache feed.
    SendCompleted,
    SendFailed(String),
    HistoryLoadStarted,
    HistoryLoaded { end_of_pagination_reached: bool },
    HistoryLoadFailed(String),
}

pub fn reduce_conversation(
    state: ConversationState,
    event: ConversationEvent,
) -> ConversationState {
    match event {
        ConversationEvent::Opened => {
            ConversationState { status: LoadStatus::Loading, ..state }
        }
        ConversationEvent::CacheUpdated(messages) => {
            ConversationState { messages, ..state }
        }
        ConversationEvent::DraftChanged(draft) => ConversationState { draft, ..state },
        ConversationEvent::SendStarted => ConversationState { sending: true, ..state },
        ConversationEvent::SendCompleted => {
            ConversationState { sending: false, draft: String::new(), ..state }
        }
        ConversationEvent::SendFailed(reason) => ConversationState {
            sending: false,
            status: LoadStatus::Failed(reason),
            ..state
        },
        ConversationEvent::HistoryLoadStarted => {
            ConversationState { status: LoadStatus::Loading, ..state }
        }
        ConversationEvent::HistoryLoaded { end_of_pagination_reached } => ConversationState {
            status: LoadStatus::Idle,
            end_of_history: end_of_pagination_reached,
            ..state
        },
        ConversationEvent::HistoryLoadFailed(reason) => {
            ConversationState { status: LoadStatus::Failed(reason), ..state }
        }
    }
}
