use std::collections::HashSet;

use shared::protocol::ConversationSummary;

use crate::{
    alerts::{PermissionGate, PopupQueue},
    chat_window::ChatWindow,
    conversation::ConversationCache,
    notifications::NotificationFeed,
    session::Session,
    types::QueryKey,
    unread::{Roster, UnreadTracker},
};

/// Everything the realtime layer caches for the signed-in user. Only the
/// router and the client's own operations write to it.
#[derive(Debug, Default)]
pub struct ChatState {
    pub session: Option<Session>,
    pub generation: u64,
    pub conversations: ConversationCache,
    pub summaries: Option<Vec<ConversationSummary>>,
    pub unread: UnreadTracker,
    pub roster: Roster,
    pub window: ChatWindow,
    pub popups: PopupQueue,
    pub notifications: NotificationFeed,
    pub stale: HashSet<QueryKey>,
    pub permission_gate: PermissionGate,
}

impl ChatState {
    /// Drops all per-session data and starts a new generation, so work that
    /// resumes after an await can tell its session is gone. Tab focus is not
    /// session data and carries over.
    pub fn reset(&mut self) -> u64 {
        let generation = self.generation + 1;
        let focused = self.window.is_focused();
        *self = Self {
            generation,
            ..Self::default()
        };
        self.window.set_focused(focused);
        generation
    }

    pub fn is_current(&self, generation: u64) -> bool {
        self.generation == generation && self.session.is_some()
    }
}
