//! Cached message threads.
//!
//! Direct threads are paginated by the server newest-first (page 1 holds the
//! most recent messages). The cache keeps those pages exactly as fetched so
//! "load older" can keep asking for `next_page`, and only inverts the order
//! when producing the display sequence. Group threads are a single ascending
//! list loaded in one request.

use std::collections::HashMap;

use shared::{
    domain::{BoardId, ConversationKey, MessageId, UserId},
    protocol::{DirectMessagePage, GroupMessagePayload},
};
use tracing::debug;
use uuid::Uuid;

use crate::types::{DeliveryState, EntryId, MessageEntry};

pub const DEFAULT_PAGE_SIZE: u32 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmOutcome {
    /// The pending entry was swapped for the confirmed one at the same position.
    Replaced,
    /// The confirmed message was already cached; the pending entry was dropped.
    Collapsed,
    /// No pending entry with that id was cached; the confirmed entry was inserted.
    Inserted,
}

#[derive(Debug, Clone, Default)]
pub struct DirectThread {
    pages: Vec<Vec<MessageEntry>>,
    has_more: bool,
    next_page: u32,
    fetching: bool,
    loading: bool,
    held_echoes: Vec<MessageEntry>,
}

impl DirectThread {
    /// Empty thread cached while page 1 is in flight. Messages routed into it
    /// meanwhile are kept when the page is merged.
    pub fn loading() -> Self {
        Self {
            next_page: 2,
            loading: true,
            ..Self::default()
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Stores a fetched page 1, skipping messages already cached. Serves both
    /// the initial load and refetches of a stale thread. Returns how many
    /// entries were added.
    pub fn merge_first_page(&mut self, page: DirectMessagePage) -> usize {
        let fresh: Vec<MessageEntry> = page
            .items
            .into_iter()
            .filter(|message| !self.contains_server_id(message.id))
            .map(MessageEntry::from)
            .collect();
        let merged = fresh.len();
        self.has_more = if self.loading {
            page.has_more
        } else {
            self.has_more || page.has_more
        };
        self.loading = false;

        let newest = self.newest_page_mut();
        newest.extend(fresh);
        newest.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        merged
    }

    /// Leaves the loading state without data; the thread keeps whatever was
    /// routed into it.
    pub fn abort_loading(&mut self) {
        self.loading = false;
    }

    pub fn has_more(&self) -> bool {
        self.has_more
    }

    pub fn len(&self) -> usize {
        self.pages.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claims the next older page for fetching. Returns `None` when there is
    /// nothing older or a fetch is already outstanding.
    pub fn begin_load_older(&mut self) -> Option<u32> {
        if !self.has_more || self.fetching {
            return None;
        }
        self.fetching = true;
        Some(self.next_page)
    }

    pub fn abort_load_older(&mut self) {
        self.fetching = false;
    }

    /// Merges an older page and returns how many entries became visible.
    pub fn finish_load_older(&mut self, page_number: u32, page: DirectMessagePage) -> usize {
        self.fetching = false;
        if page_number != self.next_page {
            debug!(
                page_number,
                expected = self.next_page,
                "conversation: dropping out-of-sequence page"
            );
            return 0;
        }

        // Messages that arrived live shift the server's offsets, so an older
        // page can repeat entries we already hold.
        let items: Vec<MessageEntry> = page
            .items
            .into_iter()
            .filter(|message| !self.contains_server_id(message.id))
            .map(MessageEntry::from)
            .collect();
        let inserted = items.len();
        self.pages.push(items);
        self.next_page += 1;
        self.has_more = page.has_more;
        inserted
    }

    /// Adds a confirmed message at the newest end. Returns false for duplicates.
    pub fn prepend(&mut self, entry: MessageEntry) -> bool {
        if let Some(id) = entry.id.server_id() {
            if self.contains_server_id(id) || self.held_echoes.iter().any(|e| e.id == entry.id) {
                return false;
            }
        }
        self.newest_page_mut().insert(0, entry);
        true
    }

    /// Our own message echoed back by the server while sends are still pending.
    /// It is held until the mutation results tell us which pending entry it is.
    pub fn receive_own_echo(&mut self, entry: MessageEntry) -> bool {
        if !self.has_pending() {
            return self.prepend(entry);
        }
        let Some(id) = entry.id.server_id() else {
            return false;
        };
        if self.contains_server_id(id) || self.held_echoes.iter().any(|e| e.id == entry.id) {
            return false;
        }
        self.held_echoes.push(entry);
        false
    }

    pub fn insert_pending(&mut self, entry: MessageEntry) {
        self.newest_page_mut().insert(0, entry);
    }

    pub fn confirm(&mut self, local_id: Uuid, confirmed: MessageEntry) -> ConfirmOutcome {
        let confirmed_id = confirmed.id;
        self.held_echoes.retain(|echo| echo.id != confirmed_id);

        let already_cached = confirmed_id
            .server_id()
            .is_some_and(|id| self.contains_server_id(id));

        let outcome = match self.position_of(EntryId::Local(local_id)) {
            Some((page, index)) if already_cached => {
                self.pages[page].remove(index);
                ConfirmOutcome::Collapsed
            }
            Some((page, index)) => {
                self.pages[page][index] = confirmed;
                ConfirmOutcome::Replaced
            }
            None if already_cached => ConfirmOutcome::Collapsed,
            None => {
                self.newest_page_mut().insert(0, confirmed);
                ConfirmOutcome::Inserted
            }
        };
        self.flush_held_echoes();
        outcome
    }

    /// Removes a pending entry whose send failed and hands it back with its
    /// delivery state set to `Failed`.
    pub fn reject(&mut self, local_id: Uuid, reason: impl Into<String>) -> Option<MessageEntry> {
        let (page, index) = self.position_of(EntryId::Local(local_id))?;
        let mut entry = self.pages[page].remove(index);
        entry.delivery = DeliveryState::Failed {
            reason: reason.into(),
        };
        self.flush_held_echoes();
        Some(entry)
    }

    /// Display sequence, oldest first.
    pub fn messages(&self) -> Vec<MessageEntry> {
        let mut messages: Vec<MessageEntry> = self
            .pages
            .iter()
            .flat_map(|page| page.iter())
            .rev()
            .cloned()
            .collect();
        messages.sort_by_key(|entry| entry.created_at);
        messages
    }

    pub fn contains_server_id(&self, id: MessageId) -> bool {
        self.position_of(EntryId::Server(id)).is_some()
    }

    fn has_pending(&self) -> bool {
        self.pages.iter().flatten().any(MessageEntry::is_pending)
    }

    fn position_of(&self, id: EntryId) -> Option<(usize, usize)> {
        self.pages.iter().enumerate().find_map(|(page, entries)| {
            entries
                .iter()
                .position(|entry| entry.id == id)
                .map(|index| (page, index))
        })
    }

    fn newest_page_mut(&mut self) -> &mut Vec<MessageEntry> {
        if self.pages.is_empty() {
            self.pages.push(Vec::new());
            self.next_page = 2;
        }
        &mut self.pages[0]
    }

    fn flush_held_echoes(&mut self) {
        if self.has_pending() || self.held_echoes.is_empty() {
            return;
        }
        let mut held = std::mem::take(&mut self.held_echoes);
        held.sort_by_key(|entry| entry.created_at);
        for echo in held {
            self.prepend(echo);
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupThread {
    messages: Vec<MessageEntry>,
    loading: bool,
}

impl GroupThread {
    pub fn loading() -> Self {
        Self {
            messages: Vec::new(),
            loading: true,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    /// Merges fetched history with whatever is cached, ascending by time.
    pub fn merge_history(&mut self, history: Vec<GroupMessagePayload>) -> usize {
        self.loading = false;
        let mut merged = 0;
        for message in history {
            if self.append(MessageEntry::from(message)) {
                merged += 1;
            }
        }
        self.messages.sort_by_key(|entry| entry.created_at);
        merged
    }

    pub fn abort_loading(&mut self) {
        self.loading = false;
    }

    /// Appends at the newest end. Returns false for duplicates.
    pub fn append(&mut self, entry: MessageEntry) -> bool {
        if self.messages.iter().any(|existing| existing.id == entry.id) {
            return false;
        }
        self.messages.push(entry);
        true
    }

    pub fn messages(&self) -> &[MessageEntry] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct ConversationCache {
    direct: HashMap<UserId, DirectThread>,
    groups: HashMap<BoardId, GroupThread>,
}

impl ConversationCache {
    pub fn direct(&self, peer: UserId) -> Option<&DirectThread> {
        self.direct.get(&peer)
    }

    pub fn direct_mut(&mut self, peer: UserId) -> Option<&mut DirectThread> {
        self.direct.get_mut(&peer)
    }

    pub fn insert_direct(&mut self, peer: UserId, thread: DirectThread) {
        self.direct.insert(peer, thread);
    }

    pub fn group(&self, board_id: BoardId) -> Option<&GroupThread> {
        self.groups.get(&board_id)
    }

    pub fn group_mut(&mut self, board_id: BoardId) -> Option<&mut GroupThread> {
        self.groups.get_mut(&board_id)
    }

    pub fn insert_group(&mut self, board_id: BoardId, thread: GroupThread) {
        self.groups.insert(board_id, thread);
    }

    pub fn messages(&self, key: ConversationKey) -> Vec<MessageEntry> {
        match key {
            ConversationKey::Direct(peer) => self
                .direct
                .get(&peer)
                .map(DirectThread::messages)
                .unwrap_or_default(),
            ConversationKey::Group(board_id) => self
                .groups
                .get(&board_id)
                .map(|thread| thread.messages().to_vec())
                .unwrap_or_default(),
        }
    }

    /// Every cached conversation, direct threads first.
    pub fn keys(&self) -> impl Iterator<Item = ConversationKey> + '_ {
        self.direct
            .keys()
            .copied()
            .map(ConversationKey::Direct)
            .chain(self.groups.keys().copied().map(ConversationKey::Group))
    }
}

/// Scroll geometry of a rendered thread, in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Viewport {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl Viewport {
    pub fn at_top(&self) -> bool {
        self.scroll_top <= 0.0
    }

    pub fn anchor(&self) -> ScrollAnchor {
        ScrollAnchor {
            scroll_top: self.scroll_top,
            scroll_height: self.scroll_height,
        }
    }

    pub fn scroll_to_newest(&mut self) {
        self.scroll_top = (self.scroll_height - self.client_height).max(0.0);
    }
}

/// Scroll position captured before older content is inserted above it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollAnchor {
    scroll_top: f64,
    scroll_height: f64,
}

impl ScrollAnchor {
    /// Shifts the viewport by the height the inserted content added, so the
    /// message under the user's eyes stays put.
    pub fn restore(&self, viewport: &mut Viewport, new_scroll_height: f64) {
        let delta = new_scroll_height - self.scroll_height;
        viewport.scroll_height = new_scroll_height;
        viewport.scroll_top = self.scroll_top + delta;
    }
}

#[cfg(test)]
#[path = "tests/conversation_tests.rs"]
mod tests;
