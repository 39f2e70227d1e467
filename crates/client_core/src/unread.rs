use std::collections::HashMap;

use shared::{
    domain::{UserId, UserSummary},
    protocol::ConversationSummary,
};

/// Per-peer count of direct messages not yet seen by opening the thread.
#[derive(Debug, Default, Clone)]
pub struct UnreadTracker {
    counts: HashMap<UserId, u32>,
}

impl UnreadTracker {
    pub fn increment(&mut self, peer: UserId) -> u32 {
        let count = self.counts.entry(peer).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    /// Drops the peer's entry entirely.
    pub fn reset(&mut self, peer: UserId) -> bool {
        self.counts.remove(&peer).is_some_and(|count| count > 0)
    }

    pub fn count(&self, peer: UserId) -> u32 {
        self.counts.get(&peer).copied().unwrap_or(0)
    }

    /// Badge value; `None` means no badge is rendered.
    pub fn badge(&self, peer: UserId) -> Option<u32> {
        self.counts.get(&peer).copied().filter(|count| *count > 0)
    }

    pub fn total(&self) -> u32 {
        self.counts.values().sum()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Presence {
    Online,
    Offline,
    Unknown,
}

/// Whatever user profiles the friends list and conversation summaries have
/// already brought in. Presence is read from here opportunistically.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    friends: HashMap<UserId, UserSummary>,
    conversation_peers: HashMap<UserId, UserSummary>,
}

impl Roster {
    pub fn replace_friends(&mut self, friends: Vec<UserSummary>) {
        self.friends = friends.into_iter().map(|user| (user.id, user)).collect();
    }

    pub fn replace_conversations(&mut self, conversations: &[ConversationSummary]) {
        self.conversation_peers = conversations
            .iter()
            .map(|summary| (summary.peer.id, summary.peer.clone()))
            .collect();
    }

    pub fn user(&self, id: UserId) -> Option<&UserSummary> {
        self.friends
            .get(&id)
            .or_else(|| self.conversation_peers.get(&id))
    }

    pub fn presence(&self, id: UserId) -> Presence {
        match self.user(id).and_then(|user| user.is_online) {
            Some(true) => Presence::Online,
            Some(false) => Presence::Offline,
            None => Presence::Unknown,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(id: i64, online: Option<bool>) -> UserSummary {
        UserSummary {
            id: UserId(id),
            name: format!("user-{id}"),
            avatar: None,
            is_online: online,
        }
    }

    #[test]
    fn increments_accumulate_and_reset_removes_entry() {
        let mut tracker = UnreadTracker::default();
        for expected in 1..=5 {
            assert_eq!(tracker.increment(UserId(3)), expected);
        }
        assert_eq!(tracker.badge(UserId(3)), Some(5));
        assert!(tracker.reset(UserId(3)));
        assert_eq!(tracker.count(UserId(3)), 0);
        assert_eq!(tracker.badge(UserId(3)), None);
        assert!(!tracker.reset(UserId(3)));
    }

    #[test]
    fn absent_peer_renders_no_badge() {
        let tracker = UnreadTracker::default();
        assert_eq!(tracker.badge(UserId(9)), None);
        assert_eq!(tracker.count(UserId(9)), 0);
        assert_eq!(tracker.total(), 0);
    }

    #[test]
    fn presence_prefers_friends_then_conversations_then_unknown() {
        let mut roster = Roster::default();
        assert_eq!(roster.presence(UserId(1)), Presence::Unknown);

        roster.replace_conversations(&[ConversationSummary {
            peer: user(1, Some(false)),
            last_message: None,
            unread_count: 0,
        }]);
        assert_eq!(roster.presence(UserId(1)), Presence::Offline);

        roster.replace_friends(vec![user(1, Some(true)), user(2, None)]);
        assert_eq!(roster.presence(UserId(1)), Presence::Online);
        assert_eq!(roster.presence(UserId(2)), Presence::Unknown);
    }
}
