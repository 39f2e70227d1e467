use chrono::{DateTime, Utc};
use shared::{
    domain::{BoardId, ConversationKey, MessageId, UserId, UserSummary},
    protocol::{DirectMessagePayload, GroupMessagePayload},
};
use uuid::Uuid;

/// Identity of a cached message: a client-side temporary id until the server
/// confirms it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryId {
    Local(Uuid),
    Server(MessageId),
}

impl EntryId {
    pub fn server_id(&self) -> Option<MessageId> {
        match self {
            Self::Local(_) => None,
            Self::Server(id) => Some(*id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Pending,
    Confirmed,
    Failed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEntry {
    pub id: EntryId,
    pub sender_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sender: Option<UserSummary>,
    pub delivery: DeliveryState,
}

impl MessageEntry {
    /// Locally synthesized entry for an optimistic send.
    pub fn pending(local_id: Uuid, sender: &UserSummary, text: impl Into<String>) -> Self {
        Self {
            id: EntryId::Local(local_id),
            sender_id: sender.id,
            text: text.into(),
            created_at: Utc::now(),
            sender: Some(sender.clone()),
            delivery: DeliveryState::Pending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self.delivery, DeliveryState::Pending)
    }
}

impl From<DirectMessagePayload> for MessageEntry {
    fn from(message: DirectMessagePayload) -> Self {
        Self {
            id: EntryId::Server(message.id),
            sender_id: message.sender_id,
            text: message.text,
            created_at: message.created_at,
            sender: Some(message.sender),
            delivery: DeliveryState::Confirmed,
        }
    }
}

impl From<GroupMessagePayload> for MessageEntry {
    fn from(message: GroupMessagePayload) -> Self {
        Self {
            id: EntryId::Server(message.id),
            sender_id: message.author_id,
            text: message.text,
            created_at: message.created_at,
            sender: Some(message.author),
            delivery: DeliveryState::Confirmed,
        }
    }
}

/// Cached server collections that inbound events can mark stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKey {
    ConversationSummaries,
    Notifications,
    NotificationCount,
    DirectThread(UserId),
    GroupThread(BoardId),
}

impl From<ConversationKey> for QueryKey {
    fn from(key: ConversationKey) -> Self {
        match key {
            ConversationKey::Direct(peer) => Self::DirectThread(peer),
            ConversationKey::Group(board_id) => Self::GroupThread(board_id),
        }
    }
}
