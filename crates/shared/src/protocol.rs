use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{
    domain::{BoardId, MessageId, NotificationId, TaskId, UserId, UserSummary},
    error::ApiError,
};

/// Outbound realtime frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ClientRequest {
    JoinGroupChannel { board_id: BoardId },
    SendGroupMessage { board_id: BoardId, text: String },
    /// Socket form of a direct send. The client sends direct messages through
    /// `POST /messages` so the optimistic entry can be confirmed from the reply.
    SendDirectMessage { receiver_id: UserId, text: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectMessagePayload {
    pub id: MessageId,
    pub sender_id: UserId,
    pub receiver_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub sender: UserSummary,
}

impl DirectMessagePayload {
    /// The other participant of the thread as seen from `current_user`.
    pub fn peer_of(&self, current_user: UserId) -> UserId {
        if self.sender_id == current_user {
            self.receiver_id
        } else {
            self.sender_id
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMessagePayload {
    pub id: MessageId,
    pub board_id: BoardId,
    pub author_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub author: UserSummary,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationPayload {
    pub id: NotificationId,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<TaskId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub board_id: Option<BoardId>,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

/// Inbound realtime frames.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerEvent {
    DirectMessageReceived(DirectMessagePayload),
    GroupMessageReceived(GroupMessagePayload),
    NotificationCreated(NotificationPayload),
    Error(ApiError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResponse {
    pub token: String,
    pub user: UserSummary,
}

/// One page of a direct thread, newest message first.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DirectMessagePage {
    pub items: Vec<DirectMessagePayload>,
    pub has_more: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendDirectMessageRequest {
    pub receiver_id: UserId,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub peer: UserSummary,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_message: Option<DirectMessagePayload>,
    #[serde(default)]
    pub unread_count: u32,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NotificationPage {
    pub items: Vec<NotificationPayload>,
    pub total: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NotificationQuery {
    pub page: u32,
    pub limit: u32,
    #[serde(default)]
    pub unread_only: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_event_uses_tagged_snake_case_frames() {
        let raw = r#"{
            "type": "direct_message_received",
            "payload": {
                "id": 9,
                "sender_id": 2,
                "receiver_id": 1,
                "text": "hello",
                "created_at": "2024-05-01T10:00:00Z",
                "sender": {"id": 2, "name": "Ana"}
            }
        }"#;
        let event: ServerEvent = serde_json::from_str(raw).expect("decode");
        let ServerEvent::DirectMessageReceived(message) = event else {
            panic!("unexpected event variant");
        };
        assert_eq!(message.peer_of(UserId(1)), UserId(2));
        assert_eq!(message.peer_of(UserId(2)), UserId(1));
        assert_eq!(message.sender.avatar, None);
    }

    #[test]
    fn join_request_encodes_board_id_as_plain_number() {
        let encoded = serde_json::to_value(ClientRequest::JoinGroupChannel {
            board_id: BoardId(42),
        })
        .expect("encode");
        assert_eq!(
            encoded,
            serde_json::json!({"type": "join_group_channel", "payload": {"board_id": 42}})
        );
    }

    #[test]
    fn direct_send_frame_names_the_receiver() {
        let raw = r#"{"type":"send_direct_message","payload":{"receiver_id":7,"text":"hi"}}"#;
        let request: ClientRequest = serde_json::from_str(raw).expect("decode");
        assert_eq!(
            request,
            ClientRequest::SendDirectMessage {
                receiver_id: UserId(7),
                text: "hi".into(),
            }
        );
    }

    #[test]
    fn notification_optional_links_default_to_none() {
        let raw = r#"{"type":"notification_created","payload":{"id":3,"message":"Assigned","is_read":false,"created_at":"2024-05-01T10:00:00Z"}}"#;
        let event: ServerEvent = serde_json::from_str(raw).expect("decode");
        let ServerEvent::NotificationCreated(notification) = event else {
            panic!("unexpected event variant");
        };
        assert!(notification.task_id.is_none());
        assert!(notification.board_id.is_none());
    }
}
