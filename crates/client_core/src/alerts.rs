use async_trait::async_trait;
use shared::domain::{BoardId, ConversationKey, NotificationId, UserId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationPermission {
    Granted,
    Denied,
    Undetermined,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DesktopNotice {
    pub title: String,
    pub body: String,
}

/// Host-provided side effects for incoming activity.
#[async_trait]
pub trait AlertSink: Send + Sync {
    fn play_sound(&self);
    fn permission(&self) -> NotificationPermission;
    /// Asks the user for desktop-notification permission.
    async fn request_permission(&self) -> NotificationPermission;
    fn show_desktop_notification(&self, notice: &DesktopNotice);
}

pub struct SilentAlerts;

#[async_trait]
impl AlertSink for SilentAlerts {
    fn play_sound(&self) {}

    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    async fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Denied
    }

    fn show_desktop_notification(&self, _notice: &DesktopNotice) {}
}

/// Remembers whether we already prompted, so an undetermined permission is
/// requested at most once per session and a denial is never re-prompted.
#[derive(Debug, Default)]
pub struct PermissionGate {
    prompted: bool,
}

impl PermissionGate {
    /// Returns the permission to act on now, and whether the caller should
    /// prompt first.
    pub fn evaluate(&mut self, current: NotificationPermission) -> GateDecision {
        match current {
            NotificationPermission::Granted => GateDecision::Show,
            NotificationPermission::Denied => GateDecision::Skip,
            NotificationPermission::Undetermined if self.prompted => GateDecision::Skip,
            NotificationPermission::Undetermined => {
                self.prompted = true;
                GateDecision::Prompt
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Show,
    Skip,
    Prompt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopupKind {
    DirectMessage {
        peer: UserId,
        sender_name: String,
        preview: String,
    },
    GroupMessage {
        board_id: BoardId,
        author_name: String,
        preview: String,
    },
    Notification {
        notification_id: NotificationId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popup {
    pub id: u64,
    pub kind: PopupKind,
}

impl Popup {
    /// Conversation the "reply" shortcut opens, if the pop-up offers one.
    pub fn reply_target(&self) -> Option<ConversationKey> {
        match &self.kind {
            PopupKind::DirectMessage { peer, .. } => Some(ConversationKey::Direct(*peer)),
            PopupKind::GroupMessage { board_id, .. } => Some(ConversationKey::Group(*board_id)),
            PopupKind::Notification { .. } => None,
        }
    }
}

/// In-app pop-ups. Nothing expires; entries leave only through `dismiss`.
#[derive(Debug, Default)]
pub struct PopupQueue {
    next_id: u64,
    popups: Vec<Popup>,
}

impl PopupQueue {
    pub fn push(&mut self, kind: PopupKind) -> Popup {
        self.next_id += 1;
        let popup = Popup {
            id: self.next_id,
            kind,
        };
        self.popups.push(popup.clone());
        debug!(popup_id = popup.id, "alerts: popup shown");
        popup
    }

    pub fn dismiss(&mut self, id: u64) -> Option<Popup> {
        let index = self.popups.iter().position(|popup| popup.id == id)?;
        Some(self.popups.remove(index))
    }

    pub fn visible(&self) -> &[Popup] {
        &self.popups
    }
}

pub(crate) fn preview(text: &str) -> String {
    const MAX_CHARS: usize = 80;
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}…")
    } else {
        head
    }
}
