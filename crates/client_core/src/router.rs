//! Turns inbound realtime events into cache updates and alerts.
//!
//! One router task drains the connection's inbound queue, so events are
//! handled strictly in arrival order and each runs to completion before the
//! next starts.

use std::sync::Arc;

use shared::{
    domain::{ConversationKey, UserId},
    protocol::{DirectMessagePayload, GroupMessagePayload, NotificationPayload, ServerEvent},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

use crate::{
    alerts::{preview, AlertSink, DesktopNotice, GateDecision, NotificationPermission, PopupKind},
    chat_window::ChatWindow,
    state::ChatState,
    types::{MessageEntry, QueryKey},
    ClientEvent,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertDecision {
    /// Our own action echoed back.
    Suppressed,
    /// The user is looking at the conversation.
    SoundOnly,
    Full,
}

pub fn decide_alert(
    sender: Option<UserId>,
    current_user: UserId,
    conversation: Option<ConversationKey>,
    window: &ChatWindow,
) -> AlertDecision {
    if sender == Some(current_user) {
        AlertDecision::Suppressed
    } else if conversation.is_some_and(|key| window.is_visible(key)) {
        AlertDecision::SoundOnly
    } else {
        AlertDecision::Full
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteOutcome {
    pub conversation: Option<ConversationKey>,
    pub cached: bool,
    pub alert: Option<AlertDecision>,
    pub desktop_shown: bool,
    pub popup_id: Option<u64>,
}

impl RouteOutcome {
    fn ignored() -> Self {
        Self {
            conversation: None,
            cached: false,
            alert: None,
            desktop_shown: false,
            popup_id: None,
        }
    }
}

/// Cache-side result of routing, computed under the state lock.
struct Routed {
    generation: u64,
    outcome: RouteOutcome,
    notice: Option<DesktopNotice>,
}

pub struct InboundEventRouter {
    state: Arc<Mutex<ChatState>>,
    alerts: Arc<dyn AlertSink>,
    events: broadcast::Sender<ClientEvent>,
}

impl InboundEventRouter {
    pub fn new(
        state: Arc<Mutex<ChatState>>,
        alerts: Arc<dyn AlertSink>,
        events: broadcast::Sender<ClientEvent>,
    ) -> Self {
        Self {
            state,
            alerts,
            events,
        }
    }

    pub async fn route(&self, event: ServerEvent) -> RouteOutcome {
        let routed = {
            let mut state = self.state.lock().await;
            let Some(current_user) = state.session.as_ref().map(|session| session.user.id) else {
                debug!("router: no session, dropping inbound event");
                return RouteOutcome::ignored();
            };
            match event {
                ServerEvent::DirectMessageReceived(message) => {
                    self.apply_direct(&mut state, current_user, message)
                }
                ServerEvent::GroupMessageReceived(message) => {
                    self.apply_group(&mut state, current_user, message)
                }
                ServerEvent::NotificationCreated(notification) => {
                    self.apply_notification(&mut state, notification)
                }
                ServerEvent::Error(api_error) => {
                    warn!(code = ?api_error.code, message = %api_error.message, "router: server pushed an error");
                    self.emit(ClientEvent::Error(api_error.to_string()));
                    return RouteOutcome::ignored();
                }
            }
        };

        self.alert(routed).await
    }

    fn apply_direct(
        &self,
        state: &mut ChatState,
        current_user: UserId,
        message: DirectMessagePayload,
    ) -> Routed {
        let peer = message.peer_of(current_user);
        let key = ConversationKey::Direct(peer);
        let sender_id = message.sender_id;
        let sender_name = message.sender.name.clone();
        let text = message.text.clone();

        let entry = MessageEntry::from(message);
        let cached = match state.conversations.direct_mut(peer) {
            Some(thread) if sender_id == current_user => thread.receive_own_echo(entry),
            Some(thread) => thread.prepend(entry),
            None => false,
        };
        if cached {
            self.emit(ClientEvent::ThreadUpdated(key));
        }
        self.invalidate(state, QueryKey::ConversationSummaries);

        let decision = decide_alert(Some(sender_id), current_user, Some(key), &state.window);
        let mut outcome = RouteOutcome {
            conversation: Some(key),
            cached,
            alert: Some(decision),
            desktop_shown: false,
            popup_id: None,
        };
        let mut notice = None;
        match decision {
            AlertDecision::Suppressed => {}
            AlertDecision::SoundOnly => self.emit(ClientEvent::ScrollToNewest(key)),
            AlertDecision::Full => {
                let count = state.unread.increment(peer);
                self.emit(ClientEvent::UnreadChanged { peer, count });
                let popup = state.popups.push(PopupKind::DirectMessage {
                    peer,
                    sender_name: sender_name.clone(),
                    preview: preview(&text),
                });
                outcome.popup_id = Some(popup.id);
                self.emit(ClientEvent::PopupShown(popup));
                notice = Some(DesktopNotice {
                    title: sender_name,
                    body: preview(&text),
                });
            }
        }
        debug!(peer = peer.0, cached, ?decision, "router: direct message routed");

        Routed {
            generation: state.generation,
            outcome,
            notice,
        }
    }

    fn apply_group(
        &self,
        state: &mut ChatState,
        current_user: UserId,
        message: GroupMessagePayload,
    ) -> Routed {
        let board_id = message.board_id;
        let key = ConversationKey::Group(board_id);
        let author_id = message.author_id;
        let author_name = message.author.name.clone();
        let text = message.text.clone();

        let cached = state
            .conversations
            .group_mut(board_id)
            .is_some_and(|thread| thread.append(MessageEntry::from(message)));
        if cached {
            self.emit(ClientEvent::ThreadUpdated(key));
        }

        let decision = decide_alert(Some(author_id), current_user, Some(key), &state.window);
        let mut outcome = RouteOutcome {
            conversation: Some(key),
            cached,
            alert: Some(decision),
            desktop_shown: false,
            popup_id: None,
        };
        let mut notice = None;
        match decision {
            AlertDecision::Suppressed => {}
            AlertDecision::SoundOnly => self.emit(ClientEvent::ScrollToNewest(key)),
            AlertDecision::Full => {
                let popup = state.popups.push(PopupKind::GroupMessage {
                    board_id,
                    author_name: author_name.clone(),
                    preview: preview(&text),
                });
                outcome.popup_id = Some(popup.id);
                self.emit(ClientEvent::PopupShown(popup));
                notice = Some(DesktopNotice {
                    title: author_name,
                    body: preview(&text),
                });
            }
        }
        debug!(board_id = board_id.0, cached, ?decision, "router: group message routed");

        Routed {
            generation: state.generation,
            outcome,
            notice,
        }
    }

    fn apply_notification(&self, state: &mut ChatState, notification: NotificationPayload) -> Routed {
        state.notifications.invalidate();
        self.invalidate(state, QueryKey::Notifications);
        self.invalidate(state, QueryKey::NotificationCount);

        let popup = state.popups.push(PopupKind::Notification {
            notification_id: notification.id,
            message: notification.message.clone(),
        });
        let popup_id = popup.id;
        self.emit(ClientEvent::PopupShown(popup));
        info!(notification_id = notification.id.0, "router: notification received");

        Routed {
            generation: state.generation,
            outcome: RouteOutcome {
                conversation: None,
                cached: false,
                alert: Some(AlertDecision::Full),
                desktop_shown: false,
                popup_id: Some(popup_id),
            },
            notice: Some(DesktopNotice {
                title: "New notification".into(),
                body: preview(&notification.message),
            }),
        }
    }

    async fn alert(&self, routed: Routed) -> RouteOutcome {
        let Routed {
            generation,
            mut outcome,
            notice,
        } = routed;
        match outcome.alert {
            None | Some(AlertDecision::Suppressed) => {}
            Some(AlertDecision::SoundOnly) => self.alerts.play_sound(),
            Some(AlertDecision::Full) => {
                self.alerts.play_sound();
                if let Some(notice) = notice {
                    outcome.desktop_shown = self.show_desktop_notice(generation, &notice).await;
                }
            }
        }
        outcome
    }

    async fn show_desktop_notice(&self, generation: u64, notice: &DesktopNotice) -> bool {
        let decision = {
            let mut state = self.state.lock().await;
            state.permission_gate.evaluate(self.alerts.permission())
        };
        match decision {
            GateDecision::Show => {}
            GateDecision::Skip => return false,
            GateDecision::Prompt => {
                let granted = self.alerts.request_permission().await;
                if granted != NotificationPermission::Granted {
                    debug!(?granted, "router: desktop notifications not granted");
                    return false;
                }
                // The prompt is a suspension point; the session may be gone.
                if !self.state.lock().await.is_current(generation) {
                    return false;
                }
            }
        }
        self.alerts.show_desktop_notification(notice);
        true
    }

    fn invalidate(&self, state: &mut ChatState, key: QueryKey) {
        state.stale.insert(key);
        self.emit(ClientEvent::Invalidated(key));
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
#[path = "tests/router_tests.rs"]
mod tests;
