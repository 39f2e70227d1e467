use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use shared::{
    domain::{BoardId, ConversationKey, NotificationId, UserId, UserSummary},
    protocol::{ClientRequest, ConversationSummary, NotificationPayload, NotificationQuery},
};
use tokio::{
    sync::{broadcast, mpsc, Mutex},
    task::JoinHandle,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

pub mod alerts;
pub mod api;
pub mod chat_window;
pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod notifications;
pub mod router;
pub mod session;
pub mod state;
pub mod transport;
pub mod types;
pub mod unread;

use alerts::{AlertSink, Popup, SilentAlerts};
use api::{is_auth_failure, ChatApi};
use chat_window::ChatWindowState;
use connection::{ConnectionChange, ConnectionManager, IdentityStatus};
use conversation::{DirectThread, GroupThread, ScrollAnchor, Viewport, DEFAULT_PAGE_SIZE};
use error::{ClientError, SendFailure};
use router::InboundEventRouter;
use session::{MemoryTokenStore, Session, TokenStore};
use state::ChatState;
use transport::{CloseReason, TransportConnector, TransportError, TransportEvent};
use types::{MessageEntry, QueryKey};
use unread::Presence;

const EVENT_BUFFER: usize = 1024;

#[derive(Debug, Clone)]
pub enum ClientEvent {
    SessionStarted(UserSummary),
    SessionEnded,
    ConnectionOpened { user_id: UserId },
    ConnectionRestored,
    ConnectionClosed(CloseReason),
    ThreadUpdated(ConversationKey),
    Invalidated(QueryKey),
    UnreadChanged { peer: UserId, count: u32 },
    PopupShown(Popup),
    PopupDismissed(u64),
    ScrollToNewest(ConversationKey),
    ChatWindowChanged(ChatWindowState),
    DraftRestored { peer: UserId, text: String },
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOlderOutcome {
    /// Not at the top, nothing older, or a fetch is already in flight.
    Skipped,
    Loaded {
        inserted: usize,
        anchor: ScrollAnchor,
    },
}

#[async_trait]
pub trait ClientHandle: Send + Sync {
    async fn login(&self, email: &str, password: &str) -> Result<UserSummary>;
    async fn restore_session(&self) -> Result<Option<UserSummary>>;
    async fn logout(&self) -> Result<()>;
    async fn open_chat(&self, conversation: ConversationKey) -> Result<()>;
    async fn toggle_minimize(&self);
    async fn close_chat(&self);
    async fn set_window_focused(&self, focused: bool);
    async fn load_older(&self, peer: UserId, viewport: Viewport) -> Result<LoadOlderOutcome>;
    async fn send_direct_message(
        &self,
        peer: UserId,
        text: &str,
    ) -> std::result::Result<MessageEntry, SendFailure>;
    async fn send_group_message(&self, board_id: BoardId, text: &str) -> Result<()>;
    async fn refresh_friends(&self) -> Result<Vec<UserSummary>>;
    async fn conversations(&self) -> Result<Vec<ConversationSummary>>;
    async fn notifications(&self) -> Result<Vec<NotificationPayload>>;
    async fn mark_notification_read(&self, id: NotificationId) -> Result<()>;
    async fn mark_all_notifications_read(&self) -> Result<()>;
    async fn dismiss_popup(&self, id: u64) -> bool;
    async fn reply_from_popup(&self, id: u64) -> Result<()>;
    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent>;
}

/// Realtime messaging and notification layer for one signed-in user.
pub struct RealtimeClient {
    api: Arc<dyn ChatApi>,
    tokens: Arc<dyn TokenStore>,
    connection: Mutex<ConnectionManager>,
    state: Arc<Mutex<ChatState>>,
    router: Arc<InboundEventRouter>,
    router_task: Mutex<Option<JoinHandle<()>>>,
    events: broadcast::Sender<ClientEvent>,
    page_size: u32,
}

impl RealtimeClient {
    pub fn new(api: Arc<dyn ChatApi>, connector: Arc<dyn TransportConnector>) -> Arc<Self> {
        Self::new_with_dependencies(
            api,
            connector,
            Arc::new(SilentAlerts),
            Arc::new(MemoryTokenStore::default()),
            DEFAULT_PAGE_SIZE,
        )
    }

    pub fn new_with_dependencies(
        api: Arc<dyn ChatApi>,
        connector: Arc<dyn TransportConnector>,
        alerts: Arc<dyn AlertSink>,
        tokens: Arc<dyn TokenStore>,
        page_size: u32,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let state = Arc::new(Mutex::new(ChatState::default()));
        let router = Arc::new(InboundEventRouter::new(
            Arc::clone(&state),
            alerts,
            events.clone(),
        ));
        Arc::new(Self {
            api,
            tokens,
            connection: Mutex::new(ConnectionManager::new(connector)),
            state,
            router,
            router_task: Mutex::new(None),
            events,
            page_size: page_size.clamp(1, 100),
        })
    }

    pub async fn current_user(&self) -> Option<UserSummary> {
        self.state
            .lock()
            .await
            .session
            .as_ref()
            .map(|session| session.user.clone())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    pub async fn messages(&self, conversation: ConversationKey) -> Vec<MessageEntry> {
        self.state.lock().await.conversations.messages(conversation)
    }

    pub async fn has_older(&self, peer: UserId) -> bool {
        self.state
            .lock()
            .await
            .conversations
            .direct(peer)
            .is_some_and(DirectThread::has_more)
    }

    pub async fn unread_badge(&self, peer: UserId) -> Option<u32> {
        self.state.lock().await.unread.badge(peer)
    }

    pub async fn unread_total(&self) -> u32 {
        self.state.lock().await.unread.total()
    }

    pub async fn presence(&self, peer: UserId) -> Presence {
        self.state.lock().await.roster.presence(peer)
    }

    /// Unread and total counts of the cached notification feed.
    pub async fn notification_counts(&self) -> (usize, u64) {
        let state = self.state.lock().await;
        (state.notifications.unread_count(), state.notifications.total())
    }

    pub async fn chat_window(&self) -> ChatWindowState {
        self.state.lock().await.window.state()
    }

    pub async fn popups(&self) -> Vec<Popup> {
        self.state.lock().await.popups.visible().to_vec()
    }

    async fn session(&self) -> Result<Session> {
        self.state
            .lock()
            .await
            .session
            .clone()
            .ok_or_else(|| anyhow!(ClientError::NotLoggedIn))
    }

    fn emit(&self, event: ClientEvent) {
        let _ = self.events.send(event);
    }

    async fn establish(self: &Arc<Self>, token: String, user: UserSummary) -> Result<()> {
        // The previous session's router must not drain its queue into the
        // state we are about to install.
        let replacing = {
            let state = self.state.lock().await;
            state
                .session
                .as_ref()
                .is_some_and(|session| session.auth_token != token || session.user.id != user.id)
        };
        if replacing {
            self.stop_router().await;
            let change = self.connection.lock().await.shutdown().await;
            self.apply_connection_change(change).await;
        }
        {
            let mut state = self.state.lock().await;
            let generation = state.reset();
            state.session = Some(Session {
                user: user.clone(),
                auth_token: token.clone(),
                generation,
            });
        }
        info!(user_id = user.id.0, "session: started");
        self.emit(ClientEvent::SessionStarted(user.clone()));

        let mut connection = self.connection.lock().await;
        let change = connection.set_token(Some(token)).await;
        self.apply_connection_change(change).await;
        let change = connection
            .set_identity(IdentityStatus::Confirmed(user))
            .await;
        self.apply_connection_change(change).await;
        Ok(())
    }

    async fn apply_connection_change(self: &Arc<Self>, change: ConnectionChange) {
        match change {
            ConnectionChange::Unchanged => {}
            ConnectionChange::Opened {
                connection_id,
                user_id,
                inbound,
            } => {
                self.spawn_router(connection_id, inbound).await;
                self.emit(ClientEvent::ConnectionOpened { user_id });
            }
            ConnectionChange::Closed => {
                self.emit(ClientEvent::ConnectionClosed(CloseReason::Requested));
            }
            ConnectionChange::Failed(err) => {
                let reason = match err {
                    TransportError::Unauthorized => CloseReason::Unauthorized,
                    other => CloseReason::TransportFailed(other.to_string()),
                };
                self.emit(ClientEvent::ConnectionClosed(reason));
            }
        }
    }

    async fn spawn_router(
        self: &Arc<Self>,
        connection_id: u64,
        mut inbound: mpsc::Receiver<TransportEvent>,
    ) {
        let client = Arc::clone(self);
        let task = tokio::spawn(async move {
            while let Some(event) = inbound.recv().await {
                match event {
                    TransportEvent::Event(event) => {
                        client.router.route(event).await;
                    }
                    TransportEvent::Reconnected => {
                        client.mark_cache_stale().await;
                        client.emit(ClientEvent::ConnectionRestored);
                        client.reload_open_conversation().await;
                    }
                    TransportEvent::Closed(reason) => {
                        warn!(connection_id, ?reason, "router: realtime channel closed");
                        client.connection.lock().await.mark_closed(connection_id);
                        client.emit(ClientEvent::ConnectionClosed(reason));
                        break;
                    }
                }
            }
        });
        if let Some(previous) = self.router_task.lock().await.replace(task) {
            previous.abort();
        }
    }

    async fn stop_router(&self) {
        let task = self.router_task.lock().await.take();
        if let Some(task) = task {
            task.abort();
            let _ = task.await;
        }
    }

    /// Events pushed while the socket was down never reach the router, so
    /// every cached thread and the summaries are refetched on next use.
    async fn mark_cache_stale(&self) {
        let keys: Vec<QueryKey> = {
            let mut state = self.state.lock().await;
            let keys: Vec<QueryKey> = state
                .conversations
                .keys()
                .map(QueryKey::from)
                .chain([QueryKey::ConversationSummaries])
                .collect();
            state.stale.extend(keys.iter().copied());
            keys
        };
        info!(stale = keys.len(), "chat: caches marked stale after reconnect");
        for key in keys {
            self.emit(ClientEvent::Invalidated(key));
        }
    }

    async fn reload_open_conversation(&self) {
        let (session, active) = {
            let state = self.state.lock().await;
            (state.session.clone(), state.window.active())
        };
        let (Some(session), Some(conversation)) = (session, active) else {
            return;
        };
        let reloaded = match conversation {
            ConversationKey::Direct(peer) => self.ensure_direct_thread(&session, peer).await,
            ConversationKey::Group(board_id) => self.ensure_group_thread(&session, board_id).await,
        };
        if let Err(err) = reloaded {
            self.report(&err);
        }
    }

    /// Makes sure page 1 of the thread is cached and fresh. A loading
    /// placeholder is cached for the duration of the fetch so messages routed
    /// meanwhile have somewhere to land.
    async fn ensure_direct_thread(&self, session: &Session, peer: UserId) -> Result<()> {
        let key = QueryKey::DirectThread(peer);
        {
            let mut state = self.state.lock().await;
            let fetch = match state.conversations.direct(peer).map(DirectThread::is_loading) {
                None => {
                    state.conversations.insert_direct(peer, DirectThread::loading());
                    true
                }
                Some(true) => false,
                Some(false) => state.stale.remove(&key),
            };
            if !fetch {
                return Ok(());
            }
        }
        let fetched = self
            .api
            .list_direct_messages(&session.auth_token, peer, 1, self.page_size)
            .await;

        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(anyhow!(ClientError::SessionEnded));
        }
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                if let Some(thread) = state.conversations.direct_mut(peer) {
                    thread.abort_loading();
                }
                state.stale.insert(key);
                return Err(err.context(format!("failed to load messages with user {}", peer.0)));
            }
        };
        let merged = state
            .conversations
            .direct_mut(peer)
            .map(|thread| thread.merge_first_page(page));
        drop(state);
        debug!(peer = peer.0, ?merged, "chat: direct thread page 1 stored");
        self.emit(ClientEvent::ThreadUpdated(ConversationKey::Direct(peer)));
        Ok(())
    }

    async fn ensure_group_thread(&self, session: &Session, board_id: BoardId) -> Result<()> {
        let key = QueryKey::GroupThread(board_id);
        {
            let mut state = self.state.lock().await;
            let fetch = match state.conversations.group(board_id).map(GroupThread::is_loading) {
                None => {
                    state.conversations.insert_group(board_id, GroupThread::loading());
                    true
                }
                Some(true) => false,
                Some(false) => state.stale.remove(&key),
            };
            if !fetch {
                return Ok(());
            }
        }
        let fetched = self
            .api
            .list_group_messages(&session.auth_token, board_id)
            .await;

        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(anyhow!(ClientError::SessionEnded));
        }
        let history = match fetched {
            Ok(history) => history,
            Err(err) => {
                if let Some(thread) = state.conversations.group_mut(board_id) {
                    thread.abort_loading();
                }
                state.stale.insert(key);
                return Err(
                    err.context(format!("failed to load group chat for board {}", board_id.0))
                );
            }
        };
        let merged = state
            .conversations
            .group_mut(board_id)
            .map(|thread| thread.merge_history(history));
        drop(state);
        debug!(board_id = board_id.0, ?merged, "chat: group thread stored");
        self.emit(ClientEvent::ThreadUpdated(ConversationKey::Group(board_id)));
        Ok(())
    }

    async fn join_group_channel(&self, board_id: BoardId) {
        let sent = self
            .connection
            .lock()
            .await
            .send(ClientRequest::JoinGroupChannel { board_id });
        if let Err(err) = sent {
            warn!(board_id = board_id.0, %err, "chat: group channel join skipped");
        }
    }

    /// Reports a failed operation to the UI as a transient message.
    fn report(&self, err: &anyhow::Error) {
        warn!(error = %format!("{err:#}"), "chat: operation failed");
        self.emit(ClientEvent::Error(format!("{err:#}")));
    }
}

#[async_trait]
impl ClientHandle for Arc<RealtimeClient> {
    async fn login(&self, email: &str, password: &str) -> Result<UserSummary> {
        let response = self.api.login(email, password).await?;
        self.tokens
            .save(&response.token)
            .context("failed to persist auth token")?;
        self.establish(response.token, response.user.clone()).await?;
        Ok(response.user)
    }

    async fn restore_session(&self) -> Result<Option<UserSummary>> {
        let Some(token) = self.tokens.load()? else {
            return Ok(None);
        };

        {
            let mut connection = self.connection.lock().await;
            let change = connection.set_token(Some(token.clone())).await;
            self.apply_connection_change(change).await;
        }

        match self.api.current_user(&token).await {
            Ok(user) => {
                self.establish(token, user.clone()).await?;
                Ok(Some(user))
            }
            Err(err) => {
                self.stop_router().await;
                let change = {
                    let mut connection = self.connection.lock().await;
                    connection.set_identity(IdentityStatus::Failed).await
                };
                self.apply_connection_change(change).await;
                if is_auth_failure(&err) {
                    info!("session: stored token rejected, treating as logged out");
                    self.tokens.clear()?;
                    let change = self.connection.lock().await.shutdown().await;
                    self.apply_connection_change(change).await;
                    return Ok(None);
                }
                Err(err.context("identity check failed"))
            }
        }
    }

    async fn logout(&self) -> Result<()> {
        self.stop_router().await;
        let change = self.connection.lock().await.shutdown().await;
        self.apply_connection_change(change).await;
        self.state.lock().await.reset();
        self.tokens.clear()?;
        info!("session: ended");
        self.emit(ClientEvent::SessionEnded);
        Ok(())
    }

    async fn open_chat(&self, conversation: ConversationKey) -> Result<()> {
        let session = self.session().await?;
        let window = {
            let mut state = self.state.lock().await;
            state.window.open(conversation);
            if let ConversationKey::Direct(peer) = conversation {
                if state.unread.reset(peer) {
                    self.emit(ClientEvent::UnreadChanged { peer, count: 0 });
                }
            }
            state.window.state()
        };
        debug!(?conversation, "chat: window opened");
        self.emit(ClientEvent::ChatWindowChanged(window));

        let loaded = match conversation {
            ConversationKey::Direct(peer) => self.ensure_direct_thread(&session, peer).await,
            ConversationKey::Group(board_id) => {
                self.join_group_channel(board_id).await;
                self.ensure_group_thread(&session, board_id).await
            }
        };
        if let Err(err) = &loaded {
            self.report(err);
        }
        loaded
    }

    async fn toggle_minimize(&self) {
        let window = {
            let mut state = self.state.lock().await;
            state.window.toggle_minimize();
            state.window.state()
        };
        self.emit(ClientEvent::ChatWindowChanged(window));
    }

    async fn close_chat(&self) {
        self.state.lock().await.window.close();
        self.emit(ClientEvent::ChatWindowChanged(ChatWindowState::Closed));
    }

    async fn set_window_focused(&self, focused: bool) {
        self.state.lock().await.window.set_focused(focused);
    }

    async fn load_older(&self, peer: UserId, viewport: Viewport) -> Result<LoadOlderOutcome> {
        if !viewport.at_top() {
            return Ok(LoadOlderOutcome::Skipped);
        }
        let session = self.session().await?;
        let page = {
            let mut state = self.state.lock().await;
            match state
                .conversations
                .direct_mut(peer)
                .and_then(DirectThread::begin_load_older)
            {
                Some(page) => page,
                None => return Ok(LoadOlderOutcome::Skipped),
            }
        };
        let anchor = viewport.anchor();
        debug!(peer = peer.0, page, "chat: loading older messages");

        let fetched = self
            .api
            .list_direct_messages(&session.auth_token, peer, page, self.page_size)
            .await;

        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(anyhow!(ClientError::SessionEnded));
        }
        let Some(thread) = state.conversations.direct_mut(peer) else {
            return Ok(LoadOlderOutcome::Skipped);
        };
        match fetched {
            Ok(result) => {
                let inserted = thread.finish_load_older(page, result);
                drop(state);
                self.emit(ClientEvent::ThreadUpdated(ConversationKey::Direct(peer)));
                Ok(LoadOlderOutcome::Loaded { inserted, anchor })
            }
            Err(err) => {
                thread.abort_load_older();
                drop(state);
                let err = err.context(format!("failed to load older messages with user {}", peer.0));
                self.report(&err);
                Err(err)
            }
        }
    }

    async fn send_direct_message(
        &self,
        peer: UserId,
        text: &str,
    ) -> std::result::Result<MessageEntry, SendFailure> {
        let fail = |source: anyhow::Error| SendFailure {
            peer,
            draft: text.to_string(),
            source,
        };
        if text.trim().is_empty() {
            return Err(fail(anyhow!("message is empty")));
        }
        let session = self.session().await.map_err(fail)?;
        self.ensure_direct_thread(&session, peer)
            .await
            .map_err(fail)?;

        let local_id = Uuid::new_v4();
        let pending = MessageEntry::pending(local_id, &session.user, text);
        {
            let mut state = self.state.lock().await;
            let Some(thread) = state.conversations.direct_mut(peer) else {
                return Err(fail(anyhow!(ClientError::SessionEnded)));
            };
            thread.insert_pending(pending);
        }
        let key = ConversationKey::Direct(peer);
        self.emit(ClientEvent::ThreadUpdated(key));

        let result = self
            .api
            .send_direct_message(&session.auth_token, peer, text)
            .await;

        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(fail(anyhow!(ClientError::SessionEnded)));
        }
        match result {
            Ok(payload) => {
                let confirmed = MessageEntry::from(payload);
                if let Some(thread) = state.conversations.direct_mut(peer) {
                    let outcome = thread.confirm(local_id, confirmed.clone());
                    debug!(peer = peer.0, ?outcome, "chat: send confirmed");
                }
                state.stale.insert(QueryKey::ConversationSummaries);
                drop(state);
                self.emit(ClientEvent::ThreadUpdated(key));
                self.emit(ClientEvent::Invalidated(QueryKey::ConversationSummaries));
                Ok(confirmed)
            }
            Err(err) => {
                if let Some(thread) = state.conversations.direct_mut(peer) {
                    thread.reject(local_id, err.to_string());
                }
                drop(state);
                self.emit(ClientEvent::ThreadUpdated(key));
                self.emit(ClientEvent::DraftRestored {
                    peer,
                    text: text.to_string(),
                });
                let err = err.context(format!("failed to send message to user {}", peer.0));
                self.report(&err);
                Err(fail(err))
            }
        }
    }

    async fn send_group_message(&self, board_id: BoardId, text: &str) -> Result<()> {
        self.session().await?;
        let sent = self
            .connection
            .lock()
            .await
            .send(ClientRequest::SendGroupMessage {
                board_id,
                text: text.to_string(),
            })
            .map_err(|_| anyhow!(ClientError::NotConnected))
            .with_context(|| format!("failed to send group message to board {}", board_id.0));
        if let Err(err) = &sent {
            self.report(err);
        }
        sent
    }

    async fn refresh_friends(&self) -> Result<Vec<UserSummary>> {
        let session = self.session().await?;
        let friends = self.api.list_friends(&session.auth_token).await?;
        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(anyhow!(ClientError::SessionEnded));
        }
        state.roster.replace_friends(friends.clone());
        Ok(friends)
    }

    async fn conversations(&self) -> Result<Vec<ConversationSummary>> {
        let session = self.session().await?;
        {
            let state = self.state.lock().await;
            if let Some(summaries) = &state.summaries {
                if !state.stale.contains(&QueryKey::ConversationSummaries) {
                    return Ok(summaries.clone());
                }
            }
        }

        let summaries = self.api.list_conversations(&session.auth_token).await?;
        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(anyhow!(ClientError::SessionEnded));
        }
        state.roster.replace_conversations(&summaries);
        state.summaries = Some(summaries.clone());
        state.stale.remove(&QueryKey::ConversationSummaries);
        Ok(summaries)
    }

    async fn notifications(&self) -> Result<Vec<NotificationPayload>> {
        let session = self.session().await?;
        {
            let state = self.state.lock().await;
            if !state.notifications.needs_refresh() {
                return Ok(state.notifications.items().to_vec());
            }
        }

        let page = self
            .api
            .list_notifications(
                &session.auth_token,
                NotificationQuery {
                    page: 1,
                    limit: self.page_size,
                    unread_only: false,
                },
            )
            .await?;
        let mut state = self.state.lock().await;
        if !state.is_current(session.generation) {
            return Err(anyhow!(ClientError::SessionEnded));
        }
        state.notifications.replace(page);
        state.stale.remove(&QueryKey::Notifications);
        state.stale.remove(&QueryKey::NotificationCount);
        Ok(state.notifications.items().to_vec())
    }

    async fn mark_notification_read(&self, id: NotificationId) -> Result<()> {
        let session = self.session().await?;
        let rollback = self.state.lock().await.notifications.mark_read(id);
        self.emit(ClientEvent::Invalidated(QueryKey::NotificationCount));

        if let Err(err) = self
            .api
            .mark_notification_read(&session.auth_token, id)
            .await
        {
            let mut state = self.state.lock().await;
            if state.is_current(session.generation) {
                state.notifications.rollback(rollback);
            }
            drop(state);
            self.emit(ClientEvent::Invalidated(QueryKey::NotificationCount));
            let err = err.context(format!("failed to mark notification {} read", id.0));
            self.report(&err);
            return Err(err);
        }
        Ok(())
    }

    async fn mark_all_notifications_read(&self) -> Result<()> {
        let session = self.session().await?;
        let rollback = self.state.lock().await.notifications.mark_all_read();
        self.emit(ClientEvent::Invalidated(QueryKey::NotificationCount));

        if let Err(err) = self
            .api
            .mark_all_notifications_read(&session.auth_token)
            .await
        {
            let mut state = self.state.lock().await;
            if state.is_current(session.generation) {
                state.notifications.rollback(rollback);
            }
            drop(state);
            self.emit(ClientEvent::Invalidated(QueryKey::NotificationCount));
            let err = err.context("failed to mark all notifications read");
            self.report(&err);
            return Err(err);
        }
        Ok(())
    }

    async fn dismiss_popup(&self, id: u64) -> bool {
        let dismissed = self.state.lock().await.popups.dismiss(id).is_some();
        if dismissed {
            self.emit(ClientEvent::PopupDismissed(id));
        }
        dismissed
    }

    async fn reply_from_popup(&self, id: u64) -> Result<()> {
        let target = {
            let mut state = self.state.lock().await;
            let popup = state
                .popups
                .dismiss(id)
                .ok_or_else(|| anyhow!("no pop-up with id {id}"))?;
            popup.reply_target()
        };
        self.emit(ClientEvent::PopupDismissed(id));
        match target {
            Some(conversation) => self.open_chat(conversation).await,
            None => Ok(()),
        }
    }

    fn subscribe_events(&self) -> broadcast::Receiver<ClientEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
