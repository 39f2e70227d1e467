use std::time::Duration;

use async_trait::async_trait;
use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use shared::{
    domain::BoardId,
    protocol::{ClientRequest, ServerEvent},
};
use thiserror::Error;
use tokio::{
    net::TcpStream,
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        client::IntoClientRequest,
        handshake::client::Request,
        http::{header::AUTHORIZATION, HeaderValue, StatusCode},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};
use url::Url;

const INBOUND_QUEUE_CAPACITY: usize = 1024;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("server rejected the realtime credentials")]
    Unauthorized,
    #[error("invalid realtime url: {0}")]
    InvalidUrl(String),
    #[error("failed to connect realtime channel: {0}")]
    Connect(String),
    #[error("realtime channel is closed")]
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    Requested,
    Unauthorized,
    TransportFailed(String),
}

#[derive(Debug)]
pub enum TransportEvent {
    Event(ServerEvent),
    /// The underlying socket was replaced; the inbound queue continues.
    Reconnected,
    Closed(CloseReason),
}

/// Owner side of one live connection.
pub struct TransportHandle {
    outbound: mpsc::UnboundedSender<ClientRequest>,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    pub fn new(
        outbound: mpsc::UnboundedSender<ClientRequest>,
        shutdown: oneshot::Sender<()>,
        task: Option<JoinHandle<()>>,
    ) -> Self {
        Self {
            outbound,
            shutdown: Some(shutdown),
            task,
        }
    }

    pub fn send(&self, request: ClientRequest) -> Result<(), TransportError> {
        self.outbound
            .send(request)
            .map_err(|_| TransportError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.outbound.is_closed()
    }

    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

pub struct TransportSession {
    pub handle: TransportHandle,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

#[async_trait]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, token: &str) -> Result<TransportSession, TransportError>;
}

pub struct MissingTransport;

#[async_trait]
impl TransportConnector for MissingTransport {
    async fn connect(&self, _token: &str) -> Result<TransportSession, TransportError> {
        Err(TransportError::Connect(
            "realtime transport is unavailable".into(),
        ))
    }
}

/// Websocket transport. Dropped sockets are re-dialed with a fixed delay up to
/// `max_reconnect_attempts` times; board subscriptions are replayed on the new
/// socket.
pub struct WsConnector {
    ws_url: String,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
}

impl WsConnector {
    pub fn new(ws_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            reconnect_delay: Duration::from_secs(1),
            max_reconnect_attempts: 5,
        }
    }

    pub fn with_reconnect(mut self, delay: Duration, max_attempts: u32) -> Self {
        self.reconnect_delay = delay;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    fn endpoint(&self, token: &str) -> Result<Url, TransportError> {
        let mut url = Url::parse(&format!("{}/ws", self.ws_url.trim_end_matches('/')))
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        if !matches!(url.scheme(), "ws" | "wss") {
            return Err(TransportError::InvalidUrl(format!(
                "expected ws:// or wss://, got {}",
                url.scheme()
            )));
        }
        url.query_pairs_mut().append_pair("token", token);
        Ok(url)
    }
}

#[async_trait]
impl TransportConnector for WsConnector {
    async fn connect(&self, token: &str) -> Result<TransportSession, TransportError> {
        let dialer = Dialer {
            url: self.endpoint(token)?,
            token: token.to_string(),
            reconnect_delay: self.reconnect_delay,
            max_reconnect_attempts: self.max_reconnect_attempts,
        };
        let socket = dialer.dial().await?;
        info!(url = %self.ws_url, "transport: websocket connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_CAPACITY);
        let task = tokio::spawn(run_socket(
            dialer,
            socket,
            outbound_rx,
            shutdown_rx,
            inbound_tx,
        ));

        Ok(TransportSession {
            handle: TransportHandle::new(outbound_tx, shutdown_tx, Some(task)),
            inbound: inbound_rx,
        })
    }
}

pub fn ws_url_from_server_url(server_url: &str) -> Result<String, TransportError> {
    if let Some(rest) = server_url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if let Some(rest) = server_url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else {
        Err(TransportError::InvalidUrl(
            "server_url must start with http:// or https://".into(),
        ))
    }
}

struct Dialer {
    url: Url,
    token: String,
    reconnect_delay: Duration,
    max_reconnect_attempts: u32,
}

impl Dialer {
    fn request(&self) -> Result<Request, TransportError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", self.token))
            .map_err(|err| TransportError::InvalidUrl(err.to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);
        Ok(request)
    }

    async fn dial(&self) -> Result<WsStream, TransportError> {
        match connect_async(self.request()?).await {
            Ok((socket, _)) => Ok(socket),
            Err(tungstenite::Error::Http(response))
                if matches!(
                    response.status(),
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
                ) =>
            {
                Err(TransportError::Unauthorized)
            }
            Err(err) => Err(TransportError::Connect(err.to_string())),
        }
    }
}

enum PumpExit {
    Shutdown,
    Disconnected(String),
}

async fn run_socket(
    dialer: Dialer,
    socket: WsStream,
    mut outbound: mpsc::UnboundedReceiver<ClientRequest>,
    mut shutdown: oneshot::Receiver<()>,
    inbound: mpsc::Sender<TransportEvent>,
) {
    let mut joined_boards: Vec<BoardId> = Vec::new();
    let (mut sink, mut source) = socket.split();

    loop {
        let exit = pump(
            &mut sink,
            &mut source,
            &mut outbound,
            &mut shutdown,
            &inbound,
            &mut joined_boards,
        )
        .await;

        let reason = match exit {
            PumpExit::Shutdown => {
                let _ = sink.close().await;
                let _ = inbound
                    .send(TransportEvent::Closed(CloseReason::Requested))
                    .await;
                return;
            }
            PumpExit::Disconnected(reason) => reason,
        };

        warn!(%reason, "transport: websocket dropped, reconnecting");
        match redial(&dialer, &mut shutdown).await {
            Ok(socket) => {
                (sink, source) = socket.split();
                if let Err(err) = replay_joins(&mut sink, &joined_boards).await {
                    warn!(%err, "transport: failed to replay board subscriptions");
                }
                let _ = inbound.send(TransportEvent::Reconnected).await;
            }
            Err(close) => {
                let _ = inbound.send(TransportEvent::Closed(close)).await;
                return;
            }
        }
    }
}

async fn pump(
    sink: &mut WsSink,
    source: &mut WsSource,
    outbound: &mut mpsc::UnboundedReceiver<ClientRequest>,
    shutdown: &mut oneshot::Receiver<()>,
    inbound: &mpsc::Sender<TransportEvent>,
    joined_boards: &mut Vec<BoardId>,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => return PumpExit::Shutdown,
            request = outbound.recv() => {
                let Some(request) = request else {
                    return PumpExit::Shutdown;
                };
                if let ClientRequest::JoinGroupChannel { board_id } = &request {
                    if !joined_boards.contains(board_id) {
                        joined_boards.push(*board_id);
                    }
                }
                let frame = match serde_json::to_string(&request) {
                    Ok(frame) => frame,
                    Err(err) => {
                        warn!(%err, "transport: failed to encode outbound request");
                        continue;
                    }
                };
                if let Err(err) = sink.send(Message::Text(frame)).await {
                    return PumpExit::Disconnected(err.to_string());
                }
            }
            frame = source.next() => match frame {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<ServerEvent>(&text) {
                    Ok(event) => {
                        if inbound.send(TransportEvent::Event(event)).await.is_err() {
                            return PumpExit::Shutdown;
                        }
                    }
                    Err(err) => warn!(%err, "transport: ignoring undecodable server frame"),
                },
                Some(Ok(Message::Close(_))) | None => {
                    return PumpExit::Disconnected("closed by server".into());
                }
                Some(Ok(_)) => {}
                Some(Err(err)) => return PumpExit::Disconnected(err.to_string()),
            },
        }
    }
}

async fn redial(
    dialer: &Dialer,
    shutdown: &mut oneshot::Receiver<()>,
) -> Result<WsStream, CloseReason> {
    let mut last_error = String::from("no reconnect attempts configured");
    for attempt in 1..=dialer.max_reconnect_attempts {
        tokio::select! {
            _ = &mut *shutdown => return Err(CloseReason::Requested),
            _ = tokio::time::sleep(dialer.reconnect_delay) => {}
        }
        match dialer.dial().await {
            Ok(socket) => {
                info!(attempt, "transport: websocket reconnected");
                return Ok(socket);
            }
            Err(TransportError::Unauthorized) => return Err(CloseReason::Unauthorized),
            Err(err) => {
                debug!(attempt, %err, "transport: reconnect attempt failed");
                last_error = err.to_string();
            }
        }
    }
    Err(CloseReason::TransportFailed(last_error))
}

async fn replay_joins(sink: &mut WsSink, boards: &[BoardId]) -> Result<(), tungstenite::Error> {
    for board_id in boards {
        let frame = serde_json::to_string(&ClientRequest::JoinGroupChannel {
            board_id: *board_id,
        })
        .unwrap_or_default();
        sink.send(Message::Text(frame)).await?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "tests/transport_tests.rs"]
mod tests;
