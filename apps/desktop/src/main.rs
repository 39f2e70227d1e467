use std::{io::Write, sync::Arc};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use client_core::{
    alerts::{AlertSink, DesktopNotice, NotificationPermission, PopupKind},
    api::HttpChatApi,
    config::{load_settings, ClientSettings},
    conversation::Viewport,
    session::FileTokenStore,
    transport::WsConnector,
    types::{DeliveryState, MessageEntry},
    ClientEvent, ClientHandle, LoadOlderOutcome, RealtimeClient,
};
use shared::domain::{ConversationKey, NotificationId, UserId};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(about = "Task board chat and notifications from the terminal")]
struct Args {
    /// Overrides `server_url` from client.toml / APP__SERVER_URL.
    #[arg(long)]
    server_url: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sign in and store the token for later commands.
    Login {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    Logout,
    /// Stay connected and print incoming messages and notifications.
    Listen,
    /// Send a direct message.
    Send {
        #[arg(long)]
        to: i64,
        text: String,
    },
    /// Print a direct-message thread, oldest first.
    History {
        #[arg(long)]
        with: i64,
        /// Older pages to load beyond the first.
        #[arg(long, default_value_t = 0)]
        older: u32,
    },
    Notifications,
    /// Mark one notification read.
    Read { id: i64 },
    ReadAll,
}

/// Terminal bell for sounds, stderr lines for desktop notices.
struct TerminalAlerts;

#[async_trait]
impl AlertSink for TerminalAlerts {
    fn play_sound(&self) {
        let mut stderr = std::io::stderr();
        let _ = stderr.write_all(b"\x07");
        let _ = stderr.flush();
    }

    fn permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    async fn request_permission(&self) -> NotificationPermission {
        NotificationPermission::Granted
    }

    fn show_desktop_notification(&self, notice: &DesktopNotice) {
        eprintln!("** {}: {}", notice.title, notice.body);
    }
}

fn build_client(settings: &ClientSettings) -> Result<Arc<RealtimeClient>> {
    let connector = WsConnector::new(settings.realtime_url()?)
        .with_reconnect(settings.reconnect_delay(), settings.max_reconnect_attempts);
    Ok(RealtimeClient::new_with_dependencies(
        Arc::new(HttpChatApi::new(settings.server_url.clone())),
        Arc::new(connector),
        Arc::new(TerminalAlerts),
        Arc::new(FileTokenStore::new(settings.token_path.clone())),
        settings.page_size,
    ))
}

async fn require_session(client: &Arc<RealtimeClient>) -> Result<()> {
    match client.restore_session().await? {
        Some(user) => {
            info!(user_id = user.id.0, "signed in as {}", user.name);
            Ok(())
        }
        None => bail!("not logged in; run `login` first"),
    }
}

fn print_entry(entry: &MessageEntry) {
    let name = entry
        .sender
        .as_ref()
        .map(|sender| sender.name.as_str())
        .unwrap_or("?");
    let marker = match &entry.delivery {
        DeliveryState::Confirmed => "",
        DeliveryState::Pending => " (sending)",
        DeliveryState::Failed { .. } => " (failed)",
    };
    println!(
        "[{}] {name}: {}{marker}",
        entry.created_at.format("%Y-%m-%d %H:%M"),
        entry.text
    );
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::PopupShown(popup) => match &popup.kind {
            PopupKind::DirectMessage {
                sender_name,
                preview,
                ..
            } => println!("dm #{} {sender_name}: {preview}", popup.id),
            PopupKind::GroupMessage {
                board_id,
                author_name,
                preview,
            } => println!("board {} #{} {author_name}: {preview}", board_id.0, popup.id),
            PopupKind::Notification {
                notification_id,
                message,
            } => println!("notification {}: {message}", notification_id.0),
        },
        ClientEvent::UnreadChanged { peer, count } => {
            println!("unread from user {}: {count}", peer.0)
        }
        ClientEvent::ConnectionClosed(reason) => println!("connection closed: {reason:?}"),
        ClientEvent::ConnectionRestored => println!("connection restored"),
        ClientEvent::Error(message) => eprintln!("error: {message}"),
        _ => {}
    }
}

async fn listen(client: &Arc<RealtimeClient>) -> Result<()> {
    let mut events = client.subscribe_events();
    require_session(client).await?;
    let friends = client.refresh_friends().await?;
    info!(friends = friends.len(), "listening for activity, ctrl-c to stop");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => {
                    print_event(&event);
                    if matches!(event, ClientEvent::SessionEnded) {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    eprintln!("missed {skipped} events");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    Ok(())
}

async fn history(client: &Arc<RealtimeClient>, peer: UserId, older: u32) -> Result<()> {
    require_session(client).await?;
    let conversation = ConversationKey::Direct(peer);
    client.open_chat(conversation).await?;
    for _ in 0..older {
        let top = Viewport::default();
        if client.load_older(peer, top).await? == LoadOlderOutcome::Skipped {
            break;
        }
    }
    for entry in client.messages(conversation).await {
        print_entry(&entry);
    }
    if client.has_older(peer).await {
        println!("(older messages available)");
    }
    client.close_chat().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut settings = load_settings();
    if let Some(server_url) = args.server_url {
        settings.server_url = server_url;
    }
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter)),
        )
        .init();

    let client = build_client(&settings)?;
    match args.command {
        Command::Login { email, password } => {
            let user = client
                .login(&email, &password)
                .await
                .context("login failed")?;
            println!("Logged in as {} (user_id={})", user.name, user.id.0);
        }
        Command::Logout => {
            client.logout().await?;
            println!("Logged out");
        }
        Command::Listen => listen(&client).await?,
        Command::Send { to, text } => {
            require_session(&client).await?;
            match client.send_direct_message(UserId(to), &text).await {
                Ok(entry) => print_entry(&entry),
                Err(failure) => bail!("{failure:#}; draft kept: {:?}", failure.draft),
            }
        }
        Command::History { with, older } => history(&client, UserId(with), older).await?,
        Command::Notifications => {
            require_session(&client).await?;
            for notification in client.notifications().await? {
                let marker = if notification.is_read { " " } else { "*" };
                println!(
                    "{marker} {} [{}] {}",
                    notification.id.0,
                    notification.created_at.format("%Y-%m-%d %H:%M"),
                    notification.message
                );
            }
            let (unread, total) = client.notification_counts().await;
            println!("{unread} unread, {total} total");
        }
        Command::Read { id } => {
            require_session(&client).await?;
            client.notifications().await?;
            client.mark_notification_read(NotificationId(id)).await?;
        }
        Command::ReadAll => {
            require_session(&client).await?;
            client.notifications().await?;
            client.mark_all_notifications_read().await?;
            println!("All notifications marked read");
        }
    }
    Ok(())
}
