//! Cablecast chat binary.
//!
//! # Usage
//!
//! ```bash
//! # Join the public echo server
//! cablecast-chat --name alice
//!
//! # Private backend with a bearer token
//! cablecast-chat --url wss://chat.example.com/cable --room ops \
//!     --header "Authorization=Bearer $TOKEN" --max-reconnects 5
//! ```
//!
//! Lines typed on stdin are sent to the room; room traffic is written to
//! stdout. Logs go to stderr.

use std::sync::Arc;

use cablecast_chat::{ChatRoom, ChatUpdate};
use cablecast_client::{ClientConfig, Session, SessionConfig, SystemEnv, WebSocketTransport};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Cablecast chat client
#[derive(Parser, Debug)]
#[command(name = "cablecast-chat")]
#[command(about = "Chat over an ActionCable-compatible server")]
#[command(version)]
struct Args {
    /// Server endpoint (ws://, wss://, http:// or https://)
    #[arg(
        short,
        long,
        env = "CABLECAST_URL",
        default_value = "wss://actioncable-echo.herokuapp.com/cable"
    )]
    url: String,

    /// Room to join
    #[arg(short, long, default_value = "sports-room")]
    room: String,

    /// Display name
    #[arg(short, long, env = "CABLECAST_NAME", default_value = "guest")]
    name: String,

    /// Extra handshake header as KEY=VALUE (repeatable)
    #[arg(long = "header", value_parser = parse_header)]
    headers: Vec<(String, String)>,

    /// Give up after this many consecutive failed reconnects
    #[arg(long)]
    max_reconnects: Option<u32>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.trim().to_string()))
        },
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn render(update: &ChatUpdate, room: &str) -> Option<String> {
    let line = match update {
        ChatUpdate::Connecting => return None,
        ChatUpdate::Connected => "* connected".to_string(),
        ChatUpdate::Joined => format!("* joined {room}"),
        ChatUpdate::Refused => format!("* server refused room {room}"),
        ChatUpdate::Message { message, .. } => message.to_string(),
        ChatUpdate::Disconnected(reason) => format!("* disconnected: {reason}"),
        ChatUpdate::Reconnecting { attempt, delay } => {
            format!("* reconnecting in {:.1}s (attempt {attempt})", delay.as_secs_f64())
        },
        ChatUpdate::Halted => "* giving up".to_string(),
    };
    Some(line)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();

    if rustls::crypto::ring::default_provider().install_default().is_err() {
        tracing::debug!("TLS crypto provider already installed");
    }

    let mut client = ClientConfig::new(&args.url)?;
    for (key, value) in args.headers {
        client = client.with_header(key, value);
    }

    tracing::info!(endpoint = client.endpoint(), room = %args.room, "starting chat");

    let transport = Arc::new(WebSocketTransport::new());
    let session = Session::new(SessionConfig::new(client), transport, SystemEnv::new());
    let mut room = ChatRoom::new(session, args.name, args.room);
    if let Some(max) = args.max_reconnects {
        room.set_max_reconnects(max);
    }
    room.connect();

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        tokio::select! {
            line = stdin.next_line() => match line? {
                Some(text) => {
                    if let Err(error) = room.send_message(&text) {
                        stdout.write_all(format!("* not sent: {error}\n").as_bytes()).await?;
                    }
                },
                None => break,
            },
            update = room.next_update() => {
                if let Some(line) = render(&update, room.room_id()) {
                    stdout.write_all(format!("{line}\n").as_bytes()).await?;
                    stdout.flush().await?;
                }
                if update == ChatUpdate::Halted {
                    return Ok(());
                }
            },
        }
    }

    room.disconnect();
    tracing::info!(received = room.history().len(), "chat closed");

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use cablecast_chat::ChatMessage;
    use cablecast_client::DisconnectReason;

    use super::*;

    #[test]
    fn header_needs_key_and_equals() {
        assert_eq!(
            parse_header("Authorization=Bearer a=b").unwrap(),
            ("Authorization".to_string(), "Bearer a=b".to_string())
        );
        assert!(parse_header("Authorization").is_err());
        assert!(parse_header("=value").is_err());
    }

    #[test]
    fn args_have_demo_defaults() {
        let args = Args::try_parse_from(["cablecast-chat", "--header", "X-Token=1"]).unwrap();
        assert_eq!(args.room, "sports-room");
        assert_eq!(args.headers, vec![("X-Token".to_string(), "1".to_string())]);
        assert_eq!(args.max_reconnects, None);
    }

    #[test]
    fn renders_messages_and_status() {
        let message = ChatUpdate::Message { message: ChatMessage::new("Bob", "hey"), own: false };
        assert_eq!(render(&message, "lobby").as_deref(), Some("Bob: hey"));
        assert_eq!(render(&ChatUpdate::Joined, "lobby").as_deref(), Some("* joined lobby"));
        assert_eq!(render(&ChatUpdate::Connecting, "lobby"), None);

        let reconnecting =
            ChatUpdate::Reconnecting { attempt: 2, delay: Duration::from_millis(1500) };
        assert_eq!(
            render(&reconnecting, "lobby").as_deref(),
            Some("* reconnecting in 1.5s (attempt 2)")
        );

        let lost = ChatUpdate::Disconnected(DisconnectReason::None);
        assert!(render(&lost, "lobby").unwrap().starts_with("* disconnected"));
    }
}
