//! Minimal NATS publisher.
//!
//! Speaks just enough of the NATS text protocol to publish: read the server
//! `INFO`, send `CONNECT` with credentials, then `PUB` frames. Server `PING`s
//! are answered with `PONG`; any I/O error drops the connection and the task
//! reconnects after a delay. Frames published while disconnected stay buffered
//! up to the channel capacity.

use std::time::Duration;

use async_trait::async_trait;
use bytes::{BufMut, Bytes, BytesMut};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use super::{PublishError, RoutePublisher};
use crate::config::NatsSettings;

/// Outbound frame buffer size.
const FRAME_BUFFER: usize = 1024;

const PING: &[u8] = b"PING\r\n";
const PONG: &[u8] = b"PONG\r\n";

/// A parsed server line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerOp {
    Info(String),
    Ping,
    Pong,
    Ok,
    Err(String),
    Other(String),
}

/// Parses one protocol line sent by the server.
pub fn parse_server_op(line: &str) -> ServerOp {
    let line = line.trim_end_matches(['\r', '\n']);
    let (op, rest) = line.split_once(' ').unwrap_or((line, ""));

    match op.to_ascii_uppercase().as_str() {
        "INFO" => ServerOp::Info(rest.trim().to_string()),
        "PING" => ServerOp::Ping,
        "PONG" => ServerOp::Pong,
        "+OK" => ServerOp::Ok,
        "-ERR" => ServerOp::Err(rest.trim().trim_matches('\'').to_string()),
        _ => ServerOp::Other(line.to_string()),
    }
}

#[derive(Serialize)]
struct ConnectOptions<'a> {
    verbose: bool,
    pedantic: bool,
    tls_required: bool,
    user: &'a str,
    pass: &'a str,
    name: &'a str,
    lang: &'a str,
    version: &'a str,
}

/// Encodes the `CONNECT` frame.
pub fn encode_connect(user: &str, password: &str) -> Result<Bytes, serde_json::Error> {
    let options = ConnectOptions {
        verbose: false,
        pedantic: false,
        tls_required: false,
        user,
        pass: password,
        name: "tether-bridge",
        lang: "rust",
        version: env!("CARGO_PKG_VERSION"),
    };

    let json = serde_json::to_vec(&options)?;
    let mut frame = BytesMut::with_capacity(json.len() + 10);
    frame.put_slice(b"CONNECT ");
    frame.put_slice(&json);
    frame.put_slice(b"\r\n");
    Ok(frame.freeze())
}

/// Encodes a `PUB` frame.
pub fn encode_pub(subject: &str, payload: &[u8]) -> Bytes {
    let header = format!("PUB {subject} {}\r\n", payload.len());
    let mut frame = BytesMut::with_capacity(header.len() + payload.len() + 2);
    frame.put_slice(header.as_bytes());
    frame.put_slice(payload);
    frame.put_slice(b"\r\n");
    frame.freeze()
}

/// Publisher backed by a background connection task.
#[derive(Clone)]
pub struct NatsPublisher {
    frames: mpsc::Sender<Bytes>,
}

impl NatsPublisher {
    /// Spawns the connection task and returns a handle to it.
    pub fn connect(settings: NatsSettings, shutdown: watch::Receiver<bool>) -> Self {
        let (frames, rx) = mpsc::channel(FRAME_BUFFER);
        tokio::spawn(run_connection(settings, rx, shutdown));
        Self { frames }
    }
}

#[async_trait]
impl RoutePublisher for NatsPublisher {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        self.frames
            .try_send(encode_pub(subject, &payload))
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => PublishError::Backlog,
                mpsc::error::TrySendError::Closed(_) => PublishError::Closed,
            })
    }
}

#[derive(Debug, thiserror::Error)]
enum ConnectionError {
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("encoding error: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("server closed the connection")]
    Closed,
}

enum Exit {
    Shutdown,
    Drained,
}

async fn run_connection(
    settings: NatsSettings,
    mut frames: mpsc::Receiver<Bytes>,
    mut shutdown: watch::Receiver<bool>,
) {
    let address = settings.address();

    loop {
        if *shutdown.borrow() {
            break;
        }

        match session(&settings, &address, &mut frames, &mut shutdown).await {
            Ok(Exit::Shutdown) => break,
            Ok(Exit::Drained) => {
                debug!("All publishers dropped; closing NATS connection");
                break;
            }
            Err(e) => warn!(address = %address, error = %e, "NATS connection failed"),
        }

        tokio::select! {
            biased;
            _ = crate::shutdown_requested(&mut shutdown) => break,
            _ = tokio::time::sleep(settings.reconnect_delay) => {}
        }
    }

    info!(address = %address, "NATS connection task stopped");
}

async fn session(
    settings: &NatsSettings,
    address: &str,
    frames: &mut mpsc::Receiver<Bytes>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<Exit, ConnectionError> {
    let stream = tokio::time::timeout(Duration::from_secs(10), TcpStream::connect(address))
        .await
        .map_err(|_| ConnectionError::Protocol("connect timed out".to_string()))??;
    stream.set_nodelay(true)?;

    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    match lines.next_line().await?.as_deref().map(parse_server_op) {
        Some(ServerOp::Info(_)) => {}
        Some(other) => {
            return Err(ConnectionError::Protocol(format!(
                "expected INFO, got {other:?}"
            )))
        }
        None => return Err(ConnectionError::Closed),
    }

    write
        .write_all(&encode_connect(&settings.user, &settings.password)?)
        .await?;
    write.write_all(PING).await?;
    info!(address = %address, "Connected to NATS");

    loop {
        tokio::select! {
            biased;
            _ = crate::shutdown_requested(shutdown) => {
                write.flush().await?;
                return Ok(Exit::Shutdown);
            }
            line = lines.next_line() => {
                let Some(line) = line? else {
                    return Err(ConnectionError::Closed);
                };
                handle_server_line(&line, &mut write).await?;
            }
            frame = frames.recv() => {
                let Some(frame) = frame else {
                    write.flush().await?;
                    return Ok(Exit::Drained);
                };
                write.write_all(&frame).await?;
            }
        }
    }
}

async fn handle_server_line(
    line: &str,
    write: &mut OwnedWriteHalf,
) -> Result<(), ConnectionError> {
    match parse_server_op(line) {
        ServerOp::Ping => write.write_all(PONG).await?,
        ServerOp::Err(message) => {
            warn!(error = %message, "NATS server error");
            if message.to_ascii_lowercase().contains("authorization") {
                return Err(ConnectionError::Protocol(message));
            }
        }
        ServerOp::Pong | ServerOp::Ok | ServerOp::Info(_) => {}
        ServerOp::Other(line) => debug!(line = %line, "Ignoring NATS server line"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_encode_pub() {
        let frame = encode_pub("router.register", br#"{"host":"10.0.0.5"}"#);
        assert_eq!(
            &frame[..],
            b"PUB router.register 19\r\n{\"host\":\"10.0.0.5\"}\r\n"
        );
    }

    #[test]
    fn test_encode_connect() {
        let frame = encode_connect("nats", "secret").unwrap();
        let text = std::str::from_utf8(&frame).unwrap();
        assert!(text.starts_with("CONNECT {"));
        assert!(text.ends_with("}\r\n"));

        let json: serde_json::Value =
            serde_json::from_str(text.trim_start_matches("CONNECT ").trim_end()).unwrap();
        assert_eq!(json["user"], "nats");
        assert_eq!(json["pass"], "secret");
        assert_eq!(json["verbose"], false);
    }

    #[rstest]
    #[case("INFO {\"server_id\":\"x\"}\r\n", ServerOp::Info("{\"server_id\":\"x\"}".to_string()))]
    #[case("PING\r\n", ServerOp::Ping)]
    #[case("PONG", ServerOp::Pong)]
    #[case("+OK\r\n", ServerOp::Ok)]
    #[case("-ERR 'Authorization Violation'\r\n", ServerOp::Err("Authorization Violation".to_string()))]
    #[case("MSG foo 1 0\r\n", ServerOp::Other("MSG foo 1 0".to_string()))]
    fn test_parse_server_op(#[case] line: &str, #[case] expected: ServerOp) {
        assert_eq!(parse_server_op(line), expected);
    }
}
