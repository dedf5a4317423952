//! Manual test client.
//!
//! Repeatedly creates a channel and publishes one payload on it, printing
//! each reply.  On any send/receive failure the socket is discarded and a
//! fresh connection is opened before the next attempt.

use std::time::Duration;

use colored::Colorize;
use futures_util::{SinkExt, StreamExt};
use sockbridge_server::{Command, encode_command};
use sockbridge_types::{BridgeError, ErrorCode, Reply};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub const DEFAULT_CHANNEL: &str = "/mobile_base_controller/cmd_vel";
pub const DEFAULT_SCHEMA: &str = "geometry_msgs/Twist";
pub const DEFAULT_PAYLOAD: &str = r#"{"linear_x": 1.0}"#;

/// What the client sends and how often.
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub addr: String,
    pub interval: Duration,
    pub channel: String,
    pub schema: String,
    pub payload: String,
    /// Stop after this many create/publish rounds; run forever when `None`.
    pub count: Option<u64>,
}

/// A connection that is re-established after every failure.
struct SocketClient {
    addr: String,
    conn: Option<Framed<TcpStream, LinesCodec>>,
}

impl SocketClient {
    fn new(addr: String) -> Self {
        Self { addr, conn: None }
    }

    async fn connect(&mut self) {
        match TcpStream::connect(&self.addr).await {
            Ok(stream) => {
                debug!(addr = %self.addr, "connected");
                self.conn = Some(Framed::new(stream, LinesCodec::new()));
            }
            Err(e) => warn!(addr = %self.addr, error = %e, "connection error"),
        }
    }

    /// Send one request line and wait for its reply.  Returns `None` when
    /// the exchange failed; the connection is replaced in that case.
    async fn send(&mut self, frame: &str) -> Option<String> {
        if self.conn.is_none() {
            self.connect().await;
        }
        match self.exchange(frame).await {
            Ok(line) => Some(line),
            Err(e) => {
                warn!(error = %e, "send message error");
                self.conn = None;
                self.connect().await;
                None
            }
        }
    }

    async fn exchange(&mut self, frame: &str) -> Result<String, BridgeError> {
        let conn = self.conn.as_mut().ok_or_else(|| {
            BridgeError::Io(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "not connected",
            ))
        })?;
        conn.send(frame).await.map_err(lines_err)?;
        match conn.next().await {
            Some(line) => line.map_err(lines_err),
            None => Err(BridgeError::Io(std::io::ErrorKind::UnexpectedEof.into())),
        }
    }
}

fn lines_err(err: tokio_util::codec::LinesCodecError) -> BridgeError {
    match err {
        tokio_util::codec::LinesCodecError::Io(e) => BridgeError::Io(e),
        other => BridgeError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, other)),
    }
}

/// Run the create/publish loop until `count` rounds are done or `shutdown`
/// is cancelled.
pub async fn run(options: ClientOptions, shutdown: CancellationToken) -> Result<(), BridgeError> {
    let create = encode_command(&Command::CreateChannel {
        name: options.channel.clone(),
        schema: options.schema.clone(),
    });
    let publish = encode_command(&Command::Publish {
        name: options.channel.clone(),
        schema: options.schema.clone(),
        payload: options.payload.clone(),
    });

    let mut client = SocketClient::new(options.addr.clone());
    let mut ticker = tokio::time::interval(options.interval);
    let mut rounds = 0u64;

    while options.count.is_none_or(|count| rounds < count) {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        for frame in [&create, &publish] {
            print_reply(frame, client.send(frame).await.as_deref());
        }
        rounds += 1;
    }
    Ok(())
}

fn print_reply(frame: &str, reply: Option<&str>) {
    let Some(line) = reply else {
        println!("{} {}", "✗".red().bold(), frame.dimmed());
        return;
    };
    let rendered = match Reply::parse(line) {
        Some(reply) if reply.code == ErrorCode::Ok => line.green(),
        Some(_) => line.yellow(),
        None => line.red(),
    };
    println!("{} {}", rendered, frame.dimmed());
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockbridge_middleware::EventBus;
    use sockbridge_server::{BridgeServer, Dispatcher};
    use std::sync::Arc;

    #[tokio::test]
    async fn client_publishes_against_running_server() -> Result<(), Box<dyn std::error::Error>> {
        let bus = EventBus::default();
        let mut rx = bus.subscribe_channel(DEFAULT_CHANNEL);
        let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(bus.clone())));
        let server = BridgeServer::bind("127.0.0.1:0", dispatcher).await?;
        let addr = server.local_addr()?;
        let shutdown = CancellationToken::new();
        let server_task = tokio::spawn(server.run(shutdown.clone()));

        let options = ClientOptions {
            addr: addr.to_string(),
            interval: Duration::from_millis(10),
            channel: DEFAULT_CHANNEL.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            payload: DEFAULT_PAYLOAD.to_string(),
            count: Some(2),
        };
        run(options, CancellationToken::new()).await?;

        let first = rx.recv().await.ok_or("no event")?;
        let second = rx.recv().await.ok_or("no event")?;
        assert_eq!(first.schema, DEFAULT_SCHEMA);
        assert_eq!(second.channel, DEFAULT_CHANNEL);

        shutdown.cancel();
        server_task.await??;
        Ok(())
    }

    #[tokio::test]
    async fn client_survives_unreachable_server() {
        // Bind and drop a listener to get a port nobody listens on.
        let addr = {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
            listener.local_addr().unwrap()
        };
        let options = ClientOptions {
            addr: addr.to_string(),
            interval: Duration::from_millis(5),
            channel: DEFAULT_CHANNEL.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            payload: DEFAULT_PAYLOAD.to_string(),
            count: Some(2),
        };
        assert!(run(options, CancellationToken::new()).await.is_ok());
    }

    #[tokio::test]
    async fn client_stops_on_cancellation() {
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        let options = ClientOptions {
            addr: "127.0.0.1:1".to_string(),
            interval: Duration::from_secs(60),
            channel: DEFAULT_CHANNEL.to_string(),
            schema: DEFAULT_SCHEMA.to_string(),
            payload: DEFAULT_PAYLOAD.to_string(),
            count: None,
        };
        let result = tokio::time::timeout(Duration::from_secs(2), run(options, shutdown)).await;
        assert!(matches!(result, Ok(Ok(()))));
    }
}
