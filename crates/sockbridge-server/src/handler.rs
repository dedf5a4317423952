//! Per-connection request handling.
//!
//! [`Dispatcher`] executes decoded [`Command`]s against the shared channel
//! and schema registries.  [`serve_connection`] is the read → decode →
//! dispatch → respond loop that runs once per client connection.
//!
//! Every anticipated failure is a [`BridgeError`] variant with its own wire
//! code.  A panic escaping the dispatch path is caught here and reported as
//! `EXCEPTION`, and the connection stays open.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use sockbridge_middleware::{Bus, ChannelRegistry, SchemaRegistry};
use sockbridge_types::{BridgeError, ErrorCode, Reply};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::codec::{Command, ProtocolCodec, decode_frame};

/// Executes client commands against the shared registries.
///
/// One instance is shared (behind an `Arc`) by every connection.
pub struct Dispatcher {
    schemas: Arc<SchemaRegistry>,
    channels: Arc<ChannelRegistry>,
}

impl Dispatcher {
    pub fn new(schemas: Arc<SchemaRegistry>, channels: Arc<ChannelRegistry>) -> Self {
        Self { schemas, channels }
    }

    /// Dispatcher over the built-in schemas and a fresh channel registry on
    /// `bus`.
    pub fn with_bus(bus: Arc<dyn Bus>) -> Self {
        Self::new(
            Arc::new(SchemaRegistry::with_builtin()),
            Arc::new(ChannelRegistry::new(bus)),
        )
    }

    pub fn schemas(&self) -> &SchemaRegistry {
        &self.schemas
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Run one command.
    ///
    /// # Errors
    ///
    /// * `CreateChannel`: [`BridgeError::PublisherAlreadyExists`],
    ///   [`BridgeError::UnknownSchema`], or a bus registration failure.
    /// * `Publish`: [`BridgeError::PublisherNotFound`],
    ///   [`BridgeError::UnknownSchema`], [`BridgeError::UndecodablePayload`].
    pub fn dispatch(&self, command: &Command) -> Result<(), BridgeError> {
        match command {
            Command::CreateChannel { name, schema } => {
                if self.channels.exists(name) {
                    return Err(BridgeError::PublisherAlreadyExists(name.clone()));
                }
                if self.schemas.lookup(schema).is_none() {
                    return Err(BridgeError::UnknownSchema(schema.clone()));
                }
                // Re-checks the name under the registry lock.
                self.channels.create(name, schema)
            }
            Command::Publish {
                name,
                schema,
                payload,
            } => {
                let handle = self
                    .channels
                    .get(name)
                    .ok_or_else(|| BridgeError::PublisherNotFound(name.clone()))?;
                let def = self
                    .schemas
                    .lookup(schema)
                    .ok_or_else(|| BridgeError::UnknownSchema(schema.clone()))?;
                let message = def.decode(payload).map_err(|e| {
                    debug!(channel = %name, schema = %schema, reason = %e, "payload rejected");
                    BridgeError::UndecodablePayload {
                        schema: schema.clone(),
                        payload: payload.clone(),
                    }
                })?;
                debug!(channel = %name, ?message, "publish");
                handle.publish(message);
                Ok(())
            }
        }
    }

    /// Decode and run one request line, producing the reply to send back.
    ///
    /// Never fails: parse and domain errors become their wire codes, and a
    /// panic inside [`Dispatcher::dispatch`] becomes `EXCEPTION`.
    pub fn handle_frame(&self, frame: &str) -> Reply {
        let result = decode_frame(frame).and_then(|command| self.dispatch_guarded(&command));
        match result {
            Ok(()) => Reply::ok(),
            Err(err) => {
                let reply = Reply::from(&err);
                if reply.code == ErrorCode::Exception {
                    warn!(frame, error = %err, "dispatch fault");
                } else {
                    debug!(frame, code = %reply.code, error = %err, "request rejected");
                }
                reply
            }
        }
    }

    fn dispatch_guarded(&self, command: &Command) -> Result<(), BridgeError> {
        panic::catch_unwind(AssertUnwindSafe(|| self.dispatch(command)))
            .unwrap_or_else(|payload| Err(BridgeError::Fault(panic_message(payload.as_ref()))))
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Serve one client connection until the peer disconnects, a transport
/// error occurs, or `shutdown` is cancelled.
///
/// Requests are handled strictly in order: the reply to one frame is fully
/// flushed before the next frame is read.  Cancellation is only observed
/// while waiting for a frame, so an in-flight reply is always completed.
///
/// # Errors
///
/// Returns [`BridgeError::Io`] on read/write failures, invalid UTF-8, or a
/// frame longer than `max_frame_len`.  Protocol errors never end the
/// connection.
pub async fn serve_connection<S>(
    stream: S,
    dispatcher: Arc<Dispatcher>,
    max_frame_len: usize,
    shutdown: CancellationToken,
) -> Result<(), BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, ProtocolCodec::with_max_frame_len(max_frame_len));

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                info!("closing connection for shutdown");
                break;
            }
            frame = framed.next() => frame,
        };

        let Some(frame) = frame else {
            debug!("peer closed connection");
            break;
        };
        let frame = frame?;
        debug!(frame = %frame, "received");

        let reply = dispatcher.handle_frame(&frame);
        framed.send(reply).await?;
    }

    // Best effort: the peer may already be gone.
    let _ = framed.get_mut().shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use sockbridge_middleware::{ChannelHandle, EventBus};
    use sockbridge_types::{Message, Twist, Vector3};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

    use crate::codec::DEFAULT_MAX_FRAME_LEN;

    // ------------------------------------------------------------------
    // Test doubles
    // ------------------------------------------------------------------

    #[derive(Default)]
    struct RecordingBus {
        registrations: AtomicUsize,
        published: Arc<Mutex<Vec<Message>>>,
    }

    struct RecordingHandle(Arc<Mutex<Vec<Message>>>);

    impl ChannelHandle for RecordingHandle {
        fn publish(&self, message: Message) {
            self.0.lock().unwrap().push(message);
        }
    }

    impl Bus for RecordingBus {
        fn register(&self, _: &str, _: &str) -> Result<Arc<dyn ChannelHandle>, BridgeError> {
            self.registrations.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(RecordingHandle(Arc::clone(&self.published))))
        }
    }

    struct PanickingHandle;

    impl ChannelHandle for PanickingHandle {
        fn publish(&self, _: Message) {
            panic!("transport exploded");
        }
    }

    struct PanickingBus;

    impl Bus for PanickingBus {
        fn register(&self, _: &str, _: &str) -> Result<Arc<dyn ChannelHandle>, BridgeError> {
            Ok(Arc::new(PanickingHandle))
        }
    }

    fn recording() -> (Arc<RecordingBus>, Dispatcher) {
        let bus = Arc::new(RecordingBus::default());
        let dispatcher = Dispatcher::with_bus(bus.clone());
        (bus, dispatcher)
    }

    // ------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------

    #[test]
    fn create_then_duplicate() {
        let (_, d) = recording();
        assert_eq!(d.handle_frame("0;/cmd_vel;geometry_msgs/Twist").to_string(), "0;ok");
        assert_eq!(
            d.handle_frame("0;/cmd_vel;geometry_msgs/Twist").to_string(),
            "1;Publisher /cmd_vel already exists"
        );
    }

    #[test]
    fn duplicate_is_reported_before_schema_is_checked() {
        let (_, d) = recording();
        d.handle_frame("0;/cmd_vel;geometry_msgs/Twist");
        let reply = d.handle_frame("0;/cmd_vel;no_such/Schema");
        assert_eq!(reply.code, ErrorCode::PublisherAlreadyExists);
    }

    #[test]
    fn create_with_unknown_schema_is_bad_data() {
        let (bus, d) = recording();
        let reply = d.handle_frame("0;/imu;sensor_msgs/Imu");
        assert_eq!(reply.to_string(), "2;Unknown schema name: sensor_msgs/Imu");
        assert!(!d.channels().exists("/imu"));
        assert_eq!(bus.registrations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn publish_decodes_and_forwards_message() {
        let (bus, d) = recording();
        d.handle_frame("0;/cmd_vel;geometry_msgs/Twist");

        let reply = d.handle_frame(r#"1;/cmd_vel;geometry_msgs/Twist;{"linear_x":1.0}"#);
        assert_eq!(reply, Reply::ok());

        let published = bus.published.lock().unwrap();
        assert_eq!(
            published.as_slice(),
            &[Message::Twist(Twist {
                linear: Vector3 { x: 1.0, y: 0.0, z: 0.0 },
                angular: Vector3::default(),
            })]
        );
    }

    #[test]
    fn publish_to_missing_channel_regardless_of_payload() {
        let (_, d) = recording();
        for payload in ["{}", "not json", r#"{"linear_x":"x"}"#] {
            let reply = d.handle_frame(&format!("1;/unknown;geometry_msgs/Twist;{payload}"));
            assert_eq!(reply.to_string(), "3;Publisher /unknown does not exist");
        }
    }

    #[test]
    fn publish_with_unknown_schema_is_bad_data() {
        let (bus, d) = recording();
        d.handle_frame("0;/cmd_vel;geometry_msgs/Twist");
        let reply = d.handle_frame("1;/cmd_vel;geometry_msgs/Twisty;{}");
        assert_eq!(reply.to_string(), "2;Unknown schema name: geometry_msgs/Twisty");
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[test]
    fn publish_with_malformed_json_is_bad_data() {
        let (bus, d) = recording();
        d.handle_frame("0;/cmd_vel;geometry_msgs/Twist");
        let reply = d.handle_frame("1;/cmd_vel;geometry_msgs/Twist;{linear_x:");
        assert_eq!(
            reply.to_string(),
            "2;Cannot parse data: {linear_x: for type \"geometry_msgs/Twist\""
        );
        assert!(bus.published.lock().unwrap().is_empty());
    }

    #[test]
    fn short_frames_are_bad_data() {
        let (_, d) = recording();
        assert_eq!(d.handle_frame("0;/a").to_string(), "2;Separated data len less than 3");
        assert_eq!(
            d.handle_frame("1;/a;geometry_msgs/Twist").to_string(),
            "2;Separated data len less than 4"
        );
        assert_eq!(d.handle_frame("5;/a;b").to_string(), "2;Unknown key: 5");
    }

    #[test]
    fn identical_creates_register_once() {
        let (bus, d) = recording();
        for _ in 0..5 {
            d.handle_frame("0;/cmd_vel;geometry_msgs/Twist");
        }
        assert_eq!(bus.registrations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panic_during_dispatch_becomes_exception() {
        let d = Dispatcher::with_bus(Arc::new(PanickingBus));
        d.handle_frame("0;/cmd_vel;geometry_msgs/Twist");

        let reply = d.handle_frame("1;/cmd_vel;geometry_msgs/Twist;{}");
        assert_eq!(reply.code, ErrorCode::Exception);
        assert_eq!(reply.message, "Process data error: transport exploded");

        // The dispatcher keeps working afterwards.
        assert_eq!(d.handle_frame("0;/other;std_msgs/Float64"), Reply::ok());
    }

    // ------------------------------------------------------------------
    // Connection loop
    // ------------------------------------------------------------------

    #[tokio::test]
    async fn pipelined_frames_are_answered_in_order() -> Result<(), Box<dyn std::error::Error>> {
        let (client, server) = tokio::io::duplex(4096);
        let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(EventBus::default())));
        let task = tokio::spawn(serve_connection(
            server,
            dispatcher,
            DEFAULT_MAX_FRAME_LEN,
            CancellationToken::new(),
        ));

        let (read, mut write) = tokio::io::split(client);
        write
            .write_all(b"0;/a;std_msgs/Float64\n0;/a;std_msgs/Float64\n1;/b;std_msgs/Float64;{}\n")
            .await?;

        let mut lines = BufReader::new(read).lines();
        assert_eq!(lines.next_line().await?.as_deref(), Some("0;ok"));
        assert_eq!(lines.next_line().await?.as_deref(), Some("1;Publisher /a already exists"));
        assert_eq!(lines.next_line().await?.as_deref(), Some("3;Publisher /b does not exist"));

        write.shutdown().await?;
        task.await??;
        Ok(())
    }

    #[tokio::test]
    async fn connection_survives_exception() -> Result<(), Box<dyn std::error::Error>> {
        let (client, server) = tokio::io::duplex(4096);
        let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(PanickingBus)));
        let task = tokio::spawn(serve_connection(
            server,
            dispatcher,
            DEFAULT_MAX_FRAME_LEN,
            CancellationToken::new(),
        ));

        let (read, mut write) = tokio::io::split(client);
        let mut lines = BufReader::new(read).lines();

        write.write_all(b"0;/cmd_vel;geometry_msgs/Twist\n").await?;
        assert_eq!(lines.next_line().await?.as_deref(), Some("0;ok"));

        write.write_all(b"1;/cmd_vel;geometry_msgs/Twist;{}\n").await?;
        let line = lines.next_line().await?.ok_or("connection closed")?;
        assert!(line.starts_with("4;Process data error"), "{line}");

        write.write_all(b"0;/cmd_vel;geometry_msgs/Twist\n").await?;
        assert_eq!(
            lines.next_line().await?.as_deref(),
            Some("1;Publisher /cmd_vel already exists")
        );

        write.shutdown().await?;
        task.await??;
        Ok(())
    }

    #[tokio::test]
    async fn overlong_frame_closes_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(EventBus::default())));
        let task = tokio::spawn(serve_connection(server, dispatcher, 16, CancellationToken::new()));

        let (_read, mut write) = tokio::io::split(client);
        write
            .write_all(b"0;/a_channel_name_that_is_too_long;std_msgs/Float64\n")
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(result, Err(BridgeError::Io(_))));
    }

    #[tokio::test]
    async fn invalid_utf8_frame_closes_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(EventBus::default())));
        let task = tokio::spawn(serve_connection(
            server,
            dispatcher,
            DEFAULT_MAX_FRAME_LEN,
            CancellationToken::new(),
        ));

        let (_read, mut write) = tokio::io::split(client);
        write.write_all(b"0;/a;\xff\xfe\n").await.unwrap();

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("handler must return on invalid input")
            .unwrap();
        assert!(matches!(result, Err(BridgeError::Io(ref e)) if e.kind() == std::io::ErrorKind::InvalidData));
    }

    #[tokio::test]
    async fn cancellation_ends_idle_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let dispatcher = Arc::new(Dispatcher::with_bus(Arc::new(EventBus::default())));
        let shutdown = CancellationToken::new();
        let task = tokio::spawn(serve_connection(
            server,
            dispatcher,
            DEFAULT_MAX_FRAME_LEN,
            shutdown.clone(),
        ));

        shutdown.cancel();
        let result = tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .expect("handler must return after cancellation")
            .unwrap();
        assert!(result.is_ok());
        drop(client);
    }
}
