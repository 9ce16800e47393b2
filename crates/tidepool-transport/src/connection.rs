//! Single-peer line connection
//!
//! One task owns the socket and multiplexes three concerns:
//! outbound requests (flow controlled), inbound bytes (framed on CRLF),
//! and the periodic heartbeat. The peer struggles to parse requests that
//! arrive too fast, so only one request is on the wire unacknowledged at a
//! time; everything else waits in a FIFO queue and is drained one entry per
//! acknowledgment.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use parking_lot::Mutex;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::time;
use tracing::{debug, error, info, warn};

use tidepool_core::{Envelope, LINE_TERMINATOR, PING, PONG};

use crate::error::{Result, TransportError};
use crate::events::{EventReceiver, TransportEvent};

/// Default channel buffer size for a connection
const DEFAULT_CHANNEL_BUFFER_SIZE: usize = 64;

/// Connection configuration
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Interval between heartbeat pings
    pub heartbeat_interval: Duration,
    /// Unacknowledged pings tolerated before the connection is closed
    pub max_missed_pongs: u32,
    /// TCP keep-alive time in seconds (0 = disabled)
    pub keepalive_secs: u64,
    /// Buffer size of the outgoing and event channels
    pub channel_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_secs(10),
            max_missed_pongs: 2,
            keepalive_secs: 30,
            channel_buffer: DEFAULT_CHANNEL_BUFFER_SIZE,
        }
    }
}

/// Line-framed TCP connection to one controller
pub struct LineConnection;

impl LineConnection {
    /// Connect and spawn the io task. Returns the sending handle and the
    /// stream of connection events.
    pub async fn connect(
        addr: &str,
        config: TransportConfig,
    ) -> Result<(ConnectionHandle, EventReceiver)> {
        info!("connecting to {addr}");

        let stream = TcpStream::connect(addr)
            .await
            .map_err(|err| TransportError::ConnectionFailed(err.to_string()))?;

        if config.keepalive_secs > 0 {
            let socket = socket2::SockRef::from(&stream);
            let keepalive = socket2::TcpKeepalive::new()
                .with_time(Duration::from_secs(config.keepalive_secs));
            let _ = socket.set_tcp_keepalive(&keepalive);
        }

        let connected = Arc::new(Mutex::new(true));
        let shutdown = Arc::new(Notify::new());
        let (outgoing_tx, outgoing_rx) = mpsc::channel::<String>(config.channel_buffer);
        let (events_tx, events_rx) = mpsc::channel::<TransportEvent>(config.channel_buffer);

        let handle = ConnectionHandle {
            tx: outgoing_tx,
            connected: connected.clone(),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(run_io_loop(
            stream, outgoing_rx, events_tx, config, connected, shutdown,
        ));

        info!("connected to {addr}");
        Ok((handle, events_rx))
    }
}

/// Handle for submitting requests on a connection
#[derive(Clone)]
pub struct ConnectionHandle {
    tx: mpsc::Sender<String>,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
}

impl ConnectionHandle {
    /// Submit one request line for flow-controlled transmission
    pub async fn send(&self, line: String) -> Result<()> {
        if !*self.connected.lock() {
            return Err(TransportError::NotConnected);
        }
        self.tx
            .send(line)
            .await
            .map_err(|_| TransportError::SendFailed("connection task gone".into()))
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    /// Close the connection; the io task emits a final `Disconnected` event
    pub fn close(&self) {
        *self.connected.lock() = false;
        self.shutdown.notify_one();
    }
}

/// Outbound half of the wire with the one-in-flight policy.
///
/// `out_pending` counts requests submitted but not yet acknowledged,
/// transmitted or queued alike.
struct Wire<W> {
    writer: W,
    out_pending: usize,
    out_queue: VecDeque<String>,
}

impl<W: AsyncWrite + Unpin> Wire<W> {
    fn new(writer: W) -> Self {
        Self {
            writer,
            out_pending: 0,
            out_queue: VecDeque::new(),
        }
    }

    /// Transmit immediately if nothing is in flight, otherwise queue
    async fn submit(&mut self, line: &str) -> io::Result<()> {
        if self.out_pending == 0 {
            self.write_line(line).await?;
        } else {
            self.out_queue.push_back(line.to_string());
        }
        self.out_pending += 1;
        Ok(())
    }

    /// One acknowledgment arrived: drain one queued request, if any
    async fn acknowledge(&mut self) -> io::Result<()> {
        if let Some(line) = self.out_queue.pop_front() {
            self.write_line(&line).await?;
        }
        self.out_pending = self.out_pending.saturating_sub(1);
        Ok(())
    }

    async fn write_line(&mut self, line: &str) -> io::Result<()> {
        debug!(size = line.len(), "writing to transport: {line}");
        self.writer.write_all(line.as_bytes()).await?;
        self.writer.write_all(LINE_TERMINATOR.as_bytes()).await
    }
}

/// Split the accumulation buffer into complete messages. Nothing is emitted
/// until the buffer ends with the line terminator; then every non-empty
/// segment is emitted in arrival order and the buffer is reset.
fn drain_lines(buf: &mut BytesMut) -> Vec<String> {
    if !buf.ends_with(LINE_TERMINATOR.as_bytes()) {
        return Vec::new();
    }
    let data = buf.split();
    let text = String::from_utf8_lossy(&data);
    text.split(LINE_TERMINATOR)
        .filter(|segment| !segment.is_empty())
        .map(str::to_string)
        .collect()
}

async fn run_io_loop(
    stream: TcpStream,
    mut outgoing_rx: mpsc::Receiver<String>,
    events: mpsc::Sender<TransportEvent>,
    config: TransportConfig,
    connected: Arc<Mutex<bool>>,
    shutdown: Arc<Notify>,
) {
    use tokio::io::AsyncReadExt;

    let (mut reader, writer) = stream.into_split();
    let mut wire = Wire::new(writer);
    let mut read_buf = BytesMut::with_capacity(8192);
    let mut unacked_pings: u32 = 0;
    let mut reason: Option<String> = None;

    // no need for an immediate ping upon connection, so the first tick
    // fires one full interval in
    let mut heartbeat = time::interval_at(
        time::Instant::now() + config.heartbeat_interval,
        config.heartbeat_interval,
    );

    let _ = events.send(TransportEvent::Connected).await;

    'io: loop {
        tokio::select! {
            maybe = outgoing_rx.recv() => {
                match maybe {
                    Some(line) => {
                        if let Err(err) = wire.submit(&line).await {
                            error!("write error: {err}");
                            reason = Some(err.to_string());
                            break 'io;
                        }
                    }
                    None => break 'io,
                }
            }

            () = shutdown.notified() => {
                debug!("connection closed locally");
                break 'io;
            }

            _ = heartbeat.tick() => {
                if unacked_pings >= config.max_missed_pongs {
                    error!("heartbeat missed, closing connection");
                    reason = Some("heartbeat missed".to_string());
                    break 'io;
                }
                debug!("sending ping");
                if let Err(err) = wire.submit(PING).await {
                    reason = Some(err.to_string());
                    break 'io;
                }
                unacked_pings += 1;
            }

            result = reader.read_buf(&mut read_buf) => {
                match result {
                    Ok(0) => {
                        debug!("connection closed by peer");
                        break 'io;
                    }
                    Ok(_) => {
                        for line in drain_lines(&mut read_buf) {
                            // liveness replies bypass JSON parsing entirely
                            if line == PONG {
                                if let Err(err) = wire.acknowledge().await {
                                    reason = Some(err.to_string());
                                    break 'io;
                                }
                                unacked_pings = unacked_pings.saturating_sub(1);
                                debug!("ping acknowledged");
                                continue;
                            }
                            match Envelope::parse(&line) {
                                Ok(envelope) => {
                                    let acknowledged = envelope
                                        .response
                                        .as_deref()
                                        .is_some_and(|status| !status.is_empty());
                                    if acknowledged {
                                        if let Err(err) = wire.acknowledge().await {
                                            reason = Some(err.to_string());
                                            break 'io;
                                        }
                                    }
                                    if events.send(TransportEvent::Message(envelope)).await.is_err() {
                                        break 'io;
                                    }
                                }
                                Err(err) => warn!("dropping malformed message: {err}"),
                            }
                        }
                    }
                    Err(err) => {
                        error!("read error: {err}");
                        reason = Some(err.to_string());
                        break 'io;
                    }
                }
            }
        }
    }

    *connected.lock() = false;
    let _ = events.send(TransportEvent::Disconnected { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt as _, BufReader};
    use tokio::net::TcpListener;
    use tokio::time::{sleep, timeout};

    #[test]
    fn config_defaults() {
        let config = TransportConfig::default();
        assert_eq!(config.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(config.max_missed_pongs, 2);
        assert_eq!(config.keepalive_secs, 30);
    }

    #[test]
    fn drain_lines_waits_for_terminator() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"{\"a\":1}");
        assert!(drain_lines(&mut buf).is_empty());
        assert_eq!(&buf[..], b"{\"a\":1}");

        buf.extend_from_slice(b"\r\n");
        assert_eq!(drain_lines(&mut buf), vec!["{\"a\":1}".to_string()]);
        assert!(buf.is_empty());
    }

    #[test]
    fn drain_lines_splits_multiple_messages() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"first\r\nsecond\r\n");
        assert_eq!(
            drain_lines(&mut buf),
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[test]
    fn framing_is_boundary_insensitive() {
        let wire = b"{\"messageID\":\"1\"}\r\npong\r\n{\"messageID\":\"2\"}\r\n";

        let mut whole = BytesMut::new();
        whole.extend_from_slice(wire);
        let all_at_once = drain_lines(&mut whole);

        let mut incremental = Vec::new();
        let mut buf = BytesMut::new();
        for byte in wire {
            buf.extend_from_slice(&[*byte]);
            incremental.extend(drain_lines(&mut buf));
        }

        assert_eq!(all_at_once, incremental);
        assert_eq!(all_at_once.len(), 3);
    }

    #[tokio::test]
    async fn flow_control_queues_behind_first_request() {
        let mut wire = Wire::new(Vec::new());

        wire.submit("one").await.unwrap();
        wire.submit("two").await.unwrap();
        wire.submit("three").await.unwrap();

        assert_eq!(wire.out_pending, 3);
        assert_eq!(wire.out_queue.len(), 2);
        assert_eq!(wire.writer, b"one\r\n");

        wire.acknowledge().await.unwrap();
        assert_eq!(wire.out_pending, 2);
        assert_eq!(wire.writer, b"one\r\ntwo\r\n");

        wire.acknowledge().await.unwrap();
        assert_eq!(wire.out_pending, 1);
        assert_eq!(wire.writer, b"one\r\ntwo\r\nthree\r\n");

        wire.acknowledge().await.unwrap();
        assert_eq!(wire.out_pending, 0);
        assert!(wire.out_queue.is_empty());
    }

    #[tokio::test]
    async fn acknowledge_without_pending_is_harmless() {
        let mut wire = Wire::new(Vec::new());
        wire.acknowledge().await.unwrap();
        assert_eq!(wire.out_pending, 0);
        assert!(wire.writer.is_empty());
    }

    fn fast_config() -> TransportConfig {
        TransportConfig {
            heartbeat_interval: Duration::from_millis(50),
            keepalive_secs: 0,
            ..TransportConfig::default()
        }
    }

    #[tokio::test]
    async fn heartbeat_timeout_closes_connection_once() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let mut lines = BufReader::new(socket).lines();
            let mut pings = 0;
            while let Ok(Some(line)) = lines.next_line().await {
                if line == "ping" {
                    pings += 1;
                }
            }
            pings
        });

        let (_handle, mut events) = LineConnection::connect(&addr.to_string(), fast_config())
            .await
            .unwrap();

        assert!(matches!(
            events.recv().await,
            Some(TransportEvent::Connected)
        ));

        let disconnected = timeout(Duration::from_secs(2), events.recv())
            .await
            .expect("expected disconnect within two seconds");
        match disconnected {
            Some(TransportEvent::Disconnected { reason }) => {
                assert_eq!(reason.as_deref(), Some("heartbeat missed"));
            }
            other => panic!("expected Disconnected, got {other:?}"),
        }
        assert!(events.recv().await.is_none());

        // the second ping stays queued behind the unacknowledged first one
        let pings = server.await.unwrap();
        assert_eq!(pings, 1);
    }

    #[tokio::test]
    async fn pong_keeps_connection_alive() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            let (read_half, mut write_half) = socket.into_split();
            let mut lines = BufReader::new(read_half).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line == "ping" {
                    write_half.write_all(b"pong\r\n").await.unwrap();
                }
            }
        });

        let (handle, mut events) = LineConnection::connect(&addr.to_string(), fast_config())
            .await
            .unwrap();
        events.recv().await; // Connected

        // several heartbeat intervals pass without a disconnect
        let quiet = timeout(Duration::from_millis(400), events.recv()).await;
        assert!(quiet.is_err(), "connection should stay up: {quiet:?}");
        assert!(handle.is_connected());

        handle.close();
    }

    #[tokio::test]
    async fn one_request_on_the_wire_at_a_time() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = TransportConfig {
            heartbeat_interval: Duration::from_secs(60),
            keepalive_secs: 0,
            ..TransportConfig::default()
        };
        let (handle, mut events) = LineConnection::connect(&addr.to_string(), config)
            .await
            .unwrap();
        events.recv().await; // Connected

        let (socket, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = socket.into_split();
        let mut lines = BufReader::new(read_half).lines();

        handle
            .send(r#"{"messageID":"1","command":"A"}"#.to_string())
            .await
            .unwrap();
        handle
            .send(r#"{"messageID":"2","command":"B"}"#.to_string())
            .await
            .unwrap();
        handle
            .send(r#"{"messageID":"3","command":"C"}"#.to_string())
            .await
            .unwrap();

        let first = lines.next_line().await.unwrap().unwrap();
        assert!(first.contains("\"1\""));

        // nothing else arrives until the first request is acknowledged
        let pending = timeout(Duration::from_millis(100), lines.next_line()).await;
        assert!(pending.is_err());

        write_half
            .write_all(b"{\"messageID\":\"1\",\"command\":\"A\",\"response\":\"200\"}\r\n")
            .await
            .unwrap();

        let second = lines.next_line().await.unwrap().unwrap();
        assert!(second.contains("\"2\""));

        write_half
            .write_all(b"{\"messageID\":\"2\",\"command\":\"B\",\"response\":\"400\"}\r\n")
            .await
            .unwrap();

        let third = lines.next_line().await.unwrap().unwrap();
        assert!(third.contains("\"3\""));

        handle.close();
    }

    #[tokio::test]
    async fn malformed_lines_are_dropped() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let config = TransportConfig {
            heartbeat_interval: Duration::from_secs(60),
            keepalive_secs: 0,
            ..TransportConfig::default()
        };
        let (handle, mut events) = LineConnection::connect(&addr.to_string(), config)
            .await
            .unwrap();
        events.recv().await; // Connected

        let (socket, _) = listener.accept().await.unwrap();
        let (_read_half, mut write_half) = socket.into_split();

        write_half.write_all(b"not json at all\r\n").await.unwrap();
        write_half
            .write_all(b"{\"messageID\":\"9\",\"command\":\"NotifyList\"}\r\n")
            .await
            .unwrap();

        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(TransportEvent::Message(envelope)) => {
                assert_eq!(envelope.message_id, "9");
            }
            other => panic!("expected the well-formed message, got {other:?}"),
        }

        handle.close();
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            sleep(Duration::from_secs(1)).await;
        });

        let (handle, mut events) = LineConnection::connect(&addr.to_string(), fast_config())
            .await
            .unwrap();
        events.recv().await; // Connected

        handle.close();
        let result = handle.send("x".to_string()).await;
        assert!(matches!(result, Err(TransportError::NotConnected)));

        match timeout(Duration::from_secs(1), events.recv()).await.unwrap() {
            Some(TransportEvent::Disconnected { reason }) => assert!(reason.is_none()),
            other => panic!("expected Disconnected, got {other:?}"),
        }
    }
}
