//! Read and write pumps of one WebSocket connection.
//!
//! Both are generic over the socket halves so they can be driven by an
//! in-memory channel in tests.

use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::Message;
use futures::{Sink, SinkExt, Stream, StreamExt};
use huddle_core::{Envelope, HubError, RoomId};
use huddle_hub::{Connection, Frame, Hub};
use metrics::counter;
use tokio::sync::mpsc;
use tokio::time::{Instant, timeout, timeout_at};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::WS_INVALID_FRAMES_TOTAL;

/// Why the read pump stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReadEnd {
    /// Client sent a close frame or the stream ended.
    ClientClosed,
    /// No pong within the idle deadline.
    Idle,
    /// Transport error (includes oversize frames).
    Transport(String),
    /// The hub closed the connection (eviction).
    Evicted,
    /// Server shutdown.
    Shutdown,
}

impl ReadEnd {
    /// Metric label.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClientClosed => "client_closed",
            Self::Idle => "idle",
            Self::Transport(_) => "transport",
            Self::Evicted => "evicted",
            Self::Shutdown => "shutdown",
        }
    }
}

/// Why the write pump stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteEnd {
    /// Outbound buffer closed; a close frame was sent.
    Drained,
    /// A write failed.
    Transport(String),
    /// A write missed its deadline.
    Timeout,
}

/// Read frames until the client goes away, the idle deadline passes, the
/// hub closes the connection or `shutdown` fires.
///
/// Every text frame is parsed as an envelope and submitted to the hub
/// without waiting. Only pongs refresh the idle deadline.
pub async fn read_pump<S, E>(
    mut stream: S,
    hub: &Hub,
    conn: &Arc<Connection>,
    pong_wait: Duration,
    shutdown: &CancellationToken,
) -> ReadEnd
where
    S: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut deadline = Instant::now() + pong_wait;
    loop {
        let next = tokio::select! {
            () = conn.closed() => return ReadEnd::Evicted,
            () = shutdown.cancelled() => return ReadEnd::Shutdown,
            next = timeout_at(deadline, stream.next()) => next,
        };
        let message = match next {
            Err(_) => return ReadEnd::Idle,
            Ok(None) => return ReadEnd::ClientClosed,
            Ok(Some(Err(e))) => return ReadEnd::Transport(e.to_string()),
            Ok(Some(Ok(message))) => message,
        };

        let text = match message {
            Message::Text(text) => text.to_string(),
            Message::Binary(data) => match String::from_utf8(data.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    reject_frame(conn, "non-utf8 binary frame");
                    continue;
                }
            },
            Message::Pong(_) => {
                conn.mark_alive();
                deadline = Instant::now() + pong_wait;
                continue;
            }
            Message::Ping(_) => continue,
            Message::Close(_) => return ReadEnd::ClientClosed,
        };

        match Envelope::from_json(&text) {
            Ok(envelope) => {
                if let Err(e) = hub.submit(envelope, conn) {
                    debug!(conn_id = %conn.id(), error = %e, "envelope not queued");
                }
            }
            Err(e) => reject_frame(conn, &e.to_string()),
        }
    }
}

fn reject_frame(conn: &Connection, reason: &str) {
    debug!(conn_id = %conn.id(), reason, "unparsable frame");
    counter!(WS_INVALID_FRAMES_TOTAL).increment(1);
    let err = HubError::InvalidEnvelope("Invalid message format".into());
    let _ = conn.send_envelope(&Envelope::error(RoomId::default(), err.client_message()));
}

/// Forward outbound frames to the socket and ping every `ping_period`.
///
/// Each write must finish within `write_wait`. When the outbound buffer is
/// closed the pump sends a close frame and returns.
pub async fn write_pump<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Frame>,
    ping_period: Duration,
    write_wait: Duration,
) -> WriteEnd
where
    W: Sink<Message> + Unpin,
    W::Error: Display,
{
    let mut ping = tokio::time::interval(ping_period);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        let message = tokio::select! {
            frame = outbound.recv() => match frame {
                Some(frame) => Message::text(frame.to_string()),
                None => {
                    let _ = timeout(write_wait, sink.send(Message::Close(None))).await;
                    return WriteEnd::Drained;
                }
            },
            _ = ping.tick() => Message::Ping(Vec::new().into()),
        };
        match timeout(write_wait, sink.send(message)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return WriteEnd::Transport(e.to_string()),
            Err(_) => return WriteEnd::Timeout,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::channel::mpsc as fmpsc;
    use huddle_core::ports::{MockMembershipOracle, MockMessageStore};
    use huddle_core::{EnvelopeKind, UserId};
    use huddle_hub::HubConfig;

    use super::*;

    const PONG_WAIT: Duration = Duration::from_secs(60);

    fn hub() -> Hub {
        let mut oracle = MockMembershipOracle::new();
        let _ = oracle.expect_is_member().returning(|_, _| Ok(true));
        let (hub, _tasks) = Hub::start(
            HubConfig::default(),
            Arc::new(oracle),
            Arc::new(MockMessageStore::new()),
            CancellationToken::new(),
        );
        hub
    }

    type Inbound = fmpsc::UnboundedSender<Result<Message, String>>;

    fn socket() -> (Inbound, fmpsc::UnboundedReceiver<Result<Message, String>>) {
        fmpsc::unbounded()
    }

    #[tokio::test(start_paused = true)]
    async fn idle_deadline_ends_read_pump() {
        let hub = hub();
        let (conn, _rx) = hub.connect(UserId::random()).unwrap();
        let (_client, stream) = socket();
        let end = read_pump(stream, &hub, &conn, PONG_WAIT, &CancellationToken::new()).await;
        assert_eq!(end, ReadEnd::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn pong_refreshes_deadline_but_text_does_not() {
        let hub = hub();
        let (conn, _rx) = hub.connect(UserId::random()).unwrap();
        let (client, stream) = socket();
        let shutdown = CancellationToken::new();

        let pump = {
            let hub = hub.clone();
            let conn = Arc::clone(&conn);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { read_pump(stream, &hub, &conn, PONG_WAIT, &shutdown).await })
        };

        tokio::time::sleep(Duration::from_secs(50)).await;
        client.unbounded_send(Ok(Message::Pong(Vec::new().into()))).unwrap();
        tokio::time::sleep(Duration::from_secs(50)).await;
        assert!(!pump.is_finished());

        client
            .unbounded_send(Ok(Message::text(r#"{"type":"typing","room_id":1}"#.to_owned())))
            .unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert_eq!(pump.await.unwrap(), ReadEnd::Idle);
    }

    #[tokio::test]
    async fn invalid_frame_gets_error_envelope() {
        let hub = hub();
        let (conn, mut rx) = hub.connect(UserId::random()).unwrap();
        let (client, stream) = socket();
        client.unbounded_send(Ok(Message::text("not json".to_owned()))).unwrap();
        drop(client);

        let end = read_pump(stream, &hub, &conn, PONG_WAIT, &CancellationToken::new()).await;
        assert_eq!(end, ReadEnd::ClientClosed);

        let reply = Envelope::from_json(&rx.recv().await.unwrap()).unwrap();
        assert_eq!(reply.kind, EnvelopeKind::Error);
        assert_eq!(reply.content.as_deref(), Some("Invalid message format"));
    }

    #[tokio::test]
    async fn eviction_and_shutdown_end_read_pump() {
        let hub = hub();
        let (conn, _rx) = hub.connect(UserId::random()).unwrap();
        let (_client, stream) = socket();
        let _ = hub.disconnect(conn.id());
        assert_eq!(
            read_pump(stream, &hub, &conn, PONG_WAIT, &CancellationToken::new()).await,
            ReadEnd::Evicted
        );

        let (conn, _rx) = hub.connect(UserId::random()).unwrap();
        let (_client, stream) = socket();
        let shutdown = CancellationToken::new();
        shutdown.cancel();
        assert_eq!(
            read_pump(stream, &hub, &conn, PONG_WAIT, &shutdown).await,
            ReadEnd::Shutdown
        );
    }

    #[tokio::test]
    async fn transport_error_ends_read_pump() {
        let hub = hub();
        let (conn, _rx) = hub.connect(UserId::random()).unwrap();
        let (client, stream) = socket();
        client.unbounded_send(Err("frame too large".into())).unwrap();
        assert_eq!(
            read_pump(stream, &hub, &conn, PONG_WAIT, &CancellationToken::new()).await,
            ReadEnd::Transport("frame too large".into())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn write_pump_forwards_pings_and_closes() {
        let (tx, outbound) = mpsc::channel::<Frame>(8);
        let (sink, mut wire) = fmpsc::unbounded::<Message>();
        let pump = tokio::spawn(write_pump(
            sink,
            outbound,
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));

        tx.send(Frame::from("one")).await.unwrap();
        assert_eq!(wire.next().await.unwrap(), Message::text("one".to_owned()));

        tokio::time::sleep(Duration::from_secs(31)).await;
        assert!(matches!(wire.next().await.unwrap(), Message::Ping(_)));

        drop(tx);
        assert_eq!(pump.await.unwrap(), WriteEnd::Drained);
        assert!(matches!(wire.next().await.unwrap(), Message::Close(None)));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_times_out() {
        let (tx, outbound) = mpsc::channel::<Frame>(8);
        // Bounded sink with no reader: the second send never completes.
        let (sink, _wire) = fmpsc::channel::<Message>(0);
        let pump = tokio::spawn(write_pump(
            sink,
            outbound,
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        for i in 0..3 {
            tx.send(Frame::from(format!("m{i}"))).await.unwrap();
        }
        assert_eq!(pump.await.unwrap(), WriteEnd::Timeout);
    }

    #[tokio::test]
    async fn failed_write_ends_pump() {
        let (tx, outbound) = mpsc::channel::<Frame>(8);
        let (sink, wire) = fmpsc::unbounded::<Message>();
        drop(wire);
        let pump = tokio::spawn(write_pump(
            sink,
            outbound,
            Duration::from_secs(30),
            Duration::from_secs(10),
        ));
        tx.send(Frame::from("lost")).await.unwrap();
        assert!(matches!(pump.await.unwrap(), WriteEnd::Transport(_)));
    }
}
