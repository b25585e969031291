//! Per-socket connection state.
//!
//! A [`Connection`] owns the sending half of its outbound frame buffer; the
//! write pump owns the receiving half. Closing the connection drops the
//! sender, which lets the write pump drain what is queued and then observe
//! the end of the channel.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::time::Duration;

use huddle_core::{ConnectionId, Envelope, UserId};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::warn;

/// A serialized frame, shared across every recipient of a broadcast.
pub type Frame = Arc<str>;

/// Lifecycle of a connection.
///
/// `Connecting → Registered → Joined ⇄ Registered → Unregistering → Closed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Created, not yet known to the registry.
    Connecting = 0,
    /// Registered, in no room.
    Registered = 1,
    /// Member of at least one room.
    Joined = 2,
    /// Being torn down.
    Unregistering = 3,
    /// Terminal.
    Closed = 4,
}

impl ConnectionState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Connecting,
            1 => Self::Registered,
            2 => Self::Joined,
            3 => Self::Unregistering,
            _ => Self::Closed,
        }
    }
}

/// Result of a non-blocking send.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    /// Frame queued.
    Delivered,
    /// Buffer full; the frame was dropped.
    Full,
    /// Connection already closed.
    Closed,
}

/// One live client session.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    outbound: Mutex<Option<mpsc::Sender<Frame>>>,
    state: AtomicU8,
    closed: CancellationToken,
    connected_at: Instant,
    last_pong: Mutex<Instant>,
    dropped_messages: AtomicU64,
}

impl Connection {
    /// Create a connection for `user_id` with an outbound buffer of
    /// `capacity` frames. Returns the receiving half for the write pump.
    pub fn new(user_id: UserId, capacity: usize) -> (Self, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let now = Instant::now();
        let conn = Self {
            id: ConnectionId::new(),
            user_id,
            outbound: Mutex::new(Some(tx)),
            state: AtomicU8::new(ConnectionState::Connecting as u8),
            closed: CancellationToken::new(),
            connected_at: now,
            last_pong: Mutex::new(now),
            dropped_messages: AtomicU64::new(0),
        };
        (conn, rx)
    }

    /// Connection id.
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Owning user.
    pub fn user_id(&self) -> UserId {
        self.user_id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        ConnectionState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Move to `state`. `Closed` is terminal and never left.
    pub(crate) fn set_state(&self, state: ConnectionState) {
        let closed = ConnectionState::Closed as u8;
        let _ = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current != closed).then_some(state as u8)
            });
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: Frame) -> SendOutcome {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return SendOutcome::Closed;
        };
        match tx.try_send(frame) {
            Ok(()) => SendOutcome::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                let _ = self.dropped_messages.fetch_add(1, Ordering::Relaxed);
                SendOutcome::Full
            }
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Closed,
        }
    }

    /// Serialize an envelope and queue it for this connection only.
    pub fn send_envelope(&self, envelope: &Envelope) -> SendOutcome {
        match envelope.to_json() {
            Ok(json) => self.try_send(Frame::from(json)),
            Err(e) => {
                warn!(conn_id = %self.id, error = %e, "failed to serialize envelope");
                SendOutcome::Closed
            }
        }
    }

    /// Close the outbound buffer and signal [`Connection::closed`].
    ///
    /// Returns `true` only for the call that actually closed it.
    pub fn close(&self) -> bool {
        let sender = self.outbound.lock().take();
        self.set_state(ConnectionState::Closed);
        self.closed.cancel();
        sender.is_some()
    }

    /// Whether [`Connection::close`] has run.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed.
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Record a pong (or any sign of life).
    pub fn mark_alive(&self) {
        *self.last_pong.lock() = Instant::now();
    }

    /// Time since the last pong, or since the connection opened if none
    /// has arrived yet. Reported per member in room status.
    pub fn last_pong_elapsed(&self) -> Duration {
        self.last_pong.lock().elapsed()
    }

    /// Frames dropped because the buffer was full. Logged on eviction.
    pub fn drop_count(&self) -> u64 {
        self.dropped_messages.load(Ordering::Relaxed)
    }

    /// Connection age.
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
