//! The hub façade: connection lifecycle, room operations and inbound
//! dispatch wired together.

use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use huddle_core::{
    ConnectionId, Envelope, EnvelopeKind, HubError, MemberAction, MembershipOracle, MessageStore,
    RoomId, StoredMessage, UserId,
};
use metrics::{counter, gauge, histogram};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broadcaster::RoomBroadcaster;
use crate::connection::{Connection, Frame};
use crate::dispatcher::{InboundHandler, InboundQueue, InboundTask, WorkerPool};
use crate::membership_cache::{CachedMembership, MembershipCache};
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, CONNECTIONS_OPENED_TOTAL,
    DUPLICATE_EVICTIONS_TOTAL, ENVELOPE_DURATION_SECONDS, MESSAGES_SENT_TOTAL,
};
use crate::registry::{JoinOutcome, LeaveOutcome, Registry, RoomStatus};

/// Longest message [`Hub::post_message`] accepts, in characters.
pub const MAX_POSTED_CHARS: usize = 2000;

/// Sizing and timing of a [`Hub`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HubConfig {
    /// Outbound frames buffered per connection.
    pub client_buffer_size: usize,
    /// Envelopes buffered per room pipeline.
    pub room_queue_size: usize,
    /// Envelopes buffered in front of the worker pool.
    pub inbound_queue_size: usize,
    /// Worker count.
    pub max_workers: usize,
    /// How long a membership answer stays cached.
    pub membership_ttl: Duration,
    /// How often expired cache entries are swept.
    pub membership_sweep: Duration,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            client_buffer_size: 256,
            room_queue_size: 1000,
            inbound_queue_size: 1000,
            max_workers: 10,
            membership_ttl: Duration::from_secs(300),
            membership_sweep: Duration::from_secs(600),
        }
    }
}

/// Background tasks started by [`Hub::start`].
pub struct HubTasks {
    /// Inbound workers.
    pub workers: WorkerPool,
    /// Membership cache sweeper.
    pub sweeper: JoinHandle<()>,
}

impl HubTasks {
    /// Every handle, for a graceful shutdown.
    pub fn into_handles(self) -> Vec<JoinHandle<()>> {
        let mut handles = self.workers.into_handles();
        handles.push(self.sweeper);
        handles
    }
}

struct HubInner {
    config: HubConfig,
    registry: Arc<Registry>,
    broadcaster: RoomBroadcaster,
    cache: Arc<MembershipCache>,
    membership: CachedMembership<dyn MembershipOracle>,
    store: Arc<dyn MessageStore>,
    inbound: InboundQueue,
}

/// Cheaply cloneable handle to the running hub.
#[derive(Clone)]
pub struct Hub {
    inner: Arc<HubInner>,
}

struct HubWorker {
    hub: Weak<HubInner>,
}

#[async_trait]
impl InboundHandler for HubWorker {
    async fn handle(&self, task: InboundTask) {
        let Some(inner) = self.hub.upgrade() else {
            return;
        };
        Hub { inner }
            .handle_envelope(task.envelope, &task.connection)
            .await;
    }
}

impl Hub {
    /// Build the hub and start its worker pool and cache sweeper.
    ///
    /// Workers stop when `cancel` fires or the last [`Hub`] clone is dropped.
    pub fn start(
        config: HubConfig,
        oracle: Arc<dyn MembershipOracle>,
        store: Arc<dyn MessageStore>,
        cancel: CancellationToken,
    ) -> (Self, HubTasks) {
        let registry = Arc::new(Registry::new());
        let cache = Arc::new(MembershipCache::new(config.membership_ttl));
        let (inbound, inbound_rx) = InboundQueue::new(config.inbound_queue_size);

        let inner = Arc::new(HubInner {
            broadcaster: RoomBroadcaster::new(Arc::clone(&registry), config.room_queue_size),
            membership: CachedMembership::new(Arc::clone(&cache), oracle),
            registry,
            cache: Arc::clone(&cache),
            store,
            inbound,
            config,
        });

        let handler = Arc::new(HubWorker {
            hub: Arc::downgrade(&inner),
        });
        let workers = WorkerPool::spawn(inner.config.max_workers, inbound_rx, handler, cancel.clone());
        let sweeper = cache.spawn_sweeper(inner.config.membership_sweep, cancel);

        info!(
            workers = workers.len(),
            client_buffer = inner.config.client_buffer_size,
            room_queue = inner.config.room_queue_size,
            "hub started"
        );
        (Self { inner }, HubTasks { workers, sweeper })
    }

    /// Register a new connection for an authenticated user.
    ///
    /// Returns the connection and the receiving half of its outbound buffer.
    pub fn connect(&self, user: UserId) -> huddle_core::Result<(Arc<Connection>, mpsc::Receiver<Frame>)> {
        if user.is_nil() {
            return Err(HubError::Unauthorized("missing user identity".into()));
        }
        let (conn, rx) = Connection::new(user, self.inner.config.client_buffer_size);
        let conn = Arc::new(conn);
        self.inner.registry.register(&conn)?;

        counter!(CONNECTIONS_OPENED_TOTAL).increment(1);
        self.record_active();
        info!(conn_id = %conn.id(), user_id = %user, "client connected");
        Ok((conn, rx))
    }

    /// Tear down a connection. Safe to call more than once; returns whether
    /// this call removed it.
    pub fn disconnect(&self, id: &ConnectionId) -> bool {
        let Some(gone) = self.inner.registry.unregister(id) else {
            debug!(conn_id = %id, "disconnect of unregistered connection");
            return false;
        };
        counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
        self.record_active();
        info!(
            conn_id = %id,
            user_id = %gone.connection.user_id(),
            rooms = gone.rooms.len(),
            torn_down = gone.torn_down.len(),
            "client disconnected"
        );
        true
    }

    /// Hand an envelope to the worker pool without waiting.
    pub fn submit(&self, envelope: Envelope, connection: &Arc<Connection>) -> huddle_core::Result<()> {
        self.inner.inbound.submit(InboundTask {
            envelope,
            connection: Arc::clone(connection),
        })
    }

    /// Run one client envelope to completion. Failures are reported to the
    /// sender as an `error` envelope.
    pub async fn handle_envelope(&self, envelope: Envelope, conn: &Arc<Connection>) {
        let started = Instant::now();
        let kind = envelope.kind;
        let room = envelope.target_room();

        let result = match (kind, room) {
            (EnvelopeKind::JoinRoom, Some(room)) => self.join_room(room, conn).await.map(drop),
            (EnvelopeKind::LeaveRoom, Some(room)) => {
                let _ = self.leave_room(room, conn);
                Ok(())
            }
            (EnvelopeKind::SendMessage, Some(room)) => self
                .send_message(room, conn, envelope.content.unwrap_or_default())
                .await
                .map(drop),
            (EnvelopeKind::JoinRoom | EnvelopeKind::LeaveRoom | EnvelopeKind::SendMessage, None) => {
                Err(HubError::InvalidEnvelope("room_id is required".into()))
            }
            (other, _) => {
                debug!(conn_id = %conn.id(), kind = other.as_str(), "ignoring envelope");
                Ok(())
            }
        };

        if let Err(e) = result {
            match &e {
                HubError::Upstream { .. } => {
                    warn!(conn_id = %conn.id(), kind = kind.as_str(), error = %e, "envelope failed");
                }
                _ => debug!(conn_id = %conn.id(), kind = kind.as_str(), error = %e, "envelope rejected"),
            }
            let _ = conn.send_envelope(&Envelope::error(room.unwrap_or_default(), e.client_message()));
        }

        histogram!(ENVELOPE_DURATION_SECONDS, "kind" => kind.as_str())
            .record(started.elapsed().as_secs_f64());
    }

    /// Subscribe `conn` to `room` after checking membership.
    ///
    /// A different connection of the same user already in `room` is
    /// unregistered first.
    pub async fn join_room(&self, room: RoomId, conn: &Arc<Connection>) -> huddle_core::Result<JoinOutcome> {
        let user = conn.user_id();
        if !self.inner.membership.is_member(user, room).await? {
            return Err(HubError::NotAMember {
                room_id: room,
                action: MemberAction::Join,
            });
        }

        let outcome = self.inner.registry.join(room, conn)?;
        if let Some(evicted) = &outcome.evicted {
            info!(
                conn_id = %evicted.connection.id(),
                replaced_by = %conn.id(),
                user_id = %user,
                room_id = %room,
                "evicted duplicate connection"
            );
            counter!(DUPLICATE_EVICTIONS_TOTAL).increment(1);
            counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
            self.record_active();
        }

        let _ = conn.send_envelope(&Envelope::room_response(room, user, "joined"));
        if !outcome.already_member {
            let _ = self.inner.broadcaster.enqueue(Envelope::user_joined(room, user));
            debug!(conn_id = %conn.id(), user_id = %user, room_id = %room, "joined room");
        }
        Ok(outcome)
    }

    /// Unsubscribe `conn` from `room`.
    pub fn leave_room(&self, room: RoomId, conn: &Arc<Connection>) -> LeaveOutcome {
        let user = conn.user_id();
        let outcome = self.inner.registry.leave(room, conn.id());
        let _ = conn.send_envelope(&Envelope::room_response(room, user, "left"));
        if outcome.was_member {
            let _ = self.inner.broadcaster.enqueue(Envelope::user_left(room, user));
            debug!(conn_id = %conn.id(), user_id = %user, room_id = %room, "left room");
        }
        outcome
    }

    /// Persist a chat message and broadcast it to the room.
    ///
    /// Only connections that joined `room` may send; the store is not
    /// touched otherwise.
    pub async fn send_message(
        &self,
        room: RoomId,
        conn: &Arc<Connection>,
        content: String,
    ) -> huddle_core::Result<StoredMessage> {
        if !self.inner.registry.is_member(room, conn.id()) {
            return Err(HubError::NotAMember {
                room_id: room,
                action: MemberAction::Send,
            });
        }
        if content.trim().is_empty() {
            return Err(HubError::InvalidEnvelope("Message content is required".into()));
        }
        self.publish(room, conn.user_id(), content).await
    }

    /// Post a message on behalf of `user` without a live connection.
    ///
    /// Membership comes from the cached oracle rather than the room index,
    /// so the author does not need to have joined over a socket. Joined
    /// members receive it as a `new_message` like any other.
    pub async fn post_message(
        &self,
        room: RoomId,
        user: UserId,
        content: String,
    ) -> huddle_core::Result<StoredMessage> {
        if content.trim().is_empty() {
            return Err(HubError::InvalidEnvelope("Message content is required".into()));
        }
        if content.chars().count() > MAX_POSTED_CHARS {
            return Err(HubError::InvalidEnvelope(format!(
                "Message content exceeds {MAX_POSTED_CHARS} characters"
            )));
        }
        if !self.inner.membership.is_member(user, room).await? {
            return Err(HubError::NotAMember {
                room_id: room,
                action: MemberAction::Join,
            });
        }
        self.publish(room, user, content).await
    }

    async fn publish(
        &self,
        room: RoomId,
        author: UserId,
        content: String,
    ) -> huddle_core::Result<StoredMessage> {
        let stored = self.inner.store.persist(room, author, content).await?;
        counter!(MESSAGES_SENT_TOTAL).increment(1);
        let _ = self.inner.broadcaster.enqueue(Envelope::new_message(
            room,
            stored.author_id,
            stored.id,
            stored.content.clone(),
            stored.created_at,
        ));
        Ok(stored)
    }

    /// Recent messages of `room` for a member, newest first.
    pub async fn history(
        &self,
        room: RoomId,
        user: UserId,
        limit: u32,
        offset: u32,
    ) -> huddle_core::Result<Vec<StoredMessage>> {
        if !self.inner.membership.is_member(user, room).await? {
            return Err(HubError::NotAMember {
                room_id: room,
                action: MemberAction::Join,
            });
        }
        self.inner.store.history(room, limit, offset).await
    }

    /// Remove `user`'s live connection from `room`, if it has one.
    ///
    /// Returns whether a connection was removed.
    pub fn kick(&self, user: UserId, room: RoomId) -> bool {
        let Some(conn) = self.inner.registry.connection_for(user, room) else {
            return false;
        };
        let outcome = self.inner.registry.leave(room, conn.id());
        if outcome.was_member {
            let _ = conn.send_envelope(&Envelope::room_response(room, user, "removed"));
            let _ = self.inner.broadcaster.enqueue(Envelope::user_left(room, user));
            info!(conn_id = %conn.id(), user_id = %user, room_id = %room, "removed from room");
        }
        outcome.was_member
    }

    /// Operator snapshot of `room`.
    pub fn room_status(&self, room: RoomId) -> RoomStatus {
        self.inner.registry.room_status(room)
    }

    /// Forget the cached membership answer for `(user, room)`.
    pub fn invalidate_membership(&self, user: UserId, room: RoomId) {
        self.inner.cache.invalidate(user, room);
    }

    /// Registered connections.
    pub fn connection_count(&self) -> usize {
        self.inner.registry.connection_count()
    }

    /// Rooms with at least one member.
    pub fn room_count(&self) -> usize {
        self.inner.registry.room_count()
    }

    /// Free slots in the inbound queue; zero means submits are being refused.
    pub fn inbound_headroom(&self) -> usize {
        self.inner.inbound.remaining()
    }

    /// The registry backing this hub.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.inner.registry
    }

    /// The membership cache backing this hub.
    pub fn cache(&self) -> &Arc<MembershipCache> {
        &self.inner.cache
    }

    /// Active configuration.
    pub fn config(&self) -> &HubConfig {
        &self.inner.config
    }

    fn record_active(&self) {
        gauge!(CONNECTIONS_ACTIVE).set(self.inner.registry.connection_count() as f64);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
