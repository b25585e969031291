//! Ordered per-room fan-out.
//!
//! Each room with members owns one bounded queue and one drain task. The
//! drain task serializes each envelope once and offers the frame to every
//! member without waiting. A member whose buffer is full is unregistered on
//! the spot; it never holds up the rest of the room.

use std::sync::Arc;

use huddle_core::{Envelope, HubError, RoomId};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::connection::{Frame, SendOutcome};
use crate::metrics::{
    CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED_TOTAL, ROOM_INLINE_DELIVERIES_TOTAL,
    ROOM_PIPELINES_STARTED_TOTAL, SLOW_CONSUMER_EVICTIONS_TOTAL,
};
use crate::registry::{PipelineSender, Registry};

/// How [`RoomBroadcaster::enqueue`] handled an envelope.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Queued on the room pipeline.
    Queued,
    /// Pipeline saturated; delivered in the caller's task instead.
    DeliveredInline,
    /// The room has no members.
    NoRoom,
}

/// Result of delivering one envelope to a room.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Members the frame was queued for.
    pub delivered: usize,
    /// Members evicted as slow consumers.
    pub evicted: usize,
}

/// Routes envelopes into per-room pipelines.
pub struct RoomBroadcaster {
    registry: Arc<Registry>,
    queue_size: usize,
}

impl RoomBroadcaster {
    /// Create a broadcaster whose room queues hold `queue_size` envelopes.
    pub fn new(registry: Arc<Registry>, queue_size: usize) -> Self {
        Self {
            registry,
            queue_size: queue_size.max(1),
        }
    }

    /// Queue `envelope` for every member of `envelope.room_id`.
    pub fn enqueue(&self, envelope: Envelope) -> EnqueueOutcome {
        let room = envelope.room_id;
        let Some((tx, epoch)) = self.registry.pipeline(room, |epoch| {
            spawn_pipeline(Arc::clone(&self.registry), room, epoch, self.queue_size)
        }) else {
            debug!(room_id = %room, kind = envelope.kind.as_str(), "no members, dropping broadcast");
            return EnqueueOutcome::NoRoom;
        };

        match tx.try_send(envelope) {
            Ok(()) => EnqueueOutcome::Queued,
            Err(mpsc::error::TrySendError::Full(envelope)) => {
                warn!(room_id = %room, "room queue full, delivering inline");
                counter!(ROOM_INLINE_DELIVERIES_TOTAL).increment(1);
                let _ = deliver(&self.registry, room, epoch, &envelope);
                EnqueueOutcome::DeliveredInline
            }
            Err(mpsc::error::TrySendError::Closed(envelope)) => {
                let _ = deliver(&self.registry, room, epoch, &envelope);
                EnqueueOutcome::DeliveredInline
            }
        }
    }
}

fn spawn_pipeline(
    registry: Arc<Registry>,
    room: RoomId,
    epoch: u64,
    queue_size: usize,
) -> PipelineSender {
    let (tx, mut rx) = mpsc::channel::<Envelope>(queue_size);
    counter!(ROOM_PIPELINES_STARTED_TOTAL).increment(1);
    debug!(room_id = %room, epoch, "room pipeline started");
    drop(tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            let _ = deliver(&registry, room, epoch, &envelope);
        }
        debug!(room_id = %room, epoch, "room pipeline drained");
    }));
    tx
}

/// Deliver one envelope to the current members of `room`.
///
/// Nothing is delivered if the room has been torn down since `epoch`.
pub fn deliver(registry: &Registry, room: RoomId, epoch: u64, envelope: &Envelope) -> Delivery {
    let Some(members) = registry.room_snapshot(room, epoch) else {
        debug!(room_id = %room, epoch, "room gone, discarding envelope");
        return Delivery::default();
    };
    let frame: Frame = match envelope.to_json() {
        Ok(json) => Frame::from(json),
        Err(e) => {
            warn!(room_id = %room, error = %e, "failed to serialize envelope");
            return Delivery::default();
        }
    };

    let mut report = Delivery::default();
    let mut slow = Vec::new();
    for conn in &members {
        match conn.try_send(Arc::clone(&frame)) {
            SendOutcome::Delivered => report.delivered += 1,
            SendOutcome::Full => slow.push((conn.id().clone(), conn.drop_count())),
            SendOutcome::Closed => {}
        }
    }

    for (id, dropped) in slow {
        let err = HubError::SlowConsumer(id.clone());
        warn!(conn_id = %id, room_id = %room, dropped, error = %err, "evicting slow consumer");
        counter!(SLOW_CONSUMER_EVICTIONS_TOTAL).increment(1);
        if registry.unregister(&id).is_some() {
            counter!(CONNECTIONS_CLOSED_TOTAL).increment(1);
            report.evicted += 1;
        }
    }
    if report.evicted > 0 {
        gauge!(CONNECTIONS_ACTIVE).set(registry.connection_count() as f64);
    }
    report
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use huddle_core::UserId;

    use super::*;
    use crate::connection::Connection;

    fn join(
        registry: &Registry,
        room: RoomId,
        capacity: usize,
    ) -> (Arc<Connection>, mpsc::Receiver<Frame>) {
        let (conn, rx) = Connection::new(UserId::random(), capacity);
        let conn = Arc::new(conn);
        registry.register(&conn).unwrap();
        let _ = registry.join(room, &conn).unwrap();
        (conn, rx)
    }

    fn tagged(room: RoomId, tag: usize) -> Envelope {
        Envelope {
            content: Some(format!("m{tag}")),
            ..Envelope::new(huddle_core::EnvelopeKind::NewMessage, room)
        }
    }

    fn drain_tags(rx: &mut mpsc::Receiver<Frame>) -> Vec<String> {
        let mut tags = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            tags.push(Envelope::from_json(&frame).unwrap().content.unwrap());
        }
        tags
    }

    #[tokio::test]
    async fn every_member_sees_enqueue_order() {
        let registry = Arc::new(Registry::new());
        let room = RoomId::new(1);
        let mut receivers: Vec<_> = (0..4).map(|_| join(&registry, room, 128).1).collect();
        let broadcaster = RoomBroadcaster::new(registry.clone(), 16);

        for i in 0..60 {
            let outcome = broadcaster.enqueue(tagged(room, i));
            assert_ne!(outcome, EnqueueOutcome::NoRoom);
            if i % 10 == 0 {
                tokio::task::yield_now().await;
            }
        }
        // let the drain task catch up
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }

        let expected: Vec<String> = (0..60).map(|i| format!("m{i}")).collect();
        for rx in &mut receivers {
            assert_eq!(drain_tags(rx), expected);
        }
    }

    #[tokio::test]
    async fn full_queue_delivers_inline() {
        let registry = Arc::new(Registry::new());
        let room = RoomId::new(2);
        let (_conn, mut rx) = join(&registry, room, 16);
        let broadcaster = RoomBroadcaster::new(registry.clone(), 1);

        // The drain task has not run yet: first fills the queue, second overflows.
        assert_eq!(broadcaster.enqueue(tagged(room, 0)), EnqueueOutcome::Queued);
        assert_eq!(broadcaster.enqueue(tagged(room, 1)), EnqueueOutcome::DeliveredInline);
        assert_eq!(drain_tags(&mut rx), vec!["m1"]);

        tokio::task::yield_now().await;
        assert_eq!(drain_tags(&mut rx), vec!["m0"]);
    }

    #[tokio::test]
    async fn slow_consumer_is_evicted_without_blocking_others() {
        let registry = Arc::new(Registry::new());
        let room = RoomId::new(3);
        let (slow, _slow_rx) = join(&registry, room, 1);
        let (_fast, mut fast_rx) = join(&registry, room, 64);
        let broadcaster = RoomBroadcaster::new(registry.clone(), 64);

        for i in 0..3 {
            let _ = broadcaster.enqueue(tagged(room, i));
        }
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        assert!(slow.is_closed());
        assert!(!registry.is_member(room, slow.id()));
        assert!(registry.connection(slow.id()).is_none());
        assert_eq!(drain_tags(&mut fast_rx), vec!["m0", "m1", "m2"]);
        registry.check_invariants().unwrap();
    }

    #[tokio::test]
    async fn room_without_members_drops() {
        let registry = Arc::new(Registry::new());
        let broadcaster = RoomBroadcaster::new(registry.clone(), 4);
        assert_eq!(broadcaster.enqueue(tagged(RoomId::new(5), 0)), EnqueueOutcome::NoRoom);
        assert!(!registry.has_pipeline(RoomId::new(5)));
    }

    #[tokio::test]
    async fn stale_pipeline_never_reaches_recreated_room() {
        let registry = Arc::new(Registry::new());
        let room = RoomId::new(9);
        let broadcaster = RoomBroadcaster::new(registry.clone(), 8);

        let (first, _first_rx) = join(&registry, room, 8);
        assert_eq!(broadcaster.enqueue(tagged(room, 0)), EnqueueOutcome::Queued);
        let _ = registry.leave(room, first.id());
        assert!(!registry.has_pipeline(room));

        let (_second, mut second_rx) = join(&registry, room, 8);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert!(drain_tags(&mut second_rx).is_empty());

        assert_eq!(broadcaster.enqueue(tagged(room, 1)), EnqueueOutcome::Queued);
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
        assert_eq!(drain_tags(&mut second_rx), vec!["m1"]);
    }

    #[test]
    fn deliver_counts_recipients() {
        let registry = Registry::new();
        let room = RoomId::new(4);
        let (_a, _ra) = join(&registry, room, 4);
        let (_b, _rb) = join(&registry, room, 4);
        let epoch = registry.room_epoch(room).unwrap();
        let report = deliver(&registry, room, epoch, &tagged(room, 0));
        assert_eq!(report, Delivery { delivered: 2, evicted: 0 });
        assert_eq!(deliver(&registry, room, epoch + 1, &tagged(room, 0)), Delivery::default());
    }

    #[test]
    fn eviction_updates_connection_metrics() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        let registry = Registry::new();
        let room = RoomId::new(6);
        let (slow, _slow_rx) = join(&registry, room, 1);
        let (_fast, _fast_rx) = join(&registry, room, 8);
        let epoch = registry.room_epoch(room).unwrap();

        let report = metrics::with_local_recorder(&recorder, || {
            let _ = deliver(&registry, room, epoch, &tagged(room, 0));
            deliver(&registry, room, epoch, &tagged(room, 1))
        });
        assert_eq!(report, Delivery { delivered: 1, evicted: 1 });
        assert!(slow.is_closed());

        let rendered = handle.render();
        assert!(rendered.contains("hub_connections_active 1"), "{rendered}");
        assert!(rendered.contains("hub_connections_closed_total 1"), "{rendered}");
    }
}
