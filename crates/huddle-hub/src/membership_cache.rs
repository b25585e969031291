//! TTL cache in front of the membership oracle.
//!
//! Expired entries are never returned, even if the sweeper has not yet
//! removed them. The sweeper only bounds memory.
//!
//! Every invalidation bumps a generation counter. A lookup that started
//! before an invalidation must not write its answer back afterwards.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use huddle_core::{MembershipOracle, RoomId, UserId};
use parking_lot::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    is_member: bool,
    expires_at: Instant,
}

/// `(user, room) → is_member` with per-entry expiry.
#[derive(Debug)]
pub struct MembershipCache {
    entries: RwLock<HashMap<(UserId, RoomId), CacheEntry>>,
    generation: AtomicU64,
    ttl: Duration,
}

impl MembershipCache {
    /// Create a cache whose entries live for `ttl`.
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// Cached answer, or `None` on miss or expiry.
    pub fn get(&self, user: UserId, room: RoomId) -> Option<bool> {
        let entries = self.entries.read();
        let entry = entries.get(&(user, room))?;
        (Instant::now() < entry.expires_at).then_some(entry.is_member)
    }

    /// Store an answer valid for one TTL from now.
    pub fn set(&self, user: UserId, room: RoomId, is_member: bool) {
        let _ = self.entries.write().insert((user, room), self.entry(is_member));
    }

    /// Current invalidation generation.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    /// Store an answer looked up at `generation`, unless an invalidation
    /// has run since. Returns whether the answer was stored.
    pub fn set_if_current(&self, user: UserId, room: RoomId, is_member: bool, generation: u64) -> bool {
        let mut entries = self.entries.write();
        if self.generation.load(Ordering::Acquire) != generation {
            return false;
        }
        let _ = entries.insert((user, room), self.entry(is_member));
        true
    }

    /// Drop one entry.
    pub fn invalidate(&self, user: UserId, room: RoomId) {
        let mut entries = self.entries.write();
        let _ = self.generation.fetch_add(1, Ordering::AcqRel);
        let _ = entries.remove(&(user, room));
    }

    /// Drop every entry for `user`.
    pub fn invalidate_user(&self, user: UserId) {
        let mut entries = self.entries.write();
        let _ = self.generation.fetch_add(1, Ordering::AcqRel);
        entries.retain(|(u, _), _| *u != user);
    }

    /// Drop every entry for `room`.
    pub fn invalidate_room(&self, room: RoomId) {
        let mut entries = self.entries.write();
        let _ = self.generation.fetch_add(1, Ordering::AcqRel);
        entries.retain(|(_, r), _| *r != room);
    }

    fn entry(&self, is_member: bool) -> CacheEntry {
        CacheEntry {
            is_member,
            expires_at: Instant::now() + self.ttl,
        }
    }

    /// Remove expired entries. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, e| now < e.expires_at);
        before - entries.len()
    }

    /// Entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Sweep every `interval` until `cancel` fires or the cache is dropped.
    pub fn spawn_sweeper(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let cache: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // Skip the immediate first tick
            let _ = ticker.tick().await;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let Some(cache) = cache.upgrade() else { break };
                        let removed = cache.sweep();
                        if removed > 0 {
                            debug!(removed, remaining = cache.len(), "membership cache sweep");
                        }
                    }
                }
            }
        })
    }
}

/// A [`MembershipOracle`] that answers from a [`MembershipCache`] and falls
/// through to `inner` on a miss.
///
/// Both positive and negative answers are cached; oracle errors are not,
/// and neither is an answer that raced with an invalidation.
pub struct CachedMembership<O: ?Sized> {
    cache: Arc<MembershipCache>,
    inner: Arc<O>,
}

impl<O: MembershipOracle + ?Sized> CachedMembership<O> {
    /// Wrap `inner` with `cache`.
    pub fn new(cache: Arc<MembershipCache>, inner: Arc<O>) -> Self {
        Self { cache, inner }
    }

    /// The cache backing this oracle.
    pub fn cache(&self) -> &Arc<MembershipCache> {
        &self.cache
    }
}

#[async_trait]
impl<O: MembershipOracle + ?Sized> MembershipOracle for CachedMembership<O> {
    async fn is_member(&self, user: UserId, room: RoomId) -> huddle_core::Result<bool> {
        if let Some(hit) = self.cache.get(user, room) {
            return Ok(hit);
        }
        let generation = self.cache.generation();
        let answer = self.inner.is_member(user, room).await?;
        if !self.cache.set_if_current(user, room, answer, generation) {
            debug!(user_id = %user, room_id = %room, "membership invalidated during lookup, not caching");
        }
        Ok(answer)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
