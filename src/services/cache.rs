//! Tagged in-process cache for collaborator listings.
//!
//! Every entry belongs to the tag of its owner (`users:<id>:collaborators`) so an import
//! or a direct mutation can drop all of that owner's pages at once. Entries are served
//! while fresh; an expired entry is kept around for a grace period and returned only
//! when recomputing the page fails. Entries past the grace period are pruned on write.
//!
//! Each worker holds its own cache. A flush is also handed to the broadcast channel, if
//! one is set, so `cache_sync` can repeat it in the other workers.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::time::{Duration, Instant};

use anyhow::Result;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::types::{CollaboratorPage, PageRequest};

const FRESH_FOR: Duration = Duration::from_secs(60);
const STALE_FOR: Duration = Duration::from_secs(600);

struct CacheEntry {
    page: CollaboratorPage,
    stored_at: Instant,
}

#[derive(Default)]
struct CacheState {
    entries: HashMap<String, CacheEntry>,
    tags: HashMap<String, HashSet<String>>,
    /// Bumped by every flush of the tag
    generations: HashMap<String, u64>,
}

impl CacheState {
    fn generation(&self, tag: &str) -> u64 {
        self.generations.get(tag).copied().unwrap_or_default()
    }

    fn prune(&mut self, stale_for: Duration) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.stored_at.elapsed() < stale_for);
        if self.entries.len() == before {
            return;
        }

        let entries = &self.entries;
        self.tags.retain(|_, keys| {
            keys.retain(|key| entries.contains_key(key));
            !keys.is_empty()
        });
        debug!(pruned = before - self.entries.len(), "collaborators cache pruned");
    }
}

pub struct CollaboratorsCache {
    state: Mutex<CacheState>,
    fresh_for: Duration,
    stale_for: Duration,
    broadcast: Option<UnboundedSender<Uuid>>,
}

impl Default for CollaboratorsCache {
    fn default() -> Self {
        Self::new()
    }
}

impl CollaboratorsCache {
    pub fn new() -> Self {
        Self::with_ttl(FRESH_FOR, STALE_FOR)
    }

    pub fn with_ttl(fresh_for: Duration, stale_for: Duration) -> Self {
        Self {
            state: Mutex::new(CacheState::default()),
            fresh_for,
            stale_for,
            broadcast: None,
        }
    }

    /// Hand the owner of every flush to `sender` as well
    pub fn with_broadcast(mut self, sender: UnboundedSender<Uuid>) -> Self {
        self.broadcast = Some(sender);
        self
    }

    pub fn tag(user_id: Uuid) -> String {
        format!("users:{}:collaborators", user_id)
    }

    pub fn key(user_id: Uuid, search: Option<&str>, page: PageRequest) -> String {
        let digest = Sha256::digest(search.unwrap_or("_all_").as_bytes());
        format!(
            "{}:search:{}:page:{}",
            Self::tag(user_id),
            hex::encode(digest),
            page.page
        )
    }

    /// Return the cached page or compute and store it.
    ///
    /// The lock is never held across `compute`, so concurrent misses may both compute.
    /// A page computed while the owner was flushed is returned but not stored.
    pub async fn remember<F, Fut>(
        &self,
        user_id: Uuid,
        search: Option<&str>,
        page: PageRequest,
        compute: F,
    ) -> Result<CollaboratorPage>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<CollaboratorPage>>,
    {
        let key = Self::key(user_id, search, page);
        let tag = Self::tag(user_id);

        let (stale, generation) = {
            let state = self.state.lock();
            let generation = state.generation(&tag);
            let stale = match state.entries.get(&key) {
                Some(entry) if entry.stored_at.elapsed() < self.fresh_for => {
                    debug!(key = %key, "collaborators cache hit");
                    return Ok(entry.page.clone());
                }
                Some(entry) if entry.stored_at.elapsed() < self.stale_for => Some(entry.page.clone()),
                _ => None,
            };
            (stale, generation)
        };

        match compute().await {
            Ok(fresh) => {
                self.put(tag, key, fresh.clone(), generation);
                Ok(fresh)
            }
            Err(e) => match stale {
                Some(page) => {
                    warn!(key = %key, error = %e, "Serving stale collaborators page");
                    Ok(page)
                }
                None => Err(e),
            },
        }
    }

    fn put(&self, tag: String, key: String, page: CollaboratorPage, generation: u64) {
        let mut state = self.state.lock();
        if state.generation(&tag) != generation {
            debug!(key = %key, "Owner flushed during load, page not cached");
            return;
        }

        state.prune(self.stale_for);
        state.tags.entry(tag).or_default().insert(key.clone());
        state.entries.insert(
            key,
            CacheEntry {
                page,
                stored_at: Instant::now(),
            },
        );
    }

    /// Drop every cached page of the owner, here and in the other workers
    pub fn flush_for_user(&self, user_id: Uuid) {
        self.flush_local(user_id);
        if let Some(ref sender) = self.broadcast {
            if sender.send(user_id).is_err() {
                warn!(user_id = %user_id, "Cache flush broadcast is closed");
            }
        }
    }

    /// Drop every cached page of the owner in this worker only
    pub fn flush_local(&self, user_id: Uuid) {
        let tag = Self::tag(user_id);
        let mut state = self.state.lock();
        *state.generations.entry(tag.clone()).or_default() += 1;
        if let Some(keys) = state.tags.remove(&tag) {
            for key in &keys {
                state.entries.remove(key);
            }
            debug!(user_id = %user_id, entries = keys.len(), "collaborators cache flushed");
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    #[cfg(test)]
    fn tag_count(&self) -> usize {
        self.state.lock().tags.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::sync::mpsc;

    fn page(total: i64) -> CollaboratorPage {
        CollaboratorPage {
            items: vec![],
            total,
            page: 1,
            per_page: PageRequest::DEFAULT_PER_PAGE,
        }
    }

    #[test]
    fn test_key_layout() {
        let user = Uuid::nil();
        let key = CollaboratorsCache::key(user, Some("ana"), PageRequest::new(2));
        assert!(key.starts_with("users:00000000-0000-0000-0000-000000000000:collaborators:search:"));
        assert!(key.ends_with(":page:2"));

        let all = CollaboratorsCache::key(user, None, PageRequest::new(2));
        assert_ne!(key, all);
    }

    #[tokio::test]
    async fn test_remember_serves_fresh_entry() {
        let cache = CollaboratorsCache::new();
        let user = Uuid::new_v4();
        let calls = AtomicU32::new(0);

        for _ in 0..3 {
            let result = cache
                .remember(user, None, PageRequest::default(), || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(page(7))
                })
                .await
                .unwrap();
            assert_eq!(result.total, 7);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_flush_only_affects_owner() {
        let cache = CollaboratorsCache::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        cache.remember(alice, None, PageRequest::default(), || async { Ok(page(1)) }).await.unwrap();
        cache.remember(alice, Some("x"), PageRequest::default(), || async { Ok(page(1)) }).await.unwrap();
        cache.remember(bob, None, PageRequest::default(), || async { Ok(page(2)) }).await.unwrap();
        assert_eq!(cache.len(), 3);

        cache.flush_for_user(alice);
        assert_eq!(cache.len(), 1);

        let refreshed = cache
            .remember(alice, None, PageRequest::default(), || async { Ok(page(5)) })
            .await
            .unwrap();
        assert_eq!(refreshed.total, 5);
    }

    #[tokio::test]
    async fn test_stale_entry_served_only_when_recompute_fails() {
        let cache = CollaboratorsCache::with_ttl(Duration::ZERO, Duration::from_secs(600));
        let user = Uuid::new_v4();

        cache.remember(user, None, PageRequest::default(), || async { Ok(page(1)) }).await.unwrap();

        let recomputed = cache
            .remember(user, None, PageRequest::default(), || async { Ok(page(2)) })
            .await
            .unwrap();
        assert_eq!(recomputed.total, 2);

        let fallback = cache
            .remember(user, None, PageRequest::default(), || async {
                Err(anyhow::anyhow!("database unavailable"))
            })
            .await
            .unwrap();
        assert_eq!(fallback.total, 2);
    }

    #[tokio::test]
    async fn test_error_without_stale_entry_propagates() {
        let cache = CollaboratorsCache::with_ttl(Duration::ZERO, Duration::ZERO);
        let user = Uuid::new_v4();

        cache.remember(user, None, PageRequest::default(), || async { Ok(page(1)) }).await.unwrap();

        let result = cache
            .remember(user, None, PageRequest::default(), || async {
                Err(anyhow::anyhow!("database unavailable"))
            })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_page_loaded_across_a_flush_is_not_stored() {
        let cache = CollaboratorsCache::new();
        let user = Uuid::new_v4();

        let loaded = cache
            .remember(user, None, PageRequest::default(), || async {
                // An import finishes while the page is being read
                cache.flush_for_user(user);
                Ok(page(0))
            })
            .await
            .unwrap();
        assert_eq!(loaded.total, 0);
        assert_eq!(cache.len(), 0);

        let next = cache
            .remember(user, None, PageRequest::default(), || async { Ok(page(5)) })
            .await
            .unwrap();
        assert_eq!(next.total, 5);
    }

    #[tokio::test]
    async fn test_flush_of_other_owner_keeps_page_loading() {
        let cache = CollaboratorsCache::new();
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        cache
            .remember(alice, None, PageRequest::default(), || async {
                cache.flush_for_user(bob);
                Ok(page(3))
            })
            .await
            .unwrap();
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_entries_past_grace_period_are_pruned() {
        let cache = CollaboratorsCache::with_ttl(Duration::from_millis(1), Duration::from_millis(2));
        let user = Uuid::new_v4();

        for i in 0..1000 {
            let search = format!("name {}", i);
            cache
                .remember(user, Some(&search), PageRequest::default(), || async { Ok(page(1)) })
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;

        let other = Uuid::new_v4();
        cache
            .remember(other, None, PageRequest::default(), || async { Ok(page(1)) })
            .await
            .unwrap();

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.tag_count(), 1);
    }

    #[tokio::test]
    async fn test_flush_is_broadcast_but_local_flush_is_not() {
        let (sender, mut flushes) = mpsc::unbounded_channel();
        let cache = CollaboratorsCache::new().with_broadcast(sender);
        let user = Uuid::new_v4();

        cache.remember(user, None, PageRequest::default(), || async { Ok(page(1)) }).await.unwrap();
        cache.flush_for_user(user);
        assert_eq!(cache.len(), 0);
        assert_eq!(flushes.try_recv().unwrap(), user);

        cache.remember(user, None, PageRequest::default(), || async { Ok(page(1)) }).await.unwrap();
        cache.flush_local(user);
        assert_eq!(cache.len(), 0);
        assert!(flushes.try_recv().is_err());
    }
}
