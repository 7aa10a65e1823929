//! Keyed refresh cache with stale-serve and single-flight recomputation.
//!
//! Readers always get the best value available right now. When an entry
//! is older than the TTL, the next reader spawns one background refresh
//! and keeps returning the previous value until it lands. Only readers of
//! a key that has never produced a value wait, and only for the refresh
//! budget.

use std::collections::HashMap;
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::time::Instant;

pub const DEFAULT_TTL_SECS: u64 = 600;
pub const DEFAULT_REFRESH_BUDGET_SECS: u64 = 30;

/// Computes the value for a key. Called from a background task.
#[async_trait]
pub trait Refresher: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + Send + Sync + 'static;
    type Error: Display + Send + 'static;

    async fn refresh(&self, key: &Self::Key) -> Result<Self::Value, Self::Error>;
}

/// Timing policy, fixed per deployment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    /// Age after which an entry is refreshed
    pub ttl: Duration,
    /// Upper bound on a single refresh attempt
    pub budget: Duration,
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_TTL_SECS),
            budget: Duration::from_secs(DEFAULT_REFRESH_BUDGET_SECS),
        }
    }
}

impl RefreshPolicy {
    pub fn new(ttl: Duration, budget: Duration) -> Self {
        Self { ttl, budget }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    Fresh,
    Refreshing,
    Failed,
}

/// Diagnostic view of one entry
#[derive(Debug, Clone)]
pub struct EntryStatus {
    pub state: EntryState,
    pub has_value: bool,
    pub computed_at: Option<Instant>,
    pub last_error: Option<String>,
}

struct CacheEntry<V> {
    value: Option<V>,
    computed_at: Option<Instant>,
    /// When the last attempt finished, successful or not
    attempted_at: Option<Instant>,
    /// Start of the attempt currently in flight
    in_flight: Option<Instant>,
    attempt: u64,
    last_error: Option<String>,
}

impl<V> CacheEntry<V> {
    fn new() -> Self {
        Self {
            value: None,
            computed_at: None,
            attempted_at: None,
            in_flight: None,
            attempt: 0,
            last_error: None,
        }
    }

    /// A marker older than the budget belongs to a task that hung or died.
    fn is_in_flight(&self, now: Instant, budget: Duration) -> bool {
        self.in_flight
            .is_some_and(|started| now.saturating_duration_since(started) < budget)
    }

    fn is_due(&self, now: Instant, ttl: Duration) -> bool {
        self.attempted_at
            .map_or(true, |at| now.saturating_duration_since(at) >= ttl)
    }

    fn state(&self, now: Instant, budget: Duration) -> EntryState {
        if self.is_in_flight(now, budget) {
            EntryState::Refreshing
        } else if self.last_error.is_some() {
            EntryState::Failed
        } else {
            EntryState::Fresh
        }
    }
}

struct Slot<V> {
    entry: Mutex<CacheEntry<V>>,
    /// Bumped every time an attempt settles
    settled: watch::Sender<u64>,
}

impl<V> Slot<V> {
    fn new() -> Self {
        Self {
            entry: Mutex::new(CacheEntry::new()),
            settled: watch::Sender::new(0),
        }
    }
}

/// Keyed cache with TTL-driven background refresh.
///
/// Entries are never evicted. The key space is expected to be small.
pub struct RefreshCache<R: Refresher> {
    refresher: Arc<R>,
    policy: RefreshPolicy,
    slots: Mutex<HashMap<R::Key, Arc<Slot<R::Value>>>>,
}

impl<R: Refresher> RefreshCache<R> {
    pub fn new(refresher: R, policy: RefreshPolicy) -> Self {
        Self::with_shared(Arc::new(refresher), policy)
    }

    pub fn with_shared(refresher: Arc<R>, policy: RefreshPolicy) -> Self {
        Self {
            refresher,
            policy,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> RefreshPolicy {
        self.policy
    }

    /// Number of keys seen so far
    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.lock().is_empty()
    }

    /// Return the cached value for `key`, scheduling a refresh if it is due.
    ///
    /// Never waits on the upstream once a value exists. For a key without
    /// a value, waits at most the refresh budget for the in-flight attempt.
    pub async fn get(&self, key: &R::Key) -> Option<R::Value> {
        let slot = self.slot(key);
        let now = Instant::now();

        let (value, started, waiter) = {
            let mut entry = slot.entry.lock();
            let started = if entry.is_due(now, self.policy.ttl)
                && !entry.is_in_flight(now, self.policy.budget)
            {
                entry.attempt += 1;
                entry.in_flight = Some(now);
                Some(entry.attempt)
            } else {
                None
            };
            let waiter = (entry.value.is_none() && entry.is_in_flight(now, self.policy.budget))
                .then(|| slot.settled.subscribe());
            (entry.value.clone(), started, waiter)
        };

        if let Some(attempt) = started {
            tracing::debug!("Scheduling refresh #{} for {:?}", attempt, key);
            self.spawn_refresh(key.clone(), Arc::clone(&slot), attempt);
        }

        match waiter {
            None => value,
            Some(mut settled) => {
                if tokio::time::timeout(self.policy.budget, settled.changed())
                    .await
                    .is_err()
                {
                    tracing::debug!("Gave up waiting for first value of {:?}", key);
                }
                let value = slot.entry.lock().value.clone();
                value
            }
        }
    }

    /// Cached value without scheduling anything
    pub fn peek(&self, key: &R::Key) -> Option<R::Value> {
        let slot = self.slots.lock().get(key).cloned()?;
        let value = slot.entry.lock().value.clone();
        value
    }

    pub fn status(&self, key: &R::Key) -> Option<EntryStatus> {
        let slot = self.slots.lock().get(key).cloned()?;
        let entry = slot.entry.lock();
        Some(EntryStatus {
            state: entry.state(Instant::now(), self.policy.budget),
            has_value: entry.value.is_some(),
            computed_at: entry.computed_at,
            last_error: entry.last_error.clone(),
        })
    }

    fn slot(&self, key: &R::Key) -> Arc<Slot<R::Value>> {
        let mut slots = self.slots.lock();
        match slots.get(key) {
            Some(slot) => Arc::clone(slot),
            None => {
                let slot = Arc::new(Slot::new());
                slots.insert(key.clone(), Arc::clone(&slot));
                slot
            }
        }
    }

    fn spawn_refresh(&self, key: R::Key, slot: Arc<Slot<R::Value>>, attempt: u64) {
        let refresher = Arc::clone(&self.refresher);
        let budget = self.policy.budget;

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(budget, refresher.refresh(&key)).await;
            let now = Instant::now();

            let failure = {
                let mut entry = slot.entry.lock();
                if entry.attempt == attempt {
                    entry.in_flight = None;
                }
                entry.attempted_at = Some(entry.attempted_at.map_or(now, |at| at.max(now)));

                match outcome {
                    Ok(Ok(value)) => {
                        entry.value = Some(value);
                        entry.computed_at = Some(entry.computed_at.map_or(now, |at| at.max(now)));
                        entry.last_error = None;
                        None
                    }
                    Ok(Err(e)) => {
                        let message = e.to_string();
                        entry.last_error = Some(message.clone());
                        Some(message)
                    }
                    Err(_) => {
                        let message = format!("refresh exceeded {:?}", budget);
                        entry.last_error = Some(message.clone());
                        Some(message)
                    }
                }
            };

            match failure {
                None => tracing::info!("Refreshed {:?}", key),
                Some(message) => {
                    tracing::warn!("Refresh of {:?} failed, serving stale data: {}", key, message)
                }
            }

            slot.settled.send_modify(|settled| *settled += 1);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

    struct CountingRefresher {
        calls: AtomicU64,
        delay: Duration,
        fail: AtomicBool,
    }

    impl CountingRefresher {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicU64::new(0),
                delay,
                fail: AtomicBool::new(false),
            })
        }

        fn calls(&self) -> u64 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Refresher for CountingRefresher {
        type Key = u32;
        type Value = Arc<u64>;
        type Error = String;

        async fn refresh(&self, key: &u32) -> Result<Arc<u64>, String> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(format!("upstream down for {}", key));
            }
            Ok(Arc::new(call))
        }
    }

    fn policy() -> RefreshPolicy {
        RefreshPolicy::new(Duration::from_secs(600), Duration::from_secs(5))
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_first_get_fetches_once() {
        let refresher = CountingRefresher::new(Duration::from_millis(200));
        let cache = Arc::new(RefreshCache::with_shared(Arc::clone(&refresher), policy()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.get(&7).await }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().as_deref(), Some(&1));
        }

        assert_eq!(refresher.calls(), 1);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_repeated_get_within_ttl_is_identical() {
        let refresher = CountingRefresher::new(Duration::from_millis(10));
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());

        let first = cache.get(&1).await.unwrap();
        tokio::time::advance(Duration::from_secs(599)).await;
        let second = cache.get(&1).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(refresher.calls(), 1);
        assert_eq!(cache.status(&1).unwrap().state, EntryState::Fresh);
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_entry_serves_stale_and_refreshes_once() {
        let refresher = CountingRefresher::new(Duration::from_secs(2));
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());

        assert_eq!(cache.get(&1).await.as_deref(), Some(&1));
        tokio::time::advance(Duration::from_secs(600)).await;

        // Both readers get the stale value straight away
        assert_eq!(cache.get(&1).await.as_deref(), Some(&1));
        assert_eq!(cache.get(&1).await.as_deref(), Some(&1));
        assert_eq!(cache.status(&1).unwrap().state, EntryState::Refreshing);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(refresher.calls(), 2);
        assert_eq!(cache.get(&1).await.as_deref(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_read_does_not_wait_for_slow_upstream() {
        let refresher = CountingRefresher::new(Duration::from_secs(4));
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());

        cache.get(&1).await;
        tokio::time::advance(Duration::from_secs(600)).await;

        let read = tokio::time::timeout(Duration::from_millis(1), cache.get(&1)).await;
        assert_eq!(read.unwrap().as_deref(), Some(&1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failure_keeps_previous_value() {
        let refresher = CountingRefresher::new(Duration::from_millis(10));
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());

        cache.get(&1).await;
        refresher.fail.store(true, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(600)).await;

        assert_eq!(cache.get(&1).await.as_deref(), Some(&1));
        tokio::time::sleep(Duration::from_millis(50)).await;

        let status = cache.status(&1).unwrap();
        assert_eq!(status.state, EntryState::Failed);
        assert!(status.has_value);
        assert!(status.last_error.unwrap().contains("upstream down"));
        assert_eq!(cache.get(&1).await.as_deref(), Some(&1));
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_failure_yields_none() {
        let refresher = CountingRefresher::new(Duration::from_millis(10));
        refresher.fail.store(true, Ordering::SeqCst);
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());

        assert!(cache.get(&3).await.is_none());
        assert_eq!(cache.status(&3).unwrap().state, EntryState::Failed);

        // Not retried until the next TTL tick, and readers do not block
        assert!(cache.get(&3).await.is_none());
        assert_eq!(refresher.calls(), 1);

        refresher.fail.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_secs(600)).await;
        assert_eq!(cache.get(&3).await.as_deref(), Some(&2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_refresh_is_abandoned_after_budget() {
        let refresher = CountingRefresher::new(Duration::from_secs(3600));
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());
        assert_eq!(cache.policy().budget, Duration::from_secs(5));

        assert!(cache.get(&9).await.is_none());
        tokio::time::sleep(Duration::from_millis(10)).await;

        let status = cache.status(&9).unwrap();
        assert_eq!(status.state, EntryState::Failed);
        assert!(status.last_error.unwrap().contains("exceeded"));

        tokio::time::advance(Duration::from_secs(600)).await;
        cache.get(&9).await;
        assert_eq!(refresher.calls(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_independent() {
        let refresher = CountingRefresher::new(Duration::from_millis(10));
        let cache = RefreshCache::with_shared(Arc::clone(&refresher), policy());

        cache.get(&1).await;
        cache.get(&2).await;

        assert_eq!(refresher.calls(), 2);
        assert!(cache.peek(&1).is_some());
        assert!(cache.peek(&3).is_none());
    }
}
