use crate::engine::EngineKey;
use anyhow::Result;
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::OnceCell;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Anything the pool can tear down once nobody uses it
#[async_trait::async_trait]
pub trait Disposable: Send + Sync {
    async fn dispose(&self) -> Result<()>;
}

/// Scheduled idle disposal for one entry.
///
/// `generation` identifies the schedule so a timer that already woke up
/// cannot evict an entry that was re-acquired and released again meanwhile.
struct IdleTimer {
    generation: u64,
    handle: JoinHandle<()>,
}

impl IdleTimer {
    fn cancel(self) {
        self.handle.abort();
    }
}

struct PoolEntry<T: ?Sized> {
    /// Filled once by the first acquirer's factory; later acquirers wait on it
    instance: Arc<OnceCell<Arc<T>>>,
    ref_count: usize,
    idle_timer: Option<IdleTimer>,
}

impl<T: ?Sized> PoolEntry<T> {
    fn new() -> Self {
        Self {
            instance: Arc::new(OnceCell::new()),
            ref_count: 0,
            idle_timer: None,
        }
    }
}

struct PoolInner<T: ?Sized> {
    name: &'static str,
    entries: Mutex<HashMap<EngineKey, PoolEntry<T>>>,
    next_generation: AtomicU64,
}

/// Keyed, reference-counted cache of expensive engine instances with idle eviction.
///
/// Invariants:
/// - at most one live instance per key
/// - an entry with `ref_count > 0` never has an idle timer
/// - `dispose()` runs exactly once per constructed instance
pub struct EnginePool<T: ?Sized> {
    inner: Arc<PoolInner<T>>,
}

impl<T> EnginePool<T>
where
    T: ?Sized + Disposable + 'static,
{
    /// Create an empty pool; `name` only appears in logs
    pub fn new(name: &'static str) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                name,
                entries: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
            }),
        }
    }

    /// Take a reference on the instance for `key`, constructing it with `factory` on a miss.
    ///
    /// A pending idle disposal for `key` is cancelled. Concurrent acquirers of a key that
    /// is still being constructed wait for that construction instead of starting another.
    /// A failing factory leaves no entry behind and its error is returned as-is.
    ///
    /// If `dispose_all` drains the entry while the factory is still running, the
    /// acquirer that ran the factory disposes the new instance itself; callers then
    /// hold an already disposed engine and their `release` is a logged no-op.
    pub async fn acquire<F, Fut, E>(&self, key: &EngineKey, factory: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Arc<T>, E>>,
    {
        let cell = {
            let mut entries = self.inner.entries.lock();
            let entry = entries.entry(key.clone()).or_insert_with(PoolEntry::new);
            entry.ref_count += 1;
            if let Some(timer) = entry.idle_timer.take() {
                timer.cancel();
                debug!("[{}] Reusing idle engine {}", self.inner.name, key);
            }
            Arc::clone(&entry.instance)
        };

        let mut constructed = false;
        let result = cell
            .get_or_try_init(|| {
                constructed = true;
                factory()
            })
            .await;

        match result {
            Ok(instance) => {
                let instance = Arc::clone(instance);
                if constructed && !self.holds_cell(key, &cell) {
                    warn!(
                        "[{}] Engine {} finished construction after the pool was drained, disposing it",
                        self.inner.name, key
                    );
                    if let Err(e) = instance.dispose().await {
                        warn!("[{}] Failed to dispose engine {}: {:#}", self.inner.name, key, e);
                    }
                }
                Ok(instance)
            }
            Err(err) => {
                let mut entries = self.inner.entries.lock();
                if let Some(entry) = entries.get_mut(key) {
                    if Arc::ptr_eq(&entry.instance, &cell) {
                        entry.ref_count = entry.ref_count.saturating_sub(1);
                        if entry.ref_count == 0 && entry.instance.get().is_none() {
                            entries.remove(key);
                        }
                    }
                }
                Err(err)
            }
        }
    }

    /// Drop a reference on `key`. At zero references the instance is disposed after `idle`
    /// unless it is acquired again first.
    pub fn release(&self, key: &EngineKey, idle: Duration) {
        let mut entries = self.inner.entries.lock();
        let Some(entry) = entries.get_mut(key) else {
            warn!("[{}] Release of unknown engine {}", self.inner.name, key);
            return;
        };

        if entry.ref_count == 0 {
            warn!("[{}] Engine {} released more often than acquired", self.inner.name, key);
            return;
        }

        entry.ref_count -= 1;
        if entry.ref_count > 0 {
            return;
        }

        let generation = self.inner.next_generation.fetch_add(1, Ordering::SeqCst);
        let handle = tokio::spawn(evict_when_idle(
            Arc::downgrade(&self.inner),
            key.clone(),
            generation,
            idle,
        ));
        entry.idle_timer = Some(IdleTimer { generation, handle });

        debug!(
            "[{}] Engine {} idle, disposing in {}ms",
            self.inner.name,
            key,
            idle.as_millis()
        );
    }

    /// Cancel every idle timer and dispose every instance concurrently.
    ///
    /// Dispose failures are logged and swallowed.
    pub async fn dispose_all(&self) {
        let drained: Vec<(EngineKey, PoolEntry<T>)> = {
            let mut entries = self.inner.entries.lock();
            entries.drain().collect()
        };

        if drained.is_empty() {
            return;
        }

        info!("[{}] Disposing {} pooled engine(s)", self.inner.name, drained.len());

        let name = self.inner.name;
        let disposals = drained.into_iter().filter_map(|(key, entry)| {
            if let Some(timer) = entry.idle_timer {
                timer.cancel();
            }
            entry.instance.get().cloned().map(|instance| (key, instance))
        });

        join_all(disposals.map(|(key, instance)| async move {
            if let Err(e) = instance.dispose().await {
                warn!("[{}] Failed to dispose engine {}: {:#}", name, key, e);
            }
        }))
        .await;
    }

    /// Whether the entry for `key` is still the one owning `cell`
    fn holds_cell(&self, key: &EngineKey, cell: &Arc<OnceCell<Arc<T>>>) -> bool {
        self.inner
            .entries
            .lock()
            .get(key)
            .map_or(false, |entry| Arc::ptr_eq(&entry.instance, cell))
    }

    /// Current reference count for `key`, if pooled
    pub fn ref_count(&self, key: &EngineKey) -> Option<usize> {
        self.inner.entries.lock().get(key).map(|entry| entry.ref_count)
    }

    /// Whether `key` is waiting out its idle window
    pub fn is_idle(&self, key: &EngineKey) -> bool {
        self.inner
            .entries
            .lock()
            .get(key)
            .map(|entry| entry.idle_timer.is_some())
            .unwrap_or(false)
    }

    pub fn contains(&self, key: &EngineKey) -> bool {
        self.inner.entries.lock().contains_key(key)
    }

    pub fn keys(&self) -> Vec<EngineKey> {
        let mut keys: Vec<EngineKey> = self.inner.entries.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.inner.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn evict_when_idle<T>(
    pool: Weak<PoolInner<T>>,
    key: EngineKey,
    generation: u64,
    idle: Duration,
) where
    T: ?Sized + Disposable + 'static,
{
    tokio::time::sleep(idle).await;

    let Some(pool) = pool.upgrade() else {
        return;
    };

    let evicted = {
        let mut entries = pool.entries.lock();
        let still_idle = entries.get(&key).map_or(false, |entry| {
            entry.ref_count == 0
                && entry.idle_timer.as_ref().map(|t| t.generation) == Some(generation)
        });
        if still_idle {
            entries.remove(&key)
        } else {
            None
        }
    };

    let Some(entry) = evicted else {
        return;
    };

    if let Some(instance) = entry.instance.get() {
        info!("[{}] Disposing idle engine {}", pool.name, key);
        if let Err(e) = instance.dispose().await {
            warn!("[{}] Failed to dispose engine {}: {:#}", pool.name, key, e);
        }
    }
}
