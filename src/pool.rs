//! Time-bounded generic pool with a background reaper

use crate::config::{Destructor, Factory, PoolConfiguration};
use crate::errors::{PoolError, PoolResult};
use crate::list::ThreadSafeList;
use crate::metrics::{MetricsTracker, PoolMetrics};
use crate::scheduler::{PeriodicScheduler, Registration, TickAction};
use crate::ttl::{Expiry, Ttl};

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Instant;
use tracing::{debug, trace};

struct PooledItem<T> {
    value: T,
    expiry: Expiry,
}

struct PoolInner<T> {
    items: ThreadSafeList<PooledItem<T>>,
    closed: AtomicBool,
    ttl: Ttl,
    factory: Option<Factory<T>>,
    destructor: Option<Destructor<T>>,
    metrics: MetricsTracker,
    name: String,
    registration: OnceLock<Registration>,
    scheduler: Arc<PeriodicScheduler>,
}

impl<T> PoolInner<T> {
    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn destroy(&self, value: T) {
        MetricsTracker::incr(&self.metrics.destroyed);
        if let Some(ref destructor) = self.destructor {
            destructor(value);
        }
    }

    /// A push that races with `close` may land after the reaper's final
    /// drain, so a closed flag seen after the push drains the list here.
    fn push(&self, value: T) {
        let expiry = self.ttl.expiry_from(Instant::now());
        self.items.push_back(PooledItem { value, expiry });
        if self.is_closed() {
            let drained = self.drain();
            trace!(pool = %self.name, drained, "drained value put while closing");
        }
    }

    fn drain(&self) -> usize {
        let items = self.items.remove_all();
        let count = items.len();
        for item in items {
            self.destroy(item.value);
        }
        count
    }

    /// Reaper tick.
    ///
    /// Scanning stops at the first unexpired item: expiries are
    /// non-decreasing from the front because the TTL is fixed per pool.
    fn check_expire_items(&self) -> TickAction {
        if self.is_closed() {
            let drained = self.drain();
            debug!(pool = %self.name, drained, "closed pool drained, stopping reaper");
            return TickAction::Exit;
        }

        if self.ttl.is_never() {
            return TickAction::Continue;
        }

        let now = Instant::now();
        let mut reaped = 0usize;
        while let Some(item) = self.items.pop_front() {
            if !item.expiry.is_expired(now) {
                self.items.push_front(item);
                break;
            }
            MetricsTracker::incr(&self.metrics.expired);
            self.destroy(item.value);
            reaped += 1;
        }

        if reaped > 0 {
            trace!(pool = %self.name, reaped, "reaped expired items");
        }
        TickAction::Continue
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        if let Some(registration) = self.registration.get() {
            registration.cancel();
        }
        self.drain();
    }
}

/// Thread-safe pool of reusable values with TTL expiry
///
/// Values returned with [`Pool::put`] become servable by [`Pool::get`] until
/// their TTL elapses. A background reaper, registered once per pool with a
/// [`PeriodicScheduler`], discards expired values and drains the pool after
/// [`Pool::close`].
///
/// # Examples
///
/// ```
/// use ttlpool::{Pool, PoolConfiguration, PoolError, Ttl};
///
/// let pool: Pool<u32> = Pool::with_ttl(Ttl::Never);
/// pool.put(1).unwrap();
/// assert_eq!(pool.get().unwrap(), 1);
/// assert!(matches!(pool.get(), Err(PoolError::PoolEmpty)));
/// ```
pub struct Pool<T: Send + 'static> {
    inner: Arc<PoolInner<T>>,
}

impl<T: Send + 'static> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> Pool<T> {
    /// Create a pool and register its reaper.
    ///
    /// The pool keeps its scheduler alive for as long as the pool lives.
    pub fn new(config: PoolConfiguration<T>) -> Self {
        let scheduler = config.scheduler.unwrap_or_else(PeriodicScheduler::global);
        let inner = Arc::new(PoolInner {
            items: ThreadSafeList::new(),
            closed: AtomicBool::new(false),
            ttl: config.ttl,
            factory: config.factory,
            destructor: config.destructor,
            metrics: MetricsTracker::new(),
            name: config.name,
            registration: OnceLock::new(),
            scheduler,
        });

        let weak = Arc::downgrade(&inner);
        let registration = inner.scheduler.register(config.reap_interval, move || match weak.upgrade() {
            Some(inner) => inner.check_expire_items(),
            None => TickAction::Exit,
        });
        let _ = inner.registration.set(registration);

        Self { inner }
    }

    /// Create a pool with no factory or destructor
    pub fn with_ttl(ttl: Ttl) -> Self {
        Self::new(PoolConfiguration::new(ttl))
    }

    /// Return a value to the back of the pool.
    ///
    /// A closed pool refuses the value with [`PoolError::PoolClosed`]; the
    /// value is dropped without running the destructor.
    pub fn put(&self, value: T) -> PoolResult<()> {
        if self.inner.is_closed() {
            MetricsTracker::incr(&self.inner.metrics.rejected);
            return Err(PoolError::PoolClosed);
        }

        self.inner.push(value);
        MetricsTracker::incr(&self.inner.metrics.returned);
        Ok(())
    }

    /// Take a value from the front of the pool, or build one with the factory.
    ///
    /// Expired values met on the way are destroyed. A closed pool serves
    /// nothing from its list. Concurrent misses each call the factory.
    pub fn get(&self) -> PoolResult<T> {
        while !self.inner.is_closed() {
            let Some(item) = self.inner.items.pop_front() else {
                break;
            };

            if item.expiry.is_expired(Instant::now()) {
                MetricsTracker::incr(&self.inner.metrics.expired);
                self.inner.destroy(item.value);
                continue;
            }

            MetricsTracker::incr(&self.inner.metrics.reused);
            return Ok(item.value);
        }

        match self.inner.factory {
            Some(ref factory) => {
                let value = factory()?;
                MetricsTracker::incr(&self.inner.metrics.created);
                Ok(value)
            }
            None => Err(PoolError::PoolEmpty),
        }
    }

    /// Get a value wrapped in a guard that puts it back on drop
    pub fn lease(&self) -> PoolResult<Pooled<T>> {
        let value = self.get()?;
        Ok(Pooled {
            value: Some(value),
            pool: self.clone(),
        })
    }

    /// Number of held values, including expired ones not yet reaped
    pub fn size(&self) -> usize {
        self.inner.items.len()
    }

    /// Destroy every held value now
    pub fn clear(&self) {
        let cleared = self.inner.drain();
        trace!(pool = %self.inner.name, cleared, "pool cleared");
    }

    /// Mark the pool closed. Held values are drained on the next reaper tick.
    ///
    /// A [`Pool::put`] already past its closed check when this runs still
    /// lands its value; that value is destroyed by the put itself.
    pub fn close(&self) {
        if !self.inner.closed.swap(true, Ordering::AcqRel) {
            debug!(pool = %self.inner.name, pending = self.size(), "pool closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    pub fn ttl(&self) -> Ttl {
        self.inner.ttl
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.metrics.get_metrics(self.size())
    }
}

/// A leased value that returns to its pool when dropped
pub struct Pooled<T: Send + 'static> {
    value: Option<T>,
    pool: Pool<T>,
}

impl<T: Send + 'static> Pooled<T> {
    /// Take the value out; it will not go back to the pool
    pub fn detach(mut self) -> T {
        self.value.take().expect("Value already taken")
    }
}

impl<T: Send + 'static> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.value.as_ref().expect("Value already taken")
    }
}

impl<T: Send + 'static> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.value.as_mut().expect("Value already taken")
    }
}

impl<T: Send + 'static> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(value) = self.value.take()
            && let Err(err) = self.pool.put(value)
        {
            debug!(pool = %self.pool.name(), %err, "leased value dropped instead of returned");
        }
    }
}
