//! Pool and scheduler configuration options

use crate::errors::PoolResult;
use crate::scheduler::PeriodicScheduler;
use crate::ttl::Ttl;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Builds a fresh value when the pool cannot serve one from its list
pub type Factory<T> = Arc<dyn Fn() -> PoolResult<T> + Send + Sync>;

/// Releases a value that leaves the pool for good (expiry, clear, drain)
pub type Destructor<T> = Arc<dyn Fn(T) + Send + Sync>;

/// Default cadence of the background reaper
pub const DEFAULT_REAP_INTERVAL: Duration = Duration::from_secs(1);

/// Configuration for pool behavior
///
/// # Examples
///
/// ```
/// use ttlpool::{PoolConfiguration, Ttl};
/// use std::time::Duration;
///
/// let config = PoolConfiguration::<i32>::new(Ttl::After(Duration::from_secs(30)))
///     .with_factory(|| Ok(7))
///     .with_reap_interval(Duration::from_millis(250))
///     .with_name("numbers");
///
/// assert_eq!(config.ttl, Ttl::After(Duration::from_secs(30)));
/// assert_eq!(config.reap_interval, Duration::from_millis(250));
/// assert!(config.factory.is_some());
/// ```
pub struct PoolConfiguration<T> {
    /// Time-to-live applied to every returned value
    pub ttl: Ttl,

    /// How often the reaper checks for expired values
    pub reap_interval: Duration,

    /// Constructor used on a miss
    pub factory: Option<Factory<T>>,

    /// Cleanup for values that are discarded by the pool
    pub destructor: Option<Destructor<T>>,

    /// Scheduler driving the reaper; the process-wide one when unset
    pub scheduler: Option<Arc<PeriodicScheduler>>,

    /// Label used in logs and metrics
    pub name: String,
}

impl<T> PoolConfiguration<T> {
    /// Create a configuration with the given TTL and default values otherwise
    pub fn new(ttl: Ttl) -> Self {
        Self {
            ttl,
            ..Self::default()
        }
    }

    /// Set the factory used when the pool is empty
    pub fn with_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> PoolResult<T> + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Set the destructor for discarded values
    pub fn with_destructor<F>(mut self, destructor: F) -> Self
    where
        F: Fn(T) + Send + Sync + 'static,
    {
        self.destructor = Some(Arc::new(destructor));
        self
    }

    /// Set the reaper interval
    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    /// Drive the reaper from a specific scheduler
    pub fn with_scheduler(mut self, scheduler: Arc<PeriodicScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Set the pool name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl<T> Default for PoolConfiguration<T> {
    fn default() -> Self {
        Self {
            ttl: Ttl::Never,
            reap_interval: DEFAULT_REAP_INTERVAL,
            factory: None,
            destructor: None,
            scheduler: None,
            name: "pool".to_string(),
        }
    }
}

impl<T> Clone for PoolConfiguration<T> {
    fn clone(&self) -> Self {
        Self {
            ttl: self.ttl,
            reap_interval: self.reap_interval,
            factory: self.factory.clone(),
            destructor: self.destructor.clone(),
            scheduler: self.scheduler.clone(),
            name: self.name.clone(),
        }
    }
}

impl<T> fmt::Debug for PoolConfiguration<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfiguration")
            .field("ttl", &self.ttl)
            .field("reap_interval", &self.reap_interval)
            .field("factory", &self.factory.is_some())
            .field("destructor", &self.destructor.is_some())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Configuration for a [`PeriodicScheduler`]
///
/// ```
/// use ttlpool::SchedulerConfiguration;
///
/// let config = SchedulerConfiguration::new().with_workers(4);
/// assert_eq!(config.workers, 4);
/// ```
#[derive(Debug, Clone)]
pub struct SchedulerConfiguration {
    /// Threads that run callbacks; the timer thread never runs them itself
    pub workers: usize,

    /// Prefix for spawned thread names
    pub thread_name: String,
}

impl SchedulerConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for SchedulerConfiguration {
    fn default() -> Self {
        Self {
            workers: 2,
            thread_name: "ttlpool-reaper".to_string(),
        }
    }
}
