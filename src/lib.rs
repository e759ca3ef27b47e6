//! # ttlpool
//!
//! Thread-safe, time-bounded resource pools for Rust, and a pooled manager
//! for open OS file handles built on top of them.
//!
//! ## Features
//!
//! - Generic pool with a per-pool TTL, optional factory and destructor
//! - Background reaper driven by a fixed-interval scheduler that never runs
//!   two ticks of the same registration at once
//! - RAII leases that return values to the pool on drop
//! - File-handle pools keyed by path, flags, permissions and TTL
//! - Invalidation of pooled file handles when the file is removed or renamed
//! - Metrics with Prometheus text export
//!
//! ## Quick Start
//!
//! ```rust
//! use ttlpool::{Pool, PoolConfiguration, Ttl};
//! use std::time::Duration;
//!
//! let pool = Pool::new(
//!     PoolConfiguration::new(Ttl::After(Duration::from_secs(60)))
//!         .with_factory(|| Ok(Vec::<u8>::with_capacity(4096))),
//! );
//!
//! let buffer = pool.get().unwrap();
//! pool.put(buffer).unwrap();
//! assert_eq!(pool.size(), 1);
//! ```
//!
//! Pooled files:
//!
//! ```rust
//! use ttlpool::OpenFlags;
//! use std::io::Write;
//!
//! let path = std::env::temp_dir().join("ttlpool-quickstart.log");
//! let mut file = ttlpool::open(&path, OpenFlags::append_only(), 0o644, None).unwrap();
//! writeln!(file, "hello").unwrap();
//! file.close().unwrap();
//! ```

mod config;
mod errors;
mod file;
mod list;
mod metrics;
mod pool;
mod registry;
mod scheduler;
mod ttl;
mod watch;
pub mod telemetry;

pub use config::{DEFAULT_REAP_INTERVAL, Destructor, Factory, PoolConfiguration, SchedulerConfiguration};
pub use errors::{PoolError, PoolResult};
pub use file::{FilePool, OpenFlags, PooledFile};
pub use list::ThreadSafeList;
pub use metrics::{MetricsExporter, PoolMetrics};
pub use pool::{Pool, Pooled};
pub use registry::{FilePoolRegistry, Signature, open};
pub use scheduler::{PeriodicScheduler, Registration, TickAction};
pub use ttl::Ttl;
pub use watch::{PathChange, PathWatcher};
