//! Lookup of file pools by open signature

use crate::errors::PoolResult;
use crate::file::{FilePool, OpenFlags, PooledFile};
use crate::scheduler::PeriodicScheduler;
use crate::ttl::Ttl;

use dashmap::DashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// Everything that distinguishes one file pool from another
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Signature {
    pub path: PathBuf,
    pub flags: OpenFlags,
    pub ttl: Ttl,
    pub permissions: u32,
}

impl Signature {
    pub fn new(path: impl AsRef<Path>, flags: OpenFlags, permissions: u32, ttl: Option<Ttl>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            flags,
            ttl: ttl.unwrap_or_default(),
            permissions,
        }
    }
}

/// Maps each [`Signature`] to exactly one [`FilePool`]
///
/// Pool construction happens under the map's shard lock, so concurrent
/// first callers for a signature all end up with the same pool.
///
/// # Examples
///
/// ```
/// use ttlpool::{FilePoolRegistry, OpenFlags, PeriodicScheduler};
/// use std::io::Write;
///
/// let dir = std::env::temp_dir().join("ttlpool-registry-doc");
/// std::fs::create_dir_all(&dir).unwrap();
/// let path = dir.join("app.log");
///
/// let registry = FilePoolRegistry::new(PeriodicScheduler::global());
/// let mut file = registry.open(&path, OpenFlags::append_only(), 0o644, None).unwrap();
/// writeln!(file, "started").unwrap();
/// file.close().unwrap();
///
/// let _again = registry.open(&path, OpenFlags::append_only(), 0o644, None).unwrap();
/// assert_eq!(registry.len(), 1);
/// ```
pub struct FilePoolRegistry {
    pools: DashMap<Signature, FilePool>,
    scheduler: Arc<PeriodicScheduler>,
}

impl FilePoolRegistry {
    pub fn new(scheduler: Arc<PeriodicScheduler>) -> Self {
        Self {
            pools: DashMap::new(),
            scheduler,
        }
    }

    /// The process-wide registry, backed by the process-wide scheduler
    pub fn global() -> &'static FilePoolRegistry {
        static GLOBAL: OnceLock<FilePoolRegistry> = OnceLock::new();
        GLOBAL.get_or_init(|| FilePoolRegistry::new(PeriodicScheduler::global()))
    }

    /// Pool for this signature, built on first request
    pub fn pool(&self, path: impl AsRef<Path>, flags: OpenFlags, permissions: u32, ttl: Option<Ttl>) -> FilePool {
        let signature = Signature::new(path, flags, permissions, ttl);
        if let Some(pool) = self.pools.get(&signature) {
            return pool.value().clone();
        }

        let key = signature.clone();
        self.pools
            .entry(key)
            .or_insert_with(|| {
                debug!(path = %signature.path.display(), flags = ?signature.flags, "creating file pool");
                FilePool::with_scheduler(
                    &signature.path,
                    signature.flags,
                    signature.permissions,
                    Some(signature.ttl),
                    Arc::clone(&self.scheduler),
                )
            })
            .value()
            .clone()
    }

    /// Lease a handle from the pool matching this signature
    pub fn open(
        &self,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        permissions: u32,
        ttl: Option<Ttl>,
    ) -> PoolResult<PooledFile> {
        self.pool(path, flags, permissions, ttl).file()
    }

    pub async fn open_async(
        &self,
        path: impl AsRef<Path>,
        flags: OpenFlags,
        permissions: u32,
        ttl: Option<Ttl>,
    ) -> PoolResult<PooledFile> {
        let pool = self.pool(path, flags, permissions, ttl);
        pool.file_async().await
    }

    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }
}

/// Lease a pooled file handle through the process-wide registry
pub fn open(path: impl AsRef<Path>, flags: OpenFlags, permissions: u32, ttl: Option<Ttl>) -> PoolResult<PooledFile> {
    FilePoolRegistry::global().open(path, flags, permissions, ttl)
}
