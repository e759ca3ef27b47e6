//! Pooled OS file handles keyed by path, open flags and permissions

use crate::config::PoolConfiguration;
use crate::errors::{PoolError, PoolResult};
use crate::metrics::PoolMetrics;
use crate::pool::Pool;
use crate::scheduler::PeriodicScheduler;
use crate::ttl::Ttl;
use crate::watch::{PathChange, PathWatcher};

use parking_lot::Mutex;
use std::fmt;
use std::fs::{self, File, Metadata, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// How pooled files are opened and re-validated on every lease
///
/// `create`, `truncate` and `append` are applied on each lease, not only
/// when the OS handle is first opened.
///
/// # Examples
///
/// ```
/// use ttlpool::OpenFlags;
///
/// let flags = OpenFlags::new().write(true).create(true).append(true);
/// assert!(flags.append);
/// assert!(!flags.truncate);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OpenFlags {
    pub read: bool,
    pub write: bool,
    pub append: bool,
    pub create: bool,
    pub truncate: bool,
}

impl OpenFlags {
    pub const fn new() -> Self {
        Self {
            read: false,
            write: false,
            append: false,
            create: false,
            truncate: false,
        }
    }

    pub const fn read_only() -> Self {
        Self::new().read(true)
    }

    /// Write-only, created if missing, every lease positioned at the end
    pub const fn append_only() -> Self {
        Self::new().write(true).create(true).append(true)
    }

    pub const fn read(mut self, read: bool) -> Self {
        self.read = read;
        self
    }

    pub const fn write(mut self, write: bool) -> Self {
        self.write = write;
        self
    }

    pub const fn append(mut self, append: bool) -> Self {
        self.append = append;
        self
    }

    pub const fn create(mut self, create: bool) -> Self {
        self.create = create;
        self
    }

    pub const fn truncate(mut self, truncate: bool) -> Self {
        self.truncate = truncate;
        self
    }

    /// Truncation is left to the lease path so it also applies to reused handles
    fn options(&self, permissions: u32) -> OpenOptions {
        let mut options = OpenOptions::new();
        options
            .read(self.read)
            .write(self.write)
            .append(self.append)
            .create(self.create);

        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(permissions);
        }
        #[cfg(not(unix))]
        let _ = permissions;

        options
    }
}

struct FileHandle {
    file: File,
    metadata: Option<Metadata>,
    generation: u64,
}

impl FileHandle {
    fn close(self) {
        drop(self.file);
    }
}

struct FilePoolInner {
    path: PathBuf,
    flags: OpenFlags,
    permissions: u32,
    ttl: Ttl,
    generation: AtomicU64,
    handles: Pool<FileHandle>,
    watch_installed: AtomicBool,
    watcher: Mutex<Option<PathWatcher>>,
    invalidations: AtomicUsize,
    stale_discards: AtomicUsize,
}

impl FilePoolInner {
    fn open(&self) -> io::Result<File> {
        self.flags.options(self.permissions).open(&self.path)
    }

    /// Handles leased before the first bump carry an older generation, and
    /// so do handles leased while the clear was running.
    fn invalidate(&self, change: PathChange) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.handles.clear();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;

        self.invalidations.fetch_add(1, Ordering::Relaxed);
        debug!(path = %self.path.display(), ?change, generation, "file pool invalidated");
    }

    fn release(&self, handle: FileHandle) -> PoolResult<()> {
        if handle.generation == self.generation.load(Ordering::SeqCst) {
            return self.handles.put(handle);
        }

        self.stale_discards.fetch_add(1, Ordering::Relaxed);
        trace!(path = %self.path.display(), leased = handle.generation, "discarding stale file handle");
        handle.close();
        Ok(())
    }
}

/// A pool of open handles to one file
///
/// Every lease re-validates the handle: the path is re-stated, a vanished
/// file is recreated when `create` is set, `truncate` empties the file and
/// the offset is moved to the end (`append`) or the start. The first lease
/// installs a filesystem watch; removing or renaming the file invalidates
/// every pooled handle.
#[derive(Clone)]
pub struct FilePool {
    inner: Arc<FilePoolInner>,
}

impl FilePool {
    /// Create a pool driven by the process-wide scheduler
    pub fn new(path: impl AsRef<Path>, flags: OpenFlags, permissions: u32, ttl: Option<Ttl>) -> Self {
        Self::with_scheduler(path, flags, permissions, ttl, PeriodicScheduler::global())
    }

    pub fn with_scheduler(
        path: impl AsRef<Path>,
        flags: OpenFlags,
        permissions: u32,
        ttl: Option<Ttl>,
        scheduler: Arc<PeriodicScheduler>,
    ) -> Self {
        let path = path.as_ref().to_path_buf();
        let ttl = ttl.unwrap_or_default();

        let open_path = path.clone();
        let config = PoolConfiguration::new(ttl)
            .with_factory(move || {
                let file = flags.options(permissions).open(&open_path)?;
                trace!(path = %open_path.display(), "opened file handle");
                Ok(FileHandle {
                    file,
                    metadata: None,
                    generation: 0,
                })
            })
            .with_destructor(FileHandle::close)
            .with_scheduler(scheduler)
            .with_name(path.display().to_string());

        Self {
            inner: Arc::new(FilePoolInner {
                path,
                flags,
                permissions,
                ttl,
                generation: AtomicU64::new(0),
                handles: Pool::new(config),
                watch_installed: AtomicBool::new(false),
                watcher: Mutex::new(None),
                invalidations: AtomicUsize::new(0),
                stale_discards: AtomicUsize::new(0),
            }),
        }
    }

    /// Lease a validated handle, opening a new one on a miss
    pub fn file(&self) -> PoolResult<PooledFile> {
        let inner = &self.inner;
        let mut handle = inner.handles.get()?;

        let metadata = match fs::metadata(&inner.path) {
            Ok(metadata) => metadata,
            Err(err) if err.kind() == io::ErrorKind::NotFound && inner.flags.create => {
                debug!(path = %inner.path.display(), "file vanished, recreating");
                handle.file = inner.open()?;
                handle.file.metadata()?
            }
            Err(err) => return Err(err.into()),
        };

        let metadata = if inner.flags.truncate && metadata.len() > 0 {
            handle.file.set_len(0)?;
            handle.file.metadata()?
        } else {
            metadata
        };
        handle.metadata = Some(metadata);

        if inner.flags.append {
            handle.file.seek(SeekFrom::End(0))?;
        } else {
            handle.file.seek(SeekFrom::Start(0))?;
        }

        self.install_watch();

        handle.generation = inner.generation.load(Ordering::SeqCst);
        Ok(PooledFile {
            handle: Some(handle),
            pool: Arc::clone(inner),
        })
    }

    /// Lease a handle from an async context
    pub async fn file_async(&self) -> PoolResult<PooledFile> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.file())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Installed at most once per pool. A failed install is not retried, so
    /// that pool never sees invalidations.
    fn install_watch(&self) {
        let inner = &self.inner;
        if inner
            .watch_installed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        let weak = Arc::downgrade(inner);
        let watcher = PathWatcher::new(&inner.path, move |change| {
            if let Some(inner) = weak.upgrade() {
                inner.invalidate(change);
            }
        });

        match watcher {
            Ok(watcher) => {
                debug!(path = %inner.path.display(), "file watch installed");
                let previous = inner.watcher.lock().replace(watcher);
                debug_assert!(previous.is_none(), "file watch installed twice");
            }
            Err(err) => {
                warn!(
                    path = %inner.path.display(),
                    %err,
                    "failed to watch file, pooled handles will never be invalidated for this pool"
                );
            }
        }
    }

    /// Close the underlying pool; pooled handles are closed on the next reaper tick
    pub fn close(&self) {
        self.inner.handles.close();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.handles.is_closed()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn flags(&self) -> OpenFlags {
        self.inner.flags
    }

    pub fn permissions(&self) -> u32 {
        self.inner.permissions
    }

    pub fn ttl(&self) -> Ttl {
        self.inner.ttl
    }

    /// Current generation; bumped twice per invalidation
    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::SeqCst)
    }

    /// Handles currently pooled
    pub fn size(&self) -> usize {
        self.inner.handles.size()
    }

    pub fn invalidations(&self) -> usize {
        self.inner.invalidations.load(Ordering::Relaxed)
    }

    /// Released handles that were closed instead of pooled
    pub fn stale_discards(&self) -> usize {
        self.inner.stale_discards.load(Ordering::Relaxed)
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.inner.handles.metrics()
    }

    /// Whether both values refer to the same pool
    pub fn same_pool(&self, other: &FilePool) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for FilePool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilePool")
            .field("path", &self.inner.path)
            .field("flags", &self.inner.flags)
            .field("permissions", &format_args!("{:o}", self.inner.permissions))
            .field("ttl", &self.inner.ttl)
            .field("generation", &self.generation())
            .finish()
    }
}

/// A leased file handle
///
/// Dropping or [closing](PooledFile::close) it returns the handle to its
/// pool, unless the pool was invalidated since the lease, in which case the
/// OS handle is closed instead.
pub struct PooledFile {
    handle: Option<FileHandle>,
    pool: Arc<FilePoolInner>,
}

impl PooledFile {
    fn handle(&self) -> &FileHandle {
        self.handle.as_ref().expect("File handle already released")
    }

    fn handle_mut(&mut self) -> &mut FileHandle {
        self.handle.as_mut().expect("File handle already released")
    }

    pub fn path(&self) -> &Path {
        &self.pool.path
    }

    /// Metadata captured when the handle was leased
    pub fn metadata(&self) -> Option<&Metadata> {
        self.handle().metadata.as_ref()
    }

    /// Refresh the cached metadata from the open handle
    pub fn stat(&mut self) -> PoolResult<&Metadata> {
        let handle = self.handle_mut();
        let metadata = handle.file.metadata()?;
        Ok(&*handle.metadata.insert(metadata))
    }

    /// Pool generation this handle was leased under
    pub fn generation(&self) -> u64 {
        self.handle().generation
    }

    /// Whether the pool was invalidated after this lease
    pub fn is_stale(&self) -> bool {
        self.generation() != self.pool.generation.load(Ordering::SeqCst)
    }

    pub fn get_ref(&self) -> &File {
        &self.handle().file
    }

    pub fn get_mut(&mut self) -> &mut File {
        &mut self.handle_mut().file
    }

    /// Return the handle to its pool.
    ///
    /// Fails with [`PoolError::PoolClosed`] when the pool was closed; the OS
    /// handle is closed in that case.
    pub fn close(mut self) -> PoolResult<()> {
        match self.handle.take() {
            Some(handle) => self.pool.release(handle),
            None => Ok(()),
        }
    }
}

impl Read for PooledFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.get_mut().read(buf)
    }
}

impl Write for PooledFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.get_mut().write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.get_mut().flush()
    }
}

impl Seek for PooledFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.get_mut().seek(pos)
    }
}

impl Drop for PooledFile {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && let Err(err) = self.pool.release(handle)
        {
            debug!(path = %self.pool.path.display(), %err, "file handle closed instead of pooled");
        }
    }
}

impl fmt::Debug for PooledFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PooledFile")
            .field("path", &self.pool.path)
            .field("generation", &self.handle.as_ref().map(|h| h.generation))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SchedulerConfiguration;
    use std::sync::Barrier;
    use std::thread;
    use std::time::{Duration, Instant};

    fn scheduler() -> Arc<PeriodicScheduler> {
        Arc::new(PeriodicScheduler::new(SchedulerConfiguration::default()).unwrap())
    }

    fn pool(path: &Path, flags: OpenFlags, scheduler: &Arc<PeriodicScheduler>) -> FilePool {
        FilePool::with_scheduler(path, flags, 0o644, None, Arc::clone(scheduler))
    }

    fn read_write_create() -> OpenFlags {
        OpenFlags::new().read(true).write(true).create(true)
    }

    #[test]
    fn test_released_handle_is_reused() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("a.txt"), read_write_create(), &scheduler);

        let mut file = pool.file().unwrap();
        file.write_all(b"hello").unwrap();
        file.close().unwrap();
        assert_eq!(pool.size(), 1);

        let file = pool.file().unwrap();
        let metrics = pool.metrics();
        assert_eq!(metrics.total_created, 1);
        assert_eq!(metrics.total_reused, 1);
        assert_eq!(file.metadata().unwrap().len(), 5);
    }

    #[test]
    fn test_lease_starts_at_beginning_without_append() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("b.txt"), read_write_create(), &scheduler);

        let mut file = pool.file().unwrap();
        file.write_all(b"abc").unwrap();
        drop(file);

        let mut file = pool.file().unwrap();
        assert_eq!(file.stream_position().unwrap(), 0);
        let mut contents = String::new();
        file.read_to_string(&mut contents).unwrap();
        assert_eq!(contents, "abc");
    }

    #[test]
    fn test_append_lease_starts_at_end() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.log");
        let scheduler = scheduler();
        let pool = pool(&path, OpenFlags::append_only(), &scheduler);

        for line in ["one\n", "two\n"] {
            let mut file = pool.file().unwrap();
            file.write_all(line.as_bytes()).unwrap();
        }

        let mut file = pool.file().unwrap();
        assert_eq!(file.stream_position().unwrap(), 8);
        drop(file);
        assert_eq!(fs::read_to_string(&path).unwrap(), "one\ntwo\n");
        assert_eq!(pool.metrics().total_created, 1);
    }

    #[test]
    fn test_truncate_applies_to_every_lease() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.txt");
        let scheduler = scheduler();
        let pool = pool(&path, read_write_create().truncate(true), &scheduler);

        let mut file = pool.file().unwrap();
        file.write_all(b"abc").unwrap();
        file.close().unwrap();

        let mut file = pool.file().unwrap();
        assert_eq!(file.metadata().unwrap().len(), 0);
        assert_eq!(file.stat().unwrap().len(), 0);
        assert_eq!(fs::metadata(&path).unwrap().len(), 0);
    }

    #[test]
    fn test_vanished_file_is_recreated_with_create_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("e.txt");
        let scheduler = scheduler();
        let pool = pool(&path, read_write_create(), &scheduler);

        let mut file = pool.file().unwrap();
        file.write_all(b"old").unwrap();
        file.close().unwrap();

        fs::remove_file(&path).unwrap();

        let mut file = pool.file().unwrap();
        assert!(path.exists());
        file.write_all(b"new").unwrap();
        file.flush().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");
    }

    #[test]
    fn test_vanished_file_fails_without_create_flag() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        fs::write(&path, b"data").unwrap();
        let scheduler = scheduler();
        let pool = pool(&path, OpenFlags::read_only(), &scheduler);

        pool.file().unwrap().close().unwrap();
        fs::remove_file(&path).unwrap();

        let err = pool.file().unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_missing_file_fails_on_first_open() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("missing"), OpenFlags::read_only(), &scheduler);

        assert!(pool.file().unwrap_err().is_not_found());
    }

    #[test]
    fn test_stale_handle_is_discarded_on_release() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("g.txt"), read_write_create(), &scheduler);

        let pooled = pool.file().unwrap();
        pooled.close().unwrap();
        let leased = pool.file().unwrap();
        pool.file().unwrap().close().unwrap();
        assert_eq!(pool.size(), 1);

        pool.inner.invalidate(PathChange::Removed);
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.generation(), 2);
        assert!(leased.is_stale());

        leased.close().unwrap();
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.stale_discards(), 1);
        assert_eq!(pool.invalidations(), 1);

        let fresh = pool.file().unwrap();
        assert_eq!(fresh.generation(), 2);
        fresh.close().unwrap();
        assert_eq!(pool.size(), 1);
    }

    #[test]
    fn test_external_removal_invalidates_pool() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("h.txt");
        let scheduler = scheduler();
        let pool = pool(&path, read_write_create(), &scheduler);

        pool.file().unwrap().close().unwrap();
        assert_eq!(pool.size(), 1);
        fs::remove_file(&path).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.invalidations() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert!(pool.invalidations() >= 1);
        assert_eq!(pool.size(), 0);
        thread::sleep(Duration::from_millis(100));

        let file = pool.file().unwrap();
        assert!(path.exists());
        assert_eq!(file.generation(), pool.generation());
        assert_eq!(pool.metrics().total_created, 2);
    }

    #[test]
    fn test_concurrent_first_leases_install_one_watch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("k.txt");
        let scheduler = scheduler();
        let pool = pool(&path, read_write_create(), &scheduler);
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let pool = pool.clone();
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    pool.file().unwrap().close().unwrap();
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.inner.watch_installed.load(Ordering::SeqCst));
        assert!(pool.inner.watcher.lock().is_some());

        fs::remove_file(&path).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while pool.invalidations() == 0 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        thread::sleep(Duration::from_millis(300));
        assert_eq!(pool.invalidations(), 1);
        assert_eq!(pool.size(), 0);
    }

    #[test]
    fn test_failed_watch_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("l.txt"), read_write_create(), &scheduler);
        pool.inner.watch_installed.store(true, Ordering::SeqCst);

        pool.file().unwrap().close().unwrap();
        assert!(pool.inner.watcher.lock().is_none());
    }

    #[test]
    fn test_pool_keeps_its_scheduler_running() {
        let dir = tempfile::tempdir().unwrap();
        let pool = FilePool::with_scheduler(
            dir.path().join("m.txt"),
            read_write_create(),
            0o644,
            Some(Ttl::After(Duration::from_millis(10))),
            Arc::new(PeriodicScheduler::new(SchedulerConfiguration::default()).unwrap()),
        );

        pool.file().unwrap().close().unwrap();
        assert_eq!(pool.size(), 1);

        // the default reaper cadence is one second
        thread::sleep(Duration::from_millis(1500));
        assert_eq!(pool.size(), 0);
        assert_eq!(pool.metrics().total_expired, 1);
    }

    #[test]
    fn test_release_after_close_reports_closed() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("i.txt"), read_write_create(), &scheduler);

        let file = pool.file().unwrap();
        pool.close();
        assert!(pool.is_closed());
        assert!(matches!(file.close(), Err(PoolError::PoolClosed)));
        assert_eq!(pool.size(), 0);
    }

    #[tokio::test]
    async fn test_file_async() {
        let dir = tempfile::tempdir().unwrap();
        let scheduler = scheduler();
        let pool = pool(&dir.path().join("j.txt"), read_write_create(), &scheduler);

        let mut file = pool.file_async().await.unwrap();
        file.write_all(b"async").unwrap();
        drop(file);

        assert_eq!(pool.size(), 1);
    }
}
