//! Fixed-interval scheduler with at-most-one running invocation per registration
//!
//! One timer thread tracks when each registration is next due and hands due
//! callbacks to a small set of worker threads over a channel. A registration
//! whose previous invocation has not returned yet has its tick dropped, not
//! queued. A callback deregisters itself by returning [`TickAction::Exit`].

use crate::config::SchedulerConfiguration;
use crate::errors::PoolResult;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{error, trace};

const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// What a scheduled callback wants after it ran
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickAction {
    /// Keep the registration
    Continue,

    /// Cancel the registration permanently
    Exit,
}

type Callback = Box<dyn Fn() -> TickAction + Send + Sync>;

struct Entry {
    id: u64,
    interval: Duration,
    busy: AtomicBool,
    cancelled: AtomicBool,
    callback: Callback,
}

impl Entry {
    fn try_begin(&self) -> bool {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn finish(&self) {
        self.busy.store(false, Ordering::Release);
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    fn fire(&self) {
        if !self.is_cancelled() {
            match panic::catch_unwind(AssertUnwindSafe(|| (self.callback)())) {
                Ok(TickAction::Continue) => {}
                Ok(TickAction::Exit) => {
                    self.cancelled.store(true, Ordering::Release);
                    trace!(registration = self.id, "registration exited");
                }
                Err(_) => error!(registration = self.id, "scheduled callback panicked"),
            }
        }
        self.finish();
    }
}

/// Handle to a scheduled callback
#[derive(Clone)]
pub struct Registration {
    entry: Arc<Entry>,
}

impl Registration {
    pub fn id(&self) -> u64 {
        self.entry.id
    }

    /// Stop future ticks. An invocation already running completes.
    pub fn cancel(&self) {
        self.entry.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.entry.is_cancelled()
    }
}

struct Slot {
    next_due: Instant,
    entry: Arc<Entry>,
}

struct State {
    slots: Vec<Slot>,
    next_id: u64,
    shutdown: bool,
}

struct Shared {
    state: Mutex<State>,
    wakeup: Condvar,
}

/// Runs registered callbacks at a fixed interval
///
/// # Examples
///
/// ```
/// use ttlpool::{PeriodicScheduler, SchedulerConfiguration, TickAction};
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::time::Duration;
///
/// let scheduler = PeriodicScheduler::new(SchedulerConfiguration::default()).unwrap();
/// let ticks = Arc::new(AtomicUsize::new(0));
/// let counter = Arc::clone(&ticks);
///
/// let registration = scheduler.register(Duration::from_millis(5), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
///     TickAction::Exit
/// });
///
/// std::thread::sleep(Duration::from_millis(100));
/// assert_eq!(ticks.load(Ordering::SeqCst), 1);
/// assert!(registration.is_cancelled());
/// ```
pub struct PeriodicScheduler {
    shared: Arc<Shared>,
    threads: Mutex<Vec<JoinHandle<()>>>,
}

impl PeriodicScheduler {
    /// Start a scheduler with its timer and worker threads
    pub fn new(config: SchedulerConfiguration) -> PoolResult<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                slots: Vec::new(),
                next_id: 0,
                shutdown: false,
            }),
            wakeup: Condvar::new(),
        });
        let (jobs_tx, jobs_rx) = channel::unbounded();
        let mut threads = Vec::with_capacity(config.workers + 1);

        for worker in 0..config.workers.max(1) {
            let jobs = jobs_rx.clone();
            threads.push(
                thread::Builder::new()
                    .name(format!("{}-worker-{}", config.thread_name, worker))
                    .spawn(move || run_worker(jobs))?,
            );
        }
        drop(jobs_rx);

        let timer_shared = Arc::clone(&shared);
        threads.push(
            thread::Builder::new()
                .name(format!("{}-timer", config.thread_name))
                .spawn(move || run_timer(timer_shared, jobs_tx))?,
        );

        Ok(Self {
            shared,
            threads: Mutex::new(threads),
        })
    }

    /// The process-wide scheduler, started on first use and never shut down
    pub fn global() -> Arc<PeriodicScheduler> {
        static GLOBAL: OnceLock<Arc<PeriodicScheduler>> = OnceLock::new();
        Arc::clone(GLOBAL.get_or_init(|| {
            Arc::new(
                PeriodicScheduler::new(SchedulerConfiguration::default())
                    .expect("failed to start the process-wide scheduler"),
            )
        }))
    }

    /// Run `callback` every `interval` until it exits or is cancelled
    pub fn register<F>(&self, interval: Duration, callback: F) -> Registration
    where
        F: Fn() -> TickAction + Send + Sync + 'static,
    {
        let interval = interval.max(MIN_INTERVAL);
        let mut state = self.shared.state.lock();
        let id = state.next_id;
        state.next_id += 1;

        let entry = Arc::new(Entry {
            id,
            interval,
            busy: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            callback: Box::new(callback),
        });
        state.slots.push(Slot {
            next_due: Instant::now() + interval,
            entry: Arc::clone(&entry),
        });
        drop(state);

        self.shared.wakeup.notify_one();
        Registration { entry }
    }

    /// Number of live registrations
    pub fn registered(&self) -> usize {
        self.shared
            .state
            .lock()
            .slots
            .iter()
            .filter(|slot| !slot.entry.is_cancelled())
            .count()
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Stop the timer and join all threads. Idempotent.
    pub fn shutdown(&self) {
        {
            let mut state = self.shared.state.lock();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.wakeup.notify_all();

        let handles: Vec<_> = self.threads.lock().drain(..).collect();
        let current = thread::current().id();
        for handle in handles {
            if handle.thread().id() != current {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for PeriodicScheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_timer(shared: Arc<Shared>, jobs: Sender<Arc<Entry>>) {
    let mut state = shared.state.lock();
    while !state.shutdown {
        state.slots.retain(|slot| !slot.entry.is_cancelled());

        let now = Instant::now();
        for slot in state.slots.iter_mut().filter(|slot| slot.next_due <= now) {
            slot.next_due += slot.entry.interval;
            if slot.next_due <= now {
                slot.next_due = now + slot.entry.interval;
            }

            if !slot.entry.try_begin() {
                trace!(registration = slot.entry.id, "previous tick still running, dropping tick");
                continue;
            }
            if jobs.send(Arc::clone(&slot.entry)).is_err() {
                slot.entry.finish();
            }
        }

        match state.slots.iter().map(|slot| slot.next_due).min() {
            Some(deadline) => {
                shared.wakeup.wait_until(&mut state, deadline);
            }
            None => shared.wakeup.wait(&mut state),
        }
    }
    state.slots.clear();
}

fn run_worker(jobs: Receiver<Arc<Entry>>) {
    for entry in jobs.iter() {
        entry.fire();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn scheduler() -> PeriodicScheduler {
        PeriodicScheduler::new(SchedulerConfiguration::new().with_workers(2)).unwrap()
    }

    #[test]
    fn test_ticks_repeat() {
        let scheduler = scheduler();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let _registration = scheduler.register(Duration::from_millis(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickAction::Continue
        });

        thread::sleep(Duration::from_millis(200));
        assert!(ticks.load(Ordering::SeqCst) >= 3);
        assert_eq!(scheduler.registered(), 1);
    }

    #[test]
    fn test_exit_deregisters() {
        let scheduler = scheduler();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let registration = scheduler.register(Duration::from_millis(5), move || {
            if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                TickAction::Exit
            } else {
                TickAction::Continue
            }
        });

        thread::sleep(Duration::from_millis(200));
        assert_eq!(ticks.load(Ordering::SeqCst), 3);
        assert!(registration.is_cancelled());
        assert_eq!(scheduler.registered(), 0);
    }

    #[test]
    fn test_busy_tick_is_dropped() {
        let scheduler = scheduler();
        let ticks = Arc::new(AtomicUsize::new(0));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_in_flight = Arc::new(AtomicUsize::new(0));

        let (t, f, m) = (
            Arc::clone(&ticks),
            Arc::clone(&in_flight),
            Arc::clone(&max_in_flight),
        );
        let _registration = scheduler.register(Duration::from_millis(5), move || {
            let now = f.fetch_add(1, Ordering::SeqCst) + 1;
            m.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(50));
            f.fetch_sub(1, Ordering::SeqCst);
            t.fetch_add(1, Ordering::SeqCst);
            TickAction::Continue
        });

        thread::sleep(Duration::from_millis(300));
        assert_eq!(max_in_flight.load(Ordering::SeqCst), 1);
        // 5ms ticks against a 50ms body: most ticks must have been dropped
        assert!(ticks.load(Ordering::SeqCst) < 10);
    }

    #[test]
    fn test_cancel_stops_ticks() {
        let scheduler = scheduler();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let registration = scheduler.register(Duration::from_millis(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
            TickAction::Continue
        });
        thread::sleep(Duration::from_millis(50));
        registration.cancel();
        thread::sleep(Duration::from_millis(20));

        let seen = ticks.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), seen);
    }

    #[test]
    fn test_panicking_callback_keeps_registration() {
        let scheduler = scheduler();
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&ticks);

        let registration = scheduler.register(Duration::from_millis(5), move || {
            if counter.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("first tick fails");
            }
            TickAction::Continue
        });

        thread::sleep(Duration::from_millis(100));
        assert!(ticks.load(Ordering::SeqCst) >= 2);
        assert!(!registration.is_cancelled());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = scheduler();
        scheduler.shutdown();
        scheduler.shutdown();
        assert!(scheduler.is_shut_down());
    }
}
