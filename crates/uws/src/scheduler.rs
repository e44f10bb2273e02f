//! One shared timer facility for every manager that needs deferred or
//! periodic work (execution timeouts, destruction sweeps, scheduled
//! backups), driven by an injectable clock so tests control time.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use ahash::AHashMap;
use chrono::{DateTime, Utc};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock advanced by hand. Pair with [`Scheduler::run_due`] to drive
/// timer-dependent code deterministically in tests.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn starting_at(now: DateTime<Utc>) -> Self {
        ManualClock {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().expect("clock lock");
        *now += chrono::Duration::from_std(by).expect("advance fits in a chrono duration");
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().expect("clock lock")
    }
}

pub type TaskId = u64;

struct Task {
    at: DateTime<Utc>,
    every: Option<Duration>,
    callback: Box<dyn FnMut() + Send>,
}

struct SchedState {
    tasks: AHashMap<TaskId, Task>,
    next_id: TaskId,
    shutdown: bool,
}

struct SchedInner {
    clock: Arc<dyn Clock>,
    state: Mutex<SchedState>,
    cv: Condvar,
}

/// A single background thread firing callbacks at their deadlines.
///
/// Callbacks run outside the scheduler lock, so they may freely schedule
/// or cancel further tasks. Tests may skip the thread entirely and pump
/// [`run_due`](Scheduler::run_due) by hand.
pub struct Scheduler {
    inner: Arc<SchedInner>,
    thread: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Scheduler with its background thread running.
    pub fn start(clock: Arc<dyn Clock>) -> Arc<Self> {
        let inner = Arc::new(SchedInner {
            clock,
            state: Mutex::new(SchedState {
                tasks: AHashMap::new(),
                next_id: 1,
                shutdown: false,
            }),
            cv: Condvar::new(),
        });
        let thread_inner = Arc::clone(&inner);
        let thread = std::thread::Builder::new()
            .name("uws-scheduler".to_string())
            .spawn(move || Self::run_loop(thread_inner))
            .expect("scheduler thread spawns");
        Arc::new(Scheduler {
            inner,
            thread: Some(thread),
        })
    }

    /// Scheduler without a thread; deadlines only fire through
    /// [`run_due`](Scheduler::run_due).
    pub fn manual(clock: Arc<dyn Clock>) -> Arc<Self> {
        Arc::new(Scheduler {
            inner: Arc::new(SchedInner {
                clock,
                state: Mutex::new(SchedState {
                    tasks: AHashMap::new(),
                    next_id: 1,
                    shutdown: false,
                }),
                cv: Condvar::new(),
            }),
            thread: None,
        })
    }

    fn run_loop(inner: Arc<SchedInner>) {
        loop {
            Self::fire_due(&inner);
            let state = inner.state.lock().expect("scheduler lock");
            if state.shutdown {
                return;
            }
            let now = inner.clock.now();
            let wait = state
                .tasks
                .values()
                .map(|task| (task.at - now).to_std().unwrap_or(Duration::ZERO))
                .min()
                .unwrap_or(Duration::from_millis(200))
                .clamp(Duration::from_millis(1), Duration::from_millis(200));
            let _unused = inner.cv.wait_timeout(state, wait).expect("scheduler lock");
        }
    }

    /// Fire every task whose deadline has passed, synchronously, on the
    /// calling thread.
    pub fn run_due(&self) {
        Self::fire_due(&self.inner);
    }

    fn fire_due(inner: &Arc<SchedInner>) {
        loop {
            let mut due = {
                let mut state = inner.state.lock().expect("scheduler lock");
                let now = inner.clock.now();
                let ids: Vec<TaskId> = state
                    .tasks
                    .iter()
                    .filter(|(_, task)| task.at <= now)
                    .map(|(id, _)| *id)
                    .collect();
                let mut due = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(task) = state.tasks.remove(&id) {
                        due.push((id, task));
                    }
                }
                due
            };
            if due.is_empty() {
                return;
            }
            due.sort_by_key(|(_, task)| task.at);
            for (id, mut task) in due {
                (task.callback)();
                if let Some(every) = task.every {
                    let mut state = inner.state.lock().expect("scheduler lock");
                    if !state.shutdown {
                        task.at = inner.clock.now()
                            + chrono::Duration::from_std(every)
                                .unwrap_or_else(|_| chrono::Duration::days(36500));
                        state.tasks.insert(id, task);
                    }
                }
            }
        }
    }

    fn add_task(&self, task: Task) -> TaskId {
        let id = {
            let mut state = self.inner.state.lock().expect("scheduler lock");
            let id = state.next_id;
            state.next_id += 1;
            state.tasks.insert(id, task);
            id
        };
        self.inner.cv.notify_all();
        id
    }

    pub fn schedule_at(&self, at: DateTime<Utc>, callback: impl FnOnce() + Send + 'static) -> TaskId {
        let mut callback = Some(callback);
        self.add_task(Task {
            at,
            every: None,
            callback: Box::new(move || {
                if let Some(callback) = callback.take() {
                    callback();
                }
            }),
        })
    }

    pub fn schedule_after(
        &self,
        delay: Duration,
        callback: impl FnOnce() + Send + 'static,
    ) -> TaskId {
        let at = self.inner.clock.now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::days(36500));
        self.schedule_at(at, callback)
    }

    pub fn schedule_every(
        &self,
        interval: Duration,
        callback: impl FnMut() + Send + 'static,
    ) -> TaskId {
        let at = self.inner.clock.now()
            + chrono::Duration::from_std(interval)
                .unwrap_or_else(|_| chrono::Duration::days(36500));
        self.add_task(Task {
            at,
            every: Some(interval),
            callback: Box::new(callback),
        })
    }

    pub fn cancel(&self, id: TaskId) -> bool {
        let mut state = self.inner.state.lock().expect("scheduler lock");
        state.tasks.remove(&id).is_some()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        {
            let mut state = self.inner.state.lock().expect("scheduler lock");
            state.shutdown = true;
        }
        self.inner.cv.notify_all();
        if let Some(thread) = self.thread.take() {
            let _unused = thread.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    fn manual_pair() -> (Arc<ManualClock>, Arc<Scheduler>) {
        let clock = Arc::new(ManualClock::starting_at(Utc::now()));
        let scheduler = Scheduler::manual(Arc::clone(&clock) as Arc<dyn Clock>);
        (clock, scheduler)
    }

    #[test]
    fn test_one_shot_fires_once_at_deadline() {
        let (clock, scheduler) = manual_pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scheduler.schedule_after(Duration::from_secs(10), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        scheduler.run_due();
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        clock.advance(Duration::from_secs(10));
        scheduler.run_due();
        scheduler.run_due();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_periodic_reschedules() {
        let (clock, scheduler) = manual_pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scheduler.schedule_every(Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        for _ in 0..3 {
            clock.advance(Duration::from_secs(60));
            scheduler.run_due();
        }
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel() {
        let (clock, scheduler) = manual_pair();
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let id = scheduler.schedule_after(Duration::from_secs(5), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.cancel(id));
        clock.advance(Duration::from_secs(5));
        scheduler.run_due();
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_threaded_scheduler_fires_with_system_clock() {
        let scheduler = Scheduler::start(Arc::new(SystemClock));
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        scheduler.schedule_after(Duration::from_millis(30), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        std::thread::sleep(Duration::from_millis(400));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
