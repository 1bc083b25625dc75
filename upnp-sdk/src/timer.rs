//! Timer service
//!
//! A single loop, hosted as a persistent job on the send pool, owns the
//! ordered set of pending timers. Callers talk to it over a channel; when a
//! timer fires its job is handed back to the pool at the timer's priority,
//! so no timer callback ever runs on the timer thread itself.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;

use crate::thread_pool::{PoolError, PoolHandle, Priority};

/// Identifier returned by [`Timer::schedule`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer-{}", self.0)
    }
}

type OnceJob = Box<dyn FnOnce() + Send + 'static>;
type RepeatJob = Arc<dyn Fn() + Send + Sync + 'static>;

enum Task {
    Once(OnceJob),
    Periodic { interval: Duration, job: RepeatJob },
}

struct Entry {
    id: TimerId,
    priority: Priority,
    task: Task,
}

enum Command {
    Schedule { at: Instant, entry: Entry },
    Cancel(TimerId),
    Shutdown,
}

/// Handle to the timer loop
pub struct Timer {
    commands: Sender<Command>,
    next_id: AtomicU64,
    done: Mutex<Option<Receiver<()>>>,
}

impl fmt::Debug for Timer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Timer")
            .field("next_id", &self.next_id.load(Ordering::Relaxed))
            .finish()
    }
}

impl Timer {
    /// Start the timer loop on `pool`; fired jobs are submitted back to it
    pub fn start(pool: &PoolHandle) -> Result<Self, PoolError> {
        let (commands, inbox) = channel::unbounded();
        let (done_tx, done_rx) = channel::bounded::<()>(0);
        let target = pool.clone();

        pool.submit_persistent(move || {
            run(inbox, target);
            // Dropping the sender wakes `shutdown`
            drop(done_tx);
        })?;

        Ok(Self {
            commands,
            next_id: AtomicU64::new(1),
            done: Mutex::new(Some(done_rx)),
        })
    }

    /// Run `job` once after `delay`
    pub fn schedule<F>(&self, delay: Duration, priority: Priority, job: F) -> Result<TimerId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.insert(delay, priority, Task::Once(Box::new(job)))
    }

    /// Run `job` every `interval`, first after one interval
    pub fn schedule_periodic<F>(
        &self,
        interval: Duration,
        priority: Priority,
        job: F,
    ) -> Result<TimerId, PoolError>
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.insert(
            interval,
            priority,
            Task::Periodic {
                interval,
                job: Arc::new(job),
            },
        )
    }

    /// Remove a pending timer; unknown or already fired ids are ignored
    pub fn cancel(&self, id: TimerId) {
        let _ = self.commands.send(Command::Cancel(id));
    }

    /// Stop the loop and wait for it to exit; pending timers are dropped
    pub fn shutdown(&self) {
        let Some(done) = self.done.lock().take() else {
            return;
        };
        let _ = self.commands.send(Command::Shutdown);
        // Returns once the loop has dropped its end
        let _ = done.recv();
        tracing::debug!("Timer loop stopped");
    }

    fn insert(&self, delay: Duration, priority: Priority, task: Task) -> Result<TimerId, PoolError> {
        let id = TimerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = Entry { id, priority, task };
        self.commands
            .send(Command::Schedule {
                at: Instant::now() + delay,
                entry,
            })
            .map_err(|_| PoolError::ShuttingDown)?;
        Ok(id)
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(inbox: Receiver<Command>, pool: PoolHandle) {
    let mut pending: BTreeMap<(Instant, TimerId), Entry> = BTreeMap::new();
    let mut deadlines: HashMap<TimerId, Instant> = HashMap::new();

    loop {
        let received = match pending.keys().next() {
            Some(&(at, _)) => inbox.recv_deadline(at),
            None => inbox.recv().map_err(|_| RecvTimeoutError::Disconnected),
        };

        match received {
            Ok(Command::Schedule { at, entry }) => {
                deadlines.insert(entry.id, at);
                pending.insert((at, entry.id), entry);
            }
            Ok(Command::Cancel(id)) => {
                if let Some(at) = deadlines.remove(&id) {
                    pending.remove(&(at, id));
                }
            }
            Ok(Command::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
            Err(RecvTimeoutError::Timeout) => {}
        }

        fire_due(&mut pending, &mut deadlines, &pool);
    }

    tracing::debug!(dropped = pending.len(), "Timer loop exiting");
}

fn fire_due(
    pending: &mut BTreeMap<(Instant, TimerId), Entry>,
    deadlines: &mut HashMap<TimerId, Instant>,
    pool: &PoolHandle,
) {
    let now = Instant::now();
    while let Some(entry) = pending.first_entry() {
        if entry.key().0 > now {
            break;
        }
        let ((at, id), entry) = entry.remove_entry();
        deadlines.remove(&id);

        let submitted = match entry.task {
            Task::Once(job) => pool.submit(entry.priority, job),
            Task::Periodic { interval, job } => {
                let run = Arc::clone(&job);
                let result = pool.submit(entry.priority, move || run());

                let next = (at + interval).max(now);
                deadlines.insert(id, next);
                pending.insert(
                    (next, id),
                    Entry {
                        id,
                        priority: entry.priority,
                        task: Task::Periodic { interval, job },
                    },
                );
                result
            }
        };

        if let Err(e) = submitted {
            tracing::warn!(timer = %id, "Dropping fired timer: {}", e);
        }
    }
}
