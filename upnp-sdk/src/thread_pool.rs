//! Prioritized worker pool
//!
//! Jobs are queued in three FIFO queues and served highest priority first.
//! The pool keeps `min_threads` workers alive, grows up to `max_threads`
//! when no worker is idle, and lets surplus workers exit after
//! `idle_timeout`. Persistent jobs get a dedicated thread that is not
//! counted against `max_threads`.

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex, MutexGuard};
use thiserror::Error;

use crate::config::PoolConfig;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Scheduling priority of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl Priority {
    fn queue_index(self) -> usize {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

/// Errors returned when a job cannot be accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("thread pool is shutting down")]
    ShuttingDown,

    #[error("job queue is full ({0} jobs)")]
    QueueFull(usize),

    #[error("failed to spawn worker thread: {0}")]
    Spawn(String),
}

/// Identifier of an accepted job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JobId(u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job-{}", self.0)
    }
}

/// Point-in-time counters of a pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub workers: usize,
    pub idle_workers: usize,
    pub persistent: usize,
    pub queued_high: usize,
    pub queued_medium: usize,
    pub queued_low: usize,
    pub completed: u64,
    pub peak_workers: usize,
}

impl PoolStats {
    pub fn queued(&self) -> usize {
        self.queued_high + self.queued_medium + self.queued_low
    }
}

struct State {
    queues: [VecDeque<Job>; 3],
    workers: usize,
    idle: usize,
    persistent: usize,
    next_job: u64,
    next_thread: u64,
    completed: u64,
    peak_workers: usize,
    shutdown: bool,
    threads: Vec<JoinHandle<()>>,
}

impl State {
    fn queued(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    fn pop(&mut self) -> Option<Job> {
        self.queues.iter_mut().find_map(VecDeque::pop_front)
    }

    fn stats(&self) -> PoolStats {
        PoolStats {
            workers: self.workers,
            idle_workers: self.idle,
            persistent: self.persistent,
            queued_high: self.queues[0].len(),
            queued_medium: self.queues[1].len(),
            queued_low: self.queues[2].len(),
            completed: self.completed,
            peak_workers: self.peak_workers,
        }
    }
}

struct Shared {
    config: PoolConfig,
    state: Mutex<State>,
    job_ready: Condvar,
}

/// Cloneable submission handle to a [`ThreadPool`]
#[derive(Clone)]
pub struct PoolHandle {
    shared: Arc<Shared>,
}

impl fmt::Debug for PoolHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolHandle")
            .field("name", &self.shared.config.name)
            .finish()
    }
}

impl PoolHandle {
    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    /// Queue `job` at `priority`
    ///
    /// Fails with [`PoolError::QueueFull`] once `max_jobs_total` jobs are
    /// waiting, and with [`PoolError::ShuttingDown`] after shutdown began.
    pub fn submit<F>(&self, priority: Priority, job: F) -> Result<JobId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(PoolError::ShuttingDown);
        }
        let queued = state.queued();
        if queued >= self.shared.config.max_jobs_total {
            return Err(PoolError::QueueFull(queued));
        }

        if state.idle == 0 && state.workers < self.shared.config.max_threads {
            if let Err(e) = spawn_worker(&self.shared, &mut state) {
                if state.workers == 0 {
                    return Err(e);
                }
                tracing::warn!(pool = %self.shared.config.name, "Could not grow pool: {}", e);
            }
        }

        state.next_job += 1;
        let id = JobId(state.next_job);
        state.queues[priority.queue_index()].push_back(Box::new(job));
        drop(state);

        self.shared.job_ready.notify_one();
        Ok(id)
    }

    /// Run `job` on a dedicated thread for as long as it takes
    pub fn submit_persistent<F>(&self, job: F) -> Result<JobId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock();
        if state.shutdown {
            return Err(PoolError::ShuttingDown);
        }

        let shared = Arc::clone(&self.shared);
        spawn_thread(&self.shared, &mut state, move || {
            run_job(&shared.config.name, Box::new(job));
            let mut state = shared.state.lock();
            state.persistent -= 1;
            state.completed += 1;
        })?;
        state.persistent += 1;
        state.next_job += 1;
        Ok(JobId(state.next_job))
    }

    pub fn stats(&self) -> PoolStats {
        self.shared.state.lock().stats()
    }

    pub fn is_shutdown(&self) -> bool {
        self.shared.state.lock().shutdown
    }

    /// Stop accepting jobs, let workers drain the queues and join them
    ///
    /// Idempotent. When called from one of the pool's own threads, that
    /// thread is not joined.
    pub fn shutdown(&self) {
        let threads = {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            std::mem::take(&mut state.threads)
        };
        self.shared.job_ready.notify_all();

        let current = thread::current().id();
        for handle in threads {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                tracing::warn!(pool = %self.shared.config.name, "Worker thread panicked");
            }
        }

        let stats = self.stats();
        tracing::debug!(
            pool = %self.shared.config.name,
            completed = stats.completed,
            peak_workers = stats.peak_workers,
            "Thread pool shut down"
        );
    }
}

/// A prioritized worker pool; shuts down when dropped
pub struct ThreadPool {
    handle: PoolHandle,
}

impl ThreadPool {
    /// Start a pool with `config.min_threads` workers
    pub fn new(config: PoolConfig) -> Result<Self, PoolError> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queues: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                workers: 0,
                idle: 0,
                persistent: 0,
                next_job: 0,
                next_thread: 0,
                completed: 0,
                peak_workers: 0,
                shutdown: false,
                threads: Vec::new(),
            }),
            job_ready: Condvar::new(),
            config,
        });
        let pool = ThreadPool {
            handle: PoolHandle { shared },
        };

        {
            let shared = &pool.handle.shared;
            let mut state = shared.state.lock();
            for _ in 0..shared.config.min_threads {
                spawn_worker(shared, &mut state)?;
            }
        }

        tracing::debug!(
            pool = %pool.handle.name(),
            min = pool.handle.shared.config.min_threads,
            max = pool.handle.shared.config.max_threads,
            "Thread pool started"
        );
        Ok(pool)
    }

    pub fn handle(&self) -> PoolHandle {
        self.handle.clone()
    }

    pub fn submit<F>(&self, priority: Priority, job: F) -> Result<JobId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.submit(priority, job)
    }

    pub fn submit_persistent<F>(&self, job: F) -> Result<JobId, PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.handle.submit_persistent(job)
    }

    pub fn stats(&self) -> PoolStats {
        self.handle.stats()
    }

    pub fn shutdown(&self) {
        self.handle.shutdown();
    }
}

impl fmt::Debug for ThreadPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadPool")
            .field("name", &self.handle.name())
            .field("stats", &self.stats())
            .finish()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

fn spawn_worker(shared: &Arc<Shared>, state: &mut MutexGuard<'_, State>) -> Result<(), PoolError> {
    let worker_shared = Arc::clone(shared);
    spawn_thread(shared, state, move || worker_loop(worker_shared))?;
    state.workers += 1;
    state.peak_workers = state.peak_workers.max(state.workers);
    Ok(())
}

fn spawn_thread<F>(shared: &Shared, state: &mut State, body: F) -> Result<(), PoolError>
where
    F: FnOnce() + Send + 'static,
{
    state.threads.retain(|handle| !handle.is_finished());
    state.next_thread += 1;

    let handle = thread::Builder::new()
        .name(format!("{}-{}", shared.config.name, state.next_thread))
        .spawn(body)
        .map_err(|e| PoolError::Spawn(e.to_string()))?;
    state.threads.push(handle);
    Ok(())
}

fn worker_loop(shared: Arc<Shared>) {
    let mut state = shared.state.lock();
    loop {
        if let Some(job) = state.pop() {
            MutexGuard::unlocked(&mut state, || run_job(&shared.config.name, job));
            state.completed += 1;
            continue;
        }
        if state.shutdown {
            break;
        }

        state.idle += 1;
        let timed_out = shared
            .job_ready
            .wait_for(&mut state, shared.config.idle_timeout)
            .timed_out();
        state.idle -= 1;

        if timed_out && state.queued() == 0 && state.workers > shared.config.min_threads {
            break;
        }
    }
    state.workers -= 1;
}

fn run_job(pool: &str, job: Job) {
    if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
        tracing::error!(pool = %pool, "Job panicked");
    }
}
