//! # Dispatcher Pool Module
//!
//! This module provides a bounded worker-thread pool that dispatches
//! opaque units of work (URL fetches) across a managed set of reusable
//! threads, reclaiming workers that sit idle past a configured threshold.
//!
//! ## Key Concepts
//! - Worker reuse: idle workers are preferred over thread creation
//! - Idle reclamation: a background pass stops workers idle too long
//! - Coordinated shutdown: blocking until every worker has terminated
//!
//! ## Design Principles
//! - Single ownership: all pool bookkeeping lives behind one lock, so
//!   submission and reclamation decisions are mutually exclusive per worker
//! - Cooperative cancellation: in-flight work is never interrupted
//! - Resource control: a limit on total worker threads prevents overload

pub mod config;
pub mod error;
pub mod worker;

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

pub use config::DispatcherPoolConfig;
pub use error::DispatchError;
pub use worker::{DispatchWork, WorkerId, WorkerState};

use worker::Worker;

/// Internal pool state
struct PoolState {
    /// Map of worker identities to live workers. Removing a worker drops
    /// the only sender to its thread, so its loop cannot outlive the map
    /// entry.
    workers: HashMap<WorkerId, Worker>,

    /// Source of the next worker identity
    next_id: u64,

    /// Whether shutdown has begun
    shutting_down: bool,
}

/// Bounded worker-thread pool for dispatch work
///
/// `DispatcherPool` owns a collection of workers, each backed by a
/// dedicated thread. Submissions reuse any idle worker, or create a new
/// one when none is available. A background reclamation thread stops
/// workers that have been idle past `idle_threshold`.
///
/// # Thread Safety
/// - All bookkeeping is serialized through a single internal lock
/// - A submission can never target a worker being reclaimed: selection and
///   the reaper's stop decision both run under the pool lock
///
/// # Ordering
/// Work placed on the same worker runs strictly sequentially; no ordering
/// is guaranteed across workers, and callers must not rely on which worker
/// a submission lands on.
pub struct DispatcherPool {
    /// Shared pool state
    state: Arc<Mutex<PoolState>>,

    /// Configuration
    config: DispatcherPoolConfig,

    /// Handle to the reclamation thread, taken on shutdown
    reaper_handle: Mutex<Option<JoinHandle<()>>>,

    /// Stops the reclamation thread
    reaper_stop_tx: flume::Sender<()>,
}

impl DispatcherPool {
    /// Create a new dispatcher pool and start its reclamation thread.
    ///
    /// # Arguments
    /// * `config` - Optional configuration for the pool
    pub fn new(config: Option<DispatcherPoolConfig>) -> Result<Self, DispatchError> {
        let config = config.unwrap_or_default();

        let state = Arc::new(Mutex::new(PoolState {
            workers: HashMap::new(),
            next_id: 0,
            shutting_down: false,
        }));

        // The reaper also exits when the pool is dropped without an
        // explicit shutdown, via channel disconnection.
        let (reaper_stop_tx, reaper_stop_rx) = flume::unbounded();

        let reaper_state = Arc::clone(&state);
        let idle_threshold = config.idle_threshold;
        let check_interval = config.check_interval;
        let reaper_handle = thread::Builder::new()
            .name("url-dispatcher-reaper".to_string())
            .spawn(move || {
                reaper_loop(reaper_state, reaper_stop_rx, idle_threshold, check_interval)
            })?;

        Ok(Self {
            state,
            config,
            reaper_handle: Mutex::new(Some(reaper_handle)),
            reaper_stop_tx,
        })
    }

    /// Submit a unit of work to the pool.
    ///
    /// Any idle worker may be selected; when none is available a new
    /// worker thread is created and handed the work directly. The caller
    /// never blocks on work completion.
    ///
    /// # Errors
    /// - [`DispatchError::PoolShuttingDown`] once [`shutdown`](Self::shutdown) has begun
    /// - [`DispatchError::ThreadLimitReached`] when creation would exceed `max_threads`
    /// - [`DispatchError::ThreadSpawn`] when the OS refuses a new thread
    pub fn submit<F>(&self, work: F) -> Result<WorkerId, DispatchError>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock().unwrap();

        if state.shutting_down {
            return Err(DispatchError::PoolShuttingDown);
        }

        // Prefer reuse over creation. Any idle worker is eligible; a lost
        // race hands the work back and the scan continues.
        let mut work: DispatchWork = Box::new(work);
        for (id, worker) in state.workers.iter() {
            if worker.state() != WorkerState::Idle {
                continue;
            }
            match worker.try_assign(work) {
                Ok(()) => {
                    debug!(worker = %id, "reusing idle worker");
                    return Ok(*id);
                }
                Err(rejected) => work = rejected,
            }
        }

        if state.workers.len() >= self.config.max_threads {
            return Err(DispatchError::ThreadLimitReached {
                max: self.config.max_threads,
            });
        }

        let id = WorkerId::new(state.next_id);
        state.next_id += 1;

        let worker = Worker::spawn(id)?;
        // A freshly spawned worker is idle; it goes busy before it ever
        // waits for work. If assignment fails the worker drops here and
        // its thread exits on the disconnected channel.
        worker.assign(work)?;
        state.workers.insert(id, worker);

        debug!(worker = %id, pool_size = state.workers.len(), "created worker");
        Ok(id)
    }

    /// Shut down the pool, blocking until every worker has terminated.
    ///
    /// New submissions are rejected as soon as shutdown begins. In-flight
    /// work is allowed to finish; an indefinitely long unit of work
    /// indefinitely delays return. Idempotent: a second call observes the
    /// already-quiesced pool and does nothing further.
    pub fn shutdown(&self) {
        let workers: Vec<Worker> = {
            let mut state = self.state.lock().unwrap();
            state.shutting_down = true;
            state.workers.drain().map(|(_, worker)| worker).collect()
        };

        info!(workers = workers.len(), "shutting down dispatcher pool");

        let _ = self.reaper_stop_tx.send(());

        for worker in &workers {
            worker.stop();
        }

        for worker in workers {
            if let Err(payload) = worker.join() {
                warn!(worker = %worker.id(), "worker thread panicked during shutdown: {:?}", payload);
            }
        }

        if let Some(handle) = self.reaper_handle.lock().unwrap().take() {
            let _ = handle.join();
        }

        info!("dispatcher pool shut down");
    }

    /// Number of live workers currently in the pool
    pub fn pool_size(&self) -> usize {
        let state = self.state.lock().unwrap();
        state.workers.len()
    }

    /// Number of workers currently idle
    pub fn idle_workers(&self) -> usize {
        let state = self.state.lock().unwrap();
        state
            .workers
            .values()
            .filter(|worker| worker.state() == WorkerState::Idle)
            .count()
    }

    /// Whether shutdown has begun
    pub fn is_shutting_down(&self) -> bool {
        let state = self.state.lock().unwrap();
        state.shutting_down
    }
}

impl fmt::Debug for DispatcherPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock().unwrap();

        f.debug_struct("DispatcherPool")
            .field("pool_size", &state.workers.len())
            .field("shutting_down", &state.shutting_down)
            .field("max_threads", &self.config.max_threads)
            .finish()
    }
}

/// Main loop of the reclamation thread.
///
/// Wakes every `check_interval` and reclaims idle workers; exits on the
/// stop signal or when the pool has been dropped.
fn reaper_loop(
    state: Arc<Mutex<PoolState>>,
    stop_rx: flume::Receiver<()>,
    idle_threshold: Duration,
    check_interval: Duration,
) {
    debug!("reclamation thread started");

    loop {
        match stop_rx.recv_timeout(check_interval) {
            Ok(()) | Err(flume::RecvTimeoutError::Disconnected) => break,
            Err(flume::RecvTimeoutError::Timeout) => reap_idle(&state, idle_threshold),
        }
    }

    debug!("reclamation thread stopped");
}

/// Run one reclamation pass.
///
/// Selection happens under the pool lock, so a worker picked here can no
/// longer be seen by `submit`. Stopping and joining happen outside the
/// lock to keep submissions unblocked.
fn reap_idle(state: &Mutex<PoolState>, idle_threshold: Duration) {
    let expired: Vec<Worker> = {
        let mut state = state.lock().unwrap();
        let now = Instant::now();

        let expired_ids: Vec<WorkerId> = state
            .workers
            .iter()
            .filter(|(_, worker)| {
                worker.state() == WorkerState::Idle
                    && now.duration_since(worker.last_activity()) >= idle_threshold
            })
            .map(|(id, _)| *id)
            .collect();

        expired_ids
            .into_iter()
            .filter_map(|id| state.workers.remove(&id))
            .collect()
    };

    for worker in expired {
        debug!(worker = %worker.id(), "reclaiming idle worker");
        worker.stop();
        if let Err(payload) = worker.join() {
            warn!(worker = %worker.id(), "worker thread panicked during reclamation: {:?}", payload);
        }
    }
}
