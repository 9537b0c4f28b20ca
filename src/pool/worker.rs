//! # Dispatcher Worker Module
//!
//! This module provides the reusable worker implementation that executes
//! units of dispatch work on a dedicated thread. Each worker handles one
//! unit of work at a time and tracks its own activity for reclamation.
//!
//! ## Key Concepts
//! - Worker lifecycle: thread creation, execution, and cleanup
//! - Sequential execution: at most one unit of work assigned at a time
//! - Cooperative shutdown: in-flight work is never interrupted
//!
//! ## Design Principles
//! - Isolation: a panicking unit of work never takes the worker down
//! - Activity tracking: last-activity timestamps drive idle reclamation
//! - Controlled shutdown: clean termination of worker threads

use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use tracing::{debug, warn};

use crate::pool::error::DispatchError;

/// An opaque unit of dispatch work submitted by a caller.
///
/// The pool never observes a return value; success and failure are
/// equivalent from its perspective and both return the worker to idle.
pub type DispatchWork = Box<dyn FnOnce() + Send + 'static>;

/// Opaque identity of a worker, unique for the worker's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct WorkerId(u64);

impl WorkerId {
    pub(crate) fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// States a worker can be in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Worker is idle, waiting for work
    Idle,
    /// Worker is executing a unit of work
    Busy,
    /// Termination requested; any in-flight work is allowed to finish
    Stopping,
    /// Worker has terminated; no further work is accepted
    Stopped,
}

/// Signals delivered to the worker thread over its channel.
enum Signal {
    /// Execute a unit of work
    Dispatch(DispatchWork),
    /// Terminate once any in-flight work completes
    Stop,
}

/// Record shared between the pool-side worker handle and its thread.
///
/// The thread holds only this record, never the signal sender, so
/// dropping the pool-side [`Worker`] disconnects the channel and ends
/// the thread's loop.
struct WorkerShared {
    /// Identity of this worker
    id: WorkerId,

    /// Current state of the worker
    state: Mutex<WorkerState>,

    /// Timestamp of the most recent work completion (or creation)
    last_activity: Mutex<Instant>,
}

impl WorkerShared {
    /// Main loop of the worker thread.
    ///
    /// Waits for signals, executes dispatched work, and commits state
    /// transitions. Exits on a stop signal or when the pool-side worker
    /// handle is dropped.
    fn run_loop(&self, signal_rx: flume::Receiver<Signal>) {
        debug!(worker = %self.id, "worker thread started");

        loop {
            match signal_rx.recv() {
                Ok(Signal::Dispatch(work)) => {
                    // Failures raised by the work are opaque to the pool;
                    // completion advances the state machine either way.
                    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(work)) {
                        warn!(
                            worker = %self.id,
                            "unit of work panicked: {}",
                            panic_message(payload)
                        );
                    }

                    let mut state = self.state.lock().unwrap();
                    if *state == WorkerState::Stopping {
                        // Stop was requested mid-execution; the stop signal
                        // is already in the channel and ends the loop next.
                        continue;
                    }
                    // The timestamp commits before the idle state becomes
                    // observable, so a reclamation pass can never pair a
                    // fresh Idle with a stale timestamp.
                    *self.last_activity.lock().unwrap() = Instant::now();
                    *state = WorkerState::Idle;
                }
                Ok(Signal::Stop) | Err(_) => break,
            }
        }

        *self.state.lock().unwrap() = WorkerState::Stopped;
        debug!(worker = %self.id, "worker thread stopped");
    }
}

/// Worker that executes dispatch work on a dedicated thread
pub struct Worker {
    /// State shared with the worker thread
    shared: Arc<WorkerShared>,

    /// Sender feeding the worker thread
    signal_tx: flume::Sender<Signal>,

    /// Handle to the worker thread, taken exactly once on join
    thread_handle: Mutex<Option<JoinHandle<()>>>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("id", &self.shared.id)
            .field("state", &*self.shared.state.lock().unwrap())
            .field("has_thread", &self.thread_handle.lock().unwrap().is_some())
            .finish()
    }
}

impl Worker {
    /// Create a worker and spawn its dedicated thread.
    ///
    /// The worker starts in `Idle` state with `last_activity` set to the
    /// creation time. Spawn failures (OS resource exhaustion) are surfaced
    /// to the caller.
    pub(crate) fn spawn(id: WorkerId) -> Result<Self, DispatchError> {
        let (signal_tx, signal_rx) = flume::unbounded();

        let shared = Arc::new(WorkerShared {
            id,
            state: Mutex::new(WorkerState::Idle),
            last_activity: Mutex::new(Instant::now()),
        });

        let thread_shared = Arc::clone(&shared);
        let handle = thread::Builder::new()
            .name(format!("url-dispatcher-{}", id))
            .spawn(move || thread_shared.run_loop(signal_rx))?;

        Ok(Self {
            shared,
            signal_tx,
            thread_handle: Mutex::new(Some(handle)),
        })
    }

    /// Identity of this worker
    pub fn id(&self) -> WorkerId {
        self.shared.id
    }

    /// Get the current state of the worker
    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock().unwrap()
    }

    /// Timestamp of the latest committed transition to idle (or creation)
    pub fn last_activity(&self) -> Instant {
        *self.shared.last_activity.lock().unwrap()
    }

    /// Assign a unit of work to this worker.
    ///
    /// Fails with `NotAcceptingWork` unless the worker is `Idle`. On
    /// success the worker transitions to `Busy` and executes the work on
    /// its own thread; the caller does not block on completion.
    pub fn assign(&self, work: DispatchWork) -> Result<(), DispatchError> {
        self.try_assign(work)
            .map_err(|_| DispatchError::NotAcceptingWork { state: self.state() })
    }

    /// Assignment variant that hands the work back on rejection, so the
    /// pool can fall back to another worker after a lost race.
    pub(crate) fn try_assign(&self, work: DispatchWork) -> Result<(), DispatchWork> {
        let mut state = self.shared.state.lock().unwrap();

        if *state != WorkerState::Idle {
            return Err(work);
        }

        // The channel is unbounded, so a send only fails if the worker
        // thread has already exited.
        match self.signal_tx.try_send(Signal::Dispatch(work)) {
            Ok(()) => {
                *state = WorkerState::Busy;
                Ok(())
            }
            Err(flume::TrySendError::Full(Signal::Dispatch(work)))
            | Err(flume::TrySendError::Disconnected(Signal::Dispatch(work))) => Err(work),
            Err(_) => unreachable!("only Dispatch signals are sent here"),
        }
    }

    /// Request termination of this worker.
    ///
    /// Idempotent. Once the stop is recorded the worker accepts no further
    /// assignments; any in-flight unit of work is allowed to finish before
    /// the worker reaches `Stopped`.
    pub fn stop(&self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                WorkerState::Idle | WorkerState::Busy => *state = WorkerState::Stopping,
                WorkerState::Stopping | WorkerState::Stopped => return,
            }
        }

        // Wakes an idle worker immediately; a busy worker observes the
        // Stopping state once its in-flight unit completes and exits on
        // this signal right after.
        let _ = self.signal_tx.send(Signal::Stop);
    }

    /// Wait for the worker thread to terminate.
    ///
    /// The thread handle is released exactly once; subsequent calls are
    /// no-ops.
    pub(crate) fn join(&self) -> thread::Result<()> {
        let handle = self.thread_handle.lock().unwrap().take();
        match handle {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

/// Extract a printable message from a panic payload.
fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    fn wait_until(condition: impl Fn() -> bool, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        condition()
    }

    #[test]
    fn assign_executes_work_and_returns_to_idle() {
        let worker = Worker::spawn(WorkerId::new(0)).unwrap();
        let executed = Arc::new(AtomicBool::new(false));

        let created_at = worker.last_activity();
        let flag = Arc::clone(&executed);
        worker.assign(Box::new(move || flag.store(true, Ordering::SeqCst))).unwrap();

        assert!(wait_until(
            || worker.state() == WorkerState::Idle,
            Duration::from_secs(1)
        ));
        assert!(executed.load(Ordering::SeqCst));
        assert!(worker.last_activity() >= created_at);

        worker.stop();
        worker.join().unwrap();
    }

    #[test]
    fn assign_while_busy_is_rejected() {
        let worker = Worker::spawn(WorkerId::new(1)).unwrap();
        let (gate_tx, gate_rx) = flume::bounded::<()>(0);

        worker
            .assign(Box::new(move || {
                let _ = gate_rx.recv();
            }))
            .unwrap();
        assert_eq!(worker.state(), WorkerState::Busy);

        let result = worker.assign(Box::new(|| {}));
        assert!(matches!(
            result,
            Err(DispatchError::NotAcceptingWork { state: WorkerState::Busy })
        ));

        gate_tx.send(()).unwrap();
        worker.stop();
        worker.join().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn concurrent_assigns_never_double_book_a_worker() {
        let worker = Arc::new(Worker::spawn(WorkerId::new(2)).unwrap());
        let accepted = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        // At most one unit may ever be outstanding on a single worker.
        // `accepted` is read before `completed`, so the difference is a
        // lower bound on the units outstanding at the second load and the
        // assertion can never fail spuriously.
        let monitor = {
            let accepted = Arc::clone(&accepted);
            let completed = Arc::clone(&completed);
            thread::spawn(move || {
                for _ in 0..5000 {
                    let a = accepted.load(Ordering::SeqCst);
                    let c = completed.load(Ordering::SeqCst);
                    assert!(
                        a as i64 - c as i64 <= 1,
                        "worker had {} units outstanding",
                        a - c
                    );
                    thread::yield_now();
                }
            })
        };

        let mut hammers = Vec::new();
        for _ in 0..4 {
            let worker = Arc::clone(&worker);
            let accepted = Arc::clone(&accepted);
            let completed = Arc::clone(&completed);
            hammers.push(thread::spawn(move || {
                for _ in 0..500 {
                    let done = Arc::clone(&completed);
                    if worker
                        .assign(Box::new(move || {
                            done.fetch_add(1, Ordering::SeqCst);
                        }))
                        .is_ok()
                    {
                        accepted.fetch_add(1, Ordering::SeqCst);
                    }
                    thread::yield_now();
                }
            }));
        }

        for hammer in hammers {
            hammer.join().unwrap();
        }
        monitor.join().unwrap();

        assert!(wait_until(
            || completed.load(Ordering::SeqCst) == accepted.load(Ordering::SeqCst),
            Duration::from_secs(2)
        ));

        worker.stop();
        worker.join().unwrap();
    }

    #[test]
    fn last_activity_commits_with_the_idle_transition() {
        let worker = Worker::spawn(WorkerId::new(3)).unwrap();
        let finished_at: Arc<Mutex<Option<Instant>>> = Arc::new(Mutex::new(None));

        let finish = Arc::clone(&finished_at);
        worker
            .assign(Box::new(move || {
                thread::sleep(Duration::from_millis(100));
                *finish.lock().unwrap() = Some(Instant::now());
            }))
            .unwrap();

        // Spin tightly: the moment Idle is observable, the timestamp must
        // already reflect completion rather than creation time.
        while worker.state() != WorkerState::Idle {
            std::hint::spin_loop();
        }
        let finished_at = finished_at.lock().unwrap().unwrap();
        assert!(worker.last_activity() >= finished_at);

        worker.stop();
        worker.join().unwrap();
    }

    #[test]
    fn stop_lets_in_flight_work_finish() {
        let worker = Worker::spawn(WorkerId::new(4)).unwrap();
        let completed = Arc::new(AtomicBool::new(false));

        let flag = Arc::clone(&completed);
        worker
            .assign(Box::new(move || {
                thread::sleep(Duration::from_millis(50));
                flag.store(true, Ordering::SeqCst);
            }))
            .unwrap();

        worker.stop();
        worker.join().unwrap();

        assert!(completed.load(Ordering::SeqCst));
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn stop_is_idempotent() {
        let worker = Worker::spawn(WorkerId::new(5)).unwrap();

        worker.stop();
        worker.stop();
        worker.join().unwrap();
        assert_eq!(worker.state(), WorkerState::Stopped);

        // Stopping an already-stopped worker is a no-op.
        worker.stop();
        assert_eq!(worker.state(), WorkerState::Stopped);
    }

    #[test]
    fn stopped_worker_rejects_assignment() {
        let worker = Worker::spawn(WorkerId::new(6)).unwrap();
        worker.stop();
        worker.join().unwrap();

        let result = worker.assign(Box::new(|| {}));
        assert!(matches!(result, Err(DispatchError::NotAcceptingWork { .. })));
    }

    #[test]
    fn dropping_the_worker_ends_its_thread() {
        let worker = Worker::spawn(WorkerId::new(7)).unwrap();

        let handle = worker.thread_handle.lock().unwrap().take().unwrap();
        let shared = Arc::downgrade(&worker.shared);

        // Dropping the only handle disconnects the signal channel; the
        // thread's recv fails and the loop ends without a stop signal.
        drop(worker);
        handle.join().unwrap();
        assert!(shared.upgrade().is_none());
    }

    #[test]
    fn panicking_work_does_not_kill_the_worker() {
        let worker = Worker::spawn(WorkerId::new(8)).unwrap();

        worker.assign(Box::new(|| panic!("fetch failed"))).unwrap();
        assert!(wait_until(
            || worker.state() == WorkerState::Idle,
            Duration::from_secs(1)
        ));

        // The worker remains usable after the panic.
        let executed = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&executed);
        worker.assign(Box::new(move || flag.store(true, Ordering::SeqCst))).unwrap();
        assert!(wait_until(|| executed.load(Ordering::SeqCst), Duration::from_secs(1)));

        worker.stop();
        worker.join().unwrap();
    }
}
