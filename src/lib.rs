// URL Dispatcher Thread Pool
//
// This crate provides a bounded worker-thread pool for dispatching
// outbound URL fetch work across reusable threads, with idle-timeout
// based reclamation and coordinated shutdown. The fetch transport itself
// is supplied by the caller as opaque units of work.

pub mod logging;
pub mod pool;

// Re-export commonly used types
pub use pool::{DispatchError, DispatcherPool, DispatcherPoolConfig, WorkerId, WorkerState};
