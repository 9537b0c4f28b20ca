use std::time::Duration;

/// Configuration for the `DispatcherPool`.
#[derive(Clone, Debug)]
pub struct DispatcherPoolConfig {
    /// Duration of inactivity after which an idle worker becomes eligible
    /// for reclamation.
    pub idle_threshold: Duration,

    /// How often the reclamation pass scans the pool for idle workers.
    pub check_interval: Duration,

    /// Maximum number of live worker threads allowed in the pool.
    pub max_threads: usize,
}

impl Default for DispatcherPoolConfig {
    fn default() -> Self {
        Self {
            idle_threshold: Duration::from_secs(10),
            check_interval: Duration::from_secs(1),
            // Fetch work is IO-bound, so the pool scales past core count.
            max_threads: num_cpus::get() * 4,
        }
    }
}
