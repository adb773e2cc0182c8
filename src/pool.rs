//! Fixed-size pool for CPU-bound steps (encoding, PDF
//! rendering), awaitable from the single-threaded runtime.
use anyhow::{anyhow, Context, Result};
use log::error;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tokio::sync::oneshot;

pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(threads.max(1))
            .thread_name(|i| format!("thermal-worker-{}", i))
            // a panicking job drops its sender; the awaiting task sees the error
            .panic_handler(|_| error!("worker job panicked"))
            .build()
            .context("building worker pool")?;
        Ok(WorkerPool { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` on the pool and wait for its result without
    /// blocking the runtime thread.
    pub async fn run<F, T>(&self, job: F) -> Result<T>
    where
        F: FnOnce() -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.pool.spawn(move || {
            let _ = tx.send(job());
        });
        rx.await
            .map_err(|_| anyhow!("worker terminated before finishing its job"))?
    }
}
