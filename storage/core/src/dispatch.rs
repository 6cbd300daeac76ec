use std::sync::Arc;

use tokio::sync::Semaphore;

/// Maximum number of concurrent CPU-bound hash jobs in flight, mirroring
/// the original's `PARALLEL_HASH_JOBS`.
pub const PARALLEL_HASH_JOBS: usize = 64;

/// The Rust analogue of `GrandCentralDispatch`: instead of a dedicated
/// worker-thread pool posting results back to a controller `io_service`,
/// jobs run on `tokio::task::spawn_blocking` (which already has its own
/// bounded pool) gated by a semaphore sized to the configured parallelism,
/// and results are simply the task's `JoinHandle` output — there is no
/// separate controller loop to post back to since `.await` already resumes
/// on the calling task.
pub struct Dispatcher {
    limit: Arc<Semaphore>,
}

impl Dispatcher {
    pub fn new(parallel: usize) -> Self {
        Dispatcher {
            limit: Arc::new(Semaphore::new(parallel.max(1))),
        }
    }

    /// Submits one CPU-bound job, running it on the blocking pool once a
    /// permit is available, and returns its result.
    pub async fn submit<F, T>(&self, job: F) -> T
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let permit = self.limit.clone().acquire_owned().await.expect("semaphore closed");
        let result = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            job()
        })
        .await;
        result.expect("hash job panicked")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn submit_runs_job_and_returns_result() {
        let dispatcher = Dispatcher::new(4);
        let result = dispatcher.submit(|| 2 + 2).await;
        assert_eq!(result, 4);
    }
}
