use std::sync::Arc;

use tokio::sync::Semaphore;
use vouch_types::{VouchError, VouchResult};

/// Bounded gate in front of `spawn_blocking` for media work.
///
/// At most `workers` closures run at once; further callers wait for a permit
/// without occupying a blocking thread.
#[derive(Debug, Clone)]
pub struct BlockingPool {
    permits: Arc<Semaphore>,
}

impl BlockingPool {
    #[must_use]
    pub fn new(workers: usize) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(workers.max(1))),
        }
    }

    pub async fn run<T, F>(&self, task: F) -> VouchResult<T>
    where
        F: FnOnce() -> VouchResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let permit = Arc::clone(&self.permits)
            .acquire_owned()
            .await
            .map_err(|_| VouchError::Storage("blocking pool closed".to_string()))?;
        run_blocking(move || {
            let _permit = permit;
            task()
        })
        .await
    }

    #[must_use]
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }
}

/// Run short blocking work (SQLite calls) off the async runtime.
pub async fn run_blocking<T, F>(task: F) -> VouchResult<T>
where
    F: FnOnce() -> VouchResult<T> + Send + 'static,
    T: Send + 'static,
{
    match tokio::task::spawn_blocking(task).await {
        Ok(result) => result,
        Err(join) => {
            tracing::error!(error = %join, "blocking task did not complete");
            Err(VouchError::Storage(format!("blocking task failed: {join}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn concurrency_never_exceeds_workers() {
        let pool = BlockingPool::new(2);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..6 {
            let pool = pool.clone();
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            tasks.push(tokio::spawn(async move {
                pool.run(move || {
                    let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(20));
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert!(peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(pool.available(), 2);
    }

    #[tokio::test]
    async fn panicking_task_becomes_an_error() {
        let pool = BlockingPool::new(1);
        let result: VouchResult<()> = pool.run(|| panic!("boom")).await;
        assert!(matches!(result, Err(VouchError::Storage(_))));
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn errors_pass_through() {
        let result: VouchResult<()> = run_blocking(|| Err(VouchError::NotFound)).await;
        assert!(matches!(result, Err(VouchError::NotFound)));
    }
}
