use crate::game::installer::error::{InstallError, InstallResult};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounded-concurrency scheduler.
///
/// At most `concurrency` operations hold a slot at once. Waiters are served
/// in submission order because the underlying tokio semaphore is fair.
/// The limiter knows nothing about the work it schedules, and a failing
/// operation only gives its slot back.
#[derive(Clone)]
pub struct TaskLimiter {
    semaphore: Arc<Semaphore>,
    running: Arc<AtomicUsize>,
    queued: Arc<AtomicUsize>,
}

/// A held slot. Dropping it promotes the next queued submission.
pub struct LimiterPermit {
    _permit: OwnedSemaphorePermit,
    running: Arc<AtomicUsize>,
}

impl Drop for LimiterPermit {
    fn drop(&mut self) {
        self.running.fetch_sub(1, Ordering::SeqCst);
    }
}

struct QueueGuard(Arc<AtomicUsize>);

impl Drop for QueueGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskLimiter {
    pub fn new(concurrency: usize) -> InstallResult<Self> {
        if concurrency < 1 {
            return Err(InstallError::Configuration(format!(
                "task limiter needs a concurrency of at least 1, got {}",
                concurrency
            )));
        }

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(concurrency)),
            running: Arc::new(AtomicUsize::new(0)),
            queued: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Operations currently holding a slot
    pub fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Submissions waiting for a slot
    pub fn queued(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    /// Wait for a free slot
    pub async fn acquire(&self) -> InstallResult<LimiterPermit> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        let guard = QueueGuard(self.queued.clone());

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| InstallError::Configuration(format!("task limiter closed: {}", e)))?;

        drop(guard);
        self.running.fetch_add(1, Ordering::SeqCst);
        Ok(LimiterPermit {
            _permit: permit,
            running: self.running.clone(),
        })
    }

    /// Run `task` once a slot is free and hand back its output untouched
    pub async fn limit<F, Fut, T>(&self, task: F) -> InstallResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _permit = self.acquire().await?;
        Ok(task().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[test]
    fn zero_concurrency_is_a_configuration_error() {
        assert!(matches!(
            TaskLimiter::new(0),
            Err(InstallError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn never_exceeds_ceiling() {
        let limiter = TaskLimiter::new(3).unwrap();
        let release = Arc::new(Notify::new());
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let limiter = limiter.clone();
            let release = release.clone();
            let active = active.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .limit(|| async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        release.notified().await;
                        active.fetch_sub(1, Ordering::SeqCst);
                    })
                    .await
                    .unwrap()
            }));
        }

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(limiter.running(), 3);
        assert_eq!(limiter.queued(), 7);

        // Release one waiter at a time until everything drained
        while handles.iter().any(|h| !h.is_finished()) {
            release.notify_one();
            tokio::time::sleep(Duration::from_millis(5)).await;
            assert!(active.load(Ordering::SeqCst) <= 3);
        }

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(limiter.running(), 0);
    }

    #[tokio::test]
    async fn promotes_in_submission_order() {
        let limiter = TaskLimiter::new(1).unwrap();
        let order = Arc::new(Mutex::new(Vec::new()));
        let gate = limiter.acquire().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..5 {
            let limiter = limiter.clone();
            let order = order.clone();
            handles.push(tokio::spawn(async move {
                limiter
                    .limit(|| async move {
                        order.lock().unwrap().push(i);
                    })
                    .await
                    .unwrap()
            }));
            // Make sure submission order is the spawn order
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        drop(gate);
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn failures_are_isolated() {
        let limiter = TaskLimiter::new(1).unwrap();

        let failed: Result<(), String> = limiter
            .limit(|| async { Err("boom".to_string()) })
            .await
            .unwrap();
        assert_eq!(failed, Err("boom".to_string()));

        let ok: Result<u32, String> = limiter.limit(|| async { Ok(7) }).await.unwrap();
        assert_eq!(ok, Ok(7));
        assert_eq!(limiter.running(), 0);
    }

    #[tokio::test]
    async fn closed_limiter_reports_an_error() {
        let limiter = TaskLimiter::new(2).unwrap();
        limiter.semaphore.close();

        assert!(matches!(
            limiter.acquire().await,
            Err(InstallError::Configuration(_))
        ));
        assert!(limiter.limit(|| async { 1 }).await.is_err());
        assert_eq!(limiter.queued(), 0);
        assert_eq!(limiter.running(), 0);
    }
}
