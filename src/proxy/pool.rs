//! Worker pool that advances streams.
//!
//! Every phase of a stream runs as one job. Jobs of one stream serialize on
//! the stream's own lock, jobs of different streams run in parallel.

use std::time::Duration;

use tokio::runtime::Handle;

/// A unit of stream work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

pub trait WorkerPool: Send + Sync {
    /// Run `job` as soon as a worker is free.
    fn schedule(&self, job: Job);

    /// Run `job` once `delay` has elapsed.
    fn schedule_after(&self, delay: Duration, job: Job);
}

/// Pool backed by the blocking threads of a tokio runtime.
///
/// Jobs never run on the async worker threads; filter callbacks may block.
#[derive(Debug, Clone)]
pub struct TokioWorkerPool {
    handle: Handle,
}

impl TokioWorkerPool {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Pool on the runtime the caller is running in.
    ///
    /// # Panics
    /// Panics when called outside a tokio runtime.
    pub fn current() -> Self {
        Self::new(Handle::current())
    }
}

impl WorkerPool for TokioWorkerPool {
    fn schedule(&self, job: Job) {
        self.handle.spawn_blocking(job);
    }

    fn schedule_after(&self, delay: Duration, job: Job) {
        let handle = self.handle.clone();
        self.handle.spawn(async move {
            tokio::time::sleep(delay).await;
            handle.spawn_blocking(job);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::oneshot;

    #[tokio::test]
    async fn runs_scheduled_job() {
        let pool = TokioWorkerPool::current();
        let (tx, rx) = oneshot::channel();
        pool.schedule(Box::new(move || {
            let _ = tx.send(42);
        }));
        assert_eq!(rx.await.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn delayed_job_waits_for_its_deadline() {
        let pool = TokioWorkerPool::current();
        let (tx, mut rx) = oneshot::channel();
        pool.schedule_after(
            Duration::from_secs(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::timeout(Duration::from_secs(2), rx)
            .await
            .expect("job should fire after its delay")
            .unwrap();
    }
}
