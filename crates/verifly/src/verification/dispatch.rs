//! Supervised worker pool that runs admitted verifications off the request path.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::domain::RunId;

/// Work executed for each dequeued run.
#[async_trait]
pub trait RunHandler: Send + Sync + 'static {
    async fn handle(&self, run_id: RunId);
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    #[error("run queue is closed")]
    Closed,
}

/// Bounded queue plus a fixed set of workers sharing its receiver.
pub struct RunDispatcher {
    sender: mpsc::Sender<RunId>,
    queued: Arc<AtomicUsize>,
    workers: Vec<JoinHandle<()>>,
}

impl RunDispatcher {
    /// Must be called inside a tokio runtime.
    pub fn spawn(handler: Arc<dyn RunHandler>, workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel::<RunId>(queue_capacity.max(1));
        let receiver = Arc::new(Mutex::new(receiver));
        let queued = Arc::new(AtomicUsize::new(0));

        let worker_count = workers.max(1);
        info!(workers = worker_count, queue_capacity, "starting run dispatcher");

        let workers = (0..worker_count)
            .map(|index| {
                let receiver = Arc::clone(&receiver);
                let handler = Arc::clone(&handler);
                let queued = Arc::clone(&queued);
                tokio::spawn(worker_loop(index, receiver, handler, queued))
            })
            .collect();

        Self {
            sender,
            queued,
            workers,
        }
    }

    /// Enqueue a run, waiting for capacity when the queue is full.
    pub async fn submit(&self, run_id: RunId) -> Result<(), DispatchError> {
        self.queued.fetch_add(1, Ordering::SeqCst);
        if self.sender.send(run_id).await.is_err() {
            self.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(DispatchError::Closed);
        }
        debug!(run_id = %run_id, "run submitted");
        Ok(())
    }

    /// Runs submitted but not yet picked up by a worker.
    pub fn pending(&self) -> usize {
        self.queued.load(Ordering::SeqCst)
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for RunDispatcher {
    fn drop(&mut self) {
        for worker in &self.workers {
            worker.abort();
        }
    }
}

async fn worker_loop(
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<RunId>>>,
    handler: Arc<dyn RunHandler>,
    queued: Arc<AtomicUsize>,
) {
    loop {
        let next = { receiver.lock().await.recv().await };
        let Some(run_id) = next else {
            debug!(worker = index, "run queue closed, worker exiting");
            break;
        };
        queued.fetch_sub(1, Ordering::SeqCst);

        // A panic inside the job only takes down its own task.
        let handler = Arc::clone(&handler);
        let job = tokio::spawn(async move { handler.handle(run_id).await });
        if let Err(join_error) = job.await {
            error!(worker = index, run_id = %run_id, %join_error, "run job aborted");
        }
    }
}
