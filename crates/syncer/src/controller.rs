//! Worker pool draining a [`WorkQueue`] into a [`Reconciler`].

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use vsync_core::ObjectKey;
use vsync_store::{ItemBackoff, WorkQueue};

use crate::error::SyncError;
use crate::reconciler::Reconciler;

pub struct Controller {
    queue: WorkQueue<ObjectKey>,
    reconciler: Arc<dyn Reconciler>,
    workers: usize,
}

impl Controller {
    pub fn new(reconciler: Arc<dyn Reconciler>, workers: usize, backoff: ItemBackoff) -> Self {
        let queue = WorkQueue::new(reconciler.name().to_string(), backoff);
        Self { queue, reconciler, workers: workers.max(1) }
    }

    pub fn name(&self) -> &str { self.reconciler.name() }

    pub fn queue(&self) -> WorkQueue<ObjectKey> { self.queue.clone() }

    /// Reconcile one key and feed the outcome back into the queue.
    pub async fn process(&self, key: ObjectKey) {
        process_one(&self.queue, self.reconciler.as_ref(), key).await;
    }

    /// Spawn the workers plus a task shutting the queue down on cancellation.
    pub fn start(&self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.workers + 1);
        for worker in 0..self.workers {
            let queue = self.queue.clone();
            let reconciler = self.reconciler.clone();
            handles.push(tokio::spawn(async move {
                while let Some(key) = queue.get().await {
                    process_one(&queue, reconciler.as_ref(), key).await;
                }
                debug!(controller = reconciler.name(), worker, "worker stopped");
            }));
        }
        let queue = self.queue.clone();
        handles.push(tokio::spawn(async move {
            cancel.cancelled().await;
            queue.shut_down();
        }));
        handles
    }
}

async fn process_one(queue: &WorkQueue<ObjectKey>, reconciler: &dyn Reconciler, key: ObjectKey) {
    let name = reconciler.name().to_string();
    let t0 = Instant::now();
    let res = reconciler.reconcile(&key).await;
    histogram!("vsync_reconcile_ms", t0.elapsed().as_secs_f64() * 1000.0, "controller" => name.clone());
    match res {
        Ok(action) => {
            counter!("vsync_reconcile_total", 1, "controller" => name.clone(), "result" => "ok");
            queue.forget(&key);
            if let Some(after) = action.requeue_after {
                queue.add_after(key.clone(), after);
            }
        }
        Err(e) => {
            counter!("vsync_reconcile_total", 1, "controller" => name.clone(), "result" => "error");
            counter!("vsync_reconcile_errors_total", 1, "controller" => name.clone());
            let retries = queue.num_requeues(&key);
            match &e {
                SyncError::Unmanaged { .. } => warn!(controller = %name, key = %key, retries, error = %e, "name conflict"),
                e if e.is_conflict() => debug!(controller = %name, key = %key, retries, error = %e, "stale write, retrying"),
                _ => warn!(controller = %name, key = %key, retries, error = %e, "reconcile failed"),
            }
            queue.add_rate_limited(key.clone());
        }
    }
    queue.done(&key);
}
